use std::fmt::Display;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::queue::QueueName;

/// Identifies one fetch of a message; a redelivery gets a new lease.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct LeaseId(pub Uuid);

impl Default for LeaseId {
    fn default() -> Self {
        Self::new()
    }
}

impl LeaseId {
    /// Create a new lease ID using UUID v7.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Display for LeaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies a message for its whole life in a queue.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub Uuid);

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A fetched message that stays invisible to other consumers until
/// `expires_at`, after which the queue delivers it again unless acked.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Delivery {
    pub message_id: MessageId,
    pub lease_id: LeaseId,
    pub queue: QueueName,
    /// JSON body as enqueued.
    pub body: String,
    pub priority: u32,
    pub expires_at: DateTime<Utc>,
    /// How many times the message has been handed out, this one included.
    pub deliveries: u32,
}

impl Delivery {
    pub fn new(
        message_id: MessageId,
        queue: QueueName,
        body: String,
        priority: u32,
        ttr: Duration,
        deliveries: u32,
    ) -> Self {
        Self {
            message_id,
            lease_id: LeaseId::new(),
            queue,
            body,
            priority,
            expires_at: Utc::now() + ttr,
            deliveries,
        }
    }

    /// Checks if the visibility window has passed.
    pub fn is_expired(&self) -> bool {
        self.expires_at < Utc::now()
    }

    pub fn is_redelivery(&self) -> bool {
        self.deliveries > 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_delivery_gets_its_own_lease() {
        let id = MessageId::new();
        let first = Delivery::new(id, QueueName::Head, "{}".into(), 10, Duration::seconds(60), 1);
        let second = Delivery::new(id, QueueName::Head, "{}".into(), 10, Duration::seconds(60), 2);
        assert_eq!(first.message_id, second.message_id);
        assert_ne!(first.lease_id, second.lease_id);
        assert_eq!(first.lease_id.to_string(), first.lease_id.0.to_string());
    }

    #[test]
    fn delivery_expires_after_ttr() {
        let fresh = Delivery::new(
            MessageId::new(),
            QueueName::Head,
            "{}".into(),
            10,
            Duration::seconds(60),
            1,
        );
        assert!(!fresh.is_expired());
        assert!(!fresh.is_redelivery());

        let stale = Delivery::new(
            MessageId::new(),
            QueueName::Node,
            "{}".into(),
            10,
            Duration::seconds(-1),
            2,
        );
        assert!(stale.is_expired());
        assert!(stale.is_redelivery());
    }
}
