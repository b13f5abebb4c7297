use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use pepflow::*;
use std::sync::Arc;
use std::time::Duration;

/// Visibility-timeout queue held in memory.
///
/// A fetched message stays stored until acked and becomes visible again
/// once its time-to-run passes, or immediately after
/// [`InMemoryMessageQueue::expire_leases`].
#[derive(Clone, Default)]
pub struct InMemoryMessageQueue {
    state: Arc<Mutex<QueueState>>,
}

#[derive(Default)]
struct QueueState {
    messages: Vec<StoredMessage>,
    sent: Vec<SentRecord>,
    next_seq: u64,
}

#[derive(Clone, Debug)]
struct StoredMessage {
    id: MessageId,
    seq: u64,
    queue: QueueName,
    body: String,
    priority: u32,
    ttr: Duration,
    visible_at: DateTime<Utc>,
    lease_id: Option<LeaseId>,
    deliveries: u32,
}

/// One `put`, kept after the message itself is acked.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentRecord {
    pub queue: QueueName,
    pub body: String,
    pub priority: u32,
    pub ttr: Duration,
}

impl InMemoryMessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages still stored on `queue`, leased or not.
    pub fn depth(&self, queue: QueueName) -> usize {
        self.state
            .lock()
            .messages
            .iter()
            .filter(|message| message.queue == queue)
            .count()
    }

    /// Every `put` in order, including messages already acked.
    pub fn sent(&self) -> Vec<SentRecord> {
        self.state.lock().sent.clone()
    }

    /// Decoded head messages that were ever sent.
    pub fn sent_head(&self) -> Vec<HeadMessage> {
        self.sent()
            .into_iter()
            .filter(|record| record.queue == QueueName::Head)
            .filter_map(|record| HeadMessage::decode(&record.body).ok())
            .collect()
    }

    /// Decoded node messages that were ever sent.
    pub fn sent_node(&self) -> Vec<NodeMessage> {
        self.sent()
            .into_iter()
            .filter(|record| record.queue == QueueName::Node)
            .filter_map(|record| NodeMessage::decode(&record.body).ok())
            .collect()
    }

    /// Sent records of one message type.
    pub fn sent_of(&self, kind: MessageType) -> Vec<SentRecord> {
        self.sent()
            .into_iter()
            .filter(|record| record.queue == kind.queue())
            .filter(|record| {
                let decoded = match record.queue {
                    QueueName::Head => HeadMessage::decode(&record.body).ok().and_then(|m| m.kind()),
                    QueueName::Node => NodeMessage::decode(&record.body).ok().and_then(|m| m.kind()),
                };
                decoded == Some(kind)
            })
            .collect()
    }

    /// Stores a raw body, bypassing the outbox.
    pub fn push_raw(&self, queue: QueueName, body: impl Into<String>, priority: u32) {
        self.insert(queue, body.into(), priority, Duration::from_secs(60));
    }

    /// Makes every leased message visible again, as if its time-to-run ran
    /// out.
    pub fn expire_leases(&self) {
        let now = Utc::now();
        for message in self.state.lock().messages.iter_mut() {
            if message.lease_id.is_some() {
                message.visible_at = now;
            }
        }
    }

    /// Drops every stored message and the send log.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.messages.clear();
        state.sent.clear();
    }

    fn insert(&self, queue: QueueName, body: String, priority: u32, ttr: Duration) -> MessageId {
        let mut state = self.state.lock();
        let id = MessageId::new();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.sent.push(SentRecord {
            queue,
            body: body.clone(),
            priority,
            ttr,
        });
        state.messages.push(StoredMessage {
            id,
            seq,
            queue,
            body,
            priority,
            ttr,
            visible_at: Utc::now(),
            lease_id: None,
            deliveries: 0,
        });
        id
    }
}

#[async_trait]
impl MessageQueue for InMemoryMessageQueue {
    async fn put(
        &self,
        queue: QueueName,
        body: String,
        priority: u32,
        ttr: Duration,
    ) -> anyhow::Result<MessageId> {
        Ok(self.insert(queue, body, priority, ttr))
    }

    async fn get(&self, queue: QueueName) -> anyhow::Result<Option<Delivery>> {
        let now = Utc::now();
        let mut state = self.state.lock();
        let Some(message) = state
            .messages
            .iter_mut()
            .filter(|message| message.queue == queue && message.visible_at <= now)
            .min_by_key(|message| (message.priority, message.seq))
        else {
            return Ok(None);
        };

        let ttr = chrono::Duration::from_std(message.ttr)?;
        message.deliveries += 1;
        let delivery = Delivery::new(
            message.id,
            queue,
            message.body.clone(),
            message.priority,
            ttr,
            message.deliveries,
        );
        message.lease_id = Some(delivery.lease_id);
        message.visible_at = delivery.expires_at;
        Ok(Some(delivery))
    }

    async fn ack(&self, delivery: &Delivery) -> anyhow::Result<()> {
        self.state.lock().messages.retain(|message| {
            !(message.id == delivery.message_id && message.lease_id == Some(delivery.lease_id))
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fetched_message_is_hidden_until_expired() {
        let queue = InMemoryMessageQueue::new();
        queue.push_raw(QueueName::Head, "{}", 10);

        let first = queue.get(QueueName::Head).await.unwrap().unwrap();
        assert!(queue.get(QueueName::Head).await.unwrap().is_none());

        queue.expire_leases();
        let second = queue.get(QueueName::Head).await.unwrap().unwrap();
        assert_eq!(first.message_id, second.message_id);
        assert!(second.is_redelivery());

        queue.ack(&first).await.unwrap();
        assert_eq!(queue.depth(QueueName::Head), 1, "stale lease must not remove");
        queue.ack(&second).await.unwrap();
        assert_eq!(queue.depth(QueueName::Head), 0);
    }

    #[tokio::test]
    async fn lower_priority_value_is_fetched_first() {
        let queue = InMemoryMessageQueue::new();
        queue.push_raw(QueueName::Node, "late", 50);
        queue.push_raw(QueueName::Node, "urgent", 10);

        let delivery = queue.get(QueueName::Node).await.unwrap().unwrap();
        assert_eq!(delivery.body, "urgent");
    }
}
