use std::fmt::{self, Display};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::lease::{Delivery, MessageId};
use crate::message::{HeadMessage, NodeMessage};

/// The two logical channels.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueName {
    Head,
    Node,
}

impl QueueName {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::Head => "head",
            QueueName::Node => "node",
        }
    }
}

impl AsRef<str> for QueueName {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl FromStr for QueueName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "head" => Ok(QueueName::Head),
            "node" => Ok(QueueName::Node),
            _ => Err(format!("Invalid queue: {}", s)),
        }
    }
}

impl Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Trait for queue backends with visibility-timeout delivery.
///
/// A fetched message stays in the queue, invisible for its time-to-run, and
/// is delivered again if it is not acknowledged before that window closes.
/// Lower priority values are delivered first.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Enqueue a message body.
    async fn put(
        &self,
        queue: QueueName,
        body: String,
        priority: u32,
        ttr: Duration,
    ) -> anyhow::Result<MessageId>;

    /// Fetch the most urgent visible message without removing it.
    async fn get(&self, queue: QueueName) -> anyhow::Result<Option<Delivery>>;

    /// Remove a fetched message. Acking a message that is already gone is
    /// not an error.
    async fn ack(&self, delivery: &Delivery) -> anyhow::Result<()>;
}

/// Sends typed messages with the priority and time-to-run configured for
/// their type.
#[derive(Clone)]
pub struct Outbox {
    queue: Arc<dyn MessageQueue>,
    config: Arc<PipelineConfig>,
}

impl Outbox {
    pub fn new(queue: Arc<dyn MessageQueue>, config: Arc<PipelineConfig>) -> Self {
        Self { queue, config }
    }

    pub fn queue(&self) -> &Arc<dyn MessageQueue> {
        &self.queue
    }

    pub async fn send_head(&self, message: &HeadMessage) -> anyhow::Result<MessageId> {
        let kind = message
            .kind()
            .context("refusing to send a message without a type")?;
        let policy = self.config.policy_for(kind);
        self.queue
            .put(QueueName::Head, message.encode()?, policy.priority, policy.ttr())
            .await
            .with_context(|| format!("enqueueing {} on head", kind.as_str()))
    }

    /// Chunk `process` requests carry the job's priority; other node work
    /// uses its configured policy.
    pub async fn send_node(&self, message: &NodeMessage) -> anyhow::Result<MessageId> {
        let kind = message
            .kind()
            .context("refusing to send a message without a type")?;
        let mut policy = self.config.policy_for(kind);
        if let NodeMessage::Process(request) = message {
            policy.priority = request.priority;
        }
        self.queue
            .put(QueueName::Node, message.encode()?, policy.priority, policy.ttr())
            .await
            .with_context(|| format!("enqueueing {} on node", kind.as_str()))
    }
}
