use serde::{Deserialize, Serialize};
use tracing::info;

use crate::store::EntityStore;

/// Registry entry for a worker process.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub instance_id: String,
    pub instance_type: String,
    pub active: bool,
}

/// How a running process identifies itself in reports and the registry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeIdentity {
    pub instance_id: String,
    pub instance_type: String,
}

impl NodeIdentity {
    pub fn new(instance_id: impl Into<String>, instance_type: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            instance_type: instance_type.into(),
        }
    }

    /// Reads `PEPFLOW_INSTANCE_ID` and `PEPFLOW_INSTANCE_TYPE`, falling back
    /// to the host name and `local`.
    pub fn from_env() -> Self {
        let instance_id = std::env::var("PEPFLOW_INSTANCE_ID")
            .or_else(|_| std::env::var("HOSTNAME"))
            .unwrap_or_else(|_| format!("pid-{}", std::process::id()));
        let instance_type =
            std::env::var("PEPFLOW_INSTANCE_TYPE").unwrap_or_else(|_| "local".to_string());
        Self::new(instance_id, instance_type)
    }

    pub fn to_node(&self) -> Node {
        Node {
            instance_id: self.instance_id.clone(),
            instance_type: self.instance_type.clone(),
            active: true,
        }
    }
}

/// Records the instance as an active node. An existing record is kept.
pub async fn register_node(
    store: &dyn EntityStore,
    identity: &NodeIdentity,
) -> anyhow::Result<bool> {
    let created = store.save_node(&identity.to_node()).await?;
    if created {
        info!(
            instance_id = %identity.instance_id,
            instance_type = %identity.instance_type,
            "registered node"
        );
    }
    Ok(created)
}
