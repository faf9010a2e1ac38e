use super::{NodeRole, QueueName};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of one bridge node: role plus an instance key.
///
/// The instance key is the shard index for a bot shard, the VM id for a
/// VM agent, and a process name for the gateway. Assigned once at process
/// start and immutable for the process lifetime.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct NodeIdentity {
    pub role: NodeRole,
    pub instance_key: String,
}

impl NodeIdentity {
    pub fn new(role: NodeRole, instance_key: impl Into<String>) -> Self {
        Self {
            role,
            instance_key: instance_key.into(),
        }
    }

    /// Queue this node receives replies on. Derived, never configured.
    pub fn reply_queue(&self) -> QueueName {
        QueueName::new(format!("reply-{}-{}", self.role.prefix(), self.instance_key))
    }
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.role, self.instance_key)
    }
}
