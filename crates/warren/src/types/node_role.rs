use serde::{Deserialize, Serialize};
use std::fmt;

/// Process role a bridge node runs as.
///
/// The role decides which queues the node owns and how other nodes
/// address it. Assigned once at process start.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeRole {
    /// HTTP API gateway. Owns only its reply queue.
    Gateway,
    /// One of N chat-bot shard processes.
    BotShard,
    /// Agent controlling containerized game-server workloads on one host.
    VmAgent,
}

impl NodeRole {
    /// Queue-name prefix for this role.
    pub fn prefix(&self) -> &'static str {
        match self {
            NodeRole::Gateway => "gateway",
            NodeRole::BotShard => "bot-shard",
            NodeRole::VmAgent => "vm",
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.prefix())
    }
}
