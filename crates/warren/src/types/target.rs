use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical destination of a call, before queue-name resolution.
///
/// A target never carries a queue name; `routing::resolve` derives one
/// deterministically so any caller can compute it without a directory
/// service.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Target {
    /// The API gateway process.
    Gateway,
    /// The bot shard responsible for `entity_id` (guild or chat id).
    /// Which shard that is depends on the configured shard count.
    BotShard { entity_id: String },
    /// The VM agent with the externally known id `vm_id`.
    VmAgent { vm_id: String },
}

impl Target {
    pub fn bot_shard(entity_id: impl Into<String>) -> Self {
        Target::BotShard {
            entity_id: entity_id.into(),
        }
    }

    pub fn vm_agent(vm_id: impl Into<String>) -> Self {
        Target::VmAgent {
            vm_id: vm_id.into(),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Gateway => write!(f, "gateway"),
            Target::BotShard { entity_id } => write!(f, "bot-shard({entity_id})"),
            Target::VmAgent { vm_id } => write!(f, "vm({vm_id})"),
        }
    }
}
