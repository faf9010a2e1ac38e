mod node_identity;
mod node_role;
mod queue_name;
mod target;

pub use node_identity::NodeIdentity;
pub use node_role::NodeRole;
pub use queue_name::QueueName;
pub use target::Target;

#[cfg(test)]
mod tests {
    use super::*;

    macro_rules! serde_round_trip {
        ($name:ident, $val:expr) => {
            mod $name {
                use super::*;

                #[test]
                fn json() {
                    let val = $val;
                    let json = serde_json::to_string(&val).unwrap();
                    let decoded = serde_json::from_str(&json).unwrap();
                    assert_eq!(val, decoded);
                }
            }
        };
    }

    serde_round_trip!(node_role, NodeRole::VmAgent);
    serde_round_trip!(queue_name, QueueName::new("vm-v1"));
    serde_round_trip!(
        node_identity,
        NodeIdentity::new(NodeRole::BotShard, "3")
    );
    serde_round_trip!(target, Target::vm_agent("v1"));

    #[test]
    fn role_prefixes() {
        assert_eq!(NodeRole::Gateway.prefix(), "gateway");
        assert_eq!(NodeRole::BotShard.prefix(), "bot-shard");
        assert_eq!(NodeRole::VmAgent.prefix(), "vm");
    }

    #[test]
    fn reply_queue_is_derived_from_identity() {
        let id = NodeIdentity::new(NodeRole::VmAgent, "v1");
        assert_eq!(id.reply_queue(), QueueName::new("reply-vm-v1"));

        let id = NodeIdentity::new(NodeRole::Gateway, "api");
        assert_eq!(id.reply_queue(), QueueName::new("reply-gateway-api"));
    }

    #[test]
    fn queue_name_hash_eq() {
        use std::collections::HashSet;
        let q1 = QueueName::new("bot-shard-1");
        let q2 = QueueName::new("bot-shard-1");
        let q3 = QueueName::new("bot-shard-2");

        assert_eq!(q1, q2);
        assert_ne!(q1, q3);

        let mut set = HashSet::new();
        set.insert(q1);
        set.insert(q2);
        assert_eq!(set.len(), 1);
        set.insert(q3);
        assert_eq!(set.len(), 2);
    }
}
