//! Static catalog of the known request and event operations.
//!
//! Operation names are plain dotted strings on the wire (the core stays
//! free of per-operation `data` schemas, per the design notes); this
//! module only maps an op name to the capability it requires, which is
//! the one thing the Request Broker needs to pre-flight a call.

use crate::capability::Capability;

/// Returns the capability a request operation requires, or `None` if the
/// operation is not in the known request set.
pub fn required_capability(op: &str) -> Option<Capability> {
    match op {
        "command.execute" => Some(Capability::CommandExecution),
        "whitelist.add" | "whitelist.remove" | "whitelist.list" => {
            Some(Capability::WhitelistManagement)
        }
        "player.list" | "player.info" | "player.kick" => Some(Capability::PlayerManagement),
        "server.info" | "server.status" => Some(Capability::ServerInfo),
        _ => None,
    }
}

/// Whether `op` is one of the documented inbound event operations.
/// The dispatcher itself matches on subscription prefixes rather than
/// this list — it exists for diagnostics and tests.
pub fn is_known_event(op: &str) -> bool {
    matches!(
        op,
        "player.join"
            | "player.leave"
            | "player.chat"
            | "player.death"
            | "server.metrics"
            | "server.status"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_request_ops_map_to_a_capability() {
        assert_eq!(
            required_capability("command.execute"),
            Some(Capability::CommandExecution)
        );
        assert_eq!(
            required_capability("whitelist.add"),
            Some(Capability::WhitelistManagement)
        );
        assert_eq!(required_capability("bogus.op"), None);
    }

    #[test]
    fn known_events_are_recognized() {
        assert!(is_known_event("player.chat"));
        assert!(!is_known_event("player.teleport"));
    }
}
