use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// The fixed, closed set of capabilities a connector may advertise at
/// handshake. Unknown strings never reach this type — see
/// [`parse_capabilities`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    CommandExecution,
    PlayerManagement,
    WhitelistManagement,
    ServerInfo,
    WorldAccess,
    PluginIntegration,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::CommandExecution => "command_execution",
            Capability::PlayerManagement => "player_management",
            Capability::WhitelistManagement => "whitelist_management",
            Capability::ServerInfo => "server_info",
            Capability::WorldAccess => "world_access",
            Capability::PluginIntegration => "plugin_integration",
        }
    }

    fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "command_execution" => Capability::CommandExecution,
            "player_management" => Capability::PlayerManagement,
            "whitelist_management" => Capability::WhitelistManagement,
            "server_info" => Capability::ServerInfo,
            "world_access" => Capability::WorldAccess,
            "plugin_integration" => Capability::PluginIntegration,
            _ => return None,
        })
    }
}

pub type CapabilitySet = BTreeSet<Capability>;

/// Parses the `capabilities` array from a handshake payload, silently
/// dropping anything outside the closed set rather than failing the
/// handshake over it.
pub fn parse_capabilities<S: AsRef<str>>(raw: &[S]) -> CapabilitySet {
    raw.iter()
        .filter_map(|s| {
            let cap = Capability::from_str(s.as_ref());
            if cap.is_none() {
                tracing::debug!(capability = s.as_ref(), "ignoring unknown capability");
            }
            cap
        })
        .collect()
}
