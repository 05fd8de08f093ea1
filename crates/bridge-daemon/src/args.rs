use clap::Parser;
use serde::Serialize;

/// Listener process for the Mochi bridge: accepts U-WBP v2 WebSocket
/// connections from game server connectors.
#[derive(Parser, Debug)]
#[command(name = "mochi-bridged")]
#[command(about = "Central management bridge for a fleet of Minecraft servers")]
#[command(version)]
pub struct Args {
    /// Listen address for the WebSocket listener.
    #[arg(long, value_name = "listen-addr")]
    pub listen_addr: Option<String>,

    /// Listen port for the WebSocket listener.
    #[arg(long, value_name = "listen-port")]
    pub listen_port: Option<u16>,

    /// Enable debug logging.
    #[arg(long, default_value = "false")]
    pub debug: bool,

    /// YAML config file overlaying these CLI arguments.
    #[arg(long)]
    pub config_file: Option<String>,
}

/// The subset of `Args` that should override `BridgeConfig` defaults.
/// `None` fields are omitted from serialization so the merge leaves the
/// underlying default (or an earlier-merged YAML value) untouched.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CliOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listen_addr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listen_port: Option<u16>,
    pub debug: bool,
}

impl Args {
    pub fn overrides(&self) -> CliOverrides {
        CliOverrides {
            listen_addr: self.listen_addr.clone(),
            listen_port: self.listen_port,
            debug: self.debug,
        }
    }
}
