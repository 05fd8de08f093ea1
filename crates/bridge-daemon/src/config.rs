use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use figment::providers::{Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::args::Args;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// Listener configuration, per the recognized option set: `listenAddr`,
/// `listenPort`, `tls`, the three timeouts, `maxFrameBytes`,
/// `maxPendingPerSession`, and `subscriberInboxCapacity`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeConfig {
    pub listen_addr: String,
    pub listen_port: u16,
    #[serde(default)]
    pub tls: Option<TlsConfig>,
    #[serde(with = "humantime_serde")]
    pub handshake_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub heartbeat_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub default_request_timeout: Duration,
    pub max_frame_bytes: usize,
    pub max_pending_per_session: usize,
    pub subscriber_inbox_capacity: usize,
    #[serde(default)]
    pub debug: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0".to_string(),
            listen_port: 7420,
            tls: None,
            handshake_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(30),
            default_request_timeout: Duration::from_secs(30),
            max_frame_bytes: 1 << 20,
            max_pending_per_session: 1024,
            subscriber_inbox_capacity: 256,
            debug: false,
        }
    }
}

impl BridgeConfig {
    /// Layers, lowest precedence first: compiled-in defaults, CLI-provided
    /// overrides, then an optional YAML file on top — the file always wins,
    /// matching how `mcp-host` treats `--config-file` as the final say over
    /// whatever was passed on the command line.
    pub fn load(args: &Args) -> eyre::Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(BridgeConfig::default()))
            .merge(Serialized::defaults(args.overrides()));
        if let Some(config_file) = &args.config_file {
            figment = figment.merge(Yaml::file(config_file));
        }
        Ok(figment.extract()?)
    }

    pub fn listen_socket_addr(&self) -> eyre::Result<SocketAddr> {
        format!("{}:{}", self.listen_addr, self.listen_port)
            .parse()
            .map_err(|e| eyre::eyre!("invalid listen address {}:{}: {e}", self.listen_addr, self.listen_port))
    }

    pub fn session_config(&self) -> bridge_core::SessionConfig {
        bridge_core::SessionConfig {
            handshake_timeout: self.handshake_timeout,
            heartbeat_interval: self.heartbeat_interval,
            default_request_timeout: self.default_request_timeout,
            max_pending_per_session: self.max_pending_per_session,
            clock_tolerance: Duration::from_secs(30),
        }
    }
}
