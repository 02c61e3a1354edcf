use std::net::{IpAddr, Ipv4Addr};

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Operational HTTP listener configuration.
///
/// The listener only serves `/health` and `/metrics` for the host process.
/// Reconciliation itself is never reachable over HTTP.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Whether to bind the listener at all.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Seconds to wait for in-flight work after a shutdown signal.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            host: default_host(),
            port: default_port(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn default_port() -> u16 {
    9464
}

fn default_shutdown_timeout() -> u64 {
    30
}

impl ServerConfig {
    pub fn shutdown_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled && self.port == 0 {
            return Err(ConfigError::Validation(
                "server.port must be non-zero when the listener is enabled".into(),
            ));
        }
        Ok(())
    }
}
