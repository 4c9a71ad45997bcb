use std::env;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::Result;

/// Connection manager configuration.
///
/// Durations are stored in the units the wire options use (milliseconds for
/// reconnect delays, seconds for heartbeat/idle intervals); accessors
/// convert to `Duration`.
#[derive(Debug, Clone, Deserialize)]
pub struct ManagerConfig {
    /// WebSocket endpoint, shared by every pooled connection.
    #[serde(default = "default_url")]
    pub url: String,
    /// Optional subprotocols offered during the handshake.
    #[serde(default)]
    pub protocols: Vec<String>,
    /// Base reconnect delay in milliseconds.
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval: u64,
    /// Upper bound on the reconnect delay in milliseconds.
    #[serde(default = "default_max_reconnect_delay")]
    pub max_reconnect_delay: u64,
    /// Multiplier applied to the delay after each failed attempt.
    #[serde(default = "default_reconnect_decay")]
    pub reconnect_decay: f64,
    /// Reconnect attempts before a connection is retired.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// Heartbeat ping interval in seconds.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval: u64,
    /// Outbound queue capacity per connection (oldest dropped on overflow).
    #[serde(default = "default_message_queue_size")]
    pub message_queue_size: usize,
    /// Number of routing slots topics hash into.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Maximum simultaneously live connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Seconds a topic-less connection may linger before the sweep closes it.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: u64,
    /// Idle sweep interval in seconds.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval: u64,
}

fn default_url() -> String {
    "ws://localhost:8080/ws".to_string()
}

fn default_reconnect_interval() -> u64 {
    1000
}

fn default_max_reconnect_delay() -> u64 {
    30_000 // 30 seconds
}

fn default_reconnect_decay() -> f64 {
    1.5
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_heartbeat_interval() -> u64 {
    30 // 30 seconds
}

fn default_message_queue_size() -> usize {
    100
}

fn default_pool_size() -> usize {
    3
}

fn default_max_connections() -> usize {
    3
}

fn default_idle_timeout() -> u64 {
    60 // 1 minute
}

fn default_sweep_interval() -> u64 {
    60 // 1 minute
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            protocols: Vec::new(),
            reconnect_interval: default_reconnect_interval(),
            max_reconnect_delay: default_max_reconnect_delay(),
            reconnect_decay: default_reconnect_decay(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            heartbeat_interval: default_heartbeat_interval(),
            message_queue_size: default_message_queue_size(),
            pool_size: default_pool_size(),
            max_connections: default_max_connections(),
            idle_timeout: default_idle_timeout(),
            sweep_interval: default_sweep_interval(),
        }
    }
}

impl ManagerConfig {
    /// Load configuration from `config/*` files and `WSMUX_*` environment
    /// variables, layered over the defaults.
    pub fn from_env() -> Result<Self> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("url", default_url())?
            .set_default("reconnect_interval", default_reconnect_interval())?
            .set_default("max_reconnect_delay", default_max_reconnect_delay())?
            .set_default("reconnect_decay", default_reconnect_decay())?
            .set_default("max_reconnect_attempts", default_max_reconnect_attempts())?
            .set_default("heartbeat_interval", default_heartbeat_interval())?
            .set_default("message_queue_size", default_message_queue_size() as u64)?
            .set_default("pool_size", default_pool_size() as u64)?
            .set_default("max_connections", default_max_connections() as u64)?
            .set_default("idle_timeout", default_idle_timeout())?
            .set_default("sweep_interval", default_sweep_interval())?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // WSMUX_URL, WSMUX_MAX_CONNECTIONS, WSMUX_PROTOCOLS, etc.
            .add_source(
                Environment::with_prefix("WSMUX")
                    .try_parsing(true)
                    .list_separator(","),
            );

        Ok(builder.build()?.try_deserialize()?)
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_reconnect_delay)
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval)
    }

    pub fn idle(&self) -> Duration {
        Duration::from_secs(self.idle_timeout)
    }

    pub fn sweep(&self) -> Duration {
        Duration::from_secs(self.sweep_interval)
    }
}
