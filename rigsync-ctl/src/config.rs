use std::path::Path;
use std::time::Duration;

use rigsync_client::transport::WsConfig;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// WebSocket endpoint of the device server
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub reconnect: bool,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Consecutive failed dials before giving up; unset retries forever
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Capacity of the inbound event queue
    pub event_buffer: usize,
    /// How long `set` waits for the first sync and for the reply
    pub reply_timeout_secs: u64,
}

impl Config {
    pub fn load(path: &Path) -> color_eyre::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn ws_config(&self) -> WsConfig {
        let mut ws = WsConfig::new(self.server.url.clone());
        ws.reconnect = self.transport.reconnect;
        ws.initial_backoff = Duration::from_millis(self.transport.initial_backoff_ms.max(1));
        ws.max_backoff = Duration::from_millis(
            self.transport
                .max_backoff_ms
                .max(self.transport.initial_backoff_ms),
        );
        ws.max_attempts = self.transport.max_attempts;
        ws.event_buffer = self.session.event_buffer.max(1);
        ws
    }
}

impl SessionConfig {
    pub fn reply_timeout(&self) -> Duration {
        Duration::from_secs(self.reply_timeout_secs.max(1))
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            reconnect: true,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
            max_attempts: None,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            event_buffer: 256,
            reply_timeout_secs: 5,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                url: "ws://127.0.0.1:8000/ws".to_string(),
            },
            transport: TransportConfig::default(),
            session: SessionConfig::default(),
        }
    }
}
