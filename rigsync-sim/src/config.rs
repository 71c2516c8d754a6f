use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address for the HTTP/WebSocket server to listen on
    pub addr: SocketAddr,
}

/// State the simulated device powers up with.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub motor_speed: i64,
    pub valve_open: bool,
    pub temperature: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Seconds between temperature samples
    pub interval_secs: u64,
    /// Lower bound of sampled temperatures, in degrees Celsius
    pub min_temp: f64,
    /// Upper bound (exclusive) of sampled temperatures
    pub max_temp: f64,
    /// Noise added to the temperature whenever a client update is applied
    pub jitter: f64,
}

impl TelemetryConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

impl Config {
    pub fn load(path: &Path) -> color_eyre::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            motor_speed: 0,
            valve_open: false,
            temperature: 25.0,
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            min_temp: 20.0,
            max_temp: 30.0,
            jitter: 0.1,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                addr: SocketAddr::from(([127, 0, 0, 1], 8000)),
            },
            device: DeviceConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}
