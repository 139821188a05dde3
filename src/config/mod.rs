//! # Configuration
//!
//! TOML configuration for the `tuyalink` daemon. Every section and field has a
//! default, so a partial file (or no `[time]` section at all) is valid.
//!
//! ```toml
//! [serial]
//! port = "/dev/ttyUSB0"
//! baud_rate = 9600
//!
//! [protocol]
//! variant = "normal"          # or "low_power"
//! min_send_gap_ms = 10
//! rx_timeout_ms = 300
//! rx_idle_timeout_ms = 300     # partial frame dropped after this much silence
//! signed_integers = false
//! ignore_mcu_update_on_datapoints = [101]
//!
//! [network]
//! local_connected = true
//! cloud_connected = false
//!
//! [time]
//! enabled = true
//! sync_interval_secs = 3600
//!
//! [logging]
//! level = "info"
//! file = "tuyalink.log"
//! ```
//!
//! [`Config::link_tuning`] turns the `[protocol]` section into the engine's
//! [`LinkTuning`].

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::fs;

use crate::link::LinkOptions;
use crate::tuya::frame::DEFAULT_IDLE_TIMEOUT;
use crate::tuya::queue::QueueTuning;
use crate::tuya::{LinkTuning, ProtocolVariant};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub port: String,
    /// Tuya MCUs talk at 9600 8N1; some newer modules use 115200
    pub baud_rate: u32,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    pub variant: ProtocolVariant,
    pub min_send_gap_ms: u64,
    pub rx_timeout_ms: u64,
    pub rx_idle_timeout_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub wifi_status_interval_ms: u64,
    pub init_dump_delay_ms: u64,
    pub signed_integers: bool,
    pub ignore_mcu_update_on_datapoints: Vec<u8>,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            variant: ProtocolVariant::Standard,
            min_send_gap_ms: 10,
            rx_timeout_ms: 300,
            rx_idle_timeout_ms: DEFAULT_IDLE_TIMEOUT.as_millis() as u64,
            heartbeat_interval_ms: 15_000,
            wifi_status_interval_ms: 1_000,
            init_dump_delay_ms: 1_000,
            signed_integers: false,
            ignore_mcu_update_on_datapoints: Vec::new(),
        }
    }
}

/// Static answer for the connectivity oracle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub local_connected: bool,
    pub cloud_connected: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            local_connected: true,
            cloud_connected: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeConfig {
    /// Answer time queries from the host clock
    pub enabled: bool,
    /// Resend the time this often once the MCU asked for it (0 disables)
    pub sync_interval_secs: u64,
}

impl Default for TimeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sync_interval_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub serial: SerialConfig,
    pub protocol: ProtocolConfig,
    pub network: NetworkConfig,
    pub time: TimeConfig,
    pub logging: LoggingConfig,
}

impl Config {
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        Ok(config)
    }

    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    pub fn link_tuning(&self) -> LinkTuning {
        let p = &self.protocol;
        LinkTuning {
            variant: p.variant,
            queue: QueueTuning {
                min_send_gap: Duration::from_millis(p.min_send_gap_ms),
                rx_timeout: Duration::from_millis(p.rx_timeout_ms),
            },
            rx_idle_timeout: Duration::from_millis(p.rx_idle_timeout_ms),
            heartbeat_interval: Duration::from_millis(p.heartbeat_interval_ms),
            wifi_status_interval: Duration::from_millis(p.wifi_status_interval_ms),
            init_dump_delay: Duration::from_millis(p.init_dump_delay_ms),
            signed_integers: p.signed_integers,
            ignore_mcu_update_on_datapoints: p.ignore_mcu_update_on_datapoints.clone(),
        }
    }

    pub fn link_options(&self) -> LinkOptions {
        let sync = (self.time.enabled && self.time.sync_interval_secs > 0)
            .then(|| Duration::from_secs(self.time.sync_interval_secs));
        LinkOptions {
            time_sync_interval: sync,
            ..LinkOptions::default()
        }
    }
}
