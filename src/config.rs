//! Node configuration parameters
//!
//! Everything the firmware needs at boot: broker address and credentials,
//! identity, WiFi credentials and timing knobs.  Loaded from NVS through
//! [`ConfigPort`](crate::app::ports::ConfigPort); defaults apply on first boot.

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::app::ports::{ConfigError, ConfigPort};

/// Core node configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    // --- Network ---
    pub wifi_ssid: String,
    pub wifi_password: String,

    // --- MQTT broker ---
    pub broker_host: String,
    pub broker_port: u16,
    pub broker_username: String,
    pub broker_password: String,

    // --- Identity ---
    /// Overrides the MAC-derived device id when non-empty.
    pub device_id: String,
    /// Reported in the registration message.
    pub firmware_version: String,

    // --- Detection ---
    /// Silence after the last beam pulse that closes a cluster (ms).
    pub cluster_gap_ms: u32,
    /// Beam sampling period (ms).  Must be shorter than the narrowest pulse.
    pub sensor_poll_interval_ms: u32,

    // --- Session timing ---
    /// Minimum spacing between reconnect attempts (ms).
    pub reconnect_interval_ms: u32,
    /// Heartbeat period on `/status` (ms).
    pub status_interval_ms: u32,
    /// Link report period on `/data` (ms).
    pub link_report_interval_ms: u32,

    // --- OTA ---
    /// Read buffer size for the firmware download (bytes).
    pub ota_chunk_size: u16,
    /// Cooperative pause between chunks (ms).
    pub ota_yield_ms: u32,
    /// Pause between the completion report and the restart (ms).
    pub ota_settle_ms: u32,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            // Empty unless baked in at build time; the node then runs offline.
            wifi_ssid: String::from(option_env!("PRULETY_WIFI_SSID").unwrap_or("")),
            wifi_password: String::from(option_env!("PRULETY_WIFI_PASSWORD").unwrap_or("")),

            broker_host: String::from("mqtt.local"),
            broker_port: 1883,
            broker_username: String::new(),
            broker_password: String::new(),

            device_id: String::new(),
            firmware_version: String::from(env!("CARGO_PKG_VERSION")),

            cluster_gap_ms: 300,
            sensor_poll_interval_ms: 5,

            reconnect_interval_ms: 5_000,
            status_interval_ms: 30_000,
            link_report_interval_ms: 60_000,

            ota_chunk_size: 1024,
            ota_yield_ms: 1,
            ota_settle_ms: 1_000,
        }
    }
}

impl NodeConfig {
    /// Range-check every field.  Invalid values are rejected, never clamped.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker_host.is_empty() || self.broker_host.len() > 64 {
            return Err(ConfigError::ValidationFailed("broker_host must be 1-64 bytes"));
        }
        if self.broker_port == 0 {
            return Err(ConfigError::ValidationFailed("broker_port must be non-zero"));
        }
        if self.device_id.len() > 48 {
            return Err(ConfigError::ValidationFailed("device_id must be at most 48 bytes"));
        }
        if !self.device_id.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_') {
            return Err(ConfigError::ValidationFailed("device_id must be [A-Za-z0-9_-]"));
        }
        if self.firmware_version.is_empty() || self.firmware_version.len() > 31 {
            return Err(ConfigError::ValidationFailed("firmware_version must be 1-31 bytes"));
        }
        if self.cluster_gap_ms == 0 {
            return Err(ConfigError::ValidationFailed("cluster_gap_ms must be non-zero"));
        }
        if self.sensor_poll_interval_ms == 0 || self.sensor_poll_interval_ms >= self.cluster_gap_ms {
            return Err(ConfigError::ValidationFailed(
                "sensor_poll_interval_ms must be non-zero and below cluster_gap_ms",
            ));
        }
        if self.reconnect_interval_ms < 1_000 {
            return Err(ConfigError::ValidationFailed("reconnect_interval_ms must be >= 1000"));
        }
        if self.status_interval_ms < 1_000 {
            return Err(ConfigError::ValidationFailed("status_interval_ms must be >= 1000"));
        }
        if self.ota_chunk_size < 256 || self.ota_chunk_size > 4096 {
            return Err(ConfigError::ValidationFailed("ota_chunk_size must be 256-4096"));
        }
        Ok(())
    }

    /// Load from `port`, falling back to defaults when the stored blob is
    /// missing, unreadable or out of range.
    pub fn load_or_default(port: &impl ConfigPort) -> Self {
        match port.load().and_then(|cfg| cfg.validate().map(|()| cfg)) {
            Ok(cfg) => cfg,
            Err(ConfigError::NotFound) => {
                info!("Config: none stored, using defaults");
                Self::default()
            }
            Err(e) => {
                warn!("Config: {}, using defaults", e);
                Self::default()
            }
        }
    }
}
