//! Device identity derived from the ESP32 factory MAC address.
//!
//! Produces a stable, human-readable device ID in the form `BIRD-XXYYZZ`
//! (last 3 bytes of the 6-byte MAC in uppercase hex).  It is deterministic
//! across reboots and names the node's MQTT topics unless the stored
//! configuration overrides it.

use core::fmt::Write;

use crate::config::NodeConfig;

/// "BIRD-XXYYZZ" is 11 chars.
pub type DeviceIdString = heapless::String<16>;

/// Full 6-byte MAC address.
pub type MacAddress = [u8; 6];

/// Read the factory MAC address from eFuse.
#[cfg(target_os = "espidf")]
pub fn read_mac() -> MacAddress {
    let mut mac: MacAddress = [0u8; 6];
    unsafe {
        esp_idf_sys::esp_efuse_mac_get_default(mac.as_mut_ptr());
    }
    mac
}

/// Simulation: returns a deterministic fake MAC.
#[cfg(not(target_os = "espidf"))]
pub fn read_mac() -> MacAddress {
    [0xDE, 0xAD, 0xBE, 0xEF, 0xCA, 0xFE]
}

/// Format: `BIRD-XXYYZZ` (e.g., `BIRD-EFCAFE`).
pub fn device_id(mac: &MacAddress) -> DeviceIdString {
    let mut id = DeviceIdString::new();
    let _ = write!(id, "BIRD-{:02X}{:02X}{:02X}", mac[3], mac[4], mac[5]);
    id
}

/// The configured id if set, otherwise the MAC-derived one.
pub fn resolve(config: &NodeConfig, mac: &MacAddress) -> String {
    if config.device_id.is_empty() {
        String::from(device_id(mac).as_str())
    } else {
        config.device_id.clone()
    }
}
