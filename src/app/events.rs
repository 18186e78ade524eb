//! Outbound telemetry payloads.
//!
//! The [`SessionManager`](super::session::SessionManager) serialises these
//! to JSON and publishes them on their fixed topics.  Field names are part
//! of the wire contract with the backend.

use serde::Serialize;

use super::ports::LinkStatus;

/// `<root>/<id>/register`: sent after every successful connect.
#[derive(Debug, Clone, Serialize)]
pub struct Registration<'a> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub device_id: &'a str,
    pub firmware: &'a str,
}

impl<'a> Registration<'a> {
    pub fn new(device_id: &'a str, firmware: &'a str) -> Self {
        Self {
            kind: "register",
            device_id,
            firmware,
        }
    }
}

/// `<root>/<id>/data`: physical link report.
#[derive(Debug, Clone, Serialize)]
pub struct LinkReport<'a> {
    pub payload: LinkPayload<'a>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LinkPayload<'a> {
    pub ssid: &'a str,
    pub bssid: &'a str,
    pub rssi: i8,
    pub ip: &'a str,
    pub timestamp: u64,
}

impl<'a> LinkReport<'a> {
    pub fn new(status: &'a LinkStatus, timestamp: u64) -> Self {
        Self {
            payload: LinkPayload {
                ssid: status.ssid.as_str(),
                bssid: status.bssid.as_str(),
                rssi: status.rssi,
                ip: status.ip.as_str(),
                timestamp,
            },
        }
    }
}

/// `<root>/<id>/bird_detection`: one per detected passage.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Detection {
    pub payload: DetectionPayload,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct DetectionPayload {
    pub timestamp: u64,
}

impl Detection {
    pub fn new(timestamp: u64) -> Self {
        Self {
            payload: DetectionPayload { timestamp },
        }
    }
}

/// `<root>/<id>/ota_progress`
#[derive(Debug, Clone, Serialize)]
pub struct Progress<'a> {
    pub progress: u8,
    pub message: &'a str,
}

/// `<root>/<id>/status`: heartbeat.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Heartbeat {
    pub status: &'static str,
    /// Milliseconds since boot.
    pub uptime: u64,
}

impl Heartbeat {
    pub fn online(uptime: u64) -> Self {
        Self {
            status: "online",
            uptime,
        }
    }
}
