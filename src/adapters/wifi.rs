//! WiFi station-mode adapter.
//!
//! Implements [`LinkStatusPort`]: tells the control loop whether the node
//! is online and produces the `/data` link report (SSID, BSSID, RSSI, IP).
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: real ESP-IDF WiFi driver calls via `esp_idf_svc::wifi`.
//! - **all other targets**: simulation stubs for host-side tests.
//!
//! ## Reconnection policy
//!
//! Association never blocks the control loop.  [`WifiAdapter::connect`]
//! only asks the driver to associate; [`WifiAdapter::poll`] notices when
//! the link and DHCP lease are up, or gives the attempt up after
//! [`CONNECT_TIMEOUT_MS`].  Failed attempts wait an exponential backoff
//! (2 s → 4 s → 8 s … capped at 60 s) before the next one.
//!
//! A node without credentials stays `Disconnected` and never retries.

use core::fmt;
#[cfg(target_os = "espidf")]
use core::fmt::Write as _;

use log::{error, info, warn};

use crate::app::ports::{LinkStatus, LinkStatusPort};

#[cfg(target_os = "espidf")]
use esp_idf_svc::eventloop::EspSystemEventLoop;
#[cfg(target_os = "espidf")]
use esp_idf_svc::hal::modem::Modem;
#[cfg(target_os = "espidf")]
use esp_idf_svc::wifi::{AuthMethod, ClientConfiguration, Configuration, EspWifi};

// ───────────────────────────────────────────────────────────────
// Errors
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityError {
    NoCredentials,
    InvalidSsid,
    InvalidPassword,
    /// Driver bring-up failed (ESP-IDF error code).
    DriverInit(i32),
    ConnectionFailed,
}

impl fmt::Display for ConnectivityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoCredentials => write!(f, "no WiFi credentials configured"),
            Self::InvalidSsid => write!(f, "SSID invalid (must be 1-32 printable ASCII bytes)"),
            Self::InvalidPassword => write!(f, "password invalid (must be 8-64 bytes for WPA2, or empty for open)"),
            Self::DriverInit(rc) => write!(f, "WiFi driver init failed (rc={})", rc),
            Self::ConnectionFailed => write!(f, "WiFi connection failed"),
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Connection state
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiState {
    Disconnected,
    /// Association requested; waiting for link and IP.
    Connecting { attempt: u32, deadline_ms: u64 },
    Connected,
    Reconnecting { attempt: u32, next_attempt_ms: u64 },
}

const INITIAL_BACKOFF_MS: u64 = 2_000;
const MAX_BACKOFF_MS: u64 = 60_000;

/// How long one association attempt may take before it is abandoned.
pub const CONNECT_TIMEOUT_MS: u64 = 15_000;

// ───────────────────────────────────────────────────────────────
// Validation
// ───────────────────────────────────────────────────────────────

fn is_printable_ascii(s: &str) -> bool {
    s.bytes().all(|b| (0x20..=0x7E).contains(&b))
}

fn validate_ssid(ssid: &str) -> Result<(), ConnectivityError> {
    if ssid.is_empty() {
        return Err(ConnectivityError::NoCredentials);
    }
    if ssid.len() > 32 || !is_printable_ascii(ssid) {
        return Err(ConnectivityError::InvalidSsid);
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<(), ConnectivityError> {
    if password.is_empty() {
        return Ok(());
    }
    if password.len() < 8 || password.len() > 64 {
        return Err(ConnectivityError::InvalidPassword);
    }
    Ok(())
}

struct Credentials {
    ssid: heapless::String<32>,
    password: heapless::String<64>,
}

impl Credentials {
    fn parse(ssid: &str, password: &str) -> Result<Self, ConnectivityError> {
        validate_ssid(ssid)?;
        validate_password(password)?;
        let mut s = heapless::String::new();
        s.push_str(ssid).map_err(|_| ConnectivityError::InvalidSsid)?;
        let mut p = heapless::String::new();
        p.push_str(password).map_err(|_| ConnectivityError::InvalidPassword)?;
        Ok(Self { ssid: s, password: p })
    }
}

// ───────────────────────────────────────────────────────────────
// WiFi adapter
// ───────────────────────────────────────────────────────────────

pub struct WifiAdapter {
    state: WifiState,
    /// Unusable credentials keep the node offline instead of failing boot.
    credentials: Result<Credentials, ConnectivityError>,
    backoff_ms: u64,
    #[cfg(target_os = "espidf")]
    wifi: EspWifi<'static>,
    /// Simulation: whether the fake AP is reachable.
    #[cfg(not(target_os = "espidf"))]
    sim_ap_up: bool,
    /// Simulation: an association is in flight.
    #[cfg(not(target_os = "espidf"))]
    sim_associating: bool,
}

impl WifiAdapter {
    /// Bring up the driver.  Only a driver failure is an error; missing or
    /// invalid credentials surface from [`connect`](Self::connect).
    #[cfg(target_os = "espidf")]
    pub fn new(
        modem: Modem,
        sys_loop: EspSystemEventLoop,
        ssid: &str,
        password: &str,
    ) -> Result<Self, ConnectivityError> {
        let credentials = Credentials::parse(ssid, password);
        let mut wifi = EspWifi::new(modem, sys_loop, None)
            .map_err(|e| ConnectivityError::DriverInit(e.code()))?;
        if let Ok(c) = &credentials {
            let auth_method = if c.password.is_empty() {
                AuthMethod::None
            } else {
                AuthMethod::WPAWPA2Personal
            };
            let client = ClientConfiguration {
                ssid: c.ssid.as_str().try_into().map_err(|_| ConnectivityError::InvalidSsid)?,
                password: c
                    .password
                    .as_str()
                    .try_into()
                    .map_err(|_| ConnectivityError::InvalidPassword)?,
                auth_method,
                ..Default::default()
            };
            wifi.set_configuration(&Configuration::Client(client))
                .map_err(|e| ConnectivityError::DriverInit(e.code()))?;
            wifi.start().map_err(|e| ConnectivityError::DriverInit(e.code()))?;
        }
        Ok(Self {
            state: WifiState::Disconnected,
            credentials,
            backoff_ms: INITIAL_BACKOFF_MS,
            wifi,
        })
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn new(ssid: &str, password: &str) -> Result<Self, ConnectivityError> {
        Ok(Self {
            state: WifiState::Disconnected,
            credentials: Credentials::parse(ssid, password),
            backoff_ms: INITIAL_BACKOFF_MS,
            sim_ap_up: true,
            sim_associating: false,
        })
    }

    pub fn state(&self) -> WifiState {
        self.state
    }

    /// Start associating and return at once.  Without usable credentials
    /// the adapter stays `Disconnected` and nothing is retried.
    pub fn connect(&mut self, now_ms: u64) -> Result<(), ConnectivityError> {
        let ssid = match &self.credentials {
            Ok(c) => c.ssid.clone(),
            Err(e) => {
                warn!("WiFi: {}, staying offline", e);
                return Err(*e);
            }
        };
        info!("WiFi: connecting to '{}'", ssid);
        self.begin_attempt(0, now_ms).map_err(|e| {
            error!("WiFi: connection failed: {}", e);
            e
        })
    }

    /// Advance the connection state machine.  Never blocks.
    pub fn poll(&mut self, now_ms: u64) {
        match self.state {
            WifiState::Connecting {
                attempt,
                deadline_ms,
            } => {
                if self.platform_is_connected() {
                    self.state = WifiState::Connected;
                    self.backoff_ms = INITIAL_BACKOFF_MS;
                    info!("WiFi: connected");
                } else if now_ms >= deadline_ms {
                    warn!("WiFi: no link after {} ms, giving up attempt", CONNECT_TIMEOUT_MS);
                    self.platform_abandon();
                    self.retry_later(attempt, now_ms);
                }
            }
            WifiState::Connected => {
                if !self.platform_is_connected() {
                    warn!("WiFi: connection lost, entering reconnect");
                    self.backoff_ms = INITIAL_BACKOFF_MS;
                    self.schedule_retry(0, now_ms);
                }
            }
            WifiState::Reconnecting {
                attempt,
                next_attempt_ms,
            } if now_ms >= next_attempt_ms => {
                info!("WiFi: reconnect attempt {} (backoff {} ms)", attempt + 1, self.backoff_ms);
                // A failed start is already rescheduled.
                let _ = self.begin_attempt(attempt, now_ms);
            }
            _ => {}
        }
    }

    fn begin_attempt(&mut self, attempt: u32, now_ms: u64) -> Result<(), ConnectivityError> {
        match self.platform_begin_connect() {
            Ok(()) => {
                self.state = WifiState::Connecting {
                    attempt,
                    deadline_ms: now_ms + CONNECT_TIMEOUT_MS,
                };
                Ok(())
            }
            Err(e) => {
                self.retry_later(attempt, now_ms);
                Err(e)
            }
        }
    }

    fn retry_later(&mut self, attempt: u32, now_ms: u64) {
        if attempt > 0 {
            self.backoff_ms = (self.backoff_ms * 2).min(MAX_BACKOFF_MS);
        }
        self.schedule_retry(attempt + 1, now_ms);
    }

    fn schedule_retry(&mut self, attempt: u32, now_ms: u64) {
        self.state = WifiState::Reconnecting {
            attempt,
            next_attempt_ms: now_ms + self.backoff_ms,
        };
    }

    // ── Platform-specific ─────────────────────────────────────

    #[cfg(target_os = "espidf")]
    fn platform_begin_connect(&mut self) -> Result<(), ConnectivityError> {
        self.wifi.connect().map_err(|e| {
            warn!("WiFi: associate request failed: {:?}", e);
            ConnectivityError::ConnectionFailed
        })
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_begin_connect(&mut self) -> Result<(), ConnectivityError> {
        self.sim_associating = true;
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn platform_abandon(&mut self) {
        if let Err(e) = self.wifi.disconnect() {
            warn!("WiFi: disconnect failed: {:?}", e);
        }
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_abandon(&mut self) {
        self.sim_associating = false;
    }

    /// Associated and the station interface holds an address.
    #[cfg(target_os = "espidf")]
    fn platform_is_connected(&self) -> bool {
        self.wifi.is_connected().unwrap_or(false) && self.wifi.is_up().unwrap_or(false)
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_is_connected(&self) -> bool {
        self.sim_associating && self.sim_ap_up
    }

    #[cfg(target_os = "espidf")]
    fn platform_status(&self) -> Option<LinkStatus> {
        let creds = self.credentials.as_ref().ok()?;
        let mut ap = esp_idf_svc::sys::wifi_ap_record_t::default();
        // SAFETY: only valid while associated, checked by the caller.
        if unsafe { esp_idf_svc::sys::esp_wifi_sta_get_ap_info(&mut ap) } != esp_idf_svc::sys::ESP_OK {
            return None;
        }
        let mut status = LinkStatus::default();
        let _ = status.ssid.push_str(&creds.ssid);
        let b = ap.bssid;
        let _ = write!(
            status.bssid,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        );
        status.rssi = ap.rssi;
        if let Ok(info) = self.wifi.sta_netif().get_ip_info() {
            let _ = write!(status.ip, "{}", info.ip);
        }
        Some(status)
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_status(&self) -> Option<LinkStatus> {
        let creds = self.credentials.as_ref().ok()?;
        let mut status = LinkStatus::default();
        let _ = status.ssid.push_str(&creds.ssid);
        let _ = status.bssid.push_str("DE:AD:BE:EF:CA:FE");
        status.rssi = -60;
        let _ = status.ip.push_str("192.168.4.2");
        Some(status)
    }

    /// Simulation: make the fake AP (un)reachable.
    #[cfg(not(target_os = "espidf"))]
    pub fn set_sim_ap(&mut self, up: bool) {
        self.sim_ap_up = up;
    }
}

// ───────────────────────────────────────────────────────────────
// LinkStatusPort
// ───────────────────────────────────────────────────────────────

impl LinkStatusPort for WifiAdapter {
    fn is_online(&self) -> bool {
        self.state == WifiState::Connected && self.platform_is_connected()
    }

    fn status(&self) -> Option<LinkStatus> {
        if !self.is_online() {
            return None;
        }
        self.platform_status()
    }
}

// ───────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────
