//! Port traits: the hexagonal boundary between domain logic and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ SessionManager / UpdatePipeline (domain)
//! ```
//!
//! Driven adapters (MQTT client, HTTP client, OTA partition writer, WiFi,
//! NVS) implement these traits.  The domain consumes them via generics, so
//! the core never touches ESP-IDF directly and every path is testable with
//! in-memory mocks.
//!
//! All port errors are small `Copy` enums: callers must handle every
//! variant explicitly.

use core::fmt;

use crate::config::NodeConfig;

// ───────────────────────────────────────────────────────────────
// Session port (driven adapter: domain ↔ MQTT broker)
// ───────────────────────────────────────────────────────────────

/// Maximum topic length accepted from the broker.
pub const MAX_TOPIC_LEN: usize = 128;

/// Maximum inbound payload size; larger messages are dropped by the adapter.
pub const MAX_INBOUND_PAYLOAD: usize = 512;

/// One message delivered by the broker on a subscribed topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    pub topic: heapless::String<MAX_TOPIC_LEN>,
    pub payload: heapless::Vec<u8, MAX_INBOUND_PAYLOAD>,
}

impl InboundFrame {
    /// Build a frame, returning `None` if either part exceeds capacity.
    pub fn new(topic: &str, payload: &[u8]) -> Option<Self> {
        let mut t = heapless::String::new();
        t.push_str(topic).ok()?;
        let p = heapless::Vec::from_slice(payload).ok()?;
        Some(Self { topic: t, payload: p })
    }
}

/// Publish/subscribe session primitive.
///
/// Reliable within a session; the domain owns retry policy.  `connect` is
/// synchronous from the caller's point of view.
pub trait SessionPort {
    /// Attempt to open a session with the given client id.
    fn connect(&mut self, client_id: &str) -> Result<(), SessionError>;

    /// Query the transport for the live connection state.
    fn is_connected(&self) -> bool;

    fn subscribe(&mut self, topic: &str) -> Result<(), SessionError>;

    /// Fire-and-forget publish.
    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), SessionError>;

    /// Pop the next queued inbound message, if any.
    fn next_inbound(&mut self) -> Option<InboundFrame>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    /// Broker refused or could not be reached. Carries the client return code
    /// where the transport provides one.
    ConnectFailed(i32),
    NotConnected,
    SubscribeFailed,
    PublishFailed,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectFailed(rc) => write!(f, "connect failed (rc={})", rc),
            Self::NotConnected => write!(f, "not connected"),
            Self::SubscribeFailed => write!(f, "subscribe failed"),
            Self::PublishFailed => write!(f, "publish failed"),
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Firmware source (driven adapter: domain → HTTP server)
// ───────────────────────────────────────────────────────────────

/// Response head returned by [`FirmwareSource::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    /// `None` when the server did not declare a length.
    pub content_length: Option<u64>,
}

/// Streaming HTTP GET.  One request open at a time.
pub trait FirmwareSource {
    /// Issue the request and read the response head.
    fn open(&mut self, url: &str) -> Result<FetchResponse, FetchError>;

    /// Read body bytes.  `Ok(0)` means end of stream; an error means the
    /// connection dropped.  Blocks until data, EOF, or transport timeout.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, FetchError>;

    /// Release the connection.  Idempotent.
    fn close(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchError {
    /// Could not establish the connection or send the request.
    Connect,
    /// The connection failed mid-body.
    Read,
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect => write!(f, "HTTP connect failed"),
            Self::Read => write!(f, "HTTP read failed"),
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Firmware writer (driven adapter: domain → OTA flash partition)
// ───────────────────────────────────────────────────────────────

/// Sequential writer over the inactive firmware slot.
///
/// Exactly one write region can be open.  Every `open` must be followed by
/// either `finalize` or `abort`.
pub trait FirmwareWriter {
    /// Open a write region of `size` bytes.
    fn open(&mut self, size: u64) -> Result<(), FlashError>;

    fn write(&mut self, data: &[u8]) -> Result<(), FlashError>;

    /// Verify the image and make it the boot image.  Closes the region.
    fn finalize(&mut self) -> Result<(), FlashError>;

    /// Discard the region.  Idempotent.
    fn abort(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashError {
    /// Image does not fit in the update partition.
    InsufficientSpace,
    /// No region is open.
    NotOpen,
    WriteFailed,
    /// Image failed validation or could not be marked bootable.
    VerifyFailed,
}

impl fmt::Display for FlashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientSpace => write!(f, "not enough space in update partition"),
            Self::NotOpen => write!(f, "no write region open"),
            Self::WriteFailed => write!(f, "flash write failed"),
            Self::VerifyFailed => write!(f, "image verification failed"),
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Restart port
// ───────────────────────────────────────────────────────────────

/// Restart into the freshly committed image.
///
/// On hardware this never returns.  Host implementations return so that
/// tests can observe the call.
pub trait RestartPort {
    fn restart(&mut self);
}

// ───────────────────────────────────────────────────────────────
// Progress sink (domain → telemetry)
// ───────────────────────────────────────────────────────────────

/// Receives human-readable update progress.  The session layer routes
/// these to `/ota_progress`; the pipeline has no transport access itself.
pub trait ProgressSink {
    fn report(&mut self, percent: u8, message: &str);
}

// ───────────────────────────────────────────────────────────────
// Link status port (driven adapter: WiFi → domain)
// ───────────────────────────────────────────────────────────────

/// Snapshot of the physical link, published on `/data`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LinkStatus {
    pub ssid: heapless::String<32>,
    /// `AA:BB:CC:DD:EE:FF`
    pub bssid: heapless::String<17>,
    pub rssi: i8,
    /// Dotted IPv4.
    pub ip: heapless::String<15>,
}

pub trait LinkStatusPort {
    fn is_online(&self) -> bool;

    /// `None` while offline.
    fn status(&self) -> Option<LinkStatus>;
}

// ───────────────────────────────────────────────────────────────
// Configuration port (driven adapter: domain ↔ persistent config)
// ───────────────────────────────────────────────────────────────

/// Loads and persists node configuration.
///
/// Implementations MUST validate before persisting and reject invalid
/// values rather than clamping them.
pub trait ConfigPort {
    /// Returns [`ConfigError::NotFound`] on first boot.
    fn load(&self) -> Result<NodeConfig, ConfigError>;

    fn save(&self, config: &NodeConfig) -> Result<(), ConfigError>;
}

/// Errors from [`ConfigPort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// No config found in storage (first boot).
    NotFound,
    /// Stored config failed deserialization.
    Corrupted,
    /// A field failed range validation.
    ValidationFailed(&'static str),
    /// Generic I/O error from the storage backend.
    IoError,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "config not found"),
            Self::Corrupted => write!(f, "config corrupted"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}
