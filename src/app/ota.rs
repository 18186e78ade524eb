//! Remote firmware update pipeline.
//!
//! Flow: `ota_update{url}` → HTTP GET → open OTA partition → stream chunks
//! → verify → commit → restart.
//!
//! ```text
//!  Idle ──▶ Fetching ──▶ Writing ──▶ Verifying ──▶ Committing ──▶ Succeeded
//!              │            │            │
//!              └────────────┴────────────┴──▶ Failed ──▶ Idle
//! ```
//!
//! The pipeline is an explicit state machine: [`UpdatePipeline::begin`]
//! performs the request and opens the partition, [`UpdatePipeline::step`]
//! moves one chunk (or verifies and commits).  [`UpdatePipeline::start`] is
//! the synchronous driver used by the control loop; it pauses between
//! chunks so the network stack keeps running.  The control loop is
//! monopolised until the update reaches a terminal phase.
//!
//! Progress is reported in multiples of 5 % only, to bound the number of
//! MQTT messages on slow links.  Streaming reports stop at 90 %; 95 and
//! 100 are reserved for verification and completion so the reported
//! sequence never goes backwards until a failure resets it to 0.

use core::fmt;

use embedded_hal::delay::DelayNs;
use log::{debug, info, warn};

use crate::config::NodeConfig;

use super::ports::{FetchError, FirmwareSource, FirmwareWriter, FlashError, ProgressSink, RestartPort};

/// Largest read buffer the pipeline will use.
pub const MAX_CHUNK_SIZE: usize = 4096;

const PROGRESS_STEP: i32 = 5;
const STREAM_PROGRESS_CAP: i32 = 90;

const MSG_STARTING: &str = "Starting OTA update...";
const MSG_DOWNLOAD_START: &str = "Downloading firmware...";
const MSG_DOWNLOADING: &str = "Downloading...";
const MSG_VERIFYING: &str = "Verifying firmware...";
const MSG_COMPLETE: &str = "Update complete! Rebooting...";

// ── Error types ───────────────────────────────────────────────

/// Synchronous refusal of an update request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejected {
    AlreadyInProgress,
}

impl fmt::Display for Rejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyInProgress => write!(f, "OTA update already in progress"),
        }
    }
}

/// Why an accepted update attempt ended in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateError {
    /// Request could not be sent or the response head not read.
    Fetch(FetchError),
    /// Server answered with a non-200 status.
    HttpStatus(u16),
    /// Missing or zero `Content-Length`.
    InvalidLength,
    /// The OTA partition could not be opened for the declared size.
    StorageOpen(FlashError),
    WriteFailed(FlashError),
    /// Stream ended before the declared length was received.
    Incomplete { written: u64, expected: u64 },
    VerifyFailed(FlashError),
}

impl UpdateError {
    /// Text sent to `/ota_progress` alongside the 0 % failure report.
    pub fn progress_message(&self) -> &'static str {
        match self {
            Self::Fetch(_) | Self::HttpStatus(_) => "Failed to download firmware",
            Self::InvalidLength => "Invalid firmware size",
            Self::StorageOpen(_) => "Not enough space",
            Self::WriteFailed(_) => "Flash write failed",
            Self::Incomplete { .. } => "Download incomplete",
            Self::VerifyFailed(_) => "Update failed",
        }
    }
}

impl fmt::Display for UpdateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fetch(e) => write!(f, "fetch failed: {}", e),
            Self::HttpStatus(code) => write!(f, "HTTP GET failed with status {}", code),
            Self::InvalidLength => write!(f, "invalid content length"),
            Self::StorageOpen(e) => write!(f, "cannot open update partition: {}", e),
            Self::WriteFailed(e) => write!(f, "write failed: {}", e),
            Self::Incomplete { written, expected } => {
                write!(f, "download incomplete: {}/{} bytes", written, expected)
            }
            Self::VerifyFailed(e) => write!(f, "finalize failed: {}", e),
        }
    }
}

// ── State ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePhase {
    Idle,
    Fetching,
    Writing,
    Verifying,
    Committing,
    Failed,
    Succeeded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateState {
    pub phase: UpdatePhase,
    pub bytes_expected: u64,
    /// Never exceeds `bytes_expected`.
    pub bytes_written: u64,
    pub last_reported_percent: i32,
}

impl UpdateState {
    const fn idle() -> Self {
        Self {
            phase: UpdatePhase::Idle,
            bytes_expected: 0,
            bytes_written: 0,
            last_reported_percent: 0,
        }
    }
}

/// Pipeline knobs, usually taken from [`NodeConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateTiming {
    pub chunk_size: usize,
    pub yield_ms: u32,
    pub settle_ms: u32,
}

impl UpdateTiming {
    pub fn from_config(config: &NodeConfig) -> Self {
        Self {
            chunk_size: config.ota_chunk_size as usize,
            yield_ms: config.ota_yield_ms,
            settle_ms: config.ota_settle_ms,
        }
    }
}

impl Default for UpdateTiming {
    fn default() -> Self {
        Self {
            chunk_size: 1024,
            yield_ms: 1,
            settle_ms: 1_000,
        }
    }
}

// ── Updater seam ──────────────────────────────────────────────

/// What the session layer needs from an update engine.
pub trait FirmwareUpdater {
    /// Start an update from `url`, reporting through `progress`.
    ///
    /// Returns once the attempt is terminal.  `Err` means the request was
    /// refused without touching any state.
    fn start(&mut self, url: &str, progress: &mut impl ProgressSink) -> Result<(), Rejected>;

    fn state(&self) -> &UpdateState;
}

// ── Pipeline ──────────────────────────────────────────────────

/// Single-slot update engine.  Exactly one instance exists per device and
/// it exclusively owns the HTTP source and the partition writer.
pub struct UpdatePipeline<F, W, D, R> {
    source: F,
    writer: W,
    delay: D,
    restart: R,
    timing: UpdateTiming,
    state: UpdateState,
    last_failure: Option<UpdateError>,
    buf: [u8; MAX_CHUNK_SIZE],
}

impl<F, W, D, R> UpdatePipeline<F, W, D, R>
where
    F: FirmwareSource,
    W: FirmwareWriter,
    D: DelayNs,
    R: RestartPort,
{
    pub fn new(source: F, writer: W, delay: D, restart: R, timing: UpdateTiming) -> Self {
        Self {
            source,
            writer,
            delay,
            restart,
            timing: UpdateTiming {
                chunk_size: timing.chunk_size.clamp(1, MAX_CHUNK_SIZE),
                ..timing
            },
            state: UpdateState::idle(),
            last_failure: None,
            buf: [0u8; MAX_CHUNK_SIZE],
        }
    }

    /// Outcome of the most recent failed attempt, cleared by the next `begin`.
    pub fn last_failure(&self) -> Option<UpdateError> {
        self.last_failure
    }

    pub fn source(&self) -> &F {
        &self.source
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }

    pub fn restart_port(&self) -> &R {
        &self.restart
    }

    /// Accept a request, fetch the response head and open the partition.
    ///
    /// On success the pipeline is either `Writing` or already back to
    /// `Idle` after a reported failure.
    pub fn begin(&mut self, url: &str, progress: &mut impl ProgressSink) -> Result<(), Rejected> {
        if self.state.phase != UpdatePhase::Idle {
            warn!("OTA: update already in progress ({:?})", self.state.phase);
            return Err(Rejected::AlreadyInProgress);
        }

        self.last_failure = None;
        self.state = UpdateState {
            phase: UpdatePhase::Fetching,
            ..UpdateState::idle()
        };
        info!("OTA: starting update from {}", url);
        self.report(progress, 0, MSG_STARTING);

        let expected = match self.fetch_head(url) {
            Ok(n) => n,
            Err(e) => {
                self.fail(e, progress);
                return Ok(());
            }
        };
        self.state.bytes_expected = expected;
        info!("OTA: firmware size {} bytes", expected);

        if let Err(e) = self.writer.open(expected) {
            self.fail(UpdateError::StorageOpen(e), progress);
            return Ok(());
        }

        self.state.phase = UpdatePhase::Writing;
        self.report(progress, PROGRESS_STEP as u8, MSG_DOWNLOAD_START);
        Ok(())
    }

    /// Advance by one unit of work and return the resulting phase.
    ///
    /// `Writing`: move one chunk.  `Verifying`: finalize and, on success,
    /// commit and restart.  Any other phase is left untouched.
    pub fn step(&mut self, progress: &mut impl ProgressSink) -> UpdatePhase {
        match self.state.phase {
            UpdatePhase::Writing => self.write_chunk(progress),
            UpdatePhase::Verifying => self.verify_and_commit(progress),
            _ => {}
        }
        self.state.phase
    }

    fn fetch_head(&mut self, url: &str) -> Result<u64, UpdateError> {
        let head = self.source.open(url).map_err(UpdateError::Fetch)?;
        if head.status != 200 {
            return Err(UpdateError::HttpStatus(head.status));
        }
        match head.content_length {
            Some(len) if len > 0 => Ok(len),
            _ => Err(UpdateError::InvalidLength),
        }
    }

    fn write_chunk(&mut self, progress: &mut impl ProgressSink) {
        let expected = self.state.bytes_expected;
        let remaining = expected - self.state.bytes_written;
        if remaining == 0 {
            self.enter_verifying(progress);
            return;
        }

        let want = remaining.min(self.timing.chunk_size as u64) as usize;
        let read = match self.source.read(&mut self.buf[..want]) {
            Ok(0) => {
                info!("OTA: stream closed by server");
                0
            }
            Ok(n) => n.min(want),
            Err(e) => {
                warn!("OTA: stream dropped: {}", e);
                0
            }
        };
        if read == 0 {
            let err = UpdateError::Incomplete {
                written: self.state.bytes_written,
                expected,
            };
            self.fail(err, progress);
            return;
        }

        if let Err(e) = self.writer.write(&self.buf[..read]) {
            self.fail(UpdateError::WriteFailed(e), progress);
            return;
        }
        self.state.bytes_written += read as u64;

        let percent = (self.state.bytes_written * 100 / expected) as i32;
        let quantized = (percent / PROGRESS_STEP * PROGRESS_STEP).min(STREAM_PROGRESS_CAP);
        if quantized > self.state.last_reported_percent {
            debug!("OTA: progress {}%", quantized);
            self.report(progress, quantized as u8, MSG_DOWNLOADING);
        }

        if self.state.bytes_written == expected {
            self.enter_verifying(progress);
        }
    }

    fn enter_verifying(&mut self, progress: &mut impl ProgressSink) {
        self.source.close();
        self.state.phase = UpdatePhase::Verifying;
        self.report(progress, 95, MSG_VERIFYING);
    }

    fn verify_and_commit(&mut self, progress: &mut impl ProgressSink) {
        if let Err(e) = self.writer.finalize() {
            self.fail(UpdateError::VerifyFailed(e), progress);
            return;
        }

        self.state.phase = UpdatePhase::Committing;
        info!("OTA: update success, rebooting");
        self.report(progress, 100, MSG_COMPLETE);
        self.delay.delay_ms(self.timing.settle_ms);

        self.state.phase = UpdatePhase::Succeeded;
        self.restart.restart();
    }

    /// Release both resources, report the reason and return to `Idle`.
    fn fail(&mut self, err: UpdateError, progress: &mut impl ProgressSink) {
        warn!(
            "OTA: {} ({}/{} bytes)",
            err, self.state.bytes_written, self.state.bytes_expected
        );
        self.writer.abort();
        self.source.close();
        self.state.phase = UpdatePhase::Failed;
        self.report(progress, 0, err.progress_message());
        self.last_failure = Some(err);
        self.state.phase = UpdatePhase::Idle;
    }

    fn report(&mut self, progress: &mut impl ProgressSink, percent: u8, message: &str) {
        self.state.last_reported_percent = percent as i32;
        progress.report(percent, message);
    }
}

impl<F, W, D, R> FirmwareUpdater for UpdatePipeline<F, W, D, R>
where
    F: FirmwareSource,
    W: FirmwareWriter,
    D: DelayNs,
    R: RestartPort,
{
    fn start(&mut self, url: &str, progress: &mut impl ProgressSink) -> Result<(), Rejected> {
        self.begin(url, progress)?;
        while matches!(self.state.phase, UpdatePhase::Writing | UpdatePhase::Verifying) {
            if self.step(progress) == UpdatePhase::Writing {
                self.delay.delay_ms(self.timing.yield_ms);
            }
        }
        Ok(())
    }

    fn state(&self) -> &UpdateState {
        &self.state
    }
}

// ── Tests ─────────────────────────────────────────────────────
