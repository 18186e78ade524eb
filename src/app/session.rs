//! MQTT session lifecycle: the hexagonal core of the node.
//!
//! [`SessionManager`] owns the session port and the firmware updater.  It
//! is the only path by which detections, link reports and update progress
//! reach the broker, and the only consumer of inbound frames.
//!
//! ```text
//!  ClusterDetector ──▶ ┌──────────────────┐ ──▶ SessionPort (publish)
//!                      │  SessionManager  │
//!  SessionPort ──────▶ │  reconnect · rx  │ ──▶ FirmwareUpdater
//!   (inbound queue)    └──────────────────┘
//! ```
//!
//! Telemetry is best-effort: every publish while disconnected is logged and
//! dropped, never queued or retried.

use log::{debug, info, warn};
use serde::Serialize;

use crate::config::NodeConfig;
use crate::detection::EventId;

use super::commands::{self, CommandMessage, InboundMessage, ResponseMessage};
use super::events::{Detection, Heartbeat, LinkReport, Progress, Registration};
use super::ota::FirmwareUpdater;
use super::ports::{LinkStatus, ProgressSink, SessionError, SessionPort};
use super::topics::TopicSet;

/// Prefix of the MQTT client id; the device id is appended.
pub const CLIENT_ID_PREFIX: &str = "ESP32_";

/// Who this node claims to be on the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub device_id: String,
    pub firmware_version: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTiming {
    pub reconnect_interval_ms: u64,
    pub status_interval_ms: u64,
}

impl SessionTiming {
    pub fn from_config(config: &NodeConfig) -> Self {
        Self {
            reconnect_interval_ms: u64::from(config.reconnect_interval_ms),
            status_interval_ms: u64::from(config.status_interval_ms),
        }
    }
}

impl Default for SessionTiming {
    fn default() -> Self {
        Self {
            reconnect_interval_ms: 5_000,
            status_interval_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionState {
    pub connected: bool,
    /// Zero after a successful connect.
    pub last_reconnect_attempt_ms: u64,
    pub last_status_emit_ms: u64,
}

pub struct SessionManager<S, U> {
    session: S,
    updater: U,
    identity: DeviceIdentity,
    topics: TopicSet,
    client_id: String,
    timing: SessionTiming,
    state: SessionState,
}

impl<S: SessionPort, U: FirmwareUpdater> SessionManager<S, U> {
    /// Derive the topic set.  Does **not** connect: call
    /// [`initialize`](Self::initialize) next.
    pub fn new(session: S, updater: U, identity: DeviceIdentity, timing: SessionTiming) -> Self {
        let topics = TopicSet::new(&identity.device_id);
        let client_id = format!("{}{}", CLIENT_ID_PREFIX, identity.device_id);
        Self {
            session,
            updater,
            identity,
            topics,
            client_id,
            timing,
            state: SessionState::default(),
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Best-effort first connect.  A failure only arms the retry timer.
    pub fn initialize(&mut self, now_ms: u64) {
        info!("MQTT: device id {}", self.identity.device_id);
        if self.connect().is_err() {
            self.state.last_reconnect_attempt_ms = now_ms;
        }
    }

    /// One control-loop iteration: reconnect if due, otherwise drain the
    /// inbound queue and emit the heartbeat when due.
    pub fn tick(&mut self, now_ms: u64) {
        let transport_up = self.session.is_connected();
        if self.state.connected && !transport_up {
            warn!("MQTT: connection lost");
            self.state.connected = false;
        }

        if !transport_up {
            let since = now_ms.saturating_sub(self.state.last_reconnect_attempt_ms);
            if since > self.timing.reconnect_interval_ms {
                self.state.last_reconnect_attempt_ms = now_ms;
                if self.connect().is_ok() {
                    self.state.last_reconnect_attempt_ms = 0;
                }
            }
            return;
        }

        if !self.state.connected {
            // The client library re-established the link on its own.
            // Subscriptions do not survive that, so redo the handshake.
            info!("MQTT: transport reconnected");
            self.on_connected();
        }

        while let Some(frame) = self.session.next_inbound() {
            self.dispatch(&frame.topic, &frame.payload);
        }

        if now_ms.saturating_sub(self.state.last_status_emit_ms) > self.timing.status_interval_ms {
            self.publish_status(now_ms);
            self.state.last_status_emit_ms = now_ms;
        }
    }

    fn connect(&mut self) -> Result<(), SessionError> {
        info!("MQTT: connecting as {}", self.client_id);
        if let Err(e) = self.session.connect(&self.client_id) {
            warn!("MQTT: {}, retrying in {} ms", e, self.timing.reconnect_interval_ms);
            self.state.connected = false;
            return Err(e);
        }
        info!("MQTT: connected");
        self.on_connected();
        Ok(())
    }

    /// Subscriptions first, then registration, before any other publish.
    fn on_connected(&mut self) {
        self.state.connected = true;
        for topic in [self.topics.command(), self.topics.response()] {
            if let Err(e) = self.session.subscribe(topic) {
                warn!("MQTT: subscribe {} failed: {}", topic, e);
            }
        }
        let body = Registration::new(&self.identity.device_id, &self.identity.firmware_version);
        if publish_json(&mut self.session, self.topics.register(), &body) {
            info!("MQTT: registration sent");
        }
    }

    // ── Inbound ───────────────────────────────────────────────

    /// Route one inbound message.  Anything that does not decode is
    /// logged and dropped.
    pub fn dispatch(&mut self, topic: &str, payload: &[u8]) {
        let Some(kind) = self.topics.classify(topic) else {
            debug!("MQTT: ignoring message on {}", topic);
            return;
        };
        let message = match commands::decode(kind, payload) {
            Ok(m) => m,
            Err(e) => {
                warn!("MQTT: dropped message on {}: {}", topic, e);
                return;
            }
        };

        match message {
            InboundMessage::Response(ResponseMessage::Registered) => {
                info!("MQTT: device registration confirmed")
            }
            InboundMessage::Response(ResponseMessage::Ack) => info!("MQTT: server acknowledged"),
            InboundMessage::Command(CommandMessage::OtaUpdate { url }) => {
                self.start_update(url.trim())
            }
            InboundMessage::Command(CommandMessage::Command) => {
                info!("MQTT: server command received")
            }
        }
    }

    fn start_update(&mut self, url: &str) {
        info!("OTA: update requested: {}", url);
        let mut sink = ProgressPublisher {
            session: &mut self.session,
            topic: self.topics.ota_progress(),
        };
        if let Err(e) = self.updater.start(url, &mut sink) {
            warn!("OTA: request ignored: {}", e);
        }
    }

    // ── Outbound ──────────────────────────────────────────────

    pub fn publish_event(&mut self, event: EventId, now_ms: u64) {
        if publish_json(&mut self.session, self.topics.bird_detection(), &Detection::new(now_ms)) {
            info!("Beam: detection #{} published", event.0);
        }
    }

    pub fn publish_link_status(&mut self, status: &LinkStatus, now_ms: u64) {
        publish_json(&mut self.session, self.topics.data(), &LinkReport::new(status, now_ms));
    }

    pub fn publish_progress(&mut self, percent: u8, message: &str) {
        ProgressPublisher {
            session: &mut self.session,
            topic: self.topics.ota_progress(),
        }
        .report(percent, message);
    }

    fn publish_status(&mut self, now_ms: u64) {
        publish_json(&mut self.session, self.topics.status(), &Heartbeat::online(now_ms));
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn is_connected(&self) -> bool {
        self.state.connected
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn topics(&self) -> &TopicSet {
        &self.topics
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn updater(&self) -> &U {
        &self.updater
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut S {
        &mut self.session
    }
}

/// Serialise `body` and publish it.  Returns whether the broker took it.
fn publish_json<S: SessionPort, T: Serialize>(session: &mut S, topic: &str, body: &T) -> bool {
    if !session.is_connected() {
        debug!("MQTT: offline, dropping message for {}", topic);
        return false;
    }
    let bytes = match serde_json::to_vec(body) {
        Ok(b) => b,
        Err(e) => {
            warn!("MQTT: encode failed for {}: {}", topic, e);
            return false;
        }
    };
    match session.publish(topic, &bytes) {
        Ok(()) => true,
        Err(e) => {
            warn!("MQTT: publish to {} failed: {}", topic, e);
            false
        }
    }
}

/// Routes update progress to `/ota_progress` while the updater runs.
struct ProgressPublisher<'a, S> {
    session: &'a mut S,
    topic: &'a str,
}

impl<S: SessionPort> ProgressSink for ProgressPublisher<'_, S> {
    fn report(&mut self, percent: u8, message: &str) {
        info!("OTA: {}% {}", percent, message);
        publish_json(
            self.session,
            self.topic,
            &Progress {
                progress: percent,
                message,
            },
        );
    }
}

// ── Tests ─────────────────────────────────────────────────────
