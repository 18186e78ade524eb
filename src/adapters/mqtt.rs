//! MQTT session adapter.
//!
//! Implements [`SessionPort`].
//!
//! The ESP-IDF client runs its own task and reports through a callback.
//! Received frames are copied into a bounded [`InboundChannel`] which the
//! control loop drains via [`SessionPort::next_inbound`]; connection state
//! is mirrored in an atomic flag.  Nothing in the callback touches domain
//! state.
//!
//! ```text
//!  esp-mqtt task ──callback──▶ INBOUND (depth 8) ──try_receive──▶ SessionManager::tick
//! ```
//!
//! A full queue drops the newest frame with a warning.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use log::warn;

use crate::app::ports::{InboundFrame, SessionError, SessionPort};
use crate::config::NodeConfig;

#[cfg(target_os = "espidf")]
use core::sync::atomic::{AtomicBool, Ordering};
#[cfg(target_os = "espidf")]
use esp_idf_hal::delay::FreeRtos;
#[cfg(target_os = "espidf")]
use esp_idf_svc::mqtt::client::{
    Details, EspMqttClient, EspMqttEvent, EventPayload, MqttClientConfiguration, QoS,
};
#[cfg(target_os = "espidf")]
use log::{debug, info};

#[cfg(target_os = "espidf")]
use crate::drivers::watchdog::{self, FeedingDelay, Watchdog};

/// Frames buffered between the client task and the control loop.
pub const INBOUND_DEPTH: usize = 8;

pub type InboundChannel = Channel<CriticalSectionRawMutex, InboundFrame, INBOUND_DEPTH>;

/// Copy one received message into `channel`.  Returns `false` if dropped.
pub fn enqueue(channel: &InboundChannel, topic: &str, payload: &[u8]) -> bool {
    let Some(frame) = InboundFrame::new(topic, payload) else {
        warn!("MQTT: oversized frame on {} dropped ({} bytes)", topic, payload.len());
        return false;
    };
    if channel.try_send(frame).is_err() {
        warn!("MQTT: inbound queue full, frame on {} dropped", topic);
        return false;
    }
    true
}

fn broker_url(config: &NodeConfig) -> String {
    format!("mqtt://{}:{}", config.broker_host, config.broker_port)
}

// ───────────────────────────────────────────────────────────────
// ESP-IDF client
// ───────────────────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
static INBOUND: InboundChannel = Channel::new();
#[cfg(target_os = "espidf")]
static CONNECTED: AtomicBool = AtomicBool::new(false);

/// How long `connect` waits for the broker's CONNACK.  The wait feeds the
/// watchdog on every poll.
#[cfg(target_os = "espidf")]
const CONNECT_TIMEOUT_MS: u32 = 5_000;
#[cfg(target_os = "espidf")]
const CONNECT_POLL_MS: u32 = 50;

#[cfg(target_os = "espidf")]
pub struct MqttAdapter {
    url: String,
    username: String,
    password: String,
    client: Option<EspMqttClient<'static>>,
    delay: FeedingDelay<FreeRtos>,
}

#[cfg(target_os = "espidf")]
impl MqttAdapter {
    pub fn new(config: &NodeConfig, watchdog: Watchdog) -> Self {
        Self {
            url: broker_url(config),
            username: config.broker_username.clone(),
            password: config.broker_password.clone(),
            client: None,
            delay: FeedingDelay::new(FreeRtos, watchdog),
        }
    }

    fn on_event(event: EspMqttEvent<'_>) {
        match event.payload() {
            EventPayload::Connected(_) => {
                CONNECTED.store(true, Ordering::Release);
                info!("MQTT: broker session up");
            }
            EventPayload::Disconnected => {
                CONNECTED.store(false, Ordering::Release);
                warn!("MQTT: broker session down");
            }
            EventPayload::Received {
                topic: Some(topic),
                data,
                details: Details::Complete,
                ..
            } => {
                enqueue(&INBOUND, topic, data);
            }
            EventPayload::Received { .. } => debug!("MQTT: fragmented frame dropped"),
            EventPayload::Error(e) => warn!("MQTT: client error {:?}", e),
            _ => {}
        }
    }
}

#[cfg(target_os = "espidf")]
impl SessionPort for MqttAdapter {
    fn connect(&mut self, client_id: &str) -> Result<(), SessionError> {
        if self.client.is_none() {
            let conf = MqttClientConfiguration {
                client_id: Some(client_id),
                username: (!self.username.is_empty()).then_some(self.username.as_str()),
                password: (!self.password.is_empty()).then_some(self.password.as_str()),
                keep_alive_interval: Some(core::time::Duration::from_secs(15)),
                ..Default::default()
            };
            info!("MQTT: broker {}", self.url);
            let client = EspMqttClient::new_cb(&self.url, &conf, Self::on_event)
                .map_err(|e| SessionError::ConnectFailed(e.code()))?;
            self.client = Some(client);
        }

        // The client connects (and later reconnects) on its own task.
        let up = watchdog::wait_until(&mut self.delay, CONNECT_TIMEOUT_MS, CONNECT_POLL_MS, || {
            CONNECTED.load(Ordering::Acquire)
        });
        if up { Ok(()) } else { Err(SessionError::ConnectFailed(-1)) }
    }

    fn is_connected(&self) -> bool {
        self.client.is_some() && CONNECTED.load(Ordering::Acquire)
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), SessionError> {
        let client = self.client.as_mut().ok_or(SessionError::NotConnected)?;
        client
            .subscribe(topic, QoS::AtMostOnce)
            .map(|_| ())
            .map_err(|_| SessionError::SubscribeFailed)
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), SessionError> {
        let client = self.client.as_mut().ok_or(SessionError::NotConnected)?;
        client
            .publish(topic, QoS::AtMostOnce, false, payload)
            .map(|_| ())
            .map_err(|_| SessionError::PublishFailed)
    }

    fn next_inbound(&mut self) -> Option<InboundFrame> {
        INBOUND.try_receive().ok()
    }
}

// ───────────────────────────────────────────────────────────────
// Simulation
// ───────────────────────────────────────────────────────────────

/// Loopback broker: records what the node sends and lets tests inject
/// frames through the same bounded queue the real client uses.
#[cfg(not(target_os = "espidf"))]
pub struct MqttAdapter {
    url: String,
    broker_up: bool,
    connected: bool,
    inbound: InboundChannel,
    subscriptions: Vec<String>,
    published: Vec<(String, Vec<u8>)>,
}

#[cfg(not(target_os = "espidf"))]
impl MqttAdapter {
    pub fn new(config: &NodeConfig) -> Self {
        Self {
            url: broker_url(config),
            broker_up: true,
            connected: false,
            inbound: Channel::new(),
            subscriptions: Vec::new(),
            published: Vec::new(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Deliver a frame as if the broker had sent it.
    pub fn inject(&self, topic: &str, payload: &[u8]) -> bool {
        enqueue(&self.inbound, topic, payload)
    }

    /// Take the broker down (drops the session) or bring it back.
    pub fn set_broker(&mut self, up: bool) {
        self.broker_up = up;
        if !up {
            self.connected = false;
            self.subscriptions.clear();
        }
    }

    pub fn subscriptions(&self) -> &[String] {
        &self.subscriptions
    }

    pub fn published(&self) -> &[(String, Vec<u8>)] {
        &self.published
    }
}

#[cfg(not(target_os = "espidf"))]
impl SessionPort for MqttAdapter {
    fn connect(&mut self, client_id: &str) -> Result<(), SessionError> {
        if !self.broker_up {
            return Err(SessionError::ConnectFailed(-2));
        }
        log::info!("MQTT(sim): {} connected to {}", client_id, self.url);
        self.connected = true;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), SessionError> {
        if !self.connected {
            return Err(SessionError::NotConnected);
        }
        self.subscriptions.push(topic.to_string());
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), SessionError> {
        if !self.connected {
            return Err(SessionError::NotConnected);
        }
        self.published.push((topic.to_string(), payload.to_vec()));
        Ok(())
    }

    fn next_inbound(&mut self) -> Option<InboundFrame> {
        self.inbound.try_receive().ok()
    }
}
