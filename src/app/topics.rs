//! MQTT topic set, derived once from the device id.
//!
//! Layout: `prulety/<device_id>/<suffix>`.  The set is immutable after
//! construction.

use core::fmt::Write;

use super::commands::InboundTopic;
use super::ports::MAX_TOPIC_LEN;

/// Root namespace shared by every node.
pub const TOPIC_ROOT: &str = "prulety";

pub type Topic = heapless::String<MAX_TOPIC_LEN>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSet {
    register: Topic,
    data: Topic,
    bird_detection: Topic,
    ota_progress: Topic,
    status: Topic,
    command: Topic,
    response: Topic,
}

impl TopicSet {
    /// Derive all seven topics.
    ///
    /// [`NodeConfig::validate`](crate::config::NodeConfig::validate) caps ids
    /// at 48 bytes, which always fits.  A longer id yields a truncated topic.
    pub fn new(device_id: &str) -> Self {
        Self {
            register: build(device_id, "register"),
            data: build(device_id, "data"),
            bird_detection: build(device_id, "bird_detection"),
            ota_progress: build(device_id, "ota_progress"),
            status: build(device_id, "status"),
            command: build(device_id, "command"),
            response: build(device_id, "response"),
        }
    }

    pub fn register(&self) -> &str {
        &self.register
    }

    pub fn data(&self) -> &str {
        &self.data
    }

    pub fn bird_detection(&self) -> &str {
        &self.bird_detection
    }

    pub fn ota_progress(&self) -> &str {
        &self.ota_progress
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn response(&self) -> &str {
        &self.response
    }

    /// Map an inbound topic to the kind of message it carries.
    pub fn classify(&self, topic: &str) -> Option<InboundTopic> {
        if topic == self.command.as_str() {
            Some(InboundTopic::Command)
        } else if topic == self.response.as_str() {
            Some(InboundTopic::Response)
        } else {
            None
        }
    }
}

fn build(device_id: &str, suffix: &str) -> Topic {
    let mut t = Topic::new();
    let _ = write!(t, "{}/{}/{}", TOPIC_ROOT, device_id, suffix);
    t
}
