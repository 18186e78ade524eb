//! Inbound messages from the broker.
//!
//! Payloads are validated at the session boundary and decoded into a closed
//! set of variants, so dispatch pattern-matches instead of probing JSON
//! fields.  Anything that does not decode is a [`DecodeError`] and is
//! dropped by the caller.

use core::fmt;

use serde::Deserialize;

/// Messages accepted on `<root>/<id>/command`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandMessage {
    /// Download and install the image at `url`.
    OtaUpdate { url: String },
    /// Generic server command.  Extra fields are accepted and ignored.
    Command,
}

/// Messages accepted on `<root>/<id>/response`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseMessage {
    /// Server acknowledged our registration.
    Registered,
    /// Generic acknowledgment.
    Ack,
}

/// A decoded inbound message, tagged by the topic it arrived on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    Command(CommandMessage),
    Response(ResponseMessage),
}

/// The two inbound topics the node subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundTopic {
    Command,
    Response,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// Not valid JSON, or not an object.
    Malformed,
    /// Valid JSON but unknown `type`, missing `type`, or missing fields.
    UnknownType,
    /// `ota_update` with an empty or non-HTTP URL.
    InvalidUrl,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed => write!(f, "malformed JSON"),
            Self::UnknownType => write!(f, "unknown or incomplete message type"),
            Self::InvalidUrl => write!(f, "url must be http:// or https://"),
        }
    }
}

/// Decode a payload that arrived on `topic`.
pub fn decode(topic: InboundTopic, payload: &[u8]) -> Result<InboundMessage, DecodeError> {
    // Parse once into a generic value so syntax errors and schema errors
    // are reported separately.
    let value: serde_json::Value =
        serde_json::from_slice(payload).map_err(|_| DecodeError::Malformed)?;
    if !value.is_object() {
        return Err(DecodeError::Malformed);
    }

    match topic {
        InboundTopic::Command => {
            let msg = CommandMessage::deserialize(value).map_err(|_| DecodeError::UnknownType)?;
            if let CommandMessage::OtaUpdate { url } = &msg {
                validate_url(url)?;
            }
            Ok(InboundMessage::Command(msg))
        }
        InboundTopic::Response => ResponseMessage::deserialize(value)
            .map(InboundMessage::Response)
            .map_err(|_| DecodeError::UnknownType),
    }
}

fn validate_url(url: &str) -> Result<(), DecodeError> {
    let url = url.trim();
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(DecodeError::InvalidUrl)
    }
}
