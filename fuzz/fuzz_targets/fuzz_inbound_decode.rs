//! Fuzz target: `commands::decode`
//!
//! Feeds arbitrary bytes to the decoder for both inbound topics.  Decoding
//! must never panic, and an accepted `ota_update` always carries an
//! http(s) URL.
//!
//! cargo fuzz run fuzz_inbound_decode

#![no_main]

use libfuzzer_sys::fuzz_target;
use prulety::app::commands::{decode, CommandMessage, InboundMessage, InboundTopic};

fuzz_target!(|data: &[u8]| {
    if let Ok(InboundMessage::Command(CommandMessage::OtaUpdate { url })) =
        decode(InboundTopic::Command, data)
    {
        let url = url.trim();
        assert!(url.starts_with("http://") || url.starts_with("https://"));
    }

    // Responses never decode into commands.
    if let Ok(msg) = decode(InboundTopic::Response, data) {
        assert!(matches!(msg, InboundMessage::Response(_)));
    }
});
