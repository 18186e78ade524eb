//! Fuzz target: `mqtt::enqueue`
//!
//! Splits the input into a topic and a payload and pushes it through the
//! bounded inbound queue.  Oversized frames must be rejected, and anything
//! accepted must come back out byte for byte.
//!
//! cargo fuzz run fuzz_inbound_frame

#![no_main]

use libfuzzer_sys::fuzz_target;
use prulety::adapters::mqtt::{enqueue, InboundChannel};
use prulety::app::ports::{MAX_INBOUND_PAYLOAD, MAX_TOPIC_LEN};

fuzz_target!(|data: &[u8]| {
    let Some((&split, rest)) = data.split_first() else {
        return;
    };
    let (topic, payload) = rest.split_at((split as usize).min(rest.len()));
    let Ok(topic) = core::str::from_utf8(topic) else {
        return;
    };

    let channel = InboundChannel::new();
    let accepted = enqueue(&channel, topic, payload);
    let fits = topic.len() <= MAX_TOPIC_LEN && payload.len() <= MAX_INBOUND_PAYLOAD;
    assert_eq!(accepted, fits);

    if accepted {
        let frame = channel.try_receive().expect("accepted frame is queued");
        assert_eq!(frame.topic.as_str(), topic);
        assert_eq!(&frame.payload[..], payload);
    }
});
