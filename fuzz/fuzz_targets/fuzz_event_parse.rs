//! Fuzz target for keyspace event parsing.
//!
//! Channel and payload come straight off the wire, so parsing must never
//! panic and a classified key must never be empty.

#![no_main]

use libfuzzer_sys::fuzz_target;
use rds_channel::event::{classify, parse_channel, EventClass, KeyspaceMessage};

fuzz_target!(|data: (&[u8], &[u8])| {
    let (channel, payload) = data;

    // Should never panic
    let _ = parse_channel(channel);

    let msg = KeyspaceMessage::new(channel, payload);
    match classify(&msg, "heartbeat") {
        Ok(EventClass::Deletion { key }) | Ok(EventClass::Mutation { key, .. }) => {
            assert!(!key.is_empty());
        }
        Ok(EventClass::Heartbeat) => assert_eq!(channel, b"heartbeat"),
        Err(_) => {}
    }
});
