//! Fuzz target for frame decoding.
//!
//! Tests that arbitrary bytes from the response pipe don't cause panics when
//! decoded as a frame or validated as Celery Script.

#![no_main]

use farmware_tools::{celery, frame};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Try to decode as a complete frame - should not panic
    if let Ok(message) = frame::decode(data) {
        let _ = celery::validate(&message);
    }

    // Try the payload alone, like a frame body after the header
    if let Ok(value) = serde_json::from_slice::<serde_json::Value>(data) {
        if let Ok(node) = celery::validate(&value) {
            // A validated node must survive re-encoding
            let encoded = frame::encode(&node.to_value()).expect("encode validated node");
            let decoded = frame::decode(&encoded).expect("decode own frame");
            assert_eq!(decoded["kind"], node.kind.as_str());
        }
    }
});
