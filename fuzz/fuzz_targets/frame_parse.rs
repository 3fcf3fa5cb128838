//! Fuzz target for `Frame::parse`
//!
//! # Invariants
//!
//! - Parsing arbitrary text never panics
//! - A successfully parsed frame serializes and re-parses to the same frame

#![no_main]

use libfuzzer_sys::fuzz_target;
use stomp_proto::Frame;

fuzz_target!(|data: &[u8]| {
    let text = String::from_utf8_lossy(data);
    let Ok(frame) = Frame::parse(&text) else {
        return;
    };

    // Values are trimmed on parse, so a second pass is a fixed point
    let wire = frame.serialize();
    let reparsed = Frame::parse(&wire).expect("serialized frame must parse");
    assert_eq!(reparsed.command, frame.command);
    assert_eq!(reparsed.headers, frame.headers);
    assert_eq!(wire.len(), frame.encoded_len());
});
