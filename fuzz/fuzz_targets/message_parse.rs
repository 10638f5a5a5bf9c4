//! Fuzz target for exchange message parsing
//!
//! Tests that the counter parser handles arbitrary text without panicking and
//! that anything it accepts prints back to an equivalent message.

#![no_main]

use aiko_core::ExchangeMessage;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(msg) = ExchangeMessage::parse(text) {
        let reparsed = ExchangeMessage::parse(&msg.to_string());
        assert_eq!(reparsed.ok(), Some(msg));
        let _ = msg.successor();
    }
});
