//! Fuzz target for relay request bodies
//!
//! Feeds arbitrary bytes through the JSON decoder used by the relay endpoint
//! and on into the message parser.

#![no_main]

use aiko_core::ExchangeMessage;
use aiko_transport::RelayRequest;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(request) = serde_json::from_slice::<RelayRequest>(data) {
        let _ = ExchangeMessage::parse(&request.message);
    }
});
