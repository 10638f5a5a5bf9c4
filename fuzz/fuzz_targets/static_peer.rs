//! Fuzz target for `NAME=ip:port` static peer entries

#![no_main]

use aiko_discovery::{StaticPeer, matches_target};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(peer) = text.parse::<StaticPeer>() {
        assert!(!peer.name.is_empty());
        assert!(!peer.name.contains('.'));
        let _ = matches_target(&peer.name, text);
    }
});
