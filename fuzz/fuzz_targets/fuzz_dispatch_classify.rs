//! Fuzz target: inbound payload classification and parsing.
//!
//! Feeds arbitrary text to `classify` and `parse_payload` and checks that
//! a classified payload's span always lies inside the input and starts at
//! the reported marker.
//!
//! cargo fuzz run fuzz_dispatch_classify

#![no_main]

use devlink::protocol::dispatch::{PayloadKind, classify, parse_payload};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(raw) = core::str::from_utf8(data) else {
        return;
    };

    let Ok(winner) = classify(raw) else {
        // Authorization rejections must be stable across both entry points.
        assert!(parse_payload(raw).is_err());
        return;
    };

    if let Ok(payload) = parse_payload(raw) {
        match winner {
            Some((kind, at)) => {
                assert_eq!(payload.kind(), kind);
                assert_eq!(payload.span.start, at);
                assert!(payload.span.end <= raw.len());
                assert!(raw.get(payload.span.clone()).is_some());
            }
            None => {
                assert_eq!(payload.kind(), PayloadKind::Unknown);
                assert!(payload.span.is_empty());
            }
        }
    }
});
