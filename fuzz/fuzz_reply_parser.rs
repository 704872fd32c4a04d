//! Fuzz target for the daemon reply parser.
//!
//! Run with: cargo +nightly fuzz run fuzz_reply_parser

#![no_main]

use efs_core::connector::{Line, parse_line};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);
    for with_seq in [true, false] {
        match parse_line(&raw, with_seq) {
            Ok(Line::Reply(reply)) => {
                let _ = reply.cooked();
                assert!(reply.code < 1000);
            }
            Ok(Line::Event(event)) => {
                let _ = event.cooked();
            }
            Err(_) => {}
        }
    }
});
