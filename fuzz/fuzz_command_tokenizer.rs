//! Fuzz target for the command encoder and tokenizer.
//!
//! Run with: cargo +nightly fuzz run fuzz_command_tokenizer
//!
//! Tokenizing arbitrary lines must never panic, and any argument the encoder
//! accepts must come back unchanged from the tokenizer.

#![no_main]

use efs_core::command::{self, Arg};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };

    let _ = command::tokenize(s);

    let args = [Arg::from(s), Arg::from("tail")];
    if let Ok(encoded) = command::encode(Some(1), "efs-server", "unlock", &args) {
        let tokens = command::tokenize(encoded.wire()).expect("encoded command must tokenize");
        assert_eq!(tokens, ["1", "efs-server", "unlock", s, "tail"]);
    }
});
