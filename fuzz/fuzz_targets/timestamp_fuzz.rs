//! Fuzz test for validity-bound timestamp parsing
//!
//! Arbitrary input must either be rejected with an error or parse to an
//! instant that formats back to exactly the same text.
//!
//! Run with: cargo +nightly fuzz run timestamp_fuzz -- -max_total_time=60

#![no_main]

use libfuzzer_sys::fuzz_target;
use sudocache_core::{format_timestamp, parse_timestamp, RuleAttrs, ATTR_NOT_AFTER, ATTR_NOT_BEFORE};

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        match parse_timestamp(ATTR_NOT_BEFORE, input) {
            Ok(ts) => assert_eq!(format_timestamp(ts), input),
            Err(err) => assert!(err.is_malformed_timestamp()),
        }

        // The evaluator must surface the same failure instead of panicking
        let rule = RuleAttrs::new()
            .with(ATTR_NOT_BEFORE, input)
            .with(ATTR_NOT_AFTER, input);
        let _ = sudocache_core::is_active(&rule, fixed_now());
    }
});

fn fixed_now() -> sudocache_core::Timestamp {
    // fixed instant so runs are reproducible
    sudocache_core::parse_timestamp(ATTR_NOT_BEFORE, "202401010000Z")
        .unwrap_or_default()
}
