//! Fuzz test for match expression parsing
//!
//! Any UTF-8 input must parse or fail cleanly. A parsed expression must
//! render to text that parses back to the same expression.
//!
//! Run with: cargo +nightly fuzz run filter_parse_fuzz -- -max_total_time=60

#![no_main]

use libfuzzer_sys::fuzz_target;
use sudocache_core::{MatchExpr, RuleAttrs};

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        let Ok(expr) = MatchExpr::parse(input) else {
            return;
        };

        let rendered = expr.to_filter_string();
        let reparsed = MatchExpr::parse(&rendered).expect("rendered filter must parse");
        assert_eq!(expr, reparsed);

        // Evaluation must not panic on arbitrary expressions
        let entry = RuleAttrs::new()
            .with("objectClass", "sudoRule")
            .with("sudoUser", "%wheel");
        let _ = expr.matches(&entry);
    }
});
