//! Validity-bound timestamps in `yyyymmddHHMMZ` form.

use chrono::{NaiveDate, TimeZone, Utc};

use crate::{SudoResult, Timestamp, ValidationError};

/// Lexical format of `sudoNotBefore` / `sudoNotAfter` values.
pub const SUDO_TIME_FORMAT: &str = "%Y%m%d%H%MZ";

const TIMESTAMP_LEN: usize = 13;

/// Parse a validity bound into an absolute UTC instant.
///
/// The value must be exactly twelve ASCII digits followed by a literal `Z`
/// and name a real calendar minute. `attribute` is carried into the error.
pub fn parse_timestamp(attribute: &str, value: &str) -> SudoResult<Timestamp> {
    let malformed = |reason: &str| ValidationError::MalformedTimestamp {
        attribute: attribute.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    };

    let bytes = value.as_bytes();
    if bytes.len() != TIMESTAMP_LEN {
        return Err(malformed("expected yyyymmddHHMMZ").into());
    }
    if bytes[TIMESTAMP_LEN - 1] != b'Z' {
        return Err(malformed("missing trailing Z").into());
    }
    if !bytes[..TIMESTAMP_LEN - 1].iter().all(u8::is_ascii_digit) {
        return Err(malformed("non-digit character").into());
    }

    let field = |range: std::ops::Range<usize>| -> u32 {
        bytes[range]
            .iter()
            .fold(0u32, |acc, b| acc * 10 + u32::from(b - b'0'))
    };
    let year = field(0..4) as i32;
    let month = field(4..6);
    let day = field(6..8);
    let hour = field(8..10);
    let minute = field(10..12);

    let naive = NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|date| date.and_hms_opt(hour, minute, 0))
        .ok_or_else(|| malformed("not a valid calendar time"))?;

    Ok(Utc.from_utc_datetime(&naive))
}

/// Render an instant as a validity bound, truncated to the minute.
pub fn format_timestamp(ts: Timestamp) -> String {
    ts.format(SUDO_TIME_FORMAT).to_string()
}
