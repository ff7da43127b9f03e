//! Time-window eligibility of cached rules.
//!
//! A rule may carry `sudoNotBefore` and `sudoNotAfter` bounds, each
//! multi-valued. The tie-break rules follow sudoers.ldap:
//!
//! - with several `sudoNotBefore` values the **earliest** instant is used;
//! - with several `sudoNotAfter` values the **last stored** value is used,
//!   not the latest instant. Rules replicated from the directory rely on
//!   this ordering, so the last entry wins even when an earlier entry names
//!   a later time.
//!
//! A rule without either attribute is always active. Any unparsable bound
//! makes the rule's status undeterminable and is reported as an error.

use chrono::{DateTime, Utc};

use crate::timestamp::parse_timestamp;
use crate::{RuleAttrs, SudoCacheError, SudoResult, Timestamp, ATTR_NOT_AFTER, ATTR_NOT_BEFORE};

/// Decide whether `rule` is active at `now`.
pub fn is_active(rule: &RuleAttrs, now: Timestamp) -> SudoResult<bool> {
    if let Some(values) = rule.string_array(ATTR_NOT_BEFORE) {
        let mut earliest: Option<Timestamp> = None;
        for value in values {
            let ts = parse_timestamp(ATTR_NOT_BEFORE, value)?;
            earliest = Some(earliest.map_or(ts, |cur| cur.min(ts)));
        }
        if let Some(not_before) = earliest {
            if now < not_before {
                return Ok(false);
            }
        }
    }

    if let Some(values) = rule.string_array(ATTR_NOT_AFTER) {
        // last entry wins, but every entry must parse
        let mut last: Option<Timestamp> = None;
        for value in values {
            last = Some(parse_timestamp(ATTR_NOT_AFTER, value)?);
        }
        if let Some(not_after) = last {
            if now > not_after {
                return Ok(false);
            }
        }
    }

    Ok(true)
}

/// Select the rules active at `now` (`None` means the current wall clock).
///
/// Input order is preserved and the result is a fresh collection. The first
/// rule whose window cannot be evaluated aborts the whole batch.
pub fn select_active(rules: &[RuleAttrs], now: Option<Timestamp>) -> SudoResult<Vec<RuleAttrs>> {
    let now = now.unwrap_or_else(Utc::now);

    let mut active = Vec::new();
    for rule in rules {
        if is_active(rule, now)? {
            active
                .try_reserve(1)
                .map_err(|_| SudoCacheError::exhausted("active rule set"))?;
            active.push(rule.clone());
        }
    }
    Ok(active)
}

/// [`select_active`] keyed by Unix seconds, where `0` means "now".
pub fn filter_rules_by_time(rules: &[RuleAttrs], now_secs: i64) -> SudoResult<Vec<RuleAttrs>> {
    let now = if now_secs == 0 {
        None
    } else {
        Some(DateTime::from_timestamp(now_secs, 0).ok_or_else(|| {
            crate::ValidationError::InvalidRecord {
                name: "now".to_string(),
                reason: format!("{now_secs} is outside the representable time range"),
            }
        })?)
    };
    select_active(rules, now)
}
