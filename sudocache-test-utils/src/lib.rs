//! sudocache Test Utilities
//!
//! Shared test infrastructure for the sudocache workspace:
//! - Proptest generators for rules, timestamps and identities
//! - A failure-injecting backend wrapper
//! - Fixtures for common rule layouts
//! - Custom assertions on `SudoResult`

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

// Re-export backends from their source crate
pub use sudocache_storage::{LmdbSysdb, MockSysdb, SudoRuleCache, SysdbBackend};

// Re-export core types for convenience
pub use sudocache_core::{
    format_timestamp, IdentityDescriptor, MatchExpr, RuleAttrs, StorageError, SudoCacheError,
    SudoFilterFlags, SudoResult, Timestamp, ValidationError, ATTR_MEMBER_OF, ATTR_NAME,
    ATTR_NOT_AFTER, ATTR_NOT_BEFORE, ATTR_SUDO_USER, ATTR_UID_NUMBER, SUDO_RULE_SUBTREE,
};

/// Install a `tracing` subscriber for tests, filtered by `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs.
pub fn init_test_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

// ============================================================================
// FAILURE INJECTION
// ============================================================================

/// Backend wrapper that fails selected operations on demand.
///
/// Stores succeed until the configured budget is spent; deletes, searches
/// and flag writes fail while their switch is on.
#[derive(Debug)]
pub struct FlakyBackend<B> {
    inner: B,
    stores_left: AtomicUsize,
    fail_deletes: AtomicBool,
    fail_searches: AtomicBool,
    fail_flag_writes: AtomicBool,
}

impl<B: SysdbBackend> FlakyBackend<B> {
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            stores_left: AtomicUsize::new(usize::MAX),
            fail_deletes: AtomicBool::new(false),
            fail_searches: AtomicBool::new(false),
            fail_flag_writes: AtomicBool::new(false),
        }
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }

    /// Let `count` more stores succeed, then fail every store.
    pub fn fail_stores_after(&self, count: usize) {
        self.stores_left.store(count, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_searches(&self, fail: bool) {
        self.fail_searches.store(fail, Ordering::SeqCst);
    }

    pub fn fail_flag_writes(&self, fail: bool) {
        self.fail_flag_writes.store(fail, Ordering::SeqCst);
    }

    fn injected(target: &str) -> SudoCacheError {
        StorageError::TransactionFailed {
            reason: format!("injected failure: {target}"),
        }
        .into()
    }
}

impl<B: SysdbBackend> SysdbBackend for FlakyBackend<B> {
    fn domain(&self) -> &str {
        self.inner.domain()
    }

    fn search_custom(
        &self,
        filter: &MatchExpr,
        subtree: &str,
        attrs: &[&str],
    ) -> SudoResult<Vec<RuleAttrs>> {
        if self.fail_searches.load(Ordering::SeqCst) {
            return Err(Self::injected("search"));
        }
        self.inner.search_custom(filter, subtree, attrs)
    }

    fn store_custom(&self, name: &str, subtree: &str, attrs: &RuleAttrs) -> SudoResult<()> {
        let allowed = self
            .stores_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if !allowed {
            return Err(Self::injected("store"));
        }
        self.inner.store_custom(name, subtree, attrs)
    }

    fn delete_custom(&self, name: &str, subtree: &str) -> SudoResult<bool> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(Self::injected("delete"));
        }
        self.inner.delete_custom(name, subtree)
    }

    fn delete_subtree(&self, subtree: &str) -> SudoResult<u64> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(Self::injected("delete subtree"));
        }
        self.inner.delete_subtree(subtree)
    }

    fn get_bool(&self, subtree: &str, attribute: &str) -> SudoResult<Option<bool>> {
        self.inner.get_bool(subtree, attribute)
    }

    fn set_bool(&self, subtree: &str, attribute: &str, value: bool) -> SudoResult<()> {
        if self.fail_flag_writes.load(Ordering::SeqCst) {
            return Err(Self::injected("flag write"));
        }
        self.inner.set_bool(subtree, attribute, value)
    }

    fn lookup_user_by_name(&self, name: &str, attrs: &[&str]) -> SudoResult<Option<RuleAttrs>> {
        self.inner.lookup_user_by_name(name, attrs)
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for sudocache types.

    use super::*;
    use chrono::{DateTime, Timelike, Utc};
    use proptest::prelude::*;

    /// Generate a minute-aligned Timestamp between 2000 and 2038.
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (946684800i64..2145916800i64).prop_map(|secs| {
            let ts = DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now);
            ts.with_second(0).unwrap_or(ts)
        })
    }

    /// Generate a principal or group name.
    pub fn arb_name() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_-]{0,11}"
    }

    /// Generate a `sudoUser` value of any ownership kind.
    pub fn arb_sudo_user() -> impl Strategy<Value = String> {
        prop_oneof![
            arb_name(),
            (1u32..70000).prop_map(|uid| format!("#{uid}")),
            arb_name().prop_map(|group| format!("%{group}")),
            arb_name().prop_map(|netgroup| format!("+{netgroup}")),
            Just("ALL".to_string()),
        ]
    }

    /// Generate a rule with owners and an optional validity window.
    pub fn arb_rule_attrs() -> impl Strategy<Value = RuleAttrs> {
        (
            arb_name(),
            prop::collection::vec(arb_sudo_user(), 1..4),
            prop::option::of(arb_timestamp()),
            prop::option::of(arb_timestamp()),
        )
            .prop_map(|(name, users, not_before, not_after)| {
                let mut rule = RuleAttrs::new().with(ATTR_NAME, name);
                for user in users {
                    rule.add_string(ATTR_SUDO_USER, user);
                }
                if let Some(ts) = not_before {
                    rule.add_string(ATTR_NOT_BEFORE, format_timestamp(ts));
                }
                if let Some(ts) = not_after {
                    rule.add_string(ATTR_NOT_AFTER, format_timestamp(ts));
                }
                rule
            })
    }

    /// Generate SudoFilterFlags from any combination of defined bits.
    pub fn arb_flags() -> impl Strategy<Value = SudoFilterFlags> {
        any::<u32>().prop_map(SudoFilterFlags::from_bits_truncate)
    }

    /// Generate an identity descriptor.
    pub fn arb_identity() -> impl Strategy<Value = IdentityDescriptor> {
        (
            prop::option::of(arb_name()),
            0u32..70000,
            prop::collection::vec(arb_name(), 0..4),
            arb_flags(),
        )
            .prop_map(|(username, uid, groups, flags)| IdentityDescriptor {
                username,
                uid,
                groups,
                flags,
            })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built rules and principals for common scenarios.

    use super::*;

    /// A rule owned by `user`, stored under `name`.
    pub fn rule_for(name: &str, user: &str) -> RuleAttrs {
        RuleAttrs::new()
            .with(ATTR_NAME, name)
            .with(ATTR_SUDO_USER, user)
    }

    /// A rule owned by `user` with the given validity bounds.
    pub fn rule_with_window(
        name: &str,
        user: &str,
        not_before: Option<Timestamp>,
        not_after: Option<Timestamp>,
    ) -> RuleAttrs {
        let mut rule = rule_for(name, user);
        if let Some(ts) = not_before {
            rule.add_string(ATTR_NOT_BEFORE, format_timestamp(ts));
        }
        if let Some(ts) = not_after {
            rule.add_string(ATTR_NOT_AFTER, format_timestamp(ts));
        }
        rule
    }

    /// `(name, attrs)` pairs ready for a refresh cycle.
    pub fn named_rules<'a>(
        rules: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Vec<(String, RuleAttrs)> {
        rules
            .into_iter()
            .map(|(name, user)| (name.to_string(), rule_for(name, user)))
            .collect()
    }

    /// User entry with a uid and group memberships in `domain`.
    pub fn user_entry(domain: &str, uid: u32, groups: &[&str]) -> RuleAttrs {
        let mut entry = RuleAttrs::new().with(ATTR_UID_NUMBER, uid.to_string());
        for group in groups {
            entry.add_string(
                ATTR_MEMBER_OF,
                format!("name={group},cn=groups,cn={domain},cn=sysdb"),
            );
        }
        entry
    }

    /// Mock backend with alice (1000, wheel+ops) and bob (1001, no groups).
    pub fn mock_with_users(domain: &str) -> SudoResult<MockSysdb> {
        let backend = MockSysdb::new(domain);
        backend.add_user("alice", user_entry(domain, 1000, &["wheel", "ops"]))?;
        backend.add_user("bob", user_entry(domain, 1001, &[]))?;
        Ok(backend)
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions on sudocache results.

    use super::*;

    /// Assert that a SudoResult is Ok.
    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &SudoResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    /// Assert that a SudoResult is a Storage error.
    #[track_caller]
    pub fn assert_storage_error<T: std::fmt::Debug>(result: &SudoResult<T>) {
        match result {
            Err(SudoCacheError::Storage(_)) => {}
            other => panic!("Expected Storage error, got: {:?}", other),
        }
    }

    /// Assert that a SudoResult is a MalformedTimestamp validation error.
    #[track_caller]
    pub fn assert_malformed_timestamp<T: std::fmt::Debug>(result: &SudoResult<T>) {
        match result {
            Err(SudoCacheError::Validation(ValidationError::MalformedTimestamp { .. })) => {}
            other => panic!("Expected MalformedTimestamp error, got: {:?}", other),
        }
    }

    /// Assert that a SudoResult is an InvalidRecord validation error.
    #[track_caller]
    pub fn assert_invalid_record<T: std::fmt::Debug>(result: &SudoResult<T>) {
        match result {
            Err(SudoCacheError::Validation(ValidationError::InvalidRecord { .. })) => {}
            other => panic!("Expected InvalidRecord error, got: {:?}", other),
        }
    }

    /// Assert that two rule lists carry the same names in the same order.
    #[track_caller]
    pub fn assert_rule_names(rules: &[RuleAttrs], expected: &[&str]) {
        let names: Vec<&str> = rules.iter().filter_map(|r| r.first(ATTR_NAME)).collect();
        assert_eq!(names, expected, "Unexpected rule names");
    }
}
