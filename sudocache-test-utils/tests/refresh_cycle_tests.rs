//! Refresh cycle tests across the controller and both backends.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use sudocache_core::{build_lookup_filter, SudoCacheConfig};
use sudocache_test_utils::{
    assertions::{assert_invalid_record, assert_malformed_timestamp, assert_rule_names},
    fixtures, init_test_tracing, FlakyBackend, LmdbSysdb, MatchExpr, MockSysdb, SudoRuleCache,
    SysdbBackend, ATTR_NOT_AFTER, ATTR_SUDO_USER, SUDO_RULE_SUBTREE,
};
use tempfile::TempDir;

fn everything() -> MatchExpr {
    MatchExpr::and(vec![])
}

#[test]
fn test_fresh_collection_reads_stale() {
    init_test_tracing();
    let cache = SudoRuleCache::new(Arc::new(MockSysdb::new("ipa.test")));
    assert!(!cache.get_refreshed().unwrap());
}

#[test]
fn test_full_refresh_marks_fresh() {
    init_test_tracing();
    let cache = SudoRuleCache::new(Arc::new(MockSysdb::new("ipa.test")));
    cache
        .refresh(None, fixtures::named_rules([("r1", "alice"), ("r2", "%wheel")]))
        .unwrap();
    assert!(cache.get_refreshed().unwrap());

    cache.set_refreshed(false).unwrap();
    assert!(!cache.get_refreshed().unwrap());
}

#[test]
fn test_purge_all_then_search_is_empty() {
    init_test_tracing();
    let cache = SudoRuleCache::new(Arc::new(MockSysdb::new("ipa.test")));
    cache
        .refresh(None, fixtures::named_rules([("r1", "alice"), ("r2", "bob")]))
        .unwrap();

    cache.purge_rules(None).unwrap();
    let left = cache
        .backend()
        .search_custom(&everything(), SUDO_RULE_SUBTREE, &[])
        .unwrap();
    assert!(left.is_empty());
}

#[test]
fn test_purge_by_filter_removes_only_matches() {
    init_test_tracing();
    let cache = SudoRuleCache::new(Arc::new(MockSysdb::new("ipa.test")));
    cache
        .refresh(
            None,
            fixtures::named_rules([("r1", "alice"), ("r2", "bob"), ("r3", "%wheel")]),
        )
        .unwrap();

    let filter = MatchExpr::parse("(|(sudoUser=alice)(sudoUser=%wheel))").unwrap();
    let outcome = cache.purge_rules(Some(&filter)).unwrap();
    assert_eq!(outcome.deleted, 2);

    let left = cache
        .backend()
        .search_custom(&everything(), SUDO_RULE_SUBTREE, &[])
        .unwrap();
    assert_rule_names(&left, &["r2"]);
    assert!(cache.get_refreshed().unwrap());
}

#[test]
fn test_purge_without_match_changes_nothing() {
    init_test_tracing();
    let cache = SudoRuleCache::new(Arc::new(MockSysdb::new("ipa.test")));
    cache
        .refresh(None, fixtures::named_rules([("r1", "alice")]))
        .unwrap();
    let before = cache.backend().snapshot(SUDO_RULE_SUBTREE).unwrap();

    let outcome = cache
        .purge_rules(Some(&MatchExpr::eq(ATTR_SUDO_USER, "mallory")))
        .unwrap();
    assert_eq!(outcome.deleted, 0);
    assert_eq!(cache.backend().snapshot(SUDO_RULE_SUBTREE).unwrap(), before);
}

#[test]
fn test_store_failure_mid_cycle_leaves_stale() {
    init_test_tracing();
    let backend = Arc::new(FlakyBackend::new(MockSysdb::new("ipa.test")));
    let cache = SudoRuleCache::new(Arc::clone(&backend));
    cache
        .refresh(None, fixtures::named_rules([("old", "alice")]))
        .unwrap();
    assert!(cache.get_refreshed().unwrap());

    backend.fail_stores_after(1);
    let result = cache.refresh(
        None,
        fixtures::named_rules([("r1", "alice"), ("r2", "bob"), ("r3", "carol")]),
    );
    assert!(result.is_err());
    assert!(!cache.get_refreshed().unwrap());
    assert_eq!(backend.inner().entry_count(SUDO_RULE_SUBTREE).unwrap(), 1);
}

#[test]
fn test_delete_failure_aborts_purge() {
    init_test_tracing();
    let backend = Arc::new(FlakyBackend::new(MockSysdb::new("ipa.test")));
    let cache = SudoRuleCache::new(Arc::clone(&backend));
    cache
        .refresh(None, fixtures::named_rules([("r1", "alice"), ("r2", "alice")]))
        .unwrap();

    backend.fail_deletes(true);
    assert!(cache
        .purge_rules(Some(&MatchExpr::eq(ATTR_SUDO_USER, "alice")))
        .is_err());
    assert!(cache.refresh(None, vec![]).is_err());
    assert!(!cache.get_refreshed().unwrap());
    assert_eq!(backend.inner().entry_count(SUDO_RULE_SUBTREE).unwrap(), 2);
}

#[test]
fn test_search_failure_aborts_filtered_purge() {
    init_test_tracing();
    let backend = Arc::new(FlakyBackend::new(MockSysdb::new("ipa.test")));
    let cache = SudoRuleCache::new(Arc::clone(&backend));
    backend.fail_searches(true);
    assert!(cache
        .purge_rules(Some(&MatchExpr::eq(ATTR_SUDO_USER, "alice")))
        .is_err());
}

#[test]
fn test_lookup_for_resolved_user() {
    init_test_tracing();
    let cache = SudoRuleCache::new(Arc::new(fixtures::mock_with_users("ipa.test").unwrap()));
    let now = Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap();
    let past = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
    let future = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();

    let mut rules = fixtures::named_rules([
        ("by-name", "alice"),
        ("by-uid", "#1000"),
        ("by-group", "%ops"),
        ("netgroup", "+admins"),
        ("other", "bob"),
        ("defaults", "nobody"),
    ]);
    rules.push((
        "expired".to_string(),
        fixtures::rule_with_window("expired", "alice", Some(past), Some(past)),
    ));
    rules.push((
        "upcoming".to_string(),
        fixtures::rule_with_window("upcoming", "alice", Some(future), None),
    ));
    cache.refresh(None, rules).unwrap();

    let config = SudoCacheConfig::for_domain("ipa.test", "/unused");
    let identity = cache
        .resolve_identity("alice")
        .unwrap()
        .into_descriptor("alice", config.lookup_flags());

    let found = cache.lookup_rules(&identity, Some(now)).unwrap();
    assert_rule_names(
        &found,
        &["by-group", "by-name", "by-uid", "defaults", "netgroup"],
    );

    let mut no_netgroups = config.clone();
    no_netgroups.include_netgroups = false;
    let identity = identity.flags(no_netgroups.lookup_flags());
    let found = cache.lookup_rules(&identity, Some(now)).unwrap();
    assert_rule_names(&found, &["by-group", "by-name", "by-uid", "defaults"]);
}

#[test]
fn test_lookup_fails_on_malformed_bound() {
    init_test_tracing();
    let cache = SudoRuleCache::new(Arc::new(MockSysdb::new("ipa.test")));
    let bad = fixtures::rule_for("bad", "alice").with(ATTR_NOT_AFTER, "tomorrow");
    cache.refresh(None, vec![("bad".to_string(), bad)]).unwrap();

    let identity = sudocache_core::IdentityDescriptor::for_user("alice", 1000, vec![]);
    assert_malformed_timestamp(&cache.lookup_rules(&identity, None));
}

#[test]
fn test_resolve_unknown_and_broken_users() {
    init_test_tracing();
    let backend = fixtures::mock_with_users("ipa.test").unwrap();
    backend
        .add_user("ghost", fixtures::user_entry("ipa.test", 0, &[]))
        .unwrap();
    let cache = SudoRuleCache::new(Arc::new(backend));

    assert!(cache.resolve_identity("nobody").unwrap_err().is_not_found());
    assert_invalid_record(&cache.resolve_identity("ghost"));
}

#[test]
fn test_lmdb_refresh_cycle_end_to_end() {
    init_test_tracing();
    let temp_dir = TempDir::new().unwrap();
    let config = SudoCacheConfig::for_domain("ipa.test", temp_dir.path());

    {
        let backend = LmdbSysdb::from_config(&config).unwrap();
        let cache = SudoRuleCache::new(Arc::new(backend));
        assert!(!cache.get_refreshed().unwrap());
        cache
            .refresh(
                None,
                fixtures::named_rules([("r1", "alice"), ("r2", "bob"), ("r3", "ALL")]),
            )
            .unwrap();
        assert!(cache.get_refreshed().unwrap());

        let outcome = cache
            .purge_rules(Some(&MatchExpr::eq(ATTR_SUDO_USER, "bob")))
            .unwrap();
        assert_eq!(outcome.deleted, 1);
    }

    let backend = LmdbSysdb::from_config(&config).unwrap();
    let cache = SudoRuleCache::new(Arc::new(backend));
    assert!(cache.get_refreshed().unwrap());

    let identity = sudocache_core::IdentityDescriptor::for_user("alice", 1000, vec![]);
    let filter = build_lookup_filter(&identity).unwrap();
    let found = cache
        .backend()
        .search_custom(&filter, SUDO_RULE_SUBTREE, &[])
        .unwrap();
    assert_rule_names(&found, &["r1", "r3"]);

    cache.purge_rules(None).unwrap();
    assert!(!cache.get_refreshed().unwrap());
    assert!(cache
        .backend()
        .search_custom(&everything(), SUDO_RULE_SUBTREE, &[])
        .unwrap()
        .is_empty());
}
