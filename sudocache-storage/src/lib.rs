//! sudocache Storage - Backend Trait, Backends and Cache Maintenance
//!
//! Defines the narrow storage collaborator the sudo rule cache relies on
//! ([`SysdbBackend`]), an in-memory implementation for tests
//! ([`MockSysdb`]), a persistent LMDB implementation ([`LmdbSysdb`]) and the
//! cache maintenance controller ([`SudoRuleCache`]).

pub mod lmdb_backend;
pub mod scoped_key;
pub mod sudo;

pub use lmdb_backend::{LmdbSysdb, LmdbSysdbError};
pub use scoped_key::ScopedKey;
pub use sudo::{group_name_from_dn, PurgeOutcome, RefreshSummary, ResolvedIdentity, SudoRuleCache};

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use sudocache_core::{MatchExpr, RuleAttrs, StorageError, SudoResult};

// ============================================================================
// BACKEND TRAIT
// ============================================================================

/// Storage collaborator for one domain's cache.
///
/// Entries live in named custom subtrees and are addressed by name.
/// "Not found" is reported as `Ok(None)` or an empty result, never as an
/// error; errors are real I/O or consistency failures.
pub trait SysdbBackend: Send + Sync {
    /// Domain this backend stores entries for.
    fn domain(&self) -> &str;

    /// Entries of `subtree` matching `filter`, in name order, projected to
    /// `attrs` (all attributes when `attrs` is empty).
    fn search_custom(
        &self,
        filter: &MatchExpr,
        subtree: &str,
        attrs: &[&str],
    ) -> SudoResult<Vec<RuleAttrs>>;

    /// Insert or replace entry `name` of `subtree`.
    fn store_custom(&self, name: &str, subtree: &str, attrs: &RuleAttrs) -> SudoResult<()>;

    /// Delete entry `name` of `subtree`. Returns whether it existed.
    fn delete_custom(&self, name: &str, subtree: &str) -> SudoResult<bool>;

    /// Delete `subtree` with every entry and attribute under it.
    /// Returns the number of entries removed.
    fn delete_subtree(&self, subtree: &str) -> SudoResult<u64>;

    /// Read a boolean attribute stored on the subtree itself.
    fn get_bool(&self, subtree: &str, attribute: &str) -> SudoResult<Option<bool>>;

    /// Write a boolean attribute on the subtree itself.
    fn set_bool(&self, subtree: &str, attribute: &str, value: bool) -> SudoResult<()>;

    /// Look up a user entry by name, projected to `attrs`.
    fn lookup_user_by_name(&self, name: &str, attrs: &[&str]) -> SudoResult<Option<RuleAttrs>>;
}

impl<B: SysdbBackend + ?Sized> SysdbBackend for Arc<B> {
    fn domain(&self) -> &str {
        (**self).domain()
    }

    fn search_custom(
        &self,
        filter: &MatchExpr,
        subtree: &str,
        attrs: &[&str],
    ) -> SudoResult<Vec<RuleAttrs>> {
        (**self).search_custom(filter, subtree, attrs)
    }

    fn store_custom(&self, name: &str, subtree: &str, attrs: &RuleAttrs) -> SudoResult<()> {
        (**self).store_custom(name, subtree, attrs)
    }

    fn delete_custom(&self, name: &str, subtree: &str) -> SudoResult<bool> {
        (**self).delete_custom(name, subtree)
    }

    fn delete_subtree(&self, subtree: &str) -> SudoResult<u64> {
        (**self).delete_subtree(subtree)
    }

    fn get_bool(&self, subtree: &str, attribute: &str) -> SudoResult<Option<bool>> {
        (**self).get_bool(subtree, attribute)
    }

    fn set_bool(&self, subtree: &str, attribute: &str, value: bool) -> SudoResult<()> {
        (**self).set_bool(subtree, attribute, value)
    }

    fn lookup_user_by_name(&self, name: &str, attrs: &[&str]) -> SudoResult<Option<RuleAttrs>> {
        (**self).lookup_user_by_name(name, attrs)
    }
}

// ============================================================================
// MOCK BACKEND
// ============================================================================

type Subtrees = BTreeMap<String, BTreeMap<String, RuleAttrs>>;

/// In-memory backend for testing.
#[derive(Debug, Default)]
pub struct MockSysdb {
    domain: String,
    subtrees: Arc<RwLock<Subtrees>>,
    flags: Arc<RwLock<HashMap<(String, String), bool>>>,
    users: Arc<RwLock<HashMap<String, RuleAttrs>>>,
}

impl MockSysdb {
    /// Create an empty mock backend for `domain`.
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            ..Default::default()
        }
    }

    /// Register a user entry for [`SysdbBackend::lookup_user_by_name`].
    pub fn add_user(&self, name: impl Into<String>, attrs: RuleAttrs) -> SudoResult<()> {
        self.users
            .write()
            .map_err(|_| StorageError::LockPoisoned)?
            .insert(name.into(), attrs);
        Ok(())
    }

    /// Number of entries stored in `subtree`.
    pub fn entry_count(&self, subtree: &str) -> SudoResult<usize> {
        let subtrees = self.subtrees.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(subtrees.get(subtree).map_or(0, BTreeMap::len))
    }

    /// Snapshot of `subtree` keyed by entry name.
    pub fn snapshot(&self, subtree: &str) -> SudoResult<BTreeMap<String, RuleAttrs>> {
        let subtrees = self.subtrees.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(subtrees.get(subtree).cloned().unwrap_or_default())
    }

    /// Clear all stored data.
    pub fn clear(&self) -> SudoResult<()> {
        self.subtrees
            .write()
            .map_err(|_| StorageError::LockPoisoned)?
            .clear();
        self.flags
            .write()
            .map_err(|_| StorageError::LockPoisoned)?
            .clear();
        self.users
            .write()
            .map_err(|_| StorageError::LockPoisoned)?
            .clear();
        Ok(())
    }
}

impl SysdbBackend for MockSysdb {
    fn domain(&self) -> &str {
        &self.domain
    }

    fn search_custom(
        &self,
        filter: &MatchExpr,
        subtree: &str,
        attrs: &[&str],
    ) -> SudoResult<Vec<RuleAttrs>> {
        let subtrees = self.subtrees.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(subtrees
            .get(subtree)
            .map(|entries| {
                entries
                    .values()
                    .filter(|entry| filter.matches(entry))
                    .map(|entry| entry.project(attrs))
                    .collect()
            })
            .unwrap_or_default())
    }

    fn store_custom(&self, name: &str, subtree: &str, attrs: &RuleAttrs) -> SudoResult<()> {
        let mut subtrees = self.subtrees.write().map_err(|_| StorageError::LockPoisoned)?;
        subtrees
            .entry(subtree.to_string())
            .or_default()
            .insert(name.to_string(), attrs.clone());
        Ok(())
    }

    fn delete_custom(&self, name: &str, subtree: &str) -> SudoResult<bool> {
        let mut subtrees = self.subtrees.write().map_err(|_| StorageError::LockPoisoned)?;
        Ok(subtrees
            .get_mut(subtree)
            .and_then(|entries| entries.remove(name))
            .is_some())
    }

    fn delete_subtree(&self, subtree: &str) -> SudoResult<u64> {
        let removed = self
            .subtrees
            .write()
            .map_err(|_| StorageError::LockPoisoned)?
            .remove(subtree)
            .map_or(0, |entries| entries.len() as u64);
        self.flags
            .write()
            .map_err(|_| StorageError::LockPoisoned)?
            .retain(|(tree, _), _| tree != subtree);
        Ok(removed)
    }

    fn get_bool(&self, subtree: &str, attribute: &str) -> SudoResult<Option<bool>> {
        let flags = self.flags.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(flags
            .get(&(subtree.to_string(), attribute.to_string()))
            .copied())
    }

    fn set_bool(&self, subtree: &str, attribute: &str, value: bool) -> SudoResult<()> {
        self.flags
            .write()
            .map_err(|_| StorageError::LockPoisoned)?
            .insert((subtree.to_string(), attribute.to_string()), value);
        Ok(())
    }

    fn lookup_user_by_name(&self, name: &str, attrs: &[&str]) -> SudoResult<Option<RuleAttrs>> {
        let users = self.users.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(users.get(name).map(|user| user.project(attrs)))
    }
}

// ============================================================================
// TESTS
// ============================================================================


// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Property: Never-written flags read as None, not as an error.
        #[test]
        fn prop_unwritten_flag_is_none(attribute in "[a-z]{1,12}") {
            let db = MockSysdb::new("test");
            prop_assert_eq!(db.get_bool("sudorules", &attribute).unwrap(), None);
        }

        /// Property: Search never returns an entry the filter rejects.
        #[test]
        fn prop_search_respects_filter(
            users in proptest::collection::vec("[a-d]", 0..20),
            wanted in "[a-d]",
        ) {
            let db = MockSysdb::new("test");
            for (i, user) in users.iter().enumerate() {
                let attrs = RuleAttrs::new().with("name", format!("r{i}")).with("sudoUser", user.as_str());
                db.store_custom(&format!("r{i}"), "sudorules", &attrs).unwrap();
            }
            let filter = MatchExpr::eq("sudoUser", wanted.as_str());
            let found = db.search_custom(&filter, "sudorules", &[]).unwrap();
            let expected = users.iter().filter(|u| **u == wanted).count();
            prop_assert_eq!(found.len(), expected);
            prop_assert!(found.iter().all(|r| filter.matches(r)));
        }
    }
}
