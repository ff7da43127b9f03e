//! LMDB-backed persistent sysdb with domain isolation.
//!
//! Uses the heed crate (Rust bindings for LMDB). Three named databases share
//! one environment:
//!
//! - `custom` holds custom subtree entries (cached rules) as JSON,
//! - `subtree_attrs` holds attributes of the subtrees themselves (the
//!   refreshed flag) as a single byte,
//! - `users` holds principal entries as JSON.
//!
//! All keys are [`ScopedKey`]s, so entries of one domain are never visible
//! to a backend opened for another domain on the same environment.
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. Searches run in a read transaction;
//! every mutation, including a whole-subtree delete, commits as a single
//! write transaction.

use std::path::Path;

use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions, RoTxn};
use sudocache_core::{MatchExpr, RuleAttrs, SudoCacheConfig, SudoResult};

use crate::scoped_key::ScopedKey;
use crate::SysdbBackend;

const CUSTOM_DB: &str = "custom";
const SUBTREE_ATTRS_DB: &str = "subtree_attrs";
const USERS_DB: &str = "users";
const USERS_SUBTREE: &str = "users";

/// Error type for LMDB sysdb operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbSysdbError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open a database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convert LmdbSysdbError to SudoCacheError.
impl From<LmdbSysdbError> for sudocache_core::SudoCacheError {
    fn from(e: LmdbSysdbError) -> Self {
        sudocache_core::SudoCacheError::Storage(
            sudocache_core::StorageError::TransactionFailed {
                reason: e.to_string(),
            },
        )
    }
}

fn txn_err(e: heed::Error) -> LmdbSysdbError {
    LmdbSysdbError::Transaction(e.to_string())
}

/// LMDB-backed sysdb for one domain.
///
/// # Example
///
/// ```ignore
/// use sudocache_storage::{LmdbSysdb, SudoRuleCache};
///
/// let backend = LmdbSysdb::open("/var/lib/sudocache", "ipa.test", 64)?;
/// let cache = SudoRuleCache::new(std::sync::Arc::new(backend));
/// cache.set_refreshed(false)?;
/// ```
pub struct LmdbSysdb {
    domain: String,
    /// The LMDB environment.
    env: Env,
    custom: Database<Bytes, Bytes>,
    subtree_attrs: Database<Bytes, Bytes>,
    users: Database<Bytes, Bytes>,
}

impl LmdbSysdb {
    /// Open (creating if needed) the environment at `path` for `domain`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - LMDB environment cannot be opened
    /// - The databases cannot be created
    pub fn open<P: AsRef<Path>>(
        path: P,
        domain: impl Into<String>,
        max_size_mb: usize,
    ) -> Result<Self, LmdbSysdbError> {
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(3)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbSysdbError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_err)?;
        let custom: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, Some(CUSTOM_DB))
            .map_err(|e| LmdbSysdbError::DbOpen(e.to_string()))?;
        let subtree_attrs: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, Some(SUBTREE_ATTRS_DB))
            .map_err(|e| LmdbSysdbError::DbOpen(e.to_string()))?;
        let users: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, Some(USERS_DB))
            .map_err(|e| LmdbSysdbError::DbOpen(e.to_string()))?;
        wtxn.commit().map_err(txn_err)?;

        Ok(Self {
            domain: domain.into(),
            env,
            custom,
            subtree_attrs,
            users,
        })
    }

    /// Open the environment described by a validated configuration.
    pub fn from_config(config: &SudoCacheConfig) -> SudoResult<Self> {
        config.validate()?;
        Ok(Self::open(
            &config.cache_path,
            config.domain.clone(),
            config.map_size_mb,
        )?)
    }

    /// Insert or replace a user entry.
    pub fn store_user(&self, name: &str, attrs: &RuleAttrs) -> SudoResult<()> {
        let key = ScopedKey::new(self.domain.as_str(), USERS_SUBTREE, name).encode();
        self.put_json(self.users, &key, attrs)
    }

    fn put_json(&self, db: Database<Bytes, Bytes>, key: &[u8], attrs: &RuleAttrs) -> SudoResult<()> {
        let bytes =
            serde_json::to_vec(attrs).map_err(|e| LmdbSysdbError::Serialization(e.to_string()))?;
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        db.put(&mut wtxn, key, &bytes).map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(())
    }

    fn decode_entry(bytes: &[u8]) -> Result<RuleAttrs, LmdbSysdbError> {
        serde_json::from_slice(bytes).map_err(|e| LmdbSysdbError::Deserialization(e.to_string()))
    }

    /// Collect the keys of `db` starting with `prefix`.
    fn collect_keys_with_prefix(
        txn: &RoTxn,
        db: Database<Bytes, Bytes>,
        prefix: &[u8],
    ) -> Result<Vec<Vec<u8>>, LmdbSysdbError> {
        let mut keys = Vec::new();
        for result in db.prefix_iter(txn, prefix).map_err(txn_err)? {
            let (key, _) = result.map_err(txn_err)?;
            keys.push(key.to_vec());
        }
        Ok(keys)
    }
}

impl SysdbBackend for LmdbSysdb {
    fn domain(&self) -> &str {
        &self.domain
    }

    fn search_custom(
        &self,
        filter: &MatchExpr,
        subtree: &str,
        attrs: &[&str],
    ) -> SudoResult<Vec<RuleAttrs>> {
        let prefix = ScopedKey::subtree_prefix(&self.domain, subtree);
        let rtxn = self.env.read_txn().map_err(txn_err)?;

        let mut found = Vec::new();
        for result in self
            .custom
            .prefix_iter(&rtxn, prefix.as_slice())
            .map_err(txn_err)?
        {
            let (_, value) = result.map_err(txn_err)?;
            let entry = Self::decode_entry(value)?;
            if filter.matches(&entry) {
                found.push(entry.project(attrs));
            }
        }
        Ok(found)
    }

    fn store_custom(&self, name: &str, subtree: &str, attrs: &RuleAttrs) -> SudoResult<()> {
        let key = ScopedKey::new(self.domain.as_str(), subtree, name).encode();
        self.put_json(self.custom, &key, attrs)
    }

    fn delete_custom(&self, name: &str, subtree: &str) -> SudoResult<bool> {
        let key = ScopedKey::new(self.domain.as_str(), subtree, name).encode();
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let deleted = self.custom.delete(&mut wtxn, &key).map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(deleted)
    }

    fn delete_subtree(&self, subtree: &str) -> SudoResult<u64> {
        let prefix = ScopedKey::subtree_prefix(&self.domain, subtree);
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let entry_keys = Self::collect_keys_with_prefix(&wtxn, self.custom, &prefix)?;
        let attr_keys = Self::collect_keys_with_prefix(&wtxn, self.subtree_attrs, &prefix)?;

        let mut deleted = 0u64;
        for key in &entry_keys {
            if self.custom.delete(&mut wtxn, key).map_err(txn_err)? {
                deleted += 1;
            }
        }
        for key in &attr_keys {
            self.subtree_attrs.delete(&mut wtxn, key).map_err(txn_err)?;
        }
        wtxn.commit().map_err(txn_err)?;

        Ok(deleted)
    }

    fn get_bool(&self, subtree: &str, attribute: &str) -> SudoResult<Option<bool>> {
        let key = ScopedKey::new(self.domain.as_str(), subtree, attribute).encode();
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        match self.subtree_attrs.get(&rtxn, &key).map_err(txn_err)? {
            Some([0]) => Ok(Some(false)),
            Some([1]) => Ok(Some(true)),
            Some(other) => Err(LmdbSysdbError::Deserialization(format!(
                "boolean attribute {attribute} holds {} bytes",
                other.len()
            ))
            .into()),
            None => Ok(None),
        }
    }

    fn set_bool(&self, subtree: &str, attribute: &str, value: bool) -> SudoResult<()> {
        let key = ScopedKey::new(self.domain.as_str(), subtree, attribute).encode();
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        self.subtree_attrs
            .put(&mut wtxn, &key, &[u8::from(value)])
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(())
    }

    fn lookup_user_by_name(&self, name: &str, attrs: &[&str]) -> SudoResult<Option<RuleAttrs>> {
        let key = ScopedKey::new(self.domain.as_str(), USERS_SUBTREE, name).encode();
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        match self.users.get(&rtxn, &key).map_err(txn_err)? {
            Some(bytes) => Ok(Some(Self::decode_entry(bytes)?.project(attrs))),
            None => Ok(None),
        }
    }
}
