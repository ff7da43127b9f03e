//! Domain-scoped LMDB keys.
//!
//! Every stored entry lives under a domain and a custom subtree. A
//! [`ScopedKey`] cannot be built without both, so one domain's cache can
//! never address another domain's entries.
//!
//! # Binary Format
//!
//! `[domain][0xFF][subtree][0xFF][name]`
//!
//! `0xFF` never occurs in UTF-8 text, so the separator is unambiguous and
//! all keys of one subtree share the `[domain][0xFF][subtree][0xFF]` prefix,
//! which keeps them contiguous in LMDB's sorted key space.

/// Separator byte between key components.
const SEPARATOR: u8 = 0xFF;

/// A storage key scoped to a domain and subtree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopedKey {
    domain: String,
    subtree: String,
    name: String,
}

impl ScopedKey {
    /// Create a key for entry `name` in `subtree` of `domain`.
    pub fn new(
        domain: impl Into<String>,
        subtree: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            domain: domain.into(),
            subtree: subtree.into(),
            name: name.into(),
        }
    }

    /// Encode for LMDB storage.
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Self::subtree_prefix(&self.domain, &self.subtree);
        bytes.extend_from_slice(self.name.as_bytes());
        bytes
    }

    /// Prefix shared by every key of `subtree` in `domain`.
    pub fn subtree_prefix(domain: &str, subtree: &str) -> Vec<u8> {
        let mut prefix = Vec::with_capacity(domain.len() + subtree.len() + 2);
        prefix.extend_from_slice(domain.as_bytes());
        prefix.push(SEPARATOR);
        prefix.extend_from_slice(subtree.as_bytes());
        prefix.push(SEPARATOR);
        prefix
    }
}
