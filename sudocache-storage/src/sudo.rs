//! Cache maintenance for sudo rules.
//!
//! [`SudoRuleCache`] owns every write to the `sudorules` subtree: storing
//! fetched rules, full and filtered purges, and the persisted refreshed flag
//! that tells readers whether the cached rule set is complete.
//!
//! A full refresh moves the collection `Stale → (purge + store)* → Fresh`.
//! The flag is cleared before anything is touched and only set again after
//! every rule has been stored, so a failure part-way leaves it reading
//! stale. Concurrent refreshes of one collection must be serialised by the
//! caller.

use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;

use sudocache_core::{
    build_lookup_filter, select_active, IdentityDescriptor, MatchExpr, RuleAttrs, StorageError,
    SudoFilterFlags, SudoResult, Timestamp, ValidationError, ATTR_CN, ATTR_MEMBER_OF, ATTR_NAME,
    ATTR_OBJECT_CLASS, ATTR_REFRESHED, ATTR_UID_NUMBER, SUDO_RULE_OBJECT_CLASS, SUDO_RULE_SUBTREE,
};

use crate::SysdbBackend;

/// Result of a purge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeOutcome {
    /// Entries removed.
    pub deleted: u64,
    /// Matching entries skipped because they carried no name.
    pub skipped: u64,
}

/// Result of a refresh cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub purged: PurgeOutcome,
    pub stored: u64,
}

/// Numeric id and group names of a principal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIdentity {
    pub uid: u32,
    pub groups: Vec<String>,
}

impl ResolvedIdentity {
    /// Lookup descriptor for `username` with the given flags.
    pub fn into_descriptor(
        self,
        username: impl Into<String>,
        flags: SudoFilterFlags,
    ) -> IdentityDescriptor {
        IdentityDescriptor {
            username: Some(username.into()),
            uid: self.uid,
            groups: self.groups,
            flags,
        }
    }
}

/// Cache maintenance controller for one domain's sudo rules.
pub struct SudoRuleCache<B: SysdbBackend> {
    backend: Arc<B>,
}

impl<B: SysdbBackend> Clone for SudoRuleCache<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
        }
    }
}

impl<B: SysdbBackend> SudoRuleCache<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Store a rule under `name`, replacing any rule with the same name.
    ///
    /// The sudo rule object class is added to `attrs` and its name
    /// attribute is replaced by `name`, so the stored name always matches
    /// the key the rule is deleted under.
    pub fn save_rule(&self, name: &str, mut attrs: RuleAttrs) -> SudoResult<()> {
        tracing::debug!(rule = name, domain = self.backend.domain(), "Adding sudo rule");

        attrs.add_string_unique(ATTR_OBJECT_CLASS, SUDO_RULE_OBJECT_CLASS);
        attrs.set_values(ATTR_NAME, vec![name.to_string()]);

        self.backend
            .store_custom(name, SUDO_RULE_SUBTREE, &attrs)
            .inspect_err(|e| tracing::error!(error = %e, rule = name, "Could not store sudo rule"))
    }

    /// Remove cached rules.
    ///
    /// With no filter the whole rule subtree is dropped, including the
    /// refreshed flag. With a filter, each matching rule is deleted by name;
    /// matches without a name are logged and skipped. No match is a
    /// successful no-op. The first backend failure aborts the purge.
    pub fn purge_rules(&self, filter: Option<&MatchExpr>) -> SudoResult<PurgeOutcome> {
        let Some(filter) = filter else {
            let deleted = self
                .backend
                .delete_subtree(SUDO_RULE_SUBTREE)
                .inspect_err(|e| tracing::error!(error = %e, "Could not purge sudo rule subtree"))?;
            tracing::debug!(deleted, "Purged all sudo rules");
            return Ok(PurgeOutcome {
                deleted,
                skipped: 0,
            });
        };

        let matches = self
            .backend
            .search_custom(
                filter,
                SUDO_RULE_SUBTREE,
                &[ATTR_OBJECT_CLASS, ATTR_NAME, ATTR_CN],
            )
            .inspect_err(|e| tracing::error!(error = %e, %filter, "Error looking up sudo rules"))?;

        if matches.is_empty() {
            tracing::trace!(%filter, "No sudo rules matched");
            return Ok(PurgeOutcome::default());
        }

        let mut outcome = PurgeOutcome::default();
        for entry in &matches {
            let Some(name) = entry.first(ATTR_NAME) else {
                tracing::warn!(cn = ?entry.first(ATTR_CN), "Sudo rule without a name, skipping");
                outcome.skipped += 1;
                continue;
            };
            let existed = self
                .backend
                .delete_custom(name, SUDO_RULE_SUBTREE)
                .inspect_err(|e| tracing::error!(error = %e, rule = name, "Could not delete sudo rule"))?;
            if existed {
                outcome.deleted += 1;
            }
        }

        tracing::debug!(
            deleted = outcome.deleted,
            skipped = outcome.skipped,
            %filter,
            "Purged matching sudo rules"
        );
        Ok(outcome)
    }

    /// Persist the refreshed flag.
    pub fn set_refreshed(&self, refreshed: bool) -> SudoResult<()> {
        self.backend
            .set_bool(SUDO_RULE_SUBTREE, ATTR_REFRESHED, refreshed)
    }

    /// Read the refreshed flag. A collection never marked reads `false`.
    pub fn get_refreshed(&self) -> SudoResult<bool> {
        Ok(self
            .backend
            .get_bool(SUDO_RULE_SUBTREE, ATTR_REFRESHED)?
            .unwrap_or(false))
    }

    /// Whether a full refresh should run at `now`.
    ///
    /// True while the collection is stale, when it has never been fully
    /// refreshed, or once `interval` has passed since `last_full`. An
    /// interval beyond the representable range saturates.
    pub fn full_refresh_due(
        &self,
        last_full: Option<Timestamp>,
        interval: Duration,
        now: Timestamp,
    ) -> SudoResult<bool> {
        if !self.get_refreshed()? {
            return Ok(true);
        }
        let Some(last_full) = last_full else {
            return Ok(true);
        };
        let interval = TimeDelta::from_std(interval).unwrap_or(TimeDelta::MAX);
        Ok(now.signed_duration_since(last_full) >= interval)
    }

    /// Resolve a user's numeric id and group names.
    ///
    /// Fails with `PrincipalNotFound` for an unknown user and with
    /// `InvalidRecord` when the entry has no usable uid or a group reference
    /// cannot be read.
    pub fn resolve_identity(&self, username: &str) -> SudoResult<ResolvedIdentity> {
        let record = self
            .backend
            .lookup_user_by_name(username, &[ATTR_MEMBER_OF, ATTR_UID_NUMBER])?
            .ok_or_else(|| StorageError::PrincipalNotFound {
                name: username.to_string(),
            })?;

        let invalid = |reason: String| ValidationError::InvalidRecord {
            name: username.to_string(),
            reason,
        };

        let uid = match record.first(ATTR_UID_NUMBER) {
            None => return Err(invalid("user has no uidNumber".to_string()).into()),
            Some(raw) => raw
                .parse::<u32>()
                .map_err(|e| invalid(format!("uidNumber {raw:?}: {e}")))?,
        };
        if uid == 0 {
            return Err(invalid("user has no uidNumber".to_string()).into());
        }

        let groups = record
            .values(ATTR_MEMBER_OF)
            .iter()
            .map(|dn| {
                group_name_from_dn(dn)
                    .ok_or_else(|| invalid(format!("unreadable group reference {dn:?}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ResolvedIdentity { uid, groups })
    }

    /// Rules applicable to `identity` that are active at `now`
    /// (`None` means the current time).
    pub fn lookup_rules(
        &self,
        identity: &IdentityDescriptor,
        now: Option<Timestamp>,
    ) -> SudoResult<Vec<RuleAttrs>> {
        let filter = build_lookup_filter(identity)?;
        let candidates = self.backend.search_custom(&filter, SUDO_RULE_SUBTREE, &[])?;
        select_active(&candidates, now)
    }

    /// Replace cached rules in one refresh cycle.
    ///
    /// With `scope == None` this is a full refresh: the flag is cleared, the
    /// subtree purged, `rules` stored, and only then is the flag set. With a
    /// scope only the matching rules are replaced and the flag is left
    /// untouched. Any failure returns immediately.
    pub fn refresh(
        &self,
        scope: Option<&MatchExpr>,
        rules: Vec<(String, RuleAttrs)>,
    ) -> SudoResult<RefreshSummary> {
        let full = scope.is_none();
        if full {
            self.set_refreshed(false)?;
        }

        let purged = self.purge_rules(scope)?;
        let mut stored = 0u64;
        for (name, attrs) in rules {
            self.save_rule(&name, attrs)?;
            stored += 1;
        }

        if full {
            self.set_refreshed(true)?;
        }
        tracing::info!(
            full,
            deleted = purged.deleted,
            stored,
            domain = self.backend.domain(),
            "Sudo rule refresh complete"
        );
        Ok(RefreshSummary { purged, stored })
    }
}

/// Group name from a group DN: the value of its first RDN.
///
/// `name=wheel,cn=groups,cn=ipa.test,cn=sysdb` yields `wheel`. Escaped
/// characters (`\,` or `\2c`) in the value are unescaped. Returns `None`
/// for anything that is not `attr=value[,...]` with a non-empty value.
pub fn group_name_from_dn(dn: &str) -> Option<String> {
    let (attr, rest) = dn.split_once('=')?;
    if attr.trim().is_empty() {
        return None;
    }

    let mut value: Vec<u8> = Vec::new();
    let bytes = rest.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b',' => break,
            b'\\' => {
                let next = *bytes.get(i + 1)?;
                let hex = bytes.get(i + 1..i + 3).and_then(|pair| {
                    std::str::from_utf8(pair)
                        .ok()
                        .and_then(|s| u8::from_str_radix(s, 16).ok())
                });
                match hex {
                    Some(byte) => {
                        value.push(byte);
                        i += 3;
                    }
                    None => {
                        value.push(next);
                        i += 2;
                    }
                }
            }
            other => {
                value.push(other);
                i += 1;
            }
        }
    }

    let value = String::from_utf8(value).ok()?;
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}
