//! sudocache Core - Rule Eligibility and Lookup Filters
//!
//! Pure types and algorithms for the locally cached sudo rule store:
//! - attribute bags for cached rules ([`RuleAttrs`])
//! - validity-window evaluation ([`is_active`], [`select_active`])
//! - match expressions and the identity lookup builder ([`MatchExpr`],
//!   [`build_lookup_filter`])
//!
//! Nothing here touches storage; see `sudocache-storage` for the cache
//! maintenance side.

use chrono::{DateTime, Utc};

pub mod attrs;
pub mod config;
pub mod error;
pub mod filter;
pub mod identity;
pub mod lookup;
pub mod timestamp;
pub mod validity;

pub use attrs::{Attribute, RuleAttrs};
pub use config::SudoCacheConfig;
pub use error::{ConfigError, StorageError, SudoCacheError, SudoResult, ValidationError};
pub use filter::{escape_value, MatchExpr};
pub use identity::{IdentityDescriptor, SudoFilterFlags};
pub use lookup::build_lookup_filter;
pub use timestamp::{format_timestamp, parse_timestamp, SUDO_TIME_FORMAT};
pub use validity::{filter_rules_by_time, is_active, select_active};

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

// ============================================================================
// ATTRIBUTE NAMES
// ============================================================================

/// Object class attribute present on every cached entry.
pub const ATTR_OBJECT_CLASS: &str = "objectClass";
/// Entry name; the key a rule is stored and deleted under.
pub const ATTR_NAME: &str = "name";
/// Common name carried over from the directory entry.
pub const ATTR_CN: &str = "cn";
/// Rule ownership (user, `#uid`, `%group`, `+netgroup`, `ALL`).
pub const ATTR_SUDO_USER: &str = "sudoUser";
/// Start of the validity window; earliest value is used.
pub const ATTR_NOT_BEFORE: &str = "sudoNotBefore";
/// End of the validity window; last stored value is used.
pub const ATTR_NOT_AFTER: &str = "sudoNotAfter";
/// Numeric id of a principal.
pub const ATTR_UID_NUMBER: &str = "uidNumber";
/// Group DNs a principal belongs to.
pub const ATTR_MEMBER_OF: &str = "memberOf";
/// Staleness flag attribute on the rule subtree.
pub const ATTR_REFRESHED: &str = "refreshed";

/// Object class value of cached sudo rules.
pub const SUDO_RULE_OBJECT_CLASS: &str = "sudoRule";
/// Name of the rule holding global sudo options.
pub const DEFAULTS_RULE_NAME: &str = "defaults";
/// Custom subtree holding the cached rules.
pub const SUDO_RULE_SUBTREE: &str = "sudorules";
