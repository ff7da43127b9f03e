//! Lookup filter construction from an identity descriptor.
//!
//! Ownership markers in `sudoUser` follow sudoers conventions: a plain name
//! is a user, `#<n>` a numeric uid, `%<name>` a group and `+<name>` a
//! netgroup. `ALL` matches everybody and the rule named `defaults` carries
//! global options.

use crate::{
    IdentityDescriptor, MatchExpr, SudoCacheError, SudoFilterFlags, SudoResult, ATTR_NAME,
    ATTR_OBJECT_CLASS, ATTR_SUDO_USER, DEFAULTS_RULE_NAME, SUDO_RULE_OBJECT_CLASS,
};

/// Build the structural match expression for `identity`.
///
/// Clauses are OR'ed in a fixed order: `ALL`, `defaults`, username, `#uid`,
/// one `%group` per group in list order, then the netgroup wildcard. The
/// result is `objectClass=sudoRule` AND that group; with no clauses it is
/// just the object-class test. Identical descriptors always produce
/// identical expressions.
pub fn build_lookup_filter(identity: &IdentityDescriptor) -> SudoResult<MatchExpr> {
    let flags = identity.flags;
    let username = identity
        .username
        .as_deref()
        .filter(|_| flags.contains(SudoFilterFlags::USERNAME));
    let uid = Some(identity.uid).filter(|uid| *uid != 0 && flags.contains(SudoFilterFlags::UID));
    let groups: &[String] = if flags.contains(SudoFilterFlags::GROUPS) {
        &identity.groups
    } else {
        &[]
    };

    let clause_count = usize::from(flags.contains(SudoFilterFlags::INCLUDE_ALL))
        + usize::from(flags.contains(SudoFilterFlags::INCLUDE_DEFAULTS))
        + usize::from(username.is_some())
        + usize::from(uid.is_some())
        + groups.len()
        + usize::from(flags.contains(SudoFilterFlags::NETGROUPS));

    let mut specific = Vec::new();
    specific
        .try_reserve_exact(clause_count)
        .map_err(|_| SudoCacheError::exhausted("lookup filter"))?;

    if flags.contains(SudoFilterFlags::INCLUDE_ALL) {
        specific.push(MatchExpr::eq(ATTR_SUDO_USER, "ALL"));
    }
    if flags.contains(SudoFilterFlags::INCLUDE_DEFAULTS) {
        specific.push(MatchExpr::eq(ATTR_NAME, DEFAULTS_RULE_NAME));
    }
    if let Some(name) = username {
        specific.push(MatchExpr::eq(ATTR_SUDO_USER, name));
    }
    if let Some(uid) = uid {
        specific.push(MatchExpr::eq(ATTR_SUDO_USER, format!("#{uid}")));
    }
    for group in groups {
        specific.push(MatchExpr::eq(ATTR_SUDO_USER, format!("%{group}")));
    }
    if flags.contains(SudoFilterFlags::NETGROUPS) {
        specific.push(MatchExpr::prefix(ATTR_SUDO_USER, "+"));
    }

    let mut outer = vec![MatchExpr::eq(ATTR_OBJECT_CLASS, SUDO_RULE_OBJECT_CLASS)];
    if !specific.is_empty() {
        outer.push(MatchExpr::or(specific));
    }
    Ok(MatchExpr::and(outer))
}
