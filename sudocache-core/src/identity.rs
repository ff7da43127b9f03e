//! Identity descriptors used to look up applicable rules.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Selects which ownership clauses participate in a lookup filter.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SudoFilterFlags: u32 {
        /// Match rules owned by the user's name
        const USERNAME = 0x01;
        /// Match rules owned by `#<uid>`
        const UID = 0x02;
        /// Match rules owned by `%<group>` for each group
        const GROUPS = 0x04;
        /// Match rules owned by any netgroup (`+...`)
        const NETGROUPS = 0x08;
        /// Match rules owned by `ALL`
        const INCLUDE_ALL = 0x10;
        /// Match the `defaults` rule
        const INCLUDE_DEFAULTS = 0x20;
    }
}

impl SudoFilterFlags {
    /// Every clause a per-user lookup normally wants.
    pub fn user_lookup() -> Self {
        Self::all()
    }
}

impl Default for SudoFilterFlags {
    fn default() -> Self {
        Self::empty()
    }
}

// Serialized as the raw bit pattern
impl Serialize for SudoFilterFlags {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.bits().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SudoFilterFlags {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bits = u32::deserialize(deserializer)?;
        Self::from_bits(bits).ok_or_else(|| {
            serde::de::Error::custom(format!("invalid SudoFilterFlags bits: {:#04x}", bits))
        })
    }
}

/// Who is asking, and which kinds of ownership to match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityDescriptor {
    pub username: Option<String>,
    /// Numeric user id; `0` means not provided.
    pub uid: u32,
    /// Group names in the order they should appear in the filter.
    pub groups: Vec<String>,
    pub flags: SudoFilterFlags,
}

impl IdentityDescriptor {
    /// Descriptor with the given flags and no identity data.
    pub fn with_flags(flags: SudoFilterFlags) -> Self {
        Self {
            flags,
            ..Default::default()
        }
    }

    /// Full per-user descriptor with every flag set.
    pub fn for_user(username: impl Into<String>, uid: u32, groups: Vec<String>) -> Self {
        Self {
            username: Some(username.into()),
            uid,
            groups,
            flags: SudoFilterFlags::user_lookup(),
        }
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn uid(mut self, uid: u32) -> Self {
        self.uid = uid;
        self
    }

    pub fn groups(mut self, groups: Vec<String>) -> Self {
        self.groups = groups;
        self
    }

    pub fn flags(mut self, flags: SudoFilterFlags) -> Self {
        self.flags = flags;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_bits_are_stable() {
        assert_eq!(SudoFilterFlags::USERNAME.bits(), 0x01);
        assert_eq!(SudoFilterFlags::UID.bits(), 0x02);
        assert_eq!(SudoFilterFlags::GROUPS.bits(), 0x04);
        assert_eq!(SudoFilterFlags::NETGROUPS.bits(), 0x08);
        assert_eq!(SudoFilterFlags::INCLUDE_ALL.bits(), 0x10);
        assert_eq!(SudoFilterFlags::INCLUDE_DEFAULTS.bits(), 0x20);
        assert_eq!(SudoFilterFlags::user_lookup().bits(), 0x3f);
    }

    #[test]
    fn test_builder() {
        let id = IdentityDescriptor::with_flags(SudoFilterFlags::UID)
            .uid(1000)
            .username("alice")
            .groups(vec!["wheel".to_string()]);
        assert_eq!(id.uid, 1000);
        assert_eq!(id.username.as_deref(), Some("alice"));
        assert_eq!(id.flags, SudoFilterFlags::UID);
        assert_eq!(id.groups, vec!["wheel".to_string()]);
    }
}
