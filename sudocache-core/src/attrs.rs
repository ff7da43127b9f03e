//! Attribute bags for cached rules and principals.
//!
//! A [`RuleAttrs`] is an ordered multimap: each attribute name maps to an
//! ordered list of string values. Value order is exactly the stored order,
//! which matters for validity bounds where the last `sudoNotAfter` entry wins.
//! Attribute names compare ASCII case-insensitively, as directory attribute
//! names do.

use serde::{Deserialize, Serialize};

/// A single named attribute with its values in stored order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub values: Vec<String>,
}

/// Ordered attribute-name to ordered-values mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleAttrs {
    entries: Vec<Attribute>,
}

impl RuleAttrs {
    /// Create an empty attribute bag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value to `name`, creating the attribute if needed.
    pub fn add_string(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.position(&name) {
            Some(idx) => self.entries[idx].values.push(value),
            None => self.entries.push(Attribute {
                name,
                values: vec![value],
            }),
        }
    }

    /// Append `value` unless the attribute already carries it.
    pub fn add_string_unique(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        if self.values(&name).iter().any(|v| *v == value) {
            return;
        }
        self.add_string(name, value);
    }

    /// Replace all values of `name`.
    pub fn set_values(&mut self, name: impl Into<String>, values: Vec<String>) {
        let name = name.into();
        match self.position(&name) {
            Some(idx) => self.entries[idx].values = values,
            None => self.entries.push(Attribute { name, values }),
        }
    }

    /// Builder-style [`add_string`](Self::add_string).
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.add_string(name, value);
        self
    }

    /// Values of `name` in stored order; empty when the attribute is absent.
    pub fn values(&self, name: &str) -> &[String] {
        self.position(name)
            .map(|idx| self.entries[idx].values.as_slice())
            .unwrap_or(&[])
    }

    /// Values of `name`, or `None` if absent or present with no values.
    pub fn string_array(&self, name: &str) -> Option<&[String]> {
        let values = self.values(name);
        if values.is_empty() {
            None
        } else {
            Some(values)
        }
    }

    /// First value of a single-valued attribute.
    pub fn first(&self, name: &str) -> Option<&str> {
        self.values(name).first().map(String::as_str)
    }

    /// Whether the attribute exists with at least one value.
    pub fn contains(&self, name: &str) -> bool {
        !self.values(name).is_empty()
    }

    /// Remove an attribute entirely, returning its values.
    pub fn remove(&mut self, name: &str) -> Option<Vec<String>> {
        self.position(name)
            .map(|idx| self.entries.remove(idx).values)
    }

    /// Keep only the listed attributes. An empty list keeps everything.
    pub fn project(&self, names: &[&str]) -> RuleAttrs {
        if names.is_empty() {
            return self.clone();
        }
        RuleAttrs {
            entries: self
                .entries
                .iter()
                .filter(|attr| names.iter().any(|n| n.eq_ignore_ascii_case(&attr.name)))
                .cloned()
                .collect(),
        }
    }

    /// Iterate over attributes in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Attribute> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|attr| attr.name.eq_ignore_ascii_case(name))
    }
}

impl<N, V> FromIterator<(N, V)> for RuleAttrs
where
    N: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut attrs = RuleAttrs::new();
        for (name, value) in iter {
            attrs.add_string(name, value);
        }
        attrs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_values_keep_stored_order() {
        let attrs = RuleAttrs::new()
            .with("sudoNotAfter", "202501010000Z")
            .with("sudoNotAfter", "202101010000Z");
        assert_eq!(
            attrs.values("sudoNotAfter"),
            &["202501010000Z".to_string(), "202101010000Z".to_string()]
        );
    }

    #[test]
    fn test_names_are_case_insensitive() {
        let attrs = RuleAttrs::new().with("sudoUser", "alice");
        assert_eq!(attrs.first("SUDOUSER"), Some("alice"));
        assert!(attrs.contains("sudouser"));
        assert_eq!(attrs.len(), 1);
    }

    #[test]
    fn test_empty_value_list_reads_as_absent() {
        let mut attrs = RuleAttrs::new();
        attrs.set_values("sudoNotBefore", vec![]);
        assert!(attrs.string_array("sudoNotBefore").is_none());
        assert!(!attrs.contains("sudoNotBefore"));
        assert!(attrs.string_array("missing").is_none());
    }

    #[test]
    fn test_add_string_unique() {
        let mut attrs = RuleAttrs::new().with("objectClass", "sudoRule");
        attrs.add_string_unique("objectClass", "sudoRule");
        attrs.add_string_unique("objectClass", "top");
        assert_eq!(attrs.values("objectClass").len(), 2);
    }

    #[test]
    fn test_project_and_remove() {
        let mut attrs: RuleAttrs = vec![("name", "r1"), ("cn", "r1"), ("sudoUser", "bob")]
            .into_iter()
            .collect();
        let projected = attrs.project(&["NAME", "sudoUser"]);
        assert_eq!(projected.len(), 2);
        assert!(!projected.contains("cn"));
        assert_eq!(attrs.project(&[]).len(), 3);

        assert_eq!(attrs.remove("cn"), Some(vec!["r1".to_string()]));
        assert_eq!(attrs.remove("cn"), None);
    }
}
