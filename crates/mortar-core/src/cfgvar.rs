//! Configuration variables.
//!
//! Packages are configured through named variables (`config.libfoo.shared`)
//! whose values are negotiated between the package itself, its dependents,
//! and the user. The resolver's skeleton evaluates manifest expressions over
//! these values; the database persists the accepted set per package.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Error produced for a malformed variable assignment.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid configuration variable '{0}'")]
pub struct InvalidVariable(pub String);

/// A configuration variable value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Boolean value.
    Bool(bool),
    /// String value.
    String(String),
}

impl Value {
    /// Parse a value literal: `true`/`false` or a (possibly quoted) string.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        match s {
            "true" => Self::Bool(true),
            "false" => Self::Bool(false),
            _ => {
                let unquoted = s
                    .strip_prefix('\'')
                    .and_then(|r| r.strip_suffix('\''))
                    .or_else(|| s.strip_prefix('"').and_then(|r| r.strip_suffix('"')))
                    .unwrap_or(s);
                Self::String(unquoted.to_string())
            }
        }
    }

    /// The truth value used by `enable`/`accept` conditions: `false` and
    /// the empty string are falsy, everything else is truthy.
    #[must_use]
    pub fn truthy(&self) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::String(s) => !s.is_empty(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

/// An ordered set of configuration variables.
///
/// Iteration order is the variable name order, giving the set a stable
/// textual form and a stable checksum.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VariableSet {
    vars: BTreeMap<String, Value>,
}

impl VariableSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a `name = value` assignment and add it to the set.
    pub fn assign_str(&mut self, assignment: &str) -> Result<(), InvalidVariable> {
        let (name, value) = assignment
            .split_once('=')
            .ok_or_else(|| InvalidVariable(assignment.to_string()))?;
        let name = name.trim();
        if !valid_name(name) {
            return Err(InvalidVariable(assignment.to_string()));
        }
        self.vars.insert(name.to_string(), Value::parse(value));
        Ok(())
    }

    /// Set a variable.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.vars.insert(name.into(), value);
    }

    /// Look up a variable.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    /// Remove a variable, returning its value.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.vars.remove(name)
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Number of variables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Iterate variables in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Merge another set into this one; `other` wins on conflicts.
    pub fn merge(&mut self, other: &Self) {
        for (k, v) in &other.vars {
            self.vars.insert(k.clone(), v.clone());
        }
    }

    /// Stable content checksum over the name-ordered assignments.
    #[must_use]
    pub fn checksum(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for (k, v) in &self.vars {
            hasher.update(k.as_bytes());
            hasher.update(b"=");
            hasher.update(v.to_string().as_bytes());
            hasher.update(b"\n");
        }
        hasher.finalize().to_hex().to_string()
    }
}

impl fmt::Display for VariableSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (k, v) in &self.vars {
            if !first {
                write!(f, " ")?;
            }
            first = false;
            write!(f, "{k}={v}")?;
        }
        Ok(())
    }
}

fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_value_parse() {
        assert_eq!(Value::parse("true"), Value::Bool(true));
        assert_eq!(Value::parse("'abc'"), Value::String("abc".to_string()));
        assert_eq!(Value::parse("abc"), Value::String("abc".to_string()));
    }

    #[test]
    fn test_truthiness() {
        assert!(Value::Bool(true).truthy());
        assert!(!Value::Bool(false).truthy());
        assert!(!Value::String(String::new()).truthy());
        assert!(Value::String("x".to_string()).truthy());
    }

    #[test]
    fn test_assign_and_lookup() {
        let mut set = VariableSet::new();
        set.assign_str("config.libfoo.shared = true").unwrap();
        assert_eq!(set.get("config.libfoo.shared"), Some(&Value::Bool(true)));
        assert!(set.assign_str("no equals sign").is_err());
    }

    #[test]
    fn test_checksum_is_order_independent() {
        let mut a = VariableSet::new();
        a.assign_str("x = 1").unwrap();
        a.assign_str("y = 2").unwrap();

        let mut b = VariableSet::new();
        b.assign_str("y = 2").unwrap();
        b.assign_str("x = 1").unwrap();

        assert_eq!(a.checksum(), b.checksum());
    }

    #[test]
    fn test_checksum_changes_with_value() {
        let mut a = VariableSet::new();
        a.assign_str("x = 1").unwrap();
        let before = a.checksum();
        a.assign_str("x = 2").unwrap();
        assert_ne!(before, a.checksum());
    }

    #[test]
    fn test_merge_overwrites() {
        let mut a = VariableSet::new();
        a.assign_str("x = 1").unwrap();
        let mut b = VariableSet::new();
        b.assign_str("x = 2").unwrap();
        a.merge(&b);
        assert_eq!(a.get("x"), Some(&Value::String("2".to_string())));
    }
}
