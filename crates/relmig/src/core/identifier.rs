//! Normalized identifiers and identifier validation/quoting.
//!
//! Source catalogs disagree about case: one vendor folds unquoted names to
//! upper case, another to lower case, and a dump file may contain either.
//! Every name comparison in the reconciler goes through [`Ident`], which
//! keeps the spelling as fetched but compares, hashes and orders on a
//! case-folded key. This is the only place where case-insensitive matching
//! is defined.

use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{MigrateError, Result};

/// Maximum identifier length (conservative limit across databases).
/// - PostgreSQL: 63 bytes
/// - SQL Server: 128 characters
/// - Oracle (12.2+): 128 bytes
const MAX_IDENTIFIER_LENGTH: usize = 128;

/// An identifier with case-insensitive equality, hashing and ordering.
#[derive(Clone)]
pub struct Ident {
    raw: String,
    key: String,
}

impl Ident {
    /// Create an identifier, preserving the given spelling.
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let key = normalize(&raw);
        Self { raw, key }
    }

    /// The identifier as originally spelled.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The normalized (case-folded) key used for matching.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Whether this identifier matches a raw name.
    pub fn matches(&self, other: &str) -> bool {
        self.key == normalize(other)
    }
}

/// Case-fold a name for matching.
pub fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

impl PartialEq for Ident {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Ident {}

impl Hash for Ident {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl PartialOrd for Ident {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ident {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

// Lets `HashMap<Ident, _>` be queried with an already-normalized `&str` key.
impl Borrow<str> for Ident {
    fn borrow(&self) -> &str {
        &self.key
    }
}

impl fmt::Debug for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.raw)
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl From<&str> for Ident {
    fn from(s: &str) -> Self {
        Ident::new(s)
    }
}

impl From<String> for Ident {
    fn from(s: String) -> Self {
        Ident::new(s)
    }
}

impl Serialize for Ident {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for Ident {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Ident::new(raw))
    }
}

/// Identity of a schema object: (owner, name), compared case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub owner: Ident,
    pub name: Ident,
}

impl ObjectKey {
    pub fn new(owner: impl Into<Ident>, name: impl Into<Ident>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// `owner.name` as spelled.
    pub fn qualified(&self) -> String {
        format!("{}.{}", self.owner, self.name)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.owner, self.name)
    }
}

/// Validate an identifier for security issues.
///
/// Rejects:
/// - Empty identifiers
/// - Identifiers containing null bytes (injection vector)
/// - Identifiers exceeding maximum length
///
/// # Errors
///
/// Returns `MigrateError::Config` for invalid identifiers with a descriptive message.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(MigrateError::Config(
            "Identifier cannot be empty".to_string(),
        ));
    }

    if name.contains('\0') {
        return Err(MigrateError::Config(format!(
            "Identifier contains null byte: {:?}",
            name
        )));
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(MigrateError::Config(format!(
            "Identifier exceeds maximum length of {} bytes (got {} bytes): {:?}",
            MAX_IDENTIFIER_LENGTH,
            name.len(),
            name
        )));
    }

    Ok(())
}

/// Quote an identifier with double quotes (ANSI / PostgreSQL style).
///
/// Escapes embedded double quotes by doubling them.
pub fn quote_ident(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

/// Qualify a name with its schema, both quoted.
pub fn qualify(schema: &str, name: &str) -> Result<String> {
    Ok(format!("{}.{}", quote_ident(schema)?, quote_ident(name)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeSet, HashMap};

    #[test]
    fn test_ident_case_insensitive_eq_and_hash() {
        let a = Ident::new("DEPT");
        let b = Ident::new("dept");
        assert_eq!(a, b);

        let mut map = HashMap::new();
        map.insert(a, 1);
        assert_eq!(map.get(&b), Some(&1));
        assert_eq!(map.get("dept"), Some(&1));
    }

    #[test]
    fn test_ident_preserves_spelling() {
        let id = Ident::new("OrderLines");
        assert_eq!(id.as_str(), "OrderLines");
        assert_eq!(id.key(), "orderlines");
        assert_eq!(id.to_string(), "OrderLines");
        assert!(id.matches("ORDERLINES"));
    }

    #[test]
    fn test_ident_ordering_uses_key() {
        let set: BTreeSet<Ident> = ["b", "A", "c"].into_iter().map(Ident::new).collect();
        let order: Vec<&str> = set.iter().map(|i| i.as_str()).collect();
        assert_eq!(order, vec!["A", "b", "c"]);
    }

    #[test]
    fn test_ident_serde_keeps_raw() {
        let id = Ident::new("HR");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"HR\"");
        let back: Ident = serde_json::from_str(&json).unwrap();
        assert_eq!(back.as_str(), "HR");
    }

    #[test]
    fn test_object_key_equality() {
        assert_eq!(ObjectKey::new("HR", "DEPT"), ObjectKey::new("hr", "dept"));
        assert_eq!(ObjectKey::new("HR", "DEPT").qualified(), "HR.DEPT");
    }

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("users").is_ok());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("   ").is_err());
        assert!(validate_identifier("bad\0name").is_err());
        assert!(validate_identifier(&"a".repeat(129)).is_err());
        assert!(validate_identifier(&"a".repeat(128)).is_ok());
    }

    #[test]
    fn test_quote_ident_escapes() {
        assert_eq!(quote_ident("users").unwrap(), "\"users\"");
        assert_eq!(quote_ident("ta\"ble").unwrap(), "\"ta\"\"ble\"");
        assert_eq!(
            qualify("public", "orders").unwrap(),
            "\"public\".\"orders\""
        );
    }
}
