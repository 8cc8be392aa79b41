//! Durable storage for memoized entries
//!
//! A store holds one namespace per computation plus a fingerprint table
//! keyed by computation name. Backends must apply
//! [`PersistenceStore::reconcile_fingerprint`] and
//! [`PersistenceStore::upsert_many`] atomically.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::{MemoError, Result};
use crate::memo::invalidation::{Fingerprint, Reconciliation};
use crate::memo::types::StoredEntry;
use std::fmt;

/// Storage partition of one computation
///
/// Names are restricted to `[A-Za-z_][A-Za-z0-9_]*` because backends use
/// them to build table names.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace(String);

impl Namespace {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let mut chars = name.chars();
        let valid_head = chars
            .next()
            .map(|c| c.is_ascii_alphabetic() || c == '_')
            .unwrap_or(false);
        if !valid_head || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(MemoError::InvalidNamespace(name));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "namespace '{}'", self.0)
    }
}

/// Keyed, namespaced blob store
pub trait PersistenceStore: Send + Sync {
    /// All rows of a namespace, ordered by key; empty if it does not exist
    fn load_all(&self, namespace: &Namespace) -> Result<Vec<StoredEntry>>;

    /// Insert or replace every row in one transaction
    fn upsert_many(&self, namespace: &Namespace, entries: &[StoredEntry]) -> Result<()>;

    /// Remove every row of a namespace
    fn drop_namespace(&self, namespace: &Namespace) -> Result<()>;

    /// Remove every row of a namespace and its stored fingerprint, as one unit
    ///
    /// The next reconciliation for the namespace is a first sight.
    fn forget_namespace(&self, namespace: &Namespace) -> Result<()>;

    fn get_fingerprint(&self, computation_id: &str) -> Result<Option<Fingerprint>>;

    fn set_fingerprint(&self, computation_id: &str, fingerprint: &Fingerprint) -> Result<()>;

    /// Compare `fingerprint` with the stored one and, as a single unit,
    /// drop the namespace and record the new fingerprint when they differ.
    /// First sight records the fingerprint and reports `Unchanged`.
    fn reconcile_fingerprint(
        &self,
        namespace: &Namespace,
        fingerprint: &Fingerprint,
    ) -> Result<Reconciliation>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_validation() {
        assert!(Namespace::new("square").is_ok());
        assert!(Namespace::new("_private2").is_ok());
        assert!(Namespace::new("multiply_matrix").is_ok());

        for bad in ["", "2fast", "drop table", "a;b", "naïve", "x\"y"] {
            assert!(
                matches!(Namespace::new(bad), Err(MemoError::InvalidNamespace(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_namespace_display() {
        let ns = Namespace::new("square").unwrap();
        assert_eq!(ns.as_str(), "square");
        assert_eq!(ns.to_string(), "namespace 'square'");
    }
}
