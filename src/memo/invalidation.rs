//! Fingerprint-based cache invalidation
//!
//! A computation is identified by its name, its source text and an optional
//! description. The fingerprint hashes source and description together, so
//! editing either one makes every persisted entry of that computation stale.
//! Invalidation is all-or-nothing per namespace.

use crate::error::{MemoError, Result};
use crate::memo::store::{Namespace, PersistenceStore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use tracing::{debug, info, warn};

/// What defines a computation for caching purposes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputationIdentity {
    /// Declared name, also the storage namespace
    pub name: String,

    /// Source text of the computation's definition
    pub source: String,

    /// Free-form description; part of the fingerprint
    pub description: Option<String>,
}

impl ComputationIdentity {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Hex SHA-256 over a computation's source and description
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Wrap a fingerprint read back from a store
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of comparing a fresh fingerprint against the stored one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reconciliation {
    /// Stored entries remain valid (or there were none)
    Unchanged,

    /// The definition changed; the namespace was emptied
    Invalidated,
}

impl fmt::Display for Reconciliation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reconciliation::Unchanged => write!(f, "unchanged"),
            Reconciliation::Invalidated => write!(f, "invalidated"),
        }
    }
}

/// Computes fingerprints and reconciles them with a store
pub struct FingerprintTracker;

impl FingerprintTracker {
    /// Fingerprint of a computation's current definition
    ///
    /// Fails closed: a computation without source text is never attached,
    /// since an empty source would make every version look identical.
    pub fn current_fingerprint(identity: &ComputationIdentity) -> Result<Fingerprint> {
        if identity.source.trim().is_empty() {
            warn!("Refusing to fingerprint '{}': no source text", identity.name);
            return Err(MemoError::FingerprintUnavailable(identity.name.clone()));
        }

        let mut hasher = Sha256::new();
        hasher.update(identity.source.as_bytes());
        if let Some(description) = &identity.description {
            hasher.update([0x1f]);
            hasher.update(description.as_bytes());
        }

        Ok(Fingerprint(format!("{:x}", hasher.finalize())))
    }

    /// Record `fingerprint` for `namespace`, emptying it if the stored one differs
    ///
    /// The compare, drop and update happen in one store transaction.
    pub fn reconcile(
        store: &dyn PersistenceStore,
        namespace: &Namespace,
        fingerprint: &Fingerprint,
    ) -> Result<Reconciliation> {
        let outcome = store.reconcile_fingerprint(namespace, fingerprint)?;

        match outcome {
            Reconciliation::Unchanged => {
                debug!("Fingerprint unchanged for {}: {}", namespace, fingerprint)
            }
            Reconciliation::Invalidated => info!(
                "Definition of {} changed, dropped all cached entries (fingerprint {})",
                namespace, fingerprint
            ),
        }

        Ok(outcome)
    }
}
