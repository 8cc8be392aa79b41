//! In-process store, for tests and caches that only need to outlive a handle

use crate::error::{MemoError, Result};
use crate::memo::invalidation::{Fingerprint, Reconciliation};
use crate::memo::store::{Namespace, PersistenceStore};
use crate::memo::types::{CacheKey, StoredEntry};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

/// [`PersistenceStore`] kept entirely in memory
///
/// Every operation runs under one mutex, which makes reconciliation and
/// upserts atomic.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    fingerprints: HashMap<String, Fingerprint>,
    namespaces: HashMap<String, BTreeMap<CacheKey, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows stored for a namespace
    pub fn row_count(&self, namespace: &Namespace) -> Result<usize> {
        let state = self.lock()?;
        Ok(state
            .namespaces
            .get(namespace.as_str())
            .map(BTreeMap::len)
            .unwrap_or(0))
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| MemoError::Other("Lock poisoned".to_string()))
    }
}

impl PersistenceStore for MemoryStore {
    fn load_all(&self, namespace: &Namespace) -> Result<Vec<StoredEntry>> {
        let state = self.lock()?;
        Ok(state
            .namespaces
            .get(namespace.as_str())
            .map(|rows| rows.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    fn upsert_many(&self, namespace: &Namespace, entries: &[StoredEntry]) -> Result<()> {
        let mut state = self.lock()?;
        let rows = state
            .namespaces
            .entry(namespace.as_str().to_string())
            .or_default();
        for (key, value) in entries {
            rows.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    fn drop_namespace(&self, namespace: &Namespace) -> Result<()> {
        let mut state = self.lock()?;
        state.namespaces.remove(namespace.as_str());
        Ok(())
    }

    fn forget_namespace(&self, namespace: &Namespace) -> Result<()> {
        let mut state = self.lock()?;
        state.namespaces.remove(namespace.as_str());
        state.fingerprints.remove(namespace.as_str());
        Ok(())
    }

    fn get_fingerprint(&self, computation_id: &str) -> Result<Option<Fingerprint>> {
        let state = self.lock()?;
        Ok(state.fingerprints.get(computation_id).cloned())
    }

    fn set_fingerprint(&self, computation_id: &str, fingerprint: &Fingerprint) -> Result<()> {
        let mut state = self.lock()?;
        state
            .fingerprints
            .insert(computation_id.to_string(), fingerprint.clone());
        Ok(())
    }

    fn reconcile_fingerprint(
        &self,
        namespace: &Namespace,
        fingerprint: &Fingerprint,
    ) -> Result<Reconciliation> {
        let mut state = self.lock()?;
        let id = namespace.as_str().to_string();

        let stored = state.fingerprints.get(&id).cloned();
        let outcome = match stored {
            Some(stored) if &stored == fingerprint => Reconciliation::Unchanged,
            Some(_) => {
                state.namespaces.remove(&id);
                Reconciliation::Invalidated
            }
            None => Reconciliation::Unchanged,
        };

        state.fingerprints.insert(id.clone(), fingerprint.clone());
        state.namespaces.entry(id).or_default();
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ns(name: &str) -> Namespace {
        Namespace::new(name).unwrap()
    }

    #[test]
    fn test_load_missing_namespace_is_empty() {
        let store = MemoryStore::new();
        assert!(store.load_all(&ns("nothing")).unwrap().is_empty());
    }

    #[test]
    fn test_upsert_replaces_and_orders_by_key() {
        let store = MemoryStore::new();
        let square = ns("square");

        store
            .upsert_many(
                &square,
                &[("b".to_string(), vec![2]), ("a".to_string(), vec![1])],
            )
            .unwrap();
        store
            .upsert_many(&square, &[("b".to_string(), vec![20])])
            .unwrap();

        let rows = store.load_all(&square).unwrap();
        assert_eq!(
            rows,
            vec![("a".to_string(), vec![1]), ("b".to_string(), vec![20])]
        );
        assert_eq!(store.row_count(&square).unwrap(), 2);
    }

    #[test]
    fn test_namespaces_are_isolated() {
        let store = MemoryStore::new();
        store
            .upsert_many(&ns("square"), &[("k".to_string(), vec![1])])
            .unwrap();

        assert!(store.load_all(&ns("cube")).unwrap().is_empty());

        store.drop_namespace(&ns("square")).unwrap();
        assert!(store.load_all(&ns("square")).unwrap().is_empty());
    }

    #[test]
    fn test_case_differing_namespaces_and_forget() {
        let store = MemoryStore::new();
        let lower = ns("square");
        let upper = ns("Square");
        store.set_fingerprint("square", &Fingerprint::from_hex("v1")).unwrap();
        store.upsert_many(&lower, &[("k".to_string(), vec![9])]).unwrap();
        store.upsert_many(&upper, &[("k".to_string(), vec![3])]).unwrap();

        store.forget_namespace(&upper).unwrap();
        assert_eq!(store.load_all(&lower).unwrap(), vec![("k".to_string(), vec![9])]);

        store.forget_namespace(&lower).unwrap();
        assert_eq!(store.row_count(&lower).unwrap(), 0);
        assert_eq!(store.get_fingerprint("square").unwrap(), None);
    }

    #[test]
    fn test_fingerprint_accessors() {
        let store = MemoryStore::new();
        assert_eq!(store.get_fingerprint("square").unwrap(), None);

        let fp = Fingerprint::from_hex("abc");
        store.set_fingerprint("square", &fp).unwrap();
        assert_eq!(store.get_fingerprint("square").unwrap(), Some(fp));
    }
}
