//! Attaching computations to a store and serving memoized calls
//!
//! Lifecycle of one attached computation:
//!
//! ```text
//! Uninitialized -> Loading -> Ready -> Flushed
//! ```
//!
//! [`CacheEngine::attach`] runs `Loading` (fingerprint reconciliation and
//! load) and hands back a [`MemoHandle`] in `Ready`. [`MemoHandle::flush`]
//! writes resident entries and stays `Ready`; [`MemoHandle::detach`]
//! flushes and moves to `Flushed`, after which calls are refused.

use crate::error::{MemoError, Result};
use crate::memo::codec::{BlobCodec, ValueKind};
use crate::memo::config::MemoConfig;
use crate::memo::eviction::EvictionCache;
use crate::memo::invalidation::{
    ComputationIdentity, Fingerprint, FingerprintTracker, Reconciliation,
};
use crate::memo::key::{CallArgs, KeyDeriver};
use crate::memo::store::{Namespace, PersistenceStore};
use crate::memo::types::{CacheKey, MemoStats, StoredEntry, Value};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// A deterministic computation that can be memoized
///
/// The engine trusts that `compute` is pure: equal arguments give equal
/// results, and skipping a call on a hit is unobservable apart from side
/// effects that were never meant to repeat.
pub trait Computation: Send + Sync {
    /// Name, source and description; the name selects the namespace
    fn identity(&self) -> &ComputationIdentity;

    fn compute(&self, args: &CallArgs) -> impl Future<Output = anyhow::Result<Value>> + Send;
}

/// [`Computation`] backed by a synchronous closure
pub struct FnComputation<F> {
    identity: ComputationIdentity,
    func: F,
}

impl<F> FnComputation<F>
where
    F: Fn(&CallArgs) -> anyhow::Result<Value> + Send + Sync,
{
    pub fn new(identity: ComputationIdentity, func: F) -> Self {
        Self { identity, func }
    }
}

impl<F> Computation for FnComputation<F>
where
    F: Fn(&CallArgs) -> anyhow::Result<Value> + Send + Sync,
{
    fn identity(&self) -> &ComputationIdentity {
        &self.identity
    }

    async fn compute(&self, args: &CallArgs) -> anyhow::Result<Value> {
        (self.func)(args)
    }
}

/// Lifecycle state of an attached computation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleState {
    Uninitialized,
    Loading,
    Ready,
    Flushed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::Uninitialized => write!(f, "uninitialized"),
            LifecycleState::Loading => write!(f, "loading"),
            LifecycleState::Ready => write!(f, "ready"),
            LifecycleState::Flushed => write!(f, "flushed"),
        }
    }
}

/// Binds computations to a persistence store
pub struct CacheEngine {
    store: Arc<dyn PersistenceStore>,
    config: MemoConfig,
}

impl CacheEngine {
    /// Create an engine with the default configuration
    pub fn new(store: Arc<dyn PersistenceStore>) -> Self {
        Self::with_config(store, MemoConfig::default())
    }

    /// Create an engine whose attachments use `config` unless overridden
    pub fn with_config(store: Arc<dyn PersistenceStore>, config: MemoConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &MemoConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn PersistenceStore> {
        self.store.clone()
    }

    /// Attach a computation using the engine's configuration
    pub fn attach<C: Computation>(&self, computation: C, kind: ValueKind) -> Result<MemoHandle<C>> {
        self.attach_with_config(computation, kind, self.config.clone())
    }

    /// Attach a computation, loading whatever its namespace still holds
    ///
    /// Fails without wrapping anything if the configuration is invalid, the
    /// name is not a valid namespace, the source is missing, or the store
    /// cannot be read.
    pub fn attach_with_config<C: Computation>(
        &self,
        computation: C,
        kind: ValueKind,
        config: MemoConfig,
    ) -> Result<MemoHandle<C>> {
        config.validate()?;
        let capacity = config.capacity_nonzero()?;

        let identity = computation.identity();
        let namespace = Namespace::new(identity.name.clone())?;
        let fingerprint = FingerprintTracker::current_fingerprint(identity)?;
        debug!("{} -> {}", namespace, LifecycleState::Loading);

        let reconciliation =
            FingerprintTracker::reconcile(self.store.as_ref(), &namespace, &fingerprint)?;
        let rows = self.store.load_all(&namespace)?;

        let codec = BlobCodec::new(kind);
        let mut cache = EvictionCache::new(capacity);
        let mut stats = MemoStats::default();
        let total_rows = rows.len();

        for (key, bytes) in rows {
            match codec.decode(&bytes) {
                Ok(value) => {
                    cache.put(key, value);
                    stats.loaded += 1;
                }
                Err(e) => {
                    warn!("Skipping unreadable row {} in {}: {}", key, namespace, e);
                    stats.skipped_on_load += 1;
                }
            }
        }
        stats.entries = cache.len();

        if total_rows > cache.len() + stats.skipped_on_load as usize {
            debug!(
                "{} holds {} rows, kept {} within capacity {}",
                namespace,
                total_rows,
                cache.len(),
                capacity
            );
        }

        info!(
            "Attached {} ({} kind, {}): {} entries resident",
            namespace,
            kind,
            reconciliation,
            cache.len()
        );

        Ok(MemoHandle {
            computation,
            namespace,
            fingerprint,
            reconciliation,
            codec,
            store: self.store.clone(),
            config,
            inner: RwLock::new(HandleState {
                cache,
                stats,
                lifecycle: LifecycleState::Ready,
                pending: 0,
            }),
        })
    }

    /// Drop every persisted entry of a computation and its stored fingerprint
    ///
    /// The next attach under this name starts empty and records a fresh
    /// fingerprint.
    pub fn invalidate(&self, name: &str) -> Result<()> {
        let namespace = Namespace::new(name)?;
        self.store.forget_namespace(&namespace)?;
        info!("Invalidated {}", namespace);
        Ok(())
    }
}

struct HandleState {
    cache: EvictionCache<CacheKey, Value>,
    stats: MemoStats,
    lifecycle: LifecycleState,

    /// Entries inserted since the last successful flush
    pending: usize,
}

/// A memoized computation bound to its namespace
///
/// All cache mutations go through one lock; the computation itself runs
/// outside it, so concurrent misses on different keys do not serialize.
/// Two concurrent misses on the same key may both compute; the later
/// insert wins.
pub struct MemoHandle<C> {
    computation: C,
    namespace: Namespace,
    fingerprint: Fingerprint,
    reconciliation: Reconciliation,
    codec: BlobCodec,
    store: Arc<dyn PersistenceStore>,
    config: MemoConfig,
    inner: RwLock<HandleState>,
}

impl<C: Computation> MemoHandle<C> {
    /// Call the computation, serving a cached result when one exists
    ///
    /// Errors from the computation are returned as
    /// [`MemoError::Computation`] and nothing is cached for that call.
    pub async fn call(&self, args: &CallArgs) -> Result<Value> {
        let key = KeyDeriver::derive(args);

        {
            let mut inner = self.inner.write().await;
            self.ensure_ready(&inner)?;

            if let Some(value) = inner.cache.get(&key).cloned() {
                inner.stats.hits += 1;
                debug!("Cache hit in {}: {}", self.namespace, key);
                return Ok(value);
            }

            inner.stats.misses += 1;
            debug!("Cache miss in {}: {}", self.namespace, key);
        }

        let value = self.computation.compute(args).await?;
        self.codec.check(&value)?;

        let mut inner = self.inner.write().await;
        if inner.lifecycle != LifecycleState::Ready {
            debug!("{} detached during computation, result not cached", self.namespace);
            return Ok(value);
        }

        if let Some((evicted, _)) = inner.cache.put(key, value.clone()) {
            inner.stats.evictions += 1;
            debug!("Evicted from {}: {}", self.namespace, evicted);
        }
        inner.stats.entries = inner.cache.len();
        inner.pending += 1;

        Ok(value)
    }

    /// Shorthand for a call with positional arguments only
    pub async fn call_positional<I, V>(&self, values: I) -> Result<Value>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.call(&CallArgs::positional(values)).await
    }

    /// Write every resident entry to the store; the handle stays usable
    ///
    /// A failed write is retried `flush_retries` times before the error is
    /// returned. Returns the number of rows written.
    pub async fn flush(&self) -> Result<usize> {
        let mut inner = self.inner.write().await;
        self.ensure_ready(&inner)?;
        self.flush_locked(&mut inner).await
    }

    /// Flush and stop serving calls
    ///
    /// On a failed flush the handle stays `Ready` so detach can be retried.
    /// Detaching an already detached handle is a no-op returning 0.
    pub async fn detach(&self) -> Result<usize> {
        let mut inner = self.inner.write().await;
        if inner.lifecycle == LifecycleState::Flushed {
            return Ok(0);
        }

        let written = self.flush_locked(&mut inner).await?;
        inner.lifecycle = LifecycleState::Flushed;
        inner.cache.clear();
        inner.stats.entries = 0;

        info!("Detached {} after writing {} entries", self.namespace, written);
        Ok(written)
    }

    async fn flush_locked(&self, inner: &mut HandleState) -> Result<usize> {
        let rows = inner
            .cache
            .entries()
            .map(|(key, value)| Ok((key.clone(), self.codec.encode(value)?)))
            .collect::<Result<Vec<StoredEntry>>>()?;

        self.write_with_retry(&rows).await?;

        inner.stats.flushed += rows.len() as u64;
        inner.stats.last_flush_at = Some(Utc::now());
        inner.pending = 0;

        debug!("Flushed {} entries of {}", rows.len(), self.namespace);
        Ok(rows.len())
    }

    async fn write_with_retry(&self, rows: &[StoredEntry]) -> Result<()> {
        let max_attempts = self.config.flush_retries + 1;
        let mut attempt = 1;

        loop {
            match self.store.upsert_many(&self.namespace, rows) {
                Ok(()) => return Ok(()),
                Err(e) if attempt < max_attempts && e.is_retryable() => {
                    warn!(
                        "Flush of {} failed (attempt {}/{}), retrying after {:?}: {}",
                        self.namespace, attempt, max_attempts, self.config.flush_retry_delay, e
                    );
                    attempt += 1;
                    tokio::time::sleep(self.config.flush_retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn ensure_ready(&self, inner: &HandleState) -> Result<()> {
        match inner.lifecycle {
            LifecycleState::Ready => Ok(()),
            _ => Err(MemoError::Detached(self.namespace.as_str().to_string())),
        }
    }
}

impl<C> MemoHandle<C> {
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// What fingerprint reconciliation decided at attach
    pub fn reconciliation(&self) -> Reconciliation {
        self.reconciliation
    }

    pub fn kind(&self) -> ValueKind {
        self.codec.kind()
    }

    pub async fn state(&self) -> LifecycleState {
        self.inner.read().await.lifecycle
    }

    pub async fn stats(&self) -> MemoStats {
        self.inner.read().await.stats.clone()
    }

    /// Number of resident entries
    pub async fn len(&self) -> usize {
        self.inner.read().await.cache.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.cache.is_empty()
    }

    /// Whether a call with `args` would be a hit (recency is not touched)
    pub async fn contains(&self, args: &CallArgs) -> bool {
        let key = KeyDeriver::derive(args);
        self.inner.read().await.cache.peek(&key).is_some()
    }
}

impl<C> Drop for MemoHandle<C> {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        if inner.lifecycle == LifecycleState::Ready && inner.pending > 0 {
            warn!(
                "{} dropped without detach; {} new entries were not persisted",
                self.namespace, inner.pending
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memo::store::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn square(
        counter: Arc<AtomicUsize>,
    ) -> FnComputation<impl Fn(&CallArgs) -> anyhow::Result<Value> + Send + Sync> {
        FnComputation::new(
            ComputationIdentity::new("square", "fn square(x: i64) -> i64 { x * x }"),
            move |args: &CallArgs| {
                counter.fetch_add(1, Ordering::SeqCst);
                let x = args
                    .get(0)
                    .and_then(Value::as_int)
                    .ok_or_else(|| anyhow::anyhow!("square expects one integer"))?;
                Ok(Value::Int(x * x))
            },
        )
    }

    fn engine(capacity: usize) -> CacheEngine {
        CacheEngine::with_config(
            Arc::new(MemoryStore::new()),
            MemoConfig::builder().capacity(capacity).build(),
        )
    }

    #[tokio::test]
    async fn test_hit_does_not_recompute() {
        let counter = Arc::new(AtomicUsize::new(0));
        let handle = engine(10)
            .attach(square(counter.clone()), ValueKind::Integer)
            .unwrap();

        assert_eq!(handle.call_positional([3i64]).await.unwrap(), Value::Int(9));
        assert_eq!(handle.call_positional([3i64]).await.unwrap(), Value::Int(9));
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        let stats = handle.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
    }

    #[tokio::test]
    async fn test_lru_sequence_with_capacity_two() {
        let counter = Arc::new(AtomicUsize::new(0));
        let handle = engine(2)
            .attach(square(counter.clone()), ValueKind::Integer)
            .unwrap();

        handle.call_positional([2i64]).await.unwrap();
        handle.call_positional([3i64]).await.unwrap();
        handle.call_positional([4i64]).await.unwrap(); // evicts 2
        assert_eq!(counter.load(Ordering::SeqCst), 3);

        assert_eq!(handle.call_positional([2i64]).await.unwrap(), Value::Int(4)); // evicts 3
        assert_eq!(counter.load(Ordering::SeqCst), 4);

        assert_eq!(handle.call_positional([4i64]).await.unwrap(), Value::Int(16));
        assert_eq!(counter.load(Ordering::SeqCst), 4);

        assert!(!handle.contains(&CallArgs::positional([3i64])).await);
        assert_eq!(handle.len().await, 2);
        assert_eq!(handle.stats().await.evictions, 2);
    }

    #[tokio::test]
    async fn test_computation_error_is_not_cached() {
        let counter = Arc::new(AtomicUsize::new(0));
        let handle = engine(10)
            .attach(square(counter.clone()), ValueKind::Integer)
            .unwrap();

        let bad = CallArgs::new().arg("three");
        let err = handle.call(&bad).await.unwrap_err();
        assert!(matches!(err, MemoError::Computation(_)));
        assert_eq!(err.to_string(), "square expects one integer");

        assert!(handle.call(&bad).await.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert!(handle.is_empty().await);
    }

    #[tokio::test]
    async fn test_wrong_result_kind_is_not_cached() {
        let handle = engine(10)
            .attach(
                FnComputation::new(
                    ComputationIdentity::new("stringly", "fn stringly() -> String"),
                    |_: &CallArgs| Ok(Value::Text("4".to_string())),
                ),
                ValueKind::Integer,
            )
            .unwrap();

        let err = handle.call(&CallArgs::new()).await.unwrap_err();
        assert!(matches!(err, MemoError::SerializationError(_)));
        assert!(handle.is_empty().await);
    }

    #[tokio::test]
    async fn test_detach_refuses_further_calls() {
        let counter = Arc::new(AtomicUsize::new(0));
        let handle = engine(10)
            .attach(square(counter.clone()), ValueKind::Integer)
            .unwrap();

        handle.call_positional([5i64]).await.unwrap();
        assert_eq!(handle.detach().await.unwrap(), 1);
        assert_eq!(handle.state().await, LifecycleState::Flushed);

        assert!(matches!(
            handle.call_positional([5i64]).await,
            Err(MemoError::Detached(_))
        ));
        assert!(matches!(handle.flush().await, Err(MemoError::Detached(_))));

        // second detach is a no-op
        assert_eq!(handle.detach().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_flush_is_repeatable_while_ready() {
        let counter = Arc::new(AtomicUsize::new(0));
        let handle = engine(10)
            .attach(square(counter.clone()), ValueKind::Integer)
            .unwrap();

        handle.call_positional([1i64]).await.unwrap();
        assert_eq!(handle.flush().await.unwrap(), 1);
        handle.call_positional([2i64]).await.unwrap();
        assert_eq!(handle.flush().await.unwrap(), 2);

        assert_eq!(handle.state().await, LifecycleState::Ready);
        let stats = handle.stats().await;
        assert_eq!(stats.flushed, 3);
        assert!(stats.last_flush_at.is_some());
    }

    #[tokio::test]
    async fn test_attach_rejects_bad_inputs() {
        let engine = engine(10);

        let bad_name = FnComputation::new(
            ComputationIdentity::new("not a table", "fn f() {}"),
            |_: &CallArgs| Ok(Value::Int(1)),
        );
        assert!(matches!(
            engine.attach(bad_name, ValueKind::Integer),
            Err(MemoError::InvalidNamespace(_))
        ));

        let no_source = FnComputation::new(
            ComputationIdentity::new("opaque", ""),
            |_: &CallArgs| Ok(Value::Int(1)),
        );
        assert!(matches!(
            engine.attach(no_source, ValueKind::Integer),
            Err(MemoError::FingerprintUnavailable(_))
        ));

        let counter = Arc::new(AtomicUsize::new(0));
        let zero = MemoConfig::builder().capacity(0).build();
        assert!(matches!(
            engine.attach_with_config(square(counter), ValueKind::Integer, zero),
            Err(MemoError::ConfigError(_))
        ));
    }

    #[test]
    fn test_drop_without_detach_writes_nothing() {
        let store = Arc::new(MemoryStore::new());
        let engine = CacheEngine::new(store.clone());
        let counter = Arc::new(AtomicUsize::new(0));

        let handle = engine
            .attach(square(counter.clone()), ValueKind::Integer)
            .unwrap();
        let value = tokio_test::block_on(handle.call_positional([9i64])).unwrap();
        assert_eq!(value, Value::Int(81));
        drop(handle);

        let namespace = Namespace::new("square").unwrap();
        assert_eq!(store.row_count(&namespace).unwrap(), 0);
    }

    #[test]
    fn test_lifecycle_display() {
        assert_eq!(LifecycleState::Ready.to_string(), "ready");
        assert_eq!(LifecycleState::Flushed.to_string(), "flushed");
    }
}
