//! # Ouroboros Memo (ouroboros-memo)
//!
//! Persistent memoization for deterministic computations.
//!
//! ## Features
//!
//! - Memoized calls keyed by a stable hash of the arguments
//! - Results persisted to SQLite and reloaded on the next attach
//! - Automatic invalidation when a computation's source or description changes
//! - Bounded memory through least-recently-used eviction
//! - Explicit lifecycle: `attach`, `call`, `flush`, `detach`
//!
//! ## Attaching a Computation
//!
//! ```no_run
//! use ouroboros_memo::{
//!     CacheEngine, CallArgs, ComputationIdentity, FnComputation, MemoConfig, SqliteStore,
//!     StoreConfig, Value, ValueKind,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = SqliteStore::open(&StoreConfig::file("function.db"))?;
//!     let engine = CacheEngine::with_config(Arc::new(store), MemoConfig::default());
//!
//!     let add = FnComputation::new(
//!         ComputationIdentity::new("add", "fn add(x: i64, y: i64) -> i64 { x + y }")
//!             .with_description("adds two integers"),
//!         |args: &CallArgs| {
//!             let x = args.get(0).and_then(Value::as_int).unwrap_or_default();
//!             let y = args.get(1).and_then(Value::as_int).unwrap_or_default();
//!             Ok(Value::Int(x + y))
//!         },
//!     );
//!
//!     let handle = engine.attach(add, ValueKind::Integer)?;
//!     let sum = handle.call(&CallArgs::new().arg(1).arg(2)).await?;
//!     println!("1 + 2 = {:?}", sum);
//!
//!     // Persist before shutting down
//!     handle.detach().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration from the Environment
//!
//! ```no_run
//! use ouroboros_memo::{MemoConfig, SqliteStore, StoreConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     // MEMO_DB_PATH is required, MEMO_CAPACITY and MEMO_BUSY_TIMEOUT_MS are optional
//!     let store = SqliteStore::open(&StoreConfig::from_env()?)?;
//!     let config = MemoConfig::from_env()?;
//!     println!("{:?} with capacity {}", store.location(), config.capacity);
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod memo;

// Re-export main types for convenience
pub use error::{MemoError, Result};
pub use memo::{
    BlobCodec, CacheEngine, CacheKey, CallArgs, Computation, ComputationIdentity, EvictionCache,
    Fingerprint, FingerprintTracker, FnComputation, KeyDeriver, LifecycleState, MemoConfig,
    MemoConfigBuilder, MemoHandle, MemoStats, MemoryStore, Namespace, PersistenceStore,
    Reconciliation, SqliteStore, StoreConfig, StoreLocation, Tensor, Value, ValueKind,
};
