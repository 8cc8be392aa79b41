//! # Persistent Memoization
//!
//! This module wraps deterministic computations so that repeated calls with
//! equal arguments are answered from a cache, and so that cached results
//! survive process restarts.
//!
//! ## Features
//!
//! - **Deterministic Keys**: SHA-256 over a typed canonical rendering of the arguments
//! - **Fingerprint Invalidation**: Editing a computation's source or description drops its entries
//! - **LRU Eviction**: Bounded in-memory cache per computation
//! - **Pluggable Storage**: SQLite and in-memory stores behind one trait
//! - **Declared Value Kinds**: One codec per computation, chosen at attach time
//!
//! ## Lifecycle
//!
//! Entries are loaded once at attach and written back on `flush`/`detach`.
//! Recency does not carry over between runs: everything loaded starts out
//! equally fresh.
//!
//! ## Example
//!
//! ```rust
//! use ouroboros_memo::memo::{
//!     CacheEngine, CallArgs, ComputationIdentity, FnComputation, MemoConfig, SqliteStore,
//!     ValueKind,
//! };
//! use ouroboros_memo::Value;
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let store = Arc::new(SqliteStore::in_memory()?);
//! let engine = CacheEngine::with_config(store, MemoConfig::builder().capacity(2).build());
//!
//! let square = FnComputation::new(
//!     ComputationIdentity::new("square", "fn square(x: i64) -> i64 { x * x }"),
//!     |args: &CallArgs| {
//!         let x = args.get(0).and_then(Value::as_int).unwrap_or_default();
//!         Ok(Value::Int(x * x))
//!     },
//! );
//!
//! let handle = engine.attach(square, ValueKind::Integer)?;
//! assert_eq!(handle.call_positional([4i64]).await?, Value::Int(16));
//! handle.detach().await?;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod engine;
pub mod eviction;
pub mod invalidation;
pub mod key;
pub mod store;
pub mod types;

pub use codec::{BlobCodec, ValueKind};
pub use config::{MemoConfig, MemoConfigBuilder, StoreConfig, StoreLocation};
pub use engine::{CacheEngine, Computation, FnComputation, LifecycleState, MemoHandle};
pub use eviction::EvictionCache;
pub use invalidation::{ComputationIdentity, Fingerprint, FingerprintTracker, Reconciliation};
pub use key::{CallArgs, KeyDeriver};
pub use store::{MemoryStore, Namespace, PersistenceStore, SqliteStore};
pub use types::{CacheKey, MemoStats, StoredEntry, Tensor, Value};
