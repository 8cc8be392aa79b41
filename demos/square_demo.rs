//! Square Memoization Demo
//!
//! Attaches a slow `square` to a SQLite store, calls it a few times and
//! detaches. Run it twice: the second run answers from disk.
//!
//! Usage:
//!   cargo run --example square_demo
//!
//! Environment variables:
//!   MEMO_DB_PATH  - database file (default: <tmp>/square_demo.db)
//!   MEMO_CAPACITY - in-memory entries per computation (default: 2)
//!   RUST_LOG      - log filter (default: info)

use ouroboros_memo::memo::config::{ENV_CAPACITY, ENV_DB_PATH};
use ouroboros_memo::{
    CacheEngine, CallArgs, ComputationIdentity, FnComputation, MemoConfig, SqliteStore,
    StoreConfig, Value, ValueKind,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    info!("=== Square Memoization Demo ===");

    let store_config = if std::env::var(ENV_DB_PATH).is_ok() {
        StoreConfig::from_env()?
    } else {
        StoreConfig::file(std::env::temp_dir().join("square_demo.db"))
    };
    let config = if std::env::var(ENV_CAPACITY).is_ok() {
        MemoConfig::from_env()?
    } else {
        MemoConfig::builder().capacity(2).build()
    };

    let store = SqliteStore::open(&store_config)?;
    let engine = CacheEngine::with_config(Arc::new(store), config);

    let square = FnComputation::new(
        ComputationIdentity::new(
            "square",
            "fn square(x: i64) -> i64 { sleep(200ms); x * x }",
        )
        .with_description("squares an integer, slowly"),
        |args: &CallArgs| {
            let x = args
                .get(0)
                .and_then(Value::as_int)
                .ok_or_else(|| anyhow::anyhow!("square expects one integer"))?;
            std::thread::sleep(Duration::from_millis(200));
            Ok(Value::Int(x * x))
        },
    );

    let handle = engine.attach(square, ValueKind::Integer)?;
    info!(
        "Attached {} ({}), {} entries loaded",
        handle.namespace(),
        handle.reconciliation(),
        handle.len().await
    );

    for x in [2i64, 3, 4, 2, 3] {
        let started = Instant::now();
        let value = handle.call_positional([x]).await?;
        info!("square({}) = {:?} in {:?}", x, value, started.elapsed());
    }

    info!("\n--- Statistics ---");
    info!("{}", handle.stats().await);

    let written = handle.detach().await?;
    info!("Wrote {} entries to {}", written, store_config.location);

    Ok(())
}
