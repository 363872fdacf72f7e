//! Hash and expiring-key semantics on top of an ordered byte-string store.
//!
//! - [`KvBackend`]: the raw store (in-memory `BTreeMap` or a SQLite table)
//! - [`HashKv`]: `HSET`/`HGETALL`/`EXPIRE` emulation, one JSON record per hash
//! - [`ExpiryReaper`]: background sweep of the expiry sentinel hash

pub mod backend;
pub mod config;
pub mod error;
pub mod hash;
pub mod metrics;
pub mod reaper;
pub mod time;

pub use backend::{KvBackend, MemoryBackend, SqliteBackend};
pub use config::ReaperConfig;
pub use error::KvError;
pub use hash::{ExpirySweeper, HashKv, EXPIRE_MAIN_KEY};
pub use metrics::{ReaperMetrics, ReaperStats};
pub use reaper::ExpiryReaper;
