//! chainquery-storage: pluggable store backends for ChainQuery.
//!
//! Backends:
//! - [`memory`]: in-memory (dev/testing, no persistence)
//! - `sqlite`: SQLite via `sqlx` (embedded, single-file persistence)

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::{MemoryConnector, MemoryStore};

#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteConnector, SqliteStore};
