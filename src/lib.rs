pub mod adaptive;
pub mod config;
pub mod logging;
pub mod storage;

pub use adaptive::AdaptiveEngine;
pub use storage::{MemoryStore, SqliteStore, StorageError, StorageResult};
