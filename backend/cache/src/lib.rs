//! Persistent caches for parse results and hints, keyed by image hash,
//! engine and model.

pub mod sqlite_store;
pub mod store;
pub mod types;

pub use sqlite_store::SqliteResultCache;
pub use store::ResultCache;
pub use types::{CacheStats, HintCacheRow, ParseCacheRow};
