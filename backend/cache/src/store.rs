use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::{CacheStats, HintCacheRow, ParseCacheRow};

/// Storage for cached operation results.
///
/// Writes are upserts on the primary key; the last writer wins. A `max_age`
/// of zero disables the age check on reads.
#[async_trait]
pub trait ResultCache: Send + Sync {
    async fn upsert_parse(&self, row: &ParseCacheRow) -> Result<()>;

    async fn find_parse(
        &self,
        image_hash: &str,
        engine: &str,
        model: &str,
        max_age: Duration,
    ) -> Result<Option<ParseCacheRow>>;

    /// Flip a stored parse to accepted. Returns false when no row matched.
    async fn mark_parse_accepted(
        &self,
        image_hash: &str,
        engine: &str,
        model: &str,
        reason: &str,
    ) -> Result<bool>;

    async fn upsert_hint(&self, row: &HintCacheRow) -> Result<()>;

    async fn find_hint(
        &self,
        image_hash: &str,
        engine: &str,
        model: &str,
        level: u8,
        max_age: Duration,
    ) -> Result<Option<HintCacheRow>>;

    /// Delete parse rows older than `older_than`. Returns the number removed.
    async fn purge_parse(&self, older_than: Duration) -> Result<usize>;

    async fn purge_hints(&self, older_than: Duration) -> Result<usize>;

    async fn stats(&self) -> Result<CacheStats>;
}
