//! Durable storage backends for the rule cache record.

pub mod memory;
pub mod file;

use async_trait::async_trait;
use crate::rules::CacheRecord;

/// Trait for rule cache storage backends.
///
/// Implementations must replace the record all-or-nothing: a reader sees
/// either the previous record or the new one, never a partial write.
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Error type for store operations.
    type Error: std::error::Error + Send + Sync;

    /// Read the most recent record, `None` when nothing was stored yet.
    async fn load(&self) -> Result<Option<CacheRecord>, Self::Error>;

    /// Atomically replace the stored record.
    async fn save(&self, record: &CacheRecord) -> Result<(), Self::Error>;
}

pub use memory::InMemoryRuleStore;
pub use file::FileRuleStore;
