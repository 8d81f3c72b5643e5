//! In-memory rule store for testing.

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::rules::CacheRecord;
use super::RuleStore;

/// Error type for in-memory store.
#[derive(Debug, Clone, thiserror::Error)]
pub enum InMemoryError {
    /// Store was configured to reject writes.
    #[error("Store is read-only")]
    ReadOnly,
}

/// In-memory rule store for testing.
///
/// Swapping the whole record under a write lock gives the same
/// all-or-nothing guarantee as the file store's rename.
#[derive(Debug, Default)]
pub struct InMemoryRuleStore {
    record: RwLock<Option<CacheRecord>>,
    read_only: bool,
    saves: RwLock<usize>,
}

impl InMemoryRuleStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-seeded with a record.
    pub fn with_record(record: CacheRecord) -> Self {
        Self {
            record: RwLock::new(Some(record)),
            ..Self::default()
        }
    }

    /// Make every `save` fail (for exercising degraded paths).
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Current record, if any.
    pub fn snapshot(&self) -> Option<CacheRecord> {
        self.record.read().clone()
    }

    /// Number of successful saves.
    pub fn save_count(&self) -> usize {
        *self.saves.read()
    }
}

#[async_trait]
impl RuleStore for InMemoryRuleStore {
    type Error = InMemoryError;

    async fn load(&self) -> Result<Option<CacheRecord>, Self::Error> {
        Ok(self.record.read().clone())
    }

    async fn save(&self, record: &CacheRecord) -> Result<(), Self::Error> {
        if self.read_only {
            return Err(InMemoryError::ReadOnly);
        }
        *self.record.write() = Some(record.clone());
        *self.saves.write() += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::RuleDocument;
    use chrono::Utc;

    #[tokio::test]
    async fn test_save_and_load() {
        let store = InMemoryRuleStore::new();
        assert!(store.load().await.unwrap().is_none());

        let record = CacheRecord::new(RuleDocument::new(), "mem://rules", Utc::now(), 60);
        store.save(&record).await.unwrap();

        assert_eq!(store.load().await.unwrap(), Some(record));
        assert_eq!(store.save_count(), 1);
    }

    #[tokio::test]
    async fn test_read_only_rejects_save() {
        let store = InMemoryRuleStore::new().read_only();
        let record = CacheRecord::new(RuleDocument::new(), "mem://rules", Utc::now(), 60);
        assert!(store.save(&record).await.is_err());
        assert!(store.snapshot().is_none());
    }
}
