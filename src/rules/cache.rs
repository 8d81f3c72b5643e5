//! Owned, injectable rule cache.
//!
//! `RuleCache` is the single writer of the persisted record. It keeps the
//! current record in memory behind a `parking_lot::RwLock` so the pure
//! planning path can read it without touching storage or the network.
//!
//! ## Refresh contract
//!
//! 1. Fetch raw bytes (cancellable, bounded by the fetcher's timeout)
//! 2. Parse and validate; a malformed document is rejected before any write
//! 3. Atomically replace the stored record, then the in-memory copy
//!
//! Any failure leaves both copies untouched. A stale record keeps serving
//! until a refresh succeeds. Refreshes on one cache are serialized by an
//! async mutex held from the fetch through the in-memory swap, so concurrent
//! callers never interleave writes and a queued refresh re-checks staleness
//! before fetching again.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};

use crate::store::RuleStore;
use crate::types::{PackageId, RuleSource};
use super::document::{ModRule, RuleDocument, RuleSet};
use super::{CacheRecord, RuleCacheError, RuleFetcher};

/// Snapshot of the cache state for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleCacheStats {
    /// Whether a record is held in memory.
    pub loaded: bool,
    /// Number of mods with community rules.
    pub rule_count: usize,
    /// Upstream document timestamp.
    pub document_timestamp: Option<i64>,
    /// When the record was fetched.
    pub fetched_at: Option<DateTime<Utc>>,
    /// When the record goes stale.
    pub expires_at: Option<DateTime<Utc>>,
    /// Where the record was fetched from.
    pub source_url: Option<String>,
    /// Whether a refresh is due.
    pub stale: bool,
}

/// Cache of the community rule document.
pub struct RuleCache<S: RuleStore, F: RuleFetcher> {
    store: Arc<S>,
    fetcher: F,
    ttl_secs: u64,
    current: RwLock<Option<CacheRecord>>,
    writer: Mutex<()>,
}

impl<S: RuleStore, F: RuleFetcher> RuleCache<S, F> {
    /// Create a cache over a store and a fetcher.
    ///
    /// Nothing is read until [`load`](Self::load) or a refresh is called.
    pub fn new(store: Arc<S>, fetcher: F, ttl_secs: u64) -> Self {
        Self {
            store,
            fetcher,
            ttl_secs,
            current: RwLock::new(None),
            writer: Mutex::new(()),
        }
    }

    /// Read the most recent record from durable storage.
    ///
    /// Returns an empty document when nothing was stored yet.
    pub async fn load(&self) -> Result<RuleDocument, RuleCacheError> {
        let _writer = self.writer.lock().await;
        self.read_record().await
    }

    /// Replace the in-memory record with the stored one. Callers hold `writer`.
    async fn read_record(&self) -> Result<RuleDocument, RuleCacheError> {
        let record = self.store.load().await.map_err(RuleCacheError::from_store)?;
        match record {
            Some(record) => {
                tracing::info!(
                    rule_count = record.rule_count,
                    fetched_at = %record.fetched_at,
                    "Loaded community rules from cache"
                );
                let document = record.document.clone();
                *self.current.write() = Some(record);
                Ok(document)
            }
            None => {
                tracing::info!("No cached community rules");
                Ok(RuleDocument::new())
            }
        }
    }

    /// Fetch, validate and persist a fresh document.
    ///
    /// On `Network` or `MalformedRuleData` the existing record is left as is.
    pub async fn fetch(&self) -> Result<RuleDocument, RuleCacheError> {
        let _writer = self.writer.lock().await;
        self.download(None).await
    }

    /// [`fetch`](Self::fetch) that aborts when `cancel` turns `true`.
    ///
    /// Only the network phase is cancellable; validation and the atomic
    /// replace run to completion once the bytes are in.
    pub async fn fetch_cancellable(
        &self,
        cancel: watch::Receiver<bool>,
    ) -> Result<RuleDocument, RuleCacheError> {
        let _writer = self.writer.lock().await;
        self.download(Some(cancel)).await
    }

    /// Fetch and commit. Callers hold `writer`.
    async fn download(
        &self,
        cancel: Option<watch::Receiver<bool>>,
    ) -> Result<RuleDocument, RuleCacheError> {
        let bytes = match cancel {
            Some(mut cancel) => tokio::select! {
                biased;
                _ = cancelled(&mut cancel) => {
                    tracing::info!("Community rules fetch cancelled");
                    return Err(RuleCacheError::Cancelled);
                }
                result = self.fetcher.fetch() => result?,
            },
            None => self.fetcher.fetch().await?,
        };
        self.commit(&bytes).await
    }

    async fn commit(&self, bytes: &[u8]) -> Result<RuleDocument, RuleCacheError> {
        let document = RuleDocument::parse(bytes).inspect_err(|e| {
            tracing::warn!(error = %e, "Rejected fetched rule document; keeping existing cache");
        })?;

        let previous = self.current.read().as_ref().map(|r| r.rule_count);
        let record = CacheRecord::new(document, self.fetcher.source_url(), Utc::now(), self.ttl_secs);
        self.store.save(&record).await.map_err(RuleCacheError::from_store)?;

        tracing::info!(
            rule_count = record.rule_count,
            previous_rule_count = ?previous,
            source_url = %record.source_url,
            "Downloaded community rules"
        );
        let document = record.document.clone();
        *self.current.write() = Some(record);
        Ok(document)
    }

    /// Whether the in-memory record is stale (or absent) now.
    pub fn is_stale(&self) -> bool {
        self.is_stale_at(Utc::now())
    }

    /// Whether the in-memory record is stale (or absent) at `now`.
    ///
    /// Age is measured against this cache's TTL, not the one the record was
    /// written with, so a shorter configured TTL takes effect immediately.
    pub fn is_stale_at(&self, now: DateTime<Utc>) -> bool {
        self.current
            .read()
            .as_ref()
            .map_or(true, |record| record.is_older_than(now, self.ttl_secs))
    }

    /// Refresh only when stale, never failing.
    ///
    /// Loads from storage first if nothing is in memory. A failed refresh
    /// degrades to the last-known-good document, or an empty one.
    pub async fn refresh_if_stale(&self, cancel: Option<watch::Receiver<bool>>) -> RuleDocument {
        if !self.is_stale() {
            return self.document();
        }

        let _writer = self.writer.lock().await;
        if self.current.read().is_none() {
            if let Err(e) = self.read_record().await {
                tracing::warn!(error = %e, "Failed to read cached community rules");
            }
        }
        if !self.is_stale() {
            tracing::debug!("Community rules are fresh; skipping fetch");
            return self.document();
        }
        let result = self.download(cancel).await;
        match result {
            Ok(document) => document,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    has_fallback = self.current.read().is_some(),
                    "Community rules refresh failed; using last known good rules"
                );
                self.document()
            }
        }
    }

    /// Current document, empty when nothing is loaded.
    pub fn document(&self) -> RuleDocument {
        self.current
            .read()
            .as_ref()
            .map(|r| r.document.clone())
            .unwrap_or_default()
    }

    /// Current document as a `community` rule set.
    pub fn community_rules(&self) -> RuleSet {
        match self.current.read().as_ref() {
            Some(record) => record.document.to_rule_set(RuleSource::Community),
            None => RuleSet::new(RuleSource::Community),
        }
    }

    /// Community rule for one mod.
    pub fn rule_for(&self, id: &PackageId) -> Option<ModRule> {
        self.current.read().as_ref()?.document.rule_for(id).cloned()
    }

    /// Current cache state.
    pub fn stats(&self) -> RuleCacheStats {
        let stale = self.is_stale();
        let guard = self.current.read();
        match guard.as_ref() {
            Some(record) => RuleCacheStats {
                loaded: true,
                rule_count: record.rule_count,
                document_timestamp: record.document.timestamp,
                fetched_at: Some(record.fetched_at),
                expires_at: Some(record.fetched_at + super::ttl(self.ttl_secs)),
                source_url: Some(record.source_url.clone()),
                stale,
            },
            None => RuleCacheStats {
                loaded: false,
                rule_count: 0,
                document_timestamp: None,
                fetched_at: None,
                expires_at: None,
                source_url: None,
                stale,
            },
        }
    }

    /// The backing store.
    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S, F> RuleCache<S, F>
where
    S: RuleStore + 'static,
    F: RuleFetcher + 'static,
{
    /// Run [`refresh_if_stale`](Self::refresh_if_stale) on the runtime,
    /// off the caller's task.
    pub fn spawn_refresh(
        self: Arc<Self>,
        cancel: Option<watch::Receiver<bool>>,
    ) -> tokio::task::JoinHandle<RuleDocument> {
        tokio::spawn(async move { self.refresh_if_stale(cancel).await })
    }
}

/// Resolve once the signal reads `true`; pend forever if the sender is gone.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryRuleStore;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use std::time::Duration;

    const GOOD: &[u8] = br#"{"timestamp": 7, "rules": {"a": {"loadBefore": ["b"]}}}"#;

    enum Reply {
        Body(&'static [u8]),
        Fail,
        Hang,
    }

    struct StubFetcher(Reply);

    #[async_trait]
    impl RuleFetcher for StubFetcher {
        async fn fetch(&self) -> Result<Vec<u8>, RuleCacheError> {
            match &self.0 {
                Reply::Body(b) => Ok(b.to_vec()),
                Reply::Fail => Err(RuleCacheError::Network("connection refused".into())),
                Reply::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(RuleCacheError::Network("timed out".into()))
                }
            }
        }

        fn source_url(&self) -> &str {
            "stub://rules"
        }
    }

    fn old_record() -> CacheRecord {
        let doc = RuleDocument::parse(br#"{"rules": {"old": {"loadAfter": ["x"]}}}"#).unwrap();
        CacheRecord::new(doc, "stub://rules", Utc::now() - ChronoDuration::hours(48), 86_400)
    }

    #[tokio::test]
    async fn test_load_absent_is_empty() {
        let cache = RuleCache::new(Arc::new(InMemoryRuleStore::new()), StubFetcher(Reply::Fail), 60);
        let doc = cache.load().await.unwrap();
        assert!(doc.is_empty());
        assert!(cache.is_stale());
        assert!(!cache.stats().loaded);
    }

    #[tokio::test]
    async fn test_fetch_persists_valid_document() {
        let store = Arc::new(InMemoryRuleStore::new());
        let cache = RuleCache::new(Arc::clone(&store), StubFetcher(Reply::Body(GOOD)), 60);

        let doc = cache.fetch().await.unwrap();
        assert_eq!(doc.len(), 1);
        assert_eq!(store.save_count(), 1);
        assert!(!cache.is_stale());

        let stats = cache.stats();
        assert_eq!(stats.rule_count, 1);
        assert_eq!(stats.document_timestamp, Some(7));
        assert_eq!(stats.source_url.as_deref(), Some("stub://rules"));
    }

    #[tokio::test]
    async fn test_malformed_fetch_keeps_existing_record() {
        let seeded = old_record();
        let store = Arc::new(InMemoryRuleStore::with_record(seeded.clone()));
        let cache = RuleCache::new(Arc::clone(&store), StubFetcher(Reply::Body(b"{\"rules\": [")), 60);
        cache.load().await.unwrap();

        let err = cache.fetch().await.unwrap_err();
        assert!(matches!(err, RuleCacheError::MalformedRuleData(_)));
        assert_eq!(store.snapshot(), Some(seeded));
        assert_eq!(store.save_count(), 0);
        assert!(cache.rule_for(&PackageId::parse("old").unwrap()).is_some());
    }

    #[tokio::test]
    async fn test_failed_save_keeps_memory_unchanged() {
        let store = Arc::new(InMemoryRuleStore::new().read_only());
        let cache = RuleCache::new(store, StubFetcher(Reply::Body(GOOD)), 60);

        let err = cache.fetch().await.unwrap_err();
        assert!(matches!(err, RuleCacheError::Storage(_)));
        assert!(!cache.stats().loaded);
        assert!(cache.document().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_falls_back_to_stale_record() {
        let store = Arc::new(InMemoryRuleStore::with_record(old_record()));
        let cache = RuleCache::new(store, StubFetcher(Reply::Fail), 86_400);

        let doc = cache.refresh_if_stale(None).await;
        assert_eq!(doc.len(), 1);
        assert!(cache.is_stale());
    }

    #[tokio::test]
    async fn test_refresh_skips_network_when_fresh() {
        let fresh = CacheRecord::new(RuleDocument::parse(GOOD).unwrap(), "stub://rules", Utc::now(), 86_400);
        let store = Arc::new(InMemoryRuleStore::with_record(fresh));
        let cache = RuleCache::new(Arc::clone(&store), StubFetcher(Reply::Fail), 86_400);

        let doc = cache.refresh_if_stale(None).await;
        assert_eq!(doc.len(), 1);
        assert_eq!(store.save_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_aborts_in_flight_fetch() {
        let store = Arc::new(InMemoryRuleStore::with_record(old_record()));
        let cache = RuleCache::new(Arc::clone(&store), StubFetcher(Reply::Hang), 60);
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move { cache.fetch_cancellable(rx).await });
        tx.send(true).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
        assert!(matches!(result, Err(RuleCacheError::Cancelled)));
        assert_eq!(store.save_count(), 0);
    }
}
