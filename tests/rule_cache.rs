//! Integration tests for the file-backed rule cache.
//!
//! Exercises the full refresh path against a real directory: fetch, validate,
//! atomic replace, reload, and the fallbacks when the network misbehaves.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::watch;

use modorder_kernel::store::file::CACHE_FILE_NAME;
use modorder_kernel::{
    CacheRecord, FileRuleStore, IssueKind, LoadOrderPlanner, ModEntity, PackageId, Pin,
    RuleCache, RuleCacheError, RuleDocument, RuleFetcher, RuleStore, SourceTag,
};

// ─────────────────────────────────────────────────────────────────────────────
// Test Helpers
// ─────────────────────────────────────────────────────────────────────────────

const COMMUNITY: &[u8] = br#"{
    "timestamp": 1700000000,
    "rules": {
        "Brrainz.Harmony": {"loadTop": {"value": true}},
        "Some.UI": {
            "loadAfter": {"Ludeon.RimWorld": {"name": ["Core"]}},
            "incompatibleWith": {"Other.UI": {}}
        }
    }
}"#;

const NOT_JSON: &[u8] = b"<html>rate limited</html>";

const EMPTY_RULES: &[u8] = br#"{"rules": {}}"#;

/// Serves a scripted sequence of replies and counts calls.
struct ScriptedFetcher {
    replies: Vec<Option<&'static [u8]>>,
    calls: Arc<AtomicUsize>,
    delay: Duration,
}

impl ScriptedFetcher {
    fn new(replies: Vec<Option<&'static [u8]>>) -> Self {
        Self {
            replies,
            calls: Arc::new(AtomicUsize::new(0)),
            delay: Duration::ZERO,
        }
    }

    fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Shared call counter, readable after the fetcher moves into a cache.
    fn call_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl RuleFetcher for ScriptedFetcher {
    async fn fetch(&self) -> Result<Vec<u8>, RuleCacheError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match self.replies.get(n).copied().flatten() {
            Some(body) => Ok(body.to_vec()),
            None => Err(RuleCacheError::Network("503 Service Unavailable".into())),
        }
    }

    fn source_url(&self) -> &str {
        "https://rules.test/communityRules.json"
    }
}

fn id(s: &str) -> PackageId {
    PackageId::parse(s).unwrap()
}

// ─────────────────────────────────────────────────────────────────────────────
// Persistence
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_fetch_then_reload_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileRuleStore::in_dir(dir.path().join("cache")));
    let cache = RuleCache::new(Arc::clone(&store), ScriptedFetcher::new(vec![Some(COMMUNITY)]), 3600);

    let fetched = cache.fetch().await.unwrap();
    assert_eq!(fetched.len(), 2);
    assert!(dir.path().join("cache").join(CACHE_FILE_NAME).exists());
    let files: Vec<_> = std::fs::read_dir(dir.path().join("cache"))
        .unwrap()
        .map(|entry| entry.unwrap().file_name())
        .collect();
    assert_eq!(files, vec![std::ffi::OsString::from(CACHE_FILE_NAME)]);

    // A second cache over the same directory sees the persisted record.
    let reopened = RuleCache::new(
        Arc::new(FileRuleStore::in_dir(dir.path().join("cache"))),
        ScriptedFetcher::new(vec![]),
        3600,
    );
    let loaded = reopened.load().await.unwrap();
    assert_eq!(loaded, fetched);
    assert_eq!(loaded.timestamp, Some(1_700_000_000));
    assert_eq!(reopened.rule_for(&id("brrainz.harmony")).map(|r| r.pin), Some(Pin::Top));
    assert!(!reopened.is_stale());
}

#[tokio::test]
async fn test_malformed_download_leaves_file_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileRuleStore::in_dir(dir.path()));
    let cache = RuleCache::new(
        Arc::clone(&store),
        ScriptedFetcher::new(vec![Some(COMMUNITY), Some(NOT_JSON)]),
        3600,
    );

    cache.fetch().await.unwrap();
    let before = std::fs::read(store.path()).unwrap();

    let err = cache.fetch().await.unwrap_err();
    assert!(matches!(err, RuleCacheError::MalformedRuleData(_)));
    assert_eq!(std::fs::read(store.path()).unwrap(), before);
    assert_eq!(cache.document().len(), 2);
}

#[tokio::test]
async fn test_network_failure_surfaces_error_and_keeps_record() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileRuleStore::in_dir(dir.path()));
    let cache = RuleCache::new(Arc::clone(&store), ScriptedFetcher::new(vec![Some(COMMUNITY)]), 3600);

    cache.fetch().await.unwrap();
    let err = cache.fetch().await.unwrap_err();
    assert!(matches!(err, RuleCacheError::Network(_)));
    assert_eq!(store.load().await.unwrap().map(|r| r.rule_count), Some(2));
}

#[tokio::test]
async fn test_corrupt_file_is_storage_error() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileRuleStore::in_dir(dir.path()));
    std::fs::write(store.path(), b"{ truncated").unwrap();
    let cache = RuleCache::new(store, ScriptedFetcher::new(vec![]), 3600);

    let err = cache.load().await.unwrap_err();
    assert!(matches!(err, RuleCacheError::Storage(_)));
}

// ─────────────────────────────────────────────────────────────────────────────
// Staleness and Refresh
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_stale_record_is_refreshed() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileRuleStore::in_dir(dir.path()));
    let old = CacheRecord::new(
        RuleDocument::new(),
        "https://rules.test/communityRules.json",
        Utc::now() - ChronoDuration::days(2),
        86_400,
    );
    store.save(&old).await.unwrap();

    let cache = RuleCache::new(Arc::clone(&store), ScriptedFetcher::new(vec![Some(COMMUNITY)]), 86_400);
    cache.load().await.unwrap();
    assert!(cache.is_stale());
    assert!(cache.is_stale_at(old.fetched_at + ChronoDuration::seconds(86_401)));
    assert!(!cache.is_stale_at(old.fetched_at + ChronoDuration::seconds(60)));

    let doc = cache.refresh_if_stale(None).await;
    assert_eq!(doc.len(), 2);
    assert!(!cache.stats().stale);
}

#[tokio::test]
async fn test_refresh_without_any_record_degrades_to_empty() {
    let dir = tempfile::tempdir().unwrap();
    let cache = RuleCache::new(
        Arc::new(FileRuleStore::in_dir(dir.path())),
        ScriptedFetcher::new(vec![None]),
        86_400,
    );

    let doc = cache.refresh_if_stale(None).await;
    assert!(doc.is_empty());
    assert!(cache.is_stale());
    assert!(cache.community_rules().is_empty());
}

#[tokio::test]
async fn test_cancelled_refresh_keeps_previous_file() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileRuleStore::in_dir(dir.path()));
    let old = CacheRecord::new(
        RuleDocument::parse(COMMUNITY).unwrap(),
        "https://rules.test/communityRules.json",
        Utc::now() - ChronoDuration::days(2),
        86_400,
    );
    store.save(&old).await.unwrap();
    let before = std::fs::read(store.path()).unwrap();

    let cache = Arc::new(RuleCache::new(
        Arc::clone(&store),
        ScriptedFetcher::new(vec![Some(EMPTY_RULES)]).slow(Duration::from_secs(3600)),
        86_400,
    ));
    let (tx, rx) = watch::channel(false);
    let handle = Arc::clone(&cache).spawn_refresh(Some(rx));
    tx.send(true).unwrap();

    let doc = tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
    assert_eq!(doc.len(), 2);
    assert_eq!(std::fs::read(store.path()).unwrap(), before);
}

#[tokio::test]
async fn test_shorter_configured_ttl_applies_to_existing_record() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileRuleStore::in_dir(dir.path()));
    let written = CacheRecord::new(
        RuleDocument::parse(COMMUNITY).unwrap(),
        "https://rules.test/communityRules.json",
        Utc::now() - ChronoDuration::hours(2),
        86_400,
    );
    store.save(&written).await.unwrap();

    let cache = RuleCache::new(Arc::clone(&store), ScriptedFetcher::new(vec![Some(EMPTY_RULES)]), 3600);
    cache.load().await.unwrap();
    assert!(cache.is_stale());
    assert_eq!(cache.stats().expires_at, Some(written.fetched_at + ChronoDuration::hours(1)));

    let doc = cache.refresh_if_stale(None).await;
    assert!(doc.is_empty());
    assert!(!cache.is_stale());
}

#[tokio::test]
async fn test_concurrent_refreshes_fetch_once() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileRuleStore::in_dir(dir.path()));
    let fetcher = ScriptedFetcher::new(vec![Some(COMMUNITY), Some(EMPTY_RULES)]).slow(Duration::from_millis(50));
    let calls = fetcher.call_counter();
    let cache = Arc::new(RuleCache::new(Arc::clone(&store), fetcher, 3600));

    let first = Arc::clone(&cache).spawn_refresh(None);
    let second = Arc::clone(&cache).spawn_refresh(None);
    let (first, second) = (first.await.unwrap(), second.await.unwrap());

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(first, second);
    assert_eq!(first.len(), 2);
    assert_eq!(store.load().await.unwrap().map(|r| r.document), Some(first));
}

#[tokio::test]
async fn test_concurrent_fetches_leave_one_whole_record() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileRuleStore::in_dir(dir.path()));
    let fetcher = ScriptedFetcher::new(vec![Some(COMMUNITY), Some(EMPTY_RULES)]).slow(Duration::from_millis(20));
    let calls = fetcher.call_counter();
    let cache = Arc::new(RuleCache::new(Arc::clone(&store), fetcher, 3600));

    let (a, b) = tokio::join!(cache.fetch(), cache.fetch());
    a.unwrap();
    b.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    let reopened = RuleCache::new(
        Arc::new(FileRuleStore::in_dir(dir.path())),
        ScriptedFetcher::new(vec![]),
        3600,
    );
    assert_eq!(reopened.load().await.unwrap(), cache.document());
    let leftovers: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name())
        .filter(|name| name != CACHE_FILE_NAME)
        .collect();
    assert!(leftovers.is_empty(), "stray files: {leftovers:?}");
}

// ─────────────────────────────────────────────────────────────────────────────
// End to End
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_cached_rules_drive_planning() {
    let dir = tempfile::tempdir().unwrap();
    let cache = RuleCache::new(
        Arc::new(FileRuleStore::in_dir(dir.path())),
        ScriptedFetcher::new(vec![Some(COMMUNITY)]),
        3600,
    );
    let community = cache.refresh_if_stale(None).await;

    let entities = vec![
        ModEntity::new(id("some.ui"), "Some UI", SourceTag::Workshop, true),
        ModEntity::new(id("other.ui"), "Other UI", SourceTag::Workshop, true),
        ModEntity::new(id("ludeon.rimworld"), "Core", SourceTag::Expansion, true),
        ModEntity::new(id("brrainz.harmony"), "Harmony", SourceTag::Workshop, true),
    ];
    let reference: Vec<_> = entities.iter().map(|e| e.package_id.clone()).collect();
    let planner = LoadOrderPlanner::from_documents(&RuleDocument::new(), &community);

    let result = planner.plan(&entities, &reference).unwrap();

    assert_eq!(result.order[0], id("brrainz.harmony"));
    assert!(result.position(&id("ludeon.rimworld")) < result.position(&id("some.ui")));
    assert_eq!(result.issues_of(IssueKind::Incompatible).count(), 1);
}
