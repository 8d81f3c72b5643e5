//! Rule cache and merge.
//!
//! ## Architecture
//!
//! ```text
//! RuleFetcher (HTTP) ──bytes──► RuleDocument::parse ──► CacheRecord ──► RuleStore (atomic write)
//!                                                            │
//!                         manual RuleSet ─┐                  ▼
//!                      community RuleSet ─┼──► merge() ──► MergedRules
//!                       declared RuleSet ─┘
//! ```
//!
//! Only [`RuleCache`] mutates the persisted record. A fetched document is
//! validated before it is written, and stores replace the record atomically,
//! so readers never observe a broken or half-written document.

pub mod document;
pub mod merge;
pub mod cache;
#[cfg(feature = "fetch")]
pub mod fetch;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

pub use document::{ModRule, RuleDocument, RuleSet};
pub use merge::{merge, MergedRules, PinRule, RuleConflict};
pub use cache::{RuleCache, RuleCacheStats};
#[cfg(feature = "fetch")]
pub use fetch::HttpRuleFetcher;

/// Default time-to-live of a cached community document: 24 hours.
pub const DEFAULT_CACHE_TTL_SECS: u64 = 24 * 60 * 60;

/// Errors local to the rule cache.
///
/// None of these ever corrupt the persisted record; callers degrade to the
/// last-known-good rules.
#[derive(Debug, thiserror::Error)]
pub enum RuleCacheError {
    /// Transport failure or timeout while fetching.
    #[error("Network error: {0}")]
    Network(String),
    /// Fetched or stored bytes are not a valid rule document.
    #[error("Malformed rule data: {0}")]
    MalformedRuleData(String),
    /// Durable storage failure.
    #[error("Storage error: {0}")]
    Storage(String),
    /// Fetch was cancelled before completing.
    #[error("Fetch cancelled")]
    Cancelled,
}

impl RuleCacheError {
    /// Create a storage error from any error type.
    pub fn from_store<E: std::error::Error>(e: E) -> Self {
        Self::Storage(e.to_string())
    }
}

/// Source of raw rule document bytes.
#[async_trait]
pub trait RuleFetcher: Send + Sync {
    /// Retrieve the raw document. Must enforce a bounded timeout.
    async fn fetch(&self) -> Result<Vec<u8>, RuleCacheError>;

    /// Location the document comes from, recorded in the cache record.
    fn source_url(&self) -> &str;
}

/// Persisted community rule document with its freshness metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRecord {
    /// Schema version the record was written with.
    pub schema_version: String,
    /// Where the document was fetched from.
    pub source_url: String,
    /// When the document was fetched.
    pub fetched_at: DateTime<Utc>,
    /// When the record stops being fresh.
    pub expires_at: DateTime<Utc>,
    /// Time-to-live used to compute `expires_at`.
    pub ttl_secs: u64,
    /// Number of mods with rules.
    pub rule_count: usize,
    /// The parsed document.
    pub document: RuleDocument,
}

impl CacheRecord {
    /// Create a record for a document fetched at `fetched_at`.
    pub fn new(document: RuleDocument, source_url: impl Into<String>, fetched_at: DateTime<Utc>, ttl_secs: u64) -> Self {
        Self {
            schema_version: crate::MODORDER_SCHEMA_VERSION.to_string(),
            source_url: source_url.into(),
            fetched_at,
            expires_at: fetched_at + ttl(ttl_secs),
            ttl_secs,
            rule_count: document.len(),
            document,
        }
    }

    /// Whether the record is older than the TTL it was written with at `now`.
    pub fn is_stale_at(&self, now: DateTime<Utc>) -> bool {
        self.is_older_than(now, self.ttl_secs)
    }

    /// Whether the record is older than `ttl_secs` at `now`.
    pub fn is_older_than(&self, now: DateTime<Utc>, ttl_secs: u64) -> bool {
        now - self.fetched_at > ttl(ttl_secs)
    }
}

/// Upper bound on a configured TTL (ten years) to keep date arithmetic in range.
const MAX_TTL_SECS: u64 = 10 * 365 * 24 * 60 * 60;

fn ttl(secs: u64) -> ChronoDuration {
    ChronoDuration::seconds(secs.min(MAX_TTL_SECS) as i64)
}
