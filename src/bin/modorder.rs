//! modorder CLI
//!
//! Plans a load order for a mod snapshot and prints the `OrderResult` as JSON.
//!
//! - Loads the cached community rules and refreshes them when stale
//! - Ctrl-C cancels an in-flight download without touching the cache
//! - Logs go to stderr; stdout carries only the result
//!
//! ## Configuration
//!
//! Environment variables:
//! - `MODORDER_RULES_URL`, `MODORDER_CACHE_DIR`, `MODORDER_CACHE_TTL_SECS`,
//!   `MODORDER_FETCH_TIMEOUT_SECS`: see `KernelConfig`
//! - `RUST_LOG`: Log level filter (default: info)
//! - `LOG_FORMAT`: "json" for structured logs, "pretty" for terminals (default: pretty)
//!
//! ## Usage
//!
//! ```bash
//! modorder mods.json [userRules.json] > order.json
//! ```
//!
//! `mods.json` is an array of entity descriptors in the current load order;
//! that order is the tie-break reference.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use modorder_kernel::{
    EntityDescriptor, FileRuleStore, HttpRuleFetcher, KernelConfig, LoadOrderPlanner, ModEntity,
    PackageId, RuleCache, RuleDocument,
};

/// Initialize the tracing subscriber with JSON or pretty format, writing to stderr.
fn init_tracing() {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "modorder=info,modorder_kernel=info".into());

    if log_format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(true)
                    .flatten_event(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

async fn read_entities(path: &Path) -> Result<Vec<ModEntity>, Box<dyn std::error::Error>> {
    let bytes = tokio::fs::read(path).await?;
    let descriptors: Vec<EntityDescriptor> = serde_json::from_slice(&bytes)?;
    let entities = descriptors
        .into_iter()
        .map(ModEntity::from_descriptor)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(entities)
}

async fn read_manual_rules(path: Option<&Path>) -> Result<RuleDocument, Box<dyn std::error::Error>> {
    let Some(path) = path else {
        return Ok(RuleDocument::new());
    };
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(RuleDocument::parse(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "Manual rules file not found; using none");
            Ok(RuleDocument::new())
        }
        Err(e) => Err(e.into()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let mut args = std::env::args_os().skip(1).map(PathBuf::from);
    let Some(entities_path) = args.next() else {
        eprintln!("usage: modorder <entities.json> [manual_rules.json]");
        std::process::exit(2);
    };
    let manual_path = args.next();

    let config = KernelConfig::from_env();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        rules_url = %config.rules_url,
        cache_dir = %config.cache_dir.display(),
        "Starting modorder"
    );

    let entities = read_entities(&entities_path).await?;
    let manual = read_manual_rules(manual_path.as_deref()).await?;

    let store = Arc::new(FileRuleStore::in_dir(&config.cache_dir));
    let fetcher = HttpRuleFetcher::new(&config)?;
    let cache = Arc::new(RuleCache::new(store, fetcher, config.cache_ttl_secs));

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling rule download");
            let _ = cancel_tx.send(true);
        }
    });

    let community = cache.clone().spawn_refresh(Some(cancel_rx)).await?;
    let stats = cache.stats();
    info!(
        rules = stats.rule_count,
        stale = stats.stale,
        fetched_at = ?stats.fetched_at,
        "Community rules ready"
    );

    let reference: Vec<PackageId> = entities.iter().map(|e| e.package_id.clone()).collect();
    let planner = LoadOrderPlanner::from_documents(&manual, &community);
    let result = planner.plan(&entities, &reference)?;

    if result.has_errors() {
        warn!(issues = result.issues.len(), "Load order has errors");
    }

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
