//! Background reclamation of unreferenced archives.
//!
//! Each sweep pages through the write container, skips anything modified
//! within the grace period, and deletes whatever the reachability oracle
//! no longer reports as referenced. The grace period is the only guard
//! against racing an in-flight upload; there is no lock.

use crate::metrics::{PRUNE_DURATION, PRUNE_ERRORS, PRUNE_RUNS, PRUNED_ARTIFACTS};
use async_trait::async_trait;
use parcel_core::config::PrunerConfig;
use parcel_core::sanitize_archive_id;
use parcel_storage::traits::normalize_page_size;
use parcel_storage::{BlobStore, Cursor};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Errors from a reachability oracle.
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("oracle request failed: {0}")]
    Request(String),

    #[error("invalid oracle response: {0}")]
    InvalidResponse(String),
}

/// Source of the archive ids still referenced by live resources.
#[async_trait]
pub trait ReachabilityOracle: Send + Sync {
    async fn referenced_archives(&self) -> Result<HashSet<String>, OracleError>;
}

/// Oracle backed by an HTTP endpoint returning a JSON array of strings.
///
/// Each entry is an archive id or an archive download URL carrying the id
/// in its `id` query parameter.
pub struct HttpReachabilityOracle {
    client: reqwest::Client,
    url: String,
}

impl HttpReachabilityOracle {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

/// Archive id named by an oracle entry.
pub fn archive_id_from_reference(reference: &str) -> Option<String> {
    if let Ok(url) = reqwest::Url::parse(reference)
        && let Some((_, id)) = url.query_pairs().find(|(key, _)| key == "id")
    {
        return sanitize_archive_id(&id);
    }
    sanitize_archive_id(reference)
}

#[async_trait]
impl ReachabilityOracle for HttpReachabilityOracle {
    async fn referenced_archives(&self) -> Result<HashSet<String>, OracleError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| OracleError::Request(e.to_string()))?;
        let references: Vec<String> = response
            .json()
            .await
            .map_err(|e| OracleError::InvalidResponse(e.to_string()))?;

        let mut ids = HashSet::with_capacity(references.len());
        for reference in &references {
            match archive_id_from_reference(reference) {
                Some(id) => {
                    ids.insert(id);
                }
                None => warn!(reference = %reference, "Ignoring unusable oracle entry"),
            }
        }
        Ok(ids)
    }
}

/// Counters for one sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct PruneStats {
    pub items_listed: u64,
    /// Kept because they were modified within the grace period.
    pub items_skipped_recent: u64,
    /// Kept because the oracle still references them.
    pub items_referenced: u64,
    pub items_deleted: u64,
    pub errors: u64,
}

/// Sweep failures that prevent any deletion.
#[derive(Debug, thiserror::Error)]
pub enum PruneError {
    #[error(transparent)]
    Oracle(#[from] OracleError),
}

/// Periodic sweeper of the write container.
pub struct ArchivePruner {
    store: Arc<BlobStore>,
    oracle: Arc<dyn ReachabilityOracle>,
    grace_period: Duration,
    page_size: usize,
}

impl ArchivePruner {
    pub fn new(
        store: Arc<BlobStore>,
        oracle: Arc<dyn ReachabilityOracle>,
        grace_period: Duration,
        page_size: usize,
    ) -> Self {
        Self {
            store,
            oracle,
            grace_period,
            page_size: normalize_page_size(page_size),
        }
    }

    /// Build a pruner from config, or `None` if the pruner should not run.
    pub fn from_config(store: Arc<BlobStore>, config: &PrunerConfig) -> Option<Self> {
        if !config.enabled {
            return None;
        }
        let url = config.oracle_url.as_deref()?;
        Some(Self::new(
            store,
            Arc::new(HttpReachabilityOracle::new(url)),
            config.grace_period(),
            config.page_size,
        ))
    }

    /// Run one sweep using the current time.
    pub async fn sweep(&self) -> Result<PruneStats, PruneError> {
        self.sweep_at(OffsetDateTime::now_utc()).await
    }

    /// Run one sweep, treating `now` as the current time.
    ///
    /// Items with no modification time are treated as recent and kept.
    pub async fn sweep_at(&self, now: OffsetDateTime) -> Result<PruneStats, PruneError> {
        let start = Instant::now();
        PRUNE_RUNS.inc();

        let referenced = self.oracle.referenced_archives().await.inspect_err(|e| {
            PRUNE_ERRORS.inc();
            warn!(error = %e, "Reachability oracle failed, skipping sweep");
        })?;

        let cutoff = now - self.grace_period;
        let mut stats = PruneStats::default();
        let mut cursor = Cursor::Start;
        let container = self.store.write_container();

        while !cursor.is_end() {
            let listed = AtomicU64::new(0);
            let recent = AtomicU64::new(0);
            let page = self
                .store
                .list("", &cursor, self.page_size, |item| {
                    listed.fetch_add(1, Ordering::Relaxed);
                    let expired = item.last_modified.is_some_and(|t| t <= cutoff);
                    if !expired {
                        recent.fetch_add(1, Ordering::Relaxed);
                    }
                    expired
                })
                .await;
            let page = match page {
                Ok(page) => page,
                Err(e) => {
                    stats.errors += 1;
                    PRUNE_ERRORS.inc();
                    warn!(error = %e, "Listing failed, ending sweep early");
                    break;
                }
            };
            stats.items_listed += listed.into_inner();
            stats.items_skipped_recent += recent.into_inner();

            for item in page.items {
                if referenced.contains(&item.key) {
                    stats.items_referenced += 1;
                    continue;
                }
                match container.delete(&item.key).await {
                    Ok(()) => {
                        stats.items_deleted += 1;
                        PRUNED_ARTIFACTS.inc();
                        debug!(archive = %item.key, "Pruned archive");
                    }
                    Err(e) if e.is_not_found() => {}
                    Err(e) => {
                        stats.errors += 1;
                        PRUNE_ERRORS.inc();
                        warn!(archive = %item.key, error = %e, "Failed to prune archive");
                    }
                }
            }
            cursor = page.next;
        }

        PRUNE_DURATION.observe(start.elapsed().as_secs_f64());
        info!(
            container = %container.container(),
            items_listed = stats.items_listed,
            items_skipped_recent = stats.items_skipped_recent,
            items_referenced = stats.items_referenced,
            items_deleted = stats.items_deleted,
            errors = stats.errors,
            "Prune sweep finished"
        );
        Ok(stats)
    }

    /// Sweep every `interval` until the task is aborted.
    pub fn spawn(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "Archive pruner started");
            loop {
                tokio::time::sleep(interval).await;
                if let Err(e) = self.sweep().await {
                    warn!(error = %e, "Prune sweep aborted");
                }
            }
        })
    }
}
