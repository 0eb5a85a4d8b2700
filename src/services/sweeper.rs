use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::{sync::watch, time::MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{
    blob_store::{BlobError, BlobStore},
    metadata_cache::MetadataCache,
    object_store_backend::MAX_LIST_PAGE,
};

/// Counters for one sweep pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub expired: usize,
    pub deleted: usize,
    pub failed: usize,
}

/// Background task that deletes objects whose access policy has expired.
pub struct ExpirySweeper {
    store: Arc<dyn BlobStore>,
    cache: Arc<MetadataCache>,
    interval: Duration,
    shutdown_rx: watch::Receiver<()>,
}

enum KeyOutcome {
    Live,
    Deleted,
    Gone,
}

impl ExpirySweeper {
    pub fn new(
        store: Arc<dyn BlobStore>,
        cache: Arc<MetadataCache>,
        interval: Duration,
        shutdown_rx: watch::Receiver<()>,
    ) -> Self {
        Self {
            store,
            cache,
            interval,
            shutdown_rx,
        }
    }

    /// Sweep once right away, then every interval until shutdown.
    pub async fn start(&mut self) -> Result<()> {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.run_once().await {
                        warn!(error = ?err, "expiry sweep aborted; retrying next interval");
                    }
                }
                _ = self.shutdown_rx.changed() => {
                    info!("expiry sweeper shutting down");
                    return Ok(());
                }
            }
        }
    }

    pub async fn run_once(&self) -> Result<SweepReport> {
        self.run_at(Utc::now()).await
    }

    /// One full pass over the listing, judged against `now`. Only a listing
    /// failure aborts the pass; per-object failures are counted and logged.
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        let mut start_after: Option<String> = None;

        loop {
            let page = self
                .store
                .list(start_after.as_deref(), MAX_LIST_PAGE)
                .await
                .with_context(|| format!("listing objects after {start_after:?}"))?;

            for key in &page.keys {
                report.scanned += 1;
                match self.sweep_key(key, now).await {
                    Ok(KeyOutcome::Live) => {}
                    Ok(KeyOutcome::Deleted) => {
                        report.expired += 1;
                        report.deleted += 1;
                    }
                    Ok(KeyOutcome::Gone) => debug!(key, "object vanished before sweep"),
                    Err(err) => {
                        report.failed += 1;
                        warn!(key, error = %err, "failed to sweep object");
                    }
                }
            }

            match page.next_start_after {
                Some(next) => start_after = Some(next),
                None => break,
            }
        }

        info!(
            scanned = report.scanned,
            expired = report.expired,
            deleted = report.deleted,
            failed = report.failed,
            "expiry sweep finished"
        );
        Ok(report)
    }

    async fn sweep_key(&self, key: &str, now: DateTime<Utc>) -> Result<KeyOutcome> {
        let head = match self.store.head(key).await {
            Ok(head) => head,
            Err(BlobError::NotFound(_)) => return Ok(KeyOutcome::Gone),
            Err(err) => return Err(err).context("reading head"),
        };
        let policy = head.access_policy().context("decoding access policy")?;
        if !policy.is_expired_at(now) {
            return Ok(KeyOutcome::Live);
        }

        match self.store.delete(key).await {
            Ok(()) | Err(BlobError::NotFound(_)) => {}
            Err(err) => return Err(err).context("deleting expired object"),
        }
        self.cache.invalidate(key);
        debug!(key, expires_at = ?policy.expires_at, "deleted expired object");
        Ok(KeyOutcome::Deleted)
    }
}
