//! Background reclamation sweep.
//!
//! The sweep makes terminal drops cheap: overdue Active rows are flipped to
//! Expired, then every Expired/Consumed row has its blob deleted and is
//! retired to Reclaimed. The blob is always deleted before the row leaves
//! the terminal state, so a crash between the two steps re-runs the delete
//! on the next sweep instead of orphaning the blob.
//!
//! Every step is idempotent. Two overlapping sweeps race harmlessly: the
//! loser of the `mark_reclaimed` update counts the row as skipped.

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;

use crate::{
    models::Drop,
    repos::{AccessLogRepo, DropRepo},
    services::BlobStore,
    state::AppState,
};

/// What a single sweep did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Overdue Active rows flipped to Expired before the scan.
    pub marked_expired: u64,
    /// Rows fully retired (blob gone, state now Reclaimed).
    pub reclaimed: u64,
    /// Rows left in place because the blob delete failed or timed out.
    pub failed: u64,
    /// Rows another sweep retired between our read and our write.
    pub skipped: u64,
}

pub struct Reclaimer {
    drops: Arc<dyn DropRepo>,
    blob: Arc<dyn BlobStore>,
    access_log: Arc<dyn AccessLogRepo>,
    page_size: i64,
    blob_timeout: Duration,
    retention_days: i64,
}

impl Reclaimer {
    pub fn new(
        drops: Arc<dyn DropRepo>,
        blob: Arc<dyn BlobStore>,
        access_log: Arc<dyn AccessLogRepo>,
        page_size: i64,
        blob_timeout: Duration,
        retention_days: i64,
    ) -> Self {
        Self {
            drops,
            blob,
            access_log,
            page_size,
            blob_timeout,
            retention_days,
        }
    }

    pub fn from_state(state: &AppState) -> Self {
        Self::new(
            state.repos.drops.clone(),
            state.blob.clone(),
            state.repos.access_log.clone(),
            state.config.sweep_page_size,
            Duration::from_secs(state.config.blob_delete_timeout_secs),
            state.config.retention_days,
        )
    }

    /// One full pass: expire overdue rows, then page through everything
    /// terminal and retire it.
    pub async fn sweep(&self) -> Result<SweepReport> {
        let mut report = SweepReport {
            marked_expired: self.drops.expire_overdue().await?,
            ..Default::default()
        };

        let mut cursor = None;
        loop {
            let page = self.drops.list_reclaimable(cursor, self.page_size).await?;
            let Some(last) = page.last() else {
                break;
            };
            cursor = Some(last.id);
            let full_page = page.len() as i64 >= self.page_size;

            for drop in page {
                self.reclaim_one(&drop, &mut report).await;
            }

            if !full_page {
                break;
            }
        }

        Ok(report)
    }

    async fn reclaim_one(&self, drop: &Drop, report: &mut SweepReport) {
        // Blob first. A row whose blob may still exist must stay terminal,
        // not Reclaimed, so the delete is retried next sweep.
        if let Some(blob_ref) = &drop.blob_ref {
            let delete = self.blob.delete(blob_ref);
            match tokio::time::timeout(self.blob_timeout, delete).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(drop_id = %drop.id, "blob delete failed: {:?}", e);
                    report.failed += 1;
                    return;
                }
                Err(_) => {
                    tracing::warn!(drop_id = %drop.id, "blob delete timed out");
                    report.failed += 1;
                    return;
                }
            }
        }

        match self.drops.mark_reclaimed(drop.id).await {
            Ok(true) => report.reclaimed += 1,
            // Another sweep got here first; the delete above was a no-op
            // replay against an already-deleted blob.
            Ok(false) => report.skipped += 1,
            Err(e) => {
                tracing::warn!(drop_id = %drop.id, "failed to mark drop reclaimed: {:?}", e);
                report.failed += 1;
            }
        }
    }

    /// Hard-delete Reclaimed rows and audit entries past the retention
    /// window.
    pub async fn purge(&self) -> Result<()> {
        let cutoff = Utc::now() - chrono::Duration::days(self.retention_days);

        let rows = self.drops.purge_reclaimed(cutoff).await?;
        let audit = self.access_log.purge_older_than(cutoff).await?;

        tracing::info!(rows, audit, "purged records past retention");

        Ok(())
    }

    /// Periodic driver. Runs a sweep every `interval`, and the retention
    /// purge once every `purge_every` sweeps.
    pub async fn run(self: Arc<Self>, interval: Duration, purge_every: u32) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The immediate first tick: catch up on anything left from before a
        // restart.
        let mut sweeps: u32 = 0;

        loop {
            ticker.tick().await;

            match self.sweep().await {
                Ok(report) => tracing::info!(
                    marked_expired = report.marked_expired,
                    reclaimed = report.reclaimed,
                    failed = report.failed,
                    skipped = report.skipped,
                    "sweep complete"
                ),
                Err(e) => tracing::error!("sweep failed: {:?}", e),
            }

            sweeps = sweeps.wrapping_add(1);
            if purge_every > 0 && sweeps % purge_every == 0 {
                if let Err(e) = self.purge().await {
                    tracing::error!("retention purge failed: {:?}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;

    use crate::repos::{MockAccessLogRepo, MockDropRepo};
    use crate::services::MockBlobStore;
    use crate::test_utils::mock_drop;
    use crate::models::LifecycleState;

    fn reclaimer(drops: MockDropRepo, blob: MockBlobStore) -> Reclaimer {
        Reclaimer::new(
            Arc::new(drops),
            Arc::new(blob),
            Arc::new(MockAccessLogRepo::new()),
            500,
            Duration::from_secs(5),
            30,
        )
    }

    fn terminal_drop(token: &str, blob_ref: Option<&str>) -> Drop {
        let mut drop = mock_drop(token);
        drop.lifecycle_state = LifecycleState::Expired;
        drop.blob_ref = blob_ref.map(String::from);
        drop
    }

    #[tokio::test]
    async fn sweep_deletes_blob_then_retires_row() {
        let file_drop = terminal_drop("file", Some("blob-a"));
        let message_drop = terminal_drop("msg", None);
        let (file_id, message_id) = (file_drop.id, message_drop.id);

        let mut drops = MockDropRepo::new();
        drops.expect_expire_overdue().return_once(|| Ok(2));
        drops
            .expect_list_reclaimable()
            .times(1)
            .return_once(move |_, _| Ok(vec![file_drop, message_drop]));
        drops
            .expect_mark_reclaimed()
            .with(eq(file_id))
            .return_once(|_| Ok(true));
        drops
            .expect_mark_reclaimed()
            .with(eq(message_id))
            .return_once(|_| Ok(true));

        let mut blob = MockBlobStore::new();
        blob.expect_delete()
            .with(eq("blob-a"))
            .times(1)
            .return_once(|_| Ok(()));

        let report = reclaimer(drops, blob).sweep().await.unwrap();

        assert_eq!(
            report,
            SweepReport {
                marked_expired: 2,
                reclaimed: 2,
                failed: 0,
                skipped: 0,
            }
        );
    }

    #[tokio::test]
    async fn failed_blob_delete_leaves_the_row_for_the_next_sweep() {
        let file_drop = terminal_drop("file", Some("blob-a"));

        let mut drops = MockDropRepo::new();
        drops.expect_expire_overdue().return_once(|| Ok(0));
        drops
            .expect_list_reclaimable()
            .return_once(move |_, _| Ok(vec![file_drop]));
        // No mark_reclaimed expectation: the state change must not happen.

        let mut blob = MockBlobStore::new();
        blob.expect_delete()
            .return_once(|_| Err(anyhow::anyhow!("s3 unavailable")));

        let report = reclaimer(drops, blob).sweep().await.unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(report.reclaimed, 0);
    }

    #[tokio::test]
    async fn row_retired_by_a_concurrent_sweep_counts_as_skipped() {
        let message_drop = terminal_drop("msg", None);

        let mut drops = MockDropRepo::new();
        drops.expect_expire_overdue().return_once(|| Ok(0));
        drops
            .expect_list_reclaimable()
            .return_once(move |_, _| Ok(vec![message_drop]));
        drops.expect_mark_reclaimed().return_once(|_| Ok(false));

        let report = reclaimer(drops, MockBlobStore::new()).sweep().await.unwrap();

        assert_eq!(report.skipped, 1);
        assert_eq!(report.reclaimed, 0);
    }

    #[tokio::test]
    async fn sweep_pages_through_the_backlog_with_a_cursor() {
        let first = terminal_drop("a", None);
        let second = terminal_drop("b", None);
        let first_id = first.id;

        let mut drops = MockDropRepo::new();
        drops.expect_expire_overdue().return_once(|| Ok(0));
        let mut pages = vec![vec![second], vec![first]];
        drops
            .expect_list_reclaimable()
            .times(3)
            .returning(move |after, limit| {
                assert_eq!(limit, 1);
                if pages.len() == 1 {
                    assert_eq!(after, Some(first_id));
                }
                Ok(pages.pop().unwrap_or_default())
            });
        drops.expect_mark_reclaimed().times(2).returning(|_| Ok(true));

        let reclaimer = Reclaimer::new(
            Arc::new(drops),
            Arc::new(MockBlobStore::new()),
            Arc::new(MockAccessLogRepo::new()),
            1,
            Duration::from_secs(5),
            30,
        );
        let report = reclaimer.sweep().await.unwrap();

        assert_eq!(report.reclaimed, 2);
    }

    #[tokio::test]
    async fn rerun_on_already_empty_backlog_reports_zeroes() {
        let mut drops = MockDropRepo::new();
        drops.expect_expire_overdue().return_once(|| Ok(0));
        drops
            .expect_list_reclaimable()
            .return_once(|_, _| Ok(Vec::new()));

        let report = reclaimer(drops, MockBlobStore::new()).sweep().await.unwrap();

        assert_eq!(report, SweepReport::default());
    }

    #[tokio::test]
    async fn purge_applies_the_same_cutoff_to_rows_and_audit_entries() {
        let mut drops = MockDropRepo::new();
        drops.expect_purge_reclaimed().times(1).return_once(|cutoff| {
            assert!(cutoff < Utc::now() - chrono::Duration::days(29));
            Ok(3)
        });
        let mut access_log = MockAccessLogRepo::new();
        access_log
            .expect_purge_older_than()
            .times(1)
            .return_once(|_| Ok(7));

        let reclaimer = Reclaimer::new(
            Arc::new(drops),
            Arc::new(MockBlobStore::new()),
            Arc::new(access_log),
            500,
            Duration::from_secs(5),
            30,
        );

        reclaimer.purge().await.unwrap();
    }
}
