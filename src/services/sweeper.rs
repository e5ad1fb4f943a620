//! Background purge of expired content.
//!
//! The sweeper only reclaims space; the access gate re-checks expiry itself,
//! so nothing depends on how often (or whether) a sweep has run.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::clock::{format_timestamp, truncate, Clock};
use crate::db::Database;
use crate::error::Result;
use crate::storage::StorageProvider;

/// Outcome of a single sweep
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Records removed by this sweep
    pub purged: usize,
    /// Blobs that could not be deleted (their records were still removed)
    pub blob_failures: usize,
    /// Records whose delete failed; retried on the next sweep
    pub record_failures: usize,
}

#[derive(Clone)]
pub struct ExpirySweeper {
    db: Database,
    storage: Arc<dyn StorageProvider>,
    clock: Arc<dyn Clock>,
}

impl ExpirySweeper {
    pub fn new(db: Database, storage: Arc<dyn StorageProvider>, clock: Arc<dyn Clock>) -> Self {
        Self { db, storage, clock }
    }

    /// Delete every record (and its blob) whose expiry is before `now`.
    ///
    /// Safe to run concurrently with itself: a record already deleted by
    /// another sweep is skipped, and a missing blob counts as deleted.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let expired: Vec<(String, Option<String>)> = sqlx::query_as(
            "SELECT id, file_path FROM contents WHERE expires_at < ? ORDER BY expires_at",
        )
        .bind(format_timestamp(truncate(now)))
        .fetch_all(self.db.pool())
        .await?;

        let mut report = SweepReport::default();

        for (id, file_path) in expired {
            if let Some(path) = &file_path {
                if let Err(e) = self.storage.delete(path).await {
                    tracing::warn!(id = %id, path = %path, "Failed to delete expired blob: {}", e);
                    report.blob_failures += 1;
                }
            }

            match sqlx::query("DELETE FROM contents WHERE id = ?")
                .bind(&id)
                .execute(self.db.pool())
                .await
            {
                Ok(result) if result.rows_affected() > 0 => {
                    tracing::info!(id = %id, "Auto-deleted expired content");
                    report.purged += 1;
                }
                Ok(_) => {
                    tracing::debug!(id = %id, "Expired content already removed");
                }
                Err(e) => {
                    tracing::error!(id = %id, "Failed to delete expired content: {}", e);
                    report.record_failures += 1;
                }
            }
        }

        Ok(report)
    }

    /// Spawn the periodic sweep. The first sweep runs immediately.
    pub fn start(self, interval: Duration) -> SweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {}
                }

                let now = self.clock.now();
                match self.sweep_once(now).await {
                    Ok(report) if report == SweepReport::default() => {
                        tracing::debug!("Expiry sweep: nothing to purge");
                    }
                    Ok(report) => {
                        tracing::info!(
                            purged = report.purged,
                            blob_failures = report.blob_failures,
                            record_failures = report.record_failures,
                            "Expiry sweep finished"
                        );
                    }
                    Err(e) => {
                        tracing::error!("Expiry sweep error: {}", e);
                    }
                }
            }

            tracing::info!("Expiry sweeper stopped");
        });

        tracing::info!("Expiry sweeper started, interval {:?}", interval);
        SweeperHandle {
            shutdown: Some(shutdown_tx),
            task,
        }
    }
}

/// Owner of the running sweep task
pub struct SweeperHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop the sweeper, letting an in-flight sweep finish first.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.task).await {
            tracing::error!("Expiry sweeper task join error: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::db::testing::temp_database;
    use crate::error::AppError;
    use crate::models::{AccessKind, ContentRecord, NewContent, NewPayload};
    use crate::services::{AccessGate, ContentService};
    use crate::storage::LocalStorage;
    use async_trait::async_trait;
    use bytes::Bytes;
    use chrono::TimeZone;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        db: Database,
        storage: Arc<LocalStorage>,
        clock: Arc<ManualClock>,
    }

    async fn fixture() -> Fixture {
        let (dir, db) = temp_database().await;
        let storage = Arc::new(LocalStorage::new(dir.path().join("uploads")));
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        ));
        Fixture {
            dir,
            db,
            storage,
            clock,
        }
    }

    impl Fixture {
        fn sweeper(&self) -> ExpirySweeper {
            ExpirySweeper::new(self.db.clone(), self.storage.clone(), self.clock.clone())
        }

        async fn create(&self, payload: NewPayload, minutes: i64, max_views: i64) -> ContentRecord {
            ContentService::create_content(
                &self.db,
                self.storage.as_ref(),
                self.clock.as_ref(),
                NewContent {
                    payload,
                    ttl: chrono::Duration::minutes(minutes),
                    max_views,
                },
            )
            .await
            .unwrap()
        }

        async fn file(&self, minutes: i64, max_views: i64) -> ContentRecord {
            let temp_path = self.dir.path().join(format!("{}.tmp", uuid::Uuid::new_v4()));
            tokio::fs::write(&temp_path, b"blob").await.unwrap();
            self.create(
                NewPayload::File {
                    temp_path,
                    file_name: "blob.bin".to_string(),
                    mime_type: None,
                    size: 4,
                },
                minutes,
                max_views,
            )
            .await
        }

        async fn count(&self) -> i64 {
            sqlx::query_scalar("SELECT COUNT(*) FROM contents")
                .fetch_one(self.db.pool())
                .await
                .unwrap()
        }
    }

    #[tokio::test]
    async fn test_file_lifecycle_ends_in_purge() {
        let fx = fixture().await;
        let record = fx.file(10, 2).await;
        let path = record.file_ref().unwrap().storage_path.clone();

        for _ in 0..2 {
            AccessGate::try_consume(&fx.db, fx.clock.as_ref(), &record.id, AccessKind::Download)
                .await
                .unwrap();
        }

        fx.clock.advance(chrono::Duration::minutes(11));
        let report = fx.sweeper().sweep_once(fx.clock.now()).await.unwrap();

        assert_eq!(report.purged, 1);
        assert!(!fx.storage.exists(&path).await.unwrap());
        let err = AccessGate::try_consume(&fx.db, fx.clock.as_ref(), &record.id, AccessKind::Reveal)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_sweep_ignores_live_records() {
        let fx = fixture().await;
        fx.create(NewPayload::Text("short".to_string()), 1, 1).await;
        let live = fx.create(NewPayload::Text("long".to_string()), 60, 1).await;
        // Used up but not expired: the sweeper only looks at time
        AccessGate::try_consume(&fx.db, fx.clock.as_ref(), &live.id, AccessKind::Reveal)
            .await
            .unwrap();

        fx.clock.advance(chrono::Duration::minutes(5));
        let report = fx.sweeper().sweep_once(fx.clock.now()).await.unwrap();

        assert_eq!(report.purged, 1);
        assert_eq!(fx.count().await, 1);
    }

    #[tokio::test]
    async fn test_sweep_is_idempotent() {
        let fx = fixture().await;
        fx.file(1, 1).await;
        fx.create(NewPayload::Text("gone soon".to_string()), 1, 1).await;
        fx.clock.advance(chrono::Duration::minutes(2));

        let sweeper = fx.sweeper();
        let first = sweeper.sweep_once(fx.clock.now()).await.unwrap();
        let second = sweeper.sweep_once(fx.clock.now()).await.unwrap();

        assert_eq!(first.purged, 2);
        assert_eq!(second, SweepReport::default());
        assert_eq!(fx.count().await, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_overlapping_sweeps_do_not_double_delete() {
        let fx = fixture().await;
        for _ in 0..8 {
            fx.file(1, 1).await;
        }
        fx.clock.advance(chrono::Duration::minutes(2));

        let now = fx.clock.now();
        let (first, second) = (fx.sweeper(), fx.sweeper());
        let (a, b) = tokio::join!(first.sweep_once(now), second.sweep_once(now));
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(a.purged + b.purged, 8);
        assert_eq!(a.blob_failures + b.blob_failures, 0);
        assert_eq!(fx.count().await, 0);
    }

    struct FailingStorage;

    #[async_trait]
    impl StorageProvider for FailingStorage {
        async fn put(&self, _path: &str, _data: Bytes) -> Result<()> {
            Ok(())
        }

        async fn put_file(&self, _path: &str, _local_path: &std::path::Path) -> Result<()> {
            Ok(())
        }

        async fn get(&self, path: &str) -> Result<Bytes> {
            Err(AppError::NotFound(path.to_string()))
        }

        async fn delete(&self, _path: &str) -> Result<()> {
            Err(AppError::Storage("disk on fire".to_string()))
        }

        async fn exists(&self, _path: &str) -> Result<bool> {
            Ok(true)
        }

        fn storage_type(&self) -> &'static str {
            "failing"
        }
    }

    #[tokio::test]
    async fn test_blob_failure_does_not_block_record_delete() {
        let fx = fixture().await;
        let storage: Arc<dyn StorageProvider> = Arc::new(FailingStorage);
        for name in ["a.bin", "b.bin"] {
            ContentService::create_content(
                &fx.db,
                storage.as_ref(),
                fx.clock.as_ref(),
                NewContent {
                    payload: NewPayload::File {
                        temp_path: fx.dir.path().join(name),
                        file_name: name.to_string(),
                        mime_type: None,
                        size: 0,
                    },
                    ttl: chrono::Duration::minutes(1),
                    max_views: 1,
                },
            )
            .await
            .unwrap();
        }
        fx.clock.advance(chrono::Duration::minutes(2));

        let sweeper = ExpirySweeper::new(fx.db.clone(), storage, fx.clock.clone());
        let report = sweeper.sweep_once(fx.clock.now()).await.unwrap();

        assert_eq!(report.purged, 2);
        assert_eq!(report.blob_failures, 2);
        assert_eq!(fx.count().await, 0);
    }

    #[tokio::test]
    async fn test_started_sweeper_purges_and_stops() {
        let fx = fixture().await;
        let record = fx.file(1, 1).await;
        let path = record.file_ref().unwrap().storage_path.clone();
        fx.clock.advance(chrono::Duration::minutes(2));

        let handle = fx.sweeper().start(Duration::from_millis(20));

        let mut remaining = fx.count().await;
        for _ in 0..100 {
            if remaining == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            remaining = fx.count().await;
        }
        handle.stop().await;

        assert_eq!(remaining, 0);
        assert!(!fx.storage.exists(&path).await.unwrap());
    }
}
