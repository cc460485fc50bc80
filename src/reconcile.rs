use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tracing::{debug, error, info, warn};

use crate::db::{NormalizedRecord, RecordStore, Upsert};
use crate::images::ImageCache;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub inserted: usize,
    pub updated: usize,
    pub failed: usize,
    pub fallback_images: usize,
    /// `None` when the sweep was skipped or failed.
    pub deleted: Option<usize>,
}

/// Sole writer of the animals store: upserts a run's records, then removes
/// rows the run no longer lists.
pub struct Reconciler {
    store: Arc<dyn RecordStore>,
    images: Arc<ImageCache>,
    image_concurrency: usize,
}

impl Reconciler {
    pub fn new(store: Arc<dyn RecordStore>, images: Arc<ImageCache>, image_concurrency: usize) -> Self {
        Self {
            store,
            images,
            image_concurrency: image_concurrency.max(1),
        }
    }

    /// Upsert `records` in order and, when `sweep` is set, delete rows of
    /// `source_tag` that are not among them.
    ///
    /// A failed upsert is logged and skipped; it never stops the remaining
    /// upserts or the sweep.
    pub async fn reconcile(
        &self,
        source_tag: &str,
        records: &[NormalizedRecord],
        sweep: bool,
        now: DateTime<Utc>,
    ) -> Result<ReconcileOutcome> {
        let mut out = ReconcileOutcome::default();

        // Different keys are independent, so photos resolve concurrently.
        let lookups: Vec<_> = records
            .iter()
            .map(|r| {
                let images = Arc::clone(&self.images);
                let url = r.photo_source_url.clone();
                let key = r.external_id.clone();
                async move { images.resolve(url.as_deref(), &key).await }
            })
            .collect();
        let photos: Vec<String> = stream::iter(lookups)
        .buffered(self.image_concurrency)
        .collect()
        .await;

        for (record, photo) in records.iter().zip(&photos) {
            if photo == self.images.fallback() {
                out.fallback_images += 1;
            }
            match self.store.upsert_by_source_and_external_id(record, photo, now) {
                Ok(Upsert::Inserted) => {
                    out.inserted += 1;
                    info!(
                        external_id = %record.external_id,
                        name = %record.name,
                        days = record.days_until_deadline,
                        "Added animal"
                    );
                }
                Ok(Upsert::Updated) => {
                    out.updated += 1;
                    debug!(external_id = %record.external_id, "Updated animal");
                }
                Err(e) => {
                    out.failed += 1;
                    warn!(external_id = %record.external_id, error = %e, "Failed to save animal, skipping");
                }
            }
        }

        if out.failed > 0 {
            warn!(failed = out.failed, total = records.len(), "Some animals were not saved");
        }

        if !sweep {
            info!(source = source_tag, "Skipping deletion sweep for incomplete run");
            return Ok(out);
        }

        let keep: Vec<String> = records.iter().map(|r| r.external_id.clone()).collect();
        match self.store.delete_by_source_except_ids(source_tag, &keep) {
            Ok(n) => {
                if n > 0 {
                    info!(source = source_tag, deleted = n, "Removed animals no longer listed");
                }
                out.deleted = Some(n);
            }
            Err(e) => {
                error!(source = source_tag, error = %e, "Deletion sweep failed, stale animals kept until next run");
            }
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use crate::db::tests::record;
    use crate::db::SqliteStore;
    use crate::images::tests::CountingSource;
    use crate::images::FsBlobStore;
    use chrono::TimeZone;
    use std::sync::atomic::Ordering;

    struct Fixture {
        store: Arc<SqliteStore>,
        source: Arc<CountingSource>,
        reconciler: Reconciler,
        _dir: tempfile::TempDir,
    }

    fn fixture_with(store: Arc<dyn RecordStore>, sqlite: Arc<SqliteStore>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(CountingSource::default());
        let images = Arc::new(ImageCache::new(
            source.clone(),
            Arc::new(FsBlobStore::new(dir.path(), "/dog-images")),
            "fallback.jpg",
        ));
        Fixture {
            store: sqlite,
            source,
            reconciler: Reconciler::new(store, images, 4),
            _dir: dir,
        }
    }

    fn fixture() -> Fixture {
        let sqlite = Arc::new(SqliteStore::in_memory().unwrap());
        fixture_with(sqlite.clone(), sqlite)
    }

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, day, 9, 0, 0).unwrap()
    }

    fn with_photo(id: &str) -> NormalizedRecord {
        let mut r = record(id, "SOUTH LA", 1);
        r.photo_source_url = Some(format!("https://petharbor.com/get_image.asp?ID={}", id));
        r
    }

    #[tokio::test]
    async fn unchanged_rerun_keeps_one_row_and_created_at() {
        let f = fixture();
        let records = vec![with_photo("A1111111"), with_photo("A2222222")];

        let first = f.reconciler.reconcile("petharbor", &records, true, at(18)).await.unwrap();
        assert_eq!(first.inserted, 2);
        let created = f.store.get("petharbor", "A1111111").unwrap().unwrap().created_at;

        let second = f.reconciler.reconcile("petharbor", &records, true, at(19)).await.unwrap();
        assert_eq!(second.inserted, 0);
        assert_eq!(second.updated, 2);
        assert_eq!(second.deleted, Some(0));

        assert_eq!(f.store.count("petharbor").unwrap(), 2);
        let row = f.store.get("petharbor", "A1111111").unwrap().unwrap();
        assert_eq!(row.created_at, created);
        assert_eq!(row.photo_url, "/dog-images/A1111111.jpg");
        assert_eq!(f.source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn absent_record_is_deleted_and_returns_fresh() {
        let f = fixture();
        let a = with_photo("A1234567");
        let b = with_photo("A7654321");

        f.reconciler.reconcile("petharbor", &[a.clone(), b.clone()], true, at(18)).await.unwrap();
        let original = f.store.get("petharbor", "A1234567").unwrap().unwrap().created_at;

        let run2 = f.reconciler.reconcile("petharbor", &[b.clone()], true, at(19)).await.unwrap();
        assert_eq!(run2.deleted, Some(1));
        assert!(f.store.get("petharbor", "A1234567").unwrap().is_none());

        let run3 = f.reconciler.reconcile("petharbor", &[a, b], true, at(20)).await.unwrap();
        assert_eq!(run3.inserted, 1);
        let reborn = f.store.get("petharbor", "A1234567").unwrap().unwrap().created_at;
        assert_ne!(reborn, original);
    }

    #[tokio::test]
    async fn incomplete_run_skips_sweep() {
        let f = fixture();
        f.reconciler
            .reconcile("petharbor", &[with_photo("A1111111"), with_photo("A2222222")], true, at(18))
            .await
            .unwrap();

        let out = f.reconciler.reconcile("petharbor", &[with_photo("A1111111")], false, at(19)).await.unwrap();
        assert_eq!(out.deleted, None);
        assert_eq!(f.store.count("petharbor").unwrap(), 2);
    }

    #[tokio::test]
    async fn missing_photo_counts_as_fallback() {
        let f = fixture();
        let out = f
            .reconciler
            .reconcile("petharbor", &[record("A1111111", "HARBOR", 6)], true, at(18))
            .await
            .unwrap();
        assert_eq!(out.fallback_images, 1);
        assert_eq!(f.store.get("petharbor", "A1111111").unwrap().unwrap().photo_url, "fallback.jpg");
    }

    /// Delegates to SQLite but rejects chosen ids and, optionally, the sweep.
    struct FlakyStore {
        inner: Arc<SqliteStore>,
        reject: Vec<&'static str>,
        fail_sweep: bool,
    }

    impl RecordStore for FlakyStore {
        fn upsert_by_source_and_external_id(
            &self,
            record: &NormalizedRecord,
            photo_url: &str,
            seen_at: DateTime<Utc>,
        ) -> Result<Upsert> {
            if self.reject.iter().any(|id| *id == record.external_id) {
                bail!("disk I/O error");
            }
            self.inner.upsert_by_source_and_external_id(record, photo_url, seen_at)
        }

        fn delete_by_source_except_ids(&self, source_tag: &str, keep_ids: &[String]) -> Result<usize> {
            if self.fail_sweep {
                bail!("database is locked");
            }
            self.inner.delete_by_source_except_ids(source_tag, keep_ids)
        }
    }

    fn flaky(reject: Vec<&'static str>, fail_sweep: bool) -> Fixture {
        let sqlite = Arc::new(SqliteStore::in_memory().unwrap());
        let store = Arc::new(FlakyStore {
            inner: sqlite.clone(),
            reject,
            fail_sweep,
        });
        fixture_with(store, sqlite)
    }

    #[tokio::test]
    async fn one_failed_upsert_does_not_stop_the_run() {
        let f = flaky(vec!["A2222222"], false);
        let records = vec![with_photo("A1111111"), with_photo("A2222222"), with_photo("A3333333")];

        let out = f.reconciler.reconcile("petharbor", &records, true, at(18)).await.unwrap();
        assert_eq!(out.inserted, 2);
        assert_eq!(out.failed, 1);
        assert_eq!(out.deleted, Some(0));
        assert!(f.store.get("petharbor", "A3333333").unwrap().is_some());
    }

    #[tokio::test]
    async fn sweep_failure_is_not_fatal() {
        let f = flaky(vec![], true);
        let out = f
            .reconciler
            .reconcile("petharbor", &[with_photo("A1111111")], true, at(18))
            .await
            .unwrap();
        assert_eq!(out.inserted, 1);
        assert_eq!(out.deleted, None);
    }

    #[test]
    fn reconcile_future_can_cross_threads() {
        fn assert_send<T: Send>(_: &T) {}
        let f = fixture();
        let records = vec![with_photo("A1111111")];
        let fut = f.reconciler.reconcile("petharbor", &records, true, at(18));
        assert_send(&fut);
    }

    #[tokio::test]
    async fn sole_failed_upsert_still_sweeps() {
        let f = flaky(vec!["A2222222"], false);
        f.store
            .upsert_by_source_and_external_id(&record("A9999999", "HARBOR", 6), "x", at(17))
            .unwrap();

        let out = f
            .reconciler
            .reconcile("petharbor", &[with_photo("A2222222")], true, at(18))
            .await
            .unwrap();
        assert_eq!(out.failed, 1);
        assert_eq!(out.deleted, Some(1));
        assert!(f.store.get("petharbor", "A9999999").unwrap().is_none());
    }
}
