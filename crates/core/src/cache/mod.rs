pub mod checkpoint;

use crate::domain::history::HistoricalSeries;
use crate::error::SourceError;
use anyhow::Context;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

pub const BLOB_FILE: &str = "worldometer_covid19.json";
pub const CHECKPOINT_FILE: &str = "cp";

/// Day-granular cache of the historical series.
///
/// The blob is always written (and renamed into place) before the checkpoint,
/// so a reader that sees today's checkpoint also sees the matching blob.
#[derive(Debug)]
pub struct HistoryCache {
    dir: PathBuf,
    // Serializes refreshes so concurrent callers trigger a single fetch.
    refresh_lock: tokio::sync::Mutex<()>,
    loaded: tokio::sync::Mutex<Option<Loaded>>,
}

#[derive(Debug, Clone)]
struct Loaded {
    version: BlobVersion,
    series: Arc<HistoricalSeries>,
}

// Identifies one write of the blob. Another process rewriting the cache on
// the same day keeps the stamp but changes the modification time or size.
#[derive(Debug, Clone, PartialEq, Eq)]
struct BlobVersion {
    stamp: String,
    modified: Option<SystemTime>,
    len: u64,
}

impl HistoryCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            refresh_lock: tokio::sync::Mutex::new(()),
            loaded: tokio::sync::Mutex::new(None),
        }
    }

    pub fn blob_path(&self) -> PathBuf {
        self.dir.join(BLOB_FILE)
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.dir.join(CHECKPOINT_FILE)
    }

    pub async fn needs_refresh(&self) -> bool {
        self.needs_refresh_at(Utc::now()).await
    }

    /// STALE unless the checkpoint holds `now`'s stamp and the blob exists.
    pub async fn needs_refresh_at(&self, now: DateTime<Utc>) -> bool {
        let today = match checkpoint::date_stamp(now) {
            Ok(s) => s,
            Err(err) => {
                tracing::error!(error = %err, "cannot compute checkpoint stamp; forcing refresh");
                return true;
            }
        };
        let stamp = checkpoint::read_checkpoint(&self.checkpoint_path()).await;
        if stamp.as_deref() != Some(today.as_str()) {
            return true;
        }
        !tokio::fs::metadata(self.blob_path())
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    pub async fn refresh<F, Fut>(&self, fetch: F) -> anyhow::Result<Arc<HistoricalSeries>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<HistoricalSeries>>,
    {
        self.refresh_at(Utc::now(), fetch).await
    }

    /// Fetches unconditionally, then persists blob and checkpoint.
    pub async fn refresh_at<F, Fut>(
        &self,
        now: DateTime<Utc>,
        fetch: F,
    ) -> anyhow::Result<Arc<HistoricalSeries>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<HistoricalSeries>>,
    {
        let _guard = self.refresh_lock.lock().await;
        self.refresh_locked(now, fetch).await
    }

    pub async fn load<F, Fut>(&self, fetch: F) -> anyhow::Result<Arc<HistoricalSeries>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<HistoricalSeries>>,
    {
        self.load_at(Utc::now(), fetch).await
    }

    /// Persisted series, refreshing first when STALE.
    pub async fn load_at<F, Fut>(
        &self,
        now: DateTime<Utc>,
        fetch: F,
    ) -> anyhow::Result<Arc<HistoricalSeries>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<HistoricalSeries>>,
    {
        if self.needs_refresh_at(now).await {
            let _guard = self.refresh_lock.lock().await;
            // Another caller may have refreshed while we waited.
            if self.needs_refresh_at(now).await {
                return self.refresh_locked(now, fetch).await;
            }
        }

        let version = self.blob_version().await;
        let mut loaded = self.loaded.lock().await;
        if let (Some(hit), Some(version)) = (loaded.as_ref(), version.as_ref()) {
            if hit.version == *version {
                return Ok(hit.series.clone());
            }
        }

        let series = Arc::new(self.read_blob().await?);
        *loaded = version.map(|version| Loaded {
            version,
            series: series.clone(),
        });
        Ok(series)
    }

    // Read before the blob itself, so a concurrent rewrite at worst causes
    // one extra reload.
    async fn blob_version(&self) -> Option<BlobVersion> {
        let stamp = checkpoint::read_checkpoint(&self.checkpoint_path()).await?;
        let meta = tokio::fs::metadata(self.blob_path()).await.ok()?;
        Some(BlobVersion {
            stamp,
            modified: meta.modified().ok(),
            len: meta.len(),
        })
    }

    pub async fn read_blob(&self) -> anyhow::Result<HistoricalSeries> {
        let path = self.blob_path();
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("failed to read history cache {}", path.display()))?;
        serde_json::from_slice(&bytes)
            .with_context(|| format!("history cache {} is not valid JSON", path.display()))
    }

    async fn refresh_locked<F, Fut>(
        &self,
        now: DateTime<Utc>,
        fetch: F,
    ) -> anyhow::Result<Arc<HistoricalSeries>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<HistoricalSeries>>,
    {
        let stamp = checkpoint::date_stamp(now)?;
        let series = fetch().await?;

        let blob = serde_json::to_vec(&series).context("failed to serialize history series")?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| cache_write_error(&self.dir, e))?;
        write_atomic(&self.blob_path(), &blob).await?;
        write_atomic(&self.checkpoint_path(), stamp.as_bytes()).await?;

        tracing::info!(
            countries = series.len(),
            checkpoint = %stamp,
            path = %self.blob_path().display(),
            "history cache refreshed"
        );

        let series = Arc::new(series);
        *self.loaded.lock().await = self.blob_version().await.map(|version| Loaded {
            version,
            series: series.clone(),
        });
        Ok(series)
    }
}

fn cache_write_error(path: &Path, err: std::io::Error) -> anyhow::Error {
    anyhow::Error::new(SourceError::CacheWrite {
        path: path.display().to_string(),
        detail: err.to_string(),
    })
}

// Temp file + rename keeps a half-written file from ever being visible at `path`.
async fn write_atomic(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let tmp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4()));
    if let Err(e) = tokio::fs::write(&tmp_path, bytes).await {
        return Err(cache_write_error(path, e));
    }
    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(cache_write_error(path, e));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::history::DailyRecord;
    use chrono::{Duration, TimeZone};
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()
    }

    fn sample_series() -> HistoricalSeries {
        let mut early = DailyRecord::new("Feb 15");
        early.total_cases = Some(3);
        early.active_cases = Some(3);
        let mut late = DailyRecord::new("Feb 16");
        late.total_cases = Some(5);
        late.new_cases = Some(2);
        late.active_cases = Some(4);
        late.total_deaths = Some(1);
        late.new_deaths = Some(1);

        let mut map = BTreeMap::new();
        map.insert("Italy".to_string(), vec![early, late]);
        map.insert("Peru".to_string(), vec![]);
        HistoricalSeries(map)
    }

    #[tokio::test]
    async fn first_run_is_stale() {
        let dir = tempfile::tempdir().unwrap();
        let cache = HistoryCache::new(dir.path());
        assert!(cache.needs_refresh_at(now()).await);
    }

    #[tokio::test]
    async fn yesterdays_checkpoint_is_stale_todays_is_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let cache = HistoryCache::new(dir.path());
        std::fs::write(cache.blob_path(), "{}").unwrap();

        let yesterday = checkpoint::date_stamp(now() - Duration::days(1)).unwrap();
        std::fs::write(cache.checkpoint_path(), yesterday).unwrap();
        assert!(cache.needs_refresh_at(now()).await);

        let today = checkpoint::date_stamp(now()).unwrap();
        std::fs::write(cache.checkpoint_path(), today).unwrap();
        assert!(!cache.needs_refresh_at(now()).await);
    }

    #[tokio::test]
    async fn missing_blob_forces_refresh_despite_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let cache = HistoryCache::new(dir.path());
        let today = checkpoint::date_stamp(now()).unwrap();
        std::fs::write(cache.checkpoint_path(), today).unwrap();
        assert!(cache.needs_refresh_at(now()).await);
    }

    #[tokio::test]
    async fn refresh_persists_blob_then_checkpoint_and_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let cache = HistoryCache::new(dir.path());

        let refreshed = cache
            .refresh_at(now(), || async { Ok(sample_series()) })
            .await
            .unwrap();
        assert_eq!(*refreshed, sample_series());
        assert!(!cache.needs_refresh_at(now()).await);

        let reopened = HistoryCache::new(dir.path());
        let loaded = reopened
            .load_at(now(), || async { Err(anyhow::anyhow!("fresh cache must not fetch")) })
            .await
            .unwrap();
        assert_eq!(*loaded, sample_series());
        assert_eq!(reopened.read_blob().await.unwrap(), sample_series());
    }

    #[tokio::test]
    async fn blob_write_failure_leaves_checkpoint_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let cache = HistoryCache::new(dir.path());
        // A directory where the blob should go makes the rename fail.
        std::fs::create_dir(cache.blob_path()).unwrap();
        std::fs::write(cache.blob_path().join("keep"), "x").unwrap();

        let err = cache
            .refresh_at(now(), || async { Ok(sample_series()) })
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SourceError>(),
            Some(SourceError::CacheWrite { .. })
        ));
        assert_eq!(checkpoint::read_checkpoint(&cache.checkpoint_path()).await, None);
        assert!(cache.needs_refresh_at(now()).await);
    }

    #[tokio::test]
    async fn failed_fetch_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let cache = HistoryCache::new(dir.path());
        let res = cache
            .load_at(now(), || async { Err(anyhow::anyhow!("source down")) })
            .await;
        assert!(res.is_err());
        assert!(!cache.blob_path().exists());
        assert!(!cache.checkpoint_path().exists());
    }

    #[tokio::test]
    async fn load_refreshes_once_per_day() {
        let dir = tempfile::tempdir().unwrap();
        let cache = HistoryCache::new(dir.path());
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let fetch = move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(sample_series())
        };

        cache.load_at(now(), fetch).await.unwrap();
        cache.load_at(now() + Duration::hours(6), fetch).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        cache.load_at(now() + Duration::days(1), fetch).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn concurrent_loads_share_one_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let cache = HistoryCache::new(dir.path());
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let fetch = move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            Ok(sample_series())
        };

        let (a, b) = tokio::join!(cache.load_at(now(), fetch), cache.load_at(now(), fetch));
        assert_eq!(*a.unwrap(), *b.unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    fn single_country(name: &str) -> HistoricalSeries {
        let mut map = BTreeMap::new();
        map.insert(name.to_string(), vec![DailyRecord::new("Mar 1")]);
        HistoricalSeries(map)
    }

    #[tokio::test]
    async fn load_picks_up_a_rewrite_from_another_process() {
        let dir = tempfile::tempdir().unwrap();
        let api = HistoryCache::new(dir.path());
        let worker = HistoryCache::new(dir.path());

        let first = api
            .load_at(now(), || async { Ok(single_country("Chad")) })
            .await
            .unwrap();
        assert_eq!(first.countries().collect::<Vec<_>>(), vec!["Chad"]);

        worker
            .refresh_at(now() + Duration::hours(1), || async { Ok(single_country("Portugal")) })
            .await
            .unwrap();

        let served = api
            .load_at(now() + Duration::hours(2), || async {
                Err(anyhow::anyhow!("fresh cache must not fetch"))
            })
            .await
            .unwrap();
        assert_eq!(*served, api.read_blob().await.unwrap());
        assert_eq!(served.countries().collect::<Vec<_>>(), vec!["Portugal"]);
    }
}
