//! On-disk cache of fitted preprocessing steps.
//!
//! Entries are JSON files keyed by `FitFingerprint` (plan configuration plus
//! input data). Writes go to a temp file that is renamed into place, so a
//! reader never sees a partial entry. Within one process a per-fingerprint
//! lock makes concurrent pipelines wait for the first fit instead of
//! repeating it; across processes two writers of one fingerprint produce the
//! same content and the last rename wins.
//!
//! Nothing is evicted automatically. `clear` and `prune_older_than` are the
//! operator's tools for bounding disk use.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use gradestack_core::fingerprint::FitFingerprint;
use gradestack_core::preprocess::FittedColumnPlan;

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    fingerprint: FitFingerprint,
    created_at: DateTime<Utc>,
    fitted: FittedColumnPlan,
}

/// Cache of fitted column plans.
///
/// Clones share the directory, the in-process locks and the hit/miss
/// counters.
#[derive(Debug, Clone)]
pub struct FitCache {
    cache_dir: PathBuf,
    locks: Arc<Mutex<HashMap<FitFingerprint, Arc<Mutex<()>>>>>,
    hits: Arc<AtomicUsize>,
    misses: Arc<AtomicUsize>,
}

impl FitCache {
    /// Creates a cache in `cache_dir`, creating the directory if needed.
    pub fn new(cache_dir: impl AsRef<Path>) -> Result<Self> {
        let cache_dir = cache_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&cache_dir)
            .with_context(|| format!("Failed to create cache directory {}", cache_dir.display()))?;

        Ok(Self {
            cache_dir,
            locks: Arc::new(Mutex::new(HashMap::new())),
            hits: Arc::new(AtomicUsize::new(0)),
            misses: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Lookups answered from disk.
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    /// Lookups that had to fit.
    pub fn misses(&self) -> usize {
        self.misses.load(Ordering::SeqCst)
    }

    pub fn contains(&self, fingerprint: &FitFingerprint) -> bool {
        self.entry_path(fingerprint).exists()
    }

    /// Reads an entry. Returns `None` if it is not cached.
    pub fn get(&self, fingerprint: &FitFingerprint) -> Result<Option<FittedColumnPlan>> {
        let path = self.entry_path(fingerprint);
        if !path.exists() {
            return Ok(None);
        }

        let json = std::fs::read_to_string(&path).context("Failed to read cached fit")?;
        let entry: CacheEntry =
            serde_json::from_str(&json).context("Failed to deserialize cached fit")?;
        if &entry.fingerprint != fingerprint {
            return Err(anyhow!(
                "cache entry {} holds fingerprint {}",
                path.display(),
                entry.fingerprint
            ));
        }
        Ok(Some(entry.fitted))
    }

    /// Writes an entry atomically (temp file, then rename).
    pub fn put(&self, fingerprint: &FitFingerprint, fitted: &FittedColumnPlan) -> Result<()> {
        let entry = CacheEntry {
            fingerprint: fingerprint.clone(),
            created_at: Utc::now(),
            fitted: fitted.clone(),
        };
        let json = serde_json::to_string(&entry).context("Failed to serialize fit")?;

        let path = self.entry_path(fingerprint);
        let tmp = self.cache_dir.join(format!(
            "{}.json.tmp-{}-{}",
            fingerprint,
            std::process::id(),
            TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        std::fs::write(&tmp, json).context("Failed to write cached fit")?;
        std::fs::rename(&tmp, &path).context("Failed to move cached fit into place")?;
        Ok(())
    }

    /// Returns the cached fit for `fingerprint`, running `fit` only when no
    /// entry exists. Concurrent callers with the same fingerprint wait for
    /// the first one.
    pub fn get_or_fit<F, E>(&self, fingerprint: &FitFingerprint, fit: F) -> std::result::Result<FittedColumnPlan, E>
    where
        F: FnOnce() -> std::result::Result<FittedColumnPlan, E>,
        E: From<anyhow::Error>,
    {
        let slot = {
            let mut locks = self
                .locks
                .lock()
                .map_err(|_| anyhow!("fit cache lock table poisoned"))?;
            Arc::clone(locks.entry(fingerprint.clone()).or_default())
        };
        let result = self.fit_locked(&slot, fingerprint, fit);
        self.release(fingerprint, slot);
        result
    }

    fn fit_locked<F, E>(
        &self,
        slot: &Mutex<()>,
        fingerprint: &FitFingerprint,
        fit: F,
    ) -> std::result::Result<FittedColumnPlan, E>
    where
        F: FnOnce() -> std::result::Result<FittedColumnPlan, E>,
        E: From<anyhow::Error>,
    {
        let _guard = slot
            .lock()
            .map_err(|_| anyhow!("fit cache lock for {fingerprint} poisoned"))?;

        match self.get(fingerprint) {
            Ok(Some(fitted)) => {
                self.hits.fetch_add(1, Ordering::SeqCst);
                tracing::debug!(%fingerprint, "fit cache hit");
                return Ok(fitted);
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(%fingerprint, error = %err, "unreadable fit cache entry, refitting");
            }
        }

        self.misses.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(%fingerprint, "fit cache miss");
        let fitted = fit()?;
        self.put(fingerprint, &fitted)?;
        Ok(fitted)
    }

    /// Drops the lock slot once no other caller holds or waits on it, so the
    /// table only holds fingerprints with a fit in flight.
    fn release(&self, fingerprint: &FitFingerprint, slot: Arc<Mutex<()>>) {
        let Ok(mut locks) = self.locks.lock() else {
            return;
        };
        // one reference in the table, one here
        if Arc::strong_count(&slot) == 2 {
            locks.remove(fingerprint);
        }
    }

    /// Fingerprints with a fit in flight.
    #[cfg(test)]
    fn in_flight(&self) -> usize {
        self.locks.lock().map(|locks| locks.len()).unwrap_or(0)
    }

    pub fn remove(&self, fingerprint: &FitFingerprint) -> Result<()> {
        let path = self.entry_path(fingerprint);
        if path.exists() {
            std::fs::remove_file(&path).context("Failed to remove cached fit")?;
        }
        Ok(())
    }

    /// Removes every entry.
    pub fn clear(&self) -> Result<()> {
        for path in self.entry_paths()? {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    /// Removes entries last written more than `age` ago. Returns how many
    /// were removed.
    pub fn prune_older_than(&self, age: Duration) -> Result<usize> {
        let now = SystemTime::now();
        let mut removed = 0;
        for path in self.entry_paths()? {
            let modified = std::fs::metadata(&path)
                .and_then(|m| m.modified())
                .with_context(|| format!("Failed to stat {}", path.display()))?;
            let elapsed = now.duration_since(modified).unwrap_or_default();
            if elapsed > age {
                std::fs::remove_file(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.entry_paths()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn entry_paths(&self) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(&self.cache_dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("json") {
                paths.push(path);
            }
        }
        Ok(paths)
    }

    fn entry_path(&self, fingerprint: &FitFingerprint) -> PathBuf {
        self.cache_dir.join(format!("{fingerprint}.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gradestack_core::preprocess::ColumnPlan;
    use polars::prelude::*;

    fn fitted() -> (FitFingerprint, FittedColumnPlan) {
        let df = DataFrame::new(vec![Column::new("age".into(), vec![1.0, 2.0, 3.0])]).unwrap();
        let plan = ColumnPlan::new(vec!["age".into()], vec![], vec![]);
        let fp = FitFingerprint::of(&plan, &df).unwrap();
        (fp, plan.fit(&df).unwrap())
    }

    #[test]
    fn test_cache_put_get() {
        let temp_dir = tempfile::tempdir().unwrap();
        let cache = FitCache::new(temp_dir.path()).unwrap();
        let (fp, fit) = fitted();

        assert!(!cache.contains(&fp));
        assert!(cache.get(&fp).unwrap().is_none());

        cache.put(&fp, &fit).unwrap();
        assert!(cache.contains(&fp));
        assert_eq!(cache.get(&fp).unwrap().unwrap(), fit);
        // no temp files left behind
        assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_get_or_fit_runs_fit_once() {
        let temp_dir = tempfile::tempdir().unwrap();
        let cache = FitCache::new(temp_dir.path()).unwrap();
        let (fp, fit) = fitted();
        let mut calls = 0;

        for _ in 0..3 {
            let got: std::result::Result<_, anyhow::Error> = cache.get_or_fit(&fp, || {
                calls += 1;
                Ok(fit.clone())
            });
            assert_eq!(got.unwrap(), fit);
        }
        assert_eq!(calls, 1);
        assert_eq!(cache.misses(), 1);
        assert_eq!(cache.hits(), 2);
    }

    #[test]
    fn test_parallel_callers_share_one_fit() {
        let temp_dir = tempfile::tempdir().unwrap();
        let cache = FitCache::new(temp_dir.path()).unwrap();
        let (fp, fit) = fitted();
        let calls = AtomicUsize::new(0);

        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    let got: std::result::Result<_, anyhow::Error> = cache.get_or_fit(&fp, || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(fit.clone())
                    });
                    got.unwrap();
                });
            }
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.misses(), 1);
        assert_eq!(cache.hits(), 3);
        assert_eq!(cache.in_flight(), 0);
    }

    #[test]
    fn test_lock_slots_are_released_after_fit() {
        let temp_dir = tempfile::tempdir().unwrap();
        let cache = FitCache::new(temp_dir.path()).unwrap();
        let plan = ColumnPlan::new(vec!["age".into()], vec![], vec![]);

        for n in 2..12 {
            let df = DataFrame::new(vec![Column::new("age".into(), (0..n).map(f64::from).collect::<Vec<_>>())])
                .unwrap();
            let fp = FitFingerprint::of(&plan, &df).unwrap();
            let got: std::result::Result<_, anyhow::Error> = cache.get_or_fit(&fp, || Ok(plan.fit(&df)?));
            got.unwrap();
            assert_eq!(cache.in_flight(), 0);
        }
        assert_eq!(cache.len().unwrap(), 10);

        let (fp, _) = fitted();
        let failed: std::result::Result<_, anyhow::Error> = cache.get_or_fit(&fp, || Err(anyhow!("boom")));
        assert!(failed.is_err());
        assert_eq!(cache.in_flight(), 0);
    }

    #[test]
    fn test_corrupt_entry_is_refit() {
        let temp_dir = tempfile::tempdir().unwrap();
        let cache = FitCache::new(temp_dir.path()).unwrap();
        let (fp, fit) = fitted();
        std::fs::write(temp_dir.path().join(format!("{fp}.json")), "{not json").unwrap();

        let got: std::result::Result<_, anyhow::Error> = cache.get_or_fit(&fp, || Ok(fit.clone()));
        assert_eq!(got.unwrap(), fit);
        assert_eq!(cache.get(&fp).unwrap().unwrap(), fit);
    }

    #[test]
    fn test_cache_clear_and_prune() {
        let temp_dir = tempfile::tempdir().unwrap();
        let cache = FitCache::new(temp_dir.path()).unwrap();
        let (fp, fit) = fitted();
        cache.put(&fp, &fit).unwrap();
        assert_eq!(cache.len().unwrap(), 1);

        assert_eq!(cache.prune_older_than(std::time::Duration::from_secs(3600)).unwrap(), 0);
        assert_eq!(cache.len().unwrap(), 1);

        cache.clear().unwrap();
        assert!(cache.is_empty().unwrap());
    }
}
