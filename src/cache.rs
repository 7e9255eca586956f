//! On-disk dataset cache with TTL and version invalidation
//!
//! Downloaded agency datasets are kept under one cache root per
//! [`crate::config::EngineConfig`]. A JSON manifest records what was
//! fetched, when, and under which version/ttl. The whole
//! check-refresh-manifest sequence runs under a cross-process advisory lock
//! file, so concurrent callers never read a half-written file and never run
//! the same fetcher twice at once. The manifest is rewritten wholesale under
//! the lock, never patched incrementally.

use crate::error::{DeflateError, Result};
use chrono::{DateTime, Duration, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

const MANIFEST_FILE: &str = "manifest.json";
const LOCK_FILE: &str = "cache.lock";

/// How long to wait for the cache lock before failing loudly.
const LOCK_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);
const LOCK_RETRY: std::time::Duration = std::time::Duration::from_millis(100);
/// A lock file older than this is considered abandoned and broken.
const LOCK_STALE_AFTER: std::time::Duration = std::time::Duration::from_secs(600);

/// Upper bound on concurrent fetches in [`DatasetCache::ensure_all`].
const FETCH_WORKERS: usize = 4;

/// Procedure that writes fresh dataset bytes to the given path.
pub type Fetcher = Box<dyn Fn(&Path) -> Result<()> + Send + Sync>;

/// One cacheable dataset: stable key, target filename, fetch procedure,
/// time-to-live in days, optional version tag.
pub struct CacheEntry {
    pub key: String,
    pub filename: String,
    pub ttl_days: i64,
    pub version: Option<String>,
    pub fetcher: Fetcher,
}

impl CacheEntry {
    pub fn new(
        key: impl Into<String>,
        filename: impl Into<String>,
        ttl_days: i64,
        version: Option<String>,
        fetcher: Fetcher,
    ) -> Self {
        Self {
            key: key.into(),
            filename: filename.into(),
            ttl_days,
            version,
            fetcher,
        }
    }
}

impl std::fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEntry")
            .field("key", &self.key)
            .field("filename", &self.filename)
            .field("ttl_days", &self.ttl_days)
            .field("version", &self.version)
            .field("fetcher", &"<Fetcher>")
            .finish()
    }
}

/// One persisted manifest row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheRecord {
    pub filename: String,
    pub downloaded_at: DateTime<Utc>,
    pub ttl_days: i64,
    pub version: Option<String>,
}

type Manifest = HashMap<String, CacheRecord>;

/// Dataset cache rooted at one directory
#[derive(Debug, Clone)]
pub struct DatasetCache {
    root: PathBuf,
}

impl DatasetCache {
    /// Open (and create if needed) a cache at the given root
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .map_err(|e| DeflateError::Cache(format!("cannot create cache root: {}", e)))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Return a local path guaranteed to contain current data for `entry`.
    ///
    /// When `refresh` is false and the manifest record exists, the file
    /// exists, the versions match, and the record is within its ttl, the
    /// existing path is returned with no further IO. Otherwise the fetcher
    /// writes to a process-scoped temp path which atomically replaces the
    /// target, and the manifest is rewritten.
    pub fn ensure(&self, entry: &CacheEntry, refresh: bool) -> Result<PathBuf> {
        let _lock = CacheLock::acquire(&self.root)?;
        let target = self.root.join(&entry.filename);

        if !refresh {
            let manifest = self.read_manifest();
            if self.is_current(&manifest, entry, &target) {
                return Ok(target);
            }
        }

        let mut manifest = self.read_manifest();
        self.refresh_entry(entry, &target, &mut manifest)?;
        self.write_manifest(&manifest)?;
        Ok(target)
    }

    /// Ensure several entries at once. Stale entries are fetched in parallel
    /// on a bounded worker pool; freshness checks, renames, and the manifest
    /// rewrite stay single-threaded under one lock acquisition.
    pub fn ensure_all(&self, entries: &[CacheEntry], refresh: bool) -> Result<Vec<PathBuf>> {
        let _lock = CacheLock::acquire(&self.root)?;
        let mut manifest = self.read_manifest();

        let mut paths = Vec::with_capacity(entries.len());
        let mut stale: Vec<(usize, &CacheEntry)> = Vec::new();
        for (idx, entry) in entries.iter().enumerate() {
            let target = self.root.join(&entry.filename);
            if !refresh && self.is_current(&manifest, entry, &target) {
                paths.push(target);
            } else {
                paths.push(target);
                stale.push((idx, entry));
            }
        }

        if stale.is_empty() {
            return Ok(paths);
        }

        let workers = FETCH_WORKERS.min(stale.len());
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .map_err(|e| DeflateError::Cache(format!("cannot build fetch pool: {}", e)))?;

        let fetched: Vec<(usize, Result<PathBuf>)> = pool.install(|| {
            stale
                .par_iter()
                .map(|(idx, entry)| {
                    let tmp = self.temp_path(entry);
                    let result = (entry.fetcher)(&tmp).map(|_| tmp.clone());
                    if result.is_err() {
                        let _ = fs::remove_file(&tmp);
                    }
                    (*idx, result)
                })
                .collect()
        });

        // Single-threaded assembly: commit every successful download, then
        // surface the first failure if any.
        let mut first_error = None;
        for (idx, result) in fetched {
            match result {
                Ok(tmp) => {
                    let entry = &entries[idx];
                    let target = self.root.join(&entry.filename);
                    fs::rename(&tmp, &target)
                        .map_err(|e| DeflateError::Cache(format!("atomic replace failed: {}", e)))?;
                    manifest.insert(entry.key.clone(), Self::record_for(entry));
                }
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }
        self.write_manifest(&manifest)?;

        match first_error {
            Some(e) => Err(e),
            None => Ok(paths),
        }
    }

    /// Delete one cached file and its record, or all of them when `key` is
    /// omitted.
    pub fn clear(&self, key: Option<&str>) -> Result<()> {
        let _lock = CacheLock::acquire(&self.root)?;
        let mut manifest = self.read_manifest();

        match key {
            Some(key) => {
                if let Some(record) = manifest.remove(key) {
                    let path = self.root.join(&record.filename);
                    if path.exists() {
                        fs::remove_file(&path)?;
                    }
                }
                self.write_manifest(&manifest)?;
            }
            None => {
                for record in manifest.values() {
                    let path = self.root.join(&record.filename);
                    if path.exists() {
                        fs::remove_file(&path)?;
                    }
                }
                let manifest_path = self.manifest_path();
                if manifest_path.exists() {
                    fs::remove_file(&manifest_path)?;
                }
            }
        }
        Ok(())
    }

    fn is_current(&self, manifest: &Manifest, entry: &CacheEntry, target: &Path) -> bool {
        let record = match manifest.get(&entry.key) {
            Some(record) => record,
            None => return false,
        };
        if !target.exists() || record.version != entry.version {
            return false;
        }
        let age = Utc::now() - record.downloaded_at;
        age <= Duration::days(record.ttl_days)
    }

    fn refresh_entry(
        &self,
        entry: &CacheEntry,
        target: &Path,
        manifest: &mut Manifest,
    ) -> Result<()> {
        let tmp = self.temp_path(entry);
        if let Err(e) = (entry.fetcher)(&tmp) {
            // Leave the previous cached file and manifest untouched.
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }
        fs::rename(&tmp, target)
            .map_err(|e| DeflateError::Cache(format!("atomic replace failed: {}", e)))?;
        manifest.insert(entry.key.clone(), Self::record_for(entry));
        Ok(())
    }

    fn record_for(entry: &CacheEntry) -> CacheRecord {
        CacheRecord {
            filename: entry.filename.clone(),
            downloaded_at: Utc::now(),
            ttl_days: entry.ttl_days,
            version: entry.version.clone(),
        }
    }

    fn temp_path(&self, entry: &CacheEntry) -> PathBuf {
        self.root
            .join(format!("{}.{}.tmp", entry.filename, std::process::id()))
    }

    fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    /// A missing or unparsable manifest reads as "no records", never fatal.
    fn read_manifest(&self) -> Manifest {
        let path = self.manifest_path();
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(_) => return Manifest::new(),
        };
        match serde_json::from_str(&raw) {
            Ok(manifest) => manifest,
            Err(e) => {
                log::warn!("unreadable cache manifest at {}: {}", path.display(), e);
                Manifest::new()
            }
        }
    }

    fn write_manifest(&self, manifest: &Manifest) -> Result<()> {
        let raw = serde_json::to_string_pretty(manifest)?;
        fs::write(self.manifest_path(), raw)
            .map_err(|e| DeflateError::Cache(format!("cannot write manifest: {}", e)))?;
        Ok(())
    }
}

/// Cross-process advisory lock, held for the full check-refresh-write
/// sequence. Acquisition retries with a bounded timeout.
struct CacheLock {
    path: PathBuf,
}

impl CacheLock {
    fn acquire(root: &Path) -> Result<Self> {
        let path = root.join(LOCK_FILE);
        let deadline = Instant::now() + LOCK_TIMEOUT;

        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    let _ = write!(file, "{}", std::process::id());
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if Self::is_stale(&path) {
                        log::warn!("breaking stale cache lock at {}", path.display());
                        let _ = fs::remove_file(&path);
                        continue;
                    }
                    if Instant::now() >= deadline {
                        return Err(DeflateError::Cache(format!(
                            "timed out waiting for cache lock at {}",
                            path.display()
                        )));
                    }
                    std::thread::sleep(LOCK_RETRY);
                }
                Err(e) => {
                    return Err(DeflateError::Cache(format!(
                        "cannot acquire cache lock: {}",
                        e
                    )))
                }
            }
        }
    }

    fn is_stale(path: &Path) -> bool {
        fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| modified.elapsed().ok())
            .map(|age| age > LOCK_STALE_AFTER)
            .unwrap_or(false)
    }
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn counting_entry(
        key: &str,
        ttl_days: i64,
        version: Option<&str>,
        counter: Arc<AtomicUsize>,
    ) -> CacheEntry {
        CacheEntry::new(
            key,
            format!("{}.csv", key),
            ttl_days,
            version.map(|v| v.to_string()),
            Box::new(move |path| {
                counter.fetch_add(1, Ordering::SeqCst);
                fs::write(path, b"year,value\n2020,1.0\n")?;
                Ok(())
            }),
        )
    }

    #[test]
    fn test_fetcher_called_once_until_expiry() {
        let dir = tempdir().unwrap();
        let cache = DatasetCache::new(dir.path()).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let entry = counting_entry("imf_weo", 30, None, counter.clone());

        let path1 = cache.ensure(&entry, false).unwrap();
        let path2 = cache.ensure(&entry, false).unwrap();
        assert_eq!(path1, path2);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(path1.exists());

        // Age the manifest record past its ttl; the next ensure refetches.
        let manifest_path = dir.path().join(MANIFEST_FILE);
        let raw = fs::read_to_string(&manifest_path).unwrap();
        let mut manifest: Manifest = serde_json::from_str(&raw).unwrap();
        let record = manifest.get_mut("imf_weo").unwrap();
        record.downloaded_at = Utc::now() - Duration::days(31);
        fs::write(&manifest_path, serde_json::to_string(&manifest).unwrap()).unwrap();

        cache.ensure(&entry, false).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_version_mismatch_refetches() {
        let dir = tempdir().unwrap();
        let cache = DatasetCache::new(dir.path()).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        let v1 = counting_entry("weo", 30, Some("2024a"), counter.clone());
        cache.ensure(&v1, false).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        let v2 = counting_entry("weo", 30, Some("2024b"), counter.clone());
        cache.ensure(&v2, false).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_refresh_flag_forces_fetch() {
        let dir = tempdir().unwrap();
        let cache = DatasetCache::new(dir.path()).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let entry = counting_entry("rates", 30, None, counter.clone());

        cache.ensure(&entry, false).unwrap();
        cache.ensure(&entry, true).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_fetcher_failure_keeps_previous_file() {
        let dir = tempdir().unwrap();
        let cache = DatasetCache::new(dir.path()).unwrap();

        let good = CacheEntry::new(
            "ds",
            "ds.csv",
            30,
            None,
            Box::new(|path| {
                fs::write(path, b"good")?;
                Ok(())
            }),
        );
        let path = cache.ensure(&good, false).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"good");

        let bad = CacheEntry::new(
            "ds",
            "ds.csv",
            30,
            None,
            Box::new(|_| Err(DeflateError::data_source("ds", "download failed"))),
        );
        let result = cache.ensure(&bad, true);
        assert!(result.is_err());

        // Previous cached bytes remain authoritative; no temp files linger.
        assert_eq!(fs::read(&path).unwrap(), b"good");
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_corrupt_manifest_reads_as_empty() {
        let dir = tempdir().unwrap();
        let cache = DatasetCache::new(dir.path()).unwrap();
        fs::write(dir.path().join(MANIFEST_FILE), b"{ not json").unwrap();

        let counter = Arc::new(AtomicUsize::new(0));
        let entry = counting_entry("x", 30, None, counter.clone());
        cache.ensure(&entry, false).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_clear_single_and_all() {
        let dir = tempdir().unwrap();
        let cache = DatasetCache::new(dir.path()).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let a = counting_entry("a", 30, None, counter.clone());
        let b = counting_entry("b", 30, None, counter.clone());

        let pa = cache.ensure(&a, false).unwrap();
        let pb = cache.ensure(&b, false).unwrap();

        cache.clear(Some("a")).unwrap();
        assert!(!pa.exists());
        assert!(pb.exists());

        cache.clear(None).unwrap();
        assert!(!pb.exists());
        assert!(!dir.path().join(MANIFEST_FILE).exists());
    }

    #[test]
    fn test_ensure_all_parallel_fetch() {
        let dir = tempdir().unwrap();
        let cache = DatasetCache::new(dir.path()).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        let entries: Vec<CacheEntry> = ["gdp", "cpi", "fx"]
            .iter()
            .map(|k| counting_entry(k, 30, None, counter.clone()))
            .collect();

        let paths = cache.ensure_all(&entries, false).unwrap();
        assert_eq!(paths.len(), 3);
        assert!(paths.iter().all(|p| p.exists()));
        assert_eq!(counter.load(Ordering::SeqCst), 3);

        // Everything fresh now; no further fetches.
        cache.ensure_all(&entries, false).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_lock_released_after_ensure() {
        let dir = tempdir().unwrap();
        let cache = DatasetCache::new(dir.path()).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let entry = counting_entry("k", 30, None, counter);

        cache.ensure(&entry, false).unwrap();
        assert!(!dir.path().join(LOCK_FILE).exists());
    }
}
