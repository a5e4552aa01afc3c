//! Memoized nested-query results, optionally persisted to a JSON file.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use weave_core::{Result, Value};

use crate::key::CacheKey;

/// On-disk layout of a persisted cache.
#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    entries: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub total: u64,
    pub cached: u64,
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Total queries: {}, Cached queries: {}",
            self.total, self.cached
        )
    }
}

#[derive(Debug)]
pub struct ResultCache {
    path: Option<PathBuf>,
    entries: Mutex<BTreeMap<CacheKey, Value>>,
    total: AtomicU64,
    cached: AtomicU64,
}

impl ResultCache {
    /// A cache that is never written to disk.
    pub fn in_memory() -> Self {
        Self::with_entries(None, BTreeMap::new())
    }

    /// Loads the cache persisted at `path`. A missing file starts empty; an
    /// unreadable or corrupt one is reported and also starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = if path.exists() {
            match load(&path) {
                Ok(entries) => {
                    debug!(path = %path.display(), entries = entries.len(), "loaded result cache");
                    entries
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to load result cache, starting empty");
                    BTreeMap::new()
                }
            }
        } else {
            BTreeMap::new()
        };
        Self::with_entries(Some(path), entries)
    }

    fn with_entries(path: Option<PathBuf>, entries: BTreeMap<CacheKey, Value>) -> Self {
        Self {
            path,
            entries: Mutex::new(entries),
            total: AtomicU64::new(0),
            cached: AtomicU64::new(0),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn get(&self, key: &CacheKey) -> Option<Value> {
        self.lock().get(key).cloned()
    }

    /// Stores `value` and persists the whole cache.
    pub fn insert(&self, key: CacheKey, value: Value) -> Result<()> {
        self.lock().insert(key, value);
        self.persist()
    }

    /// Returns the cached result of `source` applied to `args`, computing and
    /// storing it on a miss.
    pub async fn lookup_or_compute<A, F, Fut>(
        &self,
        source: &str,
        args: &A,
        compute: F,
    ) -> Result<Value>
    where
        A: Serialize + fmt::Debug + ?Sized,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        self.total.fetch_add(1, Ordering::Relaxed);

        let key = match CacheKey::new(source, args) {
            Ok(key) => key,
            Err(e) => {
                warn!(error = %e, "keying cached query by its debug rendering instead");
                CacheKey::fallback(source, args)
            }
        };

        if let Some(value) = self.get(&key) {
            self.cached.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "result cache hit");
            return Ok(value);
        }

        let value = compute().await?;
        self.lock().insert(key, value.clone());
        if let Err(e) = self.persist() {
            warn!(error = %e, "failed to persist result cache");
        }
        Ok(value)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            total: self.total.load(Ordering::Relaxed),
            cached: self.cached.load(Ordering::Relaxed),
        }
    }

    /// Writes all entries to the backing file through a temporary file and a
    /// rename. No-op for in-memory caches.
    pub fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let file = CacheFile {
            entries: self
                .lock()
                .iter()
                .map(|(k, v)| (k.as_str().to_string(), v.clone()))
                .collect(),
        };
        let bytes = serde_json::to_vec(&file)?;

        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, bytes)?;
        fs::rename(&temp_path, path)?;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<CacheKey, Value>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn load(path: &Path) -> Result<BTreeMap<CacheKey, Value>> {
    let bytes = fs::read(path)?;
    let file: CacheFile = serde_json::from_slice(&bytes)?;
    Ok(file
        .entries
        .into_iter()
        .map(|(k, v)| (CacheKey::from_raw(k), v))
        .collect())
}
