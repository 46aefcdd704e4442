// Oracle responses are deterministic for a given request, so they are
// replayable across runs: an interrupted attack resumes from disk instead
// of re-querying the target.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use parking_lot::Mutex;
use tracing::warn;

use crate::oracle::OracleResult;

pub const DEFAULT_CACHE_PATH: &str = "padoracle-cache.json.gz.txt";

/// Lookup/append store keyed by request signature. Entries are idempotent,
/// so duplicate writes from concurrent probes are harmless.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> Option<OracleResult>;
    fn set(&self, key: &str, value: OracleResult);
}

/// Plain in-memory store, for one-shot library use and tests.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, OracleResult>>,
}

impl CacheStore for MemoryCache {
    fn get(&self, key: &str) -> Option<OracleResult> {
        self.entries.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: OracleResult) {
        self.entries.lock().insert(key.to_string(), value);
    }
}

/// File-backed store: one base64 line of gzipped JSON, loaded eagerly on
/// open and rewritten by `persist`.
pub struct FileCache {
    path: PathBuf,
    entries: Mutex<HashMap<String, OracleResult>>,
    dirty: AtomicBool,
}

impl FileCache {
    /// Open (or lazily create) the store at `path`. An unreadable or
    /// corrupt file is discarded with a warning rather than failing the
    /// run; the cache is an optimization, not a dependency.
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let entries = match Self::load(&path) {
            Ok(entries) => entries,
            Err(err) => {
                if path.exists() {
                    warn!("ignoring unreadable cache file {}: {err}", path.display());
                }
                HashMap::new()
            }
        };
        Self {
            path,
            entries: Mutex::new(entries),
            dirty: AtomicBool::new(false),
        }
    }

    fn load(path: &Path) -> std::io::Result<HashMap<String, OracleResult>> {
        let text = std::fs::read_to_string(path)?;
        let compressed = BASE64
            .decode(text.trim())
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
        let mut json = String::new();
        GzDecoder::new(compressed.as_slice()).read_to_string(&mut json)?;
        serde_json::from_str(&json).map_err(Into::into)
    }

    /// Write the store back to disk if anything changed since the last
    /// persist.
    pub fn persist(&self) -> std::io::Result<()> {
        if !self.dirty.load(Ordering::Acquire) {
            return Ok(());
        }
        let json = serde_json::to_string(&*self.entries.lock())?;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(json.as_bytes())?;
        let compressed = encoder.finish()?;
        std::fs::write(&self.path, BASE64.encode(compressed))?;
        self.dirty.store(false, Ordering::Release);
        Ok(())
    }
}

impl CacheStore for FileCache {
    fn get(&self, key: &str) -> Option<OracleResult> {
        self.entries.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: OracleResult) {
        self.entries.lock().insert(key.to_string(), value);
        self.dirty.store(true, Ordering::Release);
    }
}

impl Drop for FileCache {
    fn drop(&mut self) {
        if let Err(err) = self.persist() {
            warn!("failed to persist oracle cache to {}: {err}", self.path.display());
        }
    }
}
