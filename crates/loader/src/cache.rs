//! Content-addressed cache for assembled compose files.
//!
//! Entries are keyed by manifest digest, ensuring:
//! - Same digest = same document, across projects and processes
//! - Fast cache hits without downloading layers again
//! - No partially written entry is ever visible (stage, then rename)

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tempfile::TempDir;
use tracing::{debug, trace};

use crate::digest::validate_digest;
use crate::{Error, Result};

/// File name of the composed document inside each entry.
pub const DOCUMENT_FILE_NAME: &str = "compose.yaml";

/// Subdirectory holding entries produced by the OCI loader.
const SCHEME_DIR: &str = "oci";

/// Prefix of in-flight staging directories.
const STAGING_PREFIX: &str = ".staging-";

/// Staging directories older than this are leftovers of crashed processes.
const STALE_STAGING_SECS: i64 = 3600;

/// Upper bound for age limits, keeping the cutoff within chrono's range.
const MAX_AGE_DAYS_CAP: i64 = 365_000;

/// Content-addressed cache for compose documents.
///
/// Default location: `~/.cache/conflux/`
///
/// Structure:
/// ```text
/// ~/.cache/conflux/
/// └── oci/
///     ├── .staging-XXXXXX/      # in-flight downloads
///     └── 3f1a9c.../
///         └── compose.yaml      # assembled layers
/// ```
#[derive(Debug, Clone)]
pub struct ComposeCache {
    root: PathBuf,
}

impl Default for ComposeCache {
    fn default() -> Self {
        Self::new(Self::default_root())
    }
}

impl ComposeCache {
    /// Create a cache at the specified root directory.
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Per-user default cache root.
    #[must_use]
    pub fn default_root() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from(".cache"))
            .join("conflux")
    }

    /// Get the cache root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding all OCI entries.
    #[must_use]
    pub fn scheme_dir(&self) -> PathBuf {
        self.root.join(SCHEME_DIR)
    }

    /// Get the directory for an entry (by manifest digest).
    ///
    /// The digest is validated first, so the result always lies directly
    /// under [`scheme_dir`](Self::scheme_dir).
    pub fn entry_dir(&self, digest: &str) -> Result<PathBuf> {
        let (_, hash) = validate_digest(digest)?;
        Ok(self.scheme_dir().join(hash))
    }

    /// Get the path of the composed document for an entry.
    pub fn document_path(&self, digest: &str) -> Result<PathBuf> {
        Ok(self.entry_dir(digest)?.join(DOCUMENT_FILE_NAME))
    }

    /// Check if an entry exists. Invalid digests never match.
    #[must_use]
    pub fn contains(&self, digest: &str) -> bool {
        self.entry_dir(digest).is_ok_and(|dir| dir.is_dir())
    }

    /// Get a cached document if its entry exists.
    ///
    /// A hit refreshes the document's modification time, which pruning uses
    /// as the last-use timestamp.
    #[must_use]
    pub fn lookup(&self, digest: &str) -> Option<PathBuf> {
        let dir = match self.entry_dir(digest) {
            Ok(dir) => dir,
            Err(e) => {
                debug!(digest, error = %e, "Refusing cache lookup");
                return None;
            }
        };
        if !dir.is_dir() {
            trace!(digest, "Cache miss for compose document");
            return None;
        }

        let path = dir.join(DOCUMENT_FILE_NAME);
        trace!(digest, ?path, "Cache hit for compose document");
        if let Err(e) = touch(&path) {
            trace!(?path, error = %e, "Could not refresh last-use time");
        }
        Some(path)
    }

    /// Create a uniquely named staging directory for a new entry.
    pub fn stage(&self) -> Result<StagedEntry> {
        let scheme_dir = self.scheme_dir();
        fs::create_dir_all(&scheme_dir).map_err(|e| Error::io(e, &scheme_dir, "create_dir_all"))?;

        let dir = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(&scheme_dir)
            .map_err(|e| Error::io(e, &scheme_dir, "create staging directory"))?;

        trace!(path = ?dir.path(), "Created staging directory");
        Ok(StagedEntry { dir, scheme_dir })
    }

    /// Remove entries according to `policy`.
    ///
    /// Entries unused for longer than the age limit go first, then the least
    /// recently used ones until the cache fits the size limit. Abandoned
    /// staging directories are always swept.
    pub fn prune(&self, policy: &PrunePolicy) -> Result<PruneReport> {
        let mut report = PruneReport::default();
        let scheme_dir = self.scheme_dir();
        if !scheme_dir.exists() {
            return Ok(report);
        }

        let now = Utc::now();
        let (mut entries, staging) = find_entries(&scheme_dir)?;

        let stale_cutoff = now - Duration::seconds(STALE_STAGING_SECS);
        for leftover in staging {
            if leftover.last_used < stale_cutoff && remove_entry(&leftover.path).is_ok() {
                report.staging_removed += 1;
                report.bytes_freed += leftover.size;
                debug!(path = ?leftover.path, "Removed abandoned staging directory");
            }
        }

        // Oldest first
        entries.sort_by_key(|e| e.last_used);

        if let Some(max_age_days) = policy.max_age_days {
            let days = i64::try_from(max_age_days).unwrap_or(i64::MAX).min(MAX_AGE_DAYS_CAP);
            let cutoff = now - Duration::days(days);
            entries.retain(|entry| {
                if entry.last_used >= cutoff {
                    return true;
                }
                if remove_entry(&entry.path).is_ok() {
                    report.entries_removed += 1;
                    report.bytes_freed += entry.size;
                    debug!(key = %entry.key, size = entry.size, "Removed expired cache entry");
                    false
                } else {
                    true
                }
            });
        }

        if let Some(max_size) = policy.max_size_bytes {
            let mut current_size: u64 = entries.iter().map(|e| e.size).sum();
            for entry in &entries {
                if current_size <= max_size {
                    break;
                }
                if remove_entry(&entry.path).is_ok() {
                    report.entries_removed += 1;
                    report.bytes_freed += entry.size;
                    current_size -= entry.size;
                    debug!(key = %entry.key, size = entry.size, "Removed entry to reduce cache size");
                }
            }
        }

        Ok(report)
    }
}

/// An entry being populated; invisible to lookups until committed.
///
/// Dropping an uncommitted entry deletes the staging directory.
#[derive(Debug)]
pub struct StagedEntry {
    dir: TempDir,
    scheme_dir: PathBuf,
}

impl StagedEntry {
    /// Where the composed document is written while staging.
    #[must_use]
    pub fn document_path(&self) -> PathBuf {
        self.dir.path().join(DOCUMENT_FILE_NAME)
    }

    /// Atomically publish the entry under `digest` and return the final
    /// document path.
    ///
    /// If another writer published the same digest first, its entry is kept.
    /// An invalid digest discards the staged entry.
    pub fn commit(self, digest: &str) -> Result<PathBuf> {
        let (_, hash) = validate_digest(digest)?;
        let target = self.scheme_dir.join(hash);
        let staged = self.dir.keep();

        match fs::rename(&staged, &target) {
            Ok(()) => {
                debug!(digest, ?target, "Stored compose document in cache");
                Ok(target.join(DOCUMENT_FILE_NAME))
            }
            Err(_) if target.is_dir() => {
                let _ = fs::remove_dir_all(&staged);
                debug!(digest, ?target, "Entry already published by another writer");
                Ok(target.join(DOCUMENT_FILE_NAME))
            }
            Err(e) => {
                let _ = fs::remove_dir_all(&staged);
                Err(Error::io(e, &target, "rename"))
            }
        }
    }
}

/// Pruning policy configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrunePolicy {
    /// Remove entries not used for this many days
    pub max_age_days: Option<u64>,
    /// Maximum total size of all entries in bytes
    pub max_size_bytes: Option<u64>,
}

impl Default for PrunePolicy {
    fn default() -> Self {
        Self {
            max_age_days: Some(30),
            max_size_bytes: None,
        }
    }
}

/// Result of a prune operation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruneReport {
    /// Number of cache entries removed
    pub entries_removed: usize,
    /// Number of abandoned staging directories removed
    pub staging_removed: usize,
    /// Bytes freed
    pub bytes_freed: u64,
}

#[derive(Debug, Clone)]
struct EntryInfo {
    key: String,
    path: PathBuf,
    last_used: DateTime<Utc>,
    size: u64,
}

/// Split the scheme directory into published entries and staging leftovers.
fn find_entries(scheme_dir: &Path) -> Result<(Vec<EntryInfo>, Vec<EntryInfo>)> {
    let mut entries = Vec::new();
    let mut staging = Vec::new();

    for entry in fs::read_dir(scheme_dir).map_err(|e| Error::io(e, scheme_dir, "read_dir"))? {
        let entry = entry.map_err(|e| Error::io(e, scheme_dir, "read_dir_entry"))?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }

        let key = entry.file_name().to_string_lossy().to_string();
        let document = path.join(DOCUMENT_FILE_NAME);
        let marker = if document.exists() { &document } else { &path };
        let modified = fs::metadata(marker)
            .and_then(|m| m.modified())
            .map_err(|e| Error::io(e, marker, "metadata"))?;

        let info = EntryInfo {
            size: directory_size(&path)?,
            last_used: DateTime::<Utc>::from(modified),
            path,
            key,
        };

        if info.key.starts_with(STAGING_PREFIX) {
            staging.push(info);
        } else if !info.key.starts_with('.') {
            entries.push(info);
        }
    }

    Ok((entries, staging))
}

/// Calculate total size of a directory recursively
fn directory_size(path: &Path) -> Result<u64> {
    if path.is_file() {
        return Ok(fs::metadata(path)
            .map_err(|e| Error::io(e, path, "metadata"))?
            .len());
    }

    let mut total = 0u64;
    for entry in fs::read_dir(path).map_err(|e| Error::io(e, path, "read_dir"))? {
        let entry = entry.map_err(|e| Error::io(e, path, "read_dir_entry"))?;
        total += directory_size(&entry.path())?;
    }
    Ok(total)
}

fn remove_entry(path: &Path) -> Result<()> {
    fs::remove_dir_all(path).map_err(|e| Error::io(e, path, "remove_dir_all"))
}

fn touch(path: &Path) -> std::io::Result<()> {
    fs::File::options()
        .write(true)
        .open(path)?
        .set_modified(SystemTime::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::sha256_digest;
    use tempfile::TempDir;

    const DIGEST: &str = "sha256:3f1a9c0000000000000000000000000000000000000000000000000000000000";

    fn set_last_used(path: &Path, age: std::time::Duration) {
        let when = SystemTime::now() - age;
        fs::File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(when)
            .unwrap();
    }

    fn publish(cache: &ComposeCache, digest: &str, content: &[u8]) -> PathBuf {
        let staged = cache.stage().unwrap();
        fs::write(staged.document_path(), content).unwrap();
        staged.commit(digest).unwrap()
    }

    #[test]
    fn test_cache_paths() {
        let cache = ComposeCache::new(PathBuf::from("/tmp/cache"));

        let hash = DIGEST.strip_prefix("sha256:").unwrap();
        let entry = PathBuf::from("/tmp/cache/oci").join(hash);

        assert_eq!(cache.entry_dir(DIGEST).unwrap(), entry);
        assert_eq!(
            cache.document_path(DIGEST).unwrap(),
            entry.join("compose.yaml")
        );
    }

    #[test]
    fn test_cache_default() {
        let cache = ComposeCache::default();
        assert!(cache.root().to_string_lossy().contains("conflux"));
    }

    #[test]
    fn test_lookup_missing() {
        let temp = TempDir::new().unwrap();
        let cache = ComposeCache::new(temp.path().to_path_buf());
        assert!(!cache.contains(DIGEST));
        assert!(cache.lookup(DIGEST).is_none());
    }

    #[test]
    fn test_stage_and_commit() {
        let temp = TempDir::new().unwrap();
        let cache = ComposeCache::new(temp.path().to_path_buf());

        let staged = cache.stage().unwrap();
        fs::write(staged.document_path(), b"services: {}\n").unwrap();

        // Not visible before commit
        assert!(!cache.contains(DIGEST));

        let path = staged.commit(DIGEST).unwrap();
        assert_eq!(path, cache.document_path(DIGEST).unwrap());
        assert_eq!(cache.lookup(DIGEST), Some(path.clone()));
        assert_eq!(fs::read(&path).unwrap(), b"services: {}\n");
    }

    #[test]
    fn test_dropped_stage_leaves_nothing() {
        let temp = TempDir::new().unwrap();
        let cache = ComposeCache::new(temp.path().to_path_buf());

        let staged = cache.stage().unwrap();
        fs::write(staged.document_path(), b"partial").unwrap();
        drop(staged);

        assert_eq!(fs::read_dir(cache.scheme_dir()).unwrap().count(), 0);
    }

    #[test]
    fn test_commit_loses_race_keeps_existing() {
        let temp = TempDir::new().unwrap();
        let cache = ComposeCache::new(temp.path().to_path_buf());

        let first = cache.stage().unwrap();
        let second = cache.stage().unwrap();
        fs::write(first.document_path(), b"first").unwrap();
        fs::write(second.document_path(), b"second").unwrap();

        let winner = first.commit(DIGEST).unwrap();
        let loser = second.commit(DIGEST).unwrap();

        assert_eq!(winner, loser);
        assert_eq!(fs::read(&winner).unwrap(), b"first");
        // Only the published entry remains
        assert_eq!(fs::read_dir(cache.scheme_dir()).unwrap().count(), 1);
    }

    #[test]
    fn test_lookup_refreshes_last_use() {
        let temp = TempDir::new().unwrap();
        let cache = ComposeCache::new(temp.path().to_path_buf());
        let path = publish(&cache, DIGEST, b"a: 1\n");

        set_last_used(&path, std::time::Duration::from_secs(90 * 86_400));
        let before = fs::metadata(&path).unwrap().modified().unwrap();
        cache.lookup(DIGEST).unwrap();
        let after = fs::metadata(&path).unwrap().modified().unwrap();

        assert!(after > before);
    }

    #[test]
    fn test_prune_removes_expired_entries() {
        let temp = TempDir::new().unwrap();
        let cache = ComposeCache::new(temp.path().to_path_buf());

        let old = publish(&cache, &sha256_digest(b"old"), b"old: true\n");
        publish(&cache, &sha256_digest(b"recent"), b"recent: true\n");
        set_last_used(&old, std::time::Duration::from_secs(60 * 86_400));

        let report = cache.prune(&PrunePolicy::default()).unwrap();

        assert_eq!(report.entries_removed, 1);
        assert_eq!(report.bytes_freed, "old: true\n".len() as u64);
        assert!(!cache.contains(&sha256_digest(b"old")));
        assert!(cache.contains(&sha256_digest(b"recent")));
    }

    #[test]
    fn test_prune_size_limit_removes_least_recently_used() {
        let temp = TempDir::new().unwrap();
        let cache = ComposeCache::new(temp.path().to_path_buf());

        let a = publish(&cache, &sha256_digest(b"a"), &[b'a'; 100]);
        let b = publish(&cache, &sha256_digest(b"b"), &[b'b'; 100]);
        let c = publish(&cache, &sha256_digest(b"c"), &[b'c'; 100]);
        set_last_used(&a, std::time::Duration::from_secs(300));
        set_last_used(&b, std::time::Duration::from_secs(200));
        set_last_used(&c, std::time::Duration::from_secs(100));

        let policy = PrunePolicy {
            max_age_days: None,
            max_size_bytes: Some(150),
        };
        let report = cache.prune(&policy).unwrap();

        assert_eq!(report.entries_removed, 2);
        assert_eq!(report.bytes_freed, 200);
        assert!(!cache.contains(&sha256_digest(b"a")));
        assert!(!cache.contains(&sha256_digest(b"b")));
        assert!(cache.contains(&sha256_digest(b"c")));
    }

    #[test]
    fn test_prune_sweeps_abandoned_staging_only() {
        let temp = TempDir::new().unwrap();
        let cache = ComposeCache::new(temp.path().to_path_buf());

        let abandoned = cache.scheme_dir().join(".staging-crashed");
        fs::create_dir_all(&abandoned).unwrap();
        fs::write(abandoned.join(DOCUMENT_FILE_NAME), b"partial").unwrap();
        set_last_used(
            &abandoned.join(DOCUMENT_FILE_NAME),
            std::time::Duration::from_secs(2 * 3600),
        );

        let in_flight = cache.stage().unwrap();
        fs::write(in_flight.document_path(), b"downloading").unwrap();

        let report = cache.prune(&PrunePolicy::default()).unwrap();

        assert_eq!(report.staging_removed, 1);
        assert_eq!(report.entries_removed, 0);
        assert!(!abandoned.exists());
        assert!(in_flight.document_path().exists());
    }

    #[test]
    fn test_prune_empty_cache() {
        let temp = TempDir::new().unwrap();
        let cache = ComposeCache::new(temp.path().join("missing"));
        assert_eq!(cache.prune(&PrunePolicy::default()).unwrap(), PruneReport::default());
    }

    #[test]
    fn test_entry_paths_reject_invalid_digests() {
        let cache = ComposeCache::new(PathBuf::from("/tmp/cache"));

        for digest in ["blake3:../../escaped", "sha256:../x", "abc123"] {
            assert!(matches!(cache.entry_dir(digest), Err(Error::InvalidDigest { .. })));
            assert!(cache.document_path(digest).is_err());
            assert!(!cache.contains(digest));
            assert!(cache.lookup(digest).is_none());
        }
    }

    #[test]
    fn test_commit_rejects_digest_outside_cache() {
        let temp = TempDir::new().unwrap();
        let cache = ComposeCache::new(temp.path().join("cache"));

        let staged = cache.stage().unwrap();
        fs::write(staged.document_path(), b"services: {}\n").unwrap();
        let err = staged.commit("blake3:../../escaped").unwrap_err();

        assert!(matches!(err, Error::InvalidDigest { .. }));
        assert!(!temp.path().join("escaped").exists());
        // The discarded staging directory is cleaned up
        assert_eq!(fs::read_dir(cache.scheme_dir()).unwrap().count(), 0);
    }
}
