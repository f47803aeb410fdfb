//! On-disk config cache
//!
//! A content-addressed best-effort cache for the last known-good raw
//! config. `read` only succeeds while the file's mtime is within the TTL;
//! `consolidate` writes through a temp file in the same directory and
//! renames atomically, leaving the artifact read-only on disk.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tempfile::NamedTempFile;

use crate::error::CacheError;

/// Permission bits of the persisted artifact
#[cfg(unix)]
const CACHE_FILE_MODE: u32 = 0o444;

/// TTL-bounded cache of raw config bytes
#[derive(Debug, Clone)]
pub struct CacheFile {
    path: PathBuf,
    ttl: Duration,
}

impl CacheFile {
    pub fn new(path: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            path: path.into(),
            ttl,
        }
    }

    /// The cache file location
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the cached bytes
    ///
    /// Fails with a validity error when the file is missing or older than
    /// the TTL; the file itself is left untouched either way.
    pub fn read(&self) -> Result<Vec<u8>, CacheError> {
        self.check_valid()?;
        fs::read(&self.path).map_err(|e| self.io_err(e))
    }

    /// Whether a `read` would currently succeed
    pub fn is_valid(&self) -> bool {
        self.check_valid().is_ok()
    }

    /// Persist `data` atomically
    ///
    /// The bytes land in a temp file in the target's directory (same
    /// partition, so the rename cannot cross filesystems), get their
    /// permissions fixed to the read-only artifact mode, and replace the
    /// cache path in one rename. The temp file is removed on any failure.
    pub fn consolidate(&self, data: &[u8]) -> Result<(), CacheError> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));

        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| self.io_err(e))?;
        tmp.write_all(data).map_err(|e| self.io_err(e))?;
        tmp.flush().map_err(|e| self.io_err(e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(CACHE_FILE_MODE);
            tmp.as_file()
                .set_permissions(perms)
                .map_err(|e| self.io_err(e))?;
        }

        // A failed persist hands the temp file back; dropping it unlinks
        // the temp path, so nothing is left behind.
        tmp.persist(&self.path)
            .map(|_| ())
            .map_err(|e| self.io_err(e.error))
    }

    /// Drop the cached artifact; removing an absent file is not an error
    pub fn invalidate(&self) -> Result<(), CacheError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_err(e)),
        }
    }

    fn check_valid(&self) -> Result<(), CacheError> {
        let stat = match fs::metadata(&self.path) {
            Ok(stat) => stat,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CacheError::Missing {
                    path: self.path.display().to_string(),
                });
            }
            Err(e) => return Err(self.io_err(e)),
        };

        let modified = stat.modified().map_err(|e| self.io_err(e))?;
        // A clock skewed into the future reads as age zero.
        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO);
        if age > self.ttl {
            tracing::debug!(path = %self.path.display(), ?age, ttl = ?self.ttl, "cache expired");
            return Err(CacheError::Expired {
                path: self.path.display().to_string(),
                ttl: self.ttl,
                age,
            });
        }
        Ok(())
    }

    fn io_err(&self, source: std::io::Error) -> CacheError {
        CacheError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache_in(dir: &Path, ttl: Duration) -> CacheFile {
        CacheFile::new(dir.join("relay.cache"), ttl)
    }

    #[test]
    fn consolidate_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path(), Duration::from_secs(60));

        cache.consolidate(&[0xAA, 0xBB]).unwrap();
        assert_eq!(cache.read().unwrap(), vec![0xAA, 0xBB]);
    }

    #[test]
    fn read_fails_validity_after_ttl() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path(), Duration::from_millis(50));

        cache.consolidate(&[0xAA]).unwrap();
        assert_eq!(cache.read().unwrap(), vec![0xAA]);

        std::thread::sleep(Duration::from_millis(100));
        assert!(matches!(cache.read(), Err(CacheError::Expired { .. })));

        // The artifact itself is untouched by the failed read.
        assert_eq!(fs::read(cache.path()).unwrap(), vec![0xAA]);
    }

    #[test]
    fn missing_file_fails_validity() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path(), Duration::from_secs(60));

        assert!(matches!(cache.read(), Err(CacheError::Missing { .. })));
        assert!(!cache.is_valid());
    }

    #[test]
    fn consolidate_replaces_previous_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path(), Duration::from_secs(60));

        cache.consolidate(b"old").unwrap();
        cache.consolidate(b"new").unwrap();
        assert_eq!(cache.read().unwrap(), b"new".to_vec());
    }

    #[cfg(unix)]
    #[test]
    fn artifact_is_read_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path(), Duration::from_secs(60));

        cache.consolidate(b"bytes").unwrap();
        let mode = fs::metadata(cache.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o444);
    }

    #[test]
    fn invalidate_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path(), Duration::from_secs(60));

        cache.consolidate(b"bytes").unwrap();
        cache.invalidate().unwrap();
        assert!(!cache.path().exists());

        // A second invalidate finds nothing and still succeeds.
        cache.invalidate().unwrap();
    }

    #[test]
    fn consolidate_leaves_no_temp_files_behind() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path(), Duration::from_secs(60));

        cache.consolidate(b"bytes").unwrap();

        let entries: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("relay.cache")]);
    }
}
