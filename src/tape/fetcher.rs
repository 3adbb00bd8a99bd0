//! Fetcher & Cache — materializes a single file from a tape to a local
//! cache directory, invoked on-demand by the virtual filesystem.
//!
//! Grounded on `original_source/tapevault.py`'s `fetch_file`, restructured
//! around the Tape Orchestrator's `MountHandle` instead of ad hoc
//! load/unload calls.

use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::config::Config;
use crate::error::{Result, TapeVaultError};
use crate::tape::changer::ChangerInterface;
use crate::tape::orchestrator::TapeOrchestrator;

pub struct Fetcher<'a> {
    config: &'a Config,
    changer: &'a ChangerInterface,
    orchestrator: &'a TapeOrchestrator,
}

impl<'a> Fetcher<'a> {
    pub fn new(
        config: &'a Config,
        changer: &'a ChangerInterface,
        orchestrator: &'a TapeOrchestrator,
    ) -> Self {
        Fetcher {
            config,
            changer,
            orchestrator,
        }
    }

    /// Materialize `relative_path` of `volume_tag` to the cache, returning
    /// its local path. Fast path: if the cache file already exists, no
    /// drive lock is taken and zero subprocesses run.
    pub fn fetch(&self, volume_tag: &str, relative_path: &str) -> Result<PathBuf> {
        let cache_path = self.config.cache_path(volume_tag, relative_path);
        if cache_path.exists() {
            return Ok(cache_path);
        }

        info!("fetching {volume_tag}/{relative_path}");
        let snapshot = self.changer.probe()?;
        let handle = self
            .orchestrator
            .acquire(volume_tag, &snapshot)
            .map_err(|err| {
                warn!("fetch of {volume_tag}/{relative_path} failed to acquire drive: {err}");
                err
            })?;

        let source = handle.mount_path.join(relative_path);
        let copy_result = copy_preserving_mtime(&source, &cache_path);

        self.orchestrator.release(handle);

        match copy_result {
            Ok(()) => Ok(cache_path),
            Err(err) => {
                // Clean up any partial cache file so a retry's fast path
                // is not fooled by a truncated copy.
                let _ = std::fs::remove_file(&cache_path);
                Err(err)
            }
        }
    }
}

fn copy_preserving_mtime(source: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).map_err(|err| TapeVaultError::CacheIoFailed {
            path: dest.display().to_string(),
            source: err,
        })?;
    }

    std::fs::copy(source, dest).map_err(|err| TapeVaultError::CacheIoFailed {
        path: dest.display().to_string(),
        source: err,
    })?;

    if let Ok(metadata) = std::fs::metadata(source) {
        if let Ok(modified) = metadata.modified() {
            let _ = filetime_set(dest, modified);
        }
    }

    Ok(())
}

fn filetime_set(path: &Path, modified: std::time::SystemTime) -> std::io::Result<()> {
    use std::time::UNIX_EPOCH;

    let duration = modified
        .duration_since(UNIX_EPOCH)
        .unwrap_or(std::time::Duration::ZERO);
    let spec = libc::timespec {
        tv_sec: duration.as_secs() as libc::time_t,
        tv_nsec: duration.subsec_nanos() as i64,
    };
    let times = [
        libc::timespec {
            tv_sec: 0,
            tv_nsec: libc::UTIME_OMIT,
        },
        spec,
    ];

    let c_path = std::ffi::CString::new(path.as_os_str().as_encoded_bytes())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    let rc = unsafe { libc::utimensat(libc::AT_FDCWD, c_path.as_ptr(), times.as_ptr(), 0) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_preserves_mtime_and_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source.bin");
        std::fs::write(&source, b"hello").unwrap();
        // back-date the source so we can detect whether mtime propagated
        let old = std::time::SystemTime::now() - std::time::Duration::from_secs(3600);
        filetime_set(&source, old).unwrap();

        let dest = dir.path().join("nested").join("dest.bin");
        copy_preserving_mtime(&source, &dest).unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"hello");
        let src_mtime = std::fs::metadata(&source).unwrap().modified().unwrap();
        let dst_mtime = std::fs::metadata(&dest).unwrap().modified().unwrap();
        let diff = src_mtime
            .duration_since(dst_mtime)
            .or_else(|_| dst_mtime.duration_since(src_mtime))
            .unwrap();
        assert!(diff.as_secs() < 2, "mtime was not preserved: diff={diff:?}");
    }

    #[test]
    fn copy_failure_does_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does-not-exist.bin");
        let dest = dir.path().join("dest.bin");
        let err = copy_preserving_mtime(&missing, &dest).unwrap_err();
        assert!(matches!(err, TapeVaultError::CacheIoFailed { .. }));
        assert!(!dest.exists());
    }
}
