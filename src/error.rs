//! Error kinds shared across the tape-mediation subsystem.

use thiserror::Error;

/// Errors produced by the catalog, changer, orchestrator, indexer,
/// reconciler and fetcher.
#[derive(Error, Debug)]
pub enum TapeVaultError {
    /// The changer status tool is missing or exited non-zero.
    #[error("changer unavailable: {0}")]
    ChangerUnavailable(String),

    /// A referenced volume tag is absent from the live inventory.
    #[error("tape not found: {0}")]
    TapeNotFound(String),

    /// LTFS mount failed.
    #[error("mount failed for {volume_tag}: {source}")]
    MountFailed {
        volume_tag: String,
        #[source]
        source: anyhow::Error,
    },

    /// Unmount failed (logged, never propagated per spec §7).
    #[error("unmount failed for {volume_tag}: {source}")]
    UnmountFailed {
        volume_tag: String,
        #[source]
        source: anyhow::Error,
    },

    /// Catalog transaction failure.
    #[error("catalog error: {0}")]
    Catalog(#[from] rusqlite::Error),

    /// Filesystem error while copying a file from the mounted tape.
    #[error("cache i/o failed for {path}: {source}")]
    CacheIoFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// getattr/open for an unknown path.
    #[error("not found: {0}")]
    NotFound(String),

    /// A write operation was attempted against the read-only mount.
    #[error("read-only filesystem")]
    ReadOnly,

    /// A spawned external tool could not be found/executed at all.
    #[error("tool unavailable: {0}")]
    ToolUnavailable(String),

    /// A spawned external tool ran but returned a non-zero exit code.
    #[error("tool '{tool}' failed (exit {exit:?}): {stderr}")]
    ToolFailed {
        tool: String,
        exit: Option<i32>,
        stderr: String,
    },

    /// Generic I/O failure not covered by a more specific variant.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TapeVaultError>;

impl TapeVaultError {
    /// Map onto the closest POSIX errno for the FUSE boundary.
    pub fn to_errno(&self) -> i32 {
        match self {
            TapeVaultError::NotFound(_) => libc::ENOENT,
            TapeVaultError::ReadOnly => libc::EROFS,
            TapeVaultError::TapeNotFound(_) => libc::EIO,
            TapeVaultError::ChangerUnavailable(_) => libc::EIO,
            TapeVaultError::MountFailed { .. } => libc::EIO,
            TapeVaultError::UnmountFailed { .. } => libc::EIO,
            TapeVaultError::Catalog(_) => libc::EIO,
            TapeVaultError::CacheIoFailed { .. } => libc::EIO,
            TapeVaultError::ToolUnavailable(_) => libc::EIO,
            TapeVaultError::ToolFailed { .. } => libc::EIO,
            TapeVaultError::Io(err) => err.raw_os_error().unwrap_or(libc::EIO),
        }
    }
}
