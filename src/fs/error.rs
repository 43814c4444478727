//! Error type of the storage engine.
//!
//! Every core operation reports failure synchronously through [`FsError`]; the
//! `FUSE` adapter turns it into an errno with [`FsError::to_errno`].

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FsError {
    /// The path resolves to no file or directory, or its parent directory is missing.
    #[error("not found: {0}")]
    NotFound(String),

    /// A create or mkdir target is already occupied.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The inode pool, the block pool, the per-file block cap, a directory's member list,
    /// or one of the record tables is full.
    #[error("no space left: {0}")]
    ResourceExhausted(&'static str),

    /// An owner/group/other permission bit check failed.
    #[error("permission denied")]
    PermissionDenied,

    /// Directory nesting would pass the fixed maximum depth.
    #[error("directory nesting too deep")]
    DepthExceeded,

    /// The path does not fit the fixed path-length limit.
    #[error("name too long")]
    NameTooLong,

    /// The backing image fails the magic or digest check, is truncated, or holds
    /// structurally invalid records.
    #[error("corrupt image: {0}")]
    CorruptImage(String),

    /// Backing file I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FsError {
    /// Convert this error into a POSIX errno suitable for `FUSE` replies.
    #[must_use]
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            Self::NotFound(_) => libc::ENOENT,
            Self::AlreadyExists(_) => libc::EEXIST,
            Self::ResourceExhausted(_) => libc::ENOSPC,
            Self::PermissionDenied => libc::EACCES,
            Self::DepthExceeded => libc::EMLINK,
            Self::NameTooLong => libc::ENAMETOOLONG,
            Self::CorruptImage(_) => libc::EIO,
            Self::Io(err) => err.raw_os_error().unwrap_or(libc::EIO),
        }
    }
}

/// Result alias using [`FsError`].
pub type Result<T> = std::result::Result<T, FsError>;
