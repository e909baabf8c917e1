//! Error types surfaced by the file system core.
//!
//! Internal helpers return `Result<T, FsError>` and propagate with `?`; the
//! boolean/`-1`/`None` conventions a syscall layer expects (spec.md section
//! 7) are applied only at the `Filesystem` boundary.

use core::fmt;

/// A failure reported by a `BlockDevice` implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceError {
    pub sector: u32,
    pub reason: &'static str,
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "device error at sector {}: {}", self.sector, self.reason)
    }
}

impl std::error::Error for DeviceError {}

/// Every way a file system operation can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    /// A path component, or an inode it names, does not exist.
    NotFound,
    /// A path component is empty or longer than `NAME_MAX` bytes.
    NameTooLong,
    /// `dir_add` was asked to create a name that already exists.
    AlreadyExists,
    /// A non-final path component named a file, not a directory.
    NotDirectory,
    /// `dir_remove` targeted a directory with entries other than `.`/`..`.
    NotEmpty,
    /// `dir_remove` targeted the caller's current working directory.
    Busy,
    /// The free-sector map has no more sectors to give out.
    NoSpace,
    /// The underlying block device failed.
    Io(DeviceError),
    /// A caller-supplied argument (empty name, bad fd, ...) was invalid.
    InvalidArgument,
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FsError::NotFound => write!(f, "no such file or directory"),
            FsError::NameTooLong => write!(f, "name too long"),
            FsError::AlreadyExists => write!(f, "name already exists"),
            FsError::NotDirectory => write!(f, "not a directory"),
            FsError::NotEmpty => write!(f, "directory not empty"),
            FsError::Busy => write!(f, "resource busy"),
            FsError::NoSpace => write!(f, "no space left on device"),
            FsError::Io(e) => write!(f, "{e}"),
            FsError::InvalidArgument => write!(f, "invalid argument"),
        }
    }
}

impl std::error::Error for FsError {}

impl From<DeviceError> for FsError {
    fn from(e: DeviceError) -> Self {
        FsError::Io(e)
    }
}

pub type FsResult<T> = Result<T, FsError>;
