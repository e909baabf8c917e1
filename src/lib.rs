//! On-disk inode, directory, and sector-cache core for a teaching
//! operating system's file system.
//!
//! Three layers, bottom to top:
//! - [`cache`]: a fixed-capacity, write-back cache of 512-byte sectors
//!   with clock-style replacement.
//! - [`inode`]: direct/single-indirect/double-indirect block addressing,
//!   lazy growth on write, and the process-wide open-inode registry.
//! - [`directory`]: a name-to-inode mapping stored as the content of a
//!   directory-flagged inode, path resolution, and `mkdir`/`chdir`.
//!
//! [`fs::Filesystem`] ties these together behind a single coarse lock. The
//! block device, the free-sector allocator, and the calling task's
//! working-directory state are all external collaborators, consumed
//! through the [`device::BlockDevice`], [`freemap::FreeMap`], and
//! [`task::TaskContext`] traits rather than built in — this crate owns the
//! file system's own data structures and nothing below or above them.

mod cache;
pub mod config;
pub mod device;
pub mod directory;
pub mod error;
pub mod freemap;
pub mod fs;
pub mod inode;
pub mod task;

/// In-memory `BlockDevice`/`FreeMap`/`TaskContext` doubles for tests.
pub mod testing;

pub use config::FsConfig;
pub use error::{DeviceError, FsError, FsResult};
pub use fs::{FileHandle, Filesystem};

/// Identifies one 512-byte sector on the block device.
pub type SectorId = u32;
