//! The block device: an external collaborator, consumed through a thin trait.
//!
//! Mirrors the `Disk` trait in
//! `examples/other_examples/ad00ca69_redox-os-tfs__core-src-disk-mod.rs.rs`,
//! simplified to synchronous calls since spec.md describes a synchronous
//! "random-access read and write of fixed-size sectors" device.

use crate::config::SECTOR_SIZE;
use crate::error::DeviceError;
use crate::SectorId;

/// A sector-addressed random access block device.
///
/// Implementations are expected to synchronize internally (spec.md section
/// 5: "Block-device I/O is assumed to synchronize internally"); this crate
/// never wraps a `BlockDevice` in its own lock.
pub trait BlockDevice: Send + Sync {
    /// Reads the sector at `sector` into `buf`.
    fn read(&self, sector: SectorId, buf: &mut [u8; SECTOR_SIZE]) -> Result<(), DeviceError>;

    /// Writes `buf` to the sector at `sector`.
    fn write(&self, sector: SectorId, buf: &[u8; SECTOR_SIZE]) -> Result<(), DeviceError>;

    /// Total number of sectors backing this device.
    fn sector_count(&self) -> SectorId;
}
