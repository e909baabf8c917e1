//! In-memory test doubles for the three external collaborators.
//!
//! None of the five teaching-OS kernels this crate's style is drawn from
//! carries host-side `#[test]` plumbing of its own — they are `no_std` and
//! run only under their own emulated targets. These doubles are grounded on
//! `examples/other_examples/ad00ca69_redox-os-tfs__core-src-disk-mod.rs.rs`'s
//! `Disk` trait, the closest pack example of a block device abstracted
//! cleanly enough to back with a `Vec` in host tests.

use std::sync::Mutex;

use crate::config::SECTOR_SIZE;
use crate::device::BlockDevice;
use crate::error::DeviceError;
use crate::freemap::FreeMap;
use crate::task::TaskContext;
use crate::SectorId;

/// A `BlockDevice` backed by a `Vec` of sectors, entirely in memory.
pub struct RamDisk {
    sectors: Mutex<Vec<[u8; SECTOR_SIZE]>>,
}

impl RamDisk {
    pub fn new(sector_count: usize) -> Self {
        Self {
            sectors: Mutex::new(vec![[0u8; SECTOR_SIZE]; sector_count]),
        }
    }
}

impl BlockDevice for RamDisk {
    fn read(&self, sector: SectorId, buf: &mut [u8; SECTOR_SIZE]) -> Result<(), DeviceError> {
        let sectors = self.sectors.lock().unwrap();
        let data = sectors.get(sector as usize).ok_or(DeviceError {
            sector,
            reason: "sector out of range",
        })?;
        *buf = *data;
        Ok(())
    }

    fn write(&self, sector: SectorId, buf: &[u8; SECTOR_SIZE]) -> Result<(), DeviceError> {
        let mut sectors = self.sectors.lock().unwrap();
        let data = sectors.get_mut(sector as usize).ok_or(DeviceError {
            sector,
            reason: "sector out of range",
        })?;
        *data = *buf;
        Ok(())
    }

    fn sector_count(&self) -> SectorId {
        self.sectors.lock().unwrap().len() as SectorId
    }
}

/// A `FreeMap` backed by a plain bit vector; allocates the lowest free
/// sector, same policy as a real bitmap scan.
pub struct RamFreeMap {
    used: Mutex<Vec<bool>>,
}

impl RamFreeMap {
    pub fn new(sector_count: usize) -> Self {
        Self {
            used: Mutex::new(vec![false; sector_count]),
        }
    }

    /// Marks `[start, start+count)` used without going through `allocate`,
    /// for reserving fixed sectors (the free-map sector itself, the root
    /// directory's inode sector) at test setup.
    pub fn mark_used(&self, start: SectorId, count: u32) {
        let mut used = self.used.lock().unwrap();
        for s in start..start + count {
            used[s as usize] = true;
        }
    }

    pub fn used_count(&self) -> usize {
        self.used.lock().unwrap().iter().filter(|&&b| b).count()
    }
}

impl FreeMap for RamFreeMap {
    fn allocate(&self, count: u32) -> Option<SectorId> {
        let mut used = self.used.lock().unwrap();
        let count = count as usize;
        let mut run_start = None;
        for i in 0..used.len() {
            if used[i] {
                run_start = None;
                continue;
            }
            if run_start.is_none() {
                run_start = Some(i);
            }
            if i + 1 - run_start.unwrap() == count {
                let start = run_start.unwrap();
                for slot in used.iter_mut().take(start + count).skip(start) {
                    *slot = true;
                }
                return Some(start as SectorId);
            }
        }
        None
    }

    fn release(&self, start: SectorId, count: u32) {
        let mut used = self.used.lock().unwrap();
        for s in start..start + count {
            used[s as usize] = false;
        }
    }
}

/// A single-task `TaskContext` double with an interior-mutable cwd.
pub struct TestTask {
    cwd: Mutex<SectorId>,
}

impl TestTask {
    pub fn new(cwd: SectorId) -> Self {
        Self { cwd: Mutex::new(cwd) }
    }
}

impl TaskContext for TestTask {
    fn cwd(&self) -> SectorId {
        *self.cwd.lock().unwrap()
    }

    fn set_cwd(&self, sector: SectorId) {
        *self.cwd.lock().unwrap() = sector;
    }
}
