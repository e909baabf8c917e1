//! The sector cache: a fixed-capacity, write-back cache of sectors.
//!
//! Pure associative structure (spec.md section 4.1: "The cache does NOT
//! itself call the block device"). `CachedDisk` below is the thin,
//! device-aware wrapper spec.md describes callers building on top of it —
//! the same split as the teacher's `bio.rs` (a pure buffer table) plus the
//! code in `fs/inode.rs` that drives it through reads and writes, and as
//! `examples/other_examples/ad00ca69_redox-os-tfs__core-src-disk-mod.rs.rs`'s
//! `Disk` trait plus its `cache.rs` wrapper.

use std::sync::Mutex;

use crate::config::SECTOR_SIZE;
use crate::device::BlockDevice;
use crate::error::FsError;
use crate::SectorId;

#[derive(Clone, Copy)]
struct CacheSlot {
    sector: SectorId,
    valid: bool,
    dirty: bool,
    recently_accessed: bool,
    data: [u8; SECTOR_SIZE],
}

impl CacheSlot {
    const fn empty() -> Self {
        Self {
            sector: 0,
            valid: false,
            dirty: false,
            recently_accessed: false,
            data: [0; SECTOR_SIZE],
        }
    }
}

struct CacheTable {
    slots: Vec<CacheSlot>,
    clock_hand: usize,
}

impl CacheTable {
    /// Runs the clock algorithm (spec.md section 4.1) and returns the
    /// victim's index, leaving `clock_hand` advanced past it.
    fn select_victim(&mut self) -> usize {
        let capacity = self.slots.len();
        loop {
            let i = self.clock_hand;
            if self.slots[i].valid && self.slots[i].recently_accessed {
                self.slots[i].recently_accessed = false;
                self.clock_hand = (self.clock_hand + 1) % capacity;
            } else {
                break;
            }
        }
        let victim = self.clock_hand;
        self.clock_hand = (victim + 1) % capacity;
        victim
    }

    fn find(&self, sector: SectorId) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.valid && slot.sector == sector)
    }
}

/// An evicted slot's contents, handed back to the caller so it can write
/// them to the device without the cache lock held.
pub type Evicted = (SectorId, bool, [u8; SECTOR_SIZE]);

/// A fixed-capacity, write-back cache of sectors, keyed by sector number.
///
/// Carries its own mutex, independent of the file system's coarse lock
/// (spec.md section 4.1 / section 5).
pub struct SectorCache {
    table: Mutex<CacheTable>,
}

impl SectorCache {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "sector cache must have at least one slot");
        Self {
            table: Mutex::new(CacheTable {
                slots: vec![CacheSlot::empty(); capacity],
                clock_hand: 0,
            }),
        }
    }

    /// If `sector` is cached, copies it into `out` and returns `true`.
    pub fn read(&self, sector: SectorId, out: &mut [u8; SECTOR_SIZE]) -> bool {
        let mut table = self.table.lock().unwrap();
        match table.find(sector) {
            Some(i) => {
                *out = table.slots[i].data;
                table.slots[i].recently_accessed = true;
                true
            }
            None => false,
        }
    }

    /// If `sector` is cached, overwrites its buffer with `data` and marks it
    /// dirty. Returns `true` on a hit.
    pub fn write(&self, sector: SectorId, data: &[u8; SECTOR_SIZE]) -> bool {
        let mut table = self.table.lock().unwrap();
        match table.find(sector) {
            Some(i) => {
                table.slots[i].data = *data;
                table.slots[i].recently_accessed = true;
                table.slots[i].dirty = true;
                true
            }
            None => false,
        }
    }

    /// Installs `(sector, data)` in the slot chosen by the clock algorithm,
    /// returning the contents it replaced if that slot held valid data.
    pub fn insert(&self, sector: SectorId, data: &[u8; SECTOR_SIZE], dirty: bool) -> Option<Evicted> {
        let mut table = self.table.lock().unwrap();
        let victim = table.select_victim();
        let evicted = table.slots[victim]
            .valid
            .then(|| (table.slots[victim].sector, table.slots[victim].dirty, table.slots[victim].data));
        table.slots[victim] = CacheSlot {
            sector,
            valid: true,
            dirty,
            recently_accessed: false,
            data: *data,
        };
        evicted
    }

    /// Forces the clock algorithm's chosen victim out of the cache even if
    /// the cache is not full. Returns its contents if it held valid data.
    pub fn evict_any(&self) -> Option<Evicted> {
        let mut table = self.table.lock().unwrap();
        let victim = table.select_victim();
        let slot = &mut table.slots[victim];
        if !slot.valid {
            return None;
        }
        let evicted = (slot.sector, slot.dirty, slot.data);
        slot.valid = false;
        slot.dirty = false;
        Some(evicted)
    }

    /// Picks any dirty slot, invalidates it in place, and returns its
    /// contents. Used to drain the cache at shutdown.
    pub fn take_one_dirty(&self) -> Option<(SectorId, [u8; SECTOR_SIZE])> {
        let mut table = self.table.lock().unwrap();
        let victim = table.slots.iter().position(|s| s.valid && s.dirty)?;
        let slot = &mut table.slots[victim];
        let result = (slot.sector, slot.data);
        slot.valid = false;
        slot.dirty = false;
        Some(result)
    }
}

/// Wraps a `SectorCache` around a `BlockDevice`, implementing the read path
/// spec.md section 4.1 describes: query the cache, on miss read through to
/// the device, insert the fresh buffer, and write back any evicted dirty
/// buffer — all without holding the cache lock during device I/O.
pub struct CachedDisk<D> {
    device: D,
    cache: SectorCache,
}

impl<D: BlockDevice> CachedDisk<D> {
    pub fn new(device: D, cache_capacity: usize) -> Self {
        Self {
            device,
            cache: SectorCache::new(cache_capacity),
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn read_sector(&self, sector: SectorId) -> Result<[u8; SECTOR_SIZE], FsError> {
        let mut buf = [0u8; SECTOR_SIZE];
        if self.cache.read(sector, &mut buf) {
            return Ok(buf);
        }
        self.device.read(sector, &mut buf)?;
        self.writeback_evicted(self.cache.insert(sector, &buf, false))?;
        Ok(buf)
    }

    pub fn write_sector(&self, sector: SectorId, data: &[u8; SECTOR_SIZE]) -> Result<(), FsError> {
        if self.cache.write(sector, data) {
            return Ok(());
        }
        self.writeback_evicted(self.cache.insert(sector, data, true))
    }

    fn writeback_evicted(&self, evicted: Option<Evicted>) -> Result<(), FsError> {
        if let Some((sector, dirty, data)) = evicted {
            if dirty {
                self.device.write(sector, &data)?;
            }
        }
        Ok(())
    }

    /// Drains every dirty sector to the device. Called on shutdown.
    pub fn flush(&self) -> Result<(), FsError> {
        while let Some((sector, data)) = self.cache.take_one_dirty() {
            self.device.write(sector, &data)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_evicts_clock_victim_once_full() {
        let cache = SectorCache::new(2);
        assert!(cache.insert(0, &[1u8; SECTOR_SIZE], false).is_none());
        assert!(cache.insert(1, &[2u8; SECTOR_SIZE], false).is_none());
        // Both slots are full and neither was re-accessed since insertion,
        // so the clock hand evicts slot 0 on the next insert.
        let evicted = cache.insert(2, &[3u8; SECTOR_SIZE], true).unwrap();
        assert_eq!(evicted, (0, false, [1u8; SECTOR_SIZE]));
    }

    #[test]
    fn recently_accessed_slot_survives_one_clock_sweep() {
        let cache = SectorCache::new(2);
        cache.insert(0, &[1u8; SECTOR_SIZE], false);
        cache.insert(1, &[2u8; SECTOR_SIZE], false);
        let mut out = [0u8; SECTOR_SIZE];
        assert!(cache.read(0, &mut out)); // marks slot 0 recently_accessed
        // The clock hand now sweeps past slot 0 (clearing the flag) and
        // evicts slot 1 instead.
        let evicted = cache.insert(2, &[3u8; SECTOR_SIZE], false).unwrap();
        assert_eq!(evicted, (1, false, [2u8; SECTOR_SIZE]));
    }

    #[test]
    fn evict_any_forces_out_every_slot_even_though_the_cache_was_never_full() {
        let cache = SectorCache::new(3);
        assert!(cache.evict_any().is_none(), "nothing valid to evict yet");
        // select_victim leaves the clock hand one past whatever slot it just
        // picked, so filling every slot brings the hand back to slot 0
        // before any eviction runs.
        cache.insert(0, &[1u8; SECTOR_SIZE], true);
        cache.insert(1, &[2u8; SECTOR_SIZE], false);
        cache.insert(2, &[3u8; SECTOR_SIZE], true);
        assert_eq!(cache.evict_any().unwrap(), (0, true, [1u8; SECTOR_SIZE]));
        assert_eq!(cache.evict_any().unwrap(), (1, false, [2u8; SECTOR_SIZE]));
        assert_eq!(cache.evict_any().unwrap(), (2, true, [3u8; SECTOR_SIZE]));
        assert!(cache.evict_any().is_none(), "every slot now invalid");
    }

    #[test]
    fn take_one_dirty_ignores_clean_slots() {
        let cache = SectorCache::new(2);
        cache.insert(0, &[1u8; SECTOR_SIZE], false);
        cache.insert(1, &[2u8; SECTOR_SIZE], true);
        let (sector, data) = cache.take_one_dirty().unwrap();
        assert_eq!(sector, 1);
        assert_eq!(data, [2u8; SECTOR_SIZE]);
        assert!(cache.take_one_dirty().is_none());
    }
}
