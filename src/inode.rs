//! Inodes.
//!
//! "An inode describes a single unnamed file" (teacher's own words, in
//! `fs/ufs/inode.rs`'s module doc) with byte-addressable read/write and
//! on-demand growth through direct, single-indirect, and double-indirect
//! tiers (spec.md sections 3 and 4.2). Generalizes the teacher's
//! direct-plus-single-indirect-only `Inode::map` to the full three-tier
//! scheme, which is what Pintos's `inode.c` (`byte_to_sector`,
//! `inode_extend`) implements.
//!
//! Every in-memory inode is kept in exactly one place — `InodeTable`, the
//! "open-inode registry" of spec.md section 9, a plain `HashMap` keyed by
//! sector (spec.md: "a hash map is fine" given the expected handful of open
//! files). Every public `Filesystem` entry point runs under the facade's
//! single coarse lock, so the table itself needs no lock of its own.

use std::collections::HashMap;

use zerocopy::{AsBytes, FromBytes};

use crate::cache::CachedDisk;
use crate::config::{
    DIRECT_CAP, DOUBLE_INDIRECT_CAP, INODE_MAGIC, PTRS_PER_SECTOR, SECTOR_SIZE,
    SINGLE_INDIRECT_CAP,
};
use crate::device::BlockDevice;
use crate::error::{FsError, FsResult};
use crate::freemap::FreeMap;
use crate::SectorId;

/// On-disk inode layout (spec.md section 6): occupies exactly one sector.
#[repr(C)]
#[derive(Clone, Copy, Debug, AsBytes, FromBytes)]
pub(crate) struct RawInode {
    pub direct: u32,
    pub length: i32,
    pub single_indirect: u32,
    pub double_indirect: u32,
    pub is_dir: u32,
    pub magic: u32,
    _reserved: [u8; SECTOR_SIZE - 24],
}

static_assertions::const_assert_eq!(core::mem::size_of::<RawInode>(), SECTOR_SIZE);

impl RawInode {
    fn fresh(is_dir: bool) -> Self {
        Self {
            direct: 0,
            length: 0,
            single_indirect: 0,
            double_indirect: 0,
            is_dir: is_dir as u32,
            magic: INODE_MAGIC,
            _reserved: [0; SECTOR_SIZE - 24],
        }
    }
}

/// The in-memory inode state cached by `InodeTable` (spec.md section 3).
pub(crate) struct InodeEntry {
    pub open_count: u32,
    pub removed: bool,
    pub deny_write_count: u32,
    pub direct: SectorId,
    pub single_indirect: SectorId,
    pub double_indirect: SectorId,
    pub length: u64,
    pub is_dir: bool,
}

impl InodeEntry {
    fn from_raw(raw: &RawInode) -> Self {
        Self {
            open_count: 1,
            removed: false,
            deny_write_count: 0,
            direct: raw.direct,
            single_indirect: raw.single_indirect,
            double_indirect: raw.double_indirect,
            length: raw.length.max(0) as u64,
            is_dir: raw.is_dir != 0,
        }
    }

    fn to_raw(&self) -> RawInode {
        RawInode {
            direct: self.direct,
            length: self.length as i32,
            single_indirect: self.single_indirect,
            double_indirect: self.double_indirect,
            is_dir: self.is_dir as u32,
            magic: INODE_MAGIC,
            _reserved: [0; SECTOR_SIZE - 24],
        }
    }
}

fn ceil_div(a: u64, b: u64) -> u64 {
    (a + b - 1) / b
}

/// How many slots of the single-indirect tier must be populated to cover
/// `length` bytes.
fn single_needed(length: u64) -> usize {
    if length <= DIRECT_CAP {
        0
    } else {
        let covered = (length - DIRECT_CAP).min(SINGLE_INDIRECT_CAP);
        ceil_div(covered, SECTOR_SIZE as u64) as usize
    }
}

const DOUBLE_THRESHOLD: u64 = DIRECT_CAP + SINGLE_INDIRECT_CAP;
const BYTES_PER_OUTER: u64 = PTRS_PER_SECTOR as u64 * SECTOR_SIZE as u64;

/// How many outer (single-indirect) slots of the double-indirect tier must
/// be populated to cover `length` bytes.
fn double_outer_needed(length: u64) -> usize {
    if length <= DOUBLE_THRESHOLD {
        0
    } else {
        let covered = (length - DOUBLE_THRESHOLD).min(DOUBLE_INDIRECT_CAP);
        ceil_div(covered, BYTES_PER_OUTER) as usize
    }
}

/// How many slots of the `outer`th single-indirect block (under the
/// double-indirect tier) must be populated to cover `length` bytes.
fn double_inner_needed(length: u64, outer: usize) -> usize {
    if length <= DOUBLE_THRESHOLD {
        return 0;
    }
    let covered = (length - DOUBLE_THRESHOLD).min(DOUBLE_INDIRECT_CAP);
    let full_outers = (covered / BYTES_PER_OUTER) as usize;
    match outer.cmp(&full_outers) {
        std::cmp::Ordering::Less => PTRS_PER_SECTOR,
        std::cmp::Ordering::Equal => {
            let rem = covered % BYTES_PER_OUTER;
            ceil_div(rem, SECTOR_SIZE as u64) as usize
        }
        std::cmp::Ordering::Greater => 0,
    }
}

fn read_ptrs<D: BlockDevice>(
    disk: &CachedDisk<D>,
    sector: SectorId,
) -> FsResult<[u32; PTRS_PER_SECTOR]> {
    let raw = disk.read_sector(sector)?;
    let mut ptrs = [0u32; PTRS_PER_SECTOR];
    for (i, chunk) in raw.chunks_exact(4).enumerate() {
        ptrs[i] = u32::from_ne_bytes(chunk.try_into().unwrap());
    }
    Ok(ptrs)
}

fn write_ptrs<D: BlockDevice>(
    disk: &CachedDisk<D>,
    sector: SectorId,
    ptrs: &[u32; PTRS_PER_SECTOR],
) -> FsResult<()> {
    let mut raw = [0u8; SECTOR_SIZE];
    for (i, ptr) in ptrs.iter().enumerate() {
        raw[i * 4..i * 4 + 4].copy_from_slice(&ptr.to_ne_bytes());
    }
    disk.write_sector(sector, &raw)
}

fn zero_sector<D: BlockDevice>(disk: &CachedDisk<D>, sector: SectorId) -> FsResult<()> {
    disk.write_sector(sector, &[0u8; SECTOR_SIZE])
}

fn read_raw<D: BlockDevice>(disk: &CachedDisk<D>, sector: SectorId) -> FsResult<RawInode> {
    let buf = disk.read_sector(sector)?;
    Ok(RawInode::read_from(&buf[..]).expect("inode sector is exactly one sector wide"))
}

fn write_raw<D: BlockDevice>(disk: &CachedDisk<D>, sector: SectorId, raw: &RawInode) -> FsResult<()> {
    let mut buf = [0u8; SECTOR_SIZE];
    raw.write_to(&mut buf[..])
        .expect("inode sector is exactly one sector wide");
    disk.write_sector(sector, &buf)
}

/// Reads the inode at `sector` and reports whether it carries a valid
/// magic number, i.e. whether this is a formatted file system or a blank
/// device (spec.md section 4.4: "on first boot, format the device").
pub(crate) fn is_formatted<D: BlockDevice>(disk: &CachedDisk<D>, sector: SectorId) -> FsResult<bool> {
    Ok(read_raw(disk, sector)?.magic == INODE_MAGIC)
}

/// Writes a fresh on-disk inode at `sector` with `length = 0`, then extends
/// it to `length` bytes (spec.md section 4.2: "create").
pub(crate) fn create<D: BlockDevice, M: FreeMap>(
    disk: &CachedDisk<D>,
    freemap: &M,
    sector: SectorId,
    length: u64,
    is_dir: bool,
) -> FsResult<()> {
    write_raw(disk, sector, &RawInode::fresh(is_dir))?;
    let mut entry = InodeEntry::from_raw(&RawInode::fresh(is_dir));
    extend(disk, freemap, &mut entry, sector, length)
}

/// Which on-disk sector the growth/address-translation logic touches next.
enum Tier {
    Direct,
    Single { index: usize },
    Double { outer: usize, inner: usize },
}

fn classify(offset: u64) -> Tier {
    if offset < DIRECT_CAP {
        Tier::Direct
    } else if offset < DOUBLE_THRESHOLD {
        let rel = offset - DIRECT_CAP;
        Tier::Single {
            index: (rel / SECTOR_SIZE as u64) as usize,
        }
    } else {
        let rel = offset - DOUBLE_THRESHOLD;
        Tier::Double {
            outer: (rel / BYTES_PER_OUTER) as usize,
            inner: ((rel % BYTES_PER_OUTER) / SECTOR_SIZE as u64) as usize,
        }
    }
}

/// Returns the data sector backing byte `offset`, which must already be
/// covered by `entry.length` (i.e. already grown by a prior `extend`).
fn byte_to_sector<D: BlockDevice>(
    entry: &InodeEntry,
    disk: &CachedDisk<D>,
    offset: u64,
) -> FsResult<SectorId> {
    match classify(offset) {
        Tier::Direct => Ok(entry.direct),
        Tier::Single { index } => {
            let ptrs = read_ptrs(disk, entry.single_indirect)?;
            Ok(ptrs[index])
        }
        Tier::Double { outer, inner } => {
            let outer_ptrs = read_ptrs(disk, entry.double_indirect)?;
            let inner_ptrs = read_ptrs(disk, outer_ptrs[outer])?;
            Ok(inner_ptrs[inner])
        }
    }
}

/// Extends `entry` from its current length to `new_len`, allocating and
/// zero-filling any newly needed data and indirect sectors, then writing
/// the updated inode to `sector` (spec.md section 4.2: "Growth"). A no-op
/// if `new_len <= entry.length`. Leaves the on-disk inode's old length
/// intact and may leak allocated sectors if it fails partway through
/// (spec.md section 9's accepted limitation).
fn extend<D: BlockDevice, M: FreeMap>(
    disk: &CachedDisk<D>,
    freemap: &M,
    entry: &mut InodeEntry,
    sector: SectorId,
    new_len: u64,
) -> FsResult<()> {
    if new_len <= entry.length {
        return Ok(());
    }
    let old_len = entry.length;

    if new_len > 0 && entry.direct == 0 {
        entry.direct = freemap.allocate(1).ok_or(FsError::NoSpace)?;
        zero_sector(disk, entry.direct)?;
    }

    if new_len > DIRECT_CAP {
        if entry.single_indirect == 0 {
            entry.single_indirect = freemap.allocate(1).ok_or(FsError::NoSpace)?;
            zero_sector(disk, entry.single_indirect)?;
        }
        let had = single_needed(old_len);
        let needed = single_needed(new_len);
        let mut ptrs = read_ptrs(disk, entry.single_indirect)?;
        for slot in ptrs.iter_mut().take(needed).skip(had) {
            let s = freemap.allocate(1).ok_or(FsError::NoSpace)?;
            zero_sector(disk, s)?;
            *slot = s;
        }
        write_ptrs(disk, entry.single_indirect, &ptrs)?;
    }

    if new_len > DOUBLE_THRESHOLD {
        if entry.double_indirect == 0 {
            entry.double_indirect = freemap.allocate(1).ok_or(FsError::NoSpace)?;
            zero_sector(disk, entry.double_indirect)?;
        }
        let outer_had = double_outer_needed(old_len);
        let outer_needed = double_outer_needed(new_len);
        let mut outer_ptrs = read_ptrs(disk, entry.double_indirect)?;
        for outer in 0..outer_needed {
            if outer_ptrs[outer] == 0 {
                outer_ptrs[outer] = freemap.allocate(1).ok_or(FsError::NoSpace)?;
                zero_sector(disk, outer_ptrs[outer])?;
            }
            let inner_had = if outer < outer_had {
                double_inner_needed(old_len, outer)
            } else {
                0
            };
            let inner_needed = double_inner_needed(new_len, outer);
            let mut inner_ptrs = read_ptrs(disk, outer_ptrs[outer])?;
            for slot in inner_ptrs.iter_mut().take(inner_needed).skip(inner_had) {
                let s = freemap.allocate(1).ok_or(FsError::NoSpace)?;
                zero_sector(disk, s)?;
                *slot = s;
            }
            write_ptrs(disk, outer_ptrs[outer], &inner_ptrs)?;
        }
        write_ptrs(disk, entry.double_indirect, &outer_ptrs)?;
    }

    entry.length = new_len;
    write_raw(disk, sector, &entry.to_raw())
}

fn release_all<D: BlockDevice, M: FreeMap>(
    disk: &CachedDisk<D>,
    freemap: &M,
    sector: SectorId,
    entry: &InodeEntry,
) -> FsResult<()> {
    if entry.direct != 0 {
        freemap.release(entry.direct, 1);
    }
    if entry.single_indirect != 0 {
        let ptrs = read_ptrs(disk, entry.single_indirect)?;
        for &s in ptrs.iter().take(single_needed(entry.length)) {
            if s != 0 {
                freemap.release(s, 1);
            }
        }
        freemap.release(entry.single_indirect, 1);
    }
    if entry.double_indirect != 0 {
        let outer_ptrs = read_ptrs(disk, entry.double_indirect)?;
        for (outer, &o) in outer_ptrs
            .iter()
            .enumerate()
            .take(double_outer_needed(entry.length))
        {
            if o == 0 {
                continue;
            }
            let inner_ptrs = read_ptrs(disk, o)?;
            for &s in inner_ptrs.iter().take(double_inner_needed(entry.length, outer)) {
                if s != 0 {
                    freemap.release(s, 1);
                }
            }
            freemap.release(o, 1);
        }
        freemap.release(entry.double_indirect, 1);
    }
    freemap.release(sector, 1);
    Ok(())
}

/// The process-wide open-inode registry (spec.md section 9).
#[derive(Default)]
pub(crate) struct InodeTable {
    entries: HashMap<SectorId, InodeEntry>,
}

impl InodeTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, sector: SectorId) -> &InodeEntry {
        self.entries
            .get(&sector)
            .expect("operation on an inode that is not open")
    }

    fn entry_mut(&mut self, sector: SectorId) -> &mut InodeEntry {
        self.entries
            .get_mut(&sector)
            .expect("operation on an inode that is not open")
    }

    pub fn is_open(&self, sector: SectorId) -> bool {
        self.entries.contains_key(&sector)
    }

    /// Returns the shared in-memory handle for `sector`, incrementing
    /// `open_count`; lazily constructs it on first open by reading the
    /// on-disk inode.
    pub fn open<D: BlockDevice>(&mut self, disk: &CachedDisk<D>, sector: SectorId) -> FsResult<()> {
        if let Some(entry) = self.entries.get_mut(&sector) {
            entry.open_count += 1;
            return Ok(());
        }
        let raw = read_raw(disk, sector)?;
        if raw.magic != INODE_MAGIC {
            return Err(FsError::NotFound);
        }
        self.entries.insert(sector, InodeEntry::from_raw(&raw));
        Ok(())
    }

    /// `open_count += 1` on an already-open inode.
    pub fn reopen(&mut self, sector: SectorId) {
        self.entry_mut(sector).open_count += 1;
    }

    /// `open_count -= 1`; on zero, drops the entry and, if `removed`,
    /// releases the inode's sectors to the free map.
    pub fn close<D: BlockDevice, M: FreeMap>(
        &mut self,
        disk: &CachedDisk<D>,
        freemap: &M,
        sector: SectorId,
    ) -> FsResult<()> {
        let entry = self.entry_mut(sector);
        entry.open_count -= 1;
        if entry.open_count > 0 {
            return Ok(());
        }
        let entry = self.entries.remove(&sector).unwrap();
        if entry.removed {
            release_all(disk, freemap, sector, &entry)?;
        }
        Ok(())
    }

    /// Marks `sector` to be deleted once its last opener closes it.
    pub fn remove(&mut self, sector: SectorId) {
        self.entry_mut(sector).removed = true;
    }

    pub fn length(&self, sector: SectorId) -> u64 {
        self.entry(sector).length
    }

    pub fn is_dir(&self, sector: SectorId) -> bool {
        self.entry(sector).is_dir
    }

    pub fn deny_write(&mut self, sector: SectorId) {
        let entry = self.entry_mut(sector);
        entry.deny_write_count += 1;
        assert!(entry.deny_write_count <= entry.open_count);
    }

    pub fn allow_write(&mut self, sector: SectorId) {
        let entry = self.entry_mut(sector);
        assert!(entry.deny_write_count > 0);
        entry.deny_write_count -= 1;
    }

    pub fn read_at<D: BlockDevice>(
        &self,
        disk: &CachedDisk<D>,
        sector: SectorId,
        buf: &mut [u8],
        offset: u64,
    ) -> FsResult<usize> {
        let entry = self.entry(sector);
        if offset >= entry.length {
            return Ok(0);
        }
        let avail = ((entry.length - offset) as usize).min(buf.len());
        let mut done = 0;
        while done < avail {
            let pos = offset + done as u64;
            let data_sector = byte_to_sector(entry, disk, pos)?;
            let sector_off = (pos % SECTOR_SIZE as u64) as usize;
            let chunk = (avail - done).min(SECTOR_SIZE - sector_off);
            let data = disk.read_sector(data_sector)?;
            buf[done..done + chunk].copy_from_slice(&data[sector_off..sector_off + chunk]);
            done += chunk;
        }
        Ok(done)
    }

    pub fn write_at<D: BlockDevice, M: FreeMap>(
        &mut self,
        disk: &CachedDisk<D>,
        freemap: &M,
        sector: SectorId,
        buf: &[u8],
        offset: u64,
    ) -> FsResult<usize> {
        let end = offset + buf.len() as u64;
        {
            let entry = self.entry_mut(sector);
            if end > entry.length {
                extend(disk, freemap, entry, sector, end)?;
            }
        }
        let entry = self.entry(sector);
        if entry.deny_write_count > 0 {
            return Ok(0);
        }
        let mut done = 0;
        while done < buf.len() {
            let pos = offset + done as u64;
            let data_sector = byte_to_sector(entry, disk, pos)?;
            let sector_off = (pos % SECTOR_SIZE as u64) as usize;
            let chunk = (buf.len() - done).min(SECTOR_SIZE - sector_off);
            let mut data = disk.read_sector(data_sector)?;
            data[sector_off..sector_off + chunk].copy_from_slice(&buf[done..done + chunk]);
            disk.write_sector(data_sector, &data)?;
            done += chunk;
        }
        Ok(done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RamDisk, RamFreeMap};

    fn setup() -> (CachedDisk<RamDisk>, RamFreeMap) {
        (CachedDisk::new(RamDisk::new(4096), 64), RamFreeMap::new(4096))
    }

    #[test]
    fn create_and_round_trip() {
        let (disk, freemap) = setup();
        // Reserve 0-4: 0-3 stand in for fixed metadata sectors, 4 is the
        // inode's own sector, reserved so data/indirect allocations below
        // can't land on it.
        freemap.mark_used(0, 5);
        let mut table = InodeTable::new();
        create(&disk, &freemap, 4, 0, false).unwrap();
        table.open(&disk, 4).unwrap();
        let n = table.write_at(&disk, &freemap, 4, b"hello", 0).unwrap();
        assert_eq!(n, 5);
        assert_eq!(table.length(4), 5);
        let mut buf = [0u8; 5];
        let n = table.read_at(&disk, 4, &mut buf, 0).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn sparse_write_leaves_hole_zeroed() {
        let (disk, freemap) = setup();
        // Reserve 0-4: 0-3 stand in for fixed metadata sectors, 4 is the
        // inode's own sector, reserved so data/indirect allocations below
        // can't land on it.
        freemap.mark_used(0, 5);
        let mut table = InodeTable::new();
        create(&disk, &freemap, 4, 0, false).unwrap();
        table.open(&disk, 4).unwrap();
        table.write_at(&disk, &freemap, 4, b"X", 10_000).unwrap();
        assert_eq!(table.length(4), 10_001);
        let mut byte = [0xffu8; 1];
        table.read_at(&disk, 4, &mut byte, 5_000).unwrap();
        assert_eq!(byte[0], 0);
        table.read_at(&disk, 4, &mut byte, 10_000).unwrap();
        assert_eq!(byte[0], b'X');
    }

    #[test]
    fn growth_past_single_indirect() {
        let (disk, freemap) = setup();
        // Reserve 0-4: 0-3 stand in for fixed metadata sectors, 4 is the
        // inode's own sector, reserved so data/indirect allocations below
        // can't land on it.
        freemap.mark_used(0, 5);
        let mut table = InodeTable::new();
        create(&disk, &freemap, 4, 0, false).unwrap();
        table.open(&disk, 4).unwrap();
        let zeros = vec![0u8; 100_000];
        let n = table.write_at(&disk, &freemap, 4, &zeros, 0).unwrap();
        assert_eq!(n, 100_000);
        assert_eq!(table.length(4), 100_000);
        let mut byte = [0xffu8; 1];
        table.read_at(&disk, 4, &mut byte, 99_999).unwrap();
        assert_eq!(byte[0], 0);
        table.read_at(&disk, 4, &mut byte, 512).unwrap();
        assert_eq!(byte[0], 0);
    }

    #[test]
    fn deny_write_blocks_writes() {
        let (disk, freemap) = setup();
        // Reserve 0-4: 0-3 stand in for fixed metadata sectors, 4 is the
        // inode's own sector, reserved so data/indirect allocations below
        // can't land on it.
        freemap.mark_used(0, 5);
        let mut table = InodeTable::new();
        create(&disk, &freemap, 4, 0, false).unwrap();
        table.open(&disk, 4).unwrap();
        table.deny_write(4);
        let n = table.write_at(&disk, &freemap, 4, b"nope", 0).unwrap();
        assert_eq!(n, 0);
        table.allow_write(4);
        let n = table.write_at(&disk, &freemap, 4, b"ok!!", 0).unwrap();
        assert_eq!(n, 4);
    }

    #[test]
    fn removal_reclaims_sectors_on_last_close() {
        let (disk, freemap) = setup();
        // Reserve sectors 0-4: 0-3 stand in for fixed metadata sectors that
        // stay reserved for the life of the test, 4 is the inode's own
        // sector, reserved so the writes below can't allocate a data or
        // indirect block on top of it.
        freemap.mark_used(0, 5);
        let mut table = InodeTable::new();
        create(&disk, &freemap, 4, 0, false).unwrap();
        table.open(&disk, 4).unwrap();
        let zeros = vec![0u8; 100_000];
        table.write_at(&disk, &freemap, 4, &zeros, 0).unwrap();
        table.reopen(4);
        table.remove(4);
        table.close(&disk, &freemap, 4).unwrap();
        assert!(freemap.used_count() > 5, "second opener still holds sectors");
        table.close(&disk, &freemap, 4).unwrap();
        assert_eq!(freemap.used_count(), 4, "only the 4 reserved sectors should remain used");
    }
}
