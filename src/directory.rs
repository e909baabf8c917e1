//! Directories.
//!
//! A directory is not a separate persistent structure — it is the
//! byte-content of a directory-flagged inode, a flat array of
//! fixed-size entries (spec.md section 9: "Implementers should reuse the
//! inode read/write primitives verbatim"). Every function here goes
//! through `InodeTable::read_at`/`write_at`, so directory growth rides the
//! same three-tier extension path as an ordinary file.
//!
//! Grounded on Pintos's `directory.c`: `dir_create`, `lookup`, `dir_add`,
//! `dir_remove`, `dir_readdir`, `mkdir`. The path walker below folds
//! `directory.c`'s recursive `lookup` plus the "always resolves from root,
//! then silently rebinds to the working directory" behavior of its
//! `subdir_lookup` helper into the single iterative walk spec.md section
//! 4.3 describes: start at root for an absolute path, at the calling
//! task's working directory otherwise.

use zerocopy::{AsBytes, FromBytes};

use crate::cache::CachedDisk;
use crate::config::{NAME_MAX, ROOT_SECTOR};
use crate::device::BlockDevice;
use crate::error::{FsError, FsResult};
use crate::freemap::FreeMap;
use crate::inode::InodeTable;
use crate::task::TaskContext;
use crate::SectorId;

/// On-disk directory entry layout (spec.md section 6).
#[repr(C)]
#[derive(Clone, Copy, Debug, AsBytes, FromBytes)]
pub(crate) struct RawDirent {
    pub inode_sector: u32,
    pub name: [u8; NAME_MAX + 1],
    pub in_use: u8,
    pub is_dir: u8,
    _pad: [u8; 3],
}

pub(crate) const DIRENT_SIZE: usize = 24;

static_assertions::const_assert_eq!(core::mem::size_of::<RawDirent>(), DIRENT_SIZE);

impl RawDirent {
    fn name_str(&self) -> &str {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(self.name.len());
        std::str::from_utf8(&self.name[..end]).unwrap_or("")
    }

    fn with_name(inode_sector: SectorId, name: &str, is_dir: bool) -> Self {
        let mut raw_name = [0u8; NAME_MAX + 1];
        raw_name[..name.len()].copy_from_slice(name.as_bytes());
        Self {
            inode_sector,
            name: raw_name,
            in_use: 1,
            is_dir: is_dir as u8,
            _pad: [0; 3],
        }
    }

    fn read(buf: &[u8]) -> Self {
        Self::read_from(buf).expect("directory entry buffer is exactly one entry wide")
    }

    fn bytes(&self) -> [u8; DIRENT_SIZE] {
        let mut buf = [0u8; DIRENT_SIZE];
        self.write_to(&mut buf[..])
            .expect("directory entry buffer is exactly one entry wide");
        buf
    }
}

/// Looks up `name` in `dir_sector`, returning its target inode sector.
/// Exposed for the facade's busy-directory check (spec.md section 8,
/// invariant 8), which needs the target sector before deciding whether to
/// remove it.
pub(crate) fn lookup<D: BlockDevice>(
    table: &InodeTable,
    disk: &CachedDisk<D>,
    dir_sector: SectorId,
    name: &str,
) -> FsResult<Option<SectorId>> {
    Ok(scan_for(table, disk, dir_sector, name)?.map(|(e, _)| e.inode_sector))
}

fn scan_for<D: BlockDevice>(
    table: &InodeTable,
    disk: &CachedDisk<D>,
    dir_sector: SectorId,
    name: &str,
) -> FsResult<Option<(RawDirent, u64)>> {
    let mut ofs = 0u64;
    loop {
        let mut buf = [0u8; DIRENT_SIZE];
        let n = table.read_at(disk, dir_sector, &mut buf, ofs)?;
        if n < DIRENT_SIZE {
            return Ok(None);
        }
        let entry = RawDirent::read(&buf);
        if entry.in_use != 0 && entry.name_str() == name {
            return Ok(Some((entry, ofs)));
        }
        ofs += DIRENT_SIZE as u64;
    }
}

fn free_slot_or_end<D: BlockDevice>(
    table: &InodeTable,
    disk: &CachedDisk<D>,
    dir_sector: SectorId,
) -> FsResult<u64> {
    let mut ofs = 0u64;
    loop {
        let mut buf = [0u8; DIRENT_SIZE];
        let n = table.read_at(disk, dir_sector, &mut buf, ofs)?;
        if n < DIRENT_SIZE {
            return Ok(ofs);
        }
        if RawDirent::read(&buf).in_use == 0 {
            return Ok(ofs);
        }
        ofs += DIRENT_SIZE as u64;
    }
}

fn has_extra_entries<D: BlockDevice>(
    table: &InodeTable,
    disk: &CachedDisk<D>,
    dir_sector: SectorId,
) -> FsResult<bool> {
    let mut ofs = 0u64;
    loop {
        let mut buf = [0u8; DIRENT_SIZE];
        let n = table.read_at(disk, dir_sector, &mut buf, ofs)?;
        if n < DIRENT_SIZE {
            return Ok(false);
        }
        let entry = RawDirent::read(&buf);
        if entry.in_use != 0 {
            let name = entry.name_str();
            if name != "." && name != ".." {
                return Ok(true);
            }
        }
        ofs += DIRENT_SIZE as u64;
    }
}

/// Creates an empty directory inode at `sector` sized for `entry_cnt + 2`
/// entries, then adds the `.` and `..` entries (spec.md section 4.3:
/// `dir_create`). Mirrors `directory.c`'s `dir_create`.
pub(crate) fn dir_create<D: BlockDevice, M: FreeMap>(
    table: &mut InodeTable,
    disk: &CachedDisk<D>,
    freemap: &M,
    sector: SectorId,
    entry_cnt: usize,
    parent_sector: SectorId,
) -> FsResult<()> {
    let size = (entry_cnt as u64 + 2) * DIRENT_SIZE as u64;
    crate::inode::create(disk, freemap, sector, size, true)?;
    table.open(disk, sector)?;
    let result = (|| {
        dir_add(table, disk, freemap, sector, ".", sector, true)?;
        dir_add(table, disk, freemap, sector, "..", parent_sector, true)
    })();
    table.close(disk, freemap, sector)?;
    result
}

/// Adds `name -> inode_sector` to the directory at `dir_sector` (spec.md
/// section 4.3: `dir_add`). The slot is the first `in_use == false` entry,
/// or a fresh entry appended at end-of-file.
pub(crate) fn dir_add<D: BlockDevice, M: FreeMap>(
    table: &mut InodeTable,
    disk: &CachedDisk<D>,
    freemap: &M,
    dir_sector: SectorId,
    name: &str,
    inode_sector: SectorId,
    is_dir: bool,
) -> FsResult<()> {
    if name.is_empty() {
        return Err(FsError::InvalidArgument);
    }
    if name.len() > NAME_MAX {
        return Err(FsError::NameTooLong);
    }
    if scan_for(table, disk, dir_sector, name)?.is_some() {
        return Err(FsError::AlreadyExists);
    }
    let ofs = free_slot_or_end(table, disk, dir_sector)?;
    let entry = RawDirent::with_name(inode_sector, name, is_dir);
    table.write_at(disk, freemap, dir_sector, &entry.bytes(), ofs)?;
    Ok(())
}

/// Removes the entry named `name` from `dir_sector` (spec.md section 4.3:
/// `dir_remove`). Fails on a missing entry or a non-empty target directory.
/// The "is this someone's working directory" check (spec.md section 8,
/// invariant 8) happens above this layer, in `Filesystem::remove`: this
/// crate has no visibility into other tasks, only the one `TaskContext` a
/// given call is made on behalf of, so the facade tracks cwd references
/// itself rather than comparing against a single caller-supplied sector.
pub(crate) fn dir_remove<D: BlockDevice, M: FreeMap>(
    table: &mut InodeTable,
    disk: &CachedDisk<D>,
    freemap: &M,
    dir_sector: SectorId,
    name: &str,
) -> FsResult<()> {
    let (entry, ofs) = scan_for(table, disk, dir_sector, name)?.ok_or(FsError::NotFound)?;
    let target = entry.inode_sector;
    if entry.is_dir != 0 {
        table.open(disk, target)?;
        let nonempty = has_extra_entries(table, disk, target);
        table.close(disk, freemap, target)?;
        if nonempty? {
            return Err(FsError::NotEmpty);
        }
    }
    let mut cleared = entry;
    cleared.in_use = 0;
    table.write_at(disk, freemap, dir_sector, &cleared.bytes(), ofs)?;
    table.open(disk, target)?;
    table.remove(target);
    table.close(disk, freemap, target)?;
    Ok(())
}

/// Returns the next in-use entry's name starting at `*pos`, skipping `.`
/// and `..`, and advances `*pos` past it (spec.md section 4.3:
/// `dir_readdir`).
pub(crate) fn dir_readdir<D: BlockDevice>(
    table: &InodeTable,
    disk: &CachedDisk<D>,
    dir_sector: SectorId,
    pos: &mut u64,
) -> FsResult<Option<String>> {
    loop {
        let mut buf = [0u8; DIRENT_SIZE];
        let n = table.read_at(disk, dir_sector, &mut buf, *pos)?;
        if n < DIRENT_SIZE {
            return Ok(None);
        }
        *pos += DIRENT_SIZE as u64;
        let entry = RawDirent::read(&buf);
        if entry.in_use != 0 {
            let name = entry.name_str();
            if name != "." && name != ".." {
                return Ok(Some(name.to_string()));
            }
        }
    }
}

/// Resolves `path` (absolute or relative to `cwd`) to a sector, walking one
/// component at a time (spec.md section 4.3, "Path resolution"). Balances
/// every temporary `open` it performs along the way; the returned sector is
/// not left open.
pub(crate) fn resolve<D: BlockDevice, M: FreeMap>(
    table: &mut InodeTable,
    disk: &CachedDisk<D>,
    freemap: &M,
    cwd: SectorId,
    path: &str,
) -> FsResult<SectorId> {
    let start = if path.starts_with('/') { ROOT_SECTOR } else { cwd };
    table.open(disk, start)?;
    let mut current = start;
    for part in path.split('/').filter(|c| !c.is_empty()) {
        if part.len() > NAME_MAX {
            table.close(disk, freemap, current)?;
            return Err(FsError::NameTooLong);
        }
        if !table.is_dir(current) {
            table.close(disk, freemap, current)?;
            return Err(FsError::NotDirectory);
        }
        match scan_for(table, disk, current, part)? {
            Some((entry, _)) => {
                let next = entry.inode_sector;
                table.open(disk, next)?;
                table.close(disk, freemap, current)?;
                current = next;
            }
            None => {
                table.close(disk, freemap, current)?;
                return Err(FsError::NotFound);
            }
        }
    }
    table.close(disk, freemap, current)?;
    Ok(current)
}

/// Resolves the parent directory of `path` and returns `(parent_sector,
/// final_component)`. The parent is left open — the caller closes it once
/// done (spec.md section 4.4: every facade entry point that creates or
/// removes a name needs the parent held open across the mutation).
pub(crate) fn resolve_parent<D: BlockDevice, M: FreeMap>(
    table: &mut InodeTable,
    disk: &CachedDisk<D>,
    freemap: &M,
    cwd: SectorId,
    path: &str,
) -> FsResult<(SectorId, String)> {
    let mut components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
    let last = components.pop().ok_or(FsError::InvalidArgument)?;
    if last.is_empty() {
        return Err(FsError::InvalidArgument);
    }
    if last.len() > NAME_MAX {
        return Err(FsError::NameTooLong);
    }
    let start = if path.starts_with('/') { ROOT_SECTOR } else { cwd };
    table.open(disk, start)?;
    let mut current = start;
    for part in components {
        if !table.is_dir(current) {
            table.close(disk, freemap, current)?;
            return Err(FsError::NotDirectory);
        }
        match scan_for(table, disk, current, part)? {
            Some((entry, _)) => {
                let next = entry.inode_sector;
                table.open(disk, next)?;
                table.close(disk, freemap, current)?;
                current = next;
            }
            None => {
                table.close(disk, freemap, current)?;
                return Err(FsError::NotFound);
            }
        }
    }
    if !table.is_dir(current) {
        table.close(disk, freemap, current)?;
        return Err(FsError::NotDirectory);
    }
    Ok((current, last.to_string()))
}

/// Resolves the parent of `path`, allocates a fresh sector, creates a
/// directory there, and links it into the parent (spec.md section 4.3:
/// `mkdir`).
pub(crate) fn mkdir<D: BlockDevice, M: FreeMap>(
    table: &mut InodeTable,
    disk: &CachedDisk<D>,
    freemap: &M,
    cwd: SectorId,
    path: &str,
) -> FsResult<()> {
    let (parent, name) = resolve_parent(table, disk, freemap, cwd, path)?;
    let result = (|| {
        if scan_for(table, disk, parent, &name)?.is_some() {
            return Err(FsError::AlreadyExists);
        }
        let new_sector = freemap.allocate(1).ok_or(FsError::NoSpace)?;
        dir_create(table, disk, freemap, new_sector, 0, parent)?;
        dir_add(table, disk, freemap, parent, &name, new_sector, true)
    })();
    table.close(disk, freemap, parent)?;
    result
}

/// Resolves `path` and, if it names a directory, makes it the calling
/// task's working directory (spec.md section 4.3: `chdir`).
pub(crate) fn chdir<D: BlockDevice, M: FreeMap, T: TaskContext>(
    table: &mut InodeTable,
    disk: &CachedDisk<D>,
    freemap: &M,
    task: &T,
    path: &str,
) -> FsResult<()> {
    let target = resolve(table, disk, freemap, task.cwd(), path)?;
    table.open(disk, target)?;
    let is_dir = table.is_dir(target);
    table.close(disk, freemap, target)?;
    if !is_dir {
        return Err(FsError::NotDirectory);
    }
    task.set_cwd(target);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ROOT_SECTOR;
    use crate::testing::{RamDisk, RamFreeMap};

    fn setup() -> (CachedDisk<RamDisk>, RamFreeMap, InodeTable) {
        let disk = CachedDisk::new(RamDisk::new(4096), 64);
        let freemap = RamFreeMap::new(4096);
        freemap.mark_used(0, ROOT_SECTOR as u32 + 1);
        let mut table = InodeTable::new();
        dir_create(&mut table, &disk, &freemap, ROOT_SECTOR, 0, ROOT_SECTOR).unwrap();
        (disk, freemap, table)
    }

    #[test]
    fn dup_add_fails_and_enumerates_once() {
        let (disk, freemap, mut table) = setup();
        table.open(&disk, ROOT_SECTOR).unwrap();
        dir_add(&mut table, &disk, &freemap, ROOT_SECTOR, "x", 10, false).unwrap();
        assert!(dir_add(&mut table, &disk, &freemap, ROOT_SECTOR, "x", 11, false).is_err());
        let mut pos = 0;
        let mut names = vec![];
        while let Some(n) = dir_readdir(&table, &disk, ROOT_SECTOR, &mut pos).unwrap() {
            names.push(n);
        }
        assert_eq!(names, vec!["x".to_string()]);
    }

    #[test]
    fn remove_rejects_nonempty_then_succeeds_once_emptied() {
        let (disk, freemap, mut table) = setup();
        table.open(&disk, ROOT_SECTOR).unwrap();
        let sub = freemap.allocate(1).unwrap();
        dir_create(&mut table, &disk, &freemap, sub, 0, ROOT_SECTOR).unwrap();
        dir_add(&mut table, &disk, &freemap, ROOT_SECTOR, "d", sub, true).unwrap();
        table.open(&disk, sub).unwrap();
        let f = freemap.allocate(1).unwrap();
        dir_add(&mut table, &disk, &freemap, sub, "f", f, false).unwrap();
        assert_eq!(
            dir_remove(&mut table, &disk, &freemap, ROOT_SECTOR, "d"),
            Err(FsError::NotEmpty)
        );
        dir_remove(&mut table, &disk, &freemap, sub, "f").unwrap();
        table.close(&disk, &freemap, sub).unwrap();

        dir_remove(&mut table, &disk, &freemap, ROOT_SECTOR, "d").unwrap();
    }

    #[test]
    fn resolve_nested_relative_path() {
        let (disk, freemap, mut table) = setup();
        table.open(&disk, ROOT_SECTOR).unwrap();
        mkdir(&mut table, &disk, &freemap, ROOT_SECTOR, "/d").unwrap();
        let d = resolve(&mut table, &disk, &freemap, ROOT_SECTOR, "/d").unwrap();
        mkdir(&mut table, &disk, &freemap, d, "sub").unwrap();
        let sub = resolve(&mut table, &disk, &freemap, d, "sub").unwrap();
        let parent_of_sub = resolve(&mut table, &disk, &freemap, sub, "..").unwrap();
        assert_eq!(parent_of_sub, d);
    }
}
