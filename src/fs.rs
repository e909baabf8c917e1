//! The filesystem facade: initialization, the `create`/`open`/`remove`/
//! `read`/`write`/`seek`/`tell`/`close`/`readdir`/`mkdir`/`chdir`/`isdir`/
//! `inumber` surface, and shutdown (spec.md section 4.4).
//!
//! Spec.md section 5 calls for "a single coarse-grained filesystem mutex
//! serializes all entry to the facade" and a separate, independent mutex
//! for the sector cache, never acquired in the other order. Since the
//! facade lock already serializes every operation that touches inode or
//! directory state, a further per-inode lock would add nothing — it is
//! folded into the one `Mutex<FsInner<D, M>>` below, the std-idiomatic
//! reading of spec.md's "out of scope: synchronization primitives": the
//! teacher's per-object `Sleeplock`/`Spinlock` machinery (`lock/sleeplock.rs`,
//! `lock/spinlock.rs`) becomes the single `std::sync::Mutex` a caller would
//! reach for here. Device I/O still only ever happens with the facade lock
//! held and the inner `SectorCache`'s own lock released around it, matching
//! `cache.rs`'s discipline.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::cache::CachedDisk;
use crate::config::{FsConfig, ROOT_SECTOR};
use crate::device::BlockDevice;
use crate::directory;
use crate::error::{FsError, FsResult};
use crate::freemap::FreeMap;
use crate::inode::{self, InodeTable};
use crate::task::TaskContext;
use crate::SectorId;

struct FsInner<D, M> {
    disk: CachedDisk<D>,
    freemap: M,
    table: InodeTable,
    /// How many tasks currently have each sector as their working
    /// directory. This crate has no visibility into other tasks beyond
    /// the one `TaskContext` a given call is made on behalf of, so
    /// `chdir` maintains this itself rather than relying on a global task
    /// list (spec.md section 8, invariant 8, generalized to the
    /// cross-task case `remove` scenario S5 exercises).
    cwd_refs: HashMap<SectorId, u32>,
}

/// A handle returned by `open`, wrapping an inode and its own cursor
/// (spec.md section 4.4: `filesys_open` "returns a file handle wrapping
/// the inode with its own cursor"). Must be passed to `close` exactly
/// once; dropping it without closing leaks its `open_count` reservation,
/// mirroring the teacher's explicit `dir_close`/`inode_close` contract
/// rather than an RAII `Drop` (a facade method, not a destructor, must
/// run while holding the facade lock).
pub struct FileHandle {
    sector: SectorId,
    pos: u64,
    is_dir: bool,
}

impl FileHandle {
    /// The sector of the inode this handle wraps (spec.md: `inumber`).
    pub fn inumber(&self) -> SectorId {
        self.sector
    }

    pub fn is_dir(&self) -> bool {
        self.is_dir
    }

    pub fn tell(&self) -> u64 {
        self.pos
    }
}

/// The file system core: an inode layer, a directory layer, and a sector
/// cache, behind one coarse lock (spec.md sections 1, 4, 5).
pub struct Filesystem<D: BlockDevice, M: FreeMap> {
    inner: Mutex<FsInner<D, M>>,
}

impl<D: BlockDevice, M: FreeMap> Filesystem<D, M> {
    /// Mounts the file system on `device`, using `freemap` for sector
    /// allocation. Formats on first use — zero free-map state and a fresh
    /// root directory are the caller's/`freemap`'s responsibility to set
    /// up before the root sector is checked; this only decides whether the
    /// root inode itself needs to be created (spec.md section 4.4: "on
    /// first boot, format the device ...; on subsequent boots, open the
    /// root sector").
    pub fn mount(device: D, freemap: M, config: FsConfig) -> FsResult<Self> {
        let disk = CachedDisk::new(device, config.cache_capacity);
        let mut table = InodeTable::new();
        if !inode::is_formatted(&disk, ROOT_SECTOR)? {
            log::info!("formatting file system: creating root directory at sector {ROOT_SECTOR}");
            directory::dir_create(&mut table, &disk, &freemap, ROOT_SECTOR, 0, ROOT_SECTOR)?;
        } else {
            log::debug!("opening existing file system, root at sector {ROOT_SECTOR}");
        }
        Ok(Self {
            inner: Mutex::new(FsInner {
                disk,
                freemap,
                table,
                cwd_refs: HashMap::new(),
            }),
        })
    }

    /// `filesys_create(path, size)` (spec.md section 4.4).
    pub fn create<T: TaskContext>(&self, task: &T, path: &str, size: u64) -> FsResult<()> {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        let (parent, name) =
            directory::resolve_parent(&mut inner.table, &inner.disk, &inner.freemap, task.cwd(), path)?;
        let result = (|| {
            let sector = inner.freemap.allocate(1).ok_or(FsError::NoSpace)?;
            inode::create(&inner.disk, &inner.freemap, sector, size, false)?;
            directory::dir_add(&mut inner.table, &inner.disk, &inner.freemap, parent, &name, sector, false)
        })();
        inner.table.close(&inner.disk, &inner.freemap, parent)?;
        if let Err(e) = &result {
            log::warn!("create {path:?} failed: {e}");
        }
        result
    }

    /// `filesys_open(path)` (spec.md section 4.4).
    pub fn open<T: TaskContext>(&self, task: &T, path: &str) -> FsResult<FileHandle> {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        let sector = directory::resolve(&mut inner.table, &inner.disk, &inner.freemap, task.cwd(), path)?;
        inner.table.open(&inner.disk, sector)?;
        let is_dir = inner.table.is_dir(sector);
        Ok(FileHandle { sector, pos: 0, is_dir })
    }

    /// `filesys_remove(path)` (spec.md section 4.4).
    pub fn remove<T: TaskContext>(&self, task: &T, path: &str) -> FsResult<()> {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        let cwd = task.cwd();
        let (parent, name) = directory::resolve_parent(&mut inner.table, &inner.disk, &inner.freemap, cwd, path)?;
        let result = (|| {
            let target = directory::lookup(&inner.table, &inner.disk, parent, &name)?
                .ok_or(FsError::NotFound)?;
            if inner.cwd_refs.contains_key(&target) {
                return Err(FsError::Busy);
            }
            directory::dir_remove(&mut inner.table, &inner.disk, &inner.freemap, parent, &name)
        })();
        inner.table.close(&inner.disk, &inner.freemap, parent)?;
        result
    }

    pub fn filesize(&self, handle: &FileHandle) -> u64 {
        let inner = self.inner.lock().unwrap();
        inner.table.length(handle.sector)
    }

    pub fn read(&self, handle: &mut FileHandle, buf: &mut [u8]) -> FsResult<usize> {
        let inner = self.inner.lock().unwrap();
        let n = inner.table.read_at(&inner.disk, handle.sector, buf, handle.pos)?;
        handle.pos += n as u64;
        Ok(n)
    }

    pub fn write(&self, handle: &mut FileHandle, buf: &[u8]) -> FsResult<usize> {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        let n = inner
            .table
            .write_at(&inner.disk, &inner.freemap, handle.sector, buf, handle.pos)?;
        handle.pos += n as u64;
        Ok(n)
    }

    pub fn seek(&self, handle: &mut FileHandle, pos: u64) {
        handle.pos = pos;
    }

    pub fn tell(&self, handle: &FileHandle) -> u64 {
        handle.pos
    }

    /// Closes `handle`, releasing its `open_count` reservation.
    pub fn close(&self, handle: FileHandle) -> FsResult<()> {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        inner.table.close(&inner.disk, &inner.freemap, handle.sector)
    }

    pub fn isdir(&self, handle: &FileHandle) -> bool {
        handle.is_dir
    }

    pub fn inumber(&self, handle: &FileHandle) -> SectorId {
        handle.sector
    }

    /// `dir_readdir`, skipping `.`/`..`, through a directory's own handle.
    pub fn readdir(&self, handle: &mut FileHandle) -> FsResult<Option<String>> {
        if !handle.is_dir {
            return Err(FsError::NotDirectory);
        }
        let inner = self.inner.lock().unwrap();
        directory::dir_readdir(&inner.table, &inner.disk, handle.sector, &mut handle.pos)
    }

    pub fn mkdir<T: TaskContext>(&self, task: &T, path: &str) -> FsResult<()> {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        directory::mkdir(&mut inner.table, &inner.disk, &inner.freemap, task.cwd(), path)
    }

    pub fn chdir<T: TaskContext>(&self, task: &T, path: &str) -> FsResult<()> {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        let old = task.cwd();
        directory::chdir(&mut inner.table, &inner.disk, &inner.freemap, task, path)?;
        let new = task.cwd();
        *inner.cwd_refs.entry(new).or_insert(0) += 1;
        if let Some(count) = inner.cwd_refs.get_mut(&old) {
            *count -= 1;
            if *count == 0 {
                inner.cwd_refs.remove(&old);
            }
        }
        Ok(())
    }

    /// Drains every dirty sector to the block device (spec.md section 4.4:
    /// "on shutdown, drain the cache by repeatedly calling `take_one_dirty`").
    pub fn shutdown(&self) -> FsResult<()> {
        let inner = self.inner.lock().unwrap();
        log::info!("flushing sector cache");
        inner.disk.flush()
    }
}
