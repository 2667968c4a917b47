//! Buffered block filesystem: a cache of disk sectors, a free-sector
//! bitmap, indexed inodes, and directories built on top of inodes.
//!
//! Layered the way the original filesystem is — a thin facade sitting on
//! the cache and inode layers, per the retrieved `filesys/cache.c`/
//! `filesys/inode.c` — but with explicit `Result<T, FsError>` instead of
//! `PANIC`/`ASSERT` on most failure paths, since bad user input (a bogus
//! path, a full disk) is a normal outcome here rather than a kernel bug.

extern crate alloc;

use alloc::sync::Arc;

pub mod cache;
pub mod dir;
pub mod freemap;
pub mod inode;
pub mod path;
pub mod stat;

pub use dir::{add as dir_add, lookup as dir_lookup, remove as dir_remove};
pub use inode::{Inode, InodeTable};
pub use path::{FileName, Path};
pub use stat::Stat;

use crate::block::BlockDevice;
use crate::fs::cache::BufferCache;
use crate::fs::freemap::FreeMap;
use crate::param::{FREE_MAP_SECTOR, ROOT_DIR_SECTOR};

/// Failure modes surfaced by the filesystem layer. Kept as one flat enum
/// rather than per-operation error types, matching how the original
/// implementation reports a handful of recurring conditions
/// (`free_map_allocate` failing, `dir_lookup` failing, bad inode magic).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    DiskFull,
    NotFound,
    AlreadyExists,
    NotADirectory,
    IsADirectory,
    DirectoryNotEmpty,
    NameTooLong,
    InvalidArgument,
    CorruptInode,
    WriteDenied,
}

/// The root of the buffered filesystem: free-map sector at
/// [`FREE_MAP_SECTOR`], root directory at [`ROOT_DIR_SECTOR`], everything
/// else allocated on demand.
pub struct FileSystem<'d> {
    device: &'d dyn BlockDevice,
    pub inodes: InodeTable<'d>,
    root_sector: u32,
}

impl<'d> FileSystem<'d> {
    /// Formats a fresh filesystem: a free-map bitmap reserving the
    /// boot-adjacent sectors, and an empty root directory. Mirrors
    /// `filesys_format` in the original filesystem, including the
    /// decision to give the root directory no pre-sized capacity (§9 open
    /// question: directories grow on demand exactly like regular files,
    /// rather than being pre-allocated to `ROOT_DIR_ENTRIES` slots).
    pub fn format(device: &'d dyn BlockDevice) -> Self {
        let cache = BufferCache::new(device);
        // Reserves only the free-map's own sector; the root directory's
        // inode is allocated through the ordinary `create` path right
        // below, landing on the next free sector (`ROOT_DIR_SECTOR`).
        let free_map = FreeMap::format(device, &cache, device.sector_count(), ROOT_DIR_SECTOR);
        let inodes = InodeTable::new(device, cache, free_map);
        let root = inodes
            .create(true, ROOT_DIR_SECTOR)
            .expect("formatting a fresh disk must not run out of space");
        assert_eq!(root.sector(), ROOT_DIR_SECTOR);
        inodes.close(root);
        log::info!("formatted {} sectors", device.sector_count());
        Self {
            device,
            inodes,
            root_sector: ROOT_DIR_SECTOR,
        }
    }

    /// Mounts an already-formatted device, reloading the free map from
    /// its on-disk bitmap sector.
    pub fn mount(device: &'d dyn BlockDevice) -> Self {
        let cache = BufferCache::new(device);
        let free_map = FreeMap::load(device, device.sector_count(), FREE_MAP_SECTOR);
        log::info!("mounted {} sectors", device.sector_count());
        Self {
            device,
            inodes: InodeTable::new(device, cache, free_map),
            root_sector: ROOT_DIR_SECTOR,
        }
    }

    pub fn root(&self) -> Result<Arc<Inode>, FsError> {
        self.inodes.open(self.root_sector)
    }

    /// Resolves `path` relative to `cwd` (or the root, if absolute).
    pub fn resolve(&self, cwd: &Arc<Inode>, path: &Path) -> Result<Arc<Inode>, FsError> {
        dir::resolve(&self.inodes, self.root_sector, cwd, path)
    }

    /// Creates a regular file at `path`, linking it into its parent
    /// directory.
    pub fn create_file(&self, cwd: &Arc<Inode>, path: &Path) -> Result<Arc<Inode>, FsError> {
        let (parent, name, force_dir) = dir::resolve_parent(&self.inodes, self.root_sector, cwd, path)?;
        if !parent.is_dir() || force_dir {
            return Err(FsError::NotADirectory);
        }
        let file = self.inodes.create(false, parent.sector())?;
        if let Err(e) = dir::add(&self.inodes, &parent, name, file.sector()) {
            file.mark_removed();
            self.inodes.close(Arc::clone(&file));
            return Err(e);
        }
        Ok(file)
    }

    /// Creates a directory at `path`.
    pub fn create_dir(&self, cwd: &Arc<Inode>, path: &Path) -> Result<Arc<Inode>, FsError> {
        let (parent, name, _force_dir) = dir::resolve_parent(&self.inodes, self.root_sector, cwd, path)?;
        if !parent.is_dir() {
            return Err(FsError::NotADirectory);
        }
        let new_dir = self.inodes.create(true, parent.sector())?;
        if let Err(e) = dir::add(&self.inodes, &parent, name, new_dir.sector()) {
            new_dir.mark_removed();
            self.inodes.close(Arc::clone(&new_dir));
            return Err(e);
        }
        Ok(new_dir)
    }

    /// Unlinks `path`. A directory may only be removed when empty, not in
    /// use as any process's working directory, and not open elsewhere.
    pub fn remove(&self, cwd: &Arc<Inode>, path: &Path) -> Result<(), FsError> {
        let (parent, name, force_dir) = dir::resolve_parent(&self.inodes, self.root_sector, cwd, path)?;
        let sector = dir::lookup(&self.inodes, &parent, name).ok_or(FsError::NotFound)?;
        let target = self.inodes.open(sector)?;
        if force_dir && !target.is_dir() {
            self.inodes.close(target);
            return Err(FsError::NotADirectory);
        }
        if target.is_dir() {
            // `self.inodes.open` above and `target` itself each hold one
            // reference; any further Arc means another caller has it open.
            let in_use = !dir::is_empty(&self.inodes, &target)
                || target.pwd_count() > 0
                || Arc::strong_count(&target) > 2;
            if in_use {
                self.inodes.close(target);
                return Err(FsError::DirectoryNotEmpty);
            }
        }
        dir::remove(&self.inodes, &parent, name)?;
        target.mark_removed();
        self.inodes.close(target);
        Ok(())
    }

    pub fn stat(&self, inode: &Inode) -> Stat {
        Stat {
            inode_sector: inode.sector(),
            is_dir: inode.is_dir(),
            size: inode.length(),
        }
    }

    /// Flushes every dirty cache line to the device. Called on a timer
    /// tick by an external collaborator, and on a clean unmount — the
    /// periodic-flush/write-on-close journaling model named in the
    /// concurrency section.
    pub fn sync(&self) {
        self.inodes.cache.flush();
        self.inodes.free_map.persist(FREE_MAP_SECTOR);
        log::debug!("synced buffer cache and free map to disk");
    }

    pub fn device(&self) -> &'d dyn BlockDevice {
        self.device
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::block::MemDisk;

    #[test]
    fn format_then_create_and_read_back() {
        let disk = MemDisk::new(1024);
        let fs = FileSystem::format(&disk);
        let root = fs.root().unwrap();

        let file = fs.create_file(&root, Path::from_str("hello.txt")).unwrap();
        fs.inodes.write_at(&file, b"hi", 0).unwrap();

        let resolved = fs.resolve(&root, Path::from_str("hello.txt")).unwrap();
        let mut buf = [0u8; 2];
        assert_eq!(fs.inodes.read_at(&resolved, &mut buf, 0), 2);
        assert_eq!(&buf, b"hi");
    }

    #[test]
    fn removing_nonempty_directory_fails() {
        let disk = MemDisk::new(1024);
        let fs = FileSystem::format(&disk);
        let root = fs.root().unwrap();
        fs.create_dir(&root, Path::from_str("sub")).unwrap();
        fs.create_file(&root, Path::from_str("sub/f")).unwrap();

        assert_eq!(
            fs.remove(&root, Path::from_str("sub")),
            Err(FsError::DirectoryNotEmpty)
        );
    }

    #[test]
    fn removing_a_directory_in_use_as_a_cwd_fails() {
        let disk = MemDisk::new(1024);
        let fs = FileSystem::format(&disk);
        let root = fs.root().unwrap();
        // `sub` standing in for a process's `cwd` handle: still open,
        // still marked in use, even though nothing else references it.
        let sub = fs.create_dir(&root, Path::from_str("sub")).unwrap();
        sub.inc_pwd_count();

        assert_eq!(
            fs.remove(&root, Path::from_str("sub")),
            Err(FsError::DirectoryNotEmpty)
        );

        sub.dec_pwd_count();
        drop(sub);
        assert!(fs.remove(&root, Path::from_str("sub")).is_ok());
    }

    #[test]
    fn create_duplicate_name_fails() {
        let disk = MemDisk::new(1024);
        let fs = FileSystem::format(&disk);
        let root = fs.root().unwrap();
        fs.create_file(&root, Path::from_str("a")).unwrap();
        assert!(fs.create_file(&root, Path::from_str("a")).is_err());
    }

    #[test]
    fn trailing_slash_rejects_a_non_directory_leaf() {
        let disk = MemDisk::new(1024);
        let fs = FileSystem::format(&disk);
        let root = fs.root().unwrap();
        fs.create_file(&root, Path::from_str("a")).unwrap();

        assert_eq!(
            fs.resolve(&root, Path::from_str("a/")),
            Err(FsError::NotADirectory)
        );
        assert_eq!(
            fs.create_file(&root, Path::from_str("b/")),
            Err(FsError::NotADirectory)
        );
    }

    #[test]
    fn trailing_slash_accepts_a_directory_leaf() {
        let disk = MemDisk::new(1024);
        let fs = FileSystem::format(&disk);
        let root = fs.root().unwrap();
        fs.create_dir(&root, Path::from_str("sub")).unwrap();

        assert!(fs.resolve(&root, Path::from_str("sub/")).is_ok());
    }

    #[test]
    fn sync_persists_through_remount() {
        let disk = MemDisk::new(1024);
        {
            let fs = FileSystem::format(&disk);
            let root = fs.root().unwrap();
            let file = fs.create_file(&root, Path::from_str("a")).unwrap();
            fs.inodes.write_at(&file, b"persisted", 0).unwrap();
            fs.sync();
        }
        let fs = FileSystem::mount(&disk);
        let root = fs.root().unwrap();
        let file = fs.resolve(&root, Path::from_str("a")).unwrap();
        let mut buf = [0u8; 9];
        assert_eq!(fs.inodes.read_at(&file, &mut buf, 0), 9);
        assert_eq!(&buf, b"persisted");
    }
}
