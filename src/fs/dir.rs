//! Directories: inodes whose content is a flat sequence of
//! (name, sector) entries. `.` and `..` are synthesized from the
//! directory's own sector and its `parent` field rather than stored as
//! real entries, matching the parent-pointer design spec.md describes
//! for the original filesystem (`filesys/directory.c` itself isn't among
//! the files retrieved into this pack).

extern crate alloc;

use alloc::sync::Arc;
use core::mem;

use static_assertions::const_assert_eq;
use zerocopy::{AsBytes, FromBytes};

use crate::fs::inode::{Inode, InodeTable};
use crate::fs::path::{FileName, Path};
use crate::fs::FsError;
use crate::param::NAME_MAX;

/// `name` is padded to a 4-byte-aligned width so the struct has no
/// compiler-inserted padding, which `AsBytes`/`FromBytes` would reject.
const NAME_FIELD_WIDTH: usize = 16;
static_assertions::const_assert!(NAME_MAX <= NAME_FIELD_WIDTH);

#[repr(C)]
#[derive(Clone, Copy, AsBytes, FromBytes)]
struct DirEntry {
    sector: u32,
    in_use: u32,
    name: [u8; NAME_FIELD_WIDTH],
}

const_assert_eq!(mem::size_of::<DirEntry>(), 24);

impl DirEntry {
    fn empty() -> Self {
        Self {
            sector: 0,
            in_use: 0,
            name: [0; NAME_FIELD_WIDTH],
        }
    }

    fn name(&self) -> &[u8] {
        let len = self
            .name
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(NAME_MAX);
        &self.name[..len]
    }

    fn set_name(&mut self, name: &FileName) {
        self.name = [0; NAME_FIELD_WIDTH];
        let bytes = name.as_bytes();
        self.name[..bytes.len()].copy_from_slice(bytes);
    }
}

/// Looks up `name` in the directory `dir`. Returns the entry's sector.
pub fn lookup(table: &InodeTable<'_>, dir: &Inode, name: &FileName) -> Option<u32> {
    if name.is_dot() {
        return Some(dir.sector());
    }
    if name.is_dotdot() {
        return Some(dir.parent());
    }
    each_entry(table, dir, |entry, _| {
        if entry.in_use != 0 && entry.name() == name.as_bytes() {
            Some(entry.sector)
        } else {
            None
        }
    })
}

/// Adds `name -> sector` to `dir`. Fails if the name already exists.
pub fn add(table: &InodeTable<'_>, dir: &Inode, name: &FileName, sector: u32) -> Result<(), FsError> {
    if lookup(table, dir, name).is_some() {
        return Err(FsError::AlreadyExists);
    }

    let mut entry = DirEntry::empty();
    entry.in_use = 1;
    entry.sector = sector;
    entry.set_name(name);

    let slot = each_entry(table, dir, |e, off| if e.in_use == 0 { Some(off) } else { None })
        .unwrap_or(dir.length());

    table.write_at(dir, entry.as_bytes(), slot).map(|_| ())
}

/// Clears the entry named `name` from `dir`.
pub fn remove(table: &InodeTable<'_>, dir: &Inode, name: &FileName) -> Result<(), FsError> {
    let off = each_entry(table, dir, |e, off| {
        if e.in_use != 0 && e.name() == name.as_bytes() {
            Some(off)
        } else {
            None
        }
    })
    .ok_or(FsError::NotFound)?;

    let cleared = DirEntry::empty();
    table.write_at(dir, cleared.as_bytes(), off).map(|_| ())
}

/// Returns `true` if `dir` has no entries besides the synthesized
/// `.`/`..`.
pub fn is_empty(table: &InodeTable<'_>, dir: &Inode) -> bool {
    each_entry(table, dir, |e, _| if e.in_use != 0 { Some(()) } else { None }).is_none()
}

/// Lists every live entry as `(name bytes, sector)`, for a `readdir`
/// syscall to hand back one entry at a time.
pub fn entries(table: &InodeTable<'_>, dir: &Inode) -> alloc::vec::Vec<([u8; NAME_MAX], u32)> {
    let mut out = alloc::vec::Vec::new();
    let size = dir.length();
    let entry_size = mem::size_of::<DirEntry>() as u32;
    let mut off = 0;
    while off < size {
        let mut raw = [0u8; mem::size_of::<DirEntry>()];
        if table.read_at(dir, &mut raw, off) != raw.len() {
            break;
        }
        if let Some(entry) = DirEntry::read_from(&raw[..]) {
            if entry.in_use != 0 {
                let mut name = [0u8; NAME_MAX];
                let len = entry.name().len();
                name[..len].copy_from_slice(entry.name());
                out.push((name, entry.sector));
            }
        }
        off += entry_size;
    }
    out
}

fn each_entry<T>(
    table: &InodeTable<'_>,
    dir: &Inode,
    mut f: impl FnMut(&DirEntry, u32) -> Option<T>,
) -> Option<T> {
    let size = dir.length();
    let entry_size = mem::size_of::<DirEntry>() as u32;
    let mut off = 0;
    while off < size {
        let mut raw = [0u8; mem::size_of::<DirEntry>()];
        if table.read_at(dir, &mut raw, off) != raw.len() {
            break;
        }
        if let Some(entry) = DirEntry::read_from(&raw[..]) {
            if let Some(result) = f(&entry, off) {
                return Some(result);
            }
        }
        off += entry_size;
    }
    None
}

/// Resolves `path` to an open inode, starting from `cwd` for relative
/// paths or the root sector for absolute ones. A trailing slash on the
/// last component (`force_dir`) rejects a leaf that isn't a directory,
/// the way `a/b/` only ever resolves to a directory named `b`.
pub fn resolve(
    table: &InodeTable<'_>,
    root: u32,
    cwd: &Arc<Inode>,
    path: &Path,
) -> Result<Arc<Inode>, FsError> {
    let (mut current, mut rest) = if path.is_absolute() {
        (table.open(root)?, path)
    } else {
        (Arc::clone(cwd), path)
    };

    let mut force_dir = false;
    while let Some((next_rest, name, leaf_force_dir)) = rest.skipelem() {
        rest = next_rest;
        force_dir = leaf_force_dir;
        if !current.is_dir() {
            return Err(FsError::NotADirectory);
        }
        let sector = lookup(table, &current, name).ok_or(FsError::NotFound)?;
        current = table.open(sector)?;
    }
    if force_dir && !current.is_dir() {
        return Err(FsError::NotADirectory);
    }
    Ok(current)
}

/// Resolves all but the last component of `path`, returning the parent
/// directory, the final component's name, and whether that final
/// component carried a trailing slash (`force_dir`) — used before
/// `create`, `remove`, and `rename` so the caller can link/unlink in the
/// parent and reject forcing a non-directory onto a trailing `/`.
pub fn resolve_parent<'p>(
    table: &InodeTable<'_>,
    root: u32,
    cwd: &Arc<Inode>,
    path: &'p Path,
) -> Result<(Arc<Inode>, &'p FileName, bool), FsError> {
    let (mut current, mut rest) = if path.is_absolute() {
        (table.open(root)?, path)
    } else {
        (Arc::clone(cwd), path)
    };

    loop {
        let (next_rest, name, force_dir) = rest.skipelem().ok_or(FsError::InvalidArgument)?;
        if next_rest.is_empty_string() {
            return Ok((current, name, force_dir));
        }
        if !current.is_dir() {
            return Err(FsError::NotADirectory);
        }
        let sector = lookup(table, &current, name).ok_or(FsError::NotFound)?;
        current = table.open(sector)?;
        rest = next_rest;
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::block::MemDisk;
    use crate::fs::cache::BufferCache;
    use crate::fs::freemap::FreeMap;
    use crate::param::ROOT_DIR_SECTOR;

    fn table(disk: &MemDisk) -> InodeTable<'_> {
        let cache = BufferCache::new(disk);
        let free_map = FreeMap::format(disk, &cache, disk.sector_count(), ROOT_DIR_SECTOR + 1);
        InodeTable::new(disk, cache, free_map)
    }

    #[test]
    fn add_then_lookup_round_trips() {
        let disk = MemDisk::new(256);
        let t = table(&disk);
        let root = t.create(true, ROOT_DIR_SECTOR).unwrap();
        let file = t.create(false, root.sector()).unwrap();
        add(&t, &root, FileName::from_bytes(b"hello"), file.sector()).unwrap();

        assert_eq!(lookup(&t, &root, FileName::from_bytes(b"hello")), Some(file.sector()));
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let disk = MemDisk::new(256);
        let t = table(&disk);
        let root = t.create(true, ROOT_DIR_SECTOR).unwrap();
        let a = t.create(false, root.sector()).unwrap();
        let b = t.create(false, root.sector()).unwrap();
        add(&t, &root, FileName::from_bytes(b"x"), a.sector()).unwrap();
        assert!(add(&t, &root, FileName::from_bytes(b"x"), b.sector()).is_err());
    }

    #[test]
    fn remove_clears_entry_and_frees_slot_for_reuse() {
        let disk = MemDisk::new(256);
        let t = table(&disk);
        let root = t.create(true, ROOT_DIR_SECTOR).unwrap();
        let a = t.create(false, root.sector()).unwrap();
        add(&t, &root, FileName::from_bytes(b"a"), a.sector()).unwrap();
        remove(&t, &root, FileName::from_bytes(b"a")).unwrap();
        assert_eq!(lookup(&t, &root, FileName::from_bytes(b"a")), None);

        let b = t.create(false, root.sector()).unwrap();
        add(&t, &root, FileName::from_bytes(b"b"), b.sector()).unwrap();
        assert!(is_empty(&t, &root) == false);
    }

    #[test]
    fn dot_and_dotdot_resolve_without_real_entries() {
        let disk = MemDisk::new(256);
        let t = table(&disk);
        let root = t.create(true, ROOT_DIR_SECTOR).unwrap();
        let sub = t.create(true, root.sector()).unwrap();
        add(&t, &root, FileName::from_bytes(b"sub"), sub.sector()).unwrap();

        assert_eq!(lookup(&t, &sub, FileName::from_bytes(b".")), Some(sub.sector()));
        assert_eq!(lookup(&t, &sub, FileName::from_bytes(b"..")), Some(root.sector()));
    }

    #[test]
    fn resolve_walks_nested_path() {
        let disk = MemDisk::new(256);
        let t = table(&disk);
        let root = t.create(true, ROOT_DIR_SECTOR).unwrap();
        let sub = t.create(true, root.sector()).unwrap();
        add(&t, &root, FileName::from_bytes(b"sub"), sub.sector()).unwrap();
        let file = t.create(false, sub.sector()).unwrap();
        add(&t, &sub, FileName::from_bytes(b"f"), file.sector()).unwrap();

        let resolved = resolve(&t, root.sector(), &root, Path::from_str("sub/f")).unwrap();
        assert_eq!(resolved.sector(), file.sector());
    }
}
