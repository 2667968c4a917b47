//! `mmap` and `munmap` (§4.7/§4.8).

extern crate alloc;

use crate::fs::inode::InodeTable;
use crate::process::Process;
use crate::vm::frame::FrameTable;
use crate::vm::mmu::PageTable;
use crate::vm::mmap::MapId;
use crate::vm::page::upage_of;

/// Maps the file open at descriptor `fd` starting at `addr`, returning
/// the mapping id, or -1 if the descriptor isn't a file, `addr` isn't
/// page-aligned, or the mapping would overlap an existing one.
pub fn mmap(process: &Process, fd: i32, addr: usize) -> i32 {
    if addr == 0 || addr % crate::param::PAGE_SIZE != 0 {
        return -1;
    }
    let inode = match process.fds.lock().inode(fd) {
        Some(inode) => alloc::sync::Arc::clone(inode),
        None => return -1,
    };
    match process.mmaps.install(&process.spt, inode, upage_of(addr)) {
        Ok(id) => id as i32,
        Err(_) => -1,
    }
}

pub fn munmap(process: &Process, inodes: &InodeTable<'_>, id: i32, frames: &FrameTable, page_table: &dyn PageTable) -> bool {
    if id < 0 {
        return false;
    }
    process
        .mmaps
        .unmap(&process.spt, inodes, id as MapId, frames, page_table)
        .is_ok()
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::block::MemDisk;
    use crate::fs::cache::BufferCache;
    use crate::fs::freemap::FreeMap;
    use crate::param::{PAGE_SIZE, ROOT_DIR_SECTOR};
    use crate::vm::mmu::MockPageTable;

    fn inodes(disk: &MemDisk) -> InodeTable<'_> {
        let cache = BufferCache::new(disk);
        let free_map = FreeMap::format(disk, &cache, disk.sector_count(), ROOT_DIR_SECTOR + 1);
        InodeTable::new(disk, cache, free_map)
    }

    #[test]
    fn mmap_rejects_unaligned_addr() {
        let disk = MemDisk::new(64);
        let t = inodes(&disk);
        let file = t.create(false, 0).unwrap();
        t.write_at(&file, &[1u8; PAGE_SIZE], 0).unwrap();

        let process = Process::new(1, Arc::clone(&file), Arc::new(MockPageTable::new()));
        let fd = process.fds.lock().alloc(file).unwrap();
        assert_eq!(mmap(&process, fd, 0x1001), -1);
    }

    #[test]
    fn mmap_then_munmap_round_trips() {
        let disk = MemDisk::new(64);
        let t = inodes(&disk);
        let file = t.create(false, 0).unwrap();
        t.write_at(&file, &[1u8; PAGE_SIZE], 0).unwrap();

        let process = Process::new(1, Arc::clone(&file), Arc::new(MockPageTable::new()));
        let fd = process.fds.lock().alloc(Arc::clone(&file)).unwrap();

        let id = mmap(&process, fd, 0x4000_0000);
        assert!(id >= 0);
        assert!(process.spt.contains(upage_of(0x4000_0000)));

        let frames = FrameTable::new(4);
        let pt = MockPageTable::new();
        assert!(munmap(&process, &t, id, &frames, &pt));
        assert!(!process.spt.contains(upage_of(0x4000_0000)));
    }

    #[test]
    fn munmap_of_unknown_id_fails() {
        let disk = MemDisk::new(64);
        let t = inodes(&disk);
        let file = t.create(true, 0).unwrap();
        let process = Process::new(1, file, Arc::new(MockPageTable::new()));
        let frames = FrameTable::new(4);
        let pt = MockPageTable::new();
        assert!(!munmap(&process, &t, 7, &frames, &pt));
    }
}
