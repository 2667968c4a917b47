//! `exit`, `wait`, and `exec` (§4.8/§4.9).
//!
//! `exec` loads the named executable's segments as lazily-loaded pages
//! (`process::loader`), builds the one-page argument stack
//! (`process::stack`), and registers the new process as a child of the
//! caller. Actually scheduling the child onto a CPU is the scheduler's
//! job; this only produces the `Process` record ready to run.
//!
//! The executable inode is held open on `child.executable` and write-
//! denied for the process's lifetime, released again on `exit`, so a
//! second `exec` can't overwrite a program while it's running.

extern crate alloc;

use alloc::sync::Arc;

use crate::fs::{FileSystem, Path};
use crate::param::PAGE_SIZE;
use crate::process::{loader, stack, Pid, Process};
use crate::sync::Blocker;
use crate::vm::frame::{FrameTable, Owner};
use crate::vm::mmu::PageTable;
use crate::vm::page::{upage_of, Location, Origin};
use crate::vm::swap::SwapTable;

/// The virtual address one past the top of user address space; the
/// initial stack page sits just below it.
pub const USER_STACK_TOP: usize = 0x8048_0000;

pub fn exit(process: &Process, code: i32, blocker: &dyn Blocker) {
    process.exit(code, blocker);
}

pub fn wait(process: &Process, child_pid: Pid, blocker: &dyn Blocker) -> i32 {
    process.wait(child_pid, blocker).unwrap_or(-1)
}

/// Loads `argv[0]` as an executable and returns the new child process, or
/// `None` on any failure (bad path, not an ELF image, out of frames) —
/// the dispatcher maps that to the -1 `exec` returns to the caller.
pub fn exec(
    parent: &Arc<Process>,
    fs: &FileSystem<'_>,
    frames: &FrameTable,
    swap: &SwapTable<'_>,
    child_pid: Pid,
    child_page_table: Arc<dyn PageTable>,
    argv: &[&[u8]],
) -> Option<Arc<Process>> {
    let program = argv.first()?;
    let path = Path::from_bytes(program);
    let exe = fs.resolve(&parent.cwd.lock(), path).ok()?;

    let child = Process::new(child_pid, Arc::clone(&parent.cwd.lock()), Arc::clone(&child_page_table));
    exe.deny_write();
    let _image = loader::load(&fs.inodes, &exe, &child.spt).ok()?;
    *child.executable.lock() = Some(exe);

    let stack_base = USER_STACK_TOP - PAGE_SIZE;
    let (page_bytes, _esp_offset) = stack::build_user_stack(argv, stack_base);
    let stack_upage = upage_of(stack_base);

    child.spt.insert(stack_upage, Origin::Anonymous, true);
    let (frame, evicted) = frames.allocate();
    if let Some(evicted) = evicted {
        crate::vm::fault::evict(evicted, swap, &fs.inodes);
    }
    frames.with_data(frame, |data| *data = page_bytes);
    frames.set_owner(
        frame,
        Owner {
            page_table: Arc::clone(&child_page_table),
            spt: Arc::clone(&child.spt),
            upage: stack_upage,
        },
    );
    child_page_table.map(stack_upage, frame, true);
    child.spt.set_location(stack_upage, Location::Resident(frame));

    parent.register_child(&child);
    Some(child)
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::block::MemDisk;
    use crate::fs::cache::BufferCache;
    use crate::fs::freemap::FreeMap;
    use crate::param::ROOT_DIR_SECTOR;
    use crate::process::loader::{ElfHeader, ProgFlags, ProgramHeader, ELF_MAGIC, ELF_PROG_LOAD};
    use crate::sync::SpinBlocker;
    use crate::vm::mmu::MockPageTable;
    use zerocopy::AsBytes;

    fn fresh_fs(disk: &MemDisk) -> FileSystem<'_> {
        FileSystem::format(disk)
    }

    fn write_minimal_executable(fs: &FileSystem<'_>, root: &Arc<crate::fs::Inode>, name: &str) {
        let file = fs.create_file(root, Path::from_str(name)).unwrap();

        let mut header = ElfHeader::default();
        header.magic = ELF_MAGIC;
        header.entry = 0x1000;
        header.phoff = core::mem::size_of::<ElfHeader>() as u32;
        header.phentsize = core::mem::size_of::<ProgramHeader>() as u32;
        header.phnum = 1;
        fs.inodes.write_at(&file, header.as_bytes(), 0).unwrap();

        let mut ph = ProgramHeader::default();
        ph.typ = ELF_PROG_LOAD;
        ph.off = 0x1000;
        ph.vaddr = 0x1000;
        ph.filesz = 4;
        ph.memsz = 4;
        ph.flags = ProgFlags::READ.bits() | ProgFlags::EXEC.bits();
        fs.inodes.write_at(&file, ph.as_bytes(), header.phoff).unwrap();
        fs.inodes.close(file);
    }

    #[test]
    fn exec_installs_segments_and_a_stack_for_the_child() {
        let disk = MemDisk::new(4096);
        let fs = fresh_fs(&disk);
        let root = fs.root().unwrap();
        write_minimal_executable(&fs, &root, "prog");

        let parent = Process::new(1, Arc::clone(&root), Arc::new(MockPageTable::new()));
        let frames = FrameTable::new(4);
        let swap = SwapTable::new(&disk);
        let child_pt: Arc<dyn PageTable> = Arc::new(MockPageTable::new());

        let child = exec(&parent, &fs, &frames, &swap, 2, child_pt, &[b"prog"]).unwrap();
        assert!(child.spt.contains(0x1000 / PAGE_SIZE));
        assert!(child.spt.contains(upage_of(USER_STACK_TOP - PAGE_SIZE)));

        child.exit(0, &SpinBlocker);
        assert_eq!(parent.wait(2, &SpinBlocker), Some(0));
    }

    #[test]
    fn exec_denies_writes_to_the_running_executable_until_exit() {
        let disk = MemDisk::new(4096);
        let fs = fresh_fs(&disk);
        let root = fs.root().unwrap();
        write_minimal_executable(&fs, &root, "prog");

        let parent = Process::new(1, Arc::clone(&root), Arc::new(MockPageTable::new()));
        let frames = FrameTable::new(4);
        let swap = SwapTable::new(&disk);
        let child_pt: Arc<dyn PageTable> = Arc::new(MockPageTable::new());

        let child = exec(&parent, &fs, &frames, &swap, 2, child_pt, &[b"prog"]).unwrap();
        let exe = fs.resolve(&root, Path::from_str("prog")).unwrap();
        assert!(exe.is_write_denied());
        assert!(fs.inodes.write_at(&exe, b"x", 0).is_err());

        child.exit(0, &SpinBlocker);
        assert!(!exe.is_write_denied());
        assert!(fs.inodes.write_at(&exe, b"x", 0).is_ok());
    }

    #[test]
    fn exec_of_a_missing_program_fails() {
        let disk = MemDisk::new(4096);
        let fs = fresh_fs(&disk);
        let root = fs.root().unwrap();
        let parent = Process::new(1, root, Arc::new(MockPageTable::new()));
        let frames = FrameTable::new(4);
        let swap = SwapTable::new(&disk);
        let child_pt: Arc<dyn PageTable> = Arc::new(MockPageTable::new());

        assert!(exec(&parent, &fs, &frames, &swap, 2, child_pt, &[b"nope"]).is_none());
    }
}
