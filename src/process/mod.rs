//! Per-process state: the file descriptor table, the memory subsystem
//! records a process owns privately (§4.5–§4.7), and the parent/children
//! bookkeeping `wait` and `exit` consult (§4.9).
//!
//! The scheduler that actually runs these processes is external, same as
//! everywhere else in this crate — a [`Process`] only records what the
//! syscall layer and the fault handler need, not how it gets switched in.

extern crate alloc;

use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use array_macro::array;

use crate::fs::inode::Inode;
use crate::param::NOFILE;
use crate::sync::{Blocker, Spinlock, WaitChannel};
use crate::vm::mmu::PageTable;
use crate::vm::{MmapTable, SupplementalPageTable};

pub mod loader;
pub mod stack;

pub type Pid = i32;

/// One open file: the inode it refers to and this descriptor's own
/// cursor, since two descriptors on the same inode seek independently.
pub struct OpenFile {
    pub inode: Arc<Inode>,
    pub position: Spinlock<u32>,
}

impl OpenFile {
    fn new(inode: Arc<Inode>) -> Self {
        Self {
            inode,
            position: Spinlock::new(0),
        }
    }
}

/// What a descriptor slot refers to. Descriptors 0 and 1 are reserved for
/// the keyboard and console per §4.8 and never hold a file.
enum Descriptor {
    StdIn,
    StdOut,
    File(OpenFile),
}

/// Fixed-size, reserved-slots-excluded descriptor table. Bounds and
/// reservation checking live here so the syscall dispatcher only has to
/// reject `None`/out-of-range once, uniformly.
pub struct FdTable {
    slots: [Option<Descriptor>; NOFILE],
}

impl FdTable {
    fn new() -> Self {
        Self {
            slots: array![i => match i {
                0 => Some(Descriptor::StdIn),
                1 => Some(Descriptor::StdOut),
                _ => None,
            }; NOFILE],
        }
    }

    /// Installs `inode` in the first free descriptor at or after 2,
    /// returning its number, or `None` if the table is full.
    pub fn alloc(&mut self, inode: Arc<Inode>) -> Option<i32> {
        let slot = self.slots[2..].iter().position(Option::is_none)? + 2;
        self.slots[slot] = Some(Descriptor::File(OpenFile::new(inode)));
        Some(slot as i32)
    }

    fn file(&self, fd: i32) -> Option<&OpenFile> {
        match self.slots.get(usize::try_from(fd).ok()?)? {
            Some(Descriptor::File(f)) => Some(f),
            _ => None,
        }
    }

    pub fn inode(&self, fd: i32) -> Option<&Arc<Inode>> {
        self.file(fd).map(|f| &f.inode)
    }

    pub fn position(&self, fd: i32) -> Option<u32> {
        self.file(fd).map(|f| *f.position.lock())
    }

    pub fn set_position(&self, fd: i32, pos: u32) -> Option<()> {
        *self.file(fd)?.position.lock() = pos;
        Some(())
    }

    pub fn is_stdin(&self, fd: i32) -> bool {
        matches!(self.slots.get(usize::try_from(fd).ok().unwrap_or(usize::MAX)), Some(Some(Descriptor::StdIn)))
    }

    pub fn is_stdout(&self, fd: i32) -> bool {
        matches!(self.slots.get(usize::try_from(fd).ok().unwrap_or(usize::MAX)), Some(Some(Descriptor::StdOut)))
    }

    /// Removes and returns the inode at `fd`, leaving the slot free.
    /// Reserved descriptors and out-of-range numbers are rejected, same
    /// as in `alloc`.
    pub fn close(&mut self, fd: i32) -> Option<Arc<Inode>> {
        let index = usize::try_from(fd).ok()?;
        if index < 2 || index >= NOFILE {
            return None;
        }
        match self.slots[index].take()? {
            Descriptor::File(f) => Some(f.inode),
            other => {
                // Wasn't a file descriptor; put it back untouched.
                self.slots[index] = Some(other);
                None
            }
        }
    }
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new()
    }
}

/// The record a parent keeps for one still-unreaped child: its pid, its
/// exit code once it has one, and the channel `wait` parks on.
struct ChildEntry {
    pid: Pid,
    exit_code: Spinlock<Option<i32>>,
    wait_channel: WaitChannel,
}

impl ChildEntry {
    fn new(pid: Pid) -> Self {
        Self {
            pid,
            exit_code: Spinlock::new(None),
            wait_channel: WaitChannel::new(),
        }
    }
}

/// Per-process state visible to the syscall layer, the fault handler, and
/// process management (`exec`/`exit`/`wait`).
///
/// `parent` is a weak back-pointer: once the parent process is dropped,
/// `parent.upgrade()` simply returns `None` from then on, which is how an
/// orphaned child "drops the back-pointer" without any process needing to
/// reach in and clear it. `report` is the child's own shared [`ChildEntry`]
/// inside its parent's `children` list — present only while the parent is
/// still alive to read an exit code out of it.
pub struct Process {
    pub pid: Pid,
    parent: Spinlock<Weak<Process>>,
    report: Spinlock<Option<Arc<ChildEntry>>>,
    children: Spinlock<Vec<Arc<ChildEntry>>>,
    exit_code: Spinlock<Option<i32>>,

    pub fds: Spinlock<FdTable>,
    pub cwd: Spinlock<Arc<Inode>>,
    /// The inode `exec` loaded this process's image from, held open and
    /// write-denied for the process's lifetime (`deny_write`/§4.9), the
    /// same protection `load_segment` gives a running executable.
    pub executable: Spinlock<Option<Arc<Inode>>>,
    pub spt: Arc<SupplementalPageTable>,
    pub mmaps: MmapTable,
    pub page_table: Arc<dyn PageTable>,
}

impl Process {
    pub fn new(pid: Pid, cwd: Arc<Inode>, page_table: Arc<dyn PageTable>) -> Arc<Self> {
        cwd.inc_pwd_count();
        Arc::new(Self {
            pid,
            parent: Spinlock::new(Weak::new()),
            report: Spinlock::new(None),
            children: Spinlock::new(Vec::new()),
            exit_code: Spinlock::new(None),
            fds: Spinlock::new(FdTable::new()),
            cwd: Spinlock::new(cwd),
            executable: Spinlock::new(None),
            spt: Arc::new(SupplementalPageTable::new()),
            mmaps: MmapTable::new(),
            page_table,
        })
    }

    /// Records `child` as one of `self`'s children, wiring up the shared
    /// entry both sides use: `self` reads the exit code out of it in
    /// `wait`, `child` writes into it in `exit`.
    pub fn register_child(self: &Arc<Self>, child: &Arc<Process>) {
        let entry = Arc::new(ChildEntry::new(child.pid));
        self.children.lock().push(Arc::clone(&entry));
        *child.parent.lock() = Arc::downgrade(self);
        *child.report.lock() = Some(entry);
    }

    pub fn ppid(&self) -> Option<Pid> {
        self.parent.lock().upgrade().map(|p| p.pid)
    }

    /// Records `code` as this process's exit status and, if its parent is
    /// still alive and tracking it, publishes the code into the shared
    /// entry and wakes anyone waiting on it.
    pub fn exit(&self, code: i32, blocker: &dyn Blocker) {
        log::info!("process {} exited with code {}", self.pid, code);
        self.cwd.lock().dec_pwd_count();
        if let Some(exe) = self.executable.lock().take() {
            exe.allow_write();
        }
        *self.exit_code.lock() = Some(code);
        if let Some(entry) = self.report.lock().take() {
            *entry.exit_code.lock() = Some(code);
            entry.wait_channel.wake(blocker);
        }
    }

    pub fn exit_code(&self) -> Option<i32> {
        *self.exit_code.lock()
    }

    /// Blocks until `child_pid` has exited, then reaps and returns its
    /// code. Returns `None` if `child_pid` never was a child, or has
    /// already been reaped — the syscall layer maps both to `-1`.
    pub fn wait(&self, child_pid: Pid, blocker: &dyn Blocker) -> Option<i32> {
        let entry = {
            let children = self.children.lock();
            children.iter().find(|c| c.pid == child_pid).map(Arc::clone)
        }?;

        loop {
            if let Some(code) = *entry.exit_code.lock() {
                self.children.lock().retain(|c| c.pid != child_pid);
                return Some(code);
            }
            entry.wait_channel.wait(blocker);
        }
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::block::MemDisk;
    use crate::fs::cache::BufferCache;
    use crate::fs::freemap::FreeMap;
    use crate::fs::inode::InodeTable;
    use crate::param::ROOT_DIR_SECTOR;
    use crate::sync::SpinBlocker;
    use crate::vm::mmu::MockPageTable;

    fn root_inode(disk: &MemDisk) -> (InodeTable<'_>, Arc<Inode>) {
        let cache = BufferCache::new(disk);
        let free_map = FreeMap::format(disk, &cache, disk.sector_count(), ROOT_DIR_SECTOR);
        let t = InodeTable::new(disk, cache, free_map);
        let root = t.create(true, ROOT_DIR_SECTOR).unwrap();
        assert_eq!(root.sector(), ROOT_DIR_SECTOR);
        (t, root)
    }

    #[test]
    fn alloc_and_close_fd_round_trips() {
        let disk = MemDisk::new(64);
        let (t, root) = root_inode(&disk);
        let file = t.create(false, root.sector()).unwrap();

        let proc = Process::new(1, Arc::clone(&root), Arc::new(MockPageTable::new()));
        let fd = proc.fds.lock().alloc(Arc::clone(&file)).unwrap();
        assert!(fd >= 2);
        assert!(proc.fds.lock().inode(fd).is_some());
        assert!(proc.fds.lock().close(fd).is_some());
        assert!(proc.fds.lock().inode(fd).is_none());
    }

    #[test]
    fn reserved_descriptors_are_never_allocated_or_closed() {
        let disk = MemDisk::new(64);
        let (_t, root) = root_inode(&disk);
        let proc = Process::new(1, root, Arc::new(MockPageTable::new()));
        assert!(proc.fds.lock().is_stdin(0));
        assert!(proc.fds.lock().is_stdout(1));
        assert!(proc.fds.lock().close(0).is_none());
        assert!(proc.fds.lock().close(1).is_none());
    }

    #[test]
    fn wait_reaps_an_exited_childs_code() {
        let disk = MemDisk::new(64);
        let (_t, root) = root_inode(&disk);
        let parent = Process::new(1, Arc::clone(&root), Arc::new(MockPageTable::new()));
        let child = Process::new(2, root, Arc::new(MockPageTable::new()));
        parent.register_child(&child);

        child.exit(7, &SpinBlocker);
        assert_eq!(parent.wait(2, &SpinBlocker), Some(7));
        // Already reaped: waiting again finds no such child.
        assert_eq!(parent.wait(2, &SpinBlocker), None);
    }

    #[test]
    fn waiting_on_a_non_child_returns_none() {
        let disk = MemDisk::new(64);
        let (_t, root) = root_inode(&disk);
        let parent = Process::new(1, root, Arc::new(MockPageTable::new()));
        assert_eq!(parent.wait(99, &SpinBlocker), None);
    }

    #[test]
    fn orphaned_child_loses_its_parent_pointer() {
        let disk = MemDisk::new(64);
        let (_t, root) = root_inode(&disk);
        let child = {
            let parent = Process::new(1, Arc::clone(&root), Arc::new(MockPageTable::new()));
            let child = Process::new(2, root, Arc::new(MockPageTable::new()));
            parent.register_child(&child);
            assert_eq!(child.ppid(), Some(1));
            child
        };
        assert_eq!(child.ppid(), None);
    }
}
