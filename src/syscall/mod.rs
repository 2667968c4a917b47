//! The system call boundary (§4.8): pointer validation, user/kernel
//! buffer copying, and dispatch to the filesystem, memory, and process
//! routines that do the actual work.
//!
//! Argument marshaling out of a trap frame and the console/keyboard
//! devices themselves are external collaborators, the same as the
//! scheduler and the hardware page table — this module only needs a
//! [`Console`] contract for descriptors 0 and 1, and pointer/range
//! validation against the calling process's [`SupplementalPageTable`].

extern crate alloc;

pub mod file_calls;
pub mod mmap_calls;
pub mod process_calls;

use crate::param::PAGE_SIZE;
use crate::vm::fault::is_stack_growth;
use crate::vm::frame::FrameTable;
use crate::vm::page::{page_base, upage_of, Location, SupplementalPageTable};

/// Returned to a process whose call used an invalid pointer or an
/// unrecognized call number; §4.8 has the caller exit with this code.
pub const INVALID_ARGS_EXIT_CODE: i32 = -1;

/// The saved user stack pointer at syscall entry, needed to tell a
/// legitimate stack-growing buffer access from a wild one — the same
/// distinction the page fault handler makes.
#[derive(Clone, Copy)]
pub struct StackContext {
    pub esp: usize,
    pub stack_top: usize,
}

/// The console device a process's descriptors 0 (keyboard) and 1
/// (display) resolve to. Kept as a trait, not a concrete UART/terminal
/// implementation, for the same reason the scheduler is behind
/// [`crate::sync::Blocker`].
pub trait Console: Sync {
    /// Reads up to `buf.len()` bytes, returning how many were read.
    fn read(&self, buf: &mut [u8]) -> usize;
    fn write(&self, buf: &[u8]);
}

/// A [`Console`] for hosted tests: reads nothing, records every write.
pub struct RecordingConsole {
    written: crate::sync::Spinlock<alloc::vec::Vec<u8>>,
}

impl RecordingConsole {
    pub fn new() -> Self {
        Self {
            written: crate::sync::Spinlock::new(alloc::vec::Vec::new()),
        }
    }

    pub fn written(&self) -> alloc::vec::Vec<u8> {
        self.written.lock().clone()
    }
}

impl Default for RecordingConsole {
    fn default() -> Self {
        Self::new()
    }
}

impl Console for RecordingConsole {
    fn read(&self, _buf: &mut [u8]) -> usize {
        0
    }
    fn write(&self, buf: &[u8]) {
        self.written.lock().extend_from_slice(buf);
    }
}

/// Requires every page touched by `[vaddr, vaddr + size)` to be
/// resolvable through `spt`, growing the stack through `ctx` first when a
/// missing page looks like a legitimate stack access — matching the
/// "validation may trigger stack growth" clause in §4.8.
pub fn is_valid(spt: &SupplementalPageTable, vaddr: usize, size: usize, ctx: StackContext) -> bool {
    if size == 0 {
        return true;
    }
    let first = upage_of(vaddr);
    let last = upage_of(vaddr + size - 1);
    for upage in first..=last {
        if !spt.contains(upage) {
            let addr = page_base(upage);
            if is_stack_growth(addr, ctx.esp, ctx.stack_top) {
                spt.insert(upage, crate::vm::page::Origin::Anonymous, true);
            } else {
                return false;
            }
        }
    }
    true
}

/// As [`is_valid`], but every page must also be writable.
pub fn is_writable(spt: &SupplementalPageTable, vaddr: usize, size: usize, ctx: StackContext) -> bool {
    if !is_valid(spt, vaddr, size, ctx) {
        return false;
    }
    if size == 0 {
        return true;
    }
    let first = upage_of(vaddr);
    let last = upage_of(vaddr + size - 1);
    (first..=last).all(|upage| spt.get(upage).map(|e| e.writable).unwrap_or(false))
}

/// Copies `out.len()` bytes from user address `vaddr` into kernel memory,
/// walking page boundaries the way the teacher's `copy_in_bytes` does.
/// Every touched page must already be resident; callers validate (and
/// fault in, if needed) with [`is_valid`] first.
pub fn copy_in(spt: &SupplementalPageTable, frames: &FrameTable, vaddr: usize, out: &mut [u8]) -> bool {
    let mut done = 0;
    while done < out.len() {
        let addr = vaddr + done;
        let upage = upage_of(addr);
        let frame = match spt.get(upage).map(|e| e.location) {
            Some(Location::Resident(f)) => f,
            _ => return false,
        };
        let page_offset = addr % PAGE_SIZE;
        let chunk = (PAGE_SIZE - page_offset).min(out.len() - done);
        frames.with_data(frame, |data| {
            out[done..done + chunk].copy_from_slice(&data[page_offset..page_offset + chunk]);
        });
        done += chunk;
    }
    true
}

/// Copies `src` from kernel memory out to user address `vaddr`.
pub fn copy_out(spt: &SupplementalPageTable, frames: &FrameTable, vaddr: usize, src: &[u8]) -> bool {
    let mut done = 0;
    while done < src.len() {
        let addr = vaddr + done;
        let upage = upage_of(addr);
        let frame = match spt.get(upage).map(|e| e.location) {
            Some(Location::Resident(f)) => f,
            _ => return false,
        };
        let page_offset = addr % PAGE_SIZE;
        let chunk = (PAGE_SIZE - page_offset).min(src.len() - done);
        frames.with_data(frame, |data| {
            data[page_offset..page_offset + chunk].copy_from_slice(&src[done..done + chunk]);
        });
        done += chunk;
    }
    true
}

/// The syscall numbers the dispatcher recognizes. The numeric values
/// themselves carry no meaning beyond matching whatever a process's libc
/// compiles a call down to; `Dispatcher` only cares which name a number
/// maps to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(i32)]
pub enum Call {
    Halt = 0,
    Exit = 1,
    Exec = 2,
    Wait = 3,
    Create = 4,
    Remove = 5,
    Open = 6,
    Filesize = 7,
    Read = 8,
    Write = 9,
    Seek = 10,
    Tell = 11,
    Close = 12,
    Mmap = 13,
    Munmap = 14,
    Chdir = 15,
    Mkdir = 16,
    Readdir = 17,
    Isdir = 18,
    Inumber = 19,
}

impl Call {
    pub fn from_number(n: i32) -> Option<Self> {
        Some(match n {
            0 => Self::Halt,
            1 => Self::Exit,
            2 => Self::Exec,
            3 => Self::Wait,
            4 => Self::Create,
            5 => Self::Remove,
            6 => Self::Open,
            7 => Self::Filesize,
            8 => Self::Read,
            9 => Self::Write,
            10 => Self::Seek,
            11 => Self::Tell,
            12 => Self::Close,
            13 => Self::Mmap,
            14 => Self::Munmap,
            15 => Self::Chdir,
            16 => Self::Mkdir,
            17 => Self::Readdir,
            18 => Self::Isdir,
            19 => Self::Inumber,
            _ => return None,
        })
    }
}
