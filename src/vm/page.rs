//! The supplemental page table: per-address-space bookkeeping for every
//! page that might not be resident, mirroring `vm/page.c`'s `spte`. Each
//! entry keeps both where a page's bytes currently live (`Location`) and
//! where they came from (`Origin`), because `Origin` is what the fault
//! handler needs again on eviction: a lazily-loaded file page can just be
//! dropped (or swapped out, if dirty), but a memory-mapped page must
//! always be written back to its file, never to swap.

extern crate alloc;

use alloc::collections::BTreeMap;

use crate::param::PAGE_SIZE;
use crate::sync::Spinlock;
use crate::vm::mmu::{Frame, Upage};
use crate::vm::swap::SwapSlot;

/// Where a lazily-loaded executable segment's bytes come from: read
/// `read_bytes` from the file at `file_offset`, then zero-fill the rest
/// of the page. Grounded on `load_segment`'s per-page `aux` struct.
#[derive(Clone, Copy)]
pub struct LoadInfo {
    pub inode_sector: u32,
    pub file_offset: u32,
    pub read_bytes: usize,
}

#[derive(Clone, Copy)]
pub enum Origin {
    /// Anonymous memory: a stack page or `sbrk`-style growth. Zero-filled
    /// on first touch; swapped out (never written to a file) on eviction.
    Anonymous,
    /// A page of an executable/data segment loaded from `inode_sector`.
    /// Clean pages are simply dropped on eviction and reloaded from the
    /// file later; dirty ones are swapped out like anonymous memory.
    File(LoadInfo),
    /// A page of a memory-mapped file region. Always written back to
    /// `inode_sector` at `file_offset` on eviction — never to swap.
    Mmap { inode_sector: u32, file_offset: u32 },
}

#[derive(Clone, Copy)]
pub enum Location {
    Resident(Frame),
    Swapped(SwapSlot),
    NotLoaded,
}

#[derive(Clone, Copy)]
pub struct PageEntry {
    pub origin: Origin,
    pub location: Location,
    pub writable: bool,
}

/// One process's mapping from virtual page number to backing record.
/// A virtual page with no entry here simply does not exist in the
/// address space.
pub struct SupplementalPageTable {
    pages: Spinlock<BTreeMap<Upage, PageEntry>>,
}

impl SupplementalPageTable {
    pub fn new() -> Self {
        Self {
            pages: Spinlock::new(BTreeMap::new()),
        }
    }

    pub fn insert(&self, upage: Upage, origin: Origin, writable: bool) {
        self.pages.lock().insert(
            upage,
            PageEntry {
                origin,
                location: Location::NotLoaded,
                writable,
            },
        );
    }

    pub fn remove(&self, upage: Upage) -> Option<PageEntry> {
        self.pages.lock().remove(&upage)
    }

    pub fn set_location(&self, upage: Upage, location: Location) {
        if let Some(entry) = self.pages.lock().get_mut(&upage) {
            entry.location = location;
        }
    }

    pub fn get(&self, upage: Upage) -> Option<PageEntry> {
        self.pages.lock().get(&upage).copied()
    }

    pub fn contains(&self, upage: Upage) -> bool {
        self.pages.lock().contains_key(&upage)
    }
}

impl Default for SupplementalPageTable {
    fn default() -> Self {
        Self::new()
    }
}

pub fn upage_of(vaddr: usize) -> Upage {
    vaddr / PAGE_SIZE
}

pub fn page_base(upage: Upage) -> usize {
    upage * PAGE_SIZE
}
