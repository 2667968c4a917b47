//! The hardware page-table contract.
//!
//! Installing a translation, reading the accessed/dirty bits, and
//! invalidating a TLB entry are all machine-specific — no
//! `pagedir`-equivalent source file was retrieved into this pack to
//! ground this split against directly. Architecture page-table formats
//! are exactly the kind of device/hardware plumbing this crate's
//! external collaborators cover, so — like [`crate::sync::Blocker`]
//! for the scheduler — this module only fixes the contract the frame
//! table and fault handler need from one.

extern crate alloc;

use alloc::collections::BTreeMap;

use crate::sync::Spinlock;

/// A user virtual page number (virtual address divided by `PAGE_SIZE`).
pub type Upage = usize;
/// A physical frame number.
pub type Frame = usize;

/// The per-address-space hardware mapping contract.
pub trait PageTable: Sync {
    /// Installs `upage -> frame`, with `writable` controlling the
    /// protection bit.
    fn map(&self, upage: Upage, frame: Frame, writable: bool);

    /// Removes any mapping for `upage`.
    fn unmap(&self, upage: Upage);

    fn is_present(&self, upage: Upage) -> bool;

    /// Hardware "this page was written" bit, consulted by the fault
    /// handler to decide whether an evicted page must be written back.
    fn is_dirty(&self, upage: Upage) -> bool;

    /// Hardware "this page was referenced" bit, the input to the frame
    /// table's CLOCK sweep.
    fn is_accessed(&self, upage: Upage) -> bool;

    fn set_accessed(&self, upage: Upage, value: bool);
    fn set_dirty(&self, upage: Upage, value: bool);
}

struct Entry {
    frame: Option<Frame>,
    writable: bool,
    accessed: bool,
    dirty: bool,
}

/// An in-memory stand-in for a real MMU, sufficient to drive the frame
/// table and fault handler's logic in host tests.
pub struct MockPageTable {
    entries: Spinlock<BTreeMap<Upage, Entry>>,
}

impl MockPageTable {
    pub fn new() -> Self {
        Self {
            entries: Spinlock::new(BTreeMap::new()),
        }
    }
}

impl Default for MockPageTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PageTable for MockPageTable {
    fn map(&self, upage: Upage, frame: Frame, writable: bool) {
        self.entries.lock().insert(
            upage,
            Entry {
                frame: Some(frame),
                writable,
                accessed: false,
                dirty: false,
            },
        );
    }

    fn unmap(&self, upage: Upage) {
        self.entries.lock().remove(&upage);
    }

    fn is_present(&self, upage: Upage) -> bool {
        self.entries
            .lock()
            .get(&upage)
            .map(|e| e.frame.is_some())
            .unwrap_or(false)
    }

    fn is_dirty(&self, upage: Upage) -> bool {
        self.entries.lock().get(&upage).map(|e| e.dirty).unwrap_or(false)
    }

    fn is_accessed(&self, upage: Upage) -> bool {
        self.entries
            .lock()
            .get(&upage)
            .map(|e| e.accessed)
            .unwrap_or(false)
    }

    fn set_accessed(&self, upage: Upage, value: bool) {
        if let Some(e) = self.entries.lock().get_mut(&upage) {
            e.accessed = value;
        }
    }

    fn set_dirty(&self, upage: Upage, value: bool) {
        if let Some(e) = self.entries.lock().get_mut(&upage) {
            e.dirty = value;
        }
    }
}
