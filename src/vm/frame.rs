//! The frame table: one entry per physical page, shared by every
//! address space. Eviction is two-phase exactly as in the original
//! `vm/frame.c`: a linear sweep for a free frame first, and only if that
//! fails a CLOCK sweep that clears accessed bits on its first pass over
//! each frame and evicts the first one it finds already clear.

extern crate alloc;

use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::param::PAGE_SIZE;
use crate::sync::Spinlock;
use crate::vm::mmu::{PageTable, Upage};
use crate::vm::page::SupplementalPageTable;

/// Identifies the page occupying a frame, so the frame table can ask its
/// owning address space about accessed/dirty bits, clear its mapping on
/// eviction, and — via `spt` — update that address space's record of
/// where the page went (§4.4/§4.5: frame and page tables cooperate
/// across process boundaries during eviction).
pub struct Owner {
    pub page_table: Arc<dyn PageTable>,
    pub spt: Arc<SupplementalPageTable>,
    pub upage: Upage,
}

struct Frame {
    data: [u8; PAGE_SIZE],
    owner: Option<Owner>,
}

impl Frame {
    fn empty() -> Self {
        Self {
            data: [0u8; PAGE_SIZE],
            owner: None,
        }
    }
}

/// The bytes and ownership record of a frame chosen for eviction. The
/// frame is left free (owner cleared, mapping torn down) in the table;
/// the caller decides where `data` goes (swap, or back to its file).
pub struct Evicted {
    pub owner: Owner,
    pub data: [u8; PAGE_SIZE],
}

pub struct FrameTable {
    frames: Spinlock<Vec<Frame>>,
    clock_hand: Spinlock<usize>,
}

impl FrameTable {
    pub fn new(frame_count: usize) -> Self {
        let mut frames = Vec::with_capacity(frame_count);
        frames.resize_with(frame_count, Frame::empty);
        Self {
            frames: Spinlock::new(frames),
            clock_hand: Spinlock::new(0),
        }
    }

    pub fn frame_count(&self) -> usize {
        self.frames.lock().len()
    }

    /// Finds a free frame, or evicts one via CLOCK. Returns the frame
    /// index and, when an eviction happened, the victim's data and
    /// owner for the caller to persist before reusing the slot.
    pub fn allocate(&self) -> (usize, Option<Evicted>) {
        let mut frames = self.frames.lock();

        if let Some(i) = frames.iter().position(|f| f.owner.is_none()) {
            return (i, None);
        }

        let n = frames.len();
        let mut hand = self.clock_hand.lock();
        loop {
            let i = *hand;
            *hand = (*hand + 1) % n;
            let accessed = frames[i]
                .owner
                .as_ref()
                .map(|o| o.page_table.is_accessed(o.upage))
                .unwrap_or(false);
            if accessed {
                if let Some(o) = &frames[i].owner {
                    o.page_table.set_accessed(o.upage, false);
                }
                continue;
            }
            let owner = frames[i].owner.take().expect("frame must be owned here");
            owner.page_table.unmap(owner.upage);
            let data = frames[i].data;
            frames[i].data = [0u8; PAGE_SIZE];
            return (i, Some(Evicted { owner, data }));
        }
    }

    pub fn set_owner(&self, frame: usize, owner: Owner) {
        self.frames.lock()[frame].owner = Some(owner);
    }

    pub fn free(&self, frame: usize) {
        let mut frames = self.frames.lock();
        frames[frame].owner = None;
        frames[frame].data = [0u8; PAGE_SIZE];
    }

    pub fn with_data<R>(&self, frame: usize, f: impl FnOnce(&mut [u8; PAGE_SIZE]) -> R) -> R {
        let mut frames = self.frames.lock();
        f(&mut frames[frame].data)
    }
}
