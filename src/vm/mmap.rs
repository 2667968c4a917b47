//! Memory-mapped file regions.
//!
//! Each live mapping owns a reopened [`Inode`] reference and a run of
//! virtual pages; unmapping walks those pages, writing any dirty,
//! resident one back to the file (never to swap), exactly like
//! `vm/mmap.c`'s `munmap`. Installing a mapping across an already-used
//! region fails outright rather than partially mapping and unwinding —
//! the original returns `MAP_FAILED` just as eagerly on overlap.

extern crate alloc;

use alloc::collections::BTreeMap;
use alloc::sync::Arc;

use crate::fs::inode::{Inode, InodeTable};
use crate::param::PAGE_SIZE;
use crate::sync::Spinlock;
use crate::vm::page::{Location, Origin, SupplementalPageTable, Upage};
use crate::vm::VmError;

pub type MapId = usize;

struct Mapping {
    inode: Arc<Inode>,
    start: Upage,
    page_count: usize,
}

pub struct MmapTable {
    mappings: Spinlock<BTreeMap<MapId, Mapping>>,
    next_id: Spinlock<MapId>,
}

impl MmapTable {
    pub fn new() -> Self {
        Self {
            mappings: Spinlock::new(BTreeMap::new()),
            next_id: Spinlock::new(0),
        }
    }

    /// Maps `inode`'s full contents starting at `start_upage`, one page
    /// per `PAGE_SIZE` bytes of file length (rounded up; the trailing
    /// partial page is zero-padded on write-back, as the original does).
    ///
    /// Fails without installing anything if any page of the requested
    /// range is already backed by something in `spt`, or if the file is
    /// empty (mapping a zero-length file is rejected the same way the
    /// original rejects it).
    pub fn install(
        &self,
        spt: &SupplementalPageTable,
        inode: Arc<Inode>,
        start_upage: Upage,
    ) -> Result<MapId, VmError> {
        let length = inode.length() as usize;
        if length == 0 {
            return Err(VmError::InvalidMapping);
        }
        let page_count = (length + PAGE_SIZE - 1) / PAGE_SIZE;
        for i in 0..page_count {
            if spt.contains(start_upage + i) {
                return Err(VmError::RegionOverlap);
            }
        }

        for i in 0..page_count {
            spt.insert(
                start_upage + i,
                Origin::Mmap {
                    inode_sector: inode.sector(),
                    file_offset: (i * PAGE_SIZE) as u32,
                },
                true,
            );
        }

        let id = {
            let mut next = self.next_id.lock();
            let id = *next;
            *next += 1;
            id
        };
        self.mappings.lock().insert(
            id,
            Mapping {
                inode,
                start: start_upage,
                page_count,
            },
        );
        Ok(id)
    }

    /// Tears down mapping `id`: every dirty resident page is written
    /// back to its file offset, every entry is removed from `spt`, and
    /// the inode reference is released.
    pub fn unmap(
        &self,
        spt: &SupplementalPageTable,
        inodes: &InodeTable<'_>,
        id: MapId,
        frames: &crate::vm::frame::FrameTable,
        page_table: &dyn crate::vm::mmu::PageTable,
    ) -> Result<(), VmError> {
        let mapping = self
            .mappings
            .lock()
            .remove(&id)
            .ok_or(VmError::InvalidMapping)?;

        for i in 0..mapping.page_count {
            let upage = mapping.start + i;
            if let Some(entry) = spt.get(upage) {
                if let Location::Resident(frame) = entry.location {
                    if page_table.is_dirty(upage) {
                        let offset = match entry.origin {
                            Origin::Mmap { file_offset, .. } => file_offset,
                            _ => (i * PAGE_SIZE) as u32,
                        };
                        frames.with_data(frame, |data| {
                            let _ = inodes.write_at(&mapping.inode, data, offset);
                        });
                    }
                    page_table.unmap(upage);
                    frames.free(frame);
                }
            }
            spt.remove(upage);
        }

        inodes.close(mapping.inode);
        Ok(())
    }
}

impl Default for MmapTable {
    fn default() -> Self {
        Self::new()
    }
}
