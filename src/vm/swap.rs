//! Swap slot allocator.
//!
//! A bitmap over fixed-size slots on a dedicated swap device, each slot
//! exactly one page (`SECTORS_PER_PAGE` consecutive sectors), mirroring
//! `vm/swap.c`. Reading triggers the underlying disk's own interrupt
//! handling; this crate performs the read/write synchronously, since the
//! disk driver's asynchronous completion path is an external
//! collaborator (`swap_read`'s use of `block_read`, not
//! `filesys/inode.c`'s cache, is read/written straight through here —
//! swap content is never worth caching).

use crate::block::BlockDevice;
use crate::param::{PAGE_SIZE, SECTORS_PER_PAGE, SECTOR_SIZE};
use crate::sync::Spinlock;

extern crate alloc;
use alloc::vec;
use alloc::vec::Vec;

pub type SwapSlot = usize;

struct SwapInner {
    used: Vec<bool>,
}

pub struct SwapTable<'d> {
    device: &'d dyn BlockDevice,
    inner: Spinlock<SwapInner>,
}

impl<'d> SwapTable<'d> {
    pub fn new(device: &'d dyn BlockDevice) -> Self {
        let slot_count = device.sector_count() as usize / SECTORS_PER_PAGE;
        Self {
            device,
            inner: Spinlock::new(SwapInner {
                used: vec![false; slot_count],
            }),
        }
    }

    /// Claims a free slot and writes `page` into it.
    pub fn write_out(&self, page: &[u8; PAGE_SIZE]) -> Option<SwapSlot> {
        let slot = {
            let mut guard = self.inner.lock();
            let idx = guard.used.iter().position(|used| !used)?;
            guard.used[idx] = true;
            idx
        };
        for i in 0..SECTORS_PER_PAGE {
            let mut sector = [0u8; SECTOR_SIZE];
            sector.copy_from_slice(&page[i * SECTOR_SIZE..(i + 1) * SECTOR_SIZE]);
            self.device
                .write_sector((slot * SECTORS_PER_PAGE + i) as u32, &sector);
        }
        Some(slot)
    }

    /// Reads `slot` back into `page` and frees it — a swap slot is
    /// read exactly once, same as the original `swap_in`.
    pub fn read_in(&self, slot: SwapSlot, page: &mut [u8; PAGE_SIZE]) {
        for i in 0..SECTORS_PER_PAGE {
            let mut sector = [0u8; SECTOR_SIZE];
            self.device
                .read_sector((slot * SECTORS_PER_PAGE + i) as u32, &mut sector);
            page[i * SECTOR_SIZE..(i + 1) * SECTOR_SIZE].copy_from_slice(&sector);
        }
        let mut guard = self.inner.lock();
        guard.used[slot] = false;
    }

    /// Releases a slot without reading it back, for a process that exits
    /// with pages still swapped out.
    pub fn discard(&self, slot: SwapSlot) {
        self.inner.lock().used[slot] = false;
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::block::MemDisk;

    #[test]
    fn write_out_then_read_in_round_trips_and_frees_the_slot() {
        let disk = MemDisk::new((SECTORS_PER_PAGE * 4) as u32);
        let swap = SwapTable::new(&disk);
        let mut page = [0u8; PAGE_SIZE];
        page[0] = 1;
        page[PAGE_SIZE - 1] = 2;

        let slot = swap.write_out(&page).unwrap();
        let mut out = [0u8; PAGE_SIZE];
        swap.read_in(slot, &mut out);
        assert_eq!(out, page);

        // The slot was freed by read_in, so it is immediately reusable.
        let reused = swap.write_out(&[0u8; PAGE_SIZE]).unwrap();
        assert_eq!(reused, slot);
    }

    #[test]
    fn runs_out_of_slots_when_device_is_full() {
        let disk = MemDisk::new(SECTORS_PER_PAGE as u32);
        let swap = SwapTable::new(&disk);
        assert!(swap.write_out(&[0u8; PAGE_SIZE]).is_some());
        assert!(swap.write_out(&[0u8; PAGE_SIZE]).is_none());
    }
}
