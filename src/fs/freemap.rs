//! Free space bitmap.
//!
//! One bit per sector, itself stored on disk starting at
//! [`crate::param::FREE_MAP_SECTOR`] the way the original filesystem
//! keeps the free map in a regular (if bootstrap-special) inode. Kept as
//! a plain bitset in memory behind a spinlock — short critical sections,
//! no need for the sleeplock/inode machinery the data files use.

use crate::block::BlockDevice;
use crate::fs::cache::BufferCache;
use crate::param::SECTOR_SIZE;
use crate::sync::Spinlock;

extern crate alloc;
use alloc::vec;
use alloc::vec::Vec;

struct FreeMapInner {
    /// `bits[i] == true` means sector `i` is in use.
    bits: Vec<bool>,
}

pub struct FreeMap<'d> {
    device: &'d dyn BlockDevice,
    inner: Spinlock<FreeMapInner>,
}

impl<'d> FreeMap<'d> {
    /// Builds a fresh free map over `total_sectors`, marking
    /// `[0, first_free)` permanently reserved (boot sector, free-map
    /// sector, root directory sector, and so on).
    pub fn format(
        device: &'d dyn BlockDevice,
        _cache: &BufferCache<'d>,
        total_sectors: u32,
        first_free: u32,
    ) -> Self {
        let mut bits = vec![false; total_sectors as usize];
        for b in bits.iter_mut().take(first_free as usize) {
            *b = true;
        }
        Self {
            device,
            inner: Spinlock::new(FreeMapInner { bits }),
        }
    }

    /// Reconstructs a free map from its on-disk bitmap representation,
    /// packed 8 sectors per byte starting at `bitmap_sector`.
    pub fn load(
        device: &'d dyn BlockDevice,
        total_sectors: u32,
        bitmap_sector: u32,
    ) -> Self {
        let bytes_needed = (total_sectors as usize + 7) / 8;
        let sectors_needed = (bytes_needed + SECTOR_SIZE - 1) / SECTOR_SIZE;
        let mut bits = vec![false; total_sectors as usize];
        let mut raw = [0u8; SECTOR_SIZE];
        for s in 0..sectors_needed {
            device.read_sector(bitmap_sector + s as u32, &mut raw);
            for byte_idx in 0..SECTOR_SIZE {
                let bit_base = s * SECTOR_SIZE * 8 + byte_idx * 8;
                if bit_base >= total_sectors as usize {
                    break;
                }
                let byte = raw[byte_idx];
                for bit in 0..8 {
                    let idx = bit_base + bit;
                    if idx < total_sectors as usize {
                        bits[idx] = byte & (1 << bit) != 0;
                    }
                }
            }
        }
        Self {
            device,
            inner: Spinlock::new(FreeMapInner { bits }),
        }
    }

    /// Serializes the bitmap to disk starting at `bitmap_sector`.
    pub fn persist(&self, bitmap_sector: u32) {
        let guard = self.inner.lock();
        let mut raw = [0u8; SECTOR_SIZE];
        let mut sector = bitmap_sector;
        let mut idx = 0;
        while idx < guard.bits.len() {
            raw = [0u8; SECTOR_SIZE];
            for byte_idx in 0..SECTOR_SIZE {
                let mut byte = 0u8;
                for bit in 0..8 {
                    let i = idx + byte_idx * 8 + bit;
                    if i < guard.bits.len() && guard.bits[i] {
                        byte |= 1 << bit;
                    }
                }
                raw[byte_idx] = byte;
            }
            self.device.write_sector(sector, &raw);
            idx += SECTOR_SIZE * 8;
            sector += 1;
        }
    }

    /// Finds and claims one free sector, or `None` when the device is full.
    pub fn allocate_one(&self) -> Option<u32> {
        let mut guard = self.inner.lock();
        let idx = guard.bits.iter().position(|used| !used)?;
        guard.bits[idx] = true;
        Some(idx as u32)
    }

    /// Releases `sector` back to the pool.
    ///
    /// # Panics
    ///
    /// Panics if `sector` was already free, matching the original
    /// filesystem's `bitmap_set_multiple` assertion against double-free.
    pub fn free_one(&self, sector: u32) {
        let mut guard = self.inner.lock();
        assert!(guard.bits[sector as usize], "freeing an already-free sector");
        guard.bits[sector as usize] = false;
    }

    pub fn is_free(&self, sector: u32) -> bool {
        !self.inner.lock().bits[sector as usize]
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::block::MemDisk;
    use crate::fs::cache::BufferCache;

    #[test]
    fn reserved_prefix_is_unavailable() {
        let disk = MemDisk::new(32);
        let cache = BufferCache::new(&disk);
        let fm = FreeMap::format(&disk, &cache, 32, 2);
        assert!(!fm.is_free(0));
        assert!(!fm.is_free(1));
        assert!(fm.is_free(2));
    }

    #[test]
    fn allocate_then_free_round_trips() {
        let disk = MemDisk::new(8);
        let cache = BufferCache::new(&disk);
        let fm = FreeMap::format(&disk, &cache, 8, 0);
        let a = fm.allocate_one().unwrap();
        let b = fm.allocate_one().unwrap();
        assert_ne!(a, b);
        fm.free_one(a);
        assert!(fm.is_free(a));
    }

    #[test]
    fn persist_and_load_round_trip() {
        let disk = MemDisk::new(16);
        let cache = BufferCache::new(&disk);
        let fm = FreeMap::format(&disk, &cache, 16, 1);
        let a = fm.allocate_one().unwrap();
        fm.persist(8);

        let reloaded = FreeMap::load(&disk, 16, 8);
        assert!(!reloaded.is_free(a));
        assert!(!reloaded.is_free(0));
    }
}
