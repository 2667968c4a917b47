//! ELF executable loading.
//!
//! Parses the file header and program headers with hand-rolled
//! `#[repr(C)]` structs and `zerocopy`, the same approach the teacher's
//! `elf.rs` takes, rather than pulling in a general-purpose ELF crate —
//! this crate only ever needs `PT_LOAD` segments out of a kernel-built
//! binary, not arbitrary ELF introspection.

extern crate alloc;

use alloc::vec::Vec;
use bitflags::bitflags;
use zerocopy::{AsBytes, FromBytes};

use crate::fs::inode::{Inode, InodeTable};
use crate::param::PAGE_SIZE;
use crate::vm::page::{LoadInfo, Origin};
use crate::vm::SupplementalPageTable;

pub const ELF_MAGIC: u32 = 0x464c_457f;
pub const ELF_PROG_LOAD: u32 = 1;

bitflags! {
    pub struct ProgFlags: u32 {
        const EXEC = 1;
        const WRITE = 2;
        const READ = 4;
    }
}

#[repr(C)]
#[derive(Clone, Copy, Default, AsBytes, FromBytes)]
pub struct ElfHeader {
    pub magic: u32,
    pub ident: [u8; 12],
    pub typ: u16,
    pub machine: u16,
    pub version: u32,
    pub entry: u32,
    pub phoff: u32,
    pub shoff: u32,
    pub flags: u32,
    pub ehsize: u16,
    pub phentsize: u16,
    pub phnum: u16,
    pub shentsize: u16,
    pub shnum: u16,
    pub shstrndx: u16,
}

#[repr(C)]
#[derive(Clone, Copy, Default, AsBytes, FromBytes)]
pub struct ProgramHeader {
    pub typ: u32,
    pub off: u32,
    pub vaddr: u32,
    pub paddr: u32,
    pub filesz: u32,
    pub memsz: u32,
    pub flags: u32,
    pub align: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadError {
    NotAnElfFile,
    UnsupportedSegment,
}

/// The loader's output: the program's entry point, ready for the process
/// builder to construct an initial stack around.
pub struct LoadedImage {
    pub entry: u32,
}

/// Reads the ELF header and every `PT_LOAD` program header from `inode`,
/// installing a lazily-loaded [`Origin::File`] page for each page the
/// segment covers. Matches `load_segment`'s page-granular installation
/// in the original loader, without actually touching memory yet — pages
/// are realized on first fault.
pub fn load(
    inodes: &InodeTable<'_>,
    inode: &Inode,
    spt: &SupplementalPageTable,
) -> Result<LoadedImage, LoadError> {
    let mut header = ElfHeader::default();
    read_struct(inodes, inode, 0, &mut header);
    if header.magic != ELF_MAGIC {
        return Err(LoadError::NotAnElfFile);
    }

    for i in 0..header.phnum {
        let off = header.phoff + i as u32 * header.phentsize as u32;
        let mut ph = ProgramHeader::default();
        read_struct(inodes, inode, off, &mut ph);
        if ph.typ != ELF_PROG_LOAD {
            continue;
        }
        install_segment(inodes, inode, spt, &ph)?;
    }

    Ok(LoadedImage {
        entry: header.entry,
    })
}

fn install_segment(
    inodes: &InodeTable<'_>,
    inode: &Inode,
    spt: &SupplementalPageTable,
    ph: &ProgramHeader,
) -> Result<(), LoadError> {
    let flags = ProgFlags::from_bits_truncate(ph.flags);
    let writable = flags.contains(ProgFlags::WRITE);

    if ph.vaddr as usize % PAGE_SIZE != (ph.off as usize % PAGE_SIZE) {
        return Err(LoadError::UnsupportedSegment);
    }

    let page_start = (ph.vaddr as usize) / PAGE_SIZE;
    let first_page_skew = (ph.vaddr as usize) % PAGE_SIZE;
    let total = first_page_skew + ph.memsz as usize;
    let page_count = (total + PAGE_SIZE - 1) / PAGE_SIZE;

    let mut file_off = ph.off as usize - first_page_skew;
    let mut remaining_file_bytes = ph.filesz as usize;

    for i in 0..page_count {
        let this_skew = if i == 0 { first_page_skew } else { 0 };
        let read_bytes = remaining_file_bytes.min(PAGE_SIZE - this_skew);
        spt.insert(
            page_start + i,
            Origin::File(LoadInfo {
                inode_sector: inode.sector(),
                file_offset: file_off as u32,
                read_bytes: this_skew + read_bytes,
            }),
            writable,
        );
        remaining_file_bytes = remaining_file_bytes.saturating_sub(read_bytes);
        file_off += PAGE_SIZE;
    }
    let _ = inodes;
    Ok(())
}

fn read_struct<T: AsBytes + FromBytes + Copy>(
    inodes: &InodeTable<'_>,
    inode: &Inode,
    offset: u32,
    out: &mut T,
) {
    let mut buf: Vec<u8> = alloc::vec![0u8; core::mem::size_of::<T>()];
    let n = inodes.read_at(inode, &mut buf, offset);
    if n == buf.len() {
        if let Some(parsed) = T::read_from(&buf[..]) {
            *out = parsed;
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
    use crate::param::ROOT_DIR_SECTOR;
    use core::mem;

    fn inodes(disk: &MemDisk) -> InodeTable<'_> {
        let cache = BufferCache::new(disk);
        let free_map = FreeMap::format(disk, &cache, disk.sector_count(), ROOT_DIR_SECTOR + 1);
        InodeTable::new(disk, cache, free_map)
    }

    #[test]
    fn rejects_non_elf_content() {
        let disk = MemDisk::new(64);
        let t = inodes(&disk);
        let file = t.create(false, 0).unwrap();
        t.write_at(&file, b"not an elf file at all..", 0).unwrap();
        let spt = SupplementalPageTable::new();
        assert_eq!(load(&t, &file, &spt).unwrap_err(), LoadError::NotAnElfFile);
    }

    #[test]
    fn loads_a_single_load_segment() {
        let disk = MemDisk::new(64);
        let t = inodes(&disk);
        let file = t.create(false, 0).unwrap();

        let mut header = ElfHeader::default();
        header.magic = ELF_MAGIC;
        header.entry = 0x1000;
        header.phoff = mem::size_of::<ElfHeader>() as u32;
        header.phentsize = mem::size_of::<ProgramHeader>() as u32;
        header.phnum = 1;
        t.write_at(&file, header.as_bytes(), 0).unwrap();

        let mut ph = ProgramHeader::default();
        ph.typ = ELF_PROG_LOAD;
        ph.off = 0x1000;
        ph.vaddr = 0x1000;
        ph.filesz = 10;
        ph.memsz = 10;
        ph.flags = ProgFlags::READ.bits() | ProgFlags::EXEC.bits();
        t.write_at(&file, ph.as_bytes(), header.phoff).unwrap();

        let spt = SupplementalPageTable::new();
        let image = load(&t, &file, &spt).unwrap();
        assert_eq!(image.entry, 0x1000);
        assert!(spt.contains(0x1000 / PAGE_SIZE));
    }
}
