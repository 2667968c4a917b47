//! Builds a new process's initial user stack page: argument strings,
//! then a word-aligned pad, then the `argv` pointer array, `argv`,
//! `argc`, and a fake return address — in that order from high to low
//! addresses, matching `process.c`'s `setup_stack`/argument-passing code.

extern crate alloc;

use alloc::vec::Vec;

use crate::param::PAGE_SIZE;

const WORD: usize = core::mem::size_of::<u32>();

/// Writes `argv` onto a fresh stack page and returns `(page bytes, esp
/// offset within the page)`. `base_vaddr` is the virtual address of the
/// page's first byte, needed to compute the pointers that get written
/// into the page itself.
pub fn build_user_stack(argv: &[&[u8]], base_vaddr: usize) -> ([u8; PAGE_SIZE], usize) {
    let mut page = [0u8; PAGE_SIZE];
    let mut sp = PAGE_SIZE;

    let mut offsets = Vec::with_capacity(argv.len());
    for arg in argv.iter().rev() {
        sp -= arg.len() + 1;
        page[sp..sp + arg.len()].copy_from_slice(arg);
        page[sp + arg.len()] = 0;
        offsets.push(sp);
    }
    offsets.reverse(); // offsets[i] is now where argv[i]'s string landed

    sp -= sp % WORD;

    // argv[argc] == NULL sentinel.
    sp -= WORD;
    page[sp..sp + WORD].copy_from_slice(&0u32.to_le_bytes());

    for &offset in offsets.iter().rev() {
        sp -= WORD;
        let vaddr = (base_vaddr + offset) as u32;
        page[sp..sp + WORD].copy_from_slice(&vaddr.to_le_bytes());
    }

    let argv_vaddr = (base_vaddr + sp) as u32;
    sp -= WORD;
    page[sp..sp + WORD].copy_from_slice(&argv_vaddr.to_le_bytes());

    sp -= WORD;
    page[sp..sp + WORD].copy_from_slice(&(argv.len() as u32).to_le_bytes());

    // Fake return address; the entry function never returns through it.
    sp -= WORD;
    page[sp..sp + WORD].copy_from_slice(&0u32.to_le_bytes());

    (page, sp)
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;

    fn read_u32(page: &[u8; PAGE_SIZE], offset: usize) -> u32 {
        let mut raw = [0u8; WORD];
        raw.copy_from_slice(&page[offset..offset + WORD]);
        u32::from_le_bytes(raw)
    }

    #[test]
    fn argc_and_argv_pointer_land_at_the_expected_offsets() {
        let base = 0x8000_0000 - PAGE_SIZE;
        let (page, sp) = build_user_stack(&[b"prog", b"one"], base);

        assert_eq!(read_u32(&page, sp + 4), 2);

        let argv_ptr = read_u32(&page, sp + 8) as usize;
        let arg0_vaddr = read_u32(&page, argv_ptr - base) as usize;
        let arg0_offset = arg0_vaddr - base;
        assert_eq!(&page[arg0_offset..arg0_offset + 4], b"prog");
    }

    #[test]
    fn stack_pointer_stays_word_aligned() {
        let base = 0x8000_0000 - PAGE_SIZE;
        let (_page, sp) = build_user_stack(&[b"a", b"bb", b"ccc"], base);
        assert_eq!(sp % WORD, 0);
    }
}
