//! Tunable sizes shared across subsystems.
//!
//! Kept separate from the modules that use them, the way the teacher crate
//! isolates its sizing knobs in one place instead of scattering magic
//! numbers through the source.

/// Bytes per disk sector. The unit of buffer-cache residency.
pub const SECTOR_SIZE: usize = 512;

/// Bytes per virtual/physical page.
pub const PAGE_SIZE: usize = 4096;

/// Sectors per page; also the size of one swap slot.
pub const SECTORS_PER_PAGE: usize = PAGE_SIZE / SECTOR_SIZE;

/// Number of lines held by the buffer cache.
pub const CACHE_LINES: usize = 64;

/// Direct block pointers held inline in an inode.
pub const NDIRECT: usize = 12;

/// Sector pointers that fit in one indirect/doubly-indirect index block.
pub const PTRS_PER_BLOCK: usize = SECTOR_SIZE / core::mem::size_of::<u32>();

/// Maximum file size in sectors: direct + indirect + doubly-indirect.
pub const MAX_FILE_SECTORS: usize = NDIRECT + PTRS_PER_BLOCK + PTRS_PER_BLOCK * PTRS_PER_BLOCK;

/// Constant identifying a valid on-disk inode ("INOD" read little-endian).
pub const INODE_MAGIC: u32 = 0x494e_4f44;

/// Sector holding the free-map's own inode.
pub const FREE_MAP_SECTOR: u32 = 0;

/// Sector holding the root directory's inode.
pub const ROOT_DIR_SECTOR: u32 = 1;

/// Maximum length of one path component, not counting the NUL terminator.
pub const NAME_MAX: usize = 14;

/// Number of entries the root directory is pre-sized for at `format`.
pub const ROOT_DIR_ENTRIES: usize = 16;

/// How far below the top of the user address space stack growth is permitted.
pub const STACK_GROWTH_LIMIT: usize = 8 * 1024 * 1024;

/// Maximum number of system-call arguments.
pub const MAX_SYSCALL_ARGS: usize = 3;

/// Maximum number of open files per process (descriptors 0 and 1 reserved).
pub const NOFILE: usize = 128;

/// Interval, in milliseconds, between write-behind flushes.
pub const WRITE_BEHIND_INTERVAL_MS: u64 = 500;
