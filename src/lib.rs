//! coreos-kernel: the demand-paged virtual memory, buffered block
//! filesystem, and syscall boundary core of a teaching operating system
//! kernel.
//!
//! The scheduler, interrupt/timer plumbing, device drivers, boot loader,
//! and CLI front-end are named external collaborators (see `sync::Blocker`
//! and `vm::mmu::PageTable`) and are not implemented by this crate. Built
//! `no_std` outside tests; `#[cfg(test)]` modules throughout pull in `std`
//! to run as ordinary host unit tests against in-memory mock devices.

#![cfg_attr(not(test), no_std)]
#![deny(rust_2018_idioms)]
#![deny(unsafe_op_in_unsafe_fn)]
#![deny(unused_must_use)]

extern crate alloc;

pub mod block;
pub mod fs;
pub mod param;
pub mod process;
pub mod sync;
pub mod syscall;
pub mod vm;
