//! Memory management: physical frames, paging, and the kernel heap.

pub mod heap;
pub mod paging;
pub mod pmm;
#[cfg(target_arch = "x86")]
pub mod vmm;

/// Size of a physical frame / virtual page.
pub const PAGE_SIZE: usize = 4096;

/// Virtual base of the kernel heap window.
pub const KHEAP_START: usize = 0xD000_0000;

/// Size of the kernel heap window (1 MiB = 256 pages).
pub const KHEAP_SIZE: usize = 0x0010_0000;

/// Virtual base of the higher-half kernel alias.
pub const HIGHER_HALF_BASE: usize = 0xC000_0000;
