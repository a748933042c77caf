//! Two-level x86 page table vocabulary.
//!
//! 32-bit paging translates a virtual address through a 1024-entry page
//! directory and a 1024-entry page table, each occupying one frame:
//!
//! ```text
//! 31        22 21        12 11         0
//! ┌───────────┬────────────┬───────────┐
//! │ PD index  │  PT index  │  offset   │
//! │ (10 bits) │ (10 bits)  │ (12 bits) │
//! └───────────┴────────────┴───────────┘
//! ```
//!
//! An entry holds the frame address in its upper 20 bits and attribute
//! flags in the low bits. Only the construction/inspection logic lives
//! here; [`vmm`](super::vmm) owns the actual tables.

use bitflags::bitflags;

bitflags! {
    /// Page directory / page table entry flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFlags: u32 {
        /// Entry is valid; if clear, any access faults.
        const PRESENT = 1 << 0;
        /// Writes allowed. If clear, writes fault.
        const RW      = 1 << 1;
        /// Ring 3 may access. Must be set on the PDE *and* the PTE for a
        /// user-mode access to succeed.
        const USER    = 1 << 2;
    }
}

/// Entries per page directory or page table.
pub const ENTRIES_PER_TABLE: usize = 1024;

/// Bytes of virtual space covered by one page directory entry (4 MiB).
pub const PDE_SPAN: usize = ENTRIES_PER_TABLE * super::PAGE_SIZE;

/// Mask extracting the frame address from an entry.
const FRAME_MASK: u32 = 0xFFFF_F000;

/// Page directory index for a virtual address.
#[inline]
pub const fn pd_index(virt: usize) -> usize {
    virt >> 22
}

/// Page table index for a virtual address.
#[inline]
pub const fn pt_index(virt: usize) -> usize {
    (virt >> 12) & 0x3FF
}

/// Builds an entry pointing at `frame` with the given flags.
#[inline]
pub fn make_entry(frame: usize, flags: PageFlags) -> u32 {
    (frame as u32 & FRAME_MASK) | flags.bits()
}

/// The frame address stored in an entry.
#[inline]
pub const fn entry_frame(entry: u32) -> usize {
    (entry & FRAME_MASK) as usize
}

/// Whether an entry has the PRESENT bit.
#[inline]
pub const fn entry_present(entry: u32) -> bool {
    entry & 1 != 0
}

/// Entry value used for unmapped directory slots: writable + supervisor
/// but not present, so the CPU ignores the rest of the bits.
pub const EMPTY_DIRECTORY_ENTRY: u32 = 0x0000_0002;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{HIGHER_HALF_BASE, KHEAP_START};

    #[test]
    fn index_split_matches_architecture() {
        let virt = 0xC040_5123usize;
        assert_eq!(pd_index(virt), 0xC0405123 >> 22);
        assert_eq!(pt_index(virt), (0xC0405123 >> 12) & 0x3FF);
    }

    #[test]
    fn identity_region_uses_directory_slot_zero() {
        assert_eq!(pd_index(0), 0);
        assert_eq!(pd_index(PDE_SPAN - 1), 0);
        assert_eq!(pd_index(PDE_SPAN), 1);
    }

    #[test]
    fn higher_half_uses_slot_768() {
        assert_eq!(pd_index(HIGHER_HALF_BASE), 768);
    }

    #[test]
    fn heap_window_uses_slot_832() {
        assert_eq!(pd_index(KHEAP_START), 832);
        // The 1 MiB heap spans 256 PTEs inside a single table.
        assert_eq!(pt_index(KHEAP_START), 0);
        assert_eq!(pt_index(KHEAP_START + crate::memory::KHEAP_SIZE - 1), 255);
    }

    #[test]
    fn entry_round_trips_frame_and_flags() {
        let flags = PageFlags::PRESENT | PageFlags::RW | PageFlags::USER;
        let entry = make_entry(0x0012_3000, flags);
        assert_eq!(entry_frame(entry), 0x0012_3000);
        assert!(entry_present(entry));
        assert_eq!(entry & 0x7, 0x7);
    }

    #[test]
    fn make_entry_strips_offset_bits() {
        let entry = make_entry(0x0012_3FFF, PageFlags::PRESENT);
        assert_eq!(entry_frame(entry), 0x0012_3000);
    }

    #[test]
    fn empty_directory_entry_is_not_present() {
        assert!(!entry_present(EMPTY_DIRECTORY_ENTRY));
    }
}
