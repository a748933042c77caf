// =============================================================================
// FerrumOS — Virtual Memory Manager
// =============================================================================
//
// Builds the boot address space exactly once and switches the CPU into
// paged mode. Layout established:
//
//   [0x00000000, 0x00400000)  identity map of low 4 MiB — the kernel image
//                             keeps executing at its physical address, and
//                             user-mode tasks live here, so the leaf pages
//                             carry PRESENT | RW | USER.
//   [0xC0000000, 0xC0400000)  higher-half alias of the same physical 4 MiB,
//                             kernel-only: its own page table without the
//                             USER bit (sharing the identity table would
//                             leak USER into the alias).
//   [0xD0000000, 0xD0100000)  kernel heap window, 256 freshly allocated
//                             frames, PRESENT | RW | USER on PDE and PTEs
//                             so user stacks handed out by the heap remain
//                             reachable from Ring 3.
//
// All tables are written through physical addresses — paging is still off,
// and segmentation is flat, so physical == linear here. No TLB flush is
// needed when paging comes on because no stale translation can exist.
//
// Any frame-allocation failure in here is fatal: enabling paging over a
// partially built address space faults unrecoverably, so we log and halt.
//
// =============================================================================

use core::ptr;

use crate::arch;
use crate::drivers::terminal;
use crate::memory::paging::{
    make_entry, pd_index, PageFlags, EMPTY_DIRECTORY_ENTRY, ENTRIES_PER_TABLE,
};
use crate::memory::{pmm, KHEAP_SIZE, KHEAP_START, PAGE_SIZE};

/// Number of heap pages to back with fresh frames (1 MiB).
const KHEAP_PAGES: usize = KHEAP_SIZE / PAGE_SIZE;

/// Allocates one frame for a paging structure, halting the boot on OOM.
fn alloc_table_frame(what: &str) -> usize {
    let frame = pmm::alloc_page();
    if frame == 0 {
        terminal::write_str("VMM Error: out of physical memory during vmm_init\n");
        klog::error!("vmm: failed to allocate frame for {}", what);
        arch::halt_loop();
    }
    frame
}

/// Builds the boot address space and enables paging.
///
/// Must be called exactly once, after `pmm::init`, before the heap.
pub fn init() {
    let pd_phys = alloc_table_frame("page directory");
    let identity_pt = alloc_table_frame("identity page table");
    let high_pt = alloc_table_frame("higher-half page table");
    let heap_pt = alloc_table_frame("heap page table");

    let pd = pd_phys as *mut u32;

    // Every directory slot starts out "RW, supervisor, not present".
    for i in 0..ENTRIES_PER_TABLE {
        // SAFETY: the frame is allocator-owned and identity-addressable
        // (paging is off).
        unsafe { ptr::write_volatile(pd.add(i), EMPTY_DIRECTORY_ENTRY) };
    }

    // Identity map: virtual page i → physical page i, user-visible.
    let pt = identity_pt as *mut u32;
    for i in 0..ENTRIES_PER_TABLE {
        let entry = make_entry(
            i * PAGE_SIZE,
            PageFlags::PRESENT | PageFlags::RW | PageFlags::USER,
        );
        unsafe { ptr::write_volatile(pt.add(i), entry) };
    }

    // Higher-half alias: same frames, kernel-only leaf entries.
    let pt = high_pt as *mut u32;
    for i in 0..ENTRIES_PER_TABLE {
        let entry = make_entry(i * PAGE_SIZE, PageFlags::PRESENT | PageFlags::RW);
        unsafe { ptr::write_volatile(pt.add(i), entry) };
    }

    // Heap window: 256 fresh frames, the rest of the table stays empty.
    let pt = heap_pt as *mut u32;
    for i in 0..ENTRIES_PER_TABLE {
        let entry = if i < KHEAP_PAGES {
            let frame = pmm::alloc_page();
            if frame == 0 {
                terminal::write_str("VMM Error: out of physical memory for heap\n");
                klog::error!("vmm: heap frame {} of {} unavailable", i, KHEAP_PAGES);
                arch::halt_loop();
            }
            make_entry(frame, PageFlags::PRESENT | PageFlags::RW | PageFlags::USER)
        } else {
            0
        };
        unsafe { ptr::write_volatile(pt.add(i), entry) };
    }

    // Hook the three tables into the directory.
    unsafe {
        ptr::write_volatile(
            pd.add(0),
            make_entry(
                identity_pt,
                PageFlags::PRESENT | PageFlags::RW | PageFlags::USER,
            ),
        );
        ptr::write_volatile(
            pd.add(pd_index(crate::memory::HIGHER_HALF_BASE)),
            make_entry(high_pt, PageFlags::PRESENT | PageFlags::RW),
        );
        ptr::write_volatile(
            pd.add(pd_index(KHEAP_START)),
            make_entry(
                heap_pt,
                PageFlags::PRESENT | PageFlags::RW | PageFlags::USER,
            ),
        );
    }

    klog::debug!(
        "vmm: pd={:#010x} identity_pt={:#010x} high_pt={:#010x} heap_pt={:#010x}",
        pd_phys,
        identity_pt,
        high_pt,
        heap_pt
    );

    // SAFETY: the directory is fully built; the instruction stream sits in
    // the identity-mapped region, so enabling paging does not move the rug.
    unsafe {
        arch::set_page_directory(pd_phys as u32);
        arch::enable_paging();
    }

    terminal::write_str("VMM initialized! Higher-half mapped at 0xC0000000.\n");
}
