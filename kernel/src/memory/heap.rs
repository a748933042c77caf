// =============================================================================
// FerrumOS — Kernel Heap Allocator
// =============================================================================
//
// First-fit free-list allocator over the 1 MiB virtual window the VMM maps
// at KHEAP_START. It backs both the C-style `kmalloc`/`kfree` interface the
// nucleus uses for raw buffers and, through `GlobalAlloc`, Rust's `alloc`
// crate (Box, Vec, String) for the PCB table and VFS nodes.
//
// LAYOUT:
//   The arena is a singly-linked list of blocks in ascending address order.
//   Every block starts with a header; the payload follows immediately:
//
//   ┌────────────────────┐
//   │ next  (*mut)       │ → header of the next block, or null
//   │ size  (usize)      │   payload bytes (header not counted)
//   │ free  (u32)        │   1 = free, 0 = allocated
//   ├────────────────────┤
//   │ payload …          │ ← pointer handed to the caller
//   └────────────────────┘
//
//   Headers are 8-aligned and sized to a multiple of 8; request sizes are
//   rounded up to 8. Every payload address is therefore 8-aligned, which
//   covers every alignment the kernel's heap types need.
//
// ALLOCATION (first-fit):
//   Walk from the head, take the first free block large enough. If the
//   remainder could hold a header plus one granule, split it into a new
//   free block spliced in after the current one.
//
// DEALLOCATION:
//   Mark the block free, absorb the successor when it is free, then absorb
//   into the predecessor when that one is free (found by a list walk — the
//   list is singly linked). The arena thus never keeps two adjacent free
//   blocks, and freeing a pair of neighbors in either order re-forms one
//   block.
//
// =============================================================================

use core::alloc::{GlobalAlloc, Layout};
use core::ptr;

use crate::sync::SpinLock;

/// Allocation granularity and guaranteed payload alignment.
const ALLOC_ALIGN: usize = 8;

/// Block metadata preceding every payload.
#[repr(C, align(8))]
struct BlockHeader {
    /// Next block in ascending address order, or null.
    next: *mut BlockHeader,
    /// Payload size in bytes, excluding this header.
    size: usize,
    /// 1 = free, 0 = allocated.
    free: u32,
}

/// Header size — a multiple of 8 by the `align(8)` padding.
const HEADER_SIZE: usize = core::mem::size_of::<BlockHeader>();

#[inline]
const fn round_up(size: usize) -> usize {
    (size + ALLOC_ALIGN - 1) & !(ALLOC_ALIGN - 1)
}

// =============================================================================
// Heap internals
// =============================================================================

/// The free-list allocator state.
pub struct Heap {
    /// First block of the arena (lowest address), null before `init`.
    head: *mut BlockHeader,
    region_start: usize,
    region_size: usize,
}

// SAFETY: the raw pointers are only dereferenced under the SpinLock.
unsafe impl Send for Heap {}

impl Heap {
    const fn new() -> Self {
        Self {
            head: ptr::null_mut(),
            region_start: 0,
            region_size: 0,
        }
    }

    /// Installs a single free block covering the whole region.
    ///
    /// # Safety
    /// `start` must be an 8-aligned, mapped, exclusively-owned region of
    /// `size` bytes, and `size` must exceed one header.
    unsafe fn init(&mut self, start: usize, size: usize) {
        debug_assert!(start % ALLOC_ALIGN == 0);
        debug_assert!(size > HEADER_SIZE);

        self.region_start = start;
        self.region_size = size;

        let head = start as *mut BlockHeader;
        unsafe {
            (*head).next = ptr::null_mut();
            (*head).size = size - HEADER_SIZE;
            (*head).free = 1;
        }
        self.head = head;
    }

    /// First-fit allocation of `size` bytes. Null when nothing fits.
    fn alloc(&mut self, size: usize) -> *mut u8 {
        if size == 0 || self.head.is_null() {
            return ptr::null_mut();
        }
        let aligned = round_up(size);

        let mut curr = self.head;
        while !curr.is_null() {
            // SAFETY: every pointer in the list refers to a live header
            // inside the arena.
            unsafe {
                if (*curr).free == 1 && (*curr).size >= aligned {
                    // Split when the slack can host a header plus at least
                    // one granule of payload.
                    if (*curr).size >= aligned + HEADER_SIZE + ALLOC_ALIGN {
                        let new_block =
                            (curr as usize + HEADER_SIZE + aligned) as *mut BlockHeader;
                        (*new_block).size = (*curr).size - aligned - HEADER_SIZE;
                        (*new_block).free = 1;
                        (*new_block).next = (*curr).next;

                        (*curr).size = aligned;
                        (*curr).next = new_block;
                    }
                    (*curr).free = 0;
                    return (curr as usize + HEADER_SIZE) as *mut u8;
                }
                curr = (*curr).next;
            }
        }

        ptr::null_mut()
    }

    /// Returns a payload to the arena, coalescing with both neighbors.
    ///
    /// # Safety
    /// `ptr` must have come from `alloc` on this heap and not been freed
    /// since (double-free and foreign pointers are undefined behavior, as
    /// for any allocator).
    unsafe fn free(&mut self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        let header = (ptr as usize - HEADER_SIZE) as *mut BlockHeader;
        unsafe {
            (*header).free = 1;

            // Absorb the successor while it is free.
            let next = (*header).next;
            if !next.is_null() && (*next).free == 1 {
                (*header).size += HEADER_SIZE + (*next).size;
                (*header).next = (*next).next;
            }

            // Find the predecessor; absorb into it when free.
            if header != self.head {
                let mut prev = self.head;
                while !prev.is_null() && (*prev).next != header {
                    prev = (*prev).next;
                }
                if !prev.is_null() && (*prev).free == 1 {
                    (*prev).size += HEADER_SIZE + (*header).size;
                    (*prev).next = (*header).next;
                }
            }
        }
    }

    /// Walks the list and returns `(payload_size, is_free)` per block.
    #[cfg(test)]
    fn blocks(&self) -> std::vec::Vec<(usize, bool)> {
        let mut out = std::vec::Vec::new();
        let mut curr = self.head;
        while !curr.is_null() {
            unsafe {
                out.push(((*curr).size, (*curr).free == 1));
                curr = (*curr).next;
            }
        }
        out
    }
}

// =============================================================================
// Global allocator
// =============================================================================

/// The kernel's global heap allocator: the free-list heap behind the
/// IRQ-saving spinlock, which also satisfies `GlobalAlloc`'s `Sync` bound.
pub struct KernelAllocator {
    inner: SpinLock<Heap>,
}

impl KernelAllocator {
    const fn new() -> Self {
        Self {
            inner: SpinLock::new(Heap::new()),
        }
    }
}

// SAFETY: the SpinLock serializes all list mutation; payloads are 8-aligned
// which satisfies every layout the kernel allocates (larger alignments are
// refused with null).
unsafe impl GlobalAlloc for KernelAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > ALLOC_ALIGN {
            return ptr::null_mut();
        }
        self.inner.lock().alloc(layout.size().max(1))
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        unsafe { self.inner.lock().free(ptr) }
    }
}

/// The global kernel heap. Registered as the Rust allocator only on the
/// bare-metal build; host test builds keep the host allocator and exercise
/// explicit `Heap` instances instead.
#[cfg_attr(target_os = "none", global_allocator)]
static ALLOCATOR: KernelAllocator = KernelAllocator::new();

// =============================================================================
// Module API
// =============================================================================

/// Initializes the kernel heap over `[start, start + size)`.
///
/// # Safety
/// The region must be mapped, writable, 8-aligned, and unused by anything
/// else. Must be called exactly once, after the VMM maps the heap window.
pub unsafe fn init(start: usize, size: usize) {
    unsafe { ALLOCATOR.inner.lock().init(start, size) }
}

/// Allocates `size` bytes from the kernel heap.
///
/// The returned pointer is 8-aligned. Returns null (and logs) when no free
/// block can satisfy the request.
pub fn kmalloc(size: usize) -> *mut u8 {
    let ptr = ALLOCATOR.inner.lock().alloc(size);
    if ptr.is_null() {
        klog::warn!("OOM: kmalloc({}) failed", size);
    }
    ptr
}

/// Frees a pointer previously returned by [`kmalloc`]. Null is a no-op.
///
/// # Safety
/// `ptr` must be null or a live `kmalloc` result; freeing anything else
/// (or freeing twice) is undefined behavior.
pub unsafe fn kfree(ptr: *mut u8) {
    unsafe { ALLOCATOR.inner.lock().free(ptr) }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Runs `f` against a fresh heap built over a host-allocated buffer.
    fn with_test_heap<F: FnOnce(&mut Heap)>(size: usize, f: F) {
        let layout = Layout::from_size_align(size, ALLOC_ALIGN).unwrap();
        let buf = unsafe { std::alloc::alloc_zeroed(layout) };
        assert!(!buf.is_null());
        let mut heap = Heap::new();
        unsafe { heap.init(buf as usize, size) };
        f(&mut heap);
        unsafe { std::alloc::dealloc(buf, layout) };
    }

    /// Payload bytes + header bytes across all blocks must equal the arena.
    fn assert_conserved(heap: &Heap, region_size: usize) {
        let blocks = heap.blocks();
        let total: usize = blocks.iter().map(|(size, _)| size + HEADER_SIZE).sum();
        assert_eq!(total, region_size, "arena bytes lost or invented");
    }

    /// No two neighboring blocks may both be free.
    fn assert_coalesced(heap: &Heap) {
        let blocks = heap.blocks();
        for pair in blocks.windows(2) {
            assert!(
                !(pair[0].1 && pair[1].1),
                "adjacent free blocks left behind: {:?}",
                blocks
            );
        }
    }

    #[test]
    fn header_is_multiple_of_granule() {
        assert_eq!(HEADER_SIZE % ALLOC_ALIGN, 0);
    }

    #[test]
    fn fresh_heap_is_one_free_block() {
        with_test_heap(4096, |heap| {
            assert_eq!(heap.blocks(), vec![(4096 - HEADER_SIZE, true)]);
        });
    }

    #[test]
    fn allocations_are_aligned() {
        with_test_heap(4096, |heap| {
            for size in [1, 3, 8, 10, 17, 100] {
                let p = heap.alloc(size);
                assert!(!p.is_null());
                assert_eq!(p as usize % ALLOC_ALIGN, 0, "kmalloc({}) unaligned", size);
            }
        });
    }

    #[test]
    fn two_small_allocations_are_spaced_by_rounded_size() {
        // kmalloc(10) rounds to 16, so the second payload begins
        // 16 + HEADER_SIZE past the first.
        with_test_heap(4096, |heap| {
            let a = heap.alloc(10) as usize;
            let b = heap.alloc(20) as usize;
            assert_eq!(b - a, 16 + HEADER_SIZE);
        });
    }

    #[test]
    fn free_in_allocation_order_restores_single_block() {
        with_test_heap(4096, |heap| {
            let a = heap.alloc(10);
            let b = heap.alloc(20);
            unsafe {
                heap.free(a);
                heap.free(b);
            }
            assert_eq!(heap.blocks(), vec![(4096 - HEADER_SIZE, true)]);
        });
    }

    #[test]
    fn free_in_reverse_order_restores_single_block() {
        with_test_heap(4096, |heap| {
            let a = heap.alloc(10);
            let b = heap.alloc(20);
            unsafe {
                heap.free(b);
                heap.free(a);
            }
            assert_eq!(heap.blocks(), vec![(4096 - HEADER_SIZE, true)]);
        });
    }

    #[test]
    fn conservation_and_coalescing_hold_under_churn() {
        with_test_heap(8192, |heap| {
            let mut live = std::vec::Vec::new();
            for size in [24, 100, 8, 56, 300, 16] {
                live.push(heap.alloc(size));
            }
            assert_conserved(heap, 8192);
            // Free every other block, then the rest.
            for (i, &p) in live.iter().enumerate() {
                if i % 2 == 0 {
                    unsafe { heap.free(p) };
                }
            }
            assert_conserved(heap, 8192);
            assert_coalesced(heap);
            for (i, &p) in live.iter().enumerate() {
                if i % 2 == 1 {
                    unsafe { heap.free(p) };
                }
            }
            assert_conserved(heap, 8192);
            assert_coalesced(heap);
            assert_eq!(heap.blocks().len(), 1);
        });
    }

    #[test]
    fn exact_fit_does_not_split() {
        with_test_heap(4096, |heap| {
            let a = heap.alloc(64);
            assert!(!a.is_null());
            let blocks = heap.blocks();
            assert_eq!(blocks[0], (64, false));
            unsafe { heap.free(a) };
            // Now carve a block exactly the size of the first one again:
            // too little slack for a split must leave the block whole.
            let b = heap.alloc(64);
            let c = heap.alloc(32);
            unsafe { heap.free(b) };
            let d = heap.alloc(64 - ALLOC_ALIGN);
            // d reuses b's 64-byte block without splitting (slack of 8
            // cannot host a header plus a granule).
            assert_eq!(d, b);
            assert_eq!(heap.blocks()[0], (64, false));
            unsafe {
                heap.free(c);
                heap.free(d);
            }
        });
    }

    #[test]
    fn oversized_request_returns_null() {
        with_test_heap(1024, |heap| {
            assert!(heap.alloc(4096).is_null());
        });
    }

    #[test]
    fn zero_size_returns_null() {
        with_test_heap(1024, |heap| {
            assert!(heap.alloc(0).is_null());
        });
    }

    #[test]
    fn free_null_is_noop() {
        with_test_heap(1024, |heap| {
            unsafe { heap.free(core::ptr::null_mut()) };
            assert_eq!(heap.blocks().len(), 1);
        });
    }

    #[test]
    fn first_fit_prefers_lowest_block() {
        with_test_heap(8192, |heap| {
            let a = heap.alloc(128);
            let _b = heap.alloc(128);
            unsafe { heap.free(a) };
            // The freed low block satisfies the next small request.
            let c = heap.alloc(64);
            assert_eq!(c, a);
        });
    }
}
