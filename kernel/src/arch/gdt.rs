//! Global Descriptor Table.
//!
//! Six entries, in this order: null, kernel code, kernel data, user code,
//! user data, TSS — all code/data segments flat over the full 4 GiB so
//! segmentation stays out of the way and paging does the protection work.

use core::arch::asm;
use core::mem::size_of;
use core::sync::atomic::{AtomicPtr, Ordering};

use spin::Once;

use super::selectors;
use super::tss::Tss;

/// A segment descriptor in the GDT.
#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
struct GdtEntry {
    limit_low: u16,
    base_low: u16,
    base_middle: u8,
    access: u8,
    granularity: u8,
    base_high: u8,
}

impl GdtEntry {
    const fn null() -> Self {
        Self {
            limit_low: 0,
            base_low: 0,
            base_middle: 0,
            access: 0,
            granularity: 0,
            base_high: 0,
        }
    }

    /// Encode a descriptor from base/limit/access/granularity, the same
    /// split the CPU documentation uses.
    fn new(base: u32, limit: u32, access: u8, granularity: u8) -> Self {
        Self {
            limit_low: (limit & 0xFFFF) as u16,
            base_low: (base & 0xFFFF) as u16,
            base_middle: ((base >> 16) & 0xFF) as u8,
            access,
            granularity: (((limit >> 16) & 0x0F) as u8) | (granularity & 0xF0),
            base_high: ((base >> 24) & 0xFF) as u8,
        }
    }
}

/// The GDT itself.
#[repr(C, align(16))]
pub struct Gdt {
    entries: [GdtEntry; 6],
}

/// Pointer structure for the `lgdt` instruction.
#[repr(C, packed)]
struct GdtPointer {
    limit: u16,
    base: u32,
}

// Access bytes: P | DPL | S | type. 0x9A/0x92 are Ring 0 code/data,
// 0xFA/0xF2 the Ring 3 twins, 0x89 an available 32-bit TSS.
const ACCESS_KERNEL_CODE: u8 = 0x9A;
const ACCESS_KERNEL_DATA: u8 = 0x92;
const ACCESS_USER_CODE: u8 = 0xFA;
const ACCESS_USER_DATA: u8 = 0xF2;
const ACCESS_TSS: u8 = 0x89;

/// Granularity byte for flat segments: 4 KiB granularity, 32-bit.
const GRAN_FLAT_4K: u8 = 0xCF;

static TSS: Once<Tss> = Once::new();
static GDT: Once<Gdt> = Once::new();

/// Raw pointer to the live TSS for post-init ESP0 updates.
static TSS_PTR: AtomicPtr<Tss> = AtomicPtr::new(core::ptr::null_mut());

/// Build and load the GDT and TSS.
///
/// `esp0` is the initial Ring 0 stack (the boot stack); the scheduler
/// replaces it per-task via [`set_kernel_stack`]. Must be called once,
/// before interrupts are enabled.
pub fn init(esp0: u32) {
    let tss_ref = TSS.call_once(|| {
        let mut tss = Tss::new();
        tss.init(selectors::KERNEL_DATA, esp0);
        tss
    });
    TSS_PTR.store(tss_ref as *const Tss as *mut Tss, Ordering::Relaxed);

    let tss_base = tss_ref as *const Tss as u32;
    let tss_limit = (size_of::<Tss>() - 1) as u32;

    let gdt_ref = GDT.call_once(|| Gdt {
        entries: [
            GdtEntry::null(),                                          // 0x00
            GdtEntry::new(0, 0xFFFF_FFFF, ACCESS_KERNEL_CODE, GRAN_FLAT_4K), // 0x08
            GdtEntry::new(0, 0xFFFF_FFFF, ACCESS_KERNEL_DATA, GRAN_FLAT_4K), // 0x10
            GdtEntry::new(0, 0xFFFF_FFFF, ACCESS_USER_CODE, GRAN_FLAT_4K),   // 0x18
            GdtEntry::new(0, 0xFFFF_FFFF, ACCESS_USER_DATA, GRAN_FLAT_4K),   // 0x20
            GdtEntry::new(tss_base, tss_limit, ACCESS_TSS, 0x00),      // 0x28
        ],
    });

    // SAFETY: both tables live in `Once` cells with static addresses; the
    // selectors below match the entry layout just built.
    unsafe {
        load(gdt_ref);
    }

    klog::debug!(
        "gdt: loaded (kcode={:#04x} kdata={:#04x} ucode={:#04x} udata={:#04x} tss={:#04x})",
        selectors::KERNEL_CODE,
        selectors::KERNEL_DATA,
        selectors::USER_CODE & !3,
        selectors::USER_DATA & !3,
        selectors::TSS
    );
}

/// Point TSS.ESP0 at the given kernel stack top. Called by the scheduler
/// on every context switch.
pub fn set_kernel_stack(esp0: u32) {
    let tss = TSS_PTR.load(Ordering::Relaxed);
    if !tss.is_null() {
        // SAFETY: TSS_PTR was set from the live Once cell.
        unsafe { Tss::set_esp0(tss, esp0) };
    }
}

/// Load the table, reload every segment register, and load the task
/// register.
unsafe fn load(gdt: &'static Gdt) {
    let ptr = GdtPointer {
        limit: (size_of::<Gdt>() - 1) as u16,
        base: gdt as *const _ as u32,
    };

    unsafe {
        asm!(
            "lgdt [{}]",
            in(reg) &ptr,
            options(readonly, nostack, preserves_flags)
        );

        // Reload CS with a far return: push the new selector and the
        // continuation address, then retf pops both.
        asm!(
            "push {sel}",
            "lea {tmp}, [2f]",
            "push {tmp}",
            "retf",
            "2:",
            sel = in(reg) selectors::KERNEL_CODE as u32,
            tmp = lateout(reg) _,
            options(preserves_flags)
        );

        // Reload the data segment registers.
        asm!(
            "mov ds, {sel:x}",
            "mov es, {sel:x}",
            "mov fs, {sel:x}",
            "mov gs, {sel:x}",
            "mov ss, {sel:x}",
            sel = in(reg) selectors::KERNEL_DATA as u32,
            options(nostack, preserves_flags)
        );

        // Load the task register with the TSS selector.
        asm!(
            "ltr {sel:x}",
            sel = in(reg) selectors::TSS as u32,
            options(nostack, preserves_flags)
        );
    }
}
