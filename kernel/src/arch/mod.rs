//! Architecture support: privileged instructions and descriptor tables.
//!
//! Everything that executes `cli`/`sti`/`hlt`, touches CR0/CR3, or loads
//! descriptor tables lives under this module, behind `target_arch = "x86"`
//! gates so the pure kernel logic stays host-buildable for unit tests.

#[cfg(target_arch = "x86")]
pub mod gdt;
#[cfg(target_arch = "x86")]
pub mod idt;
pub mod tss;

/// Segment selectors fixed by the GDT layout (see `gdt::init`).
pub mod selectors {
    /// Ring 0 code segment.
    pub const KERNEL_CODE: u16 = 0x08;
    /// Ring 0 data segment.
    pub const KERNEL_DATA: u16 = 0x10;
    /// Ring 3 code segment with RPL 3 (0x18 | 3).
    pub const USER_CODE: u16 = 0x1B;
    /// Ring 3 data segment with RPL 3 (0x20 | 3).
    pub const USER_DATA: u16 = 0x23;
    /// Task-state segment.
    pub const TSS: u16 = 0x28;
}

/// Enable maskable interrupts.
#[cfg(target_arch = "x86")]
#[inline]
pub fn enable_interrupts() {
    // SAFETY: interrupt gates and handlers are installed before kmain
    // reaches the first sti.
    unsafe {
        core::arch::asm!("sti", options(nomem, nostack));
    }
}

/// Disable maskable interrupts.
#[cfg(target_arch = "x86")]
#[allow(dead_code)]
#[inline]
pub fn disable_interrupts() {
    unsafe {
        core::arch::asm!("cli", options(nomem, nostack));
    }
}

/// Wait for the next interrupt.
#[cfg(target_arch = "x86")]
#[inline]
pub fn halt() {
    unsafe {
        core::arch::asm!("hlt", options(nomem, nostack));
    }
}

/// Halt forever with interrupts off. Terminal state for fatal errors.
#[cfg(target_arch = "x86")]
pub fn halt_loop() -> ! {
    loop {
        unsafe {
            core::arch::asm!("cli", "hlt", options(nomem, nostack));
        }
    }
}

/// Load CR3 with the physical address of a page directory.
///
/// # Safety
/// `pd_phys` must point at a fully built, frame-aligned page directory.
#[cfg(target_arch = "x86")]
#[inline]
pub unsafe fn set_page_directory(pd_phys: u32) {
    unsafe {
        core::arch::asm!(
            "mov cr3, {}",
            in(reg) pd_phys,
            options(nostack, preserves_flags)
        );
    }
}

/// Set CR0.PG, turning on paging.
///
/// # Safety
/// CR3 must already hold a valid page directory that identity-maps the
/// currently executing code.
#[cfg(target_arch = "x86")]
#[inline]
pub unsafe fn enable_paging() {
    unsafe {
        core::arch::asm!(
            "mov {tmp}, cr0",
            "or {tmp}, 0x80000000",
            "mov cr0, {tmp}",
            tmp = out(reg) _,
            options(nostack)
        );
    }
}
