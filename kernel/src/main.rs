// =============================================================================
// FerrumOS — Kernel Entry
// =============================================================================
//
// The boot loader drops us here in 32-bit protected mode with paging off,
// interrupts off, and the image loaded at its link-time address (1 MiB).
// `_start` installs the boot stack and calls `kmain`, which brings the
// layers up in dependency order, spawns the demo tasks, and turns on
// interrupts; from then on everything is event-driven.
//
// On the host this crate builds as a normal binary so the pure nucleus
// logic (allocators, paging math, scheduler ring, VFS, ramdisk) can be
// unit-tested with `cargo test`; all hardware touching code is gated on
// `target_arch = "x86"`.
//
// =============================================================================

#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

extern crate alloc;

mod arch;
mod drivers;
mod fs;
mod interrupts;
mod memory;
mod sync;
#[cfg(target_arch = "x86")]
mod syscall;
mod task;

#[cfg(target_arch = "x86")]
use drivers::terminal;

// =============================================================================
// Boot: Multiboot header, boot stack, _start
// =============================================================================

#[cfg(target_arch = "x86")]
core::arch::global_asm!(
    r#"
    .section .multiboot
    .align 4
    .long 0x1BADB002
    .long 0
    .long -(0x1BADB002)

    .section .bss
    .align 16
    boot_stack_bottom:
    .skip 16384
    .global boot_stack_top
    boot_stack_top:

    .section .text
    .global _start
    _start:
        mov esp, offset boot_stack_top
        cli
        call kmain
    2:
        hlt
        jmp 2b
    "#
);

#[cfg(target_arch = "x86")]
extern "C" {
    /// Top of the 16 KiB boot stack (see the assembly above).
    static boot_stack_top: u8;
    /// Start of the kernel image (linker script).
    static _kernel_start: u8;
    /// End of the kernel image (linker script).
    static _kernel_end: u8;
}

// =============================================================================
// kmain
// =============================================================================

#[cfg(target_arch = "x86")]
#[no_mangle]
pub extern "C" fn kmain() -> ! {
    klog::init();
    terminal::init();
    klog::info!("FerrumOS booting");

    let boot_stack = unsafe { core::ptr::addr_of!(boot_stack_top) as usize };
    let kernel_start = unsafe { core::ptr::addr_of!(_kernel_start) as usize };
    let kernel_end = unsafe { core::ptr::addr_of!(_kernel_end) as usize };
    klog::debug!(
        "kernel image {:#010x}..{:#010x}, boot stack top {:#010x}",
        kernel_start,
        kernel_end,
        boot_stack
    );

    // Descriptor tables first: the TSS starts out pointing at the boot
    // stack, and exception gates should be live before anything faults.
    arch::gdt::init(boot_stack as u32);
    terminal::write_str("GDT initialized successfully!\n");

    interrupts::idt_init();
    interrupts::isr_init();
    terminal::write_str("IDT initialized successfully!\n");

    // Physical memory, the address space, and the heap, in that order.
    memory::pmm::init(kernel_start, kernel_end);
    terminal::write_str("PMM initialized\n");
    terminal::write_str("Total pages: ");
    terminal::write_dec(memory::pmm::total_pages() as u32);
    terminal::write_str("\nFree pages: ");
    terminal::write_dec(memory::pmm::free_pages() as u32);
    terminal::put_char(b'\n');

    memory::vmm::init();

    // SAFETY: the VMM just mapped the heap window RW and nothing else
    // uses it.
    unsafe { memory::heap::init(memory::KHEAP_START, memory::KHEAP_SIZE) };
    terminal::write_str("Heap initialized at 0xD0000000 (1MB)\n");

    // Hardware interrupts: PIC remap, PIT at 100 Hz, keyboard decode.
    interrupts::irq_init();
    interrupts::pit_init(100);
    khal::keyboard::init();

    // Mount the ramdisk and show it works.
    terminal::write_str("Building fake initrd image...\n");
    fs::vfs::set_root(fs::initrd::init());

    terminal::write_str("Listing files in /:\n");
    if let Some(root) = fs::vfs::root() {
        let mut index = 0;
        while let Some(node) = fs::vfs::readdir(root, index) {
            terminal::write_str("Found: ");
            terminal::write_str(&node.name);
            terminal::put_char(b'\n');
            index += 1;
        }

        if let Some(hello) = fs::vfs::finddir(root, "hello.txt") {
            let mut buf = [0u8; 32];
            let n = fs::vfs::read(&hello, 0, 32, &mut buf);
            terminal::write_str("Content: ");
            for &b in &buf[..n as usize] {
                if b != 0 {
                    terminal::put_char(b);
                }
            }
            terminal::put_char(b'\n');
        }
    }

    // Multitasking: the boot flow becomes the idle task, then the demo
    // tasks join the ring.
    task::process::init(boot_stack);
    task::process::create(task_a, "task_a");
    task::process::create(task_b, "task_b");
    task::process::create_user(user_task, "user_ring3");

    drivers::shell::init();

    klog::info!("boot complete, enabling interrupts");
    arch::enable_interrupts();

    // The idle task: PID 0, always Ready, never anything to do.
    loop {
        arch::halt();
    }
}

// =============================================================================
// Demo tasks
// =============================================================================

/// Kernel task: prints its marker roughly once a second at 100 Hz.
#[cfg(target_arch = "x86")]
extern "C" fn task_a() -> ! {
    loop {
        terminal::write_str(" A ");
        for _ in 0..100 {
            arch::halt();
        }
    }
}

#[cfg(target_arch = "x86")]
extern "C" fn task_b() -> ! {
    loop {
        terminal::write_str(" B ");
        for _ in 0..100 {
            arch::halt();
        }
    }
}

/// Ring 3 task: exercises the write and sleep syscalls. No privileged
/// instructions here — `hlt` would fault in user mode; the sleep syscall
/// is how it yields the CPU.
#[cfg(target_arch = "x86")]
extern "C" fn user_task() -> ! {
    static MSG: &[u8] = b" [Syscall from Ring 3!] \0";
    loop {
        unsafe {
            // write(MSG)
            core::arch::asm!(
                "push ebx",
                "mov eax, 1",
                "mov ebx, {0}",
                "int 0x80",
                "pop ebx",
                in(reg) MSG.as_ptr(),
                out("eax") _,
            );
            // sleep(500 ms)
            core::arch::asm!(
                "push ebx",
                "mov eax, 3",
                "mov ebx, 500",
                "int 0x80",
                "pop ebx",
                out("eax") _,
            );
        }
    }
}

// =============================================================================
// Panic
// =============================================================================

#[cfg(target_os = "none")]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    klog::error!("kernel panic: {}", info);
    terminal::write_str("\n*** KERNEL PANIC ***\n");
    arch::halt_loop()
}

/// Host builds (unit tests) replace the kernel entry with the test
/// harness; this placeholder only satisfies the binary target.
#[cfg(not(target_os = "none"))]
#[allow(dead_code)]
fn main() {}
