// =============================================================================
// FerrumOS — Interrupt Dispatch
// =============================================================================
//
// Owns the IDT and the two Rust entry points the common stubs call:
//
//   exception_handler — vectors 0-31 plus the rerouted syscall vector 128.
//     Exceptions can fire before the terminal driver exists, so the "EXC
//     XX" banner is written straight into video memory; then the machine
//     halts. There is no in-kernel recovery from a CPU exception.
//
//   irq_handler — vectors 32-47. EOI goes to the PIC(s) first. The timer
//     drives the status line, the sleep queue, and the scheduler; the
//     keyboard feeds decoded characters to the shell; stray IRQs are
//     logged and ignored.
//
// Both return the frame pointer that the stub will restore from —
// returning a different frame than the input IS the context switch.
//
// =============================================================================

use core::ptr::write_volatile;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::arch::idt::{Idt, KERNEL_INTERRUPT_GATE, USER_INTERRUPT_GATE};
use crate::arch::{self, selectors};
use crate::drivers::{shell, terminal};
use crate::interrupts::frame::Registers;
use crate::interrupts::stubs;
use crate::memory::pmm;
use crate::sync::SpinLock;
use crate::syscall::{self, SYSCALL_VECTOR};
use crate::task::{clock, process};

static IDT: SpinLock<Idt> = SpinLock::new(Idt::new());

/// Programmed PIT rate in Hz, shown on the status line.
static PIT_RATE: AtomicU32 = AtomicU32::new(0);

/// Make codes accepted so far, shown on the status line.
static KEY_COUNT: AtomicU32 = AtomicU32::new(0);

/// Load the (initially all-placeholder) IDT.
pub fn idt_init() {
    // SAFETY: the table lives in a static; its address never changes.
    unsafe { IDT.lock().load() };
}

/// Register the exception stubs on vectors 0-31 and the DPL-3 syscall
/// gate on vector 128.
pub fn isr_init() {
    let mut idt = IDT.lock();
    for (vector, &stub) in stubs::exception_stubs().iter().enumerate() {
        idt.set_gate(
            vector as u8,
            stub,
            selectors::KERNEL_CODE,
            KERNEL_INTERRUPT_GATE,
        );
    }
    idt.set_gate(
        SYSCALL_VECTOR,
        stubs::syscall_stub(),
        selectors::KERNEL_CODE,
        USER_INTERRUPT_GATE,
    );
}

/// Remap the PIC and register the hardware interrupt stubs on 32-47.
pub fn irq_init() {
    khal::pic::remap();
    let (master_mask, slave_mask) = khal::pic::masks();
    klog::debug!(
        "pic: remapped to 0x20/0x28, masks {:#04x}/{:#04x}",
        master_mask,
        slave_mask
    );

    let mut idt = IDT.lock();
    for (i, &stub) in stubs::irq_stubs().iter().enumerate() {
        idt.set_gate(
            khal::pic::PIC1_OFFSET + i as u8,
            stub,
            selectors::KERNEL_CODE,
            KERNEL_INTERRUPT_GATE,
        );
    }
}

/// Program the PIT to `hz` scheduler ticks per second.
pub fn pit_init(hz: u32) {
    PIT_RATE.store(hz, Ordering::Relaxed);
    khal::pit::init(hz);
    klog::info!("pit: channel 0 at {} Hz", hz);
}

/// Current PIT rate (for the status line).
pub fn pit_rate() -> u32 {
    PIT_RATE.load(Ordering::Relaxed)
}

/// Accepted key presses so far (for the status line).
pub fn key_count() -> u32 {
    KEY_COUNT.load(Ordering::Relaxed)
}

// =============================================================================
// Rust entry points, called from the common stubs
// =============================================================================

/// Exceptions and the syscall vector.
#[no_mangle]
extern "C" fn exception_handler(frame: *mut Registers) -> *mut Registers {
    // SAFETY: the stub hands us a pointer to the frame it just pushed on
    // the active kernel stack.
    let regs = unsafe { &*frame };

    if regs.int_no == SYSCALL_VECTOR as u32 {
        return syscall::handle(frame);
    }

    // "EXC XX" straight into VGA memory — the terminal may not exist yet.
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    const ATTR: u16 = 0x0C00; // light red on black
    let banner = [
        b'E',
        b'X',
        b'C',
        b' ',
        HEX[((regs.int_no >> 4) & 0xF) as usize],
        HEX[(regs.int_no & 0xF) as usize],
    ];
    let vga = khal::vga::VGA_BUFFER as *mut u16;
    for (i, &ch) in banner.iter().enumerate() {
        // SAFETY: VGA text memory is identity-mapped and always writable.
        unsafe { write_volatile(vga.add(i), ch as u16 | ATTR) };
    }

    klog::error!(
        "exception {:#04x} err={:#010x} at {:#06x}:{:#010x}",
        regs.int_no,
        regs.err_code,
        regs.cs,
        regs.eip
    );
    arch::halt_loop();
}

/// Hardware interrupts (vectors 32-47).
#[no_mangle]
extern "C" fn irq_handler(frame: *mut Registers) -> *mut Registers {
    // SAFETY: as above — the frame lives on the active kernel stack.
    let int_no = unsafe { (*frame).int_no };

    // Acknowledge before handling; a second edge on the same line must not
    // be lost while we run (it stays pending until iretd re-enables IF).
    khal::pic::end_of_interrupt(int_no);

    match int_no {
        // IRQ0 — PIT heartbeat: status line, sleep queue, scheduler.
        32 => {
            let ticks = clock::tick();
            if ticks % 10 == 0 {
                terminal::draw_status(pit_rate(), key_count(), pmm::free_pages() as u32);
            }
            process::tick_sleepers();
            process::schedule(frame)
        }

        // IRQ1 — keyboard: decode, count make codes, feed the shell.
        33 => {
            // SAFETY: reading the PS/2 data port consumes the scancode the
            // controller latched for this interrupt.
            let scancode = unsafe { khal::port::inb(khal::keyboard::PS2_DATA) };
            if let Some(ch) = khal::keyboard::handle_scancode(scancode) {
                KEY_COUNT.fetch_add(1, Ordering::Relaxed);
                shell::input(ch);
            }
            frame
        }

        _ => {
            klog::debug!("Received IRQ: {:02X}", int_no);
            frame
        }
    }
}
