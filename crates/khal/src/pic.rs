//! Legacy 8259 PIC (Programmable Interrupt Controller) driver.
//!
//! By default IRQ 0-7 are delivered on vectors 0x08-0x0F, overlapping the
//! CPU exception range, so the cascaded pair must be remapped before
//! interrupts are enabled. This kernel keeps the PIC as its interrupt
//! controller (no APIC): IRQ 0-15 land on vectors 32-47.

use crate::port::{inb, io_wait, outb};

/// I/O port addresses for the master PIC.
const PIC1_COMMAND: u16 = 0x20;
const PIC1_DATA: u16 = 0x21;

/// I/O port addresses for the slave PIC.
const PIC2_COMMAND: u16 = 0xA0;
const PIC2_DATA: u16 = 0xA1;

/// ICW1: begin initialization sequence.
const ICW1_INIT: u8 = 0x10;
/// ICW1: ICW4 will be sent.
const ICW1_ICW4: u8 = 0x01;
/// ICW4: 8086/88 mode.
const ICW4_8086: u8 = 0x01;

/// Vector base for IRQ 0-7 (master).
pub const PIC1_OFFSET: u8 = 32;
/// Vector base for IRQ 8-15 (slave).
pub const PIC2_OFFSET: u8 = 40;

/// End-of-interrupt command byte.
const PIC_EOI: u8 = 0x20;

/// Remap the 8259 pair to `PIC1_OFFSET`/`PIC2_OFFSET` and unmask only the
/// lines this kernel services: IRQ0 (PIT), IRQ1 (keyboard), and IRQ2 (the
/// slave cascade). Every other line stays masked.
pub fn remap() {
    unsafe {
        // ICW1: begin initialization (cascade mode, ICW4 needed)
        outb(PIC1_COMMAND, ICW1_INIT | ICW1_ICW4);
        io_wait();
        outb(PIC2_COMMAND, ICW1_INIT | ICW1_ICW4);
        io_wait();

        // ICW2: vector offsets
        outb(PIC1_DATA, PIC1_OFFSET);
        io_wait();
        outb(PIC2_DATA, PIC2_OFFSET);
        io_wait();

        // ICW3: master has a slave on IRQ2 (bit 2); slave cascade id = 2
        outb(PIC1_DATA, 4);
        io_wait();
        outb(PIC2_DATA, 2);
        io_wait();

        // ICW4: 8086 mode
        outb(PIC1_DATA, ICW4_8086);
        io_wait();
        outb(PIC2_DATA, ICW4_8086);
        io_wait();

        // Masks: 0xF8 = IRQ0/1/2 open on the master, everything else closed.
        outb(PIC1_DATA, 0xF8);
        outb(PIC2_DATA, 0xFF);
    }
}

/// Acknowledge an interrupt on the given remapped vector.
///
/// Interrupts that arrived through the slave (vector >= 40) need an EOI on
/// both controllers, slave first.
pub fn end_of_interrupt(vector: u32) {
    unsafe {
        if vector >= PIC2_OFFSET as u32 {
            outb(PIC2_COMMAND, PIC_EOI);
        }
        outb(PIC1_COMMAND, PIC_EOI);
    }
}

/// Read back the current master/slave mask pair (for diagnostics).
pub fn masks() -> (u8, u8) {
    unsafe { (inb(PIC1_DATA), inb(PIC2_DATA)) }
}
