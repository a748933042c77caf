//! 8253/8254 PIT (Programmable Interval Timer) driver.
//!
//! Channel 0 is wired to IRQ0 and drives the scheduler tick. The input
//! clock runs at 1.193180 MHz; programming a divisor of `1193180 / hz`
//! produces interrupts at roughly `hz` per second.

use crate::port::outb;

/// PIT channel 0 data port.
const PIT_CHANNEL0: u16 = 0x40;
/// PIT mode/command port.
const PIT_COMMAND: u16 = 0x43;

/// Command byte: channel 0, lobyte/hibyte access, square wave mode 3.
const PIT_SQUARE_WAVE: u8 = 0x36;

/// Input clock frequency in Hz.
pub const PIT_BASE_HZ: u32 = 1_193_180;

/// Program channel 0 to fire at roughly `hz` interrupts per second.
///
/// The divisor is truncated to 16 bits; rates below ~19 Hz are not
/// representable and saturate.
pub fn init(hz: u32) {
    let divisor = (PIT_BASE_HZ / hz.max(19)) as u16;
    unsafe {
        outb(PIT_COMMAND, PIT_SQUARE_WAVE);
        outb(PIT_CHANNEL0, (divisor & 0xFF) as u8);
        outb(PIT_CHANNEL0, (divisor >> 8) as u8);
    }
}
