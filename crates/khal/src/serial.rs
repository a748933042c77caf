//! Serial port (COM1 UART 16550) driver.
//!
//! Polled output only — the UART never raises interrupts. This is the sink
//! behind the `klog` macros, so it must work from the first instruction of
//! `kmain` through every interrupt handler.

use core::fmt;
use spin::Mutex;

use crate::port::{inb, outb};

/// COM1 base port address.
const COM1_PORT: u16 = 0x3F8;

/// Serial port driver for COM1.
pub struct Serial {
    initialized: bool,
}

impl Serial {
    const fn new() -> Self {
        Self { initialized: false }
    }

    /// Initialize the serial port (115200 baud, 8N1, FIFO on, polled).
    pub fn init(&mut self) {
        unsafe {
            // Disable UART interrupts — we poll.
            outb(COM1_PORT + 1, 0x00);

            // Enable DLAB and set the divisor to 1 (115200 baud).
            outb(COM1_PORT + 3, 0x80);
            outb(COM1_PORT, 0x01);
            outb(COM1_PORT + 1, 0x00);

            // 8 bits, no parity, one stop bit (clears DLAB).
            outb(COM1_PORT + 3, 0x03);

            // Enable FIFO, clear it, 14-byte threshold.
            outb(COM1_PORT + 2, 0xC7);

            // DTR + RTS, interrupts gated off.
            outb(COM1_PORT + 4, 0x03);
        }
        self.initialized = true;
    }

    /// True once the transmit holding register is empty.
    fn transmit_empty(&self) -> bool {
        unsafe { inb(COM1_PORT + 5) & 0x20 != 0 }
    }

    /// Write a single byte, spinning until the UART accepts it.
    pub fn write_byte(&mut self, byte: u8) {
        if !self.initialized {
            return;
        }
        while !self.transmit_empty() {
            core::hint::spin_loop();
        }
        unsafe {
            outb(COM1_PORT, byte);
        }
    }
}

impl fmt::Write for Serial {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            // The UART wants CRLF line endings.
            if byte == b'\n' {
                self.write_byte(b'\r');
            }
            self.write_byte(byte);
        }
        Ok(())
    }
}

/// The global COM1 instance.
pub static SERIAL: Mutex<Serial> = Mutex::new(Serial::new());

/// Bring up COM1. Called once, very early in boot.
pub fn init() {
    SERIAL.lock().init();
}

/// Write a plain string to COM1.
pub fn write_str(s: &str) {
    use core::fmt::Write;
    let _ = SERIAL.lock().write_str(s);
}

/// Write formatted output to COM1.
pub fn write_fmt(args: fmt::Arguments) {
    use core::fmt::Write;
    let _ = SERIAL.lock().write_fmt(args);
}
