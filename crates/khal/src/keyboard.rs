//! PS/2 keyboard scancode decoding.
//!
//! Uses the `pc-keyboard` crate for Set-1 scancode decoding via its
//! three-layer state machine: scancode decoder → modifier tracker → layout
//! mapper. Shift, CapsLock (letters follow shift XOR caps), extended keys,
//! and key-release filtering all come from the state machine.
//!
//! The port read itself happens in the kernel's IRQ1 handler; this module
//! only turns raw scancode bytes into characters, which keeps the decode
//! logic testable without hardware.

use pc_keyboard::{layouts, DecodedKey, HandleControl, Keyboard, ScancodeSet1};
use spin::Mutex;

/// PS/2 controller data port — read scancodes here.
pub const PS2_DATA: u16 = 0x60;
/// PS/2 controller status/command port.
pub const PS2_STATUS: u16 = 0x64;

/// IRQ vector for the keyboard (PIC1 base 32 + IRQ1).
pub const KEYBOARD_VECTOR: u8 = 33;

/// The decoder state machine type used throughout.
type Decoder = Keyboard<layouts::Us104Key, ScancodeSet1>;

static KEYBOARD: Mutex<Option<Decoder>> = Mutex::new(None);

/// Construct a fresh Set-1 / US-layout decoder.
fn new_decoder() -> Decoder {
    Keyboard::new(
        ScancodeSet1::new(),
        layouts::Us104Key,
        HandleControl::MapLettersToUnicode,
    )
}

/// Initialise the global keyboard state machine. Must be called once before
/// [`handle_scancode`].
pub fn init() {
    *KEYBOARD.lock() = Some(new_decoder());
}

/// Feed one scancode byte through a decoder instance.
///
/// Returns `Some(char)` when the byte resolves to a printable character on
/// *press*. Break codes, modifier-only presses, and special keys return
/// `None`.
fn decode(kb: &mut Decoder, scancode: u8) -> Option<char> {
    if let Ok(Some(event)) = kb.add_byte(scancode) {
        if let Some(key) = kb.process_keyevent(event) {
            match key {
                DecodedKey::Unicode(ch) => return Some(ch),
                DecodedKey::RawKey(_) => return None,
            }
        }
    }
    None
}

/// Feed a raw scancode byte into the global state machine.
pub fn handle_scancode(scancode: u8) -> Option<char> {
    let mut guard = KEYBOARD.lock();
    let kb = guard.as_mut()?;
    decode(kb, scancode)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Set-1 make codes used below: 0x1E = 'a', 0x02 = '1', 0x1C = Enter,
    // 0x2A/0xAA = LShift press/release, 0x3A/0xBA = CapsLock press/release.

    #[test]
    fn plain_letter_decodes_lowercase() {
        let mut kb = new_decoder();
        assert_eq!(decode(&mut kb, 0x1E), Some('a'));
    }

    #[test]
    fn break_code_yields_nothing() {
        let mut kb = new_decoder();
        let _ = decode(&mut kb, 0x1E);
        assert_eq!(decode(&mut kb, 0x9E), None); // 'a' release
    }

    #[test]
    fn shift_uppercases_letters() {
        let mut kb = new_decoder();
        assert_eq!(decode(&mut kb, 0x2A), None); // shift down
        assert_eq!(decode(&mut kb, 0x1E), Some('A'));
        assert_eq!(decode(&mut kb, 0xAA), None); // shift up
        assert_eq!(decode(&mut kb, 0x1E), Some('a'));
    }

    #[test]
    fn caps_lock_xors_with_shift() {
        let mut kb = new_decoder();
        let _ = decode(&mut kb, 0x3A); // caps on
        let _ = decode(&mut kb, 0xBA);
        assert_eq!(decode(&mut kb, 0x1E), Some('A'));
        // Shift while caps is on flips back to lowercase.
        let _ = decode(&mut kb, 0x2A);
        assert_eq!(decode(&mut kb, 0x1E), Some('a'));
        let _ = decode(&mut kb, 0xAA);
    }

    #[test]
    fn enter_maps_to_newline() {
        let mut kb = new_decoder();
        assert_eq!(decode(&mut kb, 0x1C), Some('\n'));
    }

    #[test]
    fn digits_ignore_caps_lock() {
        let mut kb = new_decoder();
        let _ = decode(&mut kb, 0x3A);
        let _ = decode(&mut kb, 0xBA);
        assert_eq!(decode(&mut kb, 0x02), Some('1'));
    }
}
