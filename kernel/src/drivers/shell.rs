// =============================================================================
// FerrumOS — Kernel Shell
// =============================================================================
//
// A line editor fed one character at a time by the keyboard interrupt.
// Commands run to completion inside the handler — they only touch the
// terminal and the VFS, both short operations.
//
// `ls` and `cat` consult the VFS for real: the root directory comes from
// the ramdisk driver mounted at boot.
//
// =============================================================================

use crate::drivers::terminal;
use crate::fs::vfs;
use crate::sync::SpinLock;

const CMD_BUF_SIZE: usize = 256;

struct Shell {
    buf: [u8; CMD_BUF_SIZE],
    len: usize,
}

static SHELL: SpinLock<Shell> = SpinLock::new(Shell {
    buf: [0; CMD_BUF_SIZE],
    len: 0,
});

fn prompt() {
    terminal::write_str("root@ferrum /> ");
}

/// Print the banner and the first prompt.
pub fn init() {
    terminal::write_str("\nWelcome to the FerrumOS shell!\n");
    terminal::write_str("Type 'help' for commands.\n");
    SHELL.lock().len = 0;
    prompt();
}

/// Feed one decoded character from the keyboard handler.
pub fn input(ch: char) {
    if !ch.is_ascii() {
        return;
    }
    let ch = ch as u8;
    match ch {
        b'\n' => {
            let line = {
                let mut shell = SHELL.lock();
                let len = shell.len;
                shell.len = 0;
                let mut line = [0u8; CMD_BUF_SIZE];
                line[..len].copy_from_slice(&shell.buf[..len]);
                (line, len)
            };
            terminal::put_char(b'\n');
            execute(core::str::from_utf8(&line.0[..line.1]).unwrap_or(""));
            prompt();
        }
        // Backspace: drop the last buffered byte and erase it on screen.
        0x08 => {
            let mut shell = SHELL.lock();
            if shell.len > 0 {
                shell.len -= 1;
                drop(shell);
                terminal::put_char(0x08);
            }
        }
        _ => {
            let mut shell = SHELL.lock();
            if shell.len < CMD_BUF_SIZE - 1 {
                let len = shell.len;
                shell.buf[len] = ch;
                shell.len += 1;
                drop(shell);
                terminal::put_char(ch);
            }
        }
    }
}

/// Split a line at the first space: command word, then trimmed argument.
fn split(line: &str) -> (&str, &str) {
    match line.find(' ') {
        Some(at) => (&line[..at], line[at + 1..].trim_start_matches(' ')),
        None => (line, ""),
    }
}

fn execute(line: &str) {
    let (cmd, args) = split(line);
    match cmd {
        "" => {}
        "help" => cmd_help(),
        "clear" => terminal::clear(),
        "reboot" => cmd_reboot(),
        "ls" => cmd_ls(),
        "cat" => cmd_cat(args),
        _ => {
            terminal::write_str("Unknown command: ");
            terminal::write_str(cmd);
            terminal::put_char(b'\n');
        }
    }
}

fn cmd_help() {
    terminal::write_str("Available commands:\n");
    terminal::write_str("  help     - Show this list\n");
    terminal::write_str("  clear    - Clear screen\n");
    terminal::write_str("  reboot   - Reboot system\n");
    terminal::write_str("  ls       - List files\n");
    terminal::write_str("  cat <f>  - Print file content\n");
}

fn cmd_ls() {
    let Some(root) = vfs::root() else {
        terminal::write_str("No filesystem mounted.\n");
        return;
    };
    terminal::write_str("Listing files:\n");
    let mut index = 0;
    while let Some(node) = vfs::readdir(root, index) {
        terminal::write_str("  ");
        terminal::write_str(&node.name);
        terminal::put_char(b'\n');
        index += 1;
    }
}

fn cmd_cat(args: &str) {
    if args.is_empty() {
        terminal::write_str("Usage: cat <filename>\n");
        return;
    }
    let Some(root) = vfs::root() else {
        terminal::write_str("No filesystem mounted.\n");
        return;
    };
    let Some(node) = vfs::finddir(root, args) else {
        terminal::write_str("File not found.\n");
        return;
    };

    let mut offset = 0u32;
    let mut buf = [0u8; 64];
    loop {
        let n = vfs::read(&node, offset, buf.len() as u32, &mut buf);
        if n == 0 {
            break;
        }
        for &b in &buf[..n as usize] {
            if b != 0 {
                terminal::put_char(b);
            }
        }
        offset += n;
    }
    terminal::put_char(b'\n');
}

/// Pulse the keyboard controller's reset line.
fn cmd_reboot() {
    terminal::write_str("Rebooting...\n");
    unsafe {
        // Wait for the controller's input buffer to drain, then send the
        // reset command.
        while khal::port::inb(khal::keyboard::PS2_STATUS) & 0x02 != 0 {
            core::hint::spin_loop();
        }
        khal::port::outb(khal::keyboard::PS2_STATUS, 0xFE);
    }
    crate::arch::halt_loop();
}
