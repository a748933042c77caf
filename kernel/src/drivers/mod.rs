//! In-tree device drivers: the VGA text terminal, the status line, and
//! the keyboard-driven shell.

pub mod statusline;

#[cfg(target_arch = "x86")]
pub mod shell;
#[cfg(target_arch = "x86")]
pub mod terminal;
