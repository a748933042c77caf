//! Interrupt and exception plumbing.
//!
//! `frame` defines the register snapshot shared with the assembly stubs;
//! `stubs` generates the per-vector entry points; `dispatch` owns the IDT
//! and the Rust-side handlers.

pub mod frame;

#[cfg(target_arch = "x86")]
mod dispatch;
#[cfg(target_arch = "x86")]
pub mod stubs;

#[cfg(target_arch = "x86")]
pub use dispatch::{idt_init, irq_init, isr_init, key_count, pit_init, pit_rate};
