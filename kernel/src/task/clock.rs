//! Kernel tick counter.
//!
//! Monotonic logical time, incremented on every PIT tick. At 100 Hz one
//! tick is 10 ms, which is the unit the sleep syscall converts into.

use core::sync::atomic::{AtomicU32, Ordering};

static TICKS: AtomicU32 = AtomicU32::new(0);

/// Called by the timer interrupt. Returns the new tick count.
#[inline]
pub fn tick() -> u32 {
    TICKS.fetch_add(1, Ordering::Relaxed) + 1
}

/// Current tick count.
#[allow(dead_code)]
#[inline]
pub fn now() -> u32 {
    TICKS.load(Ordering::Relaxed)
}
