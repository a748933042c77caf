// =============================================================================
// FerrumOS — IRQ-Saving Ticket Spinlock
// =============================================================================
//
// Mutual exclusion for kernel singletons that both tasks and interrupt
// handlers touch (terminal, PMM, heap, process table).
//
// On this single-CPU kernel the lock itself never spins: the real work is
// the interrupt discipline. Acquiring disables interrupts and the guard
// restores the previous IF state on release, so the pattern
//
//   1. task takes lock L with interrupts enabled
//   2. timer fires mid-critical-section
//   3. handler takes lock L
//   4. deadlock
//
// cannot occur — step 2 is impossible while the lock is held. Nested
// lock/unlock pairs work because each guard restores the state it saw.
//
// =============================================================================

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicU32, Ordering};

/// A ticket spinlock that disables interrupts while held.
pub struct SpinLock<T> {
    /// The next ticket to be dispensed.
    next_ticket: AtomicU32,

    /// The ticket number currently being served.
    now_serving: AtomicU32,

    /// The protected data. UnsafeCell because we mutate through a shared
    /// reference; the lock provides exclusivity at runtime.
    data: UnsafeCell<T>,
}

// SAFETY: the lock serializes all access to the inner data.
unsafe impl<T: Send> Send for SpinLock<T> {}
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    /// Creates a new unlocked spinlock, usable in statics.
    pub const fn new(value: T) -> Self {
        Self {
            next_ticket: AtomicU32::new(0),
            now_serving: AtomicU32::new(0),
            data: UnsafeCell::new(value),
        }
    }

    /// Acquires the lock, disabling interrupts first.
    ///
    /// Returns a guard giving `Deref`/`DerefMut` access; dropping it
    /// releases the lock and restores the saved interrupt state.
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        let irq_was_enabled = interrupts_enabled();
        disable_interrupts();

        let my_ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        while self.now_serving.load(Ordering::Acquire) != my_ticket {
            core::hint::spin_loop();
        }

        SpinLockGuard {
            lock: self,
            irq_was_enabled,
        }
    }
}

/// RAII guard for a held spinlock. Interrupts stay off until drop.
pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
    irq_was_enabled: bool,
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: we hold the lock.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: we hold the lock.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        // Release ordering publishes our writes before the next holder
        // sees the incremented ticket.
        self.lock.now_serving.fetch_add(1, Ordering::Release);

        if self.irq_was_enabled {
            enable_interrupts();
        }
    }
}

// =============================================================================
// Interrupt state management
// =============================================================================

/// Whether maskable interrupts are enabled (EFLAGS.IF, bit 9).
#[cfg(target_arch = "x86")]
#[inline(always)]
fn interrupts_enabled() -> bool {
    let eflags: u32;
    // SAFETY: reading EFLAGS is a side-effect-free observation.
    unsafe {
        core::arch::asm!(
            "pushfd",
            "pop {}",
            out(reg) eflags,
            options(nomem, preserves_flags)
        );
    }
    eflags & (1 << 9) != 0
}

#[cfg(target_arch = "x86")]
#[inline(always)]
fn disable_interrupts() {
    // SAFETY: the matching guard drop restores the saved state.
    unsafe {
        core::arch::asm!("cli", options(nomem, nostack));
    }
}

#[cfg(target_arch = "x86")]
#[inline(always)]
fn enable_interrupts() {
    // SAFETY: only called when restoring a previously-enabled state.
    unsafe {
        core::arch::asm!("sti", options(nomem, nostack));
    }
}

// Host builds (unit tests) have no interrupt flag to manage; the ticket
// protocol alone provides the mutual exclusion the tests need.
#[cfg(not(target_arch = "x86"))]
#[inline(always)]
fn interrupts_enabled() -> bool {
    false
}

#[cfg(not(target_arch = "x86"))]
#[inline(always)]
fn disable_interrupts() {}

#[cfg(not(target_arch = "x86"))]
#[inline(always)]
fn enable_interrupts() {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_gives_exclusive_mutation() {
        let lock = SpinLock::new(0u32);
        {
            let mut guard = lock.lock();
            *guard += 41;
            *guard += 1;
        }
        assert_eq!(*lock.lock(), 42);
    }

    #[test]
    fn sequential_relock_works() {
        let lock = SpinLock::new(0u32);
        for _ in 0..100 {
            *lock.lock() += 1;
        }
        assert_eq!(*lock.lock(), 100);
    }

    #[test]
    fn contended_from_threads() {
        use std::sync::Arc;

        let lock = Arc::new(SpinLock::new(0u64));
        let mut handles = std::vec::Vec::new();
        for _ in 0..4 {
            let lock = lock.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..1000 {
                    *lock.lock() += 1;
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*lock.lock(), 4000);
    }
}
