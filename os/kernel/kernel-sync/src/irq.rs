use crate::{SpinLock, SpinLockGuard};
use core::ops::{Deref, DerefMut};

/// Bit 9 of `EFLAGS`: interrupts enabled.
const EFLAGS_IF: u32 = 1 << 9;

/// A lock guard that also disables interrupts while held.
///
/// Created via [`SpinLock::lock_irq`], it:
///
/// 1. saves the current interrupt state and disables interrupts, and
/// 2. acquires the underlying lock,
///
/// releasing them in reverse order on drop. Interrupt handlers therefore
/// cannot preempt the critical section and re-enter code that uses the same
/// lock.
///
/// # Examples
///
/// ```
/// use kernel_sync::SpinLock;
///
/// static COUNTER: SpinLock<u32> = SpinLock::new(0);
///
/// {
///     let mut g = COUNTER.lock_irq();
///     *g += 1;
/// }
/// assert_eq!(*COUNTER.lock(), 1);
/// ```
pub struct IrqSpinLockGuard<'a, T> {
    // Field order matters: the lock is released before interrupts come back.
    guard: SpinLockGuard<'a, T>,
    _irq: IrqGuard,
}

impl<T> SpinLock<T> {
    /// Acquires the lock with interrupts disabled for the guard's lifetime.
    #[inline]
    pub fn lock_irq(&self) -> IrqSpinLockGuard<'_, T> {
        let irq = IrqGuard::new();
        let guard = self.lock();
        IrqSpinLockGuard { guard, _irq: irq }
    }

    /// Closure convenience for [`lock_irq`](Self::lock_irq).
    #[inline]
    pub fn with_lock_irq<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut g = self.lock_irq();
        f(&mut g)
    }
}

impl<T> Deref for IrqSpinLockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for IrqSpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

/// Returns the current `EFLAGS` value.
///
/// Bit 9 (`IF`) indicates whether interrupts are enabled.
#[cfg(all(target_arch = "x86", target_os = "none"))]
#[inline]
#[must_use]
pub fn eflags() -> u32 {
    let r: u32;
    unsafe { core::arch::asm!("pushfd; pop {}", out(reg) r, options(nomem, preserves_flags)) }
    r
}

/// Disables hardware interrupts (`cli`).
///
/// # Safety & Privilege
///
/// Must only be called in contexts where `cli` is permitted.
#[cfg(all(target_arch = "x86", target_os = "none"))]
#[inline]
pub fn cli_stop_interrupts() {
    unsafe { core::arch::asm!("cli", options(nomem, nostack, preserves_flags)) }
}

/// Enables hardware interrupts (`sti`).
#[cfg(all(target_arch = "x86", target_os = "none"))]
#[inline]
pub fn sti_enable_interrupts() {
    unsafe { core::arch::asm!("sti", options(nomem, nostack, preserves_flags)) }
}

/// Hosted builds have no interrupt flag to toggle; a software flag stands in
/// so guard nesting behaves exactly like on hardware.
#[cfg(not(all(target_arch = "x86", target_os = "none")))]
mod emulated {
    use super::EFLAGS_IF;
    use core::sync::atomic::{AtomicBool, Ordering};

    static INTERRUPTS_ENABLED: AtomicBool = AtomicBool::new(true);

    #[must_use]
    pub fn eflags() -> u32 {
        if INTERRUPTS_ENABLED.load(Ordering::Acquire) {
            EFLAGS_IF
        } else {
            0
        }
    }

    pub fn cli_stop_interrupts() {
        INTERRUPTS_ENABLED.store(false, Ordering::Release);
    }

    pub fn sti_enable_interrupts() {
        INTERRUPTS_ENABLED.store(true, Ordering::Release);
    }
}

#[cfg(not(all(target_arch = "x86", target_os = "none")))]
pub use emulated::{cli_stop_interrupts, eflags, sti_enable_interrupts};

/// Whether maskable interrupts are currently enabled.
#[inline]
#[must_use]
pub fn interrupts_enabled() -> bool {
    eflags() & EFLAGS_IF != 0
}

/// RAII guard that disables interrupts on creation and restores them on drop.
///
/// `IrqGuard::new()` snapshots the `IF` bit of `EFLAGS`. If interrupts were
/// enabled, it executes `cli`. On drop, it executes `sti` **only** if they
/// were previously enabled, so guards nest.
pub struct IrqGuard {
    /// Whether interrupts were enabled (IF=1) when the guard was created.
    were_enabled: bool,
}

impl Default for IrqGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl IrqGuard {
    /// Disables interrupts if they are currently enabled and remembers the state.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        let enabled = interrupts_enabled();
        if enabled {
            cli_stop_interrupts();
        }
        Self {
            were_enabled: enabled,
        }
    }
}

impl Drop for IrqGuard {
    /// Restores interrupts (`sti`) only if they were previously enabled.
    fn drop(&mut self) {
        if self.were_enabled {
            sti_enable_interrupts();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Single test so that nothing else in this binary flips the emulated flag
    // concurrently.
    #[test]
    fn guards_nest_and_restore_interrupt_state() {
        assert!(interrupts_enabled());
        {
            let _outer = IrqGuard::new();
            assert!(!interrupts_enabled());
            {
                let _inner = IrqGuard::new();
                assert!(!interrupts_enabled());
            }
            // inner guard saw IF=0 and must not re-enable
            assert!(!interrupts_enabled());
        }
        assert!(interrupts_enabled());

        let lock = SpinLock::new(5_u8);
        {
            let mut g = lock.lock_irq();
            *g += 1;
            assert!(!interrupts_enabled());
            assert!(lock.try_lock().is_none());
        }
        assert!(interrupts_enabled());
        assert_eq!(lock.with_lock_irq(|v| *v), 6);
        assert!(interrupts_enabled());
    }
}
