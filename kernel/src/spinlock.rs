//! Interrupt-safe spinlock
//!
//! Taking the lock first saves and disables local interrupts, so an
//! interrupt handler on the same CPU can never spin on a lock its own
//! interrupted context holds. Interrupts are restored only after the lock
//! is released.

use core::mem::ManuallyDrop;
use core::ops::{Deref, DerefMut};

use spin::{Mutex, MutexGuard};

/// Local interrupt masking, supplied by the platform.
pub trait InterruptControl: Sync {
    /// Disable interrupts and report whether they were enabled before.
    fn save_and_disable(&self) -> bool;

    /// Re-enable interrupts if `was_enabled`.
    fn restore(&self, was_enabled: bool);
}

/// Interrupt control for contexts that never take interrupts (hosted
/// builds, tests).
pub struct NoInterrupts;

impl InterruptControl for NoInterrupts {
    fn save_and_disable(&self) -> bool {
        false
    }

    fn restore(&self, _was_enabled: bool) {}
}

/// A spinlock that also disables interrupts while held.
pub struct SpinLockIrq<T> {
    inner: Mutex<T>,
}

impl<T> SpinLockIrq<T> {
    pub const fn new(value: T) -> Self {
        Self { inner: Mutex::new(value) }
    }

    /// Acquire the lock with interrupts disabled
    pub fn lock<'a, I>(&'a self, irq: &'a I) -> SpinLockIrqGuard<'a, T, I>
    where
        I: InterruptControl + ?Sized,
    {
        let was_enabled = irq.save_and_disable();
        let guard = self.inner.lock();
        SpinLockIrqGuard {
            guard: ManuallyDrop::new(guard),
            irq,
            was_enabled,
        }
    }

    /// Try to acquire the lock without spinning
    ///
    /// Returns None if the lock is held; interrupts are left as they were.
    pub fn try_lock<'a, I>(&'a self, irq: &'a I) -> Option<SpinLockIrqGuard<'a, T, I>>
    where
        I: InterruptControl + ?Sized,
    {
        let was_enabled = irq.save_and_disable();
        match self.inner.try_lock() {
            Some(guard) => Some(SpinLockIrqGuard {
                guard: ManuallyDrop::new(guard),
                irq,
                was_enabled,
            }),
            None => {
                irq.restore(was_enabled);
                None
            }
        }
    }

    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }
}

/// RAII guard for SpinLockIrq
///
/// Releases the lock, then restores the saved interrupt state.
pub struct SpinLockIrqGuard<'a, T, I: InterruptControl + ?Sized = dyn InterruptControl> {
    guard: ManuallyDrop<MutexGuard<'a, T>>,
    irq: &'a I,
    was_enabled: bool,
}

impl<T, I: InterruptControl + ?Sized> Deref for SpinLockIrqGuard<'_, T, I> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T, I: InterruptControl + ?Sized> DerefMut for SpinLockIrqGuard<'_, T, I> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T, I: InterruptControl + ?Sized> Drop for SpinLockIrqGuard<'_, T, I> {
    fn drop(&mut self) {
        // SAFETY: the guard is dropped exactly once, here, and never used
        // afterwards.
        unsafe { ManuallyDrop::drop(&mut self.guard) };
        self.irq.restore(self.was_enabled);
    }
}
