//! Services the trace log needs from the kernel.
//!
//! The log itself knows nothing about threads, interrupts or address
//! spaces. A [`TracePlatform`] supplies them: interrupt masking for the ring
//! lock, a timestamp and the current thread/team for each record, and
//! optionally a safe memory reader for `s#` filters.

use crate::spinlock::InterruptControl;

use super::filter::MemoryReader;
use super::record::EntryIdentity;
use super::timestamp::trace_timestamp;

pub trait TracePlatform: InterruptControl {
    /// Current time, in the unit printed by `traced`.
    fn timestamp(&self) -> u64;

    /// Thread and team of the caller, if the scheduler is up.
    fn current_identity(&self) -> Option<EntryIdentity> {
        None
    }

    /// Reader for `s#<address>` patterns. Without one those patterns never
    /// match.
    fn memory_reader(&self) -> Option<&dyn MemoryReader> {
        None
    }
}

/// Cycle-counter timestamps, no identity, no memory access.
///
/// On bare metal it masks interrupts through the `x86_64` crate or
/// `DAIF.I` (ARM64); hosted builds have nothing to mask.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultPlatform;

pub static DEFAULT_PLATFORM: DefaultPlatform = DefaultPlatform;

impl InterruptControl for DefaultPlatform {
    fn save_and_disable(&self) -> bool {
        #[cfg(all(target_arch = "x86_64", target_os = "none"))]
        {
            use x86_64::instructions::interrupts;
            let was_enabled = interrupts::are_enabled();
            interrupts::disable();
            was_enabled
        }

        #[cfg(all(target_arch = "aarch64", target_os = "none"))]
        {
            let daif: u64;
            unsafe {
                core::arch::asm!("mrs {}, daif", "msr daifset, #2", out(reg) daif, options(nomem, nostack));
            }
            // I is bit 7; set means masked.
            daif & (1 << 7) == 0
        }

        #[cfg(not(all(any(target_arch = "x86_64", target_arch = "aarch64"), target_os = "none")))]
        {
            false
        }
    }

    fn restore(&self, was_enabled: bool) {
        if !was_enabled {
            return;
        }

        #[cfg(all(target_arch = "x86_64", target_os = "none"))]
        x86_64::instructions::interrupts::enable();

        #[cfg(all(target_arch = "aarch64", target_os = "none"))]
        unsafe {
            core::arch::asm!("msr daifclr, #2", options(nomem, nostack));
        }
    }
}

impl TracePlatform for DefaultPlatform {
    fn timestamp(&self) -> u64 {
        trace_timestamp()
    }
}
