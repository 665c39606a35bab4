//! Architecture-specific timestamp source for trace records.
//!
//! - x86-64: RDTSC (Time Stamp Counter)
//! - ARM64: CNTVCT_EL0 (Virtual Counter)
//! - elsewhere: a global counter that only guarantees ordering
//!
//! Raw counts are stored; `--difftime` prints deltas in the same unit.

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
use core::sync::atomic::{AtomicU64, Ordering};

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
static FALLBACK_CLOCK: AtomicU64 = AtomicU64::new(1);

/// Read the current timestamp.
///
/// Monotonic on a single CPU. Safe from any context: no locks, no
/// allocation.
#[inline(always)]
pub fn trace_timestamp() -> u64 {
    #[cfg(target_arch = "x86_64")]
    {
        // No LFENCE: small reordering is fine for tracing.
        let low: u32;
        let high: u32;
        unsafe {
            core::arch::asm!(
                "rdtsc",
                out("eax") low,
                out("edx") high,
                options(nostack, nomem, preserves_flags)
            );
        }
        ((high as u64) << 32) | (low as u64)
    }

    #[cfg(target_arch = "aarch64")]
    {
        let val: u64;
        unsafe {
            core::arch::asm!(
                "mrs {}, cntvct_el0",
                out(reg) val,
                options(nomem, nostack)
            );
        }
        val
    }

    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        FALLBACK_CLOCK.fetch_add(1, Ordering::Relaxed)
    }
}
