//! Critical sections.
//!
//! `critical_begin`/`critical_end` are the kernel's one true synchronization
//! primitive: every other primitive in this crate (semaphores, the heap,
//! the scheduler's lists) is built on top of them rather than the other
//! way around.
//!
//! On a single-CPU build (`config::NUM_CPUS == 1`, the default) disabling
//! interrupts is sufficient mutual exclusion. On a multi-CPU build a global
//! ticket-style spinlock is additionally acquired.
//!
//! `critical_begin` saves the interrupt-enable flag it found and
//! `critical_end` restores exactly that, at each call site independently —
//! not a shared nesting counter. This is deliberate: the scheduler leaves a
//! critical section open across a context switch (a thread blocks mid
//! critical-section, another thread runs, and only when the first thread is
//! resumed does its own suspended call to `critical_end` run). A shared
//! per-CPU counter would be corrupted by unrelated critical sections opened
//! and closed by whichever thread the CPU runs in between; per-call-site
//! save/restore sidesteps that entirely, matching the original's `state =
//! OS_CriticalBegin(); ...; OS_CriticalEnd(state)` pattern where `state` is
//! the previously-saved flags register. The ticket-lock depth counter below
//! is a separate, best-effort mechanism that assumes a critical section is
//! never left open across a switch on a multi-CPU build; that configuration
//! is an unexercised stub (see `DESIGN.md`), not a shipped target.

use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use crate::config::NUM_CPUS;

/// Ticket lock protecting kernel-wide data structures on multi-CPU builds.
/// Inert (never contended) when `NUM_CPUS == 1`.
static NEXT_TICKET: AtomicU32 = AtomicU32::new(0);
static NOW_SERVING: AtomicU32 = AtomicU32::new(0);

/// Per-CPU critical-section nesting depth.
static NEST_DEPTH: [AtomicUsize; NUM_CPUS] = [const { AtomicUsize::new(0) }; NUM_CPUS];

/// Opaque token capturing whatever state `critical_end` needs to restore.
/// Callers must pass it to exactly one matching `critical_end` and must
/// not inspect its contents.
#[derive(Clone, Copy)]
pub struct CriticalState {
    was_enabled: bool,
    cpu: usize,
}

/// Disable interrupts (and, on multi-CPU builds, acquire the big lock) and
/// return a token describing the prior state.
#[inline]
pub fn critical_begin() -> CriticalState {
    let was_enabled = crate::arch::interrupts_enabled();
    crate::arch::disable_interrupts();

    let cpu = crate::arch::current_cpu();
    let depth = NEST_DEPTH[cpu].fetch_add(1, Ordering::AcqRel);

    if NUM_CPUS > 1 && depth == 0 {
        let ticket = NEXT_TICKET.fetch_add(1, Ordering::AcqRel);
        while NOW_SERVING.load(Ordering::Acquire) != ticket {
            core::hint::spin_loop();
        }
    }

    CriticalState { was_enabled, cpu }
}

/// Restore the interrupt-enable state captured by the matching
/// `critical_begin`. Always toggles hardware state to whatever this call
/// site observed before its `critical_begin` — safe to call after this
/// thread was switched out and back in, since `state` lives on this
/// thread's own stack rather than in shared mutable state.
#[inline]
pub fn critical_end(state: CriticalState) {
    let depth = NEST_DEPTH[state.cpu].fetch_sub(1, Ordering::AcqRel);

    if NUM_CPUS > 1 && depth == 1 {
        NOW_SERVING.fetch_add(1, Ordering::AcqRel);
    }

    if state.was_enabled {
        crate::arch::enable_interrupts();
    }
}

/// Run `f` with interrupts disabled (and the big lock held on multi-CPU
/// builds), restoring prior state afterwards. The idiomatic, panic-safe
/// wrapper around `critical_begin`/`critical_end` — prefer this to the raw
/// pair unless a driver genuinely needs to hold the section open across
/// more than one lexical scope.
#[inline]
pub fn with_critical<R>(f: impl FnOnce() -> R) -> R {
    let state = critical_begin();
    let result = f();
    critical_end(state);
    result
}
