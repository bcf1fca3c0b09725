//! Hardware seam.
//!
//! Everything in this module (and its `x86` submodule) is the
//! hardware-specific register layout and the assembly shim that performs
//! register save/restore. A real port replaces `x86` with a
//! target-specific module implementing the same four free functions plus
//! [`Context`]; none of `src/sched`, `src/sync`, `src/heap`,
//! `src/mqueue.rs` or `src/timer.rs` know or care which one is linked in.
//!
//! `x86` is kept as a concrete reference implementation — a naked-asm
//! context switch and PIT tick wiring — purely so the crate has
//! *something* real to point at. It is compiled only for non-test builds;
//! `cfg(test)` substitutes a trivial single-threaded stand-in so the
//! portable core (everything else) can run under `cargo test` on the
//! host.

#[cfg(not(test))]
pub mod x86;
#[cfg(not(test))]
pub use x86::Context;

#[cfg(test)]
mod host_stub;
#[cfg(test)]
pub use host_stub::Context;

/// True iff maskable interrupts are currently enabled on this CPU.
#[cfg(not(test))]
#[inline]
pub fn interrupts_enabled() -> bool {
    x86_64::instructions::interrupts::are_enabled()
}

#[cfg(not(test))]
#[inline]
pub fn disable_interrupts() {
    x86_64::instructions::interrupts::disable();
}

#[cfg(not(test))]
#[inline]
pub fn enable_interrupts() {
    x86_64::instructions::interrupts::enable();
}

/// Index of the CPU executing this code, in `0..config::NUM_CPUS`.
/// `config::NUM_CPUS == 1` in every shipped configuration of this port, so
/// this always returns 0; a real SMP port reads the local APIC ID (or
/// equivalent) here.
#[cfg(not(test))]
#[inline]
pub fn current_cpu() -> usize {
    0
}

#[cfg(test)]
#[inline]
pub fn interrupts_enabled() -> bool {
    host_stub::interrupts_enabled()
}

#[cfg(test)]
#[inline]
pub fn disable_interrupts() {
    host_stub::set_interrupts_enabled(false);
}

#[cfg(test)]
#[inline]
pub fn enable_interrupts() {
    host_stub::set_interrupts_enabled(true);
}

#[cfg(test)]
#[inline]
pub fn current_cpu() -> usize {
    0
}
