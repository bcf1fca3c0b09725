//! Host stand-in for [`super::x86`], used only under `cargo test`.
//!
//! There is no real interrupt controller or register file under `std`, so
//! this tracks the single piece of state the portable core actually
//! inspects (whether interrupts are "enabled") in a plain atomic, and
//! provides a `Context` whose save/restore are no-ops — tests exercise
//! scheduling *decisions* (selection rule, list ordering, wake-ups), never
//! an actual stack switch.

use core::sync::atomic::{AtomicBool, Ordering};

static INTERRUPTS_ENABLED: AtomicBool = AtomicBool::new(true);

pub fn interrupts_enabled() -> bool {
    INTERRUPTS_ENABLED.load(Ordering::SeqCst)
}

pub fn set_interrupts_enabled(enabled: bool) {
    INTERRUPTS_ENABLED.store(enabled, Ordering::SeqCst);
}

/// Stand-in for the opaque saved-register context. See
/// [`super::x86::Context`] for the real, hardware-backed version and why
/// its semantics can't be expressed portably.
#[derive(Default)]
pub struct Context;

impl Context {
    pub const fn new() -> Self {
        Context
    }

    /// # Safety
    /// No actual stack is touched; any pointer is accepted.
    pub unsafe fn prepare(&mut self, _stack_top: *mut u8) {}

    /// No-op: under `cargo test` there is only ever one real OS thread,
    /// so "switching" just means the call returns immediately instead of
    /// later, which is indistinguishable to the portable scheduler logic
    /// under test (it never inspects whether it "actually" resumed).
    ///
    /// # Safety
    /// No register state is saved or restored.
    pub unsafe fn switch_to(&mut self, _next: &Context) {}
}
