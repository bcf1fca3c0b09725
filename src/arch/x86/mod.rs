//! Reference x86 platform glue: cooperative context switch + PIT tick
//! source. Not part of the kernel core (see module doc on `crate::arch`)
//! — present only so the crate is concretely runnable.

mod context;
mod pit;

pub use context::Context;
pub use pit::init as init_tick_source;
