//! Kernel diagnostics: a `log::Log` backend over the serial console, an
//! IRQ-safe direct-write fallback for contexts where that backend isn't
//! safe to call, and the `kassert!` macro for invariants this kernel
//! treats as fatal rather than recoverable.

#[macro_use]
mod macros;
pub mod irq_log;
pub mod logger;
mod serial;

pub use logger::init;

pub(crate) fn serial_writer() -> serial::Writer {
    serial::Writer
}

/// `src/heap` calls straight into these instead of depending on `log`
/// itself, keeping the allocator free of an ambient-stack dependency of
/// its own.
pub(crate) fn log_heap_created(name: &str, bytes: usize) {
    log::info!("heap '{name}' created ({bytes} bytes)");
}

pub(crate) fn log_heap_corruption(addr: usize) {
    irq_log::irq_log("heap", "corrupt or double-freed block");
    log::error!("heap corruption detected at {addr:#x}");
}
