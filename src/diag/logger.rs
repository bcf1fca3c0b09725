//! `log::Log` implementation over the serial console: a unit struct, a
//! single `static LOGGER`, one `init()` entry point, pointed at this
//! crate's own serial writer.

use log::{Level, LevelFilter, Metadata, Record};

use crate::serial_println;

struct KernelLogger;

impl log::Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Info
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            serial_println!("[{}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: KernelLogger = KernelLogger;

/// Install the kernel logger as `log`'s global backend. Must be called at
/// most once, before any `log::info!`/`log::warn!`/... call —
/// `crate::init::init` does this first, ahead of creating the default
/// heap.
pub fn init() {
    log::set_logger(&LOGGER)
        .map(|()| log::set_max_level(LevelFilter::Info))
        .expect("logger already initialized");
}
