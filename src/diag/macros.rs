//! `print!`/`serial_println!` over [`super::serial::Writer`], and
//! `kassert!` for invariants this kernel treats as fatal bugs rather than
//! recoverable errors: it has no exception-raising path and never
//! unwinds.

#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ({
        use core::fmt::Write;
        let _ = write!($crate::diag::serial_writer(), $($arg)*);
    });
}

#[macro_export]
macro_rules! serial_println {
    () => ($crate::print!("\n"));
    ($fmt:expr) => ($crate::print!(concat!($fmt, "\n")));
    ($fmt:expr, $($arg:tt)*) => ($crate::print!(concat!($fmt, "\n"), $($arg)*));
}

#[macro_export]
macro_rules! kassert {
    ($cond:expr $(,)?) => {
        if !$cond {
            panic!("kernel assertion failed: {}", stringify!($cond));
        }
    };
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            panic!($($arg)+);
        }
    };
}

/// Tracing for the paths that run with interrupts disabled (semaphore
/// pend/post, heap alloc/free, the scheduler's selection rule). Compiles to
/// nothing unless the `trace-sched` feature is on, so the hot path pays
/// nothing for it by default.
#[macro_export]
macro_rules! sched_trace {
    ($($arg:tt)*) => {
        #[cfg(feature = "trace-sched")]
        log::trace!($($arg)*);
    };
}
