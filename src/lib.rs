//! A small preemptive real-time kernel executive: priority-preemptive
//! threads with round-robin at equal priority, counting semaphores,
//! recursive mutexes, bounded message queues, a timer service, a
//! first-fit heap allocator, and a 32-slot interrupt dispatcher.
//!
//! Grounded in the original Plasma RTOS (`rtos.c`/`rtos.h`), ported
//! module-for-module rather than translated line by line: kernel objects
//! live in fixed-size arenas addressed by
//! handle (`src/handle.rs`) instead of by pointer, and the hardware seam
//! (`src/arch`) is factored out behind a small trait-free interface so a
//! real target only has to supply a context switch and a tick source.
//!
//! This crate is library-shaped — no `_start`, no allocator, no heap
//! outside the one callers hand to [`init::init`]. A platform's boot code
//! calls [`init::init`] with a backing region, then [`init::start`], which
//! never returns.

#![cfg_attr(not(test), no_std)]

#[cfg(test)]
extern crate std;

pub mod arch;
pub mod config;
pub mod critical;
pub mod diag;
pub mod handle;
pub mod heap;
pub mod init;
pub mod isr;
pub mod job;
pub mod mqueue;
#[cfg(test)]
mod scenarios;
pub mod sched;
pub mod sync;
pub mod thread;
pub mod time;
pub mod timer;

pub use handle::{HeapId, MQueueId, MutexId, SemaphoreId, ThreadId, TimerId};
pub use handle::{HEAP_GENERAL, HEAP_SYSTEM};
pub use init::{init, start};
pub use time::{FOREVER, Ticks};

pub use critical::{CriticalState, critical_begin, critical_end};

pub use sched::{
    KernelError, exit_current_thread as thread_exit, thread_create, thread_info_get,
    thread_info_set, thread_priority_get, thread_priority_set, thread_self, thread_sleep,
    thread_time,
};

pub use sync::mutex::{
    create as mutex_create, delete as mutex_delete, pend as mutex_pend, post as mutex_post,
};
pub use sync::semaphore::{
    create as semaphore_create, delete as semaphore_delete, pend as semaphore_pend,
    post as semaphore_post,
};

pub use mqueue::{
    create as mqueue_create, delete as mqueue_delete, get as mqueue_get, send as mqueue_send,
};

pub use timer::{
    create as timer_create, create_with_callback as timer_create_with_callback,
    delete as timer_delete, set_callback as timer_set_callback, start as timer_start,
    stop as timer_stop,
};

pub use heap::{
    alloc as heap_alloc, alternate as heap_alternate, create as heap_create,
    destroy as heap_destroy, free as heap_free,
};

pub use isr::{
    interrupt_service, mask_clear as interrupt_mask_clear, mask_set as interrupt_mask_set,
    register as interrupt_register, status as interrupt_status,
};

pub use job::submit as job;

#[cfg(not(test))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    arch::disable_interrupts();
    diag::irq_log::irq_log("panic", "kernel panicked, halting");
    log::error!("{info}");
    loop {
        x86_64::instructions::hlt();
    }
}
