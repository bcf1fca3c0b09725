//! Compile-time kernel tuning.
//!
//! These mirror the `#define`s in the original Plasma RTOS `rtos.h`
//! (`STACK_SIZE_DEFAULT`, `THREAD_PRIORITY_MAX`, ...), expressed as `const`s
//! the way a Rust kernel names its knobs instead of header macros.

/// Default stack size handed to `thread_create` when the caller passes 0.
pub const STACK_DEFAULT: usize = 2 * 1024;

/// Smallest stack size `thread_create` will accept.
pub const STACK_MINIMUM: usize = 1024;

/// Number of hardware CPUs this build schedules across. `1` compiles out
/// all of the multi-CPU bookkeeping to dead branches; values above `1`
/// enable the big-lock/IPI-stub multi-CPU path.
pub const NUM_CPUS: usize = 1;

/// Upper bound on live threads. Thread descriptors live in a fixed arena
/// so the scheduler's hot paths never allocate.
pub const MAX_THREADS: usize = 64;

/// Opaque per-thread user-info slots (`thread_info_get/set`).
pub const THREAD_INFO_SLOTS: usize = 4;

/// Upper bound on live semaphores (mutexes are layered on top and counted
/// separately).
pub const MAX_SEMAPHORES: usize = 128;

/// Number of semaphore slots `init()` reserves for internal kernel use
/// (the heap guard semaphores, the timer service's semaphore, the job
/// dispatcher's queue semaphore) before any driver or application can
/// create its own. This stands in for the original's notion of "reserved
/// static semaphores usable before the heap is ready" — in this port all
/// semaphores are arena-backed, so the reservation exists purely to keep
/// kernel-internal consumers from starving application `semaphore_create`
/// calls, not to route around a bootstrap ordering constraint.
pub const RESERVED_SEMAPHORES: usize = 4;

/// Upper bound on live mutexes.
pub const MAX_MUTEXES: usize = 32;

/// Upper bound on live message queues.
pub const MAX_MQUEUES: usize = 32;

/// Upper bound on live timers.
pub const MAX_TIMERS: usize = 32;

/// Number of heap table slots (`HEAP_SYSTEM`, `HEAP_GENERAL`, ... in the
/// original); up to 8.
pub const HEAP_TABLE_SIZE: usize = 8;

/// Number of ISR dispatch slots. Slot 31 is reserved for synchronous
/// exceptions (syscall/break).
pub const ISR_SLOTS: usize = 32;

/// Reserved ISR slot index for synchronous exceptions.
pub const ISR_SLOT_EXCEPTION: usize = 31;

/// Platform tick interrupt selector (bit index into the ISR status word
/// that the reference PIT wiring in `arch::x86` raises).
pub const TICK_IRQ: usize = 0;

/// Lowest legal thread priority (the idle thread(s) run here).
pub const PRIORITY_IDLE: u8 = 0;

/// Highest legal thread priority.
pub const PRIORITY_MAX: u8 = 255;
