//! Thread descriptors.
//!
//! A `Thread` is never heap-allocated on its own; it lives at a fixed slot
//! in an arena, `KernelState::threads`, keyed by
//! its `ThreadId`. Its stack, however, *is* a real heap allocation (the
//! only way to give it a stable address and caller-chosen size), grounded
//! in `OS_ThreadCreate`'s `OS_HeapMalloc(NULL, sizeof(OS_Thread_t) +
//! StackSize)` — split here into an arena slot plus a separate heap
//! allocation so the arena slot's address never has to move.

pub mod list;

use crate::arch::Context;
use crate::handle::{HeapId, Link, SemaphoreId, ThreadId};
use crate::time::Ticks;

/// Byte pattern `OS_ThreadCreate` fills a fresh stack with, preserved here
/// purely as a debugging aid (a stack that's mostly `0xcd` when the
/// thread dies early was barely used).
pub const STACK_FILL: u8 = 0xcd;

/// Sentinel word written just past a thread's stack so a corrupted write
/// past the end can be detected the next time the thread is switched.
pub const STACK_GUARD: usize = 0x5441_4347; // "GUAR" as ASCII-ish bytes

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Blocked on a semaphore (or, equivalently, a mutex/queue built on
    /// one), possibly with a pending timeout.
    Pending,
    /// On the ready list, eligible to run.
    Ready,
    /// Currently executing on some CPU.
    Running,
}

pub struct Thread {
    pub name: heapless::String<16>,
    pub priority: u8,
    pub state: ThreadState,
    pub context: Context,

    stack: *mut u8,
    stack_len: usize,
    guard_slot: *mut usize,

    pub entry: fn(usize),
    pub arg: usize,

    pub semaphore_pending: Option<SemaphoreId>,
    pub has_timeout: bool,
    pub ticks_timeout: Ticks,
    pub return_code: i32,

    pub info: [usize; crate::config::THREAD_INFO_SLOTS],
    pub heap_binding: HeapId,

    /// Which CPU this thread is pinned to, or `None` for "any". Always
    /// `None` on a single-CPU build.
    pub cpu_lock: Option<usize>,

    // Priority-ordered list links. Shared between the ready list and a
    // semaphore's wait list since a thread is in at most one of the two
    // at any time.
    pub prio_prev: Link,
    pub prio_next: Link,

    // Timeout-ordered list links, independent of the above — a thread
    // waiting on a semaphore with a timeout is in *both* lists at once.
    pub timeout_prev: Link,
    pub timeout_next: Link,
}

unsafe impl Send for Thread {}

impl Thread {
    /// Build a thread descriptor over a freshly heap-allocated stack.
    /// `stack` and `stack_len` must describe a region this `Thread` now
    /// owns exclusively; `entry`/`arg` are invoked once `context.prepare`
    /// is used to fabricate the initial frame and the thread is first
    /// switched into.
    pub fn new(
        name: &str,
        priority: u8,
        entry: fn(usize),
        arg: usize,
        stack: *mut u8,
        stack_len: usize,
    ) -> Thread {
        unsafe {
            core::ptr::write_bytes(stack, STACK_FILL, stack_len);
        }
        let guard_slot = stack as *mut usize;
        unsafe {
            *guard_slot = STACK_GUARD;
        }

        Thread {
            name: heapless::String::try_from(name).unwrap_or_default(),
            priority,
            state: ThreadState::Ready,
            context: Context::new(),
            stack,
            stack_len,
            guard_slot,
            entry,
            arg,
            semaphore_pending: None,
            has_timeout: false,
            ticks_timeout: Ticks::new(0),
            return_code: 0,
            info: [0; crate::config::THREAD_INFO_SLOTS],
            heap_binding: crate::handle::HEAP_SYSTEM,
            cpu_lock: None,
            prio_prev: None,
            prio_next: None,
            timeout_prev: None,
            timeout_next: None,
        }
    }

    /// Fabricate the initial call frame so the first switch into this
    /// thread lands in `arch::x86::trampoline`.
    ///
    /// # Safety
    /// Must be called exactly once, before this thread is ever switched
    /// into.
    pub unsafe fn prepare(&mut self) {
        let stack_top = unsafe { self.stack.add(self.stack_len) };
        unsafe {
            self.context.prepare(stack_top);
        }
    }

    /// Stack region backing this thread, for later `heap::free`.
    pub fn stack_block(&self) -> *mut u8 {
        self.stack
    }

    /// `false` if the guard word just below the stack's low end has been
    /// overwritten, which means something ran off the end of the stack.
    pub fn stack_intact(&self) -> bool {
        unsafe { *self.guard_slot == STACK_GUARD }
    }
}
