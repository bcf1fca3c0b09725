//! Synchronization primitives layered on the scheduler's critical section.
//!
//! `semaphore` is the one true blocking primitive; `mutex` is built
//! directly on top of it, exactly as `OS_Mutex_s` wraps an
//! `OS_Semaphore_t` in the original.

pub mod mutex;
pub mod semaphore;
