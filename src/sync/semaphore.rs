//! Counting semaphores.
//!
//! Grounded in `OS_SemaphoreCreate/Pend/Post/Delete`. A semaphore's count
//! can go negative: a negative count is the number of threads currently
//! queued on `wait_head`, priority-ordered exactly like the ready list,
//! not FIFO.

use crate::handle::{Link, SemaphoreId, ThreadId};
use crate::sched::{KernelError, KernelState, reschedule};
use crate::thread::{ThreadState, list};
use crate::time::FOREVER;

pub struct Semaphore {
    pub name: heapless::String<16>,
    pub count: i32,
    pub wait_head: Link,
    pub wait_tail: Link,
}

pub fn create_locked(
    state: &mut KernelState,
    name: &str,
    count: i32,
) -> Result<SemaphoreId, &'static str> {
    let slot = state.free_semaphore_slot().ok_or("semaphore table full")?;
    state.semaphores[slot] = Some(Semaphore {
        name: heapless::String::try_from(name).unwrap_or_default(),
        count,
        wait_head: None,
        wait_tail: None,
    });
    Ok(SemaphoreId(slot as u16))
}

pub fn create(name: &str, count: i32) -> Result<SemaphoreId, &'static str> {
    let cs = crate::critical::critical_begin();
    let result = crate::sched::with_kernel(|state| create_locked(state, name, count));
    crate::critical::critical_end(cs);
    result
}

pub fn delete_locked(state: &mut KernelState, id: SemaphoreId) {
    while state.semaphores[id.index()].as_ref().unwrap().wait_head.is_some() {
        post_body(state, id);
    }
    state.semaphores[id.index()] = None;
}

pub fn delete(id: SemaphoreId) {
    let cs = crate::critical::critical_begin();
    crate::sched::with_kernel(|state| delete_locked(state, id));
    crate::critical::critical_end(cs);
}

/// Decrement `id`'s count; block the calling thread if it goes negative.
/// `timeout == 0` never blocks, returning `Err(Timeout)` immediately
/// instead. `timeout == FOREVER` blocks indefinitely. Must be called with
/// a critical section already open.
pub fn pend_body(state: &mut KernelState, id: SemaphoreId, timeout: u32) -> Result<(), KernelError> {
    let sem = state.semaphores[id.index()].as_mut().unwrap();
    sem.count -= 1;
    if sem.count >= 0 {
        return Ok(());
    }

    if timeout == 0 {
        state.semaphores[id.index()].as_mut().unwrap().count += 1;
        return Err(KernelError::Timeout);
    }

    let cpu = crate::arch::current_cpu();
    crate::kassert!(
        !state.inside_interrupt[cpu],
        "semaphore pend with a non-zero timeout from interrupt context"
    );
    let current = state.current[cpu].expect("pend with no current thread");
    crate::sched_trace!("semaphore {} pend blocks thread {}", id.index(), current.index());

    {
        let t = state.threads[current.index()].as_mut().unwrap();
        t.semaphore_pending = Some(id);
        t.state = ThreadState::Pending;
        if timeout != FOREVER {
            t.has_timeout = true;
            t.ticks_timeout = crate::time::now().plus(timeout);
        } else {
            t.has_timeout = false;
        }
    }

    list::priority_remove(&mut state.threads, &mut state.ready_head, &mut state.ready_tail, current);
    {
        let sem = state.semaphores[id.index()].as_mut().unwrap();
        list::priority_insert(&mut state.threads, &mut sem.wait_head, &mut sem.wait_tail, current);
    }
    if timeout != FOREVER {
        list::timeout_insert(&mut state.threads, &mut state.timeout_head, &mut state.timeout_tail, current);
    }

    reschedule(state, false);

    // Resumed, either because `post_body` granted the semaphore or the
    // tick handler's timeout sweep gave up waiting on our behalf.
    let code = state.threads[current.index()].as_ref().unwrap().return_code;
    if code != 0 {
        Err(KernelError::Timeout)
    } else {
        Ok(())
    }
}

pub fn pend(id: SemaphoreId, timeout: u32) -> Result<(), KernelError> {
    let cs = crate::critical::critical_begin();
    let result = crate::sched::with_kernel(|state| pend_body(state, id, timeout));
    crate::critical::critical_end(cs);
    result
}

/// Increment `id`'s count, waking the highest-priority waiter if the
/// count was negative.
pub fn post_body(state: &mut KernelState, id: SemaphoreId) {
    let sem = state.semaphores[id.index()].as_mut().unwrap();
    sem.count += 1;
    if sem.count > 0 {
        return;
    }

    let waiter: ThreadId = state.semaphores[id.index()].as_ref().unwrap().wait_head.unwrap();
    crate::sched_trace!("semaphore {} post wakes thread {}", id.index(), waiter.index());

    list::timeout_remove(&mut state.threads, &mut state.timeout_head, &mut state.timeout_tail, waiter);
    {
        let sem = state.semaphores[id.index()].as_mut().unwrap();
        list::priority_remove(&mut state.threads, &mut sem.wait_head, &mut sem.wait_tail, waiter);
    }
    {
        let t = state.threads[waiter.index()].as_mut().unwrap();
        t.semaphore_pending = None;
        t.return_code = 0;
        t.has_timeout = false;
        t.state = ThreadState::Ready;
    }
    list::priority_insert(&mut state.threads, &mut state.ready_head, &mut state.ready_tail, waiter);

    reschedule(state, false);
}

pub fn post(id: SemaphoreId) {
    let cs = crate::critical::critical_begin();
    crate::sched::with_kernel(|state| post_body(state, id));
    crate::critical::critical_end(cs);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::test_support::fresh_kernel;
    use crate::thread::Thread;

    fn spawn(state: &mut KernelState, priority: u8) -> ThreadId {
        let stack = Box::leak(vec![0u8; 256].into_boxed_slice());
        let mut t = Thread::new("t", priority, |_| {}, 0, stack.as_mut_ptr(), 256);
        t.state = ThreadState::Running;
        let slot = state.threads.iter().position(|x| x.is_none()).unwrap();
        state.threads[slot] = Some(t);
        ThreadId(slot as u16)
    }

    #[test]
    fn uncontended_pend_does_not_block() {
        let state = fresh_kernel();
        let sem = create_locked(state, "s", 1).unwrap();
        state.swap_enabled = true;
        let t = spawn(state, 5);
        state.current[0] = Some(t);
        assert_eq!(pend_body(state, sem, 0), Ok(()));
        assert_eq!(state.semaphores[sem.index()].as_ref().unwrap().count, 0);
    }

    #[test]
    fn zero_timeout_fails_fast_without_blocking() {
        let state = fresh_kernel();
        let sem = create_locked(state, "s", 0).unwrap();
        state.swap_enabled = true;
        let t = spawn(state, 5);
        state.current[0] = Some(t);
        assert_eq!(pend_body(state, sem, 0), Err(KernelError::Timeout));
        assert_eq!(state.semaphores[sem.index()].as_ref().unwrap().count, 0);
    }

    #[test]
    fn post_wakes_highest_priority_waiter() {
        let state = fresh_kernel();
        let sem = create_locked(state, "s", 0).unwrap();
        state.swap_enabled = true;
        let runner = spawn(state, 1);
        state.current[0] = Some(runner);
        list::priority_insert(&mut state.threads, &mut state.ready_head, &mut state.ready_tail, runner);

        let waiter_low = spawn(state, 2);
        let waiter_high = spawn(state, 9);
        for w in [waiter_low, waiter_high] {
            let t = state.threads[w.index()].as_mut().unwrap();
            t.semaphore_pending = Some(sem);
            t.state = ThreadState::Pending;
            let sem_ref = state.semaphores[sem.index()].as_mut().unwrap();
            list::priority_insert(&mut state.threads, &mut sem_ref.wait_head, &mut sem_ref.wait_tail, w);
        }
        state.semaphores[sem.index()].as_mut().unwrap().count = -2;

        post_body(state, sem);
        assert_eq!(
            state.semaphores[sem.index()].as_ref().unwrap().wait_head,
            Some(waiter_low)
        );
        assert_eq!(state.threads[waiter_high.index()].as_ref().unwrap().state, ThreadState::Ready);
    }
}
