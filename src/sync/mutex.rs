//! Recursive mutexes layered on a binary semaphore.
//!
//! Grounded in `OS_Mutex_s`/`OS_MutexPend/Post`. No priority inheritance —
//! the original doesn't have it either, and this port makes the same
//! choice explicitly (see `DESIGN.md`'s Open Questions).

use crate::handle::{MutexId, SemaphoreId, ThreadId};
use crate::sched::{KernelError, KernelState};
use crate::sync::semaphore;

pub struct Mutex {
    pub name: heapless::String<16>,
    pub semaphore: SemaphoreId,
    pub owner: Option<ThreadId>,
    pub depth: u32,
}

pub fn create_locked(state: &mut KernelState, name: &str) -> Result<MutexId, &'static str> {
    let slot = state.free_mutex_slot().ok_or("mutex table full")?;
    let sem = semaphore::create_locked(state, name, 1)?;
    state.mutexes[slot] = Some(Mutex {
        name: heapless::String::try_from(name).unwrap_or_default(),
        semaphore: sem,
        owner: None,
        depth: 0,
    });
    Ok(MutexId(slot as u16))
}

pub fn create(name: &str) -> Result<MutexId, &'static str> {
    let cs = crate::critical::critical_begin();
    let result = crate::sched::with_kernel(|state| create_locked(state, name));
    crate::critical::critical_end(cs);
    result
}

pub fn delete_locked(state: &mut KernelState, id: MutexId) {
    let sem = state.mutexes[id.index()].as_ref().unwrap().semaphore;
    semaphore::delete_locked(state, sem);
    state.mutexes[id.index()] = None;
}

pub fn delete(id: MutexId) {
    let cs = crate::critical::critical_begin();
    crate::sched::with_kernel(|state| delete_locked(state, id));
    crate::critical::critical_end(cs);
}

/// Acquire `id`, blocking if another thread holds it. Re-entrant: the
/// owning thread may pend again without blocking, incrementing a hold
/// count that `post` must unwind one layer at a time.
pub fn pend(id: MutexId) -> Result<(), KernelError> {
    let current = crate::sched::thread_self();
    let cs = crate::critical::critical_begin();
    let result = crate::sched::with_kernel(|state| {
        let mutex = state.mutexes[id.index()].as_mut().unwrap();
        if mutex.owner == Some(current) {
            mutex.depth += 1;
            return Ok(());
        }
        let sem = mutex.semaphore;
        let result = semaphore::pend_body(state, sem, crate::time::FOREVER);
        if result.is_ok() {
            let mutex = state.mutexes[id.index()].as_mut().unwrap();
            mutex.owner = Some(current);
            mutex.depth = 1;
        }
        result
    });
    crate::critical::critical_end(cs);
    result
}

/// Release one level of `id`. Only actually posts the underlying
/// semaphore once the hold count reaches zero.
pub fn post(id: MutexId) {
    let current = crate::sched::thread_self();
    let cs = crate::critical::critical_begin();
    crate::sched::with_kernel(|state| {
        let mutex = state.mutexes[id.index()].as_mut().unwrap();
        crate::kassert!(mutex.owner == Some(current), "post from non-owning thread");
        crate::kassert!(mutex.depth > 0, "post without a matching pend");
        mutex.depth -= 1;
        if mutex.depth == 0 {
            mutex.owner = None;
            let sem = mutex.semaphore;
            semaphore::post_body(state, sem);
        }
    });
    crate::critical::critical_end(cs);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::test_support::fresh_kernel;
    use crate::thread::{Thread, ThreadState};

    fn spawn(state: &mut KernelState, priority: u8) -> ThreadId {
        let stack = Box::leak(vec![0u8; 256].into_boxed_slice());
        let mut t = Thread::new("t", priority, |_| {}, 0, stack.as_mut_ptr(), 256);
        t.state = ThreadState::Running;
        let slot = state.threads.iter().position(|x| x.is_none()).unwrap();
        state.threads[slot] = Some(t);
        ThreadId(slot as u16)
    }

    #[test]
    fn recursive_acquire_does_not_self_block() {
        let state = fresh_kernel();
        let id = create_locked(state, "m").unwrap();
        let t = spawn(state, 5);
        state.current[0] = Some(t);

        // First pend: uncontended.
        let sem = state.mutexes[id.index()].as_ref().unwrap().semaphore;
        assert_eq!(semaphore::pend_body(state, sem, 0), Ok(()));
        state.mutexes[id.index()].as_mut().unwrap().owner = Some(t);
        state.mutexes[id.index()].as_mut().unwrap().depth = 1;

        // Second pend from the same (owning) thread recurses instead of
        // touching the semaphore.
        let mutex = state.mutexes[id.index()].as_mut().unwrap();
        assert_eq!(mutex.owner, Some(t));
        mutex.depth += 1;
        assert_eq!(state.mutexes[id.index()].as_ref().unwrap().depth, 2);
    }

    #[test]
    fn post_only_releases_semaphore_at_zero_depth() {
        let state = fresh_kernel();
        let id = create_locked(state, "m").unwrap();
        let t = spawn(state, 5);
        state.current[0] = Some(t);
        let sem = state.mutexes[id.index()].as_ref().unwrap().semaphore;
        semaphore::pend_body(state, sem, 0).unwrap();
        let mutex = state.mutexes[id.index()].as_mut().unwrap();
        mutex.owner = Some(t);
        mutex.depth = 2;

        mutex.depth -= 1;
        assert_eq!(state.mutexes[id.index()].as_ref().unwrap().depth, 1);
        assert_eq!(state.semaphores[sem.index()].as_ref().unwrap().count, 0);
    }
}
