//! End-to-end scenarios spanning more than one subsystem at a time:
//! preemption, fairness, a timeout round trip, message delivery, timer
//! redelivery, and exact-fit heap reuse. Each module above already unit
//! tests its own primitives in isolation; these compose them the way a
//! real caller would, still against a freestanding [`KernelState`]
//! (`test_support::fresh_kernel`) rather than the process-wide one, since
//! `arch::host_stub::Context::switch_to` never actually suspends a
//! caller — anything that depends on a real blocked-then-resumed stack
//! switch has to be driven through the list/state transitions directly,
//! the same way the per-module tests already do.

use crate::handle::{HeapId, MQueueId, ThreadId};
use crate::heap;
use crate::sched::test_support::fresh_kernel;
use crate::sched::{self, KernelState};
use crate::sync::semaphore;
use crate::thread::{Thread, ThreadState, list};
use crate::timer::Timer;

fn spawn(state: &mut KernelState, priority: u8) -> ThreadId {
    let stack = Box::leak(vec![0u8; 256].into_boxed_slice());
    let mut t = Thread::new("t", priority, |_| {}, 0, stack.as_mut_ptr(), 256);
    t.state = ThreadState::Ready;
    let slot = state.threads.iter().position(|x| x.is_none()).unwrap();
    state.threads[slot] = Some(t);
    let id = ThreadId(slot as u16);
    list::priority_insert(&mut state.threads, &mut state.ready_head, &mut state.ready_tail, id);
    id
}

fn make_heap(state: &mut KernelState, bytes: usize) -> HeapId {
    let region = Box::leak(vec![0u8; bytes].into_boxed_slice());
    heap::create_locked(state, 0, "sys", region).unwrap()
}

fn make_queue(state: &mut KernelState, capacity: usize, slot_words: usize) -> MQueueId {
    make_heap(state, 4096);
    crate::mqueue::create_locked(state, "q", capacity, slot_words).unwrap()
}

/// A freshly-created high-priority thread preempts a lower-priority one
/// that is already running, and keeps winning every subsequent
/// reschedule until something changes its own priority.
#[test]
fn priority_preemption_runs_highest_ready_thread() {
    let state = fresh_kernel();
    state.swap_enabled = true;

    let worker = spawn(state, 3);
    state.current[0] = Some(worker);
    state.threads[worker.index()].as_mut().unwrap().state = ThreadState::Running;

    let urgent = spawn(state, 50);
    let (from, to) = sched::reschedule_locked(state, false).expect("higher priority must preempt");
    assert_eq!(from, Some(worker));
    assert_eq!(to, urgent);
    assert_eq!(state.threads[worker.index()].as_ref().unwrap().state, ThreadState::Ready);

    // Lowering the new current thread's own priority below the idle
    // worker's hands control straight back.
    list::priority_remove(&mut state.threads, &mut state.ready_head, &mut state.ready_tail, urgent);
    state.threads[urgent.index()].as_mut().unwrap().priority = 1;
    list::priority_insert(&mut state.threads, &mut state.ready_head, &mut state.ready_tail, urgent);

    let (_from, back_to) = sched::reschedule_locked(state, false).expect("priority drop must yield");
    assert_eq!(back_to, worker);
}

/// Three threads at the same priority take turns, one per round-robin
/// reschedule, visiting every sibling exactly once before repeating.
#[test]
fn round_robin_fairness_visits_every_sibling() {
    let state = fresh_kernel();
    state.swap_enabled = true;

    let a = spawn(state, 7);
    let b = spawn(state, 7);
    let c = spawn(state, 7);
    state.current[0] = Some(a);
    state.threads[a.index()].as_mut().unwrap().state = ThreadState::Running;

    let mut order = vec![a];
    for _ in 0..3 {
        let cur = state.current[0].unwrap();
        match sched::reschedule_locked(state, true) {
            Some((_, next)) => order.push(next),
            None => order.push(cur),
        }
    }

    // a -> b -> c -> a: every sibling served before anyone repeats.
    assert_eq!(order, vec![a, b, c, a]);
}

/// A thread that pends on an exhausted semaphore with a finite timeout is
/// parked on both the semaphore's wait list and the timeout list; once
/// the tick handler's sweep reaches its deadline it comes back ready,
/// with a negative return code and the semaphore otherwise undisturbed.
#[test]
fn semaphore_pend_times_out_via_tick_sweep() {
    let state = fresh_kernel();
    let sem = semaphore::create_locked(state, "s", 0).unwrap();
    state.swap_enabled = true;

    let runner = spawn(state, 4);
    state.current[0] = Some(runner);
    state.threads[runner.index()].as_mut().unwrap().state = ThreadState::Running;

    let waiter = spawn(state, 4);
    list::priority_remove(&mut state.threads, &mut state.ready_head, &mut state.ready_tail, waiter);
    {
        let t = state.threads[waiter.index()].as_mut().unwrap();
        t.state = ThreadState::Pending;
        t.semaphore_pending = Some(sem);
        t.has_timeout = true;
        t.ticks_timeout = crate::time::now().plus(5);
    }
    {
        let s = state.semaphores[sem.index()].as_mut().unwrap();
        s.count = -1;
        list::priority_insert(&mut state.threads, &mut s.wait_head, &mut s.wait_tail, waiter);
    }
    list::timeout_insert(&mut state.threads, &mut state.timeout_head, &mut state.timeout_tail, waiter);

    for _ in 0..6 {
        sched::tick_locked(state);
    }

    assert_eq!(state.threads[waiter.index()].as_ref().unwrap().state, ThreadState::Ready);
    assert_eq!(state.threads[waiter.index()].as_ref().unwrap().return_code, -1);
    assert_eq!(state.semaphores[sem.index()].as_ref().unwrap().wait_head, None);
    assert_eq!(state.semaphores[sem.index()].as_ref().unwrap().count, 0);
    assert_eq!(state.timeout_head, None);
}

/// Several fixed-width messages survive a send/receive round trip through
/// the same queue in order, a full queue rejects one more send, and the
/// queue keeps working afterward once a slot frees up.
#[test]
fn mqueue_round_trip_preserves_message_order_and_content() {
    use crate::mqueue;

    let state = fresh_kernel();
    let q = make_queue(state, 2, 2);

    mqueue::send_locked(state, q, &[11, 22]).unwrap();
    mqueue::send_locked(state, q, &[33, 44]).unwrap();
    assert_eq!(
        mqueue::send_locked(state, q, &[99, 99]),
        Err(sched::KernelError::Exhausted),
        "a full queue must reject rather than overwrite"
    );

    let mut out = [0usize; 2];
    mqueue::get_locked(state, q, &mut out, 0).unwrap();
    assert_eq!(out, [11, 22]);
    mqueue::get_locked(state, q, &mut out, 0).unwrap();
    assert_eq!(out, [33, 44]);

    // Round two: same queue, fresh content, same outcome.
    mqueue::send_locked(state, q, &[5, 6]).unwrap();
    mqueue::get_locked(state, q, &mut out, 0).unwrap();
    assert_eq!(out, [5, 6]);
}

/// A periodic timer restarts itself for the next deadline instead of
/// going inactive, while a one-shot sharing the same list goes inactive
/// and drops out, leaving the periodic timer as the sole remaining head.
#[test]
fn periodic_timer_rearms_while_one_shot_deactivates() {
    let state = fresh_kernel();
    let q = make_queue(state, 4, 3);

    let periodic_slot = state.free_timer_slot().unwrap();
    state.timers[periodic_slot] = Some(Timer {
        name: Default::default(),
        prev: None,
        next: None,
        ticks_timeout: crate::time::Ticks::new(0),
        ticks_restart: 0,
        active: false,
        mqueue: Some(q),
        callback: None,
        info: 0,
    });
    let periodic = crate::handle::TimerId(periodic_slot as u16);

    let one_shot_slot = state.free_timer_slot().unwrap();
    state.timers[one_shot_slot] = Some(Timer {
        name: Default::default(),
        prev: None,
        next: None,
        ticks_timeout: crate::time::Ticks::new(0),
        ticks_restart: 0,
        active: false,
        mqueue: Some(q),
        callback: None,
        info: 0,
    });
    let one_shot = crate::handle::TimerId(one_shot_slot as u16);

    crate::timer::start_locked(state, periodic, 10, 10);
    crate::timer::start_locked(state, one_shot, 5, 0);
    assert_eq!(state.timer_head, Some(one_shot));

    // Fire the one-shot: it deactivates and drops off the list.
    crate::timer::stop_locked(state, one_shot);
    assert_eq!(state.timer_head, Some(periodic));
    assert!(!state.timers[one_shot.index()].as_ref().unwrap().active);

    // Fire and rearm the periodic timer for another 10 ticks.
    let restart = state.timers[periodic.index()].as_ref().unwrap().ticks_restart;
    crate::timer::start_locked(state, periodic, restart, restart);
    assert!(state.timers[periodic.index()].as_ref().unwrap().active);
    assert_eq!(state.timer_head, Some(periodic));
}

/// Allocating exactly a free block's size removes it from the free list
/// outright; the very next allocation of the same size reuses the
/// address freed a moment ago rather than carving fresh space.
#[test]
fn heap_reuses_an_exact_size_free_block() {
    let state = fresh_kernel();
    let id = heap::create_locked(state, 0, "h", Box::leak(vec![0u8; 4096].into_boxed_slice())).unwrap();

    let a = heap::alloc_locked(state, id, 64).unwrap();
    let b = heap::alloc_locked(state, id, 64).unwrap();
    assert_ne!(a, b);

    heap::free_locked(state, a);
    let c = heap::alloc_locked(state, id, 64).unwrap();
    assert_eq!(a, c, "exact-size reuse should hand back the freed address");
}
