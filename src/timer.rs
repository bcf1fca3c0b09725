//! Sorted timer list and its dedicated service thread.
//!
//! Grounded in `OS_Timer_s`/`OS_TimerThread/Create/Start/Stop/Delete`. The
//! service thread is started lazily, on the first `timer::create` call,
//! exactly like the original's `SemaphoreTimer == NULL` check. The
//! original always delivers expiry through an `OS_MQueue_t`; this port
//! additionally supports a direct callback (`timer_set_callback` in the
//! external interface list), since a caller with no queue of its own
//! shouldn't have to create one just to be notified. A timer with a
//! callback set is delivered that way instead of by message; at most one
//! delivery happens per expiry.

use crate::handle::{MQueueId, SemaphoreId, TimerId};
use crate::mqueue;
use crate::sched::KernelState;
use crate::sync::semaphore;
use crate::time::{FOREVER, Ticks};

pub const MESSAGE_TYPE_TIMER: usize = 1;

const TIMER_THREAD_PRIORITY: u8 = 250;
const TIMER_THREAD_STACK: usize = 2000;

pub type TimerCallback = fn(TimerId, usize);

pub struct Timer {
    pub name: heapless::String<16>,
    pub prev: Option<TimerId>,
    pub next: Option<TimerId>,
    pub ticks_timeout: Ticks,
    pub ticks_restart: u32,
    pub active: bool,
    pub mqueue: Option<MQueueId>,
    pub callback: Option<TimerCallback>,
    pub info: usize,
}

/// Register a brand-new, inactive timer that delivers expiry as a
/// three-word message (`[MESSAGE_TYPE_TIMER, timer id, info]`) to
/// `mqueue`, same shape as the original's `message[0..2]`. Starts the
/// (process-wide, shared) timer service thread the first time any timer
/// is created.
pub fn create(name: &str, mqueue: MQueueId, info: usize) -> Result<TimerId, &'static str> {
    create_with_delivery(name, Some(mqueue), None, info)
}

/// Register a brand-new, inactive timer that delivers expiry by calling
/// `callback(timer, info)` directly from the timer service thread.
pub fn create_with_callback(
    name: &str,
    callback: TimerCallback,
    info: usize,
) -> Result<TimerId, &'static str> {
    create_with_delivery(name, None, Some(callback), info)
}

fn create_with_delivery(
    name: &str,
    mqueue: Option<MQueueId>,
    callback: Option<TimerCallback>,
    info: usize,
) -> Result<TimerId, &'static str> {
    let cs = crate::critical::critical_begin();
    let (id, start_thread) = crate::sched::with_kernel(|state| -> Result<(TimerId, bool), &'static str> {
        let slot = state.free_timer_slot().ok_or("timer table full")?;
        let mut start_thread = false;
        if state.timer_semaphore.is_none() {
            let sem = semaphore::create_locked(state, "Timer", 0)?;
            state.timer_semaphore = Some(sem);
            start_thread = true;
        }
        state.timers[slot] = Some(Timer {
            name: heapless::String::try_from(name).unwrap_or_default(),
            prev: None,
            next: None,
            ticks_timeout: Ticks::new(0),
            ticks_restart: 0,
            active: false,
            mqueue,
            callback,
            info,
        });
        Ok((TimerId(slot as u16), start_thread))
    })?;
    crate::critical::critical_end(cs);

    if start_thread {
        crate::sched::thread_create(
            "Timer",
            timer_thread_entry,
            0,
            TIMER_THREAD_PRIORITY,
            TIMER_THREAD_STACK,
        )
        .map_err(|_| "could not start timer service thread")?;
    }
    Ok(id)
}

/// Replace `id`'s delivery with a direct callback, clearing any queue it
/// was previously bound to.
pub fn set_callback(id: TimerId, callback: TimerCallback) {
    let cs = crate::critical::critical_begin();
    crate::sched::with_kernel(|state| {
        let t = state.timers[id.index()].as_mut().unwrap();
        t.callback = Some(callback);
        t.mqueue = None;
    });
    crate::critical::critical_end(cs);
}

pub fn delete(id: TimerId) {
    stop(id);
    let cs = crate::critical::critical_begin();
    crate::sched::with_kernel(|state| state.timers[id.index()] = None);
    crate::critical::critical_end(cs);
}

/// Arm `id` to fire `ticks` from now, restarting every `ticks_restart`
/// ticks thereafter (`0` for one-shot). Returns whether `id` became the
/// new list head, in which case the caller still owes the timer service
/// thread a wakeup post.
pub(crate) fn start_locked(state: &mut KernelState, id: TimerId, ticks: u32, ticks_restart: u32) -> bool {
    if state.timers[id.index()].as_ref().unwrap().active {
        stop_locked(state, id);
    }

    let deadline = crate::time::now().plus(ticks);
    {
        let t = state.timers[id.index()].as_mut().unwrap();
        t.ticks_timeout = deadline;
        t.ticks_restart = ticks_restart;
        t.active = true;
    }

    let mut prev: Option<TimerId> = None;
    let mut node = state.timer_head;
    while let Some(n) = node {
        let n_deadline = state.timers[n.index()].as_ref().unwrap().ticks_timeout;
        if n_deadline.after(deadline) {
            break;
        }
        prev = Some(n);
        node = state.timers[n.index()].as_ref().unwrap().next;
    }

    {
        let t = state.timers[id.index()].as_mut().unwrap();
        t.next = node;
        t.prev = prev;
    }
    if let Some(n) = node {
        state.timers[n.index()].as_mut().unwrap().prev = Some(id);
    }
    match prev {
        None => {
            state.timer_head = Some(id);
            true
        }
        Some(p) => {
            state.timers[p.index()].as_mut().unwrap().next = Some(id);
            false
        }
    }
}

/// Arm `id` to fire `ticks` from now, restarting every `ticks_restart`
/// ticks thereafter (`0` for one-shot). Must not be called from an ISR —
/// matches the original's comment, since it inserts into a sorted list
/// behind the same critical section an ISR might already be inside.
pub fn start(id: TimerId, ticks: u32, ticks_restart: u32) {
    let cs = crate::critical::critical_begin();
    let became_head = crate::sched::with_kernel(|state| start_locked(state, id, ticks, ticks_restart));
    crate::critical::critical_end(cs);

    if became_head {
        let sem = crate::sched::with_kernel(|state| state.timer_semaphore.unwrap());
        semaphore::post(sem);
    }
}

pub(crate) fn stop_locked(state: &mut KernelState, id: TimerId) {
    let active = state.timers[id.index()].as_ref().unwrap().active;
    if !active {
        return;
    }
    state.timers[id.index()].as_mut().unwrap().active = false;
    let (prev, next) = {
        let t = state.timers[id.index()].as_ref().unwrap();
        (t.prev, t.next)
    };
    match prev {
        None => state.timer_head = next,
        Some(p) => state.timers[p.index()].as_mut().unwrap().next = next,
    }
    if let Some(n) = next {
        state.timers[n.index()].as_mut().unwrap().prev = prev;
    }
}

pub fn stop(id: TimerId) {
    let cs = crate::critical::critical_begin();
    crate::sched::with_kernel(|state| stop_locked(state, id));
    crate::critical::critical_end(cs);
}

fn ticks_head_timeout(state: &KernelState) -> Option<Ticks> {
    state
        .timer_head
        .map(|h| state.timers[h.index()].as_ref().unwrap().ticks_timeout)
}

fn timer_semaphore(state: &KernelState) -> SemaphoreId {
    state.timer_semaphore.expect("timer thread started without a semaphore")
}

fn timer_thread_entry(_arg: usize) {
    loop {
        let cs = crate::critical::critical_begin();
        let next_deadline = crate::sched::with_kernel(|state| ticks_head_timeout(state));
        crate::critical::critical_end(cs);

        let wait = match next_deadline {
            Some(deadline) => {
                let now = crate::time::now();
                if now.reached(deadline) {
                    0
                } else {
                    deadline.0.wrapping_sub(now.0)
                }
            }
            None => FOREVER,
        };
        let sem = crate::sched::with_kernel(|state| timer_semaphore(state));
        let _ = semaphore::pend(sem, wait);

        loop {
            let now = crate::time::now();
            let cs = crate::critical::critical_begin();
            let due = crate::sched::with_kernel(|state| {
                let head = state.timer_head?;
                let deadline = state.timers[head.index()].as_ref().unwrap().ticks_timeout;
                if now.reached(deadline) { Some(head) } else { None }
            });
            crate::critical::critical_end(cs);

            let head = match due {
                Some(h) => h,
                None => break,
            };

            let (restart, queue, callback, info) = crate::sched::with_kernel(|state| {
                let t = state.timers[head.index()].as_ref().unwrap();
                (t.ticks_restart, t.mqueue, t.callback, t.info)
            });

            if restart != 0 {
                start(head, restart, restart);
            } else {
                stop(head);
            }

            if let Some(f) = callback {
                f(head, info);
            } else if let Some(queue) = queue {
                let message = [MESSAGE_TYPE_TIMER, head.0 as usize, info];
                let _ = mqueue::send(queue, &message);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::test_support::fresh_kernel;

    fn make_queue(state: &mut crate::sched::KernelState) -> MQueueId {
        let region = Box::leak(vec![0u8; 4096].into_boxed_slice());
        crate::heap::create_locked(state, 0, "sys", region).unwrap();
        mqueue::create_locked(state, "q", 4, 3).unwrap()
    }

    #[test]
    fn start_inserts_in_deadline_order() {
        let state = fresh_kernel();
        let q = make_queue(state);
        state.timer_semaphore = Some(semaphore::create_locked(state, "Timer", 0).unwrap());

        let slow = TimerId(
            {
                let slot = state.free_timer_slot().unwrap();
                state.timers[slot] = Some(Timer {
                    name: Default::default(),
                    prev: None,
                    next: None,
                    ticks_timeout: Ticks::new(0),
                    ticks_restart: 0,
                    active: false,
                    mqueue: Some(q),
                    callback: None,
                    info: 0,
                });
                slot as u16
            },
        );
        let fast = TimerId(
            {
                let slot = state.free_timer_slot().unwrap();
                state.timers[slot] = Some(Timer {
                    name: Default::default(),
                    prev: None,
                    next: None,
                    ticks_timeout: Ticks::new(0),
                    ticks_restart: 0,
                    active: false,
                    mqueue: Some(q),
                    callback: None,
                    info: 0,
                });
                slot as u16
            },
        );

        start_locked(state, slow, 100, 0);
        start_locked(state, fast, 10, 0);

        assert_eq!(state.timer_head, Some(fast));
        assert_eq!(state.timers[fast.index()].as_ref().unwrap().next, Some(slow));
    }

    #[test]
    fn stop_unlinks_without_touching_others() {
        let state = fresh_kernel();
        let q = make_queue(state);
        state.timer_semaphore = Some(semaphore::create_locked(state, "Timer", 0).unwrap());

        let slot_a = state.free_timer_slot().unwrap();
        state.timers[slot_a] = Some(Timer {
            name: Default::default(),
            prev: None,
            next: None,
            ticks_timeout: Ticks::new(0),
            ticks_restart: 0,
            active: false,
            mqueue: Some(q),
            callback: None,
            info: 0,
        });
        let a = TimerId(slot_a as u16);
        let slot_b = state.free_timer_slot().unwrap();
        state.timers[slot_b] = Some(Timer {
            name: Default::default(),
            prev: None,
            next: None,
            ticks_timeout: Ticks::new(0),
            ticks_restart: 0,
            active: false,
            mqueue: Some(q),
            callback: None,
            info: 0,
        });
        let b = TimerId(slot_b as u16);

        start_locked(state, a, 10, 0);
        start_locked(state, b, 20, 0);
        stop_locked(state, a);

        assert_eq!(state.timer_head, Some(b));
        assert_eq!(state.timers[b.index()].as_ref().unwrap().prev, None);
    }
}
