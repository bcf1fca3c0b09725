//! The kernel's global state and the preemptive scheduler built over it.
//!
//! Grounded in `rtos.c`'s `OS_Thread*`/`OS_Init`/`OS_Start`/`OS_ThreadTick`
//! family. Every other module (`sync`, `mqueue`, `timer`, `job`, `isr`,
//! `heap`) operates on `&mut KernelState` rather than taking its own lock,
//! because the kernel's single synchronization primitive is the critical
//! section (`crate::critical`), not a set of fine-grained locks — see
//! `with_kernel`'s doc comment for why a conventional mutex guard doesn't
//! work here.

use crate::arch::{self, Context};
use crate::config::{MAX_MQUEUES, MAX_MUTEXES, MAX_SEMAPHORES, MAX_THREADS, MAX_TIMERS, NUM_CPUS};
use crate::handle::{HEAP_SYSTEM, Link, MQueueId, MutexId, SemaphoreId, ThreadId, TimerId};
use crate::heap::{self, HeapTable};
use crate::job::JobState;
use crate::mqueue::MQueue;
use crate::sync::mutex::Mutex;
use crate::sync::semaphore::{self, Semaphore};
use crate::thread::{Thread, ThreadState, list};
use crate::time::{self, Ticks};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// Pend/get timed out before the resource became available.
    Timeout,
    /// A fixed-size arena or heap region is full.
    Exhausted,
    /// A handle named something that no longer (or never did) exist.
    InvalidHandle,
}

/// All kernel-owned state. A single instance lives in the process-wide
/// static below; tests construct additional, independent instances via
/// `test_support::fresh_kernel`.
pub struct KernelState {
    pub(crate) threads: [Option<Thread>; MAX_THREADS],
    pub(crate) ready_head: Link,
    pub(crate) ready_tail: Link,
    pub(crate) timeout_head: Link,
    pub(crate) timeout_tail: Link,

    pub(crate) current: [Option<ThreadId>; NUM_CPUS],
    pub(crate) swap_enabled: bool,
    pub(crate) inside_interrupt: [bool; NUM_CPUS],
    pub(crate) need_reschedule: [Option<bool>; NUM_CPUS],
    pub(crate) need_to_free: Option<ThreadId>,
    pub(crate) thread_high_water: usize,

    pub(crate) semaphores: [Option<Semaphore>; MAX_SEMAPHORES],
    pub(crate) mutexes: [Option<Mutex>; MAX_MUTEXES],
    pub(crate) mqueues: [Option<MQueue>; MAX_MQUEUES],
    pub(crate) timers: [Option<crate::timer::Timer>; MAX_TIMERS],

    pub(crate) timer_head: Option<TimerId>,
    pub(crate) timer_semaphore: Option<SemaphoreId>,
    pub(crate) timer_thread_started: bool,

    pub(crate) job: Option<JobState>,

    pub(crate) heaps: HeapTable,
    pub(crate) isr_table: [Option<fn()>; crate::config::ISR_SLOTS],
    pub(crate) isr_mask: u32,

    pub(crate) sleep_semaphore: Option<SemaphoreId>,
}

impl KernelState {
    pub(crate) fn empty() -> Self {
        KernelState {
            threads: [const { None }; MAX_THREADS],
            ready_head: None,
            ready_tail: None,
            timeout_head: None,
            timeout_tail: None,
            current: [None; NUM_CPUS],
            swap_enabled: false,
            inside_interrupt: [false; NUM_CPUS],
            need_reschedule: [None; NUM_CPUS],
            need_to_free: None,
            thread_high_water: 0,
            semaphores: [const { None }; MAX_SEMAPHORES],
            mutexes: [const { None }; MAX_MUTEXES],
            mqueues: [const { None }; MAX_MQUEUES],
            timers: [const { None }; MAX_TIMERS],
            timer_head: None,
            timer_semaphore: None,
            timer_thread_started: false,
            job: None,
            heaps: HeapTable::new(),
            isr_table: [None; crate::config::ISR_SLOTS],
            isr_mask: 0,
            sleep_semaphore: None,
        }
    }

    pub fn thread_high_water(&self) -> usize {
        self.thread_high_water
    }

    fn live_thread_count(&self) -> usize {
        self.threads.iter().filter(|t| t.is_some()).count()
    }

    fn free_thread_slot(&self) -> Option<usize> {
        self.threads.iter().position(|t| t.is_none())
    }

    pub(crate) fn free_semaphore_slot(&self) -> Option<usize> {
        self.semaphores.iter().position(|s| s.is_none())
    }

    pub(crate) fn free_mutex_slot(&self) -> Option<usize> {
        self.mutexes.iter().position(|m| m.is_none())
    }

    pub(crate) fn free_mqueue_slot(&self) -> Option<usize> {
        self.mqueues.iter().position(|q| q.is_none())
    }

    pub(crate) fn free_timer_slot(&self) -> Option<usize> {
        self.timers.iter().position(|t| t.is_none())
    }
}

struct KernelCell(core::cell::UnsafeCell<Option<KernelState>>);
unsafe impl Sync for KernelCell {}

static KERNEL: KernelCell = KernelCell(core::cell::UnsafeCell::new(None));

/// Replace the process-wide kernel state. Called once by `crate::init`.
pub(crate) fn install(state: KernelState) {
    let cs = crate::critical::critical_begin();
    unsafe {
        *KERNEL.0.get() = Some(state);
    }
    crate::critical::critical_end(cs);
}

/// Borrow the process-wide kernel state. Every call site must already be
/// inside a critical section (`critical::critical_begin`): there is no
/// separate lock guard here on purpose. A conventional `spin::Mutex`
/// guard would need to stay alive across a context switch whenever a
/// blocking primitive (`semaphore::pend`, `heap::alloc`, ...) decides to
/// suspend the calling thread, and a switch abandons the current call
/// stack — including any live guard on it — without running its `Drop`.
/// The kernel's real exclusion is the disabled-interrupts (plus, on
/// multi-CPU builds, ticket-lock) critical section, which survives a
/// switch correctly because each thread's own saved stack carries its own
/// half of the `critical_begin`/`critical_end` pair (see
/// `critical`'s module doc).
pub(crate) fn with_kernel<R>(f: impl FnOnce(&mut KernelState) -> R) -> R {
    let state = unsafe { (*KERNEL.0.get()).as_mut() }
        .expect("kernel not initialized; call crate::init::init() first");
    f(state)
}

/// Free whatever thread slot `exit_current_thread` staged last time
/// around, mirroring `OS_ThreadExit`'s deferred `OS_HeapFree(NeedToFree)`
/// — a thread cannot free its own stack while still running on it, so the
/// cleanup happens lazily, from inside whichever thread next creates or
/// exits.
pub(crate) fn reap_locked(state: &mut KernelState) {
    if let Some(dead) = state.need_to_free.take() {
        let stack = state.threads[dead.index()]
            .as_ref()
            .map(|t| t.stack_block());
        state.threads[dead.index()] = None;
        if let Some(stack) = stack {
            heap::free_locked(state, stack);
        }
    }
}

/// Decide which thread should run next and update `current`/ready-list
/// state accordingly. Returns `(previous, next)` if a switch is needed,
/// or `None` if the current thread should keep running. Never performs
/// the actual stack switch — see `reschedule`.
pub(crate) fn reschedule_locked(
    state: &mut KernelState,
    round_robin: bool,
) -> Option<(Option<ThreadId>, ThreadId)> {
    let cpu = arch::current_cpu();
    if !state.swap_enabled || state.inside_interrupt[cpu] {
        state.need_reschedule[cpu] = Some(round_robin);
        return None;
    }

    let head = state
        .ready_head
        .expect("no ready thread — the idle thread must never exit");

    let current = state.current[cpu];
    let current_running = current
        .map(|c| state.threads[c.index()].as_ref().unwrap().state == ThreadState::Running)
        .unwrap_or(false);

    let next = if !current_running {
        head
    } else {
        let cur = current.unwrap();
        let cur_priority = state.threads[cur.index()].as_ref().unwrap().priority;
        let head_priority = state.threads[head.index()].as_ref().unwrap().priority;
        if cur_priority < head_priority {
            head
        } else if round_robin {
            let cur_next = state.threads[cur.index()].as_ref().unwrap().prio_next;
            match cur_next {
                Some(n) if state.threads[n.index()].as_ref().unwrap().priority == head_priority => {
                    n
                }
                _ => head,
            }
        } else {
            cur
        }
    };

    if Some(next) == current {
        return None;
    }
    crate::sched_trace!("reschedule cpu {cpu}: {:?} -> {}", current, next.index());

    if let Some(c) = current {
        let t = state.threads[c.index()].as_mut().unwrap();
        if t.state == ThreadState::Running {
            t.state = ThreadState::Ready;
        }
    }
    state.threads[next.index()].as_mut().unwrap().state = ThreadState::Running;
    state.current[cpu] = Some(next);

    Some((current, next))
}

/// Run `reschedule_locked` and, if it decided a switch is needed, perform
/// it. Must be called from inside an open critical section; may not
/// return until this CPU picks the calling thread to run again.
pub(crate) fn reschedule(state: &mut KernelState, round_robin: bool) {
    if let Some((from, to)) = reschedule_locked(state, round_robin) {
        let next_ctx: *const Context = &state.threads[to.index()].as_ref().unwrap().context;
        match from {
            Some(f) => {
                crate::kassert!(
                    state.threads[f.index()].as_ref().unwrap().stack_intact(),
                    "thread stack overflow detected at context switch"
                );
                let cur_ctx: *mut Context = &mut state.threads[f.index()].as_mut().unwrap().context;
                unsafe {
                    (*cur_ctx).switch_to(&*next_ctx);
                }
            }
            None => {
                // First-ever switch: there is no thread to save the boot
                // stack into, so the outgoing context is thrown away.
                let mut boot = Context::new();
                unsafe {
                    boot.switch_to(&*next_ctx);
                }
            }
        }
    }
}

/// If a reschedule was deferred while inside an ISR or with swapping
/// disabled, run it now. Called once at the end of `isr::interrupt_service`.
pub(crate) fn run_deferred_reschedule(state: &mut KernelState) {
    let cpu = arch::current_cpu();
    if let Some(round_robin) = state.need_reschedule[cpu].take() {
        reschedule(state, round_robin);
    }
}

fn new_thread_id(slot: usize) -> ThreadId {
    ThreadId(slot as u16)
}

/// Create a thread, insert it onto the ready list, and reschedule. Used
/// both by `thread_create` (via `with_kernel`) and by `crate::init::init`,
/// which populates a `KernelState` directly before it is ever installed
/// as the process-wide kernel (so no critical section or `with_kernel`
/// call is available to it yet).
pub(crate) fn create_locked(
    state: &mut KernelState,
    name: &str,
    entry: fn(usize),
    arg: usize,
    priority: u8,
    stack_size: usize,
) -> Result<ThreadId, KernelError> {
    reap_locked(state);

    let stack = heap::alloc_locked(state, HEAP_SYSTEM, stack_size).map_err(|_| KernelError::Exhausted)?;
    let slot = state.free_thread_slot().ok_or_else(|| {
        heap::free_locked(state, stack);
        KernelError::Exhausted
    })?;

    let mut thread = Thread::new(name, priority, entry, arg, stack, stack_size);
    unsafe {
        thread.prepare();
    }
    state.threads[slot] = Some(thread);
    let id = new_thread_id(slot);

    list::priority_insert(&mut state.threads, &mut state.ready_head, &mut state.ready_tail, id);
    state.thread_high_water = state.thread_high_water.max(state.live_thread_count());
    Ok(id)
}

/// Create a thread, insert it onto the ready list, and reschedule.
/// `stack_size == 0` uses `config::STACK_DEFAULT`; anything below
/// `config::STACK_MINIMUM` is rounded up to it.
pub fn thread_create(
    name: &str,
    entry: fn(usize),
    arg: usize,
    priority: u8,
    stack_size: usize,
) -> Result<ThreadId, KernelError> {
    let stack_size = if stack_size == 0 {
        crate::config::STACK_DEFAULT
    } else {
        stack_size.max(crate::config::STACK_MINIMUM)
    };

    let cs = crate::critical::critical_begin();
    let result = with_kernel(|state| {
        let id = create_locked(state, name, entry, arg, priority, stack_size)?;
        reschedule(state, false);
        Ok(id)
    });
    crate::critical::critical_end(cs);
    result
}

/// Terminate the calling thread. Never returns.
pub fn exit_current_thread(code: i32) -> ! {
    let cs = crate::critical::critical_begin();
    with_kernel(|state| {
        reap_locked(state);
        let cpu = arch::current_cpu();
        let cur = state.current[cpu].expect("exit_current_thread with no current thread");
        state.threads[cur.index()].as_mut().unwrap().return_code = code;
        list::priority_remove(&mut state.threads, &mut state.ready_head, &mut state.ready_tail, cur);
        state.need_to_free = Some(cur);
        reschedule(state, false);
    });
    crate::critical::critical_end(cs);
    unreachable!("a thread staged for cleanup was scheduled again")
}

/// Landing point for a freshly-switched-into thread's trampoline: look up
/// and run its entry point, then exit on its behalf if it returns.
pub fn run_current_thread_entry() -> ! {
    let (entry, arg) = with_kernel(|state| {
        let cpu = arch::current_cpu();
        let cur = state.current[cpu].expect("trampoline with no current thread");
        let t = state.threads[cur.index()].as_ref().unwrap();
        (t.entry, t.arg)
    });
    (entry)(arg);
    exit_current_thread(0)
}

pub fn thread_self() -> ThreadId {
    with_kernel(|state| state.current[arch::current_cpu()].expect("no current thread"))
}

/// Block the calling thread for `ticks`, or forever on
/// [`crate::time::FOREVER`]. Implemented, like the original, as a pend on
/// a semaphore nothing ever posts — the only way it returns is via the
/// tick handler's timeout sweep.
pub fn thread_sleep(ticks: u32) {
    let sem = with_kernel(|state| state.sleep_semaphore.expect("kernel not initialized"));
    let _ = semaphore::pend(sem, ticks);
}

pub fn thread_time() -> Ticks {
    time::now()
}

pub fn thread_info_get(id: ThreadId, slot: usize) -> usize {
    with_kernel(|state| state.threads[id.index()].as_ref().unwrap().info[slot])
}

pub fn thread_info_set(id: ThreadId, slot: usize, value: usize) {
    with_kernel(|state| state.threads[id.index()].as_mut().unwrap().info[slot] = value);
}

pub fn thread_priority_get(id: ThreadId) -> u8 {
    with_kernel(|state| state.threads[id.index()].as_ref().unwrap().priority)
}

pub fn thread_priority_set(id: ThreadId, priority: u8) {
    let cs = crate::critical::critical_begin();
    with_kernel(|state| {
        list::priority_remove(&mut state.threads, &mut state.ready_head, &mut state.ready_tail, id);
        state.threads[id.index()].as_mut().unwrap().priority = priority;
        list::priority_insert(&mut state.threads, &mut state.ready_head, &mut state.ready_tail, id);
        reschedule(state, false);
    });
    crate::critical::critical_end(cs);
}

/// Advance kernel time by one tick, wake every thread whose timeout has
/// elapsed, and reschedule with round-robin among equal priorities.
/// Called from the tick ISR; must run with interrupts already disabled.
pub(crate) fn tick_locked(state: &mut KernelState) {
    let now = time::advance();

    loop {
        let head = match state.timeout_head {
            Some(h) => h,
            None => break,
        };
        let deadline = state.threads[head.index()].as_ref().unwrap().ticks_timeout;
        if !now.reached(deadline) {
            break;
        }

        list::timeout_remove(&mut state.threads, &mut state.timeout_head, &mut state.timeout_tail, head);

        let sem_id = state.threads[head.index()].as_mut().unwrap().semaphore_pending.take();
        if let Some(sem_id) = sem_id {
            let sem = state.semaphores[sem_id.index()].as_mut().unwrap();
            sem.count += 1;
            // head may sit anywhere in the priority-ordered wait list: the
            // timeout list is ordered by deadline, not priority, so a
            // lower-priority waiter can time out before one ahead of it.
            let sem = state.semaphores[sem_id.index()].as_mut().unwrap();
            list::priority_remove(&mut state.threads, &mut sem.wait_head, &mut sem.wait_tail, head);
        }
        {
            let t = state.threads[head.index()].as_mut().unwrap();
            t.return_code = -1;
            t.state = ThreadState::Ready;
        }
        list::priority_insert(&mut state.threads, &mut state.ready_head, &mut state.ready_tail, head);
    }

    reschedule(state, true);
}

#[cfg(test)]
pub mod test_support {
    use super::KernelState;
    use std::boxed::Box;

    /// A freestanding `KernelState`, unrelated to the process-wide
    /// static, for unit tests that exercise list/heap/semaphore logic
    /// directly against `&mut KernelState` without booting a scheduler.
    pub fn fresh_kernel() -> &'static mut KernelState {
        Box::leak(Box::new(KernelState::empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::Thread;

    fn with_thread(state: &mut KernelState, priority: u8) -> ThreadId {
        let stack = Box::leak(vec![0u8; 256].into_boxed_slice());
        let mut t = Thread::new("t", priority, |_| {}, 0, stack.as_mut_ptr(), 256);
        t.state = ThreadState::Ready;
        let slot = state.free_thread_slot().unwrap();
        state.threads[slot] = Some(t);
        let id = new_thread_id(slot);
        list::priority_insert(&mut state.threads, &mut state.ready_head, &mut state.ready_tail, id);
        id
    }

    #[test]
    fn higher_priority_preempts() {
        let state = test_support::fresh_kernel();
        state.swap_enabled = true;
        let low = with_thread(state, 1);
        state.current[0] = Some(low);
        state.threads[low.index()].as_mut().unwrap().state = ThreadState::Running;

        let _high = with_thread(state, 10);
        let decision = reschedule_locked(state, false);
        assert!(decision.is_some());
        let (_from, to) = decision.unwrap();
        assert_eq!(state.threads[to.index()].as_ref().unwrap().priority, 10);
    }

    #[test]
    fn round_robin_rotates_equal_priority() {
        let state = test_support::fresh_kernel();
        state.swap_enabled = true;
        let a = with_thread(state, 5);
        let b = with_thread(state, 5);
        state.current[0] = Some(a);
        state.threads[a.index()].as_mut().unwrap().state = ThreadState::Running;

        let decision = reschedule_locked(state, true);
        let (_from, to) = decision.expect("round robin should rotate to sibling");
        assert_eq!(to, b);
    }

    #[test]
    fn same_thread_is_not_a_switch() {
        let state = test_support::fresh_kernel();
        state.swap_enabled = true;
        let only = with_thread(state, 5);
        state.current[0] = Some(only);
        state.threads[only.index()].as_mut().unwrap().state = ThreadState::Running;
        assert!(reschedule_locked(state, false).is_none());
    }

    #[test]
    fn disabled_swap_defers_reschedule() {
        let state = test_support::fresh_kernel();
        state.swap_enabled = false;
        let _t = with_thread(state, 5);
        assert!(reschedule_locked(state, true).is_none());
        assert_eq!(state.need_reschedule[0], Some(true));
    }
}
