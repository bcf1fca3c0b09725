//! Lazy job dispatcher: a safe way for ISR-proximate code to defer a
//! 3-argument function call into thread context.
//!
//! No direct original-source counterpart — grounded in this crate's own
//! `mqueue`+`thread` primitives, the same way the original's own
//! ISR-safe deferrals (timer expiry, say) ride on an `OS_MQueue_t`. The
//! first `job::submit` lazily creates a 100-entry, 4-word queue and a
//! worker thread that `get`s it forever.

use crate::handle::MQueueId;
use crate::mqueue;
use crate::sched::KernelState;

const JOB_QUEUE_CAPACITY: usize = 100;
const JOB_SLOT_WORDS: usize = 4;
const JOB_THREAD_PRIORITY: u8 = 200;
const JOB_THREAD_STACK: usize = 2000;

pub struct JobState {
    queue: MQueueId,
}

pub type JobFn = fn(usize, usize, usize);

/// Defer `f(a, b, c)` to the shared worker thread. Never blocks once the
/// dispatcher is up; the very first call pays the cost of starting it.
pub fn submit(f: JobFn, a: usize, b: usize, c: usize) -> Result<(), &'static str> {
    let (queue, start_thread) = ensure_started()?;
    let message = [f as usize, a, b, c];
    mqueue::send(queue, &message).map_err(|_| "job queue full")?;
    let _ = start_thread;
    Ok(())
}

fn ensure_started() -> Result<(MQueueId, bool), &'static str> {
    let cs = crate::critical::critical_begin();
    let result = crate::sched::with_kernel(|state: &mut KernelState| -> Result<(MQueueId, bool), &'static str> {
        if let Some(job) = &state.job {
            return Ok((job.queue, false));
        }
        let queue = mqueue::create_locked(state, "Job", JOB_QUEUE_CAPACITY, JOB_SLOT_WORDS)?;
        state.job = Some(JobState { queue });
        Ok((queue, true))
    });
    crate::critical::critical_end(cs);

    if let Ok((_, true)) = result {
        crate::sched::thread_create(
            "Job",
            job_thread_entry,
            0,
            JOB_THREAD_PRIORITY,
            JOB_THREAD_STACK,
        )
        .map_err(|_| "could not start job dispatcher thread")?;
    }
    result
}

fn job_thread_entry(_arg: usize) {
    let queue = crate::sched::with_kernel(|state| state.job.as_ref().unwrap().queue);
    loop {
        let mut message = [0usize; JOB_SLOT_WORDS];
        if mqueue::get(queue, &mut message, crate::time::FOREVER).is_err() {
            continue;
        }
        let f: JobFn = unsafe { core::mem::transmute(message[0]) };
        f(message[1], message[2], message[3]);
    }
}
