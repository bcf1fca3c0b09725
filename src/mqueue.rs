//! Bounded, fixed-width message queues.
//!
//! Grounded in `OS_MQueue_s`/`OS_MQueueSend/Get`. Storage for the message
//! ring is a single heap allocation sized `capacity * slot_words` machine
//! words; the original counts bytes (`MessageBytes`) and divides by
//! `sizeof(uint32)` to get
//! `size` — this port takes the word count directly, since `usize` is
//! already the platform's native word on every target it's built for.
//! `send` never blocks; `get` blocks on an internal semaphore counting
//! queued messages.

use crate::handle::{HEAP_SYSTEM, MQueueId, SemaphoreId};
use crate::heap;
use crate::sched::{KernelError, KernelState};
use crate::sync::semaphore;

pub struct MQueue {
    pub name: heapless::String<16>,
    pub(crate) semaphore: SemaphoreId,
    pub(crate) storage: *mut usize,
    pub(crate) capacity: usize,
    pub(crate) slot_words: usize,
    pub(crate) used: usize,
    pub(crate) read: usize,
    pub(crate) write: usize,
}

unsafe impl Send for MQueue {}

pub fn create_locked(
    state: &mut KernelState,
    name: &str,
    capacity: usize,
    slot_words: usize,
) -> Result<MQueueId, &'static str> {
    let slot = state.free_mqueue_slot().ok_or("mqueue table full")?;
    let bytes = capacity
        .checked_mul(slot_words)
        .and_then(|w| w.checked_mul(core::mem::size_of::<usize>()))
        .ok_or("mqueue capacity overflow")?;
    let storage = if bytes == 0 {
        core::ptr::null_mut()
    } else {
        heap::alloc_locked(state, HEAP_SYSTEM, bytes)? as *mut usize
    };
    let sem = semaphore::create_locked(state, name, 0)?;

    state.mqueues[slot] = Some(MQueue {
        name: heapless::String::try_from(name).unwrap_or_default(),
        semaphore: sem,
        storage,
        capacity,
        slot_words,
        used: 0,
        read: 0,
        write: 0,
    });
    Ok(MQueueId(slot as u16))
}

pub fn create(name: &str, capacity: usize, slot_words: usize) -> Result<MQueueId, &'static str> {
    let cs = crate::critical::critical_begin();
    let result = crate::sched::with_kernel(|state| create_locked(state, name, capacity, slot_words));
    crate::critical::critical_end(cs);
    result
}

pub fn delete_locked(state: &mut KernelState, id: MQueueId) {
    let q = state.mqueues[id.index()].as_ref().unwrap();
    let sem = q.semaphore;
    let storage = q.storage as *mut u8;
    semaphore::delete_locked(state, sem);
    if !storage.is_null() {
        heap::free_locked(state, storage);
    }
    state.mqueues[id.index()] = None;
}

pub fn delete(id: MQueueId) {
    let cs = crate::critical::critical_begin();
    crate::sched::with_kernel(|state| delete_locked(state, id));
    crate::critical::critical_end(cs);
}

/// Copy `message` (`slot_words` words) into the queue if there is room,
/// then post the semaphore a waiting `get` is blocked on. Never blocks.
pub(crate) fn send_locked(state: &mut KernelState, id: MQueueId, message: &[usize]) -> Result<(), KernelError> {
    let q = state.mqueues[id.index()].as_mut().unwrap();
    crate::kassert!(message.len() == q.slot_words, "message length does not match queue slot width");
    if q.used + 1 > q.capacity {
        return Err(KernelError::Exhausted);
    }
    q.used += 1;
    let write = q.write;
    let slot_words = q.slot_words;
    let storage = q.storage;
    unsafe {
        let dst = storage.add(write * slot_words);
        for (i, &word) in message.iter().enumerate() {
            *dst.add(i) = word;
        }
    }
    q.write = (write + 1) % q.capacity.max(1);
    let sem = q.semaphore;
    semaphore::post_body(state, sem);
    Ok(())
}

pub fn send(id: MQueueId, message: &[usize]) -> Result<(), KernelError> {
    let cs = crate::critical::critical_begin();
    let result = crate::sched::with_kernel(|state| send_locked(state, id, message));
    crate::critical::critical_end(cs);
    result
}

/// Block (up to `timeout` ticks) until a message is available, then copy
/// it into `message` (`slot_words` words).
pub(crate) fn get_locked(
    state: &mut KernelState,
    id: MQueueId,
    message: &mut [usize],
    timeout: u32,
) -> Result<(), KernelError> {
    let sem = state.mqueues[id.index()].as_ref().unwrap().semaphore;
    semaphore::pend_body(state, sem, timeout)?;

    let q = state.mqueues[id.index()].as_mut().unwrap();
    crate::kassert!(message.len() == q.slot_words, "message length does not match queue slot width");
    q.used -= 1;
    let read = q.read;
    let slot_words = q.slot_words;
    let storage = q.storage;
    unsafe {
        let src = storage.add(read * slot_words);
        for (i, word) in message.iter_mut().enumerate() {
            *word = *src.add(i);
        }
    }
    q.read = (read + 1) % q.capacity.max(1);
    Ok(())
}

pub fn get(id: MQueueId, message: &mut [usize], timeout: u32) -> Result<(), KernelError> {
    let cs = crate::critical::critical_begin();
    let result = crate::sched::with_kernel(|state| get_locked(state, id, message, timeout));
    crate::critical::critical_end(cs);
    result
}
