//! Intrusive, index-based doubly-linked lists over the thread arena.
//!
//! Mirrors `OS_ThreadPriorityInsert/Remove` and `OS_ThreadTimeoutInsert/
//! Remove` in the original: no allocation, just link-field surgery over a
//! fixed array, callable only with interrupts already disabled.

use crate::config::MAX_THREADS;
use crate::handle::{Link, ThreadId};

use super::Thread;

type Arena = [Option<Thread>; MAX_THREADS];

fn get(arena: &Arena, id: ThreadId) -> &Thread {
    arena[id.index()].as_ref().expect("dangling ThreadId")
}

fn get_mut(arena: &mut Arena, id: ThreadId) -> &mut Thread {
    arena[id.index()].as_mut().expect("dangling ThreadId")
}

/// Insert `id` into the priority list rooted at `head`/`tail`, strictly
/// descending by priority with FIFO order among equal priorities (new
/// arrivals go after existing ones of the same priority).
pub fn priority_insert(arena: &mut Arena, head: &mut Link, tail: &mut Link, id: ThreadId) {
    let priority = get(arena, id).priority;
    let mut cursor = *head;
    let mut prev: Link = None;

    while let Some(cur) = cursor {
        if get(arena, cur).priority < priority {
            break;
        }
        prev = Some(cur);
        cursor = get(arena, cur).prio_next;
    }

    get_mut(arena, id).prio_prev = prev;
    get_mut(arena, id).prio_next = cursor;

    match prev {
        Some(p) => get_mut(arena, p).prio_next = Some(id),
        None => *head = Some(id),
    }
    match cursor {
        Some(c) => get_mut(arena, c).prio_prev = Some(id),
        None => *tail = Some(id),
    }
}

/// Remove `id` from whichever priority list it currently sits in.
pub fn priority_remove(arena: &mut Arena, head: &mut Link, tail: &mut Link, id: ThreadId) {
    let (prev, next) = {
        let t = get(arena, id);
        (t.prio_prev, t.prio_next)
    };
    match prev {
        Some(p) => get_mut(arena, p).prio_next = next,
        None => *head = next,
    }
    match next {
        Some(n) => get_mut(arena, n).prio_prev = prev,
        None => *tail = prev,
    }
    let t = get_mut(arena, id);
    t.prio_prev = None;
    t.prio_next = None;
}

/// Insert `id` into the timeout list rooted at `head`/`tail`, ordered by
/// ascending `ticks_timeout` using wrap-safe comparison.
pub fn timeout_insert(arena: &mut Arena, head: &mut Link, tail: &mut Link, id: ThreadId) {
    let deadline = get(arena, id).ticks_timeout;
    let mut cursor = *head;
    let mut prev: Link = None;

    while let Some(cur) = cursor {
        let cur_deadline = get(arena, cur).ticks_timeout;
        if cur_deadline.after(deadline) {
            break;
        }
        prev = Some(cur);
        cursor = get(arena, cur).timeout_next;
    }

    get_mut(arena, id).timeout_prev = prev;
    get_mut(arena, id).timeout_next = cursor;

    match prev {
        Some(p) => get_mut(arena, p).timeout_next = Some(id),
        None => *head = Some(id),
    }
    match cursor {
        Some(c) => get_mut(arena, c).timeout_prev = Some(id),
        None => *tail = Some(id),
    }
}

/// Remove `id` from the timeout list. A no-op if it isn't currently in
/// one (mirrors the original's `prevTimeout == NULL && TimeoutHead !=
/// thread` guard).
pub fn timeout_remove(arena: &mut Arena, head: &mut Link, tail: &mut Link, id: ThreadId) {
    let (prev, next) = {
        let t = get(arena, id);
        (t.timeout_prev, t.timeout_next)
    };
    if prev.is_none() && *head != Some(id) {
        return;
    }
    match prev {
        Some(p) => get_mut(arena, p).timeout_next = next,
        None => *head = next,
    }
    match next {
        Some(n) => get_mut(arena, n).timeout_prev = prev,
        None => *tail = prev,
    }
    let t = get_mut(arena, id);
    t.timeout_prev = None;
    t.timeout_next = None;
}
