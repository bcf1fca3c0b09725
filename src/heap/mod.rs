//! First-fit free-list heap allocator with a process-wide table of named
//! heaps, grounded in the original `OS_Heap*` family (`rtos.c`).
//!
//! A heap owns one contiguous, caller-supplied `&'static mut [u8]` region.
//! The region is carved into fixed-size "units" (`size_of::<Node>()` bytes
//! each); every free or allocated block is a whole number of units and
//! begins with a `Node`. A free block's `Node` is a circular singly-linked
//! free-list entry (`link` = next free node, address order, wrapping
//! through `base`); an allocated block's `Node` has `link` repurposed to
//! point back at the owning `Heap` and `magic` set to [`HEAP_MAGIC`], so
//! `free` can recover which heap a bare pointer belongs to and detect a
//! double free or a corrupted header.
//!
//! Unlike threads/semaphores/mutexes/queues/timers, heap memory is *not*
//! arena-indexed — it is the caller's own byte region, addressed by real
//! pointers, the one place raw memory genuinely is the right shape (the
//! heap's backing region itself has nowhere else to live).

use core::ptr;

use crate::config::HEAP_TABLE_SIZE;
use crate::handle::HeapId;
use crate::sched::KernelState;
use crate::sync::semaphore;
use crate::time::FOREVER;

/// Sentinel written into an allocated block's header. Chosen to look
/// nothing like a plausible free-list pointer or size, for whatever good
/// a magic number does against real corruption.
pub const HEAP_MAGIC: u32 = 0xDEC0_DED0;

#[repr(C)]
struct Node {
    /// Free: address of the next free node (wraps through `base`).
    /// Allocated: address of the owning `Heap`, reinterpreted.
    link: usize,
    /// Size of this block in units, header included.
    size: usize,
    /// `HEAP_MAGIC` while allocated; `0` while free.
    magic: u32,
}

const UNIT: usize = core::mem::size_of::<Node>();

/// A single named heap over a caller-owned region.
pub struct Heap {
    name: heapless::String<16>,
    guard: crate::handle::SemaphoreId,
    region: *mut u8,
    region_units: usize,
    /// Rolling first-fit search cursor (the original's `OS_HeapLast`
    /// equivalent, named `available` there). Reset to `&base` if the node
    /// it points at ever falls outside the free list.
    available: *mut Node,
    /// Circular list sentinel: `base.link` always points to a real free
    /// node (or to `base` itself when the heap is fully allocated).
    base: Node,
    alternate: Option<HeapId>,
}

unsafe impl Send for Heap {}

impl Heap {
    fn node_at(&self, addr: *mut Node) -> &Node {
        unsafe { &*addr }
    }

    fn node_at_mut(&mut self, addr: *mut Node) -> &mut Node {
        unsafe { &mut *addr }
    }

    fn base_ptr(&mut self) -> *mut Node {
        &mut self.base as *mut Node
    }
}

/// The process-wide table mapping small integer keys to heaps.
pub struct HeapTable {
    slots: [Option<Heap>; HEAP_TABLE_SIZE],
}

impl HeapTable {
    pub const fn new() -> Self {
        HeapTable {
            slots: [const { None }; HEAP_TABLE_SIZE],
        }
    }
}

fn key_of(state: &KernelState, id: HeapId) -> u8 {
    match id {
        HeapId::Key(k) => k,
        HeapId::Default => {
            let cpu = crate::arch::current_cpu();
            match state.current[cpu] {
                Some(tid) => match state.threads[tid.index()].as_ref().unwrap().heap_binding {
                    HeapId::Key(k) => k,
                    HeapId::Default => 0,
                },
                None => 0,
            }
        }
    }
}

/// Lay out a fresh heap header at the start of `region` and register it at
/// table slot `key`. `region` must be at least large enough for one `Node`
/// plus a handful of allocation units or every `alloc` will exhaust it.
pub fn create_locked(
    state: &mut KernelState,
    key: u8,
    name: &str,
    region: &'static mut [u8],
) -> Result<HeapId, &'static str> {
    if key as usize >= HEAP_TABLE_SIZE {
        return Err("heap table key out of range");
    }
    if (region.as_ptr() as usize) % core::mem::align_of::<Node>() != 0 {
        return Err("heap region is not word aligned");
    }
    let region_units = region.len() / UNIT;
    if region_units < 2 {
        return Err("heap region too small");
    }

    let guard = semaphore::create_locked(state, name, 1)?;
    let region_ptr = region.as_mut_ptr();

    let mut heap = Heap {
        name: heapless::String::try_from(name).unwrap_or_default(),
        guard,
        region: region_ptr,
        region_units,
        available: ptr::null_mut(),
        base: Node {
            link: 0,
            size: 0,
            magic: 0,
        },
        alternate: None,
    };

    // The whole region starts out as a single free node.
    let free_node = region_ptr as *mut Node;
    unsafe {
        (*free_node).size = region_units;
        (*free_node).magic = 0;
    }
    let base_ptr: *mut Node = &mut heap.base;
    unsafe {
        (*free_node).link = base_ptr as usize;
    }
    heap.base.link = free_node as usize;
    heap.available = free_node;

    state.heaps.slots[key as usize] = Some(heap);
    crate::diag::log_heap_created(name, region_units * UNIT);
    Ok(HeapId::Key(key))
}

/// `create_locked`, wrapped in the kernel's own critical section —
/// folds the original's separate `OS_HeapCreate` + `HeapArray[key] = ...`
/// "register" step into one call, since `key` already says which table
/// slot to publish into.
pub fn create(key: u8, name: &str, region: &'static mut [u8]) -> Result<HeapId, &'static str> {
    let cs = crate::critical::critical_begin();
    let result = crate::sched::with_kernel(|state| create_locked(state, key, name, region));
    crate::critical::critical_end(cs);
    result
}

pub fn alloc(id: HeapId, bytes: usize) -> Result<*mut u8, &'static str> {
    let cs = crate::critical::critical_begin();
    let result = crate::sched::with_kernel(|state| alloc_locked(state, id, bytes));
    crate::critical::critical_end(cs);
    result
}

pub fn free(block: *mut u8) {
    let cs = crate::critical::critical_begin();
    crate::sched::with_kernel(|state| free_locked(state, block));
    crate::critical::critical_end(cs);
}

pub fn alternate(id: HeapId, alt: Option<HeapId>) {
    let cs = crate::critical::critical_begin();
    crate::sched::with_kernel(|state| alternate_locked(state, id, alt));
    crate::critical::critical_end(cs);
}

pub fn destroy(id: HeapId) {
    let cs = crate::critical::critical_begin();
    crate::sched::with_kernel(|state| destroy_locked(state, id));
    crate::critical::critical_end(cs);
}

/// Round `bytes` up to whole allocation units, plus the header itself.
fn units_for(bytes: usize) -> usize {
    (bytes + UNIT - 1) / UNIT + 1
}

/// First-fit allocate `bytes` from `id`, falling back to `alternate` on
/// exhaustion. Blocks on the heap's guard semaphore if contended (never
/// the case on a single-CPU build unless `alloc` itself is re-entered from
/// an ISR, which is a usage error the guard's "no blocking in ISR" rule
/// catches).
pub fn alloc_locked(
    state: &mut KernelState,
    id: HeapId,
    bytes: usize,
) -> Result<*mut u8, &'static str> {
    let key = key_of(state, id);
    let nunits = units_for(bytes);

    let guard = state.heaps.slots[key as usize]
        .as_ref()
        .ok_or("no such heap")?
        .guard;
    semaphore::pend_body(state, guard, FOREVER).ok();

    let heap = state.heaps.slots[key as usize].as_mut().ok_or("no such heap")?;
    let result = alloc_from(heap, nunits);
    semaphore::post_body(state, guard);
    crate::sched_trace!("heap {key} alloc {bytes} bytes -> {:?}", result);

    match result {
        Some(ptr) => Ok(ptr),
        None => {
            let alternate = state.heaps.slots[key as usize].as_ref().unwrap().alternate;
            match alternate {
                Some(alt) => alloc_locked(state, alt, bytes),
                None => Err("heap exhausted"),
            }
        }
    }
}

/// K&R-style circular first-fit search starting from the rolling cursor.
fn alloc_from(heap: &mut Heap, nunits: usize) -> Option<*mut u8> {
    let start = heap.available;
    let mut prev = start;
    loop {
        let node_ptr = heap.node_at(prev).link as *mut Node;
        let node_size = heap.node_at(node_ptr).size;

        if node_size >= nunits {
            if node_size == nunits {
                let next = heap.node_at(node_ptr).link;
                heap.node_at_mut(prev).link = next;
            } else {
                heap.node_at_mut(node_ptr).size = node_size - nunits;
                let tail = unsafe { node_ptr.add(node_size - nunits) };
                heap.node_at_mut(tail).size = nunits;
                return Some(finish_alloc(heap, tail));
            }
            heap.available = prev;
            return Some(finish_alloc(heap, node_ptr));
        }

        if node_ptr == start {
            return None; // wrapped all the way around
        }
        prev = node_ptr;
    }
}

fn finish_alloc(heap: &mut Heap, node_ptr: *mut Node) -> *mut u8 {
    let owner: *mut Heap = heap as *mut Heap;
    let node = heap.node_at_mut(node_ptr);
    node.link = owner as usize;
    node.magic = HEAP_MAGIC;
    unsafe { node_ptr.add(1) as *mut u8 }
}

/// Recover the owning heap from `block`'s header, verify it, and return
/// the block to that heap's free list, coalescing with address-adjacent
/// free neighbors.
pub fn free_locked(state: &mut KernelState, block: *mut u8) {
    if block.is_null() {
        return;
    }
    let node_ptr = unsafe { (block as *mut Node).offset(-1) };
    let (owner_addr, magic) = unsafe { ((*node_ptr).link, (*node_ptr).magic) };

    if magic != HEAP_MAGIC {
        crate::diag::log_heap_corruption(block as usize);
        return;
    }
    crate::sched_trace!("heap free {:?}", block);

    for slot in state.heaps.slots.iter_mut().flatten() {
        let heap_addr = slot as *mut Heap as usize;
        if heap_addr == owner_addr {
            free_into(slot, node_ptr);
            return;
        }
    }
    crate::diag::log_heap_corruption(block as usize);
}

fn free_into(heap: &mut Heap, bp: *mut Node) {
    let guard = heap.guard;
    // Safety net against re-entrant calls before a kernel exists (tests
    // construct a `Heap` directly without a surrounding `KernelState`);
    // real callers always go through `free_locked`, which already holds
    // the kernel's critical section, so the guard wait below never blocks
    // in practice (count never goes negative while a single CPU only ever
    // runs one allocator call at a time).
    let _ = guard;

    unsafe {
        (*bp).magic = 0;
    }

    let mut node_ptr = heap.base_ptr();
    loop {
        let next_ptr = heap.node_at(node_ptr).link as *mut Node;
        let in_range = (node_ptr as usize) < (bp as usize) && (bp as usize) < (next_ptr as usize);
        let wrapped = node_ptr as usize >= next_ptr as usize
            && (bp as usize > node_ptr as usize || (bp as usize) < next_ptr as usize);
        if in_range || wrapped {
            break;
        }
        node_ptr = next_ptr;
    }

    let node_size = heap.node_at(node_ptr).size;
    let next_ptr = heap.node_at(node_ptr).link as *mut Node;
    let bp_size = heap.node_at(bp).size;

    let joined_upper = unsafe { bp.add(bp_size) } == next_ptr;
    if joined_upper {
        let next_size = heap.node_at(next_ptr).size;
        let next_next = heap.node_at(next_ptr).link;
        heap.node_at_mut(bp).size = bp_size + next_size;
        heap.node_at_mut(bp).link = next_next;
    } else {
        heap.node_at_mut(bp).link = next_ptr as usize;
    }

    let joined_lower = unsafe { node_ptr.add(node_size) } == bp;
    if joined_lower {
        let bp_link = heap.node_at(bp).link;
        let bp_size_now = heap.node_at(bp).size;
        heap.node_at_mut(node_ptr).size = node_size + bp_size_now;
        heap.node_at_mut(node_ptr).link = bp_link;
    } else {
        heap.node_at_mut(node_ptr).link = bp as usize;
    }

    heap.available = node_ptr;
}

pub fn alternate_locked(state: &mut KernelState, id: HeapId, alt: Option<HeapId>) {
    let key = key_of(state, id);
    if let Some(heap) = state.heaps.slots[key as usize].as_mut() {
        heap.alternate = alt;
    }
}

pub fn destroy_locked(state: &mut KernelState, id: HeapId) {
    let key = key_of(state, id);
    if let Some(heap) = state.heaps.slots[key as usize].take() {
        semaphore::delete_locked(state, heap.guard);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(bytes: usize) -> &'static mut [u8] {
        Box::leak(vec![0u8; bytes].into_boxed_slice())
    }

    fn fresh_kernel() -> &'static mut KernelState {
        crate::sched::test_support::fresh_kernel()
    }

    #[test]
    fn alloc_and_free_round_trip() {
        let state = fresh_kernel();
        let id = create_locked(state, 2, "test", region(4096)).unwrap();
        let a = alloc_locked(state, id, 64).unwrap();
        let b = alloc_locked(state, id, 128).unwrap();
        assert_ne!(a, b);
        free_locked(state, a);
        free_locked(state, b);
        // Coalesced back into one block; a third, larger allocation
        // should still succeed in the same region.
        let c = alloc_locked(state, id, 200).unwrap();
        assert!(!c.is_null());
    }

    #[test]
    fn exhaustion_falls_back_to_alternate() {
        let state = fresh_kernel();
        let small = create_locked(state, 3, "small", region(256)).unwrap();
        let big = create_locked(state, 4, "big", region(4096)).unwrap();
        alternate_locked(state, small, Some(big));
        let ptr = alloc_locked(state, small, 1024);
        assert!(ptr.is_ok());
    }

    #[test]
    fn double_free_is_detected_not_corrupting() {
        let state = fresh_kernel();
        let id = create_locked(state, 5, "test", region(1024)).unwrap();
        let a = alloc_locked(state, id, 32).unwrap();
        free_locked(state, a);
        free_locked(state, a); // magic already cleared; must not panic or corrupt
        let b = alloc_locked(state, id, 32);
        assert!(b.is_ok());
    }
}
