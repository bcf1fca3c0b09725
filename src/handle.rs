//! Arena-index handle types.
//!
//! Every kernel object the outside world can name (threads, semaphores,
//! mutexes, queues, timers, heaps) is identified by a small index into a
//! fixed-size table inside [`crate::sched::KernelState`], never by a raw
//! pointer. Each gets its own newtype so a `ThreadId` can never be passed
//! where a `SemaphoreId` is expected.
use core::fmt;

macro_rules! index_handle {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub(crate) u16);

        impl $name {
            pub(crate) fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

index_handle!(ThreadId, "Handle to a thread descriptor.");
index_handle!(SemaphoreId, "Handle to a counting semaphore.");
index_handle!(MutexId, "Handle to a recursive mutex.");
index_handle!(MQueueId, "Handle to a bounded message queue.");
index_handle!(TimerId, "Handle to a one-shot/periodic timer.");

/// A heap is named by a small integer key (`HEAP_SYSTEM = 0`,
/// `HEAP_GENERAL = 1`, ...) rather than by pointer. `Default` resolves
/// through the calling thread's heap binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapId {
    /// Resolve through the current thread's heap binding.
    Default,
    /// A specific slot in the process-wide heap table.
    Key(u8),
}

pub const HEAP_SYSTEM: HeapId = HeapId::Key(0);
pub const HEAP_GENERAL: HeapId = HeapId::Key(1);

/// An intrusive-list link: either "no next/prev element" or the index of
/// one. Kept distinct from `Option<ThreadId>` only in name, to make list
/// code read as list code rather than generic option-juggling.
pub type Link = Option<ThreadId>;
