//! Kernel time: a free-running 32-bit tick counter and wrap-safe deadlines.
//!
//! All timeouts are stored as absolute tick values. The counter wraps every
//! 2^32 ticks, so every comparison between two absolute ticks goes through
//! [`tick_after`] rather than a plain unsigned `<`.

/// Sentinel timeout meaning "wait indefinitely".
pub const FOREVER: u32 = u32::MAX;

/// An absolute tick value.
///
/// Arithmetic on `Ticks` wraps (`wrapping_add`) rather than panicking on
/// overflow, matching the free-running counter this kernel's time model
/// describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticks(pub u32);

impl Ticks {
    pub const fn new(value: u32) -> Self {
        Ticks(value)
    }

    /// `self + delta`, wrapping. `delta == FOREVER` saturates to `FOREVER`
    /// rather than wrapping, so callers never accidentally compute a
    /// deadline in the past.
    pub fn plus(self, delta: u32) -> Ticks {
        if delta == FOREVER {
            Ticks(FOREVER)
        } else {
            Ticks(self.0.wrapping_add(delta))
        }
    }

    /// True iff `self` is strictly after `other`, using wrap-safe signed
    /// subtraction.
    pub fn after(self, other: Ticks) -> bool {
        ((self.0.wrapping_sub(other.0)) as i32) > 0
    }

    /// True iff `self` has reached or passed `deadline`.
    pub fn reached(self, deadline: Ticks) -> bool {
        !deadline.after(self)
    }
}

/// Process-wide kernel time, advanced only by [`advance`] (called from the
/// tick ISR). Reads are a single aligned 32-bit load, so the tick counter
/// is read atomically without any additional synchronization.
static KERNEL_TIME: core::sync::atomic::AtomicU32 = core::sync::atomic::AtomicU32::new(0);

/// Current kernel time.
pub fn now() -> Ticks {
    Ticks(KERNEL_TIME.load(core::sync::atomic::Ordering::Acquire))
}

/// Advance kernel time by one tick. Called exactly once per tick interrupt
/// by the scheduler's tick handler, under the critical section it already
/// holds; `Ordering::Release` is enough to publish the new value to
/// non-interrupt readers.
pub(crate) fn advance() -> Ticks {
    let new = KERNEL_TIME.fetch_add(1, core::sync::atomic::Ordering::AcqRel) + 1;
    Ticks(new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_safe_compare() {
        let near_wrap = Ticks(u32::MAX - 2);
        let after_wrap = Ticks(2);
        assert!(after_wrap.after(near_wrap));
        assert!(!near_wrap.after(after_wrap));
    }

    #[test]
    fn reached_is_inclusive() {
        let t = Ticks(10);
        assert!(t.reached(Ticks(10)));
        assert!(t.reached(Ticks(9)));
        assert!(!t.reached(Ticks(11)));
    }

    #[test]
    fn plus_forever_saturates() {
        let t = Ticks(100);
        assert_eq!(t.plus(FOREVER).0, FOREVER);
    }
}
