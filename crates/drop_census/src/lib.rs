//! Test support: count drops and catch double drops.
//!
//! The slab allocator and the list code both promise exact destructor dispatch: a payload drops
//! once, at the final release, and never again.  Asserting that from tests needs visibility into
//! drops, which manifests three ways:
//!
//! - How many drops happened in total.
//! - Whether one specific value has dropped yet.
//! - That no value is ever dropped twice.
//!
//! Create a [DropCensus], then mint values with [DropCensus::track].  Each call returns a
//! [Liveness] probe plus a [Counted] wrapper holding the caller's data.  Store the [Counted] in
//! the structure under test and assert through the probe and the census afterwards.
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Mints tracked values and keeps the running drop total.
#[derive(Debug, Default)]
pub struct DropCensus<T> {
    drops: Arc<AtomicU64>,
    _phantom: PhantomData<fn(T)>,
}

#[derive(Debug, Default)]
struct Flag {
    dropped: AtomicBool,
}

/// A value whose drop is recorded in its census.
#[derive(Debug)]
pub struct Counted<T> {
    data: T,

    /// The Arcs may already be gone on a double drop, so the assert is against this plain bool,
    /// which is more likely to still be readable in the stale memory.
    already_dropped: bool,

    flag: Arc<Flag>,
    drops: Arc<AtomicU64>,
}

/// Probe for one tracked value.
pub struct Liveness<T> {
    flag: Arc<Flag>,
    _phantom: PhantomData<fn(T)>,
}

impl<T> std::ops::Deref for Counted<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl<T> std::ops::DerefMut for Counted<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.data
    }
}

impl<T> Drop for Counted<T> {
    fn drop(&mut self) {
        assert!(
            !self.already_dropped,
            "the same memory was dropped a second time"
        );
        self.already_dropped = true;
        self.flag.dropped.store(true, Ordering::Relaxed);
        self.drops.fetch_add(1, Ordering::Relaxed);
    }
}

impl<T> DropCensus<T> {
    pub fn new() -> DropCensus<T> {
        DropCensus {
            drops: Arc::new(AtomicU64::new(0)),
            _phantom: PhantomData,
        }
    }

    /// Wrap a value, returning the probe for it and the value itself.
    pub fn track(&self, data: T) -> (Liveness<T>, Counted<T>) {
        let flag: Arc<Flag> = Default::default();
        let counted = Counted {
            data,
            already_dropped: false,
            flag: flag.clone(),
            drops: self.drops.clone(),
        };
        (
            Liveness {
                flag,
                _phantom: PhantomData,
            },
            counted,
        )
    }

    pub fn drop_count(&self) -> u64 {
        self.drops.load(Ordering::Relaxed)
    }

    #[track_caller]
    pub fn assert_exact(&self, expected: u64) {
        let got = self.drop_count();
        assert_eq!(got, expected, "expected exactly {expected} drops, saw {got}");
    }

    #[track_caller]
    pub fn assert_at_least(&self, expected: u64) {
        let got = self.drop_count();
        assert!(got >= expected, "expected at least {expected} drops, saw {got}");
    }
}

impl<T> Liveness<T> {
    pub fn is_dropped(&self) -> bool {
        self.flag.dropped.load(Ordering::Relaxed)
    }

    #[track_caller]
    pub fn assert_alive(&self) {
        assert!(!self.is_dropped(), "value dropped when it should be alive");
    }

    #[track_caller]
    pub fn assert_dropped(&self) {
        assert!(self.is_dropped(), "value alive when it should have dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_and_flags() {
        let census = DropCensus::<u32>::new();
        let (l1, c1) = census.track(1);
        let (l2, c2) = census.track(2);

        assert_eq!(*c1, 1);
        assert_eq!(*c2, 2);
        l1.assert_alive();
        l2.assert_alive();
        census.assert_exact(0);

        drop(c1);
        l1.assert_dropped();
        l2.assert_alive();
        census.assert_exact(1);

        drop(c2);
        l2.assert_dropped();
        census.assert_exact(2);
    }

    #[test]
    fn deref_mut_reaches_data() {
        let census = DropCensus::<Vec<u8>>::new();
        let (_l, mut c) = census.track(vec![1, 2]);
        c.push(3);
        assert_eq!(&*c, &[1, 2, 3]);
    }
}
