//! Ordered, thread-safe callback lists with stable subscription IDs.
//!
//! A [`CallbackRegistry`] stores callbacks in slots indexed by the
//! [`CallbackId`] handed out at registration. Removing a callback from the
//! middle leaves an empty placeholder behind so that the IDs of later
//! callbacks stay valid; an empty tail is truncated as soon as it appears.
//!
//! # Examples
//!
//! ```
//! use session_lock_events::CallbackRegistry;
//! use std::sync::{Arc, Mutex};
//!
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let registry = CallbackRegistry::new();
//!
//! let sink = seen.clone();
//! let id = registry.register(move |value: u32| sink.lock().unwrap().push(value));
//!
//! registry.trigger(7);
//! registry.deregister(id);
//! registry.trigger(8);
//!
//! assert_eq!(*seen.lock().unwrap(), vec![7]);
//! ```

use std::fmt;
use std::sync::{Arc, Mutex};

/// Shared, thread-safe callback receiving a value of type `T`.
pub type Callback<T> = Arc<dyn Fn(T) + Send + Sync + 'static>;

/// Identifier of one registration in a [`CallbackRegistry`].
///
/// Only meaningful for the registry that issued it. It is not a position:
/// consumers must keep it opaque and hand it back to `deregister`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallbackId(usize);

impl CallbackId {
    /// Returns the raw index behind this ID.
    pub fn as_usize(self) -> usize {
        self.0
    }
}

impl fmt::Display for CallbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Thread-safe list of callbacks invoked in registration order.
pub struct CallbackRegistry<T> {
    slots: Mutex<Vec<Option<Callback<T>>>>,
}

impl<T: Clone + 'static> CallbackRegistry<T> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(Vec::new()),
        }
    }

    /// Appends `callback` and returns the ID needed to remove it again.
    ///
    /// The callback must not assume that its argument outlives the call.
    pub fn register(&self, callback: impl Fn(T) + Send + Sync + 'static) -> CallbackId {
        self.register_arc(Arc::new(callback))
    }

    /// Appends an already shared callback.
    pub fn register_arc(&self, callback: Callback<T>) -> CallbackId {
        let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        slots.push(Some(callback));
        let id = CallbackId(slots.len() - 1);
        tracing::trace!(%id, slots = slots.len(), "callback registered");
        id
    }

    /// Removes the callback registered under `id`.
    ///
    /// IDs outside the current slot range are ignored. Returns `true` if a
    /// live callback was removed. Deregistering the same ID twice is a
    /// caller bug; the second call happens to be harmless but must not be
    /// relied upon, since the slot may have been handed out again after
    /// compaction.
    pub fn deregister(&self, id: CallbackId) -> bool {
        let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());

        let Some(slot) = slots.get_mut(id.0) else {
            return false;
        };
        let removed = slot.take().is_some();

        // Only an all-empty tail may go; anything before a live slot keeps
        // its index.
        let live_len = slots
            .iter()
            .rposition(Option::is_some)
            .map_or(0, |last| last + 1);
        slots.truncate(live_len);

        tracing::trace!(%id, removed, slots = slots.len(), "callback deregistered");
        removed
    }

    /// Removes every callback. All previously issued IDs become invalid.
    pub fn clear(&self) {
        self.slots
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clear();
    }

    /// Calls every live callback with a clone of `value`, in registration order.
    ///
    /// The slot list is snapshotted first and the lock released before any
    /// callback runs, so callbacks may register or deregister on this same
    /// registry. Such changes apply from the next `trigger`.
    pub fn trigger(&self, value: T) {
        let snapshot: Vec<Callback<T>> = self
            .slots
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .flatten()
            .cloned()
            .collect();

        for callback in snapshot {
            callback(value.clone());
        }
    }

    /// Number of live callbacks.
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .filter(|slot| slot.is_some())
            .count()
    }

    /// Number of slots, including empty placeholders.
    pub fn slot_count(&self) -> usize {
        self.slots.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.slot_count() == 0
    }
}

impl<T: Clone + 'static> Default for CallbackRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for CallbackRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        f.debug_struct("CallbackRegistry")
            .field("slots", &slots.len())
            .field("live", &slots.iter().filter(|slot| slot.is_some()).count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn recorder() -> (Arc<Mutex<Vec<&'static str>>>, CallbackRegistry<()>) {
        (Arc::new(Mutex::new(Vec::new())), CallbackRegistry::new())
    }

    fn push(log: &Arc<Mutex<Vec<&'static str>>>, name: &'static str) -> impl Fn(()) + Send + Sync {
        let log = log.clone();
        move |()| log.lock().unwrap().push(name)
    }

    #[test]
    fn test_ids_are_sequential() {
        let registry = CallbackRegistry::<u8>::new();
        let ids: Vec<usize> = (0..3)
            .map(|_| registry.register(|_| {}).as_usize())
            .collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn test_trigger_runs_in_registration_order() {
        let (log, registry) = recorder();
        registry.register(push(&log, "a"));
        registry.register(push(&log, "b"));
        registry.register(push(&log, "c"));

        registry.trigger(());

        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_tail_removal_truncates_suffix() {
        let registry = CallbackRegistry::<()>::new();
        let _a = registry.register(|_| {});
        let b = registry.register(|_| {});
        let c = registry.register(|_| {});

        assert!(registry.deregister(c));
        assert!(registry.deregister(b));

        assert_eq!(registry.slot_count(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_head_removal_keeps_later_ids_valid() {
        let (log, registry) = recorder();
        let a = registry.register(push(&log, "a"));
        let b = registry.register(push(&log, "b"));
        let c = registry.register(push(&log, "c"));

        registry.deregister(a);
        assert_eq!(registry.slot_count(), 3);

        registry.trigger(());
        assert_eq!(*log.lock().unwrap(), vec!["b", "c"]);

        assert!(registry.deregister(b));
        assert!(registry.deregister(c));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_placeholder_before_tail_is_dropped_with_it() {
        let registry = CallbackRegistry::<()>::new();
        let a = registry.register(|_| {});
        let b = registry.register(|_| {});
        let c = registry.register(|_| {});

        registry.deregister(b);
        assert_eq!(registry.slot_count(), 3);

        registry.deregister(c);
        assert_eq!(registry.slot_count(), 1);

        registry.deregister(a);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_out_of_range_deregister_is_noop() {
        let registry = CallbackRegistry::<()>::new();
        let a = registry.register(|_| {});

        assert!(!registry.deregister(CallbackId(42)));
        assert_eq!(registry.len(), 1);

        assert!(registry.deregister(a));
        assert!(!registry.deregister(a));
    }

    #[test]
    fn test_clear_drops_everything() {
        let counter = Arc::new(AtomicUsize::new(0));
        let registry = CallbackRegistry::<()>::new();
        for _ in 0..4 {
            let counter = counter.clone();
            registry.register(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        registry.clear();
        registry.trigger(());

        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_callback_may_deregister_itself() {
        let registry = Arc::new(CallbackRegistry::<()>::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let own_id = Arc::new(Mutex::new(None));

        let inner = registry.clone();
        let counter = calls.clone();
        let slot = own_id.clone();
        let id = registry.register(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            if let Some(id) = *slot.lock().unwrap() {
                inner.deregister(id);
            }
        });
        *own_id.lock().unwrap() = Some(id);

        registry.trigger(());
        registry.trigger(());

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_debug_reports_slots() {
        let registry = CallbackRegistry::<()>::new();
        let a = registry.register(|_| {});
        registry.register(|_| {});
        registry.deregister(a);
        assert_eq!(
            format!("{:?}", registry),
            "CallbackRegistry { slots: 2, live: 1 }"
        );
    }
}
