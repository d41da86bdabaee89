//! Callback registries keyed by message type.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use crate::callback::{CallbackId, CallbackRegistry};
use crate::Result;

/// One [`CallbackRegistry`] per key, created on first registration and
/// dropped again once its last handler is gone.
///
/// The table lock only covers finding or changing the per-key registry.
/// Dispatch clones the registry handle and releases the table before any
/// handler runs, so handlers of unrelated keys never wait on each other.
pub struct HandlerTable<K, T> {
    tables: Mutex<HashMap<K, Arc<CallbackRegistry<T>>>>,
}

impl<K, T> HandlerTable<K, T>
where
    K: Eq + Hash + Clone + fmt::Debug,
    T: Clone + 'static,
{
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(HashMap::new()),
        }
    }

    /// Registers `handler` for `key`. The returned ID is only valid together
    /// with the same key.
    pub fn register(&self, key: K, handler: impl Fn(T) + Send + Sync + 'static) -> CallbackId {
        let mut tables = self.tables.lock().unwrap_or_else(|p| p.into_inner());
        tables.entry(key).or_default().register(handler)
    }

    /// Registers `handler` for `key`, running `on_first` beforehand if `key`
    /// has no handler yet.
    ///
    /// The check, `on_first` and the registration happen under the table
    /// lock, so `on_first` runs once per key no matter how many callers race.
    /// If it fails, nothing is registered.
    pub fn register_with(
        &self,
        key: K,
        handler: impl Fn(T) + Send + Sync + 'static,
        on_first: impl FnOnce(&K) -> Result<()>,
    ) -> Result<CallbackId> {
        let mut tables = self.tables.lock().unwrap_or_else(|p| p.into_inner());
        if !tables.contains_key(&key) {
            on_first(&key)?;
        }
        Ok(tables.entry(key).or_default().register(handler))
    }

    /// Removes one handler. Unknown keys and out-of-range IDs are ignored.
    ///
    /// Returns `true` if a live handler was removed.
    pub fn deregister(&self, key: &K, id: CallbackId) -> bool {
        self.deregister_with(key, id, |_| {})
    }

    /// Removes one handler and runs `on_last`, still under the table lock,
    /// if it was the last handler of `key`.
    pub fn deregister_with(&self, key: &K, id: CallbackId, on_last: impl FnOnce(&K)) -> bool {
        let mut tables = self.tables.lock().unwrap_or_else(|p| p.into_inner());

        let Some(registry) = tables.get(key) else {
            return false;
        };
        let removed = registry.deregister(id);
        if registry.is_empty() {
            tables.remove(key);
            if removed {
                on_last(key);
            }
        }
        removed
    }

    /// Removes every handler registered for `key`.
    pub fn clear(&self, key: &K) {
        self.tables
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(key);
    }

    /// Removes every handler of every key.
    pub fn clear_all(&self) {
        self.tables
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clear();
    }

    /// Invokes the handlers registered for `key` with `value`.
    ///
    /// Returns the number of handlers that were live when dispatch started.
    pub fn dispatch(&self, key: &K, value: T) -> usize {
        let registry = self
            .tables
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(key)
            .cloned();

        match registry {
            Some(registry) => {
                let live = registry.len();
                registry.trigger(value);
                live
            }
            None => 0,
        }
    }

    /// Returns `true` if at least one handler is registered for `key`.
    pub fn contains(&self, key: &K) -> bool {
        self.tables
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .contains_key(key)
    }

    /// Number of live handlers for `key`.
    pub fn len(&self, key: &K) -> usize {
        self.tables
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(key)
            .map_or(0, |registry| registry.len())
    }
}

impl<K, T> Default for HandlerTable<K, T>
where
    K: Eq + Hash + Clone + fmt::Debug,
    T: Clone + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K: fmt::Debug, T> fmt::Debug for HandlerTable<K, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tables = self.tables.lock().unwrap_or_else(|p| p.into_inner());
        f.debug_map()
            .entries(tables.iter().map(|(key, registry)| (key, registry)))
            .finish()
    }
}
