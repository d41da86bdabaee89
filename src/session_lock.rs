//! Session lock observer.
//!
//! [`SessionLockObserver`] turns the raw notifications of a
//! [`NotificationSource`] into [`SessionLockState`] transitions. Repeated
//! reports of the same state are swallowed, so subscribers only hear about
//! genuine changes.
//!
//! When the source can report the current state synchronously, that state
//! becomes the silent baseline at construction. Otherwise the first
//! notification always counts as a transition.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use crate::callback::{CallbackId, CallbackRegistry};
use crate::source::{self, ActivationHandler, NotificationSource};
use crate::Result;

/// Whether the interactive session is locked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionLockState {
    Locked,
    Unlocked,
}

impl SessionLockState {
    /// Maps a "locked / screensaver active" flag to a state.
    pub fn from_activated(activated: bool) -> Self {
        if activated {
            SessionLockState::Locked
        } else {
            SessionLockState::Unlocked
        }
    }
}

impl fmt::Display for SessionLockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionLockState::Locked => write!(f, "Locked"),
            SessionLockState::Unlocked => write!(f, "Unlocked"),
        }
    }
}

// Stored state; UNINITIALIZED never compares equal to a real state.
const UNINITIALIZED: u8 = 0;
const LOCKED: u8 = 1;
const UNLOCKED: u8 = 2;

fn encode(state: SessionLockState) -> u8 {
    match state {
        SessionLockState::Locked => LOCKED,
        SessionLockState::Unlocked => UNLOCKED,
    }
}

fn decode(raw: u8) -> Option<SessionLockState> {
    match raw {
        LOCKED => Some(SessionLockState::Locked),
        UNLOCKED => Some(SessionLockState::Unlocked),
        _ => None,
    }
}

/// Heap-pinned part of the observer the source callback points at.
struct ObserverShared {
    state: AtomicU8,
    callbacks: CallbackRegistry<SessionLockState>,
}

impl ObserverShared {
    /// Records `state` and fires the callbacks if it differs from the last one.
    fn observe(&self, state: SessionLockState) -> bool {
        let previous = self.state.swap(encode(state), Ordering::AcqRel);
        if previous == encode(state) {
            return false;
        }

        tracing::debug!(from = ?decode(previous), to = %state, "session lock state changed");
        self.callbacks.trigger(state);
        true
    }

    /// Adopts `state` without firing, unless a notification got there first.
    fn adopt_baseline(&self, state: SessionLockState) -> bool {
        self.state
            .compare_exchange(
                UNINITIALIZED,
                encode(state),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

/// Observes session lock and unlock transitions.
///
/// The observer is not `Clone`: each one owns exactly one subscription to
/// its notification source, released on drop. Moving it is fine, since the
/// source only holds a weak reference to heap-allocated state.
///
/// # Examples
///
/// ```no_run
/// use session_lock_events::SessionLockObserver;
///
/// let observer = SessionLockObserver::new()?;
/// observer.register_callback(|state| println!("session is now {state}"));
/// # Ok::<(), session_lock_events::Error>(())
/// ```
pub struct SessionLockObserver {
    shared: Arc<ObserverShared>,
    source: Box<dyn NotificationSource>,
}

impl SessionLockObserver {
    /// Observes the session through the platform's native mechanism.
    ///
    /// # Errors
    ///
    /// Fails when the native mechanism cannot be set up, e.g. without a
    /// session bus or when window creation or notification registration
    /// is refused.
    pub fn new() -> Result<Self> {
        Self::from_boxed_source(source::platform_source()?)
    }

    /// Observes the session through `source`.
    pub fn with_source(source: impl NotificationSource + 'static) -> Result<Self> {
        Self::from_boxed_source(Box::new(source))
    }

    fn from_boxed_source(mut source: Box<dyn NotificationSource>) -> Result<Self> {
        let shared = Arc::new(ObserverShared {
            state: AtomicU8::new(UNINITIALIZED),
            callbacks: CallbackRegistry::new(),
        });

        source.subscribe(translation_handler(Arc::downgrade(&shared)))?;

        match source.current_state() {
            Ok(Some(state)) => {
                if shared.adopt_baseline(state) {
                    tracing::debug!(%state, "initial session lock state");
                }
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(error = %err, "could not query the current session lock state");
            }
        }

        Ok(Self { shared, source })
    }

    /// Last known state, or `None` before anything was observed.
    pub fn state(&self) -> Option<SessionLockState> {
        decode(self.shared.state.load(Ordering::Acquire))
    }

    /// Registers `callback` to run on every lock state transition.
    ///
    /// Callbacks run on the thread delivering the native notification.
    pub fn register_callback(
        &self,
        callback: impl Fn(SessionLockState) + Send + Sync + 'static,
    ) -> CallbackId {
        self.shared.callbacks.register(callback)
    }

    /// Removes a callback. Unknown IDs are ignored.
    pub fn deregister_callback(&self, id: CallbackId) {
        self.shared.callbacks.deregister(id);
    }

    /// Removes every callback, invalidating all IDs.
    pub fn clear_callbacks(&self) {
        self.shared.callbacks.clear();
    }
}

fn translation_handler(shared: Weak<ObserverShared>) -> ActivationHandler {
    Arc::new(move |activated| {
        if let Some(shared) = shared.upgrade() {
            shared.observe(SessionLockState::from_activated(activated));
        }
    })
}

impl Drop for SessionLockObserver {
    fn drop(&mut self) {
        self.source.unsubscribe();
        self.shared.callbacks.clear();
    }
}

impl fmt::Debug for SessionLockObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionLockObserver")
            .field("state", &self.state())
            .field("callbacks", &self.shared.callbacks)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn shared() -> ObserverShared {
        ObserverShared {
            state: AtomicU8::new(UNINITIALIZED),
            callbacks: CallbackRegistry::new(),
        }
    }

    #[test]
    fn test_display_states() {
        assert_eq!(SessionLockState::Locked.to_string(), "Locked");
        assert_eq!(SessionLockState::Unlocked.to_string(), "Unlocked");
    }

    #[test]
    fn test_from_activated() {
        assert_eq!(SessionLockState::from_activated(true), SessionLockState::Locked);
        assert_eq!(SessionLockState::from_activated(false), SessionLockState::Unlocked);
    }

    #[test]
    fn test_first_observation_always_fires() {
        let shared = shared();
        assert!(shared.observe(SessionLockState::Unlocked));
        assert!(!shared.observe(SessionLockState::Unlocked));
        assert!(shared.observe(SessionLockState::Locked));
    }

    #[test]
    fn test_baseline_is_silent_and_not_overriding() {
        let shared = shared();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        shared
            .callbacks
            .register(move |state| sink.lock().unwrap().push(state));

        assert!(shared.adopt_baseline(SessionLockState::Locked));
        assert!(!shared.adopt_baseline(SessionLockState::Unlocked));
        assert!(!shared.observe(SessionLockState::Locked));

        assert!(events.lock().unwrap().is_empty());
    }

    #[test]
    fn test_repeated_state_is_suppressed() {
        let shared = shared();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        shared
            .callbacks
            .register(move |state| sink.lock().unwrap().push(state));

        for _ in 0..5 {
            shared.observe(SessionLockState::Locked);
        }

        assert_eq!(*events.lock().unwrap(), vec![SessionLockState::Locked]);
    }

    #[test]
    fn test_handler_outliving_observer_is_inert() {
        let shared = Arc::new(shared());
        let handler = translation_handler(Arc::downgrade(&shared));
        drop(shared);
        handler(true);
    }
}
