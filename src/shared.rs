//! Process-wide cache of shared native resources.
//!
//! Native resources such as a bus connection or the message pump are
//! expensive and side-effecting to create, so every caller asking for the
//! same [`ResourceKind`] gets a handle to the same instance. The cache only
//! keeps a [`Weak`] reference: once every owner has dropped its `Arc`, the
//! resource goes away and the next request builds a fresh one.
//!
//! # Examples
//!
//! ```
//! use session_lock_events::shared::{get_or_create, ResourceKind, SharedResource};
//! use session_lock_events::Result;
//! use std::sync::Arc;
//!
//! struct Printer {
//!     name: String,
//! }
//!
//! impl SharedResource for Printer {
//!     type Options = str;
//!
//!     fn create(_kind: &ResourceKind, name: &str) -> Result<Self> {
//!         Ok(Printer { name: name.to_string() })
//!     }
//! }
//!
//! let kind = ResourceKind::Named("doc-printer");
//! let first: Arc<Printer> = get_or_create(kind.clone(), "lobby", false).unwrap();
//! let second: Arc<Printer> = get_or_create(kind, "ignored", false).unwrap();
//!
//! assert!(Arc::ptr_eq(&first, &second));
//! assert_eq!(second.name, "lobby");
//! ```

use std::{
    any::Any,
    collections::HashMap,
    fmt,
    sync::{Arc, LazyLock, Mutex, Weak},
};

use crate::{CacheEvent, Error, Result};

/// Logical category of a shared resource. One live instance per kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// Connection to the desktop session bus.
    SessionBus,
    /// Connection to the system bus.
    SystemBus,
    /// The hidden-window message pump.
    MessagePump,
    /// Application-defined resource.
    Named(&'static str),
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::SessionBus => write!(f, "session-bus"),
            ResourceKind::SystemBus => write!(f, "system-bus"),
            ResourceKind::MessagePump => write!(f, "message-pump"),
            ResourceKind::Named(name) => write!(f, "{name}"),
        }
    }
}

/// A resource that can live in the shared cache.
pub trait SharedResource: Send + Sync + Sized + 'static {
    /// Construction parameters. Only consulted when a new instance is built.
    type Options: ?Sized;

    /// Builds a new instance for `kind`.
    fn create(kind: &ResourceKind, options: &Self::Options) -> Result<Self>;

    /// Makes sure a background event loop serves this resource.
    ///
    /// Called whenever a caller asks for a running loop, so implementations
    /// must start it at most once and treat later calls as no-ops.
    fn start_event_loop(&self) -> Result<()> {
        Ok(())
    }
}

type Slot = Arc<Mutex<Option<Weak<dyn Any + Send + Sync>>>>;

/// Weak handles of the current instances, one slot per kind.
///
/// The map lock is only held to look a slot up. Construction happens under
/// the slot's own lock so that building one kind never blocks another.
static SHARED_RESOURCES: LazyLock<Mutex<HashMap<ResourceKind, Slot>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

// -------------------------------------------------------------------------------------------------
// Tracing callback support
// -------------------------------------------------------------------------------------------------

/// Type alias for the user-supplied cache trace callback.
pub type TraceCallback = dyn Fn(&CacheEvent) + Send + Sync + 'static;

static TRACE_CALLBACK: LazyLock<Mutex<Option<Arc<TraceCallback>>>> =
    LazyLock::new(|| Mutex::new(None));

/// Sets a callback invoked on every cache lookup.
///
/// The callback runs while the slot of the affected kind is locked, so it
/// must not request a resource of that same kind.
///
/// # Example
/// ```rust
/// use session_lock_events::shared::set_trace_callback;
///
/// set_trace_callback(|event| println!("[shared] {event}"));
/// ```
pub fn set_trace_callback(callback: impl Fn(&CacheEvent) + Send + Sync + 'static) {
    let mut guard = TRACE_CALLBACK.lock().unwrap_or_else(|p| p.into_inner());
    *guard = Some(Arc::new(callback));
}

/// Clears the trace callback.
pub fn clear_trace_callback() {
    let mut guard = TRACE_CALLBACK.lock().unwrap_or_else(|p| p.into_inner());
    *guard = None;
}

fn emit_event(event: &CacheEvent) {
    tracing::debug!(%event, "shared resource cache");

    // Clone out so the callback runs without the trace lock held.
    let callback = TRACE_CALLBACK
        .lock()
        .unwrap_or_else(|p| p.into_inner())
        .clone();
    if let Some(callback) = callback {
        callback(event);
    }
}

// -------------------------------------------------------------------------------------------------
// Cache
// -------------------------------------------------------------------------------------------------

fn slot_for(kind: &ResourceKind) -> Slot {
    SHARED_RESOURCES
        .lock()
        .unwrap_or_else(|p| p.into_inner())
        .entry(kind.clone())
        .or_default()
        .clone()
}

/// Returns the live instance for `kind`, constructing it if there is none.
///
/// Concurrent callers racing on a kind with no live instance are
/// serialised: exactly one of them runs [`SharedResource::create`] and all
/// of them receive the same instance. `options` are ignored when an
/// instance is reused.
///
/// With `start_event_loop` set, [`SharedResource::start_event_loop`] is
/// called on the returned instance before it is handed out.
///
/// # Errors
///
/// - construction of a new instance failed
/// - starting the event loop failed
/// - the live instance for `kind` is not a `T` ([`Error::ResourceTypeMismatch`])
pub fn get_or_create<T: SharedResource>(
    kind: ResourceKind,
    options: &T::Options,
    start_event_loop: bool,
) -> Result<Arc<T>> {
    let type_name = std::any::type_name::<T>();
    let slot = slot_for(&kind);
    let mut cached = slot.lock().unwrap_or_else(|p| p.into_inner());

    let resource = match cached.as_ref().and_then(Weak::upgrade) {
        Some(existing) => {
            let resource = existing
                .downcast::<T>()
                .map_err(|_| Error::ResourceTypeMismatch {
                    kind: kind.clone(),
                    type_name,
                })?;
            emit_event(&CacheEvent::Reused {
                kind: kind.clone(),
                type_name,
            });
            resource
        }
        None => {
            let resource = Arc::new(T::create(&kind, options)?);
            let erased: Arc<dyn Any + Send + Sync> = resource.clone();
            *cached = Some(Arc::downgrade(&erased));
            emit_event(&CacheEvent::Created {
                kind: kind.clone(),
                type_name,
            });
            resource
        }
    };

    if start_event_loop {
        resource.start_event_loop()?;
    }

    Ok(resource)
}

/// Returns `true` if some owner still holds the instance cached for `kind`.
pub fn is_live(kind: &ResourceKind) -> bool {
    let slot = SHARED_RESOURCES
        .lock()
        .unwrap_or_else(|p| p.into_inner())
        .get(kind)
        .cloned();

    slot.is_some_and(|slot| {
        slot.lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .is_some_and(|weak| weak.strong_count() > 0)
    })
}

/// Forgets every cache entry. Live instances stay alive with their owners
/// but are no longer handed out.
#[doc(hidden)]
pub fn reset() {
    emit_event(&CacheEvent::Reset);

    SHARED_RESOURCES
        .lock()
        .unwrap_or_else(|p| p.into_inner())
        .clear();
}

// -------------------------------------------------------------------------------------------------
// Tests
// -------------------------------------------------------------------------------------------------
