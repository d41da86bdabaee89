use crate::shared::ResourceKind;

/// Events emitted by the shared resource cache.
///
/// These events are passed to the callback installed with
/// [`set_trace_callback`](crate::shared::set_trace_callback).
///
/// # Examples
///
/// ```rust
/// use session_lock_events::{CacheEvent, ResourceKind};
///
/// let event = CacheEvent::Created {
///     kind: ResourceKind::SessionBus,
///     type_name: "BusConnection",
/// };
/// assert_eq!(event.to_string(), "created { kind: session-bus, type_name: BusConnection }");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// No live instance existed, so a new one was constructed.
    Created {
        kind: ResourceKind,
        type_name: &'static str,
    },

    /// A live instance was handed out again.
    Reused {
        kind: ResourceKind,
        type_name: &'static str,
    },

    /// Every cache entry was forgotten.
    Reset,
}

impl std::fmt::Display for CacheEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheEvent::Created { kind, type_name } => {
                write!(f, "created {{ kind: {kind}, type_name: {type_name} }}")
            }
            CacheEvent::Reused { kind, type_name } => {
                write!(f, "reused {{ kind: {kind}, type_name: {type_name} }}")
            }
            CacheEvent::Reset => write!(f, "Resetting the shared resource cache"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_event_display() {
        let event = CacheEvent::Reused {
            kind: ResourceKind::MessagePump,
            type_name: "MessagePump",
        };
        assert_eq!(
            event.to_string(),
            "reused { kind: message-pump, type_name: MessagePump }"
        );

        let event = CacheEvent::Created {
            kind: ResourceKind::Named("printer"),
            type_name: "u8",
        };
        assert_eq!(event.to_string(), "created { kind: printer, type_name: u8 }");

        assert_eq!(
            CacheEvent::Reset.to_string(),
            "Resetting the shared resource cache"
        );
    }

    #[test]
    fn test_cache_event_clone() {
        let event = CacheEvent::Created {
            kind: ResourceKind::SystemBus,
            type_name: "i32",
        };
        assert_eq!(event.clone(), event);
    }
}
