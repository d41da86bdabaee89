use std::io;
use std::time::Duration;

use crate::shared::ResourceKind;

/// Errors raised while setting up session lock notifications.
///
/// Every variant except the cache misuse ones aborts construction of the
/// object that hit it. Nothing is retried at this layer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to register the message window class: {0}")]
    WindowClassRegistration(#[source] io::Error),

    #[error("failed to create the message window: {0}")]
    WindowCreation(#[source] io::Error),

    #[error("failed to subscribe to session notifications: {0}")]
    SessionNotification(#[source] io::Error),

    #[error("message pump did not start within {timeout:?}")]
    PumpStartupTimeout { timeout: Duration },

    #[error("message pump exited before it started running")]
    PumpExited,

    #[error("message pump is not running")]
    PumpNotRunning,

    #[error("failed to spawn worker thread: {0}")]
    ThreadSpawn(#[source] io::Error),

    #[error("shared resource `{kind}` holds a value that is not a `{type_name}`")]
    ResourceTypeMismatch {
        kind: ResourceKind,
        type_name: &'static str,
    },

    #[error("`{type_name}` cannot be created as shared resource `{kind}`")]
    UnsupportedResourceKind {
        kind: ResourceKind,
        type_name: &'static str,
    },

    #[cfg(all(feature = "dbus", unix, not(target_os = "macos")))]
    #[error("session bus error: {0}")]
    Bus(#[from] zbus::Error),

    #[cfg(all(feature = "dbus", unix, not(target_os = "macos")))]
    #[error("session bus request failed: {0}")]
    BusRequest(#[from] zbus::fdo::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
