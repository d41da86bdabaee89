//! Where session lock notifications come from.
//!
//! Every platform backend implements [`NotificationSource`]. The observer
//! only talks to the trait; [`platform_source`] picks the backend compiled
//! in for the current target.

#[cfg(all(feature = "dbus", unix, not(target_os = "macos")))]
mod screensaver;
#[cfg(windows)]
mod wts;

#[cfg(all(feature = "dbus", unix, not(target_os = "macos")))]
pub use self::screensaver::ScreenSaverSource;
#[cfg(windows)]
pub use self::wts::WtsSessionSource;

use std::sync::Arc;

use crate::{Result, SessionLockState};

/// Receives the raw "screen locked / screensaver active" flag.
pub type ActivationHandler = Arc<dyn Fn(bool) + Send + Sync + 'static>;

/// A native session lock notification mechanism.
pub trait NotificationSource: Send + Sync {
    /// Current state, if the platform can tell synchronously.
    fn current_state(&self) -> Result<Option<SessionLockState>> {
        Ok(None)
    }

    /// Starts delivering notifications to `handler`.
    ///
    /// An error leaves nothing subscribed.
    fn subscribe(&mut self, handler: ActivationHandler) -> Result<()>;

    /// Stops delivering notifications. Calling it when not subscribed is a no-op.
    fn unsubscribe(&mut self);
}

/// Source for platforms without a lock notification primitive. Never reports.
#[derive(Debug, Default)]
pub struct UnsupportedSource;

impl NotificationSource for UnsupportedSource {
    fn subscribe(&mut self, _handler: ActivationHandler) -> Result<()> {
        tracing::debug!("session lock notifications are not available on this platform");
        Ok(())
    }

    fn unsubscribe(&mut self) {}
}

/// The notification source for the current platform.
#[cfg(all(feature = "dbus", unix, not(target_os = "macos")))]
pub fn platform_source() -> Result<Box<dyn NotificationSource>> {
    Ok(Box::new(ScreenSaverSource::new()?))
}

/// The notification source for the current platform.
#[cfg(windows)]
pub fn platform_source() -> Result<Box<dyn NotificationSource>> {
    Ok(Box::new(WtsSessionSource::new()?))
}

/// The notification source for the current platform.
#[cfg(not(any(windows, all(feature = "dbus", unix, not(target_os = "macos")))))]
pub fn platform_source() -> Result<Box<dyn NotificationSource>> {
    Ok(Box::new(UnsupportedSource))
}
