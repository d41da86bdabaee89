use std::sync::Arc;

use zbus::blocking::Proxy;

use super::{ActivationHandler, NotificationSource};
use crate::bus::{self, BusConnection, SignalKey};
use crate::callback::CallbackId;
use crate::{Result, SessionLockState};

const SERVICE: &str = "org.freedesktop.ScreenSaver";
const PATH: &str = "/org/freedesktop/ScreenSaver";
const INTERFACE: &str = "org.freedesktop.ScreenSaver";
const ACTIVE_CHANGED: &str = "ActiveChanged";

/// `org.freedesktop.ScreenSaver` on the session bus.
///
/// An active screensaver counts as a locked session.
#[derive(Debug)]
pub struct ScreenSaverSource {
    bus: Arc<BusConnection>,
    subscription: Option<CallbackId>,
}

impl ScreenSaverSource {
    /// Uses the shared session bus connection, starting its event loop.
    pub fn new() -> Result<Self> {
        Ok(Self {
            bus: bus::session_bus(true)?,
            subscription: None,
        })
    }

    fn signal() -> SignalKey {
        SignalKey::new(INTERFACE, ACTIVE_CHANGED)
    }
}

impl NotificationSource for ScreenSaverSource {
    fn current_state(&self) -> Result<Option<SessionLockState>> {
        let proxy = Proxy::new(self.bus.connection(), SERVICE, PATH, INTERFACE)?;
        let active: bool = proxy.call("GetActive", &())?;
        Ok(Some(SessionLockState::from_activated(active)))
    }

    fn subscribe(&mut self, handler: ActivationHandler) -> Result<()> {
        self.unsubscribe();

        let id = self.bus.subscribe_signal(Self::signal(), move |message| {
            match message.body().deserialize::<bool>() {
                Ok(active) => handler(active),
                Err(err) => tracing::warn!(error = %err, "malformed ActiveChanged signal"),
            }
        })?;
        self.subscription = Some(id);
        Ok(())
    }

    fn unsubscribe(&mut self) {
        if let Some(id) = self.subscription.take() {
            self.bus.unsubscribe_signal(&Self::signal(), id);
        }
    }
}

impl Drop for ScreenSaverSource {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
