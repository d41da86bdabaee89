use std::io;
use std::ptr;
use std::sync::Arc;

use windows_sys::Win32::Foundation::HWND;
use windows_sys::Win32::System::RemoteDesktop::{
    WTSRegisterSessionNotificationEx, WTSUnRegisterSessionNotificationEx,
};

use super::{ActivationHandler, NotificationSource};
use crate::callback::CallbackId;
use crate::pump::{self, MessagePump, WindowHandle};
use crate::{Error, Result};

const WM_WTSSESSION_CHANGE: u32 = 0x02B1;
const WTS_SESSION_LOCK: usize = 0x7;
const WTS_SESSION_UNLOCK: usize = 0x8;
const NOTIFY_FOR_THIS_SESSION: u32 = 0;

/// `WM_WTSSESSION_CHANGE` notifications delivered to the shared message
/// pump's window.
///
/// Windows has no synchronous lock query, so the first notification after
/// construction is always reported.
#[derive(Debug)]
pub struct WtsSessionSource {
    pump: Arc<MessagePump>,
    registration: Option<(WindowHandle, CallbackId)>,
}

impl WtsSessionSource {
    /// Uses the shared message pump, starting it if necessary.
    pub fn new() -> Result<Self> {
        Ok(Self {
            pump: pump::message_pump()?,
            registration: None,
        })
    }
}

impl NotificationSource for WtsSessionSource {
    fn subscribe(&mut self, handler: ActivationHandler) -> Result<()> {
        self.unsubscribe();

        let window = self.pump.window().ok_or(Error::PumpNotRunning)?;
        // SAFETY: the window is alive for as long as the pump runs, and the
        // registration is undone before this source lets go of the pump.
        let registered = unsafe {
            WTSRegisterSessionNotificationEx(
                ptr::null_mut(),
                window.as_raw() as HWND,
                NOTIFY_FOR_THIS_SESSION,
            )
        };
        if registered == 0 {
            return Err(Error::SessionNotification(io::Error::last_os_error()));
        }

        let id = self
            .pump
            .register_handler(WM_WTSSESSION_CHANGE, move |message| match message.wparam {
                WTS_SESSION_LOCK => handler(true),
                WTS_SESSION_UNLOCK => handler(false),
                _ => {}
            });
        self.registration = Some((window, id));
        tracing::debug!(window = window.as_raw(), "registered for session notifications");
        Ok(())
    }

    fn unsubscribe(&mut self) {
        let Some((window, id)) = self.registration.take() else {
            return;
        };
        self.pump.deregister_handler(WM_WTSSESSION_CHANGE, id);
        // SAFETY: same window and server as the matching registration.
        let unregistered =
            unsafe { WTSUnRegisterSessionNotificationEx(ptr::null_mut(), window.as_raw() as HWND) };
        if unregistered == 0 {
            tracing::warn!(
                error = %io::Error::last_os_error(),
                "failed to unregister session notifications"
            );
        }
    }
}

impl Drop for WtsSessionSource {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
