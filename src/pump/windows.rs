//! Hidden message-only window serving as the native side of the pump.

use std::collections::HashMap;
use std::io;
use std::ptr;
use std::sync::{Arc, LazyLock, Mutex};

use windows_sys::Win32::Foundation::{HWND, LPARAM, LRESULT, WPARAM};
use windows_sys::Win32::System::LibraryLoader::GetModuleHandleW;
use windows_sys::Win32::UI::WindowsAndMessaging::{
    CreateWindowExW, DefWindowProcW, DestroyWindow, DispatchMessageW, GetClassInfoExW,
    GetMessageW, IsWindow, PostMessageW, PostQuitMessage, RegisterClassExW, TranslateMessage,
    HWND_MESSAGE, MSG, WM_CLOSE, WM_DESTROY, WNDCLASSEXW,
};

use super::{MessagePump, PumpContext, PumpOptions, WindowHandle, WindowMessage};
use crate::shared::{self, ResourceKind, SharedResource};
use crate::{Error, Result};

const ERROR_CLASS_ALREADY_EXISTS: i32 = 1410;

static WINDOW_CLASS: LazyLock<Vec<u16>> =
    LazyLock::new(|| wide("session_lock_events_message_window_class"));
static WINDOW_NAME: LazyLock<Vec<u16>> = LazyLock::new(|| wide("session_lock_events_message_window"));

/// Serialises the check-then-register of the window class.
static CLASS_REGISTRATION: Mutex<()> = Mutex::new(());

/// Pump contexts by window handle, consulted by the window procedure.
static ROUTES: LazyLock<Mutex<HashMap<isize, PumpContext>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

fn wide(text: &str) -> Vec<u16> {
    text.encode_utf16().chain(Some(0)).collect()
}

/// Returns the process-wide message pump, starting it if necessary.
pub fn message_pump() -> Result<Arc<MessagePump>> {
    shared::get_or_create(ResourceKind::MessagePump, &PumpOptions::default(), false)
}

impl SharedResource for MessagePump {
    type Options = PumpOptions;

    fn create(kind: &ResourceKind, options: &PumpOptions) -> Result<Self> {
        if *kind != ResourceKind::MessagePump {
            return Err(Error::UnsupportedResourceKind {
                kind: kind.clone(),
                type_name: std::any::type_name::<Self>(),
            });
        }
        MessagePump::spawn(options.clone(), run_message_window)
    }
}

/// Registers the window class unless it exists already.
///
/// Returns `true` if this call registered it.
fn ensure_window_class(instance: isize) -> Result<bool> {
    let _guard = CLASS_REGISTRATION.lock().unwrap_or_else(|p| p.into_inner());

    // SAFETY: WNDCLASSEXW is plain data; an all-zero value is a valid out buffer.
    let mut existing: WNDCLASSEXW = unsafe { std::mem::zeroed() };
    existing.cbSize = std::mem::size_of::<WNDCLASSEXW>() as u32;
    // SAFETY: the class name is NUL-terminated and `existing` is writable.
    if unsafe { GetClassInfoExW(instance as _, WINDOW_CLASS.as_ptr(), &mut existing) } != 0 {
        return Ok(false);
    }

    // SAFETY: as above.
    let mut class: WNDCLASSEXW = unsafe { std::mem::zeroed() };
    class.cbSize = std::mem::size_of::<WNDCLASSEXW>() as u32;
    class.lpfnWndProc = Some(window_procedure);
    class.hInstance = instance as _;
    class.lpszClassName = WINDOW_CLASS.as_ptr();

    // SAFETY: `class` is fully initialised and the class name outlives the process.
    if unsafe { RegisterClassExW(&class) } == 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(ERROR_CLASS_ALREADY_EXISTS) {
            return Ok(false);
        }
        return Err(Error::WindowClassRegistration(err));
    }

    tracing::debug!("message window class registered");
    Ok(true)
}

fn current_instance() -> isize {
    // SAFETY: a null module name yields the handle of the current executable.
    unsafe { GetModuleHandleW(ptr::null()) as isize }
}

/// Pump body owning a message-only window.
///
/// Creates the window, reports `Running`, then retrieves and dispatches
/// messages until the window is destroyed or a stop is requested.
pub fn run_message_window(context: PumpContext) -> Result<()> {
    let instance = current_instance();
    ensure_window_class(instance)?;

    // SAFETY: class and window names are NUL-terminated; HWND_MESSAGE makes
    // the window invisible and message-only.
    let window: HWND = unsafe {
        CreateWindowExW(
            0,
            WINDOW_CLASS.as_ptr(),
            WINDOW_NAME.as_ptr(),
            0,
            0,
            0,
            0,
            0,
            HWND_MESSAGE,
            ptr::null_mut(),
            instance as _,
            ptr::null(),
        )
    };
    if window.is_null() {
        return Err(Error::WindowCreation(io::Error::last_os_error()));
    }

    let raw = window as isize;
    ROUTES
        .lock()
        .unwrap_or_else(|p| p.into_inner())
        .insert(raw, context.clone());

    context.mark_running(WindowHandle::from_raw(raw), move || {
        // SAFETY: posting to a window owned by another thread is allowed;
        // a destroyed window makes the call fail harmlessly.
        unsafe { PostMessageW(raw as HWND, WM_CLOSE, 0, 0) };
    });

    // SAFETY: MSG is plain data.
    let mut message: MSG = unsafe { std::mem::zeroed() };
    loop {
        // SAFETY: `message` is writable; a null window retrieves WM_QUIT as well.
        let status = unsafe { GetMessageW(&mut message, ptr::null_mut(), 0, 0) };
        if status == 0 {
            break;
        }
        if status == -1 {
            tracing::warn!(error = %io::Error::last_os_error(), "GetMessageW failed");
            break;
        }

        // SAFETY: `message` was filled in by GetMessageW.
        unsafe {
            TranslateMessage(&message);
            DispatchMessageW(&message);
        }

        if context.stop_requested() {
            break;
        }
    }

    // SAFETY: the window belongs to this thread.
    unsafe {
        if IsWindow(window) != 0 {
            DestroyWindow(window);
        }
    }
    ROUTES.lock().unwrap_or_else(|p| p.into_inner()).remove(&raw);
    Ok(())
}

unsafe extern "system" fn window_procedure(
    window: HWND,
    message: u32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    let raw = window as isize;
    let context = ROUTES
        .lock()
        .unwrap_or_else(|p| p.into_inner())
        .get(&raw)
        .cloned();

    if let Some(context) = context {
        context.dispatch(WindowMessage {
            window: WindowHandle::from_raw(raw),
            message,
            wparam,
            lparam,
        });
    }

    if message == WM_DESTROY {
        ROUTES.lock().unwrap_or_else(|p| p.into_inner()).remove(&raw);
        PostQuitMessage(0);
    }

    DefWindowProcW(window, message, wparam, lparam)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_class_registered_once() -> Result<()> {
        let instance = current_instance();
        ensure_window_class(instance)?;

        assert!(!ensure_window_class(instance)?);
        assert!(!ensure_window_class(instance)?);
        Ok(())
    }

    #[test]
    fn test_message_window_runs_and_stops() -> Result<()> {
        let pump = MessagePump::spawn(
            PumpOptions::default().with_thread_name("window-test"),
            run_message_window,
        )?;
        let window = pump.window().ok_or(Error::PumpNotRunning)?;
        assert!(ROUTES
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .contains_key(&window.as_raw()));

        pump.shutdown().unwrap();
        assert!(!ROUTES
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .contains_key(&window.as_raw()));
        Ok(())
    }
}
