//! Background message pump.
//!
//! A [`MessagePump`] owns one worker thread that runs a blocking message
//! loop and hands every received [`WindowMessage`] to the handlers
//! registered for its message type. The loop itself is supplied as a
//! closure receiving a [`PumpContext`]; on Windows that closure is
//! [`run_message_window`], which owns a hidden message-only window.
//!
//! The worker goes through `NotStarted -> Starting -> Running -> Stopped`.
//! [`MessagePump::spawn`] only returns once the worker reports `Running`,
//! polling with a short growing backoff bounded by
//! [`PumpOptions::startup_timeout`].

#[cfg(windows)]
mod windows;

#[cfg(windows)]
pub use self::windows::{message_pump, run_message_window};

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicIsize, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::callback::CallbackId;
use crate::handler_table::HandlerTable;
use crate::{Error, Result};

const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(2);
const MAX_STARTUP_BACKOFF: Duration = Duration::from_millis(10);

/// Lifecycle of a pump worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PumpState {
    NotStarted,
    Starting,
    Running,
    Stopped,
}

impl PumpState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => PumpState::Starting,
            2 => PumpState::Running,
            3 => PumpState::Stopped,
            _ => PumpState::NotStarted,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            PumpState::NotStarted => 0,
            PumpState::Starting => 1,
            PumpState::Running => 2,
            PumpState::Stopped => 3,
        }
    }
}

/// Native window handle, stored as an integer so it can cross threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowHandle(isize);

impl WindowHandle {
    pub const fn from_raw(raw: isize) -> Self {
        WindowHandle(raw)
    }

    pub const fn as_raw(self) -> isize {
        self.0
    }
}

/// One native message as delivered to the pump's window.
///
/// The arguments are passed through exactly as received.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowMessage {
    pub window: WindowHandle,
    pub message: u32,
    pub wparam: usize,
    pub lparam: isize,
}

/// Settings for spawning a [`MessagePump`].
#[derive(Debug, Clone)]
pub struct PumpOptions {
    /// Upper bound for the worker to reach `Running`.
    pub startup_timeout: Duration,
    /// Name given to the worker thread.
    pub thread_name: String,
}

impl PumpOptions {
    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }
}

impl Default for PumpOptions {
    fn default() -> Self {
        Self {
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            thread_name: "session-lock-pump".to_string(),
        }
    }
}

type Waker = Box<dyn Fn() + Send + Sync + 'static>;

/// State shared between the pump handle and its worker.
struct PumpShared {
    state: AtomicU8,
    stop: AtomicBool,
    window: AtomicIsize,
    has_window: AtomicBool,
    handlers: HandlerTable<u32, WindowMessage>,
    waker: Mutex<Option<Waker>>,
    startup_error: Mutex<Option<Error>>,
}

impl PumpShared {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(PumpState::NotStarted.as_u8()),
            stop: AtomicBool::new(false),
            window: AtomicIsize::new(0),
            has_window: AtomicBool::new(false),
            handlers: HandlerTable::new(),
            waker: Mutex::new(None),
            startup_error: Mutex::new(None),
        }
    }

    fn state(&self) -> PumpState {
        PumpState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: PumpState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    fn window(&self) -> Option<WindowHandle> {
        self.has_window
            .load(Ordering::Acquire)
            .then(|| WindowHandle(self.window.load(Ordering::Acquire)))
    }

    fn wake(&self) {
        let waker = self.waker.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(waker) = waker.as_ref() {
            waker();
        }
    }

    fn request_stop(&self) {
        if !self.stop.swap(true, Ordering::AcqRel) {
            tracing::debug!("message pump stop requested");
        }
        self.wake();
    }

    fn dispatch(&self, message: WindowMessage) {
        if self.stop.load(Ordering::Acquire) {
            return;
        }
        let handled = self.handlers.dispatch(&message.message, message);
        tracing::trace!(message = message.message, handled, "window message dispatched");
    }
}

/// Moves the pump to `Stopped` however the worker body ends, panics included.
struct StoppedOnExit(Arc<PumpShared>);

impl Drop for StoppedOnExit {
    fn drop(&mut self) {
        self.0.has_window.store(false, Ordering::Release);
        self.0.set_state(PumpState::Stopped);
        tracing::debug!("message pump worker exited");
    }
}

/// Worker-side view of a pump, handed to the loop body.
#[derive(Clone)]
pub struct PumpContext {
    shared: Arc<PumpShared>,
}

impl PumpContext {
    /// Reports that the native window exists and the loop is about to start.
    ///
    /// `waker` must make a blocked loop iteration return; it is called when
    /// a stop is requested, possibly from another thread. If a stop was
    /// already requested it is called right away.
    pub fn mark_running(&self, window: WindowHandle, waker: impl Fn() + Send + Sync + 'static) {
        *self.shared.waker.lock().unwrap_or_else(|p| p.into_inner()) = Some(Box::new(waker));
        self.shared.window.store(window.0, Ordering::Release);
        self.shared.has_window.store(true, Ordering::Release);
        self.shared.set_state(PumpState::Running);
        tracing::debug!(window = window.0, "message pump running");

        if self.stop_requested() {
            self.shared.wake();
        }
    }

    /// Cooperative stop flag, checked once per loop iteration.
    pub fn stop_requested(&self) -> bool {
        self.shared.stop.load(Ordering::Acquire)
    }

    /// Forwards a received message to the registered handlers.
    pub fn dispatch(&self, message: WindowMessage) {
        self.shared.dispatch(message);
    }

    pub fn window(&self) -> Option<WindowHandle> {
        self.shared.window()
    }
}

impl fmt::Debug for PumpContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PumpContext")
            .field("state", &self.shared.state())
            .field("stop_requested", &self.stop_requested())
            .finish()
    }
}

/// Handle to a running message pump.
///
/// Dropping the handle requests a stop and removes every handler; the worker
/// is detached and finishes on its own once its loop observes the stop.
pub struct MessagePump {
    shared: Arc<PumpShared>,
    worker: Option<JoinHandle<()>>,
}

impl MessagePump {
    /// Spawns the worker running `body` and waits until it reports `Running`.
    ///
    /// # Errors
    ///
    /// - [`Error::ThreadSpawn`] if the thread could not be created
    /// - the error `body` returned before marking itself running
    /// - [`Error::PumpExited`] if `body` ended early without an error
    /// - [`Error::PumpStartupTimeout`] if `Running` was not reached in time
    pub fn spawn<F>(options: PumpOptions, body: F) -> Result<Self>
    where
        F: FnOnce(PumpContext) -> Result<()> + Send + 'static,
    {
        let shared = Arc::new(PumpShared::new());
        shared.set_state(PumpState::Starting);

        let context = PumpContext {
            shared: shared.clone(),
        };
        let worker = thread::Builder::new()
            .name(options.thread_name.clone())
            .spawn(move || {
                let _stopped = StoppedOnExit(context.shared.clone());
                let shared = context.shared.clone();
                if let Err(err) = body(context) {
                    tracing::warn!(error = %err, "message pump worker failed");
                    if !matches!(shared.state(), PumpState::Running) {
                        *shared
                            .startup_error
                            .lock()
                            .unwrap_or_else(|p| p.into_inner()) = Some(err);
                    }
                }
            })
            .map_err(Error::ThreadSpawn)?;

        let pump = MessagePump {
            shared,
            worker: Some(worker),
        };
        pump.wait_until_running(options.startup_timeout)?;
        Ok(pump)
    }

    fn wait_until_running(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut attempt = 0u32;

        loop {
            match self.shared.state() {
                PumpState::Running => return Ok(()),
                PumpState::Stopped => {
                    let err = self
                        .shared
                        .startup_error
                        .lock()
                        .unwrap_or_else(|p| p.into_inner())
                        .take();
                    return Err(err.unwrap_or(Error::PumpExited));
                }
                PumpState::NotStarted | PumpState::Starting => {}
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(?timeout, attempts = attempt, "message pump startup timed out");
                return Err(Error::PumpStartupTimeout { timeout });
            }

            thread::sleep(startup_backoff(attempt).min(deadline - now));
            attempt = attempt.saturating_add(1);
        }
    }

    /// `true` while the loop is running: after the window exists and before
    /// the worker exits.
    pub fn is_running(&self) -> bool {
        self.shared.state() == PumpState::Running
    }

    pub fn state(&self) -> PumpState {
        self.shared.state()
    }

    /// The window owned by the worker, once it is running.
    pub fn window(&self) -> Option<WindowHandle> {
        self.shared.window()
    }

    /// Registers `handler` for messages of type `message`.
    pub fn register_handler(
        &self,
        message: u32,
        handler: impl Fn(WindowMessage) + Send + Sync + 'static,
    ) -> CallbackId {
        self.shared.handlers.register(message, handler)
    }

    /// Removes one handler. Unknown message types and IDs are ignored.
    pub fn deregister_handler(&self, message: u32, id: CallbackId) -> bool {
        self.shared.handlers.deregister(&message, id)
    }

    pub fn clear_handlers(&self, message: u32) {
        self.shared.handlers.clear(&message);
    }

    pub fn clear_all_handlers(&self) {
        self.shared.handlers.clear_all();
    }

    /// Invokes the handlers registered for `message.message`.
    ///
    /// Normally called by the worker for each message delivered to its
    /// window. Ignored once a stop was requested.
    pub fn dispatch(&self, message: WindowMessage) {
        self.shared.dispatch(message);
    }

    /// Asks the worker to leave its loop.
    pub fn request_stop(&self) {
        self.shared.request_stop();
    }

    /// Stops the worker and waits for it to exit.
    pub fn shutdown(mut self) -> thread::Result<()> {
        self.shared.request_stop();
        self.shared.handlers.clear_all();
        match self.worker.take() {
            Some(worker) if worker.thread().id() != thread::current().id() => worker.join(),
            _ => Ok(()),
        }
    }
}

impl Drop for MessagePump {
    fn drop(&mut self) {
        self.shared.request_stop();
        self.shared.handlers.clear_all();
        // The worker keeps its own reference to the shared state.
        self.worker.take();
    }
}

impl fmt::Debug for MessagePump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessagePump")
            .field("state", &self.shared.state())
            .field("window", &self.shared.window())
            .field("handlers", &self.shared.handlers)
            .finish()
    }
}

/// Sleep between two startup polls: 5µs, 55µs, 105µs, ... capped at 10ms.
fn startup_backoff(attempt: u32) -> Duration {
    let micros = 5 * (u64::from(attempt) * 10 + 1);
    Duration::from_micros(micros).min(MAX_STARTUP_BACKOFF)
}
