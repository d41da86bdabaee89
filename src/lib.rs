//! # Session Lock Events
//!
//! Thread-safe notifications for when the interactive session is locked or
//! unlocked, on top of each platform's native mechanism.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use session_lock_events::{SessionLockObserver, SessionLockState};
//!
//! let observer = SessionLockObserver::new()?;
//! observer.register_callback(|state| match state {
//!     SessionLockState::Locked => println!("locked"),
//!     SessionLockState::Unlocked => println!("unlocked"),
//! });
//! # Ok::<(), session_lock_events::Error>(())
//! ```
//!
//! ## Backends
//!
//! - **Linux / BSD** (`dbus` feature, on by default): the
//!   `org.freedesktop.ScreenSaver` interface on the session bus
//! - **Windows**: `WM_WTSSESSION_CHANGE` messages delivered to a hidden
//!   message-only window served by a background [`MessagePump`]
//! - **Elsewhere**: no notifications; observers are created but stay silent
//!
//! ## Building Blocks
//!
//! - [`CallbackRegistry`] - ordered callbacks with stable subscription IDs
//! - [`shared::get_or_create`] - process-wide cache of shared native resources
//! - [`MessagePump`] - background message loop with per-message handlers
//! - [`NotificationSource`] - the capability every backend implements

#[cfg(all(feature = "dbus", unix, not(target_os = "macos")))]
pub mod bus;
mod cache_event;
mod callback;
mod error;
mod handler_table;
pub mod pump;
mod session_lock;
pub mod shared;
pub mod source;

// Re-export the main public API
pub use cache_event::CacheEvent;
pub use callback::{Callback, CallbackId, CallbackRegistry};
pub use error::{Error, Result};
pub use handler_table::HandlerTable;
pub use pump::{MessagePump, PumpContext, PumpOptions, PumpState, WindowHandle, WindowMessage};
pub use session_lock::{SessionLockObserver, SessionLockState};
pub use shared::ResourceKind;
pub use source::{ActivationHandler, NotificationSource, UnsupportedSource};
