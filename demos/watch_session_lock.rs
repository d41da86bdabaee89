//! Session lock watcher example for session-lock-events.
//!
//! Demonstrates:
//! - Creating an observer on the platform's native backend
//! - Moving an observer after construction
//! - Several observers sharing one native connection or message pump
//! - Printing every lock and unlock transition
//!
//! Run with: `RUST_LOG=debug cargo run --example watch_session_lock`

use session_lock_events::{SessionLockObserver, SessionLockState};
use std::io::{self, BufRead};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    println!("=== session-lock-events: Watch Session Lock ===\n");

    // -------------------------------------------------------------------------
    // 1. Create an observer and move it
    // -------------------------------------------------------------------------
    println!("1. Creating the primary observer...");

    let created = SessionLockObserver::new()?;
    let primary = Box::new(created);

    match primary.state() {
        Some(state) => println!("   Current state: {state}"),
        None => println!("   Current state: unknown until the first notification"),
    }

    // -------------------------------------------------------------------------
    // 2. A second observer reuses the shared native resources
    // -------------------------------------------------------------------------
    println!("\n2. Creating a secondary observer...");

    let secondary = SessionLockObserver::new()?;

    // -------------------------------------------------------------------------
    // 3. Print transitions
    // -------------------------------------------------------------------------
    primary.register_callback(|state| match state {
        SessionLockState::Locked => println!("   [primary] session locked"),
        SessionLockState::Unlocked => println!("   [primary] session unlocked"),
    });
    secondary.register_callback(|state| println!("   [secondary] now {state}"));

    println!("\n3. Lock and unlock the session. Press Enter to quit.\n");

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;

    drop(secondary);
    drop(primary);
    println!("=== Done ===");
    Ok(())
}
