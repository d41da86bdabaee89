//! Shared D-Bus connections with keyed signal handlers.
//!
//! A [`BusConnection`] wraps a blocking `zbus` connection. Its event loop is
//! a single thread reading every incoming message and handing signals to the
//! handlers registered for their interface and member. Match rules are added
//! on the bus when the first handler of a signal arrives and removed after
//! the last one leaves.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;

use zbus::blocking::fdo::DBusProxy;
use zbus::blocking::{Connection, MessageIterator};
use zbus::message::Type as MessageType;
use zbus::{MatchRule, Message};

use crate::callback::CallbackId;
use crate::handler_table::HandlerTable;
use crate::shared::{self, ResourceKind, SharedResource};
use crate::{Error, Result};

/// Identity of a D-Bus signal: interface plus member name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SignalKey {
    pub interface: String,
    pub member: String,
}

impl SignalKey {
    pub fn new(interface: impl Into<String>, member: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            member: member.into(),
        }
    }

    /// Key of `message` if it is a signal carrying both header fields.
    fn of(message: &Message) -> Option<Self> {
        let header = message.header();
        if header.message_type() != MessageType::Signal {
            return None;
        }
        Some(Self::new(
            header.interface()?.as_str(),
            header.member()?.as_str(),
        ))
    }
}

impl fmt::Display for SignalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.interface, self.member)
    }
}

/// A shared bus connection. Obtain one through [`session_bus`] or
/// [`system_bus`].
pub struct BusConnection {
    kind: ResourceKind,
    connection: Connection,
    signals: Arc<HandlerTable<SignalKey, Message>>,
    event_loop_started: AtomicBool,
}

impl BusConnection {
    pub fn kind(&self) -> &ResourceKind {
        &self.kind
    }

    /// The underlying `zbus` connection, for method calls.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Registers `handler` for the signal `key`.
    ///
    /// Handlers run on the connection's event loop thread, which must have
    /// been requested when the connection was obtained. The match rule is
    /// added while the handler table is locked, so concurrent first
    /// subscribers add it exactly once.
    pub fn subscribe_signal(
        &self,
        key: SignalKey,
        handler: impl Fn(Message) + Send + Sync + 'static,
    ) -> Result<CallbackId> {
        self.signals.register_with(key, handler, |key| {
            self.dbus()?.add_match_rule(match_rule(key)?)?;
            tracing::debug!(signal = %key, "signal match rule added");
            Ok(())
        })
    }

    /// Removes one signal handler. The match rule goes with the last handler.
    pub fn unsubscribe_signal(&self, key: &SignalKey, id: CallbackId) {
        self.signals.deregister_with(key, id, |key| {
            let removed = match_rule(key).and_then(|rule| {
                self.dbus()?.remove_match_rule(rule)?;
                Ok(())
            });
            match removed {
                Ok(()) => tracing::debug!(signal = %key, "signal match rule removed"),
                Err(err) => {
                    tracing::warn!(signal = %key, error = %err, "failed to remove match rule")
                }
            }
        });
    }

    fn dbus(&self) -> Result<DBusProxy<'static>> {
        Ok(DBusProxy::new(&self.connection)?)
    }

    fn spawn_event_loop(&self) -> Result<()> {
        let messages = MessageIterator::from(&self.connection);
        let signals = Arc::downgrade(&self.signals);
        let kind = self.kind.clone();

        thread::Builder::new()
            .name(format!("{kind}-events"))
            .spawn(move || run_event_loop(kind, messages, signals))
            .map_err(Error::ThreadSpawn)?;
        Ok(())
    }
}

fn match_rule(key: &SignalKey) -> Result<MatchRule<'_>> {
    Ok(MatchRule::builder()
        .msg_type(MessageType::Signal)
        .interface(key.interface.as_str())?
        .member(key.member.as_str())?
        .build())
}

/// Reads messages until the connection is closed.
fn run_event_loop(
    kind: ResourceKind,
    messages: MessageIterator,
    signals: Weak<HandlerTable<SignalKey, Message>>,
) {
    tracing::debug!(%kind, "bus event loop started");
    for message in messages {
        let Some(signals) = signals.upgrade() else {
            break;
        };
        match message {
            Ok(message) => {
                if let Some(key) = SignalKey::of(&message) {
                    let handled = signals.dispatch(&key, message);
                    tracing::trace!(signal = %key, handled, "bus signal dispatched");
                }
            }
            Err(err) => {
                tracing::debug!(%kind, error = %err, "bus event loop stopped");
                break;
            }
        }
    }
    tracing::debug!(%kind, "bus event loop exited");
}

impl SharedResource for BusConnection {
    type Options = ();

    fn create(kind: &ResourceKind, _options: &()) -> Result<Self> {
        let connection = match kind {
            ResourceKind::SessionBus => Connection::session()?,
            ResourceKind::SystemBus => Connection::system()?,
            other => {
                return Err(Error::UnsupportedResourceKind {
                    kind: other.clone(),
                    type_name: std::any::type_name::<Self>(),
                })
            }
        };
        tracing::debug!(%kind, "bus connection opened");

        Ok(BusConnection {
            kind: kind.clone(),
            connection,
            signals: Arc::new(HandlerTable::new()),
            event_loop_started: AtomicBool::new(false),
        })
    }

    fn start_event_loop(&self) -> Result<()> {
        if self.event_loop_started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.spawn_event_loop().inspect_err(|_| {
            self.event_loop_started.store(false, Ordering::Release);
        })
    }
}

impl Drop for BusConnection {
    fn drop(&mut self) {
        // Closing the shared socket also ends the event loop's iterator,
        // which holds a clone of the connection.
        match self.connection.clone().close() {
            Ok(()) => tracing::debug!(kind = %self.kind, "bus connection closed"),
            Err(err) => {
                tracing::warn!(kind = %self.kind, error = %err, "failed to close bus connection")
            }
        }
    }
}

impl fmt::Debug for BusConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusConnection")
            .field("kind", &self.kind)
            .field("signals", &self.signals)
            .field(
                "event_loop_started",
                &self.event_loop_started.load(Ordering::Acquire),
            )
            .finish()
    }
}

/// Shared connection to the session bus.
///
/// All callers get the same connection until every owner has dropped it.
/// With `start_event_loop`, signal delivery is guaranteed to be running.
pub fn session_bus(start_event_loop: bool) -> Result<Arc<BusConnection>> {
    shared::get_or_create(ResourceKind::SessionBus, &(), start_event_loop)
}

/// Shared connection to the system bus. See [`session_bus`].
pub fn system_bus(start_event_loop: bool) -> Result<Arc<BusConnection>> {
    shared::get_or_create(ResourceKind::SystemBus, &(), start_event_loop)
}
