// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! D-Bus connection manager.
//!
//! Owns the bus connection, tracks which well-known names currently have an
//! owner, and installs one signal subscription per mapping. Subscriptions
//! survive services coming and going: a match rule keyed on the well-known
//! name keeps delivering once the bus routes signals from a new owner, and a
//! registration that failed while the service was down is retried on the
//! next `NameOwnerChanged` appearance.
//!
//! Method calls are gated on the liveness set and fail fast with
//! `ServiceUnavailable` when the target name has no owner.

use crate::config::{BusType, SignalMapping};
use crate::error::BridgeError;
use crate::value::BusValue;
use futures_util::StreamExt;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use zbus::zvariant::{Structure, StructureBuilder};
use zbus::{fdo, Connection, MatchRule, MessageStream};

/// Upper bound on top-level signal arguments read per message.
pub const MAX_SIGNAL_ARGS: usize = 100;

/// Queued messages per signal subscription before the bus side backpressures.
const SIGNAL_QUEUE_CAPACITY: usize = 64;

/// Sink for `(mapping, arguments)` of each matched signal.
pub type SignalCallback = Arc<dyn Fn(&SignalMapping, Vec<BusValue>) + Send + Sync>;

/// D-Bus connection manager.
pub struct DbusManager {
    inner: Arc<Inner>,
    started: AtomicBool,
}

struct Inner {
    connection: Connection,
    mappings: Vec<SignalMapping>,
    state: Mutex<BusState>,
    callback: Mutex<Option<SignalCallback>>,
}

/// Liveness set and subscription table, guarded by one lock. Mutated only
/// during startup and from the `NameOwnerChanged` watcher.
#[derive(Default)]
struct BusState {
    /// Well-known names currently owned on the bus.
    live_names: HashSet<String>,
    /// Mapping indices with an installed signal subscription.
    subscribed: HashSet<usize>,
}

/// Effect of one `NameOwnerChanged` delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NameTransition {
    Appeared,
    Disappeared,
    Ignored,
}

fn classify_transition(name: &str, old_owner: &str, new_owner: &str) -> NameTransition {
    // Unique connection names (":1.42") are not tracked
    if name.starts_with(':') {
        return NameTransition::Ignored;
    }
    match (old_owner.is_empty(), new_owner.is_empty()) {
        (true, false) => NameTransition::Appeared,
        (false, true) => NameTransition::Disappeared,
        _ => NameTransition::Ignored,
    }
}

fn apply_owner_change(
    state: &mut BusState,
    name: &str,
    old_owner: &str,
    new_owner: &str,
) -> NameTransition {
    let transition = classify_transition(name, old_owner, new_owner);
    match transition {
        NameTransition::Appeared => {
            state.live_names.insert(name.to_string());
        }
        NameTransition::Disappeared => {
            state.live_names.remove(name);
        }
        NameTransition::Ignored => {}
    }
    transition
}

impl DbusManager {
    /// Open a connection to the selected bus.
    pub async fn new(mappings: Vec<SignalMapping>, bus: BusType) -> Result<Self, BridgeError> {
        let connection = match bus {
            BusType::System => Connection::system().await,
            BusType::Session => Connection::session().await,
        }
        .map_err(BridgeError::BusConnect)?;

        Ok(Self {
            inner: Arc::new(Inner {
                connection,
                mappings,
                state: Mutex::new(BusState::default()),
                callback: Mutex::new(None),
            }),
            started: AtomicBool::new(false),
        })
    }

    /// Install the signal sink. Must be called before `start()`.
    pub fn set_signal_callback(&self, callback: SignalCallback) {
        *self.inner.callback.lock() = Some(callback);
    }

    /// Start watching ownership and install per-mapping subscriptions.
    ///
    /// Idempotent. A service that is absent or broken at startup is logged
    /// and retried when its name appears; it never fails the start.
    pub async fn start(&self) -> Result<(), BridgeError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let inner = self.inner.clone();

        // Install the NameOwnerChanged handler before ListNames so no
        // transition between the two can be missed.
        let owner_changes = Inner::name_owner_stream(&inner.connection).await?;

        // Seed the liveness set, ignoring unique connection names.
        let dbus_proxy = fdo::DBusProxy::new(&inner.connection).await?;
        let names = dbus_proxy.list_names().await?;
        {
            let mut state = inner.state.lock();
            for name in names {
                let name = name.to_string();
                if !name.starts_with(':') {
                    state.live_names.insert(name);
                }
            }
        }

        // One subscription attempt per mapping.
        for index in 0..inner.mappings.len() {
            if let Err(e) = Inner::subscribe(&inner, index).await {
                let m = &inner.mappings[index];
                tracing::warn!(
                    "Signal registration for {} {}.{} failed: {} (will retry when the service appears)",
                    m.service,
                    m.interface,
                    m.signal,
                    e
                );
            }
        }

        tokio::spawn(Inner::watch_name_owners(inner, owner_changes));
        Ok(())
    }

    /// Whether a well-known name currently has an owner.
    pub fn is_service_live(&self, service: &str) -> bool {
        self.inner.state.lock().live_names.contains(service)
    }

    /// Call a method on a live service and return all reply values.
    ///
    /// Fails fast with [`BridgeError::ServiceUnavailable`] when the target
    /// name is not in the liveness set at the gate check; a service dying
    /// mid-call surfaces as the bus error instead.
    pub async fn call_method(
        &self,
        service: &str,
        path: &str,
        interface: &str,
        method: &str,
        args: &[BusValue],
    ) -> Result<Vec<BusValue>, BridgeError> {
        {
            let state = self.inner.state.lock();
            if !state.live_names.contains(service) {
                return Err(BridgeError::ServiceUnavailable(service.to_string()));
            }
        }

        let connection = &self.inner.connection;
        let reply = if args.is_empty() {
            connection
                .call_method(Some(service), path, Some(interface), method, &())
                .await?
        } else {
            let mut builder = StructureBuilder::new();
            for arg in args {
                builder = builder.append_field(arg.to_wire());
            }
            let body = builder.build();
            connection
                .call_method(Some(service), path, Some(interface), method, &body)
                .await?
        };

        Ok(read_reply_values(&reply))
    }
}

impl Inner {
    async fn name_owner_stream(connection: &Connection) -> Result<MessageStream, zbus::Error> {
        let rule = MatchRule::builder()
            .msg_type(zbus::message::Type::Signal)
            .sender("org.freedesktop.DBus")?
            .path("/org/freedesktop/DBus")?
            .interface("org.freedesktop.DBus")?
            .member("NameOwnerChanged")?
            .build();
        MessageStream::for_match_rule(rule, connection, Some(SIGNAL_QUEUE_CAPACITY)).await
    }

    /// Install the signal subscription for one mapping, spawning a reader
    /// task that feeds the signal callback. No-op when already installed.
    async fn subscribe(inner: &Arc<Inner>, index: usize) -> Result<(), zbus::Error> {
        if inner.state.lock().subscribed.contains(&index) {
            return Ok(());
        }

        let mapping = &inner.mappings[index];
        let rule = MatchRule::builder()
            .msg_type(zbus::message::Type::Signal)
            .sender(mapping.service.as_str())?
            .path(mapping.path.as_str())?
            .interface(mapping.interface.as_str())?
            .member(mapping.signal.as_str())?
            .build();
        let mut stream =
            MessageStream::for_match_rule(rule, &inner.connection, Some(SIGNAL_QUEUE_CAPACITY))
                .await?;

        inner.state.lock().subscribed.insert(index);
        tracing::info!(
            "Subscribed to signal {}.{} from {} at {}",
            mapping.interface,
            mapping.signal,
            mapping.service,
            mapping.path
        );

        let callback = inner.callback.lock().clone();
        let mapping = mapping.clone();
        tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                match msg {
                    Ok(msg) => {
                        let args = read_signal_args(&msg);
                        if let Some(cb) = &callback {
                            cb(&mapping, args);
                        }
                    }
                    Err(e) => {
                        tracing::debug!(
                            "Signal stream error for {}.{}: {}",
                            mapping.interface,
                            mapping.signal,
                            e
                        );
                    }
                }
            }
        });
        Ok(())
    }

    /// Track ownership changes for the lifetime of the connection.
    async fn watch_name_owners(inner: Arc<Inner>, mut stream: MessageStream) {
        while let Some(msg) = stream.next().await {
            let msg = match msg {
                Ok(m) => m,
                Err(e) => {
                    tracing::debug!("NameOwnerChanged stream error: {}", e);
                    continue;
                }
            };
            let (name, old_owner, new_owner): (String, String, String) =
                match msg.body().deserialize() {
                    Ok(args) => args,
                    Err(e) => {
                        tracing::warn!("Malformed NameOwnerChanged signal: {}", e);
                        continue;
                    }
                };

            let transition = {
                let mut state = inner.state.lock();
                apply_owner_change(&mut state, &name, &old_owner, &new_owner)
            };

            match transition {
                NameTransition::Appeared => {
                    tracing::info!("Service appeared on the bus: {}", name);
                    // Install any subscription that could not be registered
                    // while the service was down. Existing subscriptions are
                    // kept; the bus resumes routing to them on its own.
                    for index in 0..inner.mappings.len() {
                        if inner.mappings[index].service != name {
                            continue;
                        }
                        if let Err(e) = Inner::subscribe(&inner, index).await {
                            let m = &inner.mappings[index];
                            tracing::warn!(
                                "Signal registration for {} {}.{} failed: {}",
                                m.service,
                                m.interface,
                                m.signal,
                                e
                            );
                        }
                    }
                }
                NameTransition::Disappeared => {
                    tracing::info!("Service disappeared from the bus: {}", name);
                }
                NameTransition::Ignored => {}
            }
        }
    }
}

/// Read the argument values of a signal message, in wire order.
///
/// Reads at most [`MAX_SIGNAL_ARGS`] top-level arguments; an argument of an
/// unsupported type becomes the diagnostic sentinel instead of aborting the
/// message, and an unreadable body yields whatever was gathered (nothing).
pub(crate) fn read_signal_args(message: &zbus::Message) -> Vec<BusValue> {
    let body = message.body();
    let structure: Structure<'_> = match body.deserialize() {
        Ok(s) => s,
        Err(e) => {
            // Signals without arguments have no body to deserialize
            tracing::debug!("Could not read signal body: {}", e);
            return Vec::new();
        }
    };

    let fields = structure.fields();
    if fields.len() > MAX_SIGNAL_ARGS {
        tracing::warn!(
            "Signal carries {} arguments, reading only the first {}",
            fields.len(),
            MAX_SIGNAL_ARGS
        );
    }
    fields
        .iter()
        .take(MAX_SIGNAL_ARGS)
        .map(BusValue::from_wire)
        .collect()
}

/// Read every value out of a method reply; empty when the reply has no body.
fn read_reply_values(reply: &zbus::Message) -> Vec<BusValue> {
    let body = reply.body();
    let structure: Structure<'_> = match body.deserialize() {
        Ok(s) => s,
        Err(_) => return Vec::new(),
    };
    structure.fields().iter().map(BusValue::from_wire).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_classification() {
        assert_eq!(
            classify_transition("org.example.S", "", ":1.7"),
            NameTransition::Appeared
        );
        assert_eq!(
            classify_transition("org.example.S", ":1.7", ""),
            NameTransition::Disappeared
        );
        // Owner replacement is neither an appearance nor a disappearance
        assert_eq!(
            classify_transition("org.example.S", ":1.7", ":1.9"),
            NameTransition::Ignored
        );
        assert_eq!(
            classify_transition("org.example.S", "", ""),
            NameTransition::Ignored
        );
        // Unique names are never tracked
        assert_eq!(
            classify_transition(":1.7", "", ":1.7"),
            NameTransition::Ignored
        );
    }

    #[test]
    fn test_liveness_converges() {
        let mut state = BusState::default();

        apply_owner_change(&mut state, "org.example.A", "", ":1.2");
        apply_owner_change(&mut state, "org.example.B", "", ":1.3");
        apply_owner_change(&mut state, ":1.4", "", ":1.4");
        assert!(state.live_names.contains("org.example.A"));
        assert!(state.live_names.contains("org.example.B"));
        assert_eq!(state.live_names.len(), 2);

        apply_owner_change(&mut state, "org.example.A", ":1.2", "");
        assert!(!state.live_names.contains("org.example.A"));

        // Flap: down, up, down again
        apply_owner_change(&mut state, "org.example.B", ":1.3", "");
        apply_owner_change(&mut state, "org.example.B", "", ":1.5");
        apply_owner_change(&mut state, "org.example.B", ":1.5", "");
        assert!(!state.live_names.contains("org.example.B"));
        assert!(state.live_names.is_empty());
    }

    #[test]
    fn test_read_signal_args_wire_order() {
        let msg = zbus::Message::signal("/org/example/Sensor", "org.example.Sensor", "Notify")
            .expect("signal builder")
            .build(&("hello", 42i32))
            .expect("build message");

        let args = read_signal_args(&msg);
        assert_eq!(
            args,
            vec![BusValue::Str("hello".into()), BusValue::I32(42)]
        );
    }

    #[test]
    fn test_read_signal_args_empty_body() {
        let msg = zbus::Message::signal("/org/example/Sensor", "org.example.Sensor", "Ping")
            .expect("signal builder")
            .build(&())
            .expect("build message");

        assert!(read_signal_args(&msg).is_empty());
    }

    #[test]
    fn test_read_signal_args_safety_bound() {
        let mut builder = StructureBuilder::new();
        for i in 0..(MAX_SIGNAL_ARGS as i32 + 5) {
            builder = builder.append_field(zbus::zvariant::Value::I32(i));
        }
        let body = builder.build();

        let msg = zbus::Message::signal("/org/example/Sensor", "org.example.Sensor", "Burst")
            .expect("signal builder")
            .build(&body)
            .expect("build message");

        let args = read_signal_args(&msg);
        assert_eq!(args.len(), MAX_SIGNAL_ARGS);
        assert_eq!(args[0], BusValue::I32(0));
        assert_eq!(args[MAX_SIGNAL_ARGS - 1], BusValue::I32(99));
    }

    #[test]
    fn test_read_signal_args_blob() {
        let msg = zbus::Message::signal("/org/example/Sensor", "org.example.Sensor", "Blob")
            .expect("signal builder")
            .build(&(vec![0x00u8, 0xFF, 0x10],))
            .expect("build message");

        let args = read_signal_args(&msg);
        assert_eq!(args, vec![BusValue::Bytes(vec![0x00, 0xFF, 0x10])]);
    }
}
