// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! MQTT connection manager.
//!
//! Owns the single broker connection and a background task that drives the
//! rumqttc event loop. Reconnection is explicit: on any connection error the
//! task sleeps an exponential backoff delay (5 s doubling to 60 s, reset on
//! success) and polls again. Every successful connection re-issues all
//! subscriptions, since the broker may have been restarted and lost its
//! session state even with `clean_session = false`.

use crate::config::{CommandMapping, MqttConfig};
use parking_lot::Mutex;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Stable MQTT client identifier.
pub const CLIENT_ID: &str = "dbus-mqtt-bridge";

/// First reconnect delay after a failure.
const RECONNECT_DELAY_INITIAL: Duration = Duration::from_secs(5);

/// Reconnect delay cap.
const RECONNECT_DELAY_MAX: Duration = Duration::from_secs(60);

/// Request queue capacity between the client handle and the event loop.
const REQUEST_CHANNEL_CAPACITY: usize = 64;

/// Sink for inbound `(topic, payload)` messages.
pub type MessageCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// MQTT connection manager.
pub struct MqttManager {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    topics: Vec<String>,
    callback: Mutex<Option<MessageCallback>>,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
    event_loop: Mutex<Option<EventLoop>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl MqttManager {
    /// Create a manager for the given broker. Does not connect.
    pub fn new(config: &MqttConfig, mappings: &[CommandMapping]) -> Self {
        let mut options = MqttOptions::new(CLIENT_ID, &config.broker, config.port);
        // The broker keeps session state across brief outages; reconnection
        // is driven by the manager's own loop.
        options.set_clean_session(false);
        options.set_keep_alive(Duration::from_secs(30));
        if let Some((username, password)) = config.credentials() {
            options.set_credentials(username, password);
        }

        let (client, event_loop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);
        let (stop_tx, stop_rx) = watch::channel(false);

        Self {
            client,
            connected: Arc::new(AtomicBool::new(false)),
            topics: mappings.iter().map(|m| m.topic.clone()).collect(),
            callback: Mutex::new(None),
            stop_tx,
            stop_rx,
            event_loop: Mutex::new(Some(event_loop)),
            task: Mutex::new(None),
        }
    }

    /// Install the inbound message sink. Must be called before `connect()`.
    pub fn set_message_callback(&self, callback: MessageCallback) {
        *self.callback.lock() = Some(callback);
    }

    /// Launch the connection task. Non-blocking; returns immediately while
    /// the task connects (and reconnects) in the background.
    pub fn connect(&self) {
        let Some(event_loop) = self.event_loop.lock().take() else {
            tracing::warn!("MQTT manager already started");
            return;
        };

        let callback = self.callback.lock().clone();
        let task = tokio::spawn(run_event_loop(
            event_loop,
            self.client.clone(),
            self.topics.clone(),
            self.connected.clone(),
            self.stop_rx.clone(),
            callback,
        ));
        *self.task.lock() = Some(task);
    }

    /// Stop the connection task and close the connection.
    pub async fn disconnect(&self) {
        let _ = self.client.try_disconnect();
        let _ = self.stop_tx.send(true);
        self.connected.store(false, Ordering::SeqCst);

        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    /// Publish a payload at QoS 1, not retained.
    ///
    /// Dropped with a warning when the connection is down; the caller never
    /// blocks beyond the synchronous enqueue.
    pub fn publish(&self, topic: &str, payload: &str) {
        if !self.connected.load(Ordering::SeqCst) {
            tracing::warn!("MQTT not connected - dropping message for topic '{}'", topic);
            return;
        }
        if let Err(e) =
            self.client
                .try_publish(topic, QoS::AtLeastOnce, false, payload.as_bytes().to_vec())
        {
            tracing::warn!("MQTT publish to '{}' failed: {}", topic, e);
        }
    }

    /// Whether the manager currently believes the connection is up.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

async fn run_event_loop(
    mut event_loop: EventLoop,
    client: AsyncClient,
    topics: Vec<String>,
    connected: Arc<AtomicBool>,
    mut stop_rx: watch::Receiver<bool>,
    callback: Option<MessageCallback>,
) {
    let mut delay = RECONNECT_DELAY_INITIAL;

    loop {
        if *stop_rx.borrow() {
            break;
        }

        tokio::select! {
            _ = stop_rx.changed() => break,
            event = event_loop.poll() => match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    tracing::info!("Connected to MQTT broker");
                    connected.store(true, Ordering::SeqCst);
                    delay = RECONNECT_DELAY_INITIAL;
                    // The broker may have restarted and lost session state;
                    // re-issue every subscription before polling further so
                    // no inbound message precedes its subscription.
                    for topic in &topics {
                        tracing::info!("Subscribing to topic: {}", topic);
                        if let Err(e) = client.try_subscribe(topic, QoS::AtLeastOnce) {
                            tracing::warn!("Subscribe to '{}' failed: {}", topic, e);
                        }
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let payload = String::from_utf8_lossy(&publish.payload);
                    if let Some(cb) = &callback {
                        cb(&publish.topic, &payload);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    let was_connected = connected.swap(false, Ordering::SeqCst);
                    if was_connected {
                        tracing::warn!("MQTT connection lost: {}", e);
                    } else {
                        tracing::warn!("MQTT connect failed: {}", e);
                    }
                    tracing::info!("Retrying MQTT connection in {:?}", delay);
                    tokio::select! {
                        _ = stop_rx.changed() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    delay = next_delay(delay);
                }
            }
        }
    }

    connected.store(false, Ordering::SeqCst);
    tracing::debug!("MQTT event loop stopped");
}

/// Next backoff delay: double, capped.
fn next_delay(current: Duration) -> Duration {
    (current * 2).min(RECONNECT_DELAY_MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> MqttConfig {
        MqttConfig {
            broker: "localhost".to_string(),
            port: 1883,
            auth: None,
        }
    }

    #[test]
    fn test_backoff_schedule() {
        let mut delay = RECONNECT_DELAY_INITIAL;
        let mut schedule = Vec::new();
        for _ in 0..6 {
            schedule.push(delay.as_secs());
            delay = next_delay(delay);
        }
        assert_eq!(schedule, vec![5, 10, 20, 40, 60, 60]);
    }

    #[tokio::test]
    async fn test_publish_dropped_when_disconnected() {
        let manager = MqttManager::new(&test_config(), &[]);
        assert!(!manager.is_connected());
        // Must not panic or block; the message is dropped with a warning.
        manager.publish("sensors/reading", "[1]");
    }

    #[tokio::test]
    async fn test_subscription_topics_from_mappings() {
        let mappings = vec![
            CommandMapping {
                topic: "cmd/echo".into(),
                service: "org.example.Echo".into(),
                path: "/org/example/Echo".into(),
                interface: "org.example.Echo".into(),
                method: "Echo".into(),
            },
            CommandMapping {
                topic: "cmd/+/set".into(),
                service: "org.example.Control".into(),
                path: "/org/example/Control".into(),
                interface: "org.example.Control".into(),
                method: "Set".into(),
            },
        ];
        let manager = MqttManager::new(&test_config(), &mappings);
        assert_eq!(manager.topics, vec!["cmd/echo", "cmd/+/set"]);
    }
}
