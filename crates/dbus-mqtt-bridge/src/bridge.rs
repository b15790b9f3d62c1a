// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The bridge core: one D-Bus manager, one MQTT manager, and the
//! translation glue between them.
//!
//! Signal direction: each matched signal's arguments are marshalled into a
//! JSON array and published to the mapping's topic. Command direction: each
//! inbound MQTT message is matched against the command table, its payload
//! parsed as JSON (array = argument list, anything else = single argument),
//! and dispatched as a method call. A bad payload or an absent service is
//! logged and never takes the bridge down.

use crate::config::{BridgeConfig, CommandMapping, SignalMapping};
use crate::dbus::DbusManager;
use crate::error::BridgeError;
use crate::marshal::{bus_to_json, json_to_bus};
use crate::mqtt::MqttManager;
use crate::topic::topic_filter_match;
use crate::value::BusValue;
use std::sync::Arc;

/// Bidirectional D-Bus / MQTT bridge.
pub struct Bridge {
    dbus: Arc<DbusManager>,
    mqtt: Arc<MqttManager>,
    commands: Arc<Vec<CommandMapping>>,
}

impl Bridge {
    /// Create both managers. Opens the bus connection; fatal on failure.
    pub async fn new(config: &BridgeConfig) -> Result<Self, BridgeError> {
        let dbus = DbusManager::new(config.mappings.dbus_to_mqtt.clone(), config.bus_type).await?;
        let mqtt = MqttManager::new(&config.mqtt, &config.mappings.mqtt_to_dbus);

        Ok(Self {
            dbus: Arc::new(dbus),
            mqtt: Arc::new(mqtt),
            commands: Arc::new(config.mappings.mqtt_to_dbus.clone()),
        })
    }

    /// Wire both callbacks, then start both managers.
    pub async fn start(&self) -> Result<(), BridgeError> {
        // Signal direction: marshal the argument list and publish. The
        // publish call handles the disconnected case itself.
        let mqtt = self.mqtt.clone();
        self.dbus.set_signal_callback(Arc::new(move |mapping: &SignalMapping, values: Vec<BusValue>| {
            let payload = values_to_payload(&values);
            tracing::debug!(
                "Signal {}.{} -> topic '{}': {}",
                mapping.interface,
                mapping.signal,
                mapping.topic,
                payload
            );
            mqtt.publish(&mapping.topic, &payload);
        }));

        // Command direction: dispatch off the MQTT event loop so a slow
        // method call cannot stall broker traffic.
        let dbus = self.dbus.clone();
        let commands = self.commands.clone();
        self.mqtt.set_message_callback(Arc::new(move |topic: &str, payload: &str| {
            let Some(mapping) = find_command(&commands, topic) else {
                tracing::debug!("No command mapping for topic '{}'", topic);
                return;
            };
            let mapping = mapping.clone();
            let dbus = dbus.clone();
            let payload = payload.to_string();
            tokio::spawn(async move {
                dispatch_command(&dbus, &mapping, &payload).await;
            });
        }));

        self.mqtt.connect();
        self.dbus.start().await?;
        Ok(())
    }

    /// Shut the broker connection down. The bus connection is released when
    /// the bridge is dropped.
    pub async fn stop(&self) {
        self.mqtt.disconnect().await;
    }
}

/// Find the command mapping for a delivered topic.
///
/// An exact match in configuration order wins; failing that, the concrete
/// topic is matched against wildcard filters, again in configuration order.
fn find_command<'a>(mappings: &'a [CommandMapping], topic: &str) -> Option<&'a CommandMapping> {
    mappings
        .iter()
        .find(|m| m.topic == topic)
        .or_else(|| mappings.iter().find(|m| topic_filter_match(&m.topic, topic)))
}

/// Serialize an argument list into the outbound JSON-array payload.
fn values_to_payload(values: &[BusValue]) -> String {
    serde_json::Value::Array(values.iter().map(bus_to_json).collect()).to_string()
}

/// Parse an inbound payload into a method argument list.
///
/// A JSON array maps element-wise; any other JSON value becomes a single
/// argument.
fn payload_to_args(payload: &str) -> Result<Vec<BusValue>, BridgeError> {
    let json: serde_json::Value = serde_json::from_str(payload)?;
    Ok(match json {
        serde_json::Value::Array(items) => items.iter().map(json_to_bus).collect(),
        other => vec![json_to_bus(&other)],
    })
}

async fn dispatch_command(dbus: &DbusManager, mapping: &CommandMapping, payload: &str) {
    let args = match payload_to_args(payload) {
        Ok(args) => args,
        Err(e) => {
            tracing::error!("Dropping message on topic '{}': {}", mapping.topic, e);
            return;
        }
    };

    match dbus
        .call_method(
            &mapping.service,
            &mapping.path,
            &mapping.interface,
            &mapping.method,
            &args,
        )
        .await
    {
        Ok(values) => {
            let reply = values_to_payload(&values);
            tracing::info!(
                "Method call {}.{} returned: {}",
                mapping.interface,
                mapping.method,
                reply
            );
        }
        Err(e) => {
            tracing::error!(
                "Method call {}.{} for topic '{}' failed: {}",
                mapping.interface,
                mapping.method,
                mapping.topic,
                e
            );
        }
    }
}
