// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! dbus-mqtt-bridge
//!
//! A long-running bidirectional bridge between D-Bus (session or system)
//! and an MQTT v3.1.1 broker, driven by a declarative mapping table.
//!
//! # Features
//!
//! - **Signal forwarding**: D-Bus signals republished as JSON arrays on
//!   MQTT topics
//! - **Command dispatch**: MQTT messages invoked as D-Bus method calls
//! - **Service tracking**: `NameOwnerChanged`-driven liveness; subscriptions
//!   survive services restarting
//! - **Durable broker link**: explicit reconnect loop with exponential
//!   backoff, resubscribe on every recovery
//!
//! # Quick Start
//!
//! ```bash
//! # Run with a config file
//! dbus-mqtt-bridge config.yaml
//!
//! # Generate a commented example configuration
//! dbus-mqtt-bridge gen-config --output config.yaml
//!
//! # Check a configuration without starting
//! dbus-mqtt-bridge validate --config config.yaml
//! ```
//!
//! # Configuration File
//!
//! ```yaml
//! mqtt:
//!   broker: localhost
//!   port: 1883
//! bus_type: session
//! mappings:
//!   dbus_to_mqtt:
//!     - service: org.example.Sensor
//!       path: /org/example/Sensor
//!       interface: org.example.Sensor
//!       signal: Reading
//!       topic: sensors/reading
//!   mqtt_to_dbus:
//!     - topic: cmd/echo
//!       service: org.example.Echo
//!       path: /org/example/Echo
//!       interface: org.example.Echo
//!       method: Echo
//! ```

pub mod bridge;
pub mod config;
pub mod dbus;
pub mod error;
pub mod marshal;
pub mod mqtt;
pub mod topic;
pub mod value;

pub use bridge::Bridge;
pub use config::{BridgeConfig, BusType, CommandMapping, ConfigError, SignalMapping};
pub use dbus::DbusManager;
pub use error::BridgeError;
pub use mqtt::MqttManager;
pub use value::BusValue;
