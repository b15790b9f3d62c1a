// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! YAML configuration for the bridge.
//!
//! Covers the broker endpoint, the bus selection, and the two mapping
//! tables. Validation is fatal at load time; the bridge never starts on a
//! config it cannot fully honour.

use crate::topic;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Which message bus the bridge connects to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusType {
    System,
    #[default]
    Session,
}

/// MQTT broker connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    /// Broker hostname or IPv4 address.
    pub broker: String,

    /// Broker TCP port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Optional username/password authentication.
    #[serde(default)]
    pub auth: Option<MqttAuth>,
}

/// Broker credentials. Username and password go together or not at all.
#[derive(Debug, Clone, Deserialize)]
pub struct MqttAuth {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

fn default_port() -> u16 {
    1883
}

impl MqttConfig {
    /// Credentials when both halves are present.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        let auth = self.auth.as_ref()?;
        match (auth.username.as_deref(), auth.password.as_deref()) {
            (Some(u), Some(p)) => Some((u, p)),
            _ => None,
        }
    }
}

/// A D-Bus signal republished to an MQTT topic.
#[derive(Debug, Clone, Deserialize)]
pub struct SignalMapping {
    /// Well-known bus name of the emitting service.
    pub service: String,
    /// Object path the signal is emitted from.
    pub path: String,
    /// Interface the signal belongs to.
    pub interface: String,
    /// Signal member name.
    pub signal: String,
    /// MQTT topic the arguments are published to.
    pub topic: String,
}

/// An MQTT topic dispatched as a D-Bus method call.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandMapping {
    /// MQTT topic filter subscribed to.
    pub topic: String,
    /// Well-known bus name of the target service.
    pub service: String,
    /// Object path of the target object.
    pub path: String,
    /// Interface the method belongs to.
    pub interface: String,
    /// Method member name.
    pub method: String,
}

/// The two mapping tables.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MappingsConfig {
    #[serde(default)]
    pub dbus_to_mqtt: Vec<SignalMapping>,
    #[serde(default)]
    pub mqtt_to_dbus: Vec<CommandMapping>,
}

/// Top-level bridge configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    /// Broker connection settings.
    pub mqtt: MqttConfig,

    /// System or session bus.
    #[serde(default)]
    pub bus_type: BusType,

    /// Signal and command mapping tables.
    #[serde(default)]
    pub mappings: MappingsConfig,
}

impl BridgeConfig {
    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_valid_hostname(&self.mqtt.broker) && !is_valid_ipv4(&self.mqtt.broker) {
            return Err(ConfigError::Invalid(format!(
                "mqtt.broker '{}' is not a valid hostname or IPv4 address",
                self.mqtt.broker
            )));
        }
        if self.mqtt.port == 0 {
            return Err(ConfigError::Invalid("mqtt.port must be 1-65535".into()));
        }

        if let Some(auth) = &self.mqtt.auth {
            if auth.username.is_some() != auth.password.is_some() {
                return Err(ConfigError::Invalid(
                    "mqtt.auth requires username and password together".into(),
                ));
            }
        }

        if self.mappings.dbus_to_mqtt.is_empty() && self.mappings.mqtt_to_dbus.is_empty() {
            return Err(ConfigError::Invalid("no mappings configured".into()));
        }

        for (i, m) in self.mappings.dbus_to_mqtt.iter().enumerate() {
            let where_ = |field: &str| format!("mappings.dbus_to_mqtt[{}].{}", i, field);
            if !is_valid_bus_name(&m.service) {
                return Err(ConfigError::Invalid(format!(
                    "{} '{}' is not a valid service name",
                    where_("service"),
                    m.service
                )));
            }
            if !is_valid_object_path(&m.path) {
                return Err(ConfigError::Invalid(format!(
                    "{} '{}' is not a valid object path",
                    where_("path"),
                    m.path
                )));
            }
            if !is_valid_bus_name(&m.interface) {
                return Err(ConfigError::Invalid(format!(
                    "{} '{}' is not a valid interface name",
                    where_("interface"),
                    m.interface
                )));
            }
            if !is_valid_member_name(&m.signal) {
                return Err(ConfigError::Invalid(format!(
                    "{} '{}' is not a valid signal name",
                    where_("signal"),
                    m.signal
                )));
            }
            if !topic::is_valid_publish_topic(&m.topic) {
                return Err(ConfigError::Invalid(format!(
                    "{} '{}' is not a valid publish topic (wildcards not allowed)",
                    where_("topic"),
                    m.topic
                )));
            }
        }

        for (i, m) in self.mappings.mqtt_to_dbus.iter().enumerate() {
            let where_ = |field: &str| format!("mappings.mqtt_to_dbus[{}].{}", i, field);
            if !topic::is_valid_subscribe_topic(&m.topic) {
                return Err(ConfigError::Invalid(format!(
                    "{} '{}' is not a valid subscribe topic",
                    where_("topic"),
                    m.topic
                )));
            }
            if !is_valid_bus_name(&m.service) {
                return Err(ConfigError::Invalid(format!(
                    "{} '{}' is not a valid service name",
                    where_("service"),
                    m.service
                )));
            }
            if !is_valid_object_path(&m.path) {
                return Err(ConfigError::Invalid(format!(
                    "{} '{}' is not a valid object path",
                    where_("path"),
                    m.path
                )));
            }
            if !is_valid_bus_name(&m.interface) {
                return Err(ConfigError::Invalid(format!(
                    "{} '{}' is not a valid interface name",
                    where_("interface"),
                    m.interface
                )));
            }
            if !is_valid_member_name(&m.method) {
                return Err(ConfigError::Invalid(format!(
                    "{} '{}' is not a valid method name",
                    where_("method"),
                    m.method
                )));
            }
        }

        Ok(())
    }
}

/// Candidate config locations, highest priority first.
pub fn default_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(home) = std::env::var_os("HOME") {
        paths.push(
            PathBuf::from(home)
                .join(".config")
                .join("dbus-mqtt-bridge")
                .join("config.yaml"),
        );
    }
    paths.push(PathBuf::from("/etc/dbus-mqtt-bridge/config.yaml"));
    paths.push(PathBuf::from("config.yaml"));
    paths
}

/// Locate a config file on the default search path.
pub fn find_config_file() -> Option<PathBuf> {
    default_search_paths().into_iter().find(|p| p.exists())
}

/// Hostname per RFC 1123: dot-separated labels of at most 63 characters,
/// alphanumeric with inner hyphens.
fn is_valid_hostname(name: &str) -> bool {
    if name.is_empty() || name.len() > 253 {
        return false;
    }
    name.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}

/// Dotted-quad IPv4 with each octet in 0-255.
fn is_valid_ipv4(addr: &str) -> bool {
    let octets: Vec<&str> = addr.split('.').collect();
    octets.len() == 4
        && octets.iter().all(|o| {
            !o.is_empty()
                && o.len() <= 3
                && o.chars().all(|c| c.is_ascii_digit())
                && o.parse::<u16>().map(|v| v <= 255).unwrap_or(false)
        })
}

fn is_valid_name_element(element: &str) -> bool {
    let mut chars = element.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Service and interface names: at least two dot-separated elements, each
/// starting with a letter or underscore.
fn is_valid_bus_name(name: &str) -> bool {
    if name.is_empty() || name.len() > 255 || !name.contains('.') {
        return false;
    }
    name.split('.').all(is_valid_name_element)
}

/// Object paths: `/` or `(/[A-Za-z0-9_]+)+`.
fn is_valid_object_path(path: &str) -> bool {
    if path == "/" {
        return true;
    }
    if !path.starts_with('/') || path.ends_with('/') {
        return false;
    }
    path[1..]
        .split('/')
        .all(|el| !el.is_empty() && el.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'))
}

/// Member (signal/method) names.
fn is_valid_member_name(name: &str) -> bool {
    !name.is_empty() && name.len() <= 255 && is_valid_name_element(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL_YAML: &str = r#"
mqtt:
  broker: localhost
mappings:
  dbus_to_mqtt:
    - service: org.example.Sensor
      path: /org/example/Sensor
      interface: org.example.Sensor
      signal: Reading
      topic: sensors/reading
"#;

    const FULL_YAML: &str = r#"
mqtt:
  broker: broker.example.com
  port: 8883
  auth:
    username: bridge
    password: secret
bus_type: system
mappings:
  dbus_to_mqtt:
    - service: org.example.Sensor
      path: /org/example/Sensor
      interface: org.example.Sensor
      signal: Reading
      topic: sensors/reading
  mqtt_to_dbus:
    - topic: cmd/echo
      service: org.example.Echo
      path: /org/example/Echo
      interface: org.example.Echo
      method: Echo
    - topic: cmd/+/set
      service: org.example.Control
      path: /org/example/Control
      interface: org.example.Control
      method: Set
"#;

    #[test]
    fn test_config_parse_minimal() {
        let config = BridgeConfig::from_yaml(MINIMAL_YAML).expect("parse minimal yaml");

        assert_eq!(config.mqtt.broker, "localhost");
        assert_eq!(config.mqtt.port, 1883);
        assert!(config.mqtt.auth.is_none());
        assert_eq!(config.bus_type, BusType::Session);
        assert_eq!(config.mappings.dbus_to_mqtt.len(), 1);
        assert!(config.mappings.mqtt_to_dbus.is_empty());
    }

    #[test]
    fn test_config_parse_full() {
        let config = BridgeConfig::from_yaml(FULL_YAML).expect("parse full yaml");

        assert_eq!(config.mqtt.broker, "broker.example.com");
        assert_eq!(config.mqtt.port, 8883);
        assert_eq!(config.mqtt.credentials(), Some(("bridge", "secret")));
        assert_eq!(config.bus_type, BusType::System);
        assert_eq!(config.mappings.mqtt_to_dbus.len(), 2);
        assert_eq!(config.mappings.mqtt_to_dbus[1].topic, "cmd/+/set");
    }

    fn base_config() -> BridgeConfig {
        BridgeConfig::from_yaml(FULL_YAML).expect("parse full yaml")
    }

    #[test]
    fn test_validate_broker() {
        let mut config = base_config();
        config.mqtt.broker = "".into();
        assert!(config.validate().is_err());

        config.mqtt.broker = "256.1.1.1".into();
        assert!(config.validate().is_err());

        config.mqtt.broker = "192.168.1.10".into();
        assert!(config.validate().is_ok());

        config.mqtt.broker = "-bad-.example".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_port() {
        let mut config = base_config();
        config.mqtt.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_credentials_pairing() {
        let mut config = base_config();
        config.mqtt.auth = Some(MqttAuth {
            username: Some("bridge".into()),
            password: None,
        });
        assert!(config.validate().is_err());

        config.mqtt.auth = Some(MqttAuth {
            username: None,
            password: Some("secret".into()),
        });
        assert!(config.validate().is_err());

        config.mqtt.auth = None;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_requires_mappings() {
        let mut config = base_config();
        config.mappings.dbus_to_mqtt.clear();
        config.mappings.mqtt_to_dbus.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_publish_topic_rejects_wildcards() {
        let mut config = base_config();
        config.mappings.dbus_to_mqtt[0].topic = "sensors/+/reading".into();
        assert!(config.validate().is_err());

        config.mappings.dbus_to_mqtt[0].topic = "sensors/#".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_subscribe_topic() {
        let mut config = base_config();
        config.mappings.mqtt_to_dbus[0].topic = "cmd/#/echo".into();
        assert!(config.validate().is_err());

        config.mappings.mqtt_to_dbus[0].topic = "cmd/#".into();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_bus_names() {
        let mut config = base_config();
        config.mappings.dbus_to_mqtt[0].service = "nodots".into();
        assert!(config.validate().is_err());

        config.mappings.dbus_to_mqtt[0].service = "org..Example".into();
        assert!(config.validate().is_err());

        config.mappings.dbus_to_mqtt[0].service = "org.7example.X".into();
        assert!(config.validate().is_err());

        config.mappings.dbus_to_mqtt[0].service = "org._example.X".into();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_object_path() {
        let mut config = base_config();
        config.mappings.dbus_to_mqtt[0].path = "relative/path".into();
        assert!(config.validate().is_err());

        config.mappings.dbus_to_mqtt[0].path = "/trailing/".into();
        assert!(config.validate().is_err());

        config.mappings.dbus_to_mqtt[0].path = "/double//slash".into();
        assert!(config.validate().is_err());

        config.mappings.dbus_to_mqtt[0].path = "/".into();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_member_name() {
        let mut config = base_config();
        config.mappings.dbus_to_mqtt[0].signal = "9Bad".into();
        assert!(config.validate().is_err());

        config.mappings.dbus_to_mqtt[0].signal = "Name.WithDot".into();
        assert!(config.validate().is_err());

        config.mappings.dbus_to_mqtt[0].signal = "Reading_2".into();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_search_path_order() {
        let paths = default_search_paths();
        // System path precedes the working directory fallback; the user path
        // leads when HOME is set.
        let n = paths.len();
        assert!(n >= 2);
        assert_eq!(paths[n - 2], PathBuf::from("/etc/dbus-mqtt-bridge/config.yaml"));
        assert_eq!(paths[n - 1], PathBuf::from("config.yaml"));
        if n == 3 {
            assert!(paths[0].ends_with(".config/dbus-mqtt-bridge/config.yaml"));
        }
    }

    #[test]
    fn test_missing_mqtt_section_fails() {
        let err = BridgeConfig::from_yaml("bus_type: session\n");
        assert!(err.is_err());
    }
}
