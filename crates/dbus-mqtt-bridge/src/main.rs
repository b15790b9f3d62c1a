// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! dbus-mqtt-bridge CLI
//!
//! Bidirectional bridge between D-Bus and an MQTT broker.
//!
//! # Usage
//!
//! ```bash
//! # Run with an explicit config file
//! dbus-mqtt-bridge config.yaml
//!
//! # Run with the default search path
//! # (~/.config/dbus-mqtt-bridge/config.yaml, /etc/dbus-mqtt-bridge/config.yaml,
//! #  ./config.yaml)
//! dbus-mqtt-bridge
//!
//! # Generate an example configuration file
//! dbus-mqtt-bridge gen-config --output config.yaml
//!
//! # Validate a configuration file
//! dbus-mqtt-bridge validate --config config.yaml
//! ```

use clap::{Parser, Subcommand};
use dbus_mqtt_bridge::{Bridge, BridgeConfig};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Bidirectional D-Bus / MQTT bridge
#[derive(Parser, Debug)]
#[command(name = "dbus-mqtt-bridge")]
#[command(about = "Bidirectional bridge between D-Bus and MQTT")]
#[command(version)]
struct Args {
    /// Configuration file path (searched for when omitted)
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate an example configuration file
    GenConfig {
        /// Output file path
        #[arg(short, long, default_value = "config.yaml")]
        output: PathBuf,
    },

    /// Validate a configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if let Some(cmd) = args.command {
        return match cmd {
            Commands::GenConfig { output } => cmd_gen_config(output),
            Commands::Validate { config } => cmd_validate(config),
        };
    }

    let config_path = match args.config.or_else(dbus_mqtt_bridge::config::find_config_file) {
        Some(path) => path,
        None => {
            eprintln!("No configuration file found.");
            eprintln!("Searched:");
            for path in dbus_mqtt_bridge::config::default_search_paths() {
                eprintln!("  {}", path.display());
            }
            eprintln!("Run 'dbus-mqtt-bridge gen-config' to create one.");
            std::process::exit(1);
        }
    };

    tracing::info!("Loading configuration from {}", config_path.display());
    let config = match BridgeConfig::from_file(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    tracing::info!(
        "Bridging {} signal mapping(s) and {} command mapping(s) via {}:{}",
        config.mappings.dbus_to_mqtt.len(),
        config.mappings.mqtt_to_dbus.len(),
        config.mqtt.broker,
        config.mqtt.port
    );

    let bridge = Bridge::new(&config).await?;
    bridge.start().await?;

    tracing::info!("Bridge is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down...");
    bridge.stop().await;

    Ok(())
}

const EXAMPLE_CONFIG: &str = r#"# dbus-mqtt-bridge configuration
# Generated by dbus-mqtt-bridge gen-config

mqtt:
  broker: localhost
  port: 1883
  # Username and password go together or not at all.
  # auth:
  #   username: bridge
  #   password: secret

# "session" or "system"
bus_type: session

mappings:
  # D-Bus signals republished to MQTT topics. Signal arguments are encoded
  # as a JSON array, one element per argument; byte blobs become
  # {"_type":"bytes","data":"<base64>"}.
  dbus_to_mqtt:
    - service: org.example.Sensor
      path: /org/example/Sensor
      interface: org.example.Sensor
      signal: Reading
      topic: sensors/reading

  # MQTT topics dispatched as D-Bus method calls. The payload is a JSON
  # array of arguments, or a single JSON value for one-argument methods.
  # Subscribe topics may use the + and # wildcards.
  mqtt_to_dbus:
    - topic: cmd/echo
      service: org.example.Echo
      path: /org/example/Echo
      interface: org.example.Echo
      method: Echo
"#;

fn cmd_gen_config(output: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    std::fs::write(&output, EXAMPLE_CONFIG)?;
    println!("Generated configuration file: {}", output.display());
    Ok(())
}

fn cmd_validate(config_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    match BridgeConfig::from_file(&config_path) {
        Ok(config) => {
            println!("Configuration valid!");
            println!();
            println!("Broker: {}:{}", config.mqtt.broker, config.mqtt.port);
            println!("Bus:    {:?}", config.bus_type);
            println!("Signal mappings:  {}", config.mappings.dbus_to_mqtt.len());
            for m in &config.mappings.dbus_to_mqtt {
                println!("  {}.{} -> {}", m.interface, m.signal, m.topic);
            }
            println!("Command mappings: {}", config.mappings.mqtt_to_dbus.len());
            for m in &config.mappings.mqtt_to_dbus {
                println!("  {} -> {}.{}", m.topic, m.interface, m.method);
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration invalid: {}", e);
            std::process::exit(1);
        }
    }
}
