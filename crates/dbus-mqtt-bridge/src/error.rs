// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bridge errors.

use thiserror::Error;

/// Errors surfaced by the bridge core.
///
/// Broker connect and publish failures are handled inside the MQTT
/// manager's reconnect loop and never propagate; they are logged where they
/// occur.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("D-Bus connection failed: {0}")]
    BusConnect(#[source] zbus::Error),

    #[error("Service not available: {0}")]
    ServiceUnavailable(String),

    #[error("D-Bus error: {0}")]
    Bus(#[from] zbus::Error),

    #[error("D-Bus error: {0}")]
    Fdo(#[from] zbus::fdo::Error),

    #[error("Payload parse error: {0}")]
    PayloadParse(#[from] serde_json::Error),
}
