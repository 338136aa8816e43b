//! Typed scan/connect configuration
//!
//! Replaces the platform's free-form option dictionaries with explicit
//! fields. Only recognized options exist; the hardware layer maps them onto
//! whatever its platform expects.

use crate::error::GattError;
use crate::types::AttributeId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during configuration validation
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Invalid connect start delay: {0}")]
    InvalidStartDelay(f64),

    #[error("Restore identifier must not be empty")]
    EmptyRestoreIdentifier,

    #[error("Malformed configuration: {0}")]
    Malformed(String),
}

impl From<ConfigError> for GattError {
    fn from(err: ConfigError) -> Self {
        GattError::InvalidConfig(err.to_string())
    }
}

/// Scan options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanOptions {
    /// Report every advertisement instead of coalescing repeats
    pub allow_duplicates: bool,
    /// Also match peripherals soliciting these services
    pub solicited_service_ids: Vec<AttributeId>,
}

impl ScanOptions {
    pub fn with_duplicates(mut self, allow: bool) -> Self {
        self.allow_duplicates = allow;
        self
    }

    pub fn with_solicited_services(mut self, ids: Vec<AttributeId>) -> Self {
        self.solicited_service_ids = ids;
        self
    }
}

/// Connect options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectOptions {
    /// Alert the user on connection while the app is suspended
    pub notify_on_connection: bool,
    /// Alert the user on disconnection while the app is suspended
    pub notify_on_disconnection: bool,
    /// Alert the user on notifications while the app is suspended
    pub notify_on_notification: bool,
    /// Bridge classic transports for dual-mode devices
    pub enable_transport_bridging: bool,
    /// Require Apple Notification Center Service
    pub requires_ancs: bool,
    /// Delay before connecting, in seconds
    pub start_delay_secs: Option<f64>,
}

impl ConnectOptions {
    pub fn with_start_delay(mut self, secs: f64) -> Self {
        self.start_delay_secs = Some(secs);
        self
    }

    pub fn with_disconnect_notification(mut self, notify: bool) -> Self {
        self.notify_on_disconnection = notify;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(delay) = self.start_delay_secs {
            if !delay.is_finite() || delay < 0.0 {
                return Err(ConfigError::InvalidStartDelay(delay));
            }
        }
        Ok(())
    }
}

/// Central session configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CentralConfig {
    /// Ask the platform to prompt when the radio is off
    pub show_power_alert: bool,
    /// State restoration key for background relaunch
    pub restore_identifier: Option<String>,
    /// Used by `scan` when the caller passes no options
    pub scan: ScanOptions,
    /// Used by `connect` when the caller passes no options
    pub connect: ConnectOptions,
}

impl Default for CentralConfig {
    fn default() -> Self {
        Self {
            show_power_alert: true,
            restore_identifier: None,
            scan: ScanOptions::default(),
            connect: ConnectOptions::default(),
        }
    }
}

impl CentralConfig {
    pub fn with_restore_identifier(mut self, id: impl Into<String>) -> Self {
        self.restore_identifier = Some(id.into());
        self
    }

    pub fn with_scan_options(mut self, scan: ScanOptions) -> Self {
        self.scan = scan;
        self
    }

    pub fn with_connect_options(mut self, connect: ConnectOptions) -> Self {
        self.connect = connect;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(id) = &self.restore_identifier {
            if id.trim().is_empty() {
                return Err(ConfigError::EmptyRestoreIdentifier);
            }
        }
        self.connect.validate()
    }

    /// Parse and validate a JSON document; absent fields take defaults
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Malformed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::Malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = CentralConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.show_power_alert);
        assert!(!config.scan.allow_duplicates);
    }

    #[test]
    fn test_negative_start_delay_rejected() {
        let config = CentralConfig::default()
            .with_connect_options(ConnectOptions::default().with_start_delay(-1.0));
        assert_eq!(config.validate(), Err(ConfigError::InvalidStartDelay(-1.0)));

        let nan = ConnectOptions::default().with_start_delay(f64::NAN);
        assert!(nan.validate().is_err());
    }

    #[test]
    fn test_empty_restore_identifier_rejected() {
        let config = CentralConfig::default().with_restore_identifier("  ");
        assert_eq!(config.validate(), Err(ConfigError::EmptyRestoreIdentifier));
    }

    #[test]
    fn test_json_partial_document() {
        let config = CentralConfig::from_json(
            r#"{ "show_power_alert": false, "scan": { "allow_duplicates": true } }"#,
        )
        .expect("valid config");

        assert!(!config.show_power_alert);
        assert!(config.scan.allow_duplicates);
        assert!(config.scan.solicited_service_ids.is_empty());
        assert_eq!(config.connect, ConnectOptions::default());
    }

    #[test]
    fn test_json_roundtrip() {
        let config = CentralConfig::default()
            .with_restore_identifier("gattstream.central")
            .with_scan_options(
                ScanOptions::default()
                    .with_solicited_services(vec![AttributeId::from_short(0x180F)]),
            );

        let json = config.to_json().expect("serializes");
        let parsed = CentralConfig::from_json(&json).expect("parses");
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_malformed_json() {
        let result = CentralConfig::from_json("{ not json");
        assert!(matches!(result, Err(ConfigError::Malformed(_))));
    }

    #[test]
    fn test_invalid_json_values_rejected() {
        let result = CentralConfig::from_json(r#"{ "connect": { "start_delay_secs": -3.5 } }"#);
        assert_eq!(result, Err(ConfigError::InvalidStartDelay(-3.5)));
    }
}
