//! Error taxonomy surfaced on event streams
//!
//! Every variant is `Clone` because a single failure is multicast to all
//! subscribers of the stream it is routed to.

use crate::types::{DeviceId, ManagerState};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Failure reported by the hardware layer alongside a completion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareError {
    /// Platform error domain (e.g. "CBATTErrorDomain")
    pub domain: String,
    pub code: i64,
    pub message: String,
}

impl HardwareError {
    pub fn new(domain: impl Into<String>, code: i64, message: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for HardwareError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.domain, self.code, self.message)
    }
}

impl std::error::Error for HardwareError {}

/// Renders the optional hardware cause for the `#[error]` strings below
struct Cause<'a>(&'a Option<HardwareError>);

impl fmt::Display for Cause<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(err) => write!(f, ": {}", err),
            None => Ok(()),
        }
    }
}

/// Errors delivered as the terminal signal of an operation's stream
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GattError {
    #[error("Connection to {device} failed{}", Cause(.cause))]
    ConnectionFailed {
        device: DeviceId,
        cause: Option<HardwareError>,
    },

    #[error("Disconnect from {device} failed{}", Cause(.cause))]
    DisconnectFailed {
        device: DeviceId,
        cause: Option<HardwareError>,
    },

    #[error("Service discovery failed{}", Cause(.0))]
    ServiceDiscoveryFailed(Option<HardwareError>),

    #[error("Included service discovery failed{}", Cause(.0))]
    IncludedServiceDiscoveryFailed(Option<HardwareError>),

    #[error("Characteristic discovery failed{}", Cause(.0))]
    CharacteristicDiscoveryFailed(Option<HardwareError>),

    #[error("Descriptor discovery failed{}", Cause(.0))]
    DescriptorDiscoveryFailed(Option<HardwareError>),

    #[error("Write rejected: no data to write")]
    WriteDataMissing,

    #[error("Write failed{}", Cause(.0))]
    WriteFailed(Option<HardwareError>),

    #[error("Read failed{}", Cause(.0))]
    ReadFailed(Option<HardwareError>),

    #[error("Notification state change failed{}", Cause(.0))]
    NotifyStateChangeFailed(Option<HardwareError>),

    #[error("Peripheral {device} disconnected with the operation in flight{}", Cause(.cause))]
    PeripheralDisconnected {
        device: DeviceId,
        cause: Option<HardwareError>,
    },

    #[error("Adapter unavailable: {0}")]
    AdapterUnavailable(ManagerState),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl GattError {
    /// Underlying hardware failure, when the platform supplied one
    pub fn hardware_error(&self) -> Option<&HardwareError> {
        match self {
            Self::ConnectionFailed { cause, .. }
            | Self::DisconnectFailed { cause, .. }
            | Self::PeripheralDisconnected { cause, .. } => cause.as_ref(),
            Self::ServiceDiscoveryFailed(cause)
            | Self::IncludedServiceDiscoveryFailed(cause)
            | Self::CharacteristicDiscoveryFailed(cause)
            | Self::DescriptorDiscoveryFailed(cause)
            | Self::WriteFailed(cause)
            | Self::ReadFailed(cause)
            | Self::NotifyStateChangeFailed(cause) => cause.as_ref(),
            Self::WriteDataMissing | Self::AdapterUnavailable(_) | Self::InvalidConfig(_) => None,
        }
    }
}
