// Hardware collaborator contract
//
// The radio stack is driven through imperative "start operation" calls
// that return immediately. Results come back later, once each, as
// CentralEvent / PeripheralEvent values fed into the owning session's
// handle_event on the platform's single delivery context.
//
// Platform code (CoreBluetooth, BlueZ, Android bindings) implements the two
// traits and forwards its delegate callbacks as events.

use crate::config::{CentralConfig, ConnectOptions, ScanOptions};
use crate::error::HardwareError;
use crate::types::{
    AdvertisementData, AttributeId, Characteristic, ConnectionState, DeviceId, ManagerState,
    Service, WriteType,
};
use std::sync::Arc;

// ============================================================================
// OUTBOUND CALLS
// ============================================================================

/// Adapter-level operations
#[cfg_attr(test, mockall::automock)]
pub trait CentralHardware: Send + Sync {
    /// Adapter-level settings (power alert, restore identifier), applied
    /// once when the session is created and before any other call
    fn configure(&self, config: &CentralConfig);

    /// Start scanning; `None` means every advertising device
    fn scan_for_peripherals(&self, service_ids: Option<Vec<AttributeId>>, options: &ScanOptions);

    fn stop_scan(&self);

    fn is_scanning(&self) -> bool;

    fn connect(&self, device: DeviceId, options: &ConnectOptions);

    fn cancel_connection(&self, device: DeviceId);

    /// Platform handle for a device seen by this adapter
    fn peripheral(&self, device: DeviceId) -> Arc<dyn PeripheralHardware>;
}

/// Per-device GATT operations
#[cfg_attr(test, mockall::automock)]
pub trait PeripheralHardware: Send + Sync {
    fn id(&self) -> DeviceId;

    fn name(&self) -> Option<String>;

    fn connection_state(&self) -> ConnectionState;

    fn discover_services(&self, service_ids: Option<Vec<AttributeId>>);

    fn discover_included_services(&self, service_ids: Option<Vec<AttributeId>>, service: &Service);

    fn discover_characteristics(
        &self,
        characteristic_ids: Option<Vec<AttributeId>>,
        service: &Service,
    );

    fn discover_descriptors(&self, characteristic: &Characteristic);

    /// Write one chunk, already sized to fit a single transport write
    fn write_value(&self, chunk: &[u8], characteristic: &Characteristic, mode: WriteType);

    fn read_value(&self, characteristic: &Characteristic);

    fn set_notify_value(&self, enabled: bool, characteristic: &Characteristic);

    /// Largest payload a single write of `mode` may carry
    fn maximum_write_value_length(&self, mode: WriteType) -> usize;
}

// ============================================================================
// INBOUND CALLBACKS
// ============================================================================

/// Callbacks about the adapter and connections
#[derive(Debug, Clone, PartialEq)]
pub enum CentralEvent {
    StateChanged(ManagerState),
    PeripheralDiscovered {
        device: DeviceId,
        advertisement: AdvertisementData,
        rssi: i16,
    },
    PeripheralConnected {
        device: DeviceId,
    },
    PeripheralConnectFailed {
        device: DeviceId,
        error: Option<HardwareError>,
    },
    PeripheralDisconnected {
        device: DeviceId,
        error: Option<HardwareError>,
    },
}

/// Callbacks about one peripheral's attributes.
///
/// Each carries the attribute the request was made for, populated with
/// whatever the hardware discovered, so the session can correlate it.
#[derive(Debug, Clone, PartialEq)]
pub enum PeripheralEvent {
    ServicesDiscovered {
        services: Vec<Service>,
        error: Option<HardwareError>,
    },
    IncludedServicesDiscovered {
        service: Service,
        error: Option<HardwareError>,
    },
    CharacteristicsDiscovered {
        service: Service,
        error: Option<HardwareError>,
    },
    DescriptorsDiscovered {
        characteristic: Characteristic,
        error: Option<HardwareError>,
    },
    CharacteristicValueWritten {
        characteristic: Characteristic,
        error: Option<HardwareError>,
    },
    /// Read response or notification; `characteristic.is_notifying`
    /// tells them apart
    CharacteristicValueUpdated {
        characteristic: Characteristic,
        error: Option<HardwareError>,
    },
    NotificationStateChanged {
        characteristic: Characteristic,
        error: Option<HardwareError>,
    },
}

impl PeripheralEvent {
    /// Short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ServicesDiscovered { .. } => "services-discovered",
            Self::IncludedServicesDiscovered { .. } => "included-services-discovered",
            Self::CharacteristicsDiscovered { .. } => "characteristics-discovered",
            Self::DescriptorsDiscovered { .. } => "descriptors-discovered",
            Self::CharacteristicValueWritten { .. } => "value-written",
            Self::CharacteristicValueUpdated { .. } => "value-updated",
            Self::NotificationStateChanged { .. } => "notification-state-changed",
        }
    }
}
