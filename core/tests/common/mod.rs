// Shared test support: recording fakes for the hardware traits
//
// The fakes never call back on their own. Tests drive completions by
// feeding CentralEvent / PeripheralEvent values into the sessions, the way
// a platform delegate would.

#![allow(dead_code)]

use gattstream_core::{
    AdvertisementData, AttributeId, CentralConfig, Characteristic, CharacteristicProperties,
    CentralHardware, ConnectOptions, ConnectionState, DeviceId, PeripheralHardware, ScanOptions, Service,
    WriteType,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// One outbound call made on a fake peripheral
#[derive(Debug, Clone, PartialEq)]
pub enum PeripheralCall {
    DiscoverServices(Option<Vec<AttributeId>>),
    DiscoverIncludedServices(AttributeId),
    DiscoverCharacteristics(AttributeId),
    DiscoverDescriptors(AttributeId),
    Write {
        characteristic: AttributeId,
        chunk: Vec<u8>,
        mode: WriteType,
    },
    Read(AttributeId),
    SetNotify {
        characteristic: AttributeId,
        enabled: bool,
    },
}

pub struct FakePeripheral {
    id: DeviceId,
    name: Option<String>,
    max_write: Mutex<usize>,
    connection_state: Mutex<ConnectionState>,
    calls: Mutex<Vec<PeripheralCall>>,
}

impl FakePeripheral {
    pub fn new(max_write: usize) -> Arc<Self> {
        Arc::new(Self {
            id: DeviceId::random(),
            name: Some("Test Sensor".to_string()),
            max_write: Mutex::new(max_write),
            connection_state: Mutex::new(ConnectionState::Disconnected),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn with_id(id: DeviceId) -> Arc<Self> {
        Arc::new(Self {
            id,
            name: None,
            max_write: Mutex::new(20),
            connection_state: Mutex::new(ConnectionState::Disconnected),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn set_connection_state(&self, state: ConnectionState) {
        *self.connection_state.lock() = state;
    }

    pub fn calls(&self) -> Vec<PeripheralCall> {
        self.calls.lock().clone()
    }

    /// Chunks written so far, in order
    pub fn written_chunks(&self) -> Vec<Vec<u8>> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                PeripheralCall::Write { chunk, .. } => Some(chunk.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, matches: impl Fn(&PeripheralCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| matches(*c)).count()
    }

    fn record(&self, call: PeripheralCall) {
        self.calls.lock().push(call);
    }
}

impl PeripheralHardware for FakePeripheral {
    fn id(&self) -> DeviceId {
        self.id
    }

    fn name(&self) -> Option<String> {
        self.name.clone()
    }

    fn connection_state(&self) -> ConnectionState {
        *self.connection_state.lock()
    }

    fn discover_services(&self, service_ids: Option<Vec<AttributeId>>) {
        self.record(PeripheralCall::DiscoverServices(service_ids));
    }

    fn discover_included_services(&self, _service_ids: Option<Vec<AttributeId>>, service: &Service) {
        self.record(PeripheralCall::DiscoverIncludedServices(service.id));
    }

    fn discover_characteristics(
        &self,
        _characteristic_ids: Option<Vec<AttributeId>>,
        service: &Service,
    ) {
        self.record(PeripheralCall::DiscoverCharacteristics(service.id));
    }

    fn discover_descriptors(&self, characteristic: &Characteristic) {
        self.record(PeripheralCall::DiscoverDescriptors(characteristic.id));
    }

    fn write_value(&self, chunk: &[u8], characteristic: &Characteristic, mode: WriteType) {
        self.record(PeripheralCall::Write {
            characteristic: characteristic.id,
            chunk: chunk.to_vec(),
            mode,
        });
    }

    fn read_value(&self, characteristic: &Characteristic) {
        self.record(PeripheralCall::Read(characteristic.id));
    }

    fn set_notify_value(&self, enabled: bool, characteristic: &Characteristic) {
        self.record(PeripheralCall::SetNotify {
            characteristic: characteristic.id,
            enabled,
        });
    }

    fn maximum_write_value_length(&self, _mode: WriteType) -> usize {
        *self.max_write.lock()
    }
}

/// One outbound call made on the fake adapter
#[derive(Debug, Clone, PartialEq)]
pub enum CentralCall {
    Scan {
        service_ids: Option<Vec<AttributeId>>,
        allow_duplicates: bool,
    },
    StopScan,
    Connect(DeviceId),
    CancelConnection(DeviceId),
}

#[derive(Default)]
pub struct FakeCentral {
    configured: Mutex<Vec<CentralConfig>>,
    scanning: Mutex<bool>,
    calls: Mutex<Vec<CentralCall>>,
    peripherals: Mutex<HashMap<DeviceId, Arc<FakePeripheral>>>,
}

impl FakeCentral {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a fake peripheral so the adapter can hand it out
    pub fn add_peripheral(&self, peripheral: Arc<FakePeripheral>) {
        self.peripherals.lock().insert(peripheral.id(), peripheral);
    }

    pub fn fake_peripheral(&self, device: DeviceId) -> Option<Arc<FakePeripheral>> {
        self.peripherals.lock().get(&device).cloned()
    }

    pub fn calls(&self) -> Vec<CentralCall> {
        self.calls.lock().clone()
    }

    /// Every configuration the session applied, in order
    pub fn configurations(&self) -> Vec<CentralConfig> {
        self.configured.lock().clone()
    }

    pub fn count(&self, matches: impl Fn(&CentralCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| matches(*c)).count()
    }
}

impl CentralHardware for FakeCentral {
    fn configure(&self, config: &CentralConfig) {
        self.configured.lock().push(config.clone());
    }

    fn scan_for_peripherals(&self, service_ids: Option<Vec<AttributeId>>, options: &ScanOptions) {
        *self.scanning.lock() = true;
        self.calls.lock().push(CentralCall::Scan {
            service_ids,
            allow_duplicates: options.allow_duplicates,
        });
    }

    fn stop_scan(&self) {
        *self.scanning.lock() = false;
        self.calls.lock().push(CentralCall::StopScan);
    }

    fn is_scanning(&self) -> bool {
        *self.scanning.lock()
    }

    fn connect(&self, device: DeviceId, _options: &ConnectOptions) {
        self.calls.lock().push(CentralCall::Connect(device));
    }

    fn cancel_connection(&self, device: DeviceId) {
        self.calls.lock().push(CentralCall::CancelConnection(device));
    }

    fn peripheral(&self, device: DeviceId) -> Arc<dyn PeripheralHardware> {
        self.peripherals
            .lock()
            .entry(device)
            .or_insert_with(|| FakePeripheral::with_id(device))
            .clone()
    }
}

// ============================================================================
// Attribute fixtures
// ============================================================================

pub fn battery_service() -> Service {
    Service::new(AttributeId::from_short(0x180F), true)
}

pub fn battery_level() -> Characteristic {
    Characteristic::new(
        AttributeId::from_short(0x2A19),
        AttributeId::from_short(0x180F),
        CharacteristicProperties::from_bits(
            CharacteristicProperties::READ | CharacteristicProperties::NOTIFY,
        ),
    )
}

pub fn control_point() -> Characteristic {
    Characteristic::new(
        AttributeId::from_short(0x2A9F),
        AttributeId::from_short(0x180F),
        CharacteristicProperties::from_bits(
            CharacteristicProperties::WRITE | CharacteristicProperties::WRITE_WITHOUT_RESPONSE,
        ),
    )
}

pub fn advertisement(name: &str) -> AdvertisementData {
    AdvertisementData {
        local_name: Some(name.to_string()),
        is_connectable: Some(true),
        ..Default::default()
    }
}
