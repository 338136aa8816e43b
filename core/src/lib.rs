// GattStream Core: BLE GATT client as subscribable event streams
#![allow(clippy::empty_line_after_doc_comments)]
//
// Every request to the radio returns a stream right away; every hardware
// completion is routed back to the one stream that asked for it.

pub mod central;
pub mod chunked;
pub mod config;
pub mod error;
pub mod hardware;
pub mod logging;
pub mod peripheral;
pub mod registry;
pub mod stream;
pub mod types;

pub use central::{CentralSession, DiscoveryEvent};
pub use chunked::{split_into_chunks, ChunkedWriteJob};
pub use config::{CentralConfig, ConfigError, ConnectOptions, ScanOptions};
pub use error::{GattError, HardwareError};
pub use hardware::{CentralEvent, CentralHardware, PeripheralEvent, PeripheralHardware};
pub use peripheral::{CharacteristicUpdate, PeripheralSession, ServiceUpdate};
pub use registry::{KeyedRegistry, Outcome};
pub use stream::{EventStream, StreamEvent, Subscription};
pub use types::{
    AdvertisementData, AttributeId, Characteristic, CharacteristicProperties, ConnectionState,
    Descriptor, DeviceId, ManagerState, Service, WriteType,
};
