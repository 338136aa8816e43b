//! GATT data model shared by the central and peripheral sessions
//!
//! Identifiers are opaque UUID newtypes. Attribute identifiers are only
//! unique within their parent's scope (a characteristic id may repeat
//! across services), which is why the registries key on them per family.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Bluetooth SIG base UUID used to expand 16-bit short identifiers
const BLUETOOTH_BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_00805F9B34FB;

// ============================================================================
// IDENTIFIERS
// ============================================================================

/// Stable identity of a remote peripheral as seen by the local adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(Uuid);

impl DeviceId {
    pub fn new(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Random identifier, mostly useful for simulated hardware
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for DeviceId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a service, characteristic or descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AttributeId(Uuid);

impl AttributeId {
    pub fn new(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Expand a 16-bit SIG-assigned number (e.g. 0x180F battery service)
    pub fn from_short(short: u16) -> Self {
        Self(Uuid::from_u128(BLUETOOTH_BASE_UUID | ((short as u128) << 96)))
    }

    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// The 16-bit form, if this identifier sits on the SIG base UUID
    pub fn as_short(&self) -> Option<u16> {
        let value = self.0.as_u128();
        let mask = !(0xFFFF_u128 << 96);
        if value & mask == BLUETOOTH_BASE_UUID {
            Some((value >> 96) as u16)
        } else {
            None
        }
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for AttributeId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for AttributeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_short() {
            Some(short) => write!(f, "{:04X}", short),
            None => write!(f, "{}", self.0),
        }
    }
}

// ============================================================================
// STATE ENUMS
// ============================================================================

/// Power/authorization state of the local adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ManagerState {
    #[default]
    Unknown,
    Resetting,
    Unsupported,
    Unauthorized,
    PoweredOff,
    PoweredOn,
}

impl fmt::Display for ManagerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "Unknown"),
            Self::Resetting => write!(f, "Resetting"),
            Self::Unsupported => write!(f, "Unsupported"),
            Self::Unauthorized => write!(f, "Unauthorized"),
            Self::PoweredOff => write!(f, "PoweredOff"),
            Self::PoweredOn => write!(f, "PoweredOn"),
        }
    }
}

/// Link state of one peripheral, as reported by the hardware layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Write mode for characteristic writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WriteType {
    /// Acknowledged write; every chunk waits for a write callback
    WithResponse,
    /// Unacknowledged write; no per-chunk callback is delivered
    WithoutResponse,
}

impl fmt::Display for WriteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WithResponse => write!(f, "with-response"),
            Self::WithoutResponse => write!(f, "without-response"),
        }
    }
}

// ============================================================================
// ATTRIBUTES
// ============================================================================

/// Characteristic property bit flags (Core spec Vol 3, Part G, 3.3.1.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct CharacteristicProperties(u8);

impl CharacteristicProperties {
    pub const BROADCAST: u8 = 0x01;
    pub const READ: u8 = 0x02;
    pub const WRITE_WITHOUT_RESPONSE: u8 = 0x04;
    pub const WRITE: u8 = 0x08;
    pub const NOTIFY: u8 = 0x10;
    pub const INDICATE: u8 = 0x20;
    pub const AUTHENTICATED_SIGNED_WRITES: u8 = 0x40;
    pub const EXTENDED_PROPERTIES: u8 = 0x80;

    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn contains(&self, flag: u8) -> bool {
        self.0 & flag == flag
    }

    pub fn can_read(&self) -> bool {
        self.contains(Self::READ)
    }

    /// Whether a write of the given mode is permitted
    pub fn can_write(&self, mode: WriteType) -> bool {
        match mode {
            WriteType::WithResponse => self.contains(Self::WRITE),
            WriteType::WithoutResponse => self.contains(Self::WRITE_WITHOUT_RESPONSE),
        }
    }

    /// Notify or indicate
    pub fn can_subscribe(&self) -> bool {
        self.contains(Self::NOTIFY) || self.contains(Self::INDICATE)
    }
}

/// Metadata attached to a characteristic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    pub id: AttributeId,
    pub characteristic_id: AttributeId,
    pub value: Option<Vec<u8>>,
}

/// Addressable value within a service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Characteristic {
    pub id: AttributeId,
    /// Parent service
    pub service_id: AttributeId,
    pub properties: CharacteristicProperties,
    /// Last value read or notified
    pub value: Option<Vec<u8>>,
    pub descriptors: Vec<Descriptor>,
    pub is_notifying: bool,
}

impl Characteristic {
    pub fn new(id: AttributeId, service_id: AttributeId, properties: CharacteristicProperties) -> Self {
        Self {
            id,
            service_id,
            properties,
            value: None,
            descriptors: Vec::new(),
            is_notifying: false,
        }
    }
}

/// Logical grouping of characteristics on a peripheral
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: AttributeId,
    pub is_primary: bool,
    pub included_services: Vec<Service>,
    pub characteristics: Vec<Characteristic>,
}

impl Service {
    pub fn new(id: AttributeId, is_primary: bool) -> Self {
        Self {
            id,
            is_primary,
            included_services: Vec::new(),
            characteristics: Vec::new(),
        }
    }

    pub fn characteristic(&self, id: &AttributeId) -> Option<&Characteristic> {
        self.characteristics.iter().find(|c| c.id == *id)
    }

    pub(crate) fn characteristic_mut(&mut self, id: &AttributeId) -> Option<&mut Characteristic> {
        self.characteristics.iter_mut().find(|c| c.id == *id)
    }
}

// ============================================================================
// ADVERTISEMENT
// ============================================================================

/// Advertisement payload delivered alongside a discovery.
///
/// Decoding is done by the hardware layer; this struct only carries the
/// recognized fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvertisementData {
    pub local_name: Option<String>,
    pub manufacturer_data: Option<Vec<u8>>,
    pub service_data: HashMap<AttributeId, Vec<u8>>,
    pub service_ids: Vec<AttributeId>,
    pub tx_power_level: Option<i8>,
    pub is_connectable: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_uuid_roundtrip() {
        let battery = AttributeId::from_short(0x180F);
        assert_eq!(battery.as_short(), Some(0x180F));
        assert_eq!(
            battery.as_uuid().to_string(),
            "0000180f-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(battery.to_string(), "180F");
    }

    #[test]
    fn test_random_attribute_is_not_short() {
        let id = AttributeId::random();
        assert!(id.as_short().is_none());
        assert_eq!(id.to_string(), id.as_uuid().to_string());
    }

    #[test]
    fn test_characteristic_properties() {
        let props = CharacteristicProperties::from_bits(
            CharacteristicProperties::READ | CharacteristicProperties::NOTIFY,
        );
        assert!(props.can_read());
        assert!(props.can_subscribe());
        assert!(!props.can_write(WriteType::WithResponse));
        assert!(!props.can_write(WriteType::WithoutResponse));

        let writable = CharacteristicProperties::from_bits(CharacteristicProperties::WRITE);
        assert!(writable.can_write(WriteType::WithResponse));
        assert!(!writable.can_subscribe());
    }

    #[test]
    fn test_default_states() {
        assert_eq!(ManagerState::default(), ManagerState::Unknown);
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_service_characteristic_lookup() {
        let service_id = AttributeId::from_short(0x180D);
        let mut service = Service::new(service_id, true);
        let char_id = AttributeId::from_short(0x2A37);
        service.characteristics.push(Characteristic::new(
            char_id,
            service_id,
            CharacteristicProperties::from_bits(CharacteristicProperties::NOTIFY),
        ));

        assert!(service.characteristic(&char_id).is_some());
        assert!(service.characteristic(&AttributeId::from_short(0x2A38)).is_none());
    }
}
