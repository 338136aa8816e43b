//! Peripheral session
//!
//! One session per remote device. It owns the device's per-attribute
//! registries (service, included-service, characteristic and descriptor
//! discovery, reads, writes, notification state), the pending chunked write
//! jobs, and a cache of the attribute tree built from completions.
//!
//! Every public operation returns a [`Subscription`] immediately. Results
//! arrive through [`PeripheralSession::handle_event`], which the platform
//! layer calls from its delivery context.

use crate::chunked::{ChunkedWriteJob, MIN_WRITE_LENGTH};
use crate::error::{GattError, HardwareError};
use crate::hardware::{PeripheralEvent, PeripheralHardware};
use crate::registry::{KeyedRegistry, Outcome};
use crate::stream::{EventStream, Subscription};
use crate::types::{
    AttributeId, Characteristic, ConnectionState, DeviceId, Service, WriteType,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A service-level completion: the session plus the service it concerns
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceUpdate {
    pub peripheral: PeripheralSession,
    pub service: Service,
}

/// A characteristic-level completion
#[derive(Debug, Clone, PartialEq)]
pub struct CharacteristicUpdate {
    pub peripheral: PeripheralSession,
    pub characteristic: Characteristic,
}

/// Acknowledged write in progress for one characteristic
struct PendingWrite {
    job: ChunkedWriteJob,
    target: Characteristic,
}

/// Everything guarded by the session's single lock
struct SessionState {
    services: KeyedRegistry<DeviceId, PeripheralSession>,
    included_services: KeyedRegistry<AttributeId, ServiceUpdate>,
    characteristics: KeyedRegistry<AttributeId, ServiceUpdate>,
    descriptors: KeyedRegistry<AttributeId, CharacteristicUpdate>,
    reads: KeyedRegistry<AttributeId, CharacteristicUpdate>,
    writes: KeyedRegistry<AttributeId, CharacteristicUpdate>,
    notifications: KeyedRegistry<AttributeId, CharacteristicUpdate>,
    write_jobs: HashMap<AttributeId, PendingWrite>,
    /// Attribute tree as learned from completions
    attributes: Vec<Service>,
}

impl SessionState {
    fn new() -> Self {
        Self {
            services: KeyedRegistry::new("services"),
            included_services: KeyedRegistry::new("included-services"),
            characteristics: KeyedRegistry::new("characteristics"),
            descriptors: KeyedRegistry::new("descriptors"),
            reads: KeyedRegistry::new("reads"),
            writes: KeyedRegistry::new("writes"),
            notifications: KeyedRegistry::new("notifications"),
            write_jobs: HashMap::new(),
            attributes: Vec::new(),
        }
    }

    fn pending(&self) -> usize {
        self.services.len()
            + self.included_services.len()
            + self.characteristics.len()
            + self.descriptors.len()
            + self.reads.len()
            + self.writes.len()
            + self.notifications.len()
    }

    /// Replace-or-insert discovered services, keeping children learned
    /// earlier when the new entry carries none
    fn merge_services(&mut self, discovered: Vec<Service>) {
        for mut service in discovered {
            match self.attributes.iter_mut().find(|s| s.id == service.id) {
                Some(existing) => {
                    if service.characteristics.is_empty() {
                        service.characteristics = std::mem::take(&mut existing.characteristics);
                    }
                    if service.included_services.is_empty() {
                        service.included_services = std::mem::take(&mut existing.included_services);
                    }
                    *existing = service;
                }
                None => self.attributes.push(service),
            }
        }
    }

    fn service_mut(&mut self, id: &AttributeId) -> Option<&mut Service> {
        self.attributes.iter_mut().find(|s| s.id == *id)
    }

    fn characteristic_mut(&mut self, characteristic: &Characteristic) -> Option<&mut Characteristic> {
        self.service_mut(&characteristic.service_id)?
            .characteristic_mut(&characteristic.id)
    }
}

struct PeripheralInner {
    id: DeviceId,
    hardware: Arc<dyn PeripheralHardware>,
    state: Mutex<SessionState>,
}

/// Shared handle to one device's session; clones refer to the same session
#[derive(Clone)]
pub struct PeripheralSession {
    inner: Arc<PeripheralInner>,
}

impl fmt::Debug for PeripheralSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeripheralSession")
            .field("id", &self.inner.id)
            .finish_non_exhaustive()
    }
}

/// Sessions compare by device identity
impl PartialEq for PeripheralSession {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for PeripheralSession {}

impl PeripheralSession {
    pub fn new(hardware: Arc<dyn PeripheralHardware>) -> Self {
        let id = hardware.id();
        Self {
            inner: Arc::new(PeripheralInner {
                id,
                hardware,
                state: Mutex::new(SessionState::new()),
            }),
        }
    }

    pub fn id(&self) -> DeviceId {
        self.inner.id
    }

    pub fn name(&self) -> Option<String> {
        self.inner.hardware.name()
    }

    /// Link state as the hardware reports it right now
    pub fn connection_state(&self) -> ConnectionState {
        self.inner.hardware.connection_state()
    }

    pub fn maximum_write_length(&self, mode: WriteType) -> usize {
        self.inner.hardware.maximum_write_value_length(mode)
    }

    /// Snapshot of the discovered attribute tree
    pub fn services(&self) -> Vec<Service> {
        self.inner.state.lock().attributes.clone()
    }

    pub fn service(&self, id: &AttributeId) -> Option<Service> {
        self.inner
            .state
            .lock()
            .attributes
            .iter()
            .find(|s| s.id == *id)
            .cloned()
    }

    pub fn characteristic(
        &self,
        service_id: &AttributeId,
        characteristic_id: &AttributeId,
    ) -> Option<Characteristic> {
        self.service(service_id)?
            .characteristic(characteristic_id)
            .cloned()
    }

    /// Number of operations with a live registry entry
    pub fn pending_operations(&self) -> usize {
        self.inner.state.lock().pending()
    }

    pub fn has_pending_write(&self, characteristic_id: &AttributeId) -> bool {
        self.inner.state.lock().write_jobs.contains_key(characteristic_id)
    }

    // ------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------

    /// Discover services, optionally only the listed ones.
    ///
    /// Emits this session (now carrying the services) and finishes. A
    /// request made while one is pending shares its stream and issues no
    /// second hardware call.
    pub fn discover_services(
        &self,
        service_ids: Option<Vec<AttributeId>>,
    ) -> Subscription<PeripheralSession> {
        let (subscription, created) = self.open(|st| &mut st.services, self.inner.id);
        if created {
            debug!("{}: discovering services", self.inner.id);
            self.inner.hardware.discover_services(service_ids);
        }
        subscription
    }

    /// Discover services included by `service`; keyed by the parent service
    pub fn discover_included_services(
        &self,
        service_ids: Option<Vec<AttributeId>>,
        service: &Service,
    ) -> Subscription<ServiceUpdate> {
        let (subscription, created) = self.open(|st| &mut st.included_services, service.id);
        if created {
            debug!("{}: discovering included services of {}", self.inner.id, service.id);
            self.inner
                .hardware
                .discover_included_services(service_ids, service);
        }
        subscription
    }

    pub fn discover_characteristics(
        &self,
        characteristic_ids: Option<Vec<AttributeId>>,
        service: &Service,
    ) -> Subscription<ServiceUpdate> {
        let (subscription, created) = self.open(|st| &mut st.characteristics, service.id);
        if created {
            debug!("{}: discovering characteristics of {}", self.inner.id, service.id);
            self.inner
                .hardware
                .discover_characteristics(characteristic_ids, service);
        }
        subscription
    }

    pub fn discover_descriptors(
        &self,
        characteristic: &Characteristic,
    ) -> Subscription<CharacteristicUpdate> {
        let (subscription, created) = self.open(|st| &mut st.descriptors, characteristic.id);
        if created {
            debug!("{}: discovering descriptors of {}", self.inner.id, characteristic.id);
            self.inner.hardware.discover_descriptors(characteristic);
        }
        subscription
    }

    pub fn read_value(&self, characteristic: &Characteristic) -> Subscription<CharacteristicUpdate> {
        let (subscription, created) = self.open(|st| &mut st.reads, characteristic.id);
        if created {
            debug!("{}: reading {}", self.inner.id, characteristic.id);
            self.inner.hardware.read_value(characteristic);
        }
        subscription
    }

    /// Write `data`, split to the hardware's single-write limit.
    ///
    /// With [`WriteType::WithResponse`] each chunk waits for the previous
    /// acknowledgment and the stream finishes after the last one; the first
    /// error ends the write with nothing further sent. A second write to the
    /// same characteristic while one is pending replaces the pending job and
    /// shares its stream. With [`WriteType::WithoutResponse`] every chunk is
    /// sent at once and the stream finishes right after.
    pub fn write_value(
        &self,
        data: &[u8],
        characteristic: &Characteristic,
        mode: WriteType,
    ) -> Subscription<CharacteristicUpdate> {
        if data.is_empty() {
            warn!("{}: refusing empty write to {}", self.inner.id, characteristic.id);
            return Subscription::failed(GattError::WriteDataMissing);
        }

        let limit = match self.inner.hardware.maximum_write_value_length(mode) {
            0 => MIN_WRITE_LENGTH,
            n => n,
        };
        let mut job = match ChunkedWriteJob::new(characteristic.id, data, mode, limit) {
            Ok(job) => job,
            Err(err) => return Subscription::failed(err),
        };
        debug!(
            "{}: writing {} bytes to {} ({}, {} chunks of <= {})",
            self.inner.id,
            data.len(),
            characteristic.id,
            mode,
            job.total_chunks(),
            limit
        );

        match mode {
            WriteType::WithoutResponse => {
                let stream = EventStream::new();
                let subscription = stream.subscribe();
                for chunk in job.into_chunks() {
                    self.inner.hardware.write_value(&chunk, characteristic, mode);
                }
                stream.send(self.characteristic_update(characteristic.clone()));
                stream.finish();
                subscription
            }
            WriteType::WithResponse => {
                let first = job.next_chunk();
                let subscription = {
                    let mut st = self.inner.state.lock();
                    let (stream, created) = st.writes.stream_for(characteristic.id);
                    let replaced = st.write_jobs.insert(
                        characteristic.id,
                        PendingWrite {
                            job,
                            target: characteristic.clone(),
                        },
                    );
                    if !created || replaced.is_some() {
                        debug!(
                            "{}: replacing pending write to {}",
                            self.inner.id, characteristic.id
                        );
                    }
                    stream.subscribe()
                };
                if let Some(chunk) = first {
                    self.inner.hardware.write_value(&chunk, characteristic, mode);
                }
                subscription
            }
        }
    }

    /// Enable or disable notifications.
    ///
    /// The stream emits on confirmed enable and on every notified value,
    /// and finishes once disabling is confirmed.
    pub fn set_notify_value(
        &self,
        enabled: bool,
        characteristic: &Characteristic,
    ) -> Subscription<CharacteristicUpdate> {
        let (subscription, _) = self.open(|st| &mut st.notifications, characteristic.id);
        debug!(
            "{}: setting notify={} on {}",
            self.inner.id, enabled, characteristic.id
        );
        self.inner.hardware.set_notify_value(enabled, characteristic);
        subscription
    }

    /// Fail every open operation and drop pending writes.
    ///
    /// Called when the device disconnects so no stream is left waiting and
    /// no stale completion can reach a request made after reconnecting.
    pub fn invalidate(&self, cause: Option<HardwareError>) {
        let err = GattError::PeripheralDisconnected {
            device: self.inner.id,
            cause,
        };
        let mut st = self.inner.state.lock();
        let open = st.pending();
        if open > 0 {
            info!("{}: failing {} open operations", self.inner.id, open);
        }

        for (_, stream) in st.services.drain() {
            stream.fail(err.clone());
        }
        for (_, stream) in st.included_services.drain() {
            stream.fail(err.clone());
        }
        for (_, stream) in st.characteristics.drain() {
            stream.fail(err.clone());
        }
        for (_, stream) in st.descriptors.drain() {
            stream.fail(err.clone());
        }
        for (_, stream) in st.reads.drain() {
            stream.fail(err.clone());
        }
        for (_, stream) in st.writes.drain() {
            stream.fail(err.clone());
        }
        for (_, stream) in st.notifications.drain() {
            stream.fail(err.clone());
        }
        st.write_jobs.clear();
        st.attributes.clear();
    }

    // ------------------------------------------------------------------
    // Completions
    // ------------------------------------------------------------------

    /// Route one hardware callback to the operation it completes
    pub fn handle_event(&self, event: PeripheralEvent) {
        debug!("{}: {}", self.inner.id, event.kind());
        match event {
            PeripheralEvent::ServicesDiscovered { services, error } => {
                let mut st = self.inner.state.lock();
                let outcome = match error {
                    Some(err) => Outcome::Fail(GattError::ServiceDiscoveryFailed(Some(err))),
                    None => {
                        st.merge_services(services);
                        Outcome::ValueThenFinish(self.clone())
                    }
                };
                st.services.route(self.inner.id, outcome);
            }

            PeripheralEvent::IncludedServicesDiscovered { service, error } => {
                let mut st = self.inner.state.lock();
                let key = service.id;
                let outcome = match error {
                    Some(err) => {
                        Outcome::Fail(GattError::IncludedServiceDiscoveryFailed(Some(err)))
                    }
                    None => {
                        let service = match st.service_mut(&key) {
                            Some(cached) => {
                                cached.included_services = service.included_services;
                                cached.clone()
                            }
                            None => service,
                        };
                        Outcome::ValueThenFinish(self.service_update(service))
                    }
                };
                st.included_services.route(key, outcome);
            }

            PeripheralEvent::CharacteristicsDiscovered { service, error } => {
                let mut st = self.inner.state.lock();
                let key = service.id;
                let outcome = match error {
                    Some(err) => {
                        Outcome::Fail(GattError::CharacteristicDiscoveryFailed(Some(err)))
                    }
                    None => {
                        let service = match st.service_mut(&key) {
                            Some(cached) => {
                                cached.characteristics = service.characteristics;
                                cached.clone()
                            }
                            None => service,
                        };
                        Outcome::ValueThenFinish(self.service_update(service))
                    }
                };
                st.characteristics.route(key, outcome);
            }

            PeripheralEvent::DescriptorsDiscovered {
                characteristic,
                error,
            } => {
                let mut st = self.inner.state.lock();
                let key = characteristic.id;
                let outcome = match error {
                    Some(err) => Outcome::Fail(GattError::DescriptorDiscoveryFailed(Some(err))),
                    None => {
                        let characteristic = match st.characteristic_mut(&characteristic) {
                            Some(cached) => {
                                cached.descriptors = characteristic.descriptors;
                                cached.clone()
                            }
                            None => characteristic,
                        };
                        Outcome::ValueThenFinish(self.characteristic_update(characteristic))
                    }
                };
                st.descriptors.route(key, outcome);
            }

            PeripheralEvent::CharacteristicValueWritten {
                characteristic,
                error,
            } => self.on_value_written(characteristic, error),

            PeripheralEvent::CharacteristicValueUpdated {
                characteristic,
                error,
            } => {
                let mut st = self.inner.state.lock();
                let key = characteristic.id;
                if let Some(err) = error {
                    if st.reads.contains(&key) {
                        st.reads
                            .route(key, Outcome::Fail(GattError::ReadFailed(Some(err))));
                    } else {
                        warn!(
                            "{}: value update for {} failed with no read pending: {}",
                            self.inner.id, key, err
                        );
                    }
                    return;
                }

                if let Some(cached) = st.characteristic_mut(&characteristic) {
                    cached.value = characteristic.value.clone();
                }
                let is_notifying = characteristic.is_notifying;
                let update = self.characteristic_update(characteristic);
                if st.reads.contains(&key) {
                    st.reads.route(key, Outcome::ValueThenFinish(update.clone()));
                }
                if is_notifying {
                    st.notifications.route(key, Outcome::Value(update));
                }
            }

            PeripheralEvent::NotificationStateChanged {
                characteristic,
                error,
            } => {
                let mut st = self.inner.state.lock();
                let key = characteristic.id;
                let outcome = match error {
                    Some(err) => Outcome::Fail(GattError::NotifyStateChangeFailed(Some(err))),
                    None => {
                        if let Some(cached) = st.characteristic_mut(&characteristic) {
                            cached.is_notifying = characteristic.is_notifying;
                        }
                        if characteristic.is_notifying {
                            Outcome::Value(self.characteristic_update(characteristic))
                        } else {
                            Outcome::Finish
                        }
                    }
                };
                st.notifications.route(key, outcome);
            }
        }
    }

    fn on_value_written(&self, characteristic: Characteristic, error: Option<HardwareError>) {
        let key = characteristic.id;
        let next = {
            let mut st = self.inner.state.lock();
            if let Some(err) = error {
                if let Some(pending) = st.write_jobs.remove(&key) {
                    warn!(
                        "{}: write to {} failed after {}/{} chunks: {}",
                        self.inner.id,
                        key,
                        pending.job.sent_chunks(),
                        pending.job.total_chunks(),
                        err
                    );
                }
                st.writes
                    .route(key, Outcome::Fail(GattError::WriteFailed(Some(err))));
                return;
            }

            let Some(pending) = st.write_jobs.get_mut(&key) else {
                debug!("{}: write ack for {} with no job pending", self.inner.id, key);
                return;
            };
            match pending.job.next_chunk() {
                Some(chunk) => (chunk, pending.target.clone(), pending.job.mode()),
                None => {
                    st.write_jobs.remove(&key);
                    let update = self.characteristic_update(characteristic);
                    st.writes.route(key, Outcome::ValueThenFinish(update));
                    return;
                }
            }
        };

        let (chunk, target, mode) = next;
        self.inner.hardware.write_value(&chunk, &target, mode);
    }

    /// Look up or create the entry for `key` in one registry and subscribe
    /// to it under the session lock, so no completion can slip in between.
    fn open<K, T>(
        &self,
        registry: impl FnOnce(&mut SessionState) -> &mut KeyedRegistry<K, T>,
        key: K,
    ) -> (Subscription<T>, bool)
    where
        K: Eq + std::hash::Hash + Copy + fmt::Debug,
        T: Clone,
    {
        let mut st = self.inner.state.lock();
        let (stream, created) = registry(&mut st).stream_for(key);
        (stream.subscribe(), created)
    }

    fn service_update(&self, service: Service) -> ServiceUpdate {
        ServiceUpdate {
            peripheral: self.clone(),
            service,
        }
    }

    fn characteristic_update(&self, characteristic: Characteristic) -> CharacteristicUpdate {
        CharacteristicUpdate {
            peripheral: self.clone(),
            characteristic,
        }
    }
}
