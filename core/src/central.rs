//! Central session
//!
//! Adapter-wide state: power state, the scan stream, the per-device
//! connection registry and the table of peripheral sessions seen so far.
//!
//! The connection registry is keyed by device id and deliberately carries
//! both halves of a connection's life: the stream emits the peripheral when
//! the hardware reports it connected, and terminates (finished or error)
//! when it later disconnects. `cancel_connection` returns the same stream.

use crate::config::{CentralConfig, ConfigError, ConnectOptions, ScanOptions};
use crate::error::GattError;
use crate::hardware::{CentralEvent, CentralHardware};
use crate::peripheral::PeripheralSession;
use crate::registry::{KeyedRegistry, Outcome};
use crate::stream::{EventStream, Subscription};
use crate::types::{AdvertisementData, AttributeId, DeviceId, ManagerState};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info, warn};

/// One advertisement observed while scanning
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryEvent {
    pub peripheral: PeripheralSession,
    pub advertisement: AdvertisementData,
    /// Signal strength in dBm
    pub rssi: i16,
}

struct CentralState {
    connections: KeyedRegistry<DeviceId, PeripheralSession>,
    known: HashMap<DeviceId, PeripheralSession>,
}

struct CentralInner {
    hardware: Arc<dyn CentralHardware>,
    config: CentralConfig,
    manager_state: watch::Sender<ManagerState>,
    discoveries: EventStream<DiscoveryEvent>,
    state: Mutex<CentralState>,
}

/// Shared handle to the adapter session
#[derive(Clone)]
pub struct CentralSession {
    inner: Arc<CentralInner>,
}

impl CentralSession {
    /// Create a session with default configuration
    pub fn new(hardware: Arc<dyn CentralHardware>) -> Self {
        Self::build(hardware, CentralConfig::default())
    }

    /// Create a session after validating `config`
    pub fn with_config(
        hardware: Arc<dyn CentralHardware>,
        config: CentralConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(hardware, config))
    }

    fn build(hardware: Arc<dyn CentralHardware>, config: CentralConfig) -> Self {
        debug!(
            "Configuring adapter (power alert: {}, restore id: {:?})",
            config.show_power_alert, config.restore_identifier
        );
        hardware.configure(&config);
        let (manager_state, _) = watch::channel(ManagerState::Unknown);
        Self {
            inner: Arc::new(CentralInner {
                hardware,
                config,
                manager_state,
                discoveries: EventStream::new(),
                state: Mutex::new(CentralState {
                    connections: KeyedRegistry::new("connections"),
                    known: HashMap::new(),
                }),
            }),
        }
    }

    pub fn config(&self) -> &CentralConfig {
        &self.inner.config
    }

    /// Current adapter state
    pub fn state(&self) -> ManagerState {
        *self.inner.manager_state.borrow()
    }

    /// Continuous stream of adapter states, starting with the current one
    pub fn state_changes(&self) -> WatchStream<ManagerState> {
        WatchStream::new(self.inner.manager_state.subscribe())
    }

    /// Raw watch receiver, for callers that prefer `changed().await`
    pub fn state_receiver(&self) -> watch::Receiver<ManagerState> {
        self.inner.manager_state.subscribe()
    }

    // ------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------

    /// Start scanning and subscribe to discoveries.
    ///
    /// The stream never terminates on its own; `stop_scan` halts the radio
    /// without closing it.
    pub fn scan(
        &self,
        service_ids: Option<Vec<AttributeId>>,
        options: Option<ScanOptions>,
    ) -> Subscription<DiscoveryEvent> {
        let options = options.unwrap_or_else(|| self.inner.config.scan.clone());
        let subscription = self.inner.discoveries.subscribe();
        if self.state() != ManagerState::PoweredOn {
            warn!("Scan requested while adapter is {}", self.state());
        }
        debug!(
            "Scanning for {:?} (duplicates: {})",
            service_ids, options.allow_duplicates
        );
        self.inner
            .hardware
            .scan_for_peripherals(service_ids, &options);
        subscription
    }

    pub fn stop_scan(&self) {
        debug!("Stopping scan");
        self.inner.hardware.stop_scan();
    }

    pub fn is_scanning(&self) -> bool {
        self.inner.hardware.is_scanning()
    }

    /// Connect to `peripheral`.
    ///
    /// Emits the peripheral once connected; the same stream later finishes
    /// on a clean disconnect or fails on a disconnect error. A connect
    /// failure fails it immediately. A request while an entry is live
    /// reuses that entry without a second hardware call.
    pub fn connect(
        &self,
        peripheral: &PeripheralSession,
        options: Option<ConnectOptions>,
    ) -> Subscription<PeripheralSession> {
        let options = options.unwrap_or_else(|| self.inner.config.connect.clone());
        if let Err(err) = options.validate() {
            warn!("Rejecting connect to {}: {}", peripheral.id(), err);
            return Subscription::failed(err.into());
        }

        let device = peripheral.id();
        let (subscription, created) = {
            let mut st = self.inner.state.lock();
            st.known.entry(device).or_insert_with(|| peripheral.clone());
            let (stream, created) = st.connections.stream_for(device);
            (stream.subscribe(), created)
        };
        if created {
            info!("Connecting to {}", device);
            self.inner.hardware.connect(device, &options);
        } else {
            debug!("Connection to {} already tracked, sharing stream", device);
        }
        subscription
    }

    /// Cancel or tear down the connection to `peripheral`.
    ///
    /// Returns the connection stream, which terminates through the same
    /// path as a hardware-initiated disconnect. With no connection tracked
    /// the stream is already finished and no entry is stored, since no
    /// disconnect callback will follow.
    pub fn cancel_connection(&self, peripheral: &PeripheralSession) -> Subscription<PeripheralSession> {
        let device = peripheral.id();
        let tracked = self
            .inner
            .state
            .lock()
            .connections
            .get(&device)
            .map(EventStream::subscribe);
        let subscription = tracked.unwrap_or_else(|| {
            debug!("No connection tracked for {}, nothing to wait for", device);
            let stream = EventStream::new();
            let subscription = stream.subscribe();
            stream.finish();
            subscription
        });
        info!("Cancelling connection to {}", device);
        self.inner.hardware.cancel_connection(device);
        subscription
    }

    /// Session for a device seen by this adapter
    pub fn peripheral(&self, device: &DeviceId) -> Option<PeripheralSession> {
        self.inner.state.lock().known.get(device).cloned()
    }

    pub fn known_peripherals(&self) -> Vec<PeripheralSession> {
        self.inner.state.lock().known.values().cloned().collect()
    }

    /// Session for `device`, created from the hardware handle if this
    /// adapter has not reported it yet
    pub fn retrieve_peripheral(&self, device: DeviceId) -> PeripheralSession {
        if let Some(existing) = self.peripheral(&device) {
            return existing;
        }
        let created = PeripheralSession::new(self.inner.hardware.peripheral(device));
        self.inner
            .state
            .lock()
            .known
            .entry(device)
            .or_insert(created)
            .clone()
    }

    /// Number of devices with a live connection entry
    pub fn tracked_connections(&self) -> usize {
        self.inner.state.lock().connections.len()
    }

    // ------------------------------------------------------------------
    // Completions
    // ------------------------------------------------------------------

    /// Route one adapter-level hardware callback
    pub fn handle_event(&self, event: CentralEvent) {
        match event {
            CentralEvent::StateChanged(new_state) => self.on_state_changed(new_state),

            CentralEvent::PeripheralDiscovered {
                device,
                advertisement,
                rssi,
            } => {
                let peripheral = self.retrieve_peripheral(device);
                debug!("Discovered {} at {} dBm", device, rssi);
                self.inner.discoveries.send(DiscoveryEvent {
                    peripheral,
                    advertisement,
                    rssi,
                });
            }

            CentralEvent::PeripheralConnected { device } => {
                let peripheral = self.retrieve_peripheral(device);
                info!("Connected to {}", device);
                let mut st = self.inner.state.lock();
                if !st.connections.route(device, Outcome::Value(peripheral)) {
                    debug!("Connection to {} reported with no request tracked", device);
                }
            }

            CentralEvent::PeripheralConnectFailed { device, error } => {
                warn!("Connection to {} failed: {:?}", device, error);
                let mut st = self.inner.state.lock();
                st.connections.route(
                    device,
                    Outcome::Fail(GattError::ConnectionFailed {
                        device,
                        cause: error,
                    }),
                );
            }

            CentralEvent::PeripheralDisconnected { device, error } => {
                let outcome = match &error {
                    Some(err) => {
                        warn!("Disconnected from {} with error: {}", device, err);
                        Outcome::Fail(GattError::DisconnectFailed {
                            device,
                            cause: Some(err.clone()),
                        })
                    }
                    None => {
                        info!("Disconnected from {}", device);
                        Outcome::Finish
                    }
                };
                let peripheral = {
                    let mut st = self.inner.state.lock();
                    st.connections.route(device, outcome);
                    st.known.get(&device).cloned()
                };
                if let Some(peripheral) = peripheral {
                    peripheral.invalidate(error);
                }
            }
        }
    }

    fn on_state_changed(&self, new_state: ManagerState) {
        let mut previous = new_state;
        let changed = self.inner.manager_state.send_if_modified(|current| {
            previous = *current;
            if *current == new_state {
                false
            } else {
                *current = new_state;
                true
            }
        });
        if !changed {
            return;
        }
        info!("Adapter state {} -> {}", previous, new_state);

        if previous != ManagerState::PoweredOn {
            return;
        }
        let dropped: Vec<PeripheralSession> = {
            let mut st = self.inner.state.lock();
            let streams = st.connections.drain();
            streams
                .into_iter()
                .filter_map(|(device, stream)| {
                    stream.fail(GattError::AdapterUnavailable(new_state));
                    st.known.get(&device).cloned()
                })
                .collect()
        };
        if !dropped.is_empty() {
            warn!(
                "Adapter left PoweredOn, dropped {} connections",
                dropped.len()
            );
        }
        for peripheral in dropped {
            peripheral.invalidate(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::{MockCentralHardware, MockPeripheralHardware};
    use crate::stream::StreamEvent;
    use futures::StreamExt;

    fn central_with(device: DeviceId, mut hw: MockCentralHardware) -> CentralSession {
        hw.expect_configure().times(1).return_const(());
        hw.expect_peripheral().returning(move |_| {
            let mut p = MockPeripheralHardware::new();
            p.expect_id().return_const(device);
            Arc::new(p) as Arc<dyn crate::hardware::PeripheralHardware>
        });
        CentralSession::new(Arc::new(hw))
    }

    #[tokio::test]
    async fn test_state_stream_seeded_with_current_state() {
        let central = central_with(DeviceId::random(), MockCentralHardware::new());
        let mut states = central.state_changes();
        assert_eq!(states.next().await, Some(ManagerState::Unknown));

        central.handle_event(CentralEvent::StateChanged(ManagerState::PoweredOn));
        assert_eq!(states.next().await, Some(ManagerState::PoweredOn));

        let mut late = central.state_changes();
        assert_eq!(late.next().await, Some(ManagerState::PoweredOn));
        assert_eq!(central.state(), ManagerState::PoweredOn);
    }

    #[test]
    fn test_connect_shares_pending_entry() {
        let device = DeviceId::random();
        let mut hw = MockCentralHardware::new();
        hw.expect_connect().times(1).return_const(());
        let central = central_with(device, hw);
        let peripheral = central.retrieve_peripheral(device);

        let first = central.connect(&peripheral, None);
        let second = central.connect(&peripheral, None);

        assert_eq!(first.stream_id(), second.stream_id());
        assert_eq!(central.tracked_connections(), 1);
    }

    #[test]
    fn test_invalid_connect_options_rejected_locally() {
        let device = DeviceId::random();
        // No connect expectation: a hardware call would panic
        let central = central_with(device, MockCentralHardware::new());
        let peripheral = central.retrieve_peripheral(device);

        let mut sub = central.connect(
            &peripheral,
            Some(ConnectOptions::default().with_start_delay(-2.0)),
        );

        assert!(matches!(
            sub.try_next_event(),
            Some(StreamEvent::Failed(GattError::InvalidConfig(_)))
        ));
        assert_eq!(central.tracked_connections(), 0);
    }

    #[test]
    fn test_power_off_fails_connections() {
        let device = DeviceId::random();
        let mut hw = MockCentralHardware::new();
        hw.expect_connect().return_const(());
        let central = central_with(device, hw);
        central.handle_event(CentralEvent::StateChanged(ManagerState::PoweredOn));

        let peripheral = central.retrieve_peripheral(device);
        let mut sub = central.connect(&peripheral, None);
        central.handle_event(CentralEvent::PeripheralConnected { device });
        central.handle_event(CentralEvent::StateChanged(ManagerState::PoweredOff));

        assert!(matches!(sub.try_next_event(), Some(StreamEvent::Value(_))));
        assert_eq!(
            sub.try_next_event(),
            Some(StreamEvent::Failed(GattError::AdapterUnavailable(
                ManagerState::PoweredOff
            )))
        );
        assert_eq!(central.tracked_connections(), 0);
    }

    #[test]
    fn test_repeated_state_is_not_rebroadcast() {
        let central = central_with(DeviceId::random(), MockCentralHardware::new());
        let mut rx = central.state_receiver();
        let _ = rx.borrow_and_update();

        central.handle_event(CentralEvent::StateChanged(ManagerState::Unknown));
        assert!(!rx.has_changed().unwrap_or(true));

        central.handle_event(CentralEvent::StateChanged(ManagerState::PoweredOff));
        assert!(rx.has_changed().unwrap_or(false));
    }

    #[test]
    fn test_config_reaches_hardware_once() {
        let mut hw = MockCentralHardware::new();
        hw.expect_configure()
            .withf(|config| {
                !config.show_power_alert && config.restore_identifier.as_deref() == Some("hub")
            })
            .times(1)
            .return_const(());
        let config = CentralConfig {
            show_power_alert: false,
            ..CentralConfig::default()
        }
        .with_restore_identifier("hub");

        let central = CentralSession::with_config(Arc::new(hw), config).expect("valid config");
        assert_eq!(central.config().restore_identifier.as_deref(), Some("hub"));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = CentralConfig::default().with_restore_identifier("");
        let result = CentralSession::with_config(Arc::new(MockCentralHardware::new()), config);
        assert!(matches!(result, Err(ConfigError::EmptyRestoreIdentifier)));
    }
}
