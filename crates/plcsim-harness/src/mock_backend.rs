//! In-memory protocol backends with failure injection.
//!
//! A [`MockNetwork`] plays the role of the host's port table: a backend binds
//! its device endpoint on start and releases it on stop, and a second bind of
//! a live endpoint fails like `EADDRINUSE`. Every backend call is appended to
//! a shared event log so tests can assert ordering (for example, that no
//! publish happens after a stop).
//!
//! Failures are injected per device id and stay active until cleared.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use plcsim_core::{
    AddressMap, BackendError, Device, DeviceId, NodeTree, ProtocolBackend, ProtocolKind,
    RegisterAllocator, SensorAddress, SensorDefinition, ValueSnapshot,
};
use plcsim_server::BackendFactory;

/// Something a mock backend did.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    /// Endpoint bound
    Started {
        /// Device
        device: DeviceId,
        /// Bound `host:port`
        endpoint: String,
    },
    /// Start refused
    StartFailed {
        /// Device
        device: DeviceId,
        /// Error text
        reason: String,
    },
    /// Endpoint released
    Stopped {
        /// Device
        device: DeviceId,
    },
    /// Stop refused, endpoint still bound
    StopFailed {
        /// Device
        device: DeviceId,
    },
    /// Snapshot accepted
    Published {
        /// Device
        device: DeviceId,
        /// Snapshot contents
        values: ValueSnapshot,
    },
    /// Snapshot refused
    PublishFailed {
        /// Device
        device: DeviceId,
    },
}

impl BackendEvent {
    /// Device the event concerns.
    pub fn device(&self) -> DeviceId {
        match self {
            Self::Started { device, .. }
            | Self::StartFailed { device, .. }
            | Self::Stopped { device }
            | Self::StopFailed { device }
            | Self::Published { device, .. }
            | Self::PublishFailed { device } => *device,
        }
    }
}

#[derive(Debug, Default)]
struct NetworkState {
    /// endpoint -> device holding it
    bound: HashMap<String, DeviceId>,
    events: Vec<BackendEvent>,
    fail_start: HashSet<DeviceId>,
    fail_stop: HashSet<DeviceId>,
    fail_publish: HashSet<DeviceId>,
}

/// Shared port table, event log and failure switches.
#[derive(Debug, Clone, Default)]
pub struct MockNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl MockNetwork {
    /// Create an empty network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `start` of the device's backends fail.
    pub fn fail_start(&self, device: DeviceId, fail: bool) {
        toggle(&mut self.state.lock().fail_start, device, fail);
    }

    /// Make `stop` of the device's backends fail.
    pub fn fail_stop(&self, device: DeviceId, fail: bool) {
        toggle(&mut self.state.lock().fail_stop, device, fail);
    }

    /// Make `publish` of the device's backends fail.
    pub fn fail_publish(&self, device: DeviceId, fail: bool) {
        toggle(&mut self.state.lock().fail_publish, device, fail);
    }

    /// Whether an endpoint is currently bound.
    pub fn is_bound(&self, endpoint: &str) -> bool {
        self.state.lock().bound.contains_key(endpoint)
    }

    /// Number of live backends belonging to a device.
    pub fn live_backends(&self, device: DeviceId) -> usize {
        self.state.lock().bound.values().filter(|d| **d == device).count()
    }

    /// Number of bound endpoints across all devices.
    pub fn bound_count(&self) -> usize {
        self.state.lock().bound.len()
    }

    /// Full event log in call order.
    pub fn events(&self) -> Vec<BackendEvent> {
        self.state.lock().events.clone()
    }

    /// Events concerning one device, in call order.
    pub fn events_for(&self, device: DeviceId) -> Vec<BackendEvent> {
        self.state.lock().events.iter().filter(|e| e.device() == device).cloned().collect()
    }

    /// Snapshots accepted for a device, in publish order.
    pub fn published(&self, device: DeviceId) -> Vec<ValueSnapshot> {
        self.state
            .lock()
            .events
            .iter()
            .filter_map(|e| match e {
                BackendEvent::Published { device: d, values } if *d == device => {
                    Some(values.clone())
                },
                _ => None,
            })
            .collect()
    }

    /// Discard the event log.
    pub fn clear_events(&self) {
        self.state.lock().events.clear();
    }

    fn record(state: &mut NetworkState, event: BackendEvent) {
        tracing::trace!(?event, "mock backend");
        state.events.push(event);
    }
}

fn toggle(set: &mut HashSet<DeviceId>, device: DeviceId, on: bool) {
    if on {
        set.insert(device);
    } else {
        set.remove(&device);
    }
}

/// Backend that binds endpoints in a [`MockNetwork`].
///
/// Addresses are computed the same way as the real backends: register
/// allocation for Modbus, node paths for OPC UA.
#[derive(Debug)]
pub struct MockBackend {
    kind: ProtocolKind,
    network: MockNetwork,
    bound: Option<(DeviceId, String)>,
}

impl MockBackend {
    /// Create an unstarted backend on `network`.
    pub fn new(kind: ProtocolKind, network: MockNetwork) -> Self {
        Self { kind, network, bound: None }
    }

    fn addresses(
        &self,
        device: &Device,
        sensors: &[SensorDefinition],
    ) -> Result<AddressMap, BackendError> {
        match self.kind {
            ProtocolKind::Modbus => Ok(RegisterAllocator::allocate(sensors)?
                .slots()
                .iter()
                .map(|slot| {
                    (slot.sensor, SensorAddress::Registers { start: slot.start, count: slot.width })
                })
                .collect()),
            ProtocolKind::OpcUa => {
                let (tree, variables) = NodeTree::for_device(device, sensors);
                Ok(variables
                    .into_iter()
                    .filter_map(|(sensor, node_id)| {
                        tree.path(node_id).map(|path| (sensor, SensorAddress::Node { path, node_id }))
                    })
                    .collect())
            },
        }
    }
}

#[async_trait]
impl ProtocolBackend for MockBackend {
    fn kind(&self) -> ProtocolKind {
        self.kind
    }

    async fn start(
        &mut self,
        device: &Device,
        sensors: &[SensorDefinition],
    ) -> Result<AddressMap, BackendError> {
        if self.bound.is_some() {
            return Err(BackendError::AlreadyStarted);
        }

        let endpoint = device.endpoint();
        let mut state = self.network.state.lock();

        let refused = if state.fail_start.contains(&device.id) {
            Some("injected start failure".to_string())
        } else if state.bound.contains_key(&endpoint) {
            Some("address in use".to_string())
        } else {
            None
        };

        if let Some(reason) = refused {
            MockNetwork::record(
                &mut state,
                BackendEvent::StartFailed { device: device.id, reason: reason.clone() },
            );
            return Err(BackendError::Bind { endpoint, reason });
        }

        let addresses = self.addresses(device, sensors)?;

        state.bound.insert(endpoint.clone(), device.id);
        MockNetwork::record(
            &mut state,
            BackendEvent::Started { device: device.id, endpoint: endpoint.clone() },
        );
        self.bound = Some((device.id, endpoint));

        Ok(addresses)
    }

    async fn stop(&mut self) -> Result<(), BackendError> {
        let Some((device, endpoint)) = self.bound.clone() else {
            return Ok(());
        };

        let mut state = self.network.state.lock();
        if state.fail_stop.contains(&device) {
            MockNetwork::record(&mut state, BackendEvent::StopFailed { device });
            return Err(BackendError::Rejected { reason: "injected stop failure".to_string() });
        }

        state.bound.remove(&endpoint);
        MockNetwork::record(&mut state, BackendEvent::Stopped { device });
        self.bound = None;

        Ok(())
    }

    async fn publish(&mut self, values: &ValueSnapshot) -> Result<(), BackendError> {
        let (device, _) = self.bound.as_ref().ok_or(BackendError::NotStarted)?;
        let device = *device;

        let mut state = self.network.state.lock();
        if state.fail_publish.contains(&device) {
            MockNetwork::record(&mut state, BackendEvent::PublishFailed { device });
            return Err(BackendError::Rejected { reason: "injected publish failure".to_string() });
        }

        MockNetwork::record(&mut state, BackendEvent::Published { device, values: values.clone() });
        Ok(())
    }
}

/// Factory handing out [`MockBackend`]s on one network.
#[derive(Debug, Clone, Default)]
pub struct MockFactory {
    network: MockNetwork,
}

impl MockFactory {
    /// Create a factory on `network`.
    pub fn new(network: MockNetwork) -> Self {
        Self { network }
    }

    /// Network the backends bind on.
    pub fn network(&self) -> &MockNetwork {
        &self.network
    }
}

impl BackendFactory for MockFactory {
    fn create(&self, kind: ProtocolKind) -> Box<dyn ProtocolBackend> {
        Box::new(MockBackend::new(kind, self.network.clone()))
    }
}
