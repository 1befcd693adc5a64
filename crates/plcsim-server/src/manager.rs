//! Simulation Manager
//!
//! Process-wide registry of device simulators.
//!
//! ## Responsibilities
//!
//! - Uniqueness: at most one simulator per device id. Starting a registered
//!   device fully stops the old instance before a new backend binds, so two
//!   backends never compete for the same endpoint.
//! - Backend Selection: picks the backend variant for the device's protocol
//!   through a [`BackendFactory`].
//! - Queries: status, values and addresses are plain map lookups that never
//!   wait on an in-flight start or stop.
//!
//! ## Registry Policy
//!
//! - A failed start leaves no entry; later queries report `Stopped`.
//! - A failed stop keeps the entry in `Error` so its message stays
//!   queryable. A later successful stop removes it.
//! - If stopping the old instance fails during a restart, the new start is
//!   aborted and the old entry is kept.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use parking_lot::RwLock;
use plcsim_core::{
    AddressMap, Device, DeviceId, Environment, SensorDefinition, SensorValue, validate_definitions,
};

use crate::{
    backend::BackendFactory,
    error::SimulationError,
    simulator::{DeviceSimulator, SimulatorConfig, SimulatorState, SimulatorStatus},
};

/// Outcome of [`SimulationManager::stop_all`].
#[derive(Debug, Default, Clone, PartialEq)]
pub struct StopAllReport {
    /// Devices stopped and removed
    pub stopped: Vec<DeviceId>,
    /// Devices whose stop failed, still registered in `Error`
    pub failed: Vec<(DeviceId, SimulationError)>,
}

impl StopAllReport {
    /// Whether every device stopped.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Registry of running device simulators.
pub struct SimulationManager<E>
where
    E: Environment,
{
    env: E,
    factory: Arc<dyn BackendFactory>,
    config: SimulatorConfig,
    simulators: RwLock<HashMap<DeviceId, Arc<DeviceSimulator<E>>>>,
    /// Serializes every start and stop across devices
    lifecycle: tokio::sync::Mutex<()>,
}

impl<E> SimulationManager<E>
where
    E: Environment,
{
    /// Create an empty registry.
    pub fn new(env: E, factory: Arc<dyn BackendFactory>, config: SimulatorConfig) -> Self {
        Self {
            env,
            factory,
            config,
            simulators: RwLock::new(HashMap::new()),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    fn get(&self, device_id: DeviceId) -> Option<Arc<DeviceSimulator<E>>> {
        self.simulators.read().get(&device_id).cloned()
    }

    /// Start simulating `device`, replacing any running instance.
    pub async fn start_simulation(
        &self,
        device: Device,
        sensors: Vec<SensorDefinition>,
    ) -> Result<(), SimulationError> {
        validate_definitions(&device, &sensors)
            .map_err(|source| SimulationError::InvalidDefinition { device: device.id, source })?;

        let _lifecycle = self.lifecycle.lock().await;
        self.start_locked(device, sensors).await
    }

    async fn start_locked(
        &self,
        device: Device,
        sensors: Vec<SensorDefinition>,
    ) -> Result<(), SimulationError> {
        let device_id = device.id;

        if let Some(existing) = self.get(device_id) {
            tracing::info!(device = device_id, "Stopping existing simulation before restart");
            existing.stop().await?;
            self.simulators.write().remove(&device_id);
        }

        let backend = self.factory.create(device.protocol);
        let simulator = Arc::new(DeviceSimulator::new(
            device,
            sensors,
            backend,
            self.env.clone(),
            self.config,
        ));

        simulator.start().await?;
        self.simulators.write().insert(device_id, simulator);
        Ok(())
    }

    /// Stop a device's simulation.
    ///
    /// Succeeds without effect when the device is not registered. The entry
    /// is removed only if the stop succeeds.
    pub async fn stop_simulation(&self, device_id: DeviceId) -> Result<(), SimulationError> {
        let _lifecycle = self.lifecycle.lock().await;
        self.stop_locked(device_id).await
    }

    async fn stop_locked(&self, device_id: DeviceId) -> Result<(), SimulationError> {
        let Some(simulator) = self.get(device_id) else {
            return Ok(());
        };

        simulator.stop().await?;
        self.simulators.write().remove(&device_id);
        Ok(())
    }

    /// Run a registered device again with its retained definitions.
    pub async fn restart_simulation(&self, device_id: DeviceId) -> Result<(), SimulationError> {
        let _lifecycle = self.lifecycle.lock().await;

        let simulator = self.get(device_id).ok_or(SimulationError::UnknownDevice(device_id))?;
        let device = simulator.device().clone();
        let sensors = simulator.definitions().to_vec();
        drop(simulator);

        self.start_locked(device, sensors).await
    }

    /// Stop every registered device.
    ///
    /// Each device is stopped independently; a failure is logged and
    /// reported without aborting the rest.
    pub async fn stop_all(&self) -> StopAllReport {
        let _lifecycle = self.lifecycle.lock().await;

        let mut device_ids: Vec<DeviceId> = self.simulators.read().keys().copied().collect();
        device_ids.sort_unstable();

        let mut report = StopAllReport::default();
        for device_id in device_ids {
            match self.stop_locked(device_id).await {
                Ok(()) => report.stopped.push(device_id),
                Err(e) => {
                    tracing::error!(device = device_id, "Failed to stop during shutdown: {}", e);
                    report.failed.push((device_id, e));
                },
            }
        }

        report
    }

    /// Status of a device; `Stopped` when not registered.
    pub fn status(&self, device_id: DeviceId) -> SimulatorStatus {
        self.get(device_id).map_or(SimulatorStatus::Stopped, |sim| sim.status())
    }

    /// Full state snapshot of a registered device.
    pub fn state(&self, device_id: DeviceId) -> Option<SimulatorState> {
        self.get(device_id).map(|sim| sim.state())
    }

    /// Last computed values of a device keyed by sensor name; empty when not
    /// registered.
    pub fn current_values(&self, device_id: DeviceId) -> BTreeMap<String, SensorValue> {
        self.get(device_id).map(|sim| sim.current_values()).unwrap_or_default()
    }

    /// Ids of devices whose simulation is running, in ascending order.
    pub fn running(&self) -> Vec<DeviceId> {
        let mut ids: Vec<DeviceId> = self
            .simulators
            .read()
            .iter()
            .filter(|(_, sim)| sim.is_running())
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Message of the last failed start or stop of a registered device.
    pub fn error_message(&self, device_id: DeviceId) -> Option<String> {
        self.get(device_id).and_then(|sim| sim.error_message())
    }

    /// Whether the device's simulation is running.
    pub fn is_running(&self, device_id: DeviceId) -> bool {
        self.get(device_id).is_some_and(|sim| sim.is_running())
    }

    /// Addresses bound for a running device; empty when not registered.
    pub fn addresses(&self, device_id: DeviceId) -> AddressMap {
        self.get(device_id).map(|sim| sim.addresses()).unwrap_or_default()
    }

    /// Number of registered devices, including ones stuck in `Error`.
    pub fn len(&self) -> usize {
        self.simulators.read().len()
    }

    /// Whether no device is registered.
    pub fn is_empty(&self) -> bool {
        self.simulators.read().is_empty()
    }
}

impl<E> std::fmt::Debug for SimulationManager<E>
where
    E: Environment,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulationManager")
            .field("devices", &self.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
