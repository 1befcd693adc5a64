//! Device Simulator
//!
//! Runs one simulated device: owns its protocol backend, one
//! [`SensorRuntime`] per sensor, and the periodic update loop.
//!
//! ## State Machine
//!
//! ```text
//!            start()                 backend.start() ok
//! Stopped ──────────> Starting ─────────────────────────> Running
//!    ^                   │ backend.start() err               │ stop()
//!    │                   v                                   v
//!    │                 Error <──── backend.stop() err ──── Stopping
//!    │                                                       │
//!    └──────────────── backend.stop() ok ────────────────────┘
//! ```
//!
//! `start()` from `Error` retries. `stop()` from `Error` retries the
//! backend teardown.
//!
//! ## Update Loop
//!
//! `start()` computes every sensor value once before returning, so
//! [`DeviceSimulator::current_values`] is complete as soon as it reports
//! `Running`. From then on one task per running simulator drives the cycles.
//! Each cycle recomputes every sensor value, then publishes the whole
//! snapshot through the backend and sleeps for the configured interval. Cycles never overlap. A publish failure is logged and
//! counted; it never changes the status.
//!
//! `stop()` signals the loop over a `watch` channel and awaits its exit
//! before touching the backend, so no publish starts after teardown begins.

use std::{
    collections::BTreeMap,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use parking_lot::Mutex;
use plcsim_core::{
    AddressMap, DataType, Device, DeviceId, Environment, ProtocolBackend, ProtocolKind,
    SensorAddress, SensorDefinition, SensorId, SensorValue, ValueSnapshot,
};
use serde::Serialize;
use tokio::{sync::watch, task::JoinHandle};

use crate::{error::SimulationError, sensor_runtime::SensorRuntime};

/// Interval between update cycles when none is configured.
pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(1);

/// Backend shared between the simulator and its update loop.
pub type SharedBackend = Arc<tokio::sync::Mutex<Box<dyn ProtocolBackend>>>;

/// Simulator tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulatorConfig {
    /// Sleep between update cycles
    pub update_interval: Duration,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self { update_interval: DEFAULT_UPDATE_INTERVAL }
    }
}

/// Lifecycle status of a simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SimulatorStatus {
    /// Not running (initial and terminal)
    Stopped,
    /// Backend start in progress
    Starting,
    /// Backend serving, update loop active
    Running,
    /// Teardown in progress
    Stopping,
    /// Last start or stop failed
    Error,
}

impl fmt::Display for SimulatorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// Serializable view of one sensor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorState {
    /// Sensor ID
    pub id: SensorId,
    /// Display name
    pub name: String,
    /// Engineering unit
    pub unit: Option<String>,
    /// Declared type
    pub data_type: DataType,
    /// Last computed value
    pub value: Option<SensorValue>,
    /// Address bound by the backend
    pub address: Option<SensorAddress>,
}

/// Serializable view of a simulator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulatorState {
    /// Device ID
    pub device_id: DeviceId,
    /// Device name
    pub name: String,
    /// Exposed protocol
    pub protocol: ProtocolKind,
    /// `host:port` of the backend
    pub endpoint: String,
    /// Lifecycle status
    pub status: SimulatorStatus,
    /// Last start/stop failure
    pub error: Option<String>,
    /// Completed update cycles since construction
    pub cycles: u64,
    /// Publish calls that failed
    pub publish_failures: u64,
    /// Per-sensor values in id order
    pub sensors: Vec<SensorState>,
}

/// State shared with the update loop task.
struct Shared<E>
where
    E: Environment,
{
    device: Device,
    status: Mutex<SimulatorStatus>,
    error: Mutex<Option<String>>,
    runtimes: Mutex<BTreeMap<SensorId, SensorRuntime<E>>>,
    addresses: Mutex<AddressMap>,
    cycles: AtomicU64,
    publish_failures: AtomicU64,
}

impl<E> Shared<E>
where
    E: Environment,
{
    fn set_status(&self, status: SimulatorStatus) {
        *self.status.lock() = status;
    }

    fn fail(&self, err: &SimulationError) {
        tracing::error!(device = self.device.id, "{}", err);
        *self.error.lock() = Some(err.to_string());
        self.set_status(SimulatorStatus::Error);
    }

    /// One update cycle: compute every value, then publish the snapshot.
    async fn tick(&self, backend: &SharedBackend) {
        let snapshot: ValueSnapshot =
            self.runtimes.lock().iter_mut().map(|(id, runtime)| (*id, runtime.update())).collect();

        let published = backend.lock().await.publish(&snapshot).await;
        self.cycles.fetch_add(1, Ordering::Relaxed);

        if let Err(e) = published {
            self.publish_failures.fetch_add(1, Ordering::Relaxed);
            let err = SimulationError::Publish { device: self.device.id, reason: e.to_string() };
            tracing::warn!("{}", err);
        }
    }
}

/// Handle to a running update loop.
struct UpdateLoop {
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl UpdateLoop {
    /// Signal the loop and wait for it to exit.
    async fn shutdown(mut self, device: DeviceId) {
        // Err only if the loop already exited
        let _ = self.cancel.send(true);

        match (&mut self.handle).await {
            Ok(()) => {},
            Err(e) if e.is_cancelled() => {},
            Err(e) => tracing::error!(device, "update loop panicked: {}", e),
        }
    }
}

impl Drop for UpdateLoop {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn run_update_loop<E>(
    shared: Arc<Shared<E>>,
    backend: SharedBackend,
    env: E,
    interval: Duration,
    mut cancel: watch::Receiver<bool>,
) where
    E: Environment,
{
    tracing::debug!(device = shared.device.id, "update loop started");

    loop {
        tokio::select! {
            biased;

            _ = cancel.changed() => break,
            () = async {
                shared.tick(&backend).await;
                env.sleep(interval).await;
            } => {},
        }
    }

    tracing::debug!(device = shared.device.id, "update loop exited");
}

/// Simulates one device.
///
/// `start` and `stop` take `&self` and are serialized by an internal async
/// lock, so a simulator can be shared behind an `Arc`. Queries never wait on
/// that lock.
pub struct DeviceSimulator<E>
where
    E: Environment,
{
    definitions: Vec<SensorDefinition>,
    env: E,
    config: SimulatorConfig,
    backend: SharedBackend,
    shared: Arc<Shared<E>>,
    update_loop: tokio::sync::Mutex<Option<UpdateLoop>>,
}

impl<E> DeviceSimulator<E>
where
    E: Environment,
{
    /// Create a stopped simulator for `device`.
    ///
    /// Definitions are expected to be validated already.
    pub fn new(
        device: Device,
        definitions: Vec<SensorDefinition>,
        backend: Box<dyn ProtocolBackend>,
        env: E,
        config: SimulatorConfig,
    ) -> Self {
        let runtimes = definitions
            .iter()
            .map(|sensor| (sensor.id, SensorRuntime::new(sensor.clone(), env.clone())))
            .collect();

        let shared = Arc::new(Shared {
            device,
            status: Mutex::new(SimulatorStatus::Stopped),
            error: Mutex::new(None),
            runtimes: Mutex::new(runtimes),
            addresses: Mutex::new(AddressMap::new()),
            cycles: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
        });

        Self {
            definitions,
            env,
            config,
            backend: Arc::new(tokio::sync::Mutex::new(backend)),
            shared,
            update_loop: tokio::sync::Mutex::new(None),
        }
    }

    /// Start the backend and the update loop.
    ///
    /// Succeeds without effect when already running. On failure the status
    /// becomes [`SimulatorStatus::Error`] and the message is retained.
    pub async fn start(&self) -> Result<(), SimulationError> {
        let mut update_loop = self.update_loop.lock().await;
        if self.status() == SimulatorStatus::Running {
            return Ok(());
        }

        let device = &self.shared.device;
        self.shared.set_status(SimulatorStatus::Starting);

        let started = self.backend.lock().await.start(device, &self.definitions).await;
        let addresses = match started {
            Ok(addresses) => addresses,
            Err(e) => {
                let err = SimulationError::Start { device: device.id, reason: e.to_string() };
                self.shared.fail(&err);
                return Err(err);
            },
        };

        *self.shared.addresses.lock() = addresses;
        // First generation pass; values are readable once start returns
        for runtime in self.shared.runtimes.lock().values_mut() {
            runtime.reset();
            runtime.update();
        }
        self.shared.error.lock().take();
        self.shared.set_status(SimulatorStatus::Running);

        let (cancel, cancel_rx) = watch::channel(false);
        let handle = tokio::spawn(run_update_loop(
            Arc::clone(&self.shared),
            Arc::clone(&self.backend),
            self.env.clone(),
            self.config.update_interval,
            cancel_rx,
        ));
        *update_loop = Some(UpdateLoop { cancel, handle });

        tracing::info!(
            device = device.id,
            "Started {} simulation for {} on {}",
            device.protocol,
            device.name,
            device.endpoint()
        );
        Ok(())
    }

    /// Stop the update loop, then the backend.
    ///
    /// Succeeds without effect when already stopped. On failure the status
    /// becomes [`SimulatorStatus::Error`] and the message is retained.
    pub async fn stop(&self) -> Result<(), SimulationError> {
        let mut update_loop = self.update_loop.lock().await;
        if self.status() == SimulatorStatus::Stopped {
            return Ok(());
        }

        let device = &self.shared.device;
        self.shared.set_status(SimulatorStatus::Stopping);

        if let Some(running) = update_loop.take() {
            running.shutdown(device.id).await;
        }

        let stopped = self.backend.lock().await.stop().await;
        if let Err(e) = stopped {
            let err = SimulationError::Stop { device: device.id, reason: e.to_string() };
            self.shared.fail(&err);
            return Err(err);
        }

        self.shared.addresses.lock().clear();
        self.shared.error.lock().take();
        self.shared.set_status(SimulatorStatus::Stopped);

        tracing::info!(device = device.id, "Stopped simulation for {}", device.name);
        Ok(())
    }

    /// Device being simulated.
    pub fn device(&self) -> &Device {
        &self.shared.device
    }

    /// Sensor definitions this simulator was built from.
    pub fn definitions(&self) -> &[SensorDefinition] {
        &self.definitions
    }

    /// Current lifecycle status.
    pub fn status(&self) -> SimulatorStatus {
        *self.shared.status.lock()
    }

    /// Whether the update loop is active.
    pub fn is_running(&self) -> bool {
        self.status() == SimulatorStatus::Running
    }

    /// Message of the last failed start or stop.
    pub fn error_message(&self) -> Option<String> {
        self.shared.error.lock().clone()
    }

    /// Last computed value of every sensor, keyed by sensor name.
    ///
    /// Sensors without a computed value yet are omitted.
    pub fn current_values(&self) -> BTreeMap<String, SensorValue> {
        self.shared
            .runtimes
            .lock()
            .values()
            .filter_map(|runtime| {
                runtime.current().map(|value| (runtime.definition().name.clone(), value))
            })
            .collect()
    }

    /// Addresses bound by the backend while running.
    pub fn addresses(&self) -> AddressMap {
        self.shared.addresses.lock().clone()
    }

    /// Completed update cycles.
    pub fn cycles(&self) -> u64 {
        self.shared.cycles.load(Ordering::Relaxed)
    }

    /// Publish calls that failed.
    pub fn publish_failures(&self) -> u64 {
        self.shared.publish_failures.load(Ordering::Relaxed)
    }

    /// Serializable snapshot of the whole simulator.
    pub fn state(&self) -> SimulatorState {
        let device = &self.shared.device;
        let addresses = self.addresses();
        let sensors = self
            .shared
            .runtimes
            .lock()
            .values()
            .map(|runtime| {
                let definition = runtime.definition();
                SensorState {
                    id: definition.id,
                    name: definition.name.clone(),
                    unit: definition.unit.clone(),
                    data_type: definition.data_type,
                    value: runtime.current(),
                    address: addresses.get(&definition.id).cloned(),
                }
            })
            .collect();

        SimulatorState {
            device_id: device.id,
            name: device.name.clone(),
            protocol: device.protocol,
            endpoint: device.endpoint(),
            status: self.status(),
            error: self.error_message(),
            cycles: self.cycles(),
            publish_failures: self.publish_failures(),
            sensors,
        }
    }
}

impl<E> fmt::Debug for DeviceSimulator<E>
where
    E: Environment,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSimulator")
            .field("device", &self.shared.device.id)
            .field("status", &self.status())
            .field("sensors", &self.definitions.len())
            .finish_non_exhaustive()
    }
}
