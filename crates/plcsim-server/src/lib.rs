//! PLC simulator server.
//!
//! This crate runs simulated devices on a tokio runtime:
//! - Tokio for the update loops and protocol listeners
//! - System time and OS randomness
//! - Modbus TCP and OPC UA backends
//!
//! ## Architecture
//!
//! ```text
//! plcsim-server
//!   ├─ SystemEnv          (production Environment impl)
//!   ├─ SimulationManager  (one simulator per device id)
//!   ├─ DeviceSimulator    (state machine + update loop)
//!   ├─ SensorRuntime      (definition + generator + last value)
//!   ├─ NetworkBackends    (BackendFactory for real backends)
//!   │    ├─ ModbusBackend (register bank + MBAP responder)
//!   │    └─ OpcUaBackend  (node tree + opc.tcp listener)
//!   └─ SimulationFile     (JSON device definitions)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
mod config;
mod error;
mod manager;
pub mod mbap;
mod sensor_runtime;
mod simulator;
mod system_env;

pub use backend::{BackendFactory, ModbusBackend, NetworkBackends, OpcUaBackend};
pub use config::{ConfigError, DeviceEntry, SensorEntry, SimulationFile};
pub use error::SimulationError;
pub use manager::{SimulationManager, StopAllReport};
pub use sensor_runtime::SensorRuntime;
pub use simulator::{
    DEFAULT_UPDATE_INTERVAL, DeviceSimulator, SensorState, SharedBackend, SimulatorConfig,
    SimulatorState, SimulatorStatus,
};
pub use system_env::SystemEnv;
