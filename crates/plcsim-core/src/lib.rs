//! PLC simulator core.
//!
//! Runtime-free domain model for simulated industrial devices: device and
//! sensor definitions, waveform generators, and the contract protocol
//! backends implement. Nothing in this crate opens sockets or spawns tasks;
//! time and entropy come from an injected [`Environment`].
//!
//! ## Architecture
//!
//! ```text
//! plcsim-core
//!   ├─ Environment        (clock + entropy abstraction)
//!   ├─ Device / Sensor    (immutable run inputs, validation)
//!   ├─ ValueGenerator     (per-sensor waveform state)
//!   ├─ ProtocolBackend    (start / stop / publish contract)
//!   ├─ RegisterAllocator  (register layout + encoding for Modbus)
//!   └─ NodeTree           (address space for OPC UA)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod device;
pub mod env;
pub mod generator;
pub mod nodes;
pub mod registers;
pub mod sensor;

pub use backend::{AddressMap, BackendError, ProtocolBackend, SensorAddress, ValueSnapshot};
pub use device::{DEFAULT_HOST, Device, DeviceId, ProtocolKind};
pub use env::Environment;
pub use generator::ValueGenerator;
pub use nodes::{NodeId, NodeTree, PATH_SEPARATOR, VariantType};
pub use registers::{RegisterAllocator, RegisterBank, RegisterError, RegisterLayout, RegisterSlot};
pub use sensor::{
    DataType, DefinitionError, SensorDefinition, SensorId, SensorValue, SimulationKind,
    validate_definitions,
};
