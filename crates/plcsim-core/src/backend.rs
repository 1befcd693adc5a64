//! Protocol backend contract.
//!
//! A backend is the protocol stack that exposes a device's sensor values to
//! network clients. The simulator only ever talks to this trait; concrete
//! variants (register-based Modbus, node-based OPC UA, test mocks) live in
//! other crates and are selected by [`ProtocolKind`].
//!
//! ## Lifecycle
//!
//! ```text
//! new ──start()──> started ──stop()──> stopped ──start()──> started ...
//!                    │
//!                 publish()*
//! ```
//!
//! - `start` on a started backend fails with [`BackendError::AlreadyStarted`]
//! - `publish` before `start` fails with [`BackendError::NotStarted`]
//! - `stop` on a stopped backend succeeds

use std::{collections::BTreeMap, fmt};

use async_trait::async_trait;
use serde::Serialize;

use crate::{
    device::{Device, ProtocolKind},
    registers::RegisterError,
    sensor::{SensorDefinition, SensorId, SensorValue},
};

/// Where a client finds a sensor's value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SensorAddress {
    /// Contiguous holding registers
    Registers {
        /// First register
        start: u16,
        /// Number of registers
        count: u16,
    },
    /// Variable node in a hierarchical address space
    Node {
        /// Browse path, e.g. `Objects/Machines/Press-01/Temp`
        path: String,
        /// Node index inside the backend's tree
        node_id: u32,
    },
}

impl fmt::Display for SensorAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Registers { start, count } => {
                write!(f, "hr[{start}..{}]", u32::from(*start) + u32::from(*count))
            },
            Self::Node { path, .. } => f.write_str(path),
        }
    }
}

/// Address bound to each sensor by a started backend.
pub type AddressMap = BTreeMap<SensorId, SensorAddress>;

/// Snapshot of sensor values handed to [`ProtocolBackend::publish`].
pub type ValueSnapshot = BTreeMap<SensorId, SensorValue>;

/// Errors raised by protocol backends
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Listener could not bind the device endpoint
    #[error("failed to bind {endpoint}: {reason}")]
    Bind {
        /// `host:port` that was requested
        endpoint: String,
        /// Underlying cause
        reason: String,
    },

    /// `start` called on a started backend
    #[error("backend already started")]
    AlreadyStarted,

    /// `publish` called before `start`
    #[error("backend not started")]
    NotStarted,

    /// Register allocation or access failed
    #[error("register error: {0}")]
    Registers(#[from] RegisterError),

    /// Socket level failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The backend refused the operation
    #[error("rejected: {reason}")]
    Rejected {
        /// Why
        reason: String,
    },
}

/// Protocol stack exposing one device's sensors.
///
/// Implementations are owned by exactly one simulator, which serializes all
/// calls. `publish` always carries the full snapshot, not a delta.
#[async_trait]
pub trait ProtocolBackend: Send {
    /// Protocol this backend speaks.
    fn kind(&self) -> ProtocolKind;

    /// Allocate one addressable slot per sensor and start serving.
    ///
    /// Returns the address bound to every sensor in `sensors`.
    async fn start(
        &mut self,
        device: &Device,
        sensors: &[SensorDefinition],
    ) -> Result<AddressMap, BackendError>;

    /// Stop serving and release the endpoint.
    ///
    /// Succeeds without effect when not started.
    async fn stop(&mut self) -> Result<(), BackendError>;

    /// Write a snapshot of sensor values into live protocol storage.
    ///
    /// Ids without a bound address are ignored.
    async fn publish(&mut self, values: &ValueSnapshot) -> Result<(), BackendError>;
}
