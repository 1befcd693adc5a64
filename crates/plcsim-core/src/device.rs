//! Simulated devices and the protocol they expose.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a simulated device.
pub type DeviceId = u64;

/// Host used when a device definition does not name one.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Protocol a device exposes its sensors through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolKind {
    /// Fixed-width register protocol (Modbus TCP holding registers).
    Modbus,
    /// Hierarchical node protocol (OPC UA address space).
    OpcUa,
}

impl ProtocolKind {
    /// Conventional listening port for this protocol.
    pub const fn default_port(self) -> u16 {
        match self {
            Self::Modbus => 5020,
            Self::OpcUa => 4840,
        }
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Modbus => f.write_str("modbus"),
            Self::OpcUa => f.write_str("opc_ua"),
        }
    }
}

/// A simulated industrial machine.
///
/// Immutable for the duration of one simulation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Device ID
    pub id: DeviceId,
    /// Display name, also used for the OPC UA folder and namespace
    pub name: String,
    /// Address the protocol server binds to
    pub host: String,
    /// Port the protocol server binds to
    pub port: u16,
    /// Protocol exposed by this device
    pub protocol: ProtocolKind,
    /// Whether the device takes part in simulation
    pub enabled: bool,
}

impl Device {
    /// Create an enabled device bound to the default host and protocol port.
    pub fn new(id: DeviceId, name: impl Into<String>, protocol: ProtocolKind) -> Self {
        Self {
            id,
            name: name.into(),
            host: DEFAULT_HOST.to_string(),
            port: protocol.default_port(),
            protocol,
            enabled: true,
        }
    }

    /// Override the bind address.
    #[must_use]
    pub fn with_endpoint(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }

    /// `host:port` the backend binds to.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
