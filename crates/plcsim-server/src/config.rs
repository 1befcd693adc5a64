//! Simulation file loading.
//!
//! A simulation file is JSON listing devices and their sensors:
//!
//! ```json
//! {
//!   "update_interval_ms": 1000,
//!   "devices": [
//!     {
//!       "id": 1,
//!       "name": "Press-01",
//!       "protocol": "modbus",
//!       "port": 5020,
//!       "sensors": [
//!         { "id": 1, "name": "Temp", "unit": "°C", "simulation": "sine", "min": 20, "max": 80 },
//!         { "id": 2, "name": "Count", "data_type": "int", "simulation": "ramp", "max": 500 }
//!       ]
//!     }
//!   ]
//! }
//! ```
//!
//! Omitted fields fall back to: host `127.0.0.1`, the protocol's default
//! port, enabled, FLOAT, RANDOM, range `[0, 100]`, initial `0`.

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    time::Duration,
};

use plcsim_core::{
    DEFAULT_HOST, DataType, Device, DeviceId, ProtocolKind, SensorDefinition, SensorId,
    SimulationKind, validate_definitions,
};
use serde::Deserialize;

/// Errors from loading a simulation file
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("failed to read {path}: {source}")]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// File is not valid JSON for the schema
    #[error("failed to parse simulation file: {0}")]
    Parse(#[from] serde_json::Error),

    /// File parsed but describes an invalid setup
    #[error("invalid simulation file: {0}")]
    Invalid(String),
}

/// One sensor entry of a device.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SensorEntry {
    /// Sensor ID
    pub id: SensorId,
    /// Display name
    pub name: String,
    /// Engineering unit
    #[serde(default)]
    pub unit: Option<String>,
    /// Value type
    #[serde(default = "default_data_type")]
    pub data_type: DataType,
    /// Waveform rule
    #[serde(default = "default_simulation")]
    pub simulation: SimulationKind,
    /// Lower bound
    #[serde(default)]
    pub min: f64,
    /// Upper bound
    #[serde(default = "default_max")]
    pub max: f64,
    /// Initial value
    #[serde(default)]
    pub initial: f64,
    /// Explicit start register
    #[serde(default)]
    pub address: Option<u16>,
}

/// One device entry.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceEntry {
    /// Device ID
    pub id: DeviceId,
    /// Display name
    pub name: String,
    /// Exposed protocol
    pub protocol: ProtocolKind,
    /// Bind host
    #[serde(default)]
    pub host: Option<String>,
    /// Bind port, defaults to the protocol's port
    #[serde(default)]
    pub port: Option<u16>,
    /// Whether to simulate this device
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Sensors of the device
    #[serde(default)]
    pub sensors: Vec<SensorEntry>,
}

/// Parsed simulation file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimulationFile {
    /// Update interval override in milliseconds
    #[serde(default)]
    pub update_interval_ms: Option<u64>,
    /// Devices to simulate
    pub devices: Vec<DeviceEntry>,
}

fn default_data_type() -> DataType {
    DataType::Float
}

fn default_simulation() -> SimulationKind {
    SimulationKind::Random
}

fn default_max() -> f64 {
    100.0
}

fn default_enabled() -> bool {
    true
}

impl SensorEntry {
    fn to_definition(&self, device_id: DeviceId) -> SensorDefinition {
        SensorDefinition {
            id: self.id,
            device_id,
            name: self.name.clone(),
            unit: self.unit.clone(),
            data_type: self.data_type,
            simulation: self.simulation,
            min: self.min,
            max: self.max,
            initial: self.initial,
            address: self.address,
        }
    }
}

impl DeviceEntry {
    /// Device and sensor definitions described by this entry.
    pub fn to_definitions(&self) -> (Device, Vec<SensorDefinition>) {
        let device = Device {
            id: self.id,
            name: self.name.clone(),
            host: self.host.clone().unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: self.port.unwrap_or_else(|| self.protocol.default_port()),
            protocol: self.protocol,
            enabled: self.enabled,
        };
        let sensors = self.sensors.iter().map(|s| s.to_definition(self.id)).collect();
        (device, sensors)
    }
}

impl SimulationFile {
    /// Read and validate a simulation file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        Self::from_json(&text)
    }

    /// Parse and validate a simulation file from a string.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let file: Self = serde_json::from_str(text)?;
        file.validate()?;
        Ok(file)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.update_interval_ms == Some(0) {
            return Err(ConfigError::Invalid("update_interval_ms must be positive".to_string()));
        }

        let mut ids = HashSet::with_capacity(self.devices.len());
        for entry in &self.devices {
            if !ids.insert(entry.id) {
                return Err(ConfigError::Invalid(format!("duplicate device id: {}", entry.id)));
            }
            let (device, sensors) = entry.to_definitions();
            validate_definitions(&device, &sensors)
                .map_err(|e| ConfigError::Invalid(format!("device {}: {e}", device.name)))?;
        }
        Ok(())
    }

    /// Update interval from the file, if set.
    pub fn update_interval(&self) -> Option<Duration> {
        self.update_interval_ms.map(Duration::from_millis)
    }

    /// Definitions of every enabled device, in file order.
    pub fn enabled_devices(&self) -> Vec<(Device, Vec<SensorDefinition>)> {
        self.devices
            .iter()
            .filter(|entry| entry.enabled)
            .map(DeviceEntry::to_definitions)
            .collect()
    }
}
