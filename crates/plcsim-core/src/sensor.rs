//! Sensor definitions and the typed values they produce.

use std::{collections::HashSet, fmt};

use serde::{Deserialize, Serialize};

use crate::{
    device::{Device, DeviceId},
    nodes::PATH_SEPARATOR,
};

/// Identifier of a sensor definition.
pub type SensorId = u64;

/// Declared type of a sensor's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    /// Two-decimal floating point value
    Float,
    /// Signed integer value
    Int,
    /// Boolean value
    Bool,
}

impl DataType {
    /// Number of 16-bit registers a value of this type occupies.
    pub const fn register_width(self) -> u16 {
        match self {
            Self::Float => 2,
            Self::Int | Self::Bool => 1,
        }
    }
}

/// Rule governing how a sensor's value evolves over time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulationKind {
    /// Independent uniform sample in `[min, max]` on every read
    Random,
    /// Sine wave between `min` and `max` with a 10 s period
    Sine,
    /// Uniform sample held for 2 s windows
    Step,
    /// Triangular wave crossing the range in 20 s
    Ramp,
    /// Always the initial value
    Constant,
}

/// Immutable description of one sensor on a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorDefinition {
    /// Sensor ID
    pub id: SensorId,
    /// Device this sensor belongs to
    pub device_id: DeviceId,
    /// Display name, keys the current-values snapshot
    pub name: String,
    /// Engineering unit, e.g. `°C`
    pub unit: Option<String>,
    /// Declared value type
    pub data_type: DataType,
    /// Waveform rule
    pub simulation: SimulationKind,
    /// Lower bound of the simulated range
    pub min: f64,
    /// Upper bound of the simulated range
    pub max: f64,
    /// Value before the first change (and the CONSTANT value)
    pub initial: f64,
    /// Explicit start register (register protocols only)
    pub address: Option<u16>,
}

impl SensorDefinition {
    /// Create a FLOAT RANDOM sensor over `[0, 100]`.
    pub fn new(id: SensorId, device_id: DeviceId, name: impl Into<String>) -> Self {
        Self {
            id,
            device_id,
            name: name.into(),
            unit: None,
            data_type: DataType::Float,
            simulation: SimulationKind::Random,
            min: 0.0,
            max: 100.0,
            initial: 0.0,
            address: None,
        }
    }

    /// Set the data type.
    #[must_use]
    pub fn with_type(mut self, data_type: DataType) -> Self {
        self.data_type = data_type;
        self
    }

    /// Set the simulation kind.
    #[must_use]
    pub fn with_simulation(mut self, simulation: SimulationKind) -> Self {
        self.simulation = simulation;
        self
    }

    /// Set the simulated range.
    #[must_use]
    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    /// Set the initial value.
    #[must_use]
    pub fn with_initial(mut self, initial: f64) -> Self {
        self.initial = initial;
        self
    }

    /// Set the engineering unit.
    #[must_use]
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Pin the sensor to an explicit start register.
    #[must_use]
    pub fn with_address(mut self, address: u16) -> Self {
        self.address = Some(address);
        self
    }

    fn validate(&self) -> Result<(), DefinitionError> {
        for (field, value) in [("min", self.min), ("max", self.max), ("initial", self.initial)] {
            if !value.is_finite() {
                return Err(DefinitionError::NonFinite { sensor: self.id, field });
            }
        }
        if self.min > self.max {
            return Err(DefinitionError::InvertedRange {
                sensor: self.id,
                min: self.min,
                max: self.max,
            });
        }
        Ok(())
    }
}

/// Check a device's sensor list before a run starts.
///
/// Sensors must belong to `device`, have unique ids and names, finite bounds
/// and `min <= max`. Device and sensor names become node browse path
/// segments, so neither may contain [`PATH_SEPARATOR`].
pub fn validate_definitions(
    device: &Device,
    sensors: &[SensorDefinition],
) -> Result<(), DefinitionError> {
    if device.name.contains(PATH_SEPARATOR) {
        return Err(DefinitionError::InvalidName(device.name.clone()));
    }

    let mut ids = HashSet::with_capacity(sensors.len());
    let mut names = HashSet::with_capacity(sensors.len());

    for sensor in sensors {
        if sensor.device_id != device.id {
            return Err(DefinitionError::ForeignSensor {
                sensor: sensor.id,
                owner: sensor.device_id,
                device: device.id,
            });
        }
        if !ids.insert(sensor.id) {
            return Err(DefinitionError::DuplicateId(sensor.id));
        }
        if sensor.name.contains(PATH_SEPARATOR) {
            return Err(DefinitionError::InvalidName(sensor.name.clone()));
        }
        if !names.insert(sensor.name.as_str()) {
            return Err(DefinitionError::DuplicateName(sensor.name.clone()));
        }
        sensor.validate()?;
    }

    Ok(())
}

/// Errors from sensor definition validation
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DefinitionError {
    /// Sensor is attached to another device
    #[error("sensor {sensor} belongs to device {owner}, not {device}")]
    ForeignSensor {
        /// Offending sensor
        sensor: SensorId,
        /// Device named by the sensor
        owner: DeviceId,
        /// Device being started
        device: DeviceId,
    },

    /// Two sensors share an id
    #[error("duplicate sensor id: {0}")]
    DuplicateId(SensorId),

    /// Two sensors share a display name
    #[error("duplicate sensor name: {0}")]
    DuplicateName(String),

    /// Device or sensor name contains the browse path separator
    #[error("name '{0}' must not contain '/'")]
    InvalidName(String),

    /// A bound is NaN or infinite
    #[error("sensor {sensor}: {field} is not finite")]
    NonFinite {
        /// Offending sensor
        sensor: SensorId,
        /// Field name
        field: &'static str,
    },

    /// `min` exceeds `max`
    #[error("sensor {sensor}: min {min} exceeds max {max}")]
    InvertedRange {
        /// Offending sensor
        sensor: SensorId,
        /// Lower bound
        min: f64,
        /// Upper bound
        max: f64,
    },
}

/// A generated sensor value, typed by the sensor's [`DataType`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SensorValue {
    /// FLOAT value, rounded to two decimals
    Float(f64),
    /// INT value
    Int(i64),
    /// BOOL value
    Bool(bool),
}

impl SensorValue {
    /// Numeric view of the value (`true` is 1.0).
    pub fn as_f64(self) -> f64 {
        match self {
            Self::Float(v) => v,
            #[allow(clippy::cast_precision_loss)]
            Self::Int(v) => v as f64,
            Self::Bool(v) => f64::from(u8::from(v)),
        }
    }

    /// Data type this value carries.
    pub const fn data_type(self) -> DataType {
        match self {
            Self::Float(_) => DataType::Float,
            Self::Int(_) => DataType::Int,
            Self::Bool(_) => DataType::Bool,
        }
    }
}

impl fmt::Display for SensorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Float(v) => write!(f, "{v:.2}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
        }
    }
}
