//! Simulation error types.

use plcsim_core::{DefinitionError, DeviceId};

/// Errors surfaced by simulators and the simulation manager.
///
/// Start and stop failures also leave their message on the simulator, so the
/// `Display` text here is what `error_message()` reports.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SimulationError {
    /// Backend could not start (bind failure, allocation failure)
    #[error("failed to start device {device}: {reason}")]
    Start {
        /// Device being started
        device: DeviceId,
        /// Backend error text
        reason: String,
    },

    /// Backend could not be torn down
    #[error("failed to stop device {device}: {reason}")]
    Stop {
        /// Device being stopped
        device: DeviceId,
        /// Backend error text
        reason: String,
    },

    /// A snapshot could not be written to the backend
    #[error("failed to publish values for device {device}: {reason}")]
    Publish {
        /// Device whose snapshot was dropped
        device: DeviceId,
        /// Backend error text
        reason: String,
    },

    /// Operation names a device that is not registered
    #[error("unknown device: {0}")]
    UnknownDevice(DeviceId),

    /// Sensor definitions failed validation
    #[error("invalid definitions for device {device}: {source}")]
    InvalidDefinition {
        /// Device being started
        device: DeviceId,
        /// Validation failure
        #[source]
        source: DefinitionError,
    },
}

impl SimulationError {
    /// Device the error concerns.
    pub fn device(&self) -> DeviceId {
        match self {
            Self::Start { device, .. }
            | Self::Stop { device, .. }
            | Self::Publish { device, .. }
            | Self::InvalidDefinition { device, .. }
            | Self::UnknownDevice(device) => *device,
        }
    }

    /// Whether the failure is recovered locally and leaves state unchanged.
    ///
    /// Only publish failures are transient; the update loop keeps running.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Publish { .. })
    }

    /// Whether the caller asked for something invalid, as opposed to a
    /// backend failing.
    pub fn is_invalid_request(&self) -> bool {
        matches!(self, Self::UnknownDevice(_) | Self::InvalidDefinition { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_publish_is_transient() {
        let publish = SimulationError::Publish { device: 1, reason: "reset".to_string() };
        let start = SimulationError::Start { device: 1, reason: "address in use".to_string() };
        let stop = SimulationError::Stop { device: 1, reason: "stuck".to_string() };

        assert!(publish.is_transient());
        assert!(!start.is_transient());
        assert!(!stop.is_transient());
    }

    #[test]
    fn invalid_requests() {
        let unknown = SimulationError::UnknownDevice(9);
        let invalid = SimulationError::InvalidDefinition {
            device: 2,
            source: DefinitionError::DuplicateId(4),
        };

        assert!(unknown.is_invalid_request());
        assert!(invalid.is_invalid_request());
        assert_eq!(unknown.device(), 9);
        assert_eq!(invalid.device(), 2);
        assert_eq!(
            invalid.to_string(),
            "invalid definitions for device 2: duplicate sensor id: 4"
        );
    }

    #[test]
    fn start_message_carries_backend_reason() {
        let err = SimulationError::Start {
            device: 3,
            reason: "failed to bind 127.0.0.1:5020: address in use".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "failed to start device 3: failed to bind 127.0.0.1:5020: address in use"
        );
        assert!(!err.is_invalid_request());
    }
}
