//! Deterministic simulation harness for the PLC simulator.
//!
//! Provides a virtual-time [`SimEnv`] and in-memory protocol backends, so
//! simulator and manager behavior can be tested without sockets or wall-clock
//! waits.
//!
//! # Example
//!
//! ```rust,ignore
//! #[tokio::test(start_paused = true)]
//! async fn publishes_every_second() {
//!     let network = MockNetwork::new();
//!     let manager = SimulationManager::new(
//!         SimEnv::default(),
//!         Arc::new(MockFactory::new(network.clone())),
//!         SimulatorConfig::default(),
//!     );
//!
//!     manager.start_simulation(device, sensors).await?;
//!     tokio::time::sleep(Duration::from_millis(2500)).await;
//!
//!     assert_eq!(network.published(device_id).len(), 3);
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod mock_backend;
mod sim_env;

pub use mock_backend::{BackendEvent, MockBackend, MockFactory, MockNetwork};
pub use sim_env::{DEFAULT_SEED, SimEnv};
