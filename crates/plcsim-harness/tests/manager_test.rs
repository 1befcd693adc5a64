//! Simulation manager tests
//!
//! These tests verify the registry invariants:
//! - At most one live backend per device, even across restarts
//! - Old instances are torn down before a new backend binds
//! - Failed starts leave no entry, failed stops keep the entry in `Error`
//! - `stop_all` processes every device regardless of individual failures

use std::{sync::Arc, time::Duration};

use plcsim_core::{DataType, Device, DeviceId, ProtocolKind, SensorDefinition, SimulationKind};
use plcsim_harness::{BackendEvent, MockFactory, MockNetwork, SimEnv};
use plcsim_server::{SimulationError, SimulationManager, SimulatorConfig, SimulatorStatus};

fn manager(network: &MockNetwork) -> SimulationManager<SimEnv> {
    SimulationManager::new(
        SimEnv::default(),
        Arc::new(MockFactory::new(network.clone())),
        SimulatorConfig::default(),
    )
}

fn device(id: DeviceId) -> (Device, Vec<SensorDefinition>) {
    #[allow(clippy::cast_possible_truncation)]
    let port = 5020 + id as u16;
    let device = Device::new(id, format!("Machine-{id}"), ProtocolKind::Modbus)
        .with_endpoint("127.0.0.1", port);
    let sensors = vec![
        SensorDefinition::new(id * 10, id, "Temp").with_simulation(SimulationKind::Sine),
        SensorDefinition::new(id * 10 + 1, id, "Count").with_type(DataType::Int),
    ];
    (device, sensors)
}

// Oracle: at most one live backend per registered device
fn verify_single_backend(network: &MockNetwork, manager: &SimulationManager<SimEnv>) {
    for id in manager.running() {
        assert_eq!(network.live_backends(id), 1, "device {id} has duplicate backends");
    }
    assert!(network.bound_count() <= manager.len());
}

#[tokio::test(start_paused = true)]
async fn start_registers_running_device() {
    let network = MockNetwork::new();
    let manager = manager(&network);
    let (device, sensors) = device(1);

    manager.start_simulation(device, sensors).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(manager.is_running(1));
    assert_eq!(manager.status(1), SimulatorStatus::Running);
    assert_eq!(manager.running(), vec![1]);
    assert_eq!(manager.current_values(1).len(), 2);
    assert_eq!(manager.addresses(1).len(), 2);
    assert_eq!(manager.state(1).map(|s| s.status), Some(SimulatorStatus::Running));
    verify_single_backend(&network, &manager);

    manager.stop_all().await;
}

#[tokio::test(start_paused = true)]
async fn double_start_leaves_one_live_backend() {
    let network = MockNetwork::new();
    let manager = manager(&network);
    let (device, sensors) = device(1);

    manager.start_simulation(device.clone(), sensors.clone()).await.unwrap();
    manager.start_simulation(device, sensors).await.unwrap();

    assert_eq!(network.live_backends(1), 1);
    assert_eq!(manager.len(), 1);

    let lifecycle: Vec<_> = network
        .events_for(1)
        .into_iter()
        .filter(|e| !matches!(e, BackendEvent::Published { .. }))
        .collect();
    assert_eq!(
        lifecycle,
        vec![
            BackendEvent::Started { device: 1, endpoint: "127.0.0.1:5021".to_string() },
            BackendEvent::Stopped { device: 1 },
            BackendEvent::Started { device: 1, endpoint: "127.0.0.1:5021".to_string() },
        ]
    );
    verify_single_backend(&network, &manager);

    manager.stop_all().await;
}

#[tokio::test(start_paused = true)]
async fn concurrent_starts_leave_one_live_backend() {
    let network = MockNetwork::new();
    let manager = manager(&network);
    let (device, sensors) = device(1);

    let (a, b) = tokio::join!(
        manager.start_simulation(device.clone(), sensors.clone()),
        manager.start_simulation(device, sensors),
    );

    assert!(a.is_ok());
    assert!(b.is_ok());
    assert_eq!(network.live_backends(1), 1);
    verify_single_backend(&network, &manager);

    manager.stop_all().await;
}

#[tokio::test(start_paused = true)]
async fn failed_start_leaves_no_entry() {
    let network = MockNetwork::new();
    network.fail_start(1, true);
    let manager = manager(&network);
    let (device, sensors) = device(1);

    let err = manager.start_simulation(device, sensors).await.unwrap_err();

    assert!(matches!(err, SimulationError::Start { device: 1, .. }));
    assert!(manager.is_empty());
    assert_eq!(manager.status(1), SimulatorStatus::Stopped);
    assert_eq!(manager.error_message(1), None);
    assert!(manager.current_values(1).is_empty());
}

#[tokio::test(start_paused = true)]
async fn invalid_definitions_rejected_before_backend() {
    let network = MockNetwork::new();
    let manager = manager(&network);
    let (device, _) = device(1);
    let sensors = vec![
        SensorDefinition::new(1, 1, "Temp"),
        SensorDefinition::new(2, 1, "Temp"),
    ];

    let err = manager.start_simulation(device, sensors).await.unwrap_err();

    assert!(matches!(err, SimulationError::InvalidDefinition { device: 1, .. }));
    assert!(err.is_invalid_request());
    assert!(network.events().is_empty());
    assert!(manager.is_empty());
}

#[tokio::test(start_paused = true)]
async fn slash_in_sensor_name_rejected_before_backend() {
    let network = MockNetwork::new();
    let manager = manager(&network);
    let device = Device::new(2, "Oven-01", ProtocolKind::OpcUa);
    let sensors = vec![SensorDefinition::new(1, 2, "Zone 1/Temp")];

    let err = manager.start_simulation(device, sensors).await.unwrap_err();

    assert!(matches!(err, SimulationError::InvalidDefinition { device: 2, .. }));
    assert!(network.events().is_empty());
    assert!(manager.is_empty());
}

#[tokio::test(start_paused = true)]
async fn stop_unknown_device_is_noop() {
    let network = MockNetwork::new();
    let manager = manager(&network);

    manager.stop_simulation(99).await.unwrap();

    assert!(network.events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn stop_removes_entry() {
    let network = MockNetwork::new();
    let manager = manager(&network);
    let (device, sensors) = device(1);
    manager.start_simulation(device, sensors).await.unwrap();

    manager.stop_simulation(1).await.unwrap();

    assert!(manager.is_empty());
    assert_eq!(manager.status(1), SimulatorStatus::Stopped);
    assert_eq!(network.live_backends(1), 0);
}

#[tokio::test(start_paused = true)]
async fn failed_stop_keeps_entry_in_error() {
    let network = MockNetwork::new();
    let manager = manager(&network);
    let (device, sensors) = device(1);
    manager.start_simulation(device, sensors).await.unwrap();

    network.fail_stop(1, true);
    let err = manager.stop_simulation(1).await.unwrap_err();

    assert!(matches!(err, SimulationError::Stop { device: 1, .. }));
    assert_eq!(manager.len(), 1);
    assert_eq!(manager.status(1), SimulatorStatus::Error);
    assert_eq!(manager.error_message(1), Some(err.to_string()));
    assert!(!manager.is_running(1));
    assert!(manager.running().is_empty());

    network.fail_stop(1, false);
    manager.stop_simulation(1).await.unwrap();

    assert!(manager.is_empty());
    assert_eq!(network.live_backends(1), 0);
}

#[tokio::test(start_paused = true)]
async fn restart_aborts_when_old_instance_will_not_stop() {
    let network = MockNetwork::new();
    let manager = manager(&network);
    let (device, sensors) = device(1);
    manager.start_simulation(device.clone(), sensors.clone()).await.unwrap();

    network.fail_stop(1, true);
    let err = manager.start_simulation(device, sensors).await.unwrap_err();

    assert!(matches!(err, SimulationError::Stop { device: 1, .. }));
    assert_eq!(manager.status(1), SimulatorStatus::Error);
    assert_eq!(network.live_backends(1), 1);

    let starts = network
        .events_for(1)
        .iter()
        .filter(|e| matches!(e, BackendEvent::Started { .. } | BackendEvent::StartFailed { .. }))
        .count();
    assert_eq!(starts, 1, "no second backend may be started");

    network.fail_stop(1, false);
    manager.stop_all().await;
}

#[tokio::test(start_paused = true)]
async fn restart_simulation_reuses_definitions() {
    let network = MockNetwork::new();
    let manager = manager(&network);
    let (device, sensors) = device(2);
    manager.start_simulation(device, sensors).await.unwrap();

    manager.restart_simulation(2).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(manager.is_running(2));
    assert_eq!(manager.current_values(2).keys().collect::<Vec<_>>(), vec!["Count", "Temp"]);
    assert_eq!(network.live_backends(2), 1);

    let err = manager.restart_simulation(3).await.unwrap_err();
    assert_eq!(err, SimulationError::UnknownDevice(3));

    manager.stop_all().await;
}

#[tokio::test(start_paused = true)]
async fn stop_all_continues_past_failures() {
    let network = MockNetwork::new();
    let manager = manager(&network);
    for id in 1..=3 {
        let (device, sensors) = device(id);
        manager.start_simulation(device, sensors).await.unwrap();
    }
    network.fail_stop(2, true);

    let report = manager.stop_all().await;

    assert_eq!(report.stopped, vec![1, 3]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, 2);
    assert!(!report.is_clean());

    assert_eq!(manager.len(), 1);
    assert_eq!(manager.status(2), SimulatorStatus::Error);
    assert_eq!(network.live_backends(1), 0);
    assert_eq!(network.live_backends(3), 0);

    network.fail_stop(2, false);
    let report = manager.stop_all().await;

    assert_eq!(report.stopped, vec![2]);
    assert!(report.is_clean());
    assert!(manager.is_empty());
}

#[tokio::test(start_paused = true)]
async fn queries_do_not_wait_for_lifecycle() {
    let network = MockNetwork::new();
    let manager = Arc::new(manager(&network));
    let (device, sensors) = device(1);
    manager.start_simulation(device, sensors).await.unwrap();

    let guard = tokio::spawn({
        let manager = Arc::clone(&manager);
        async move { manager.stop_all().await }
    });

    // Queries answer immediately whether or not the stop has run yet
    let status = manager.status(1);
    assert!(matches!(status, SimulatorStatus::Running | SimulatorStatus::Stopped));
    let _ = manager.current_values(1);

    let report = guard.await.unwrap();
    assert_eq!(report.stopped, vec![1]);
}
