//! End-to-end scenarios: manager, simulator, generators and backend
//! addressing together, under virtual time.

use std::{sync::Arc, time::Duration};

use plcsim_core::{
    DataType, Device, ProtocolKind, SensorAddress, SensorDefinition, SensorValue, SimulationKind,
};
use plcsim_harness::{MockFactory, MockNetwork, SimEnv};
use plcsim_server::{SimulationManager, SimulatorConfig, SimulatorStatus};
use proptest::prelude::*;

fn press_sensors(device: u64) -> Vec<SensorDefinition> {
    vec![
        SensorDefinition::new(1, device, "Temp")
            .with_simulation(SimulationKind::Sine)
            .with_range(0.0, 100.0),
        SensorDefinition::new(2, device, "Count")
            .with_type(DataType::Int)
            .with_simulation(SimulationKind::Random)
            .with_range(0.0, 10.0),
        SensorDefinition::new(3, device, "Running")
            .with_type(DataType::Bool)
            .with_simulation(SimulationKind::Constant)
            .with_range(0.0, 1.0)
            .with_initial(1.0),
    ]
}

fn manager(network: &MockNetwork) -> SimulationManager<SimEnv> {
    SimulationManager::new(
        SimEnv::default(),
        Arc::new(MockFactory::new(network.clone())),
        SimulatorConfig::default(),
    )
}

#[tokio::test(start_paused = true)]
async fn press_reports_typed_values() {
    let network = MockNetwork::new();
    let manager = manager(&network);
    let device = Device::new(1, "Press-01", ProtocolKind::Modbus);

    manager.start_simulation(device, press_sensors(1)).await.unwrap();

    for _ in 0..10 {
        tokio::time::sleep(Duration::from_millis(700)).await;

        let values = manager.current_values(1);
        assert_eq!(values.len(), 3);

        let SensorValue::Float(temp) = values["Temp"] else {
            panic!("Temp must be a float, got {:?}", values["Temp"]);
        };
        assert!((0.0..=100.0).contains(&temp));
        assert!((temp * 100.0 - (temp * 100.0).round()).abs() < 1e-6, "two decimals: {temp}");

        let SensorValue::Int(count) = values["Count"] else {
            panic!("Count must be an int, got {:?}", values["Count"]);
        };
        assert!((0..=10).contains(&count));

        assert_eq!(values["Running"], SensorValue::Bool(true));
    }

    manager.stop_all().await;
}

#[tokio::test(start_paused = true)]
async fn press_values_present_right_after_start() {
    let network = MockNetwork::new();
    let manager = manager(&network);
    let device = Device::new(1, "Press-01", ProtocolKind::Modbus);

    manager.start_simulation(device, press_sensors(1)).await.unwrap();

    let values = manager.current_values(1);
    assert_eq!(values.keys().collect::<Vec<_>>(), vec!["Count", "Running", "Temp"]);
    assert!(matches!(values["Temp"], SensorValue::Float(_)));
    assert!(matches!(values["Count"], SensorValue::Int(0..=10)));
    assert_eq!(values["Running"], SensorValue::Bool(true));

    manager.stop_all().await;
}

#[tokio::test(start_paused = true)]
async fn press_registers_are_contiguous() {
    let network = MockNetwork::new();
    let manager = manager(&network);
    let device = Device::new(1, "Press-01", ProtocolKind::Modbus);

    manager.start_simulation(device, press_sensors(1)).await.unwrap();
    let addresses = manager.addresses(1);

    assert_eq!(addresses[&1], SensorAddress::Registers { start: 0, count: 2 });
    assert_eq!(addresses[&2], SensorAddress::Registers { start: 2, count: 1 });
    assert_eq!(addresses[&3], SensorAddress::Registers { start: 3, count: 1 });

    manager.stop_all().await;
    assert!(manager.addresses(1).is_empty());
}

#[tokio::test(start_paused = true)]
async fn oven_exposes_machine_nodes() {
    let network = MockNetwork::new();
    let manager = manager(&network);
    let device = Device::new(2, "Oven-01", ProtocolKind::OpcUa);

    manager.start_simulation(device, press_sensors(2)).await.unwrap();
    let addresses = manager.addresses(2);

    let paths: Vec<String> = addresses.values().map(ToString::to_string).collect();
    assert_eq!(
        paths,
        vec![
            "Objects/Machines/Oven-01/Temp",
            "Objects/Machines/Oven-01/Count",
            "Objects/Machines/Oven-01/Running",
        ]
    );

    manager.stop_all().await;
}

#[tokio::test(start_paused = true)]
async fn devices_run_independently() {
    let network = MockNetwork::new();
    let manager = manager(&network);

    manager
        .start_simulation(Device::new(1, "Press-01", ProtocolKind::Modbus), press_sensors(1))
        .await
        .unwrap();
    manager
        .start_simulation(Device::new(2, "Oven-01", ProtocolKind::OpcUa), press_sensors(2))
        .await
        .unwrap();

    network.fail_publish(1, true);
    tokio::time::sleep(Duration::from_millis(2500)).await;

    assert_eq!(manager.status(1), SimulatorStatus::Running);
    assert_eq!(manager.state(1).map(|s| s.publish_failures), Some(3));
    assert_eq!(network.published(2).len(), 3);

    manager.stop_simulation(2).await.unwrap();
    assert_eq!(manager.running(), vec![1]);

    manager.stop_all().await;
}

fn data_types() -> impl Strategy<Value = DataType> {
    prop_oneof![Just(DataType::Float), Just(DataType::Int), Just(DataType::Bool)]
}

fn kinds() -> impl Strategy<Value = SimulationKind> {
    prop_oneof![
        Just(SimulationKind::Random),
        Just(SimulationKind::Sine),
        Just(SimulationKind::Step),
        Just(SimulationKind::Ramp),
        Just(SimulationKind::Constant),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn published_values_match_declared_types(
        specs in prop::collection::vec((data_types(), kinds(), -50.0f64..50.0, 0.0f64..100.0), 1..8),
        seed in any::<u64>(),
        ticks in 1u64..20,
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .unwrap();

        let sensors: Vec<SensorDefinition> = specs
            .iter()
            .enumerate()
            .map(|(i, (data_type, kind, min, span))| {
                SensorDefinition::new(i as u64, 7, format!("s{i}"))
                    .with_type(*data_type)
                    .with_simulation(*kind)
                    .with_range(*min, min + span)
                    .with_initial(*min)
            })
            .collect();

        let published = runtime.block_on(async {
            let network = MockNetwork::new();
            let manager = SimulationManager::new(
                SimEnv::with_seed(seed),
                Arc::new(MockFactory::new(network.clone())),
                SimulatorConfig { update_interval: Duration::from_millis(250) },
            );

            manager
                .start_simulation(Device::new(7, "Fuzz", ProtocolKind::Modbus), sensors.clone())
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(250 * ticks - 125)).await;
            manager.stop_all().await;

            network.published(7)
        });

        prop_assert_eq!(published.len() as u64, ticks);
        for snapshot in &published {
            prop_assert_eq!(snapshot.len(), sensors.len());
            for sensor in &sensors {
                let value = snapshot[&sensor.id];
                prop_assert_eq!(value.data_type(), sensor.data_type);
                if sensor.data_type == DataType::Float {
                    let v = value.as_f64();
                    prop_assert!(v >= sensor.min - 0.005 && v <= sensor.max + 0.005);
                }
            }
        }
    }
}
