//! Modbus backend tests over real TCP sockets

use std::{collections::BTreeMap, time::Duration};

use plcsim_core::{
    BackendError, DataType, Device, ProtocolBackend, ProtocolKind, SensorAddress,
    SensorDefinition, SensorValue, registers,
};
use plcsim_server::ModbusBackend;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};

fn device() -> Device {
    Device::new(1, "Press-01", ProtocolKind::Modbus).with_endpoint("127.0.0.1", 0)
}

fn sensors() -> Vec<SensorDefinition> {
    vec![
        SensorDefinition::new(1, 1, "Temp"),
        SensorDefinition::new(2, 1, "Count").with_type(DataType::Int),
        SensorDefinition::new(3, 1, "Running").with_type(DataType::Bool),
    ]
}

/// Send one request PDU and return the response PDU.
async fn transact(stream: &mut TcpStream, transaction_id: u16, pdu: &[u8]) -> Vec<u8> {
    let mut request = Vec::new();
    request.extend_from_slice(&transaction_id.to_be_bytes());
    request.extend_from_slice(&[0, 0]);
    request.extend_from_slice(&u16::try_from(pdu.len() + 1).unwrap().to_be_bytes());
    request.push(1);
    request.extend_from_slice(pdu);
    stream.write_all(&request).await.unwrap();

    let mut header = [0u8; 7];
    stream.read_exact(&mut header).await.unwrap();
    assert_eq!(u16::from_be_bytes([header[0], header[1]]), transaction_id);

    let length = usize::from(u16::from_be_bytes([header[4], header[5]]));
    let mut response = vec![0u8; length - 1];
    stream.read_exact(&mut response).await.unwrap();
    response
}

fn words(pdu: &[u8]) -> Vec<u16> {
    pdu[2..].chunks(2).map(|pair| u16::from_be_bytes([pair[0], pair[1]])).collect()
}

#[tokio::test]
async fn start_assigns_contiguous_registers() {
    let mut backend = ModbusBackend::new();

    let addresses = backend.start(&device(), &sensors()).await.unwrap();

    assert_eq!(addresses[&1], SensorAddress::Registers { start: 0, count: 2 });
    assert_eq!(addresses[&2], SensorAddress::Registers { start: 2, count: 1 });
    assert_eq!(addresses[&3], SensorAddress::Registers { start: 3, count: 1 });

    backend.stop().await.unwrap();
}

#[tokio::test]
async fn published_values_are_served_over_tcp() {
    let mut backend = ModbusBackend::new();
    backend.start(&device(), &sensors()).await.unwrap();
    let addr = backend.local_addr().unwrap();

    let values = BTreeMap::from([
        (1, SensorValue::Float(21.5)),
        (2, SensorValue::Int(-7)),
        (3, SensorValue::Bool(true)),
    ]);
    backend.publish(&values).await.unwrap();

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let response = transact(&mut stream, 11, &[0x03, 0x00, 0x00, 0x00, 0x04]).await;

    assert_eq!(response[0], 0x03);
    assert_eq!(response[1], 8);
    let words = words(&response);
    assert_eq!(registers::decode(&words[0..2], DataType::Float), Some(SensorValue::Float(21.5)));
    assert_eq!(registers::decode(&words[2..3], DataType::Int), Some(SensorValue::Int(-7)));
    assert_eq!(registers::decode(&words[3..4], DataType::Bool), Some(SensorValue::Bool(true)));

    backend.stop().await.unwrap();
}

#[tokio::test]
async fn unsupported_function_gets_exception() {
    let mut backend = ModbusBackend::new();
    backend.start(&device(), &sensors()).await.unwrap();
    let mut stream = TcpStream::connect(backend.local_addr().unwrap()).await.unwrap();

    let response = transact(&mut stream, 1, &[0x2B, 0x0E, 0x01, 0x00]).await;
    assert_eq!(response, vec![0xAB, 0x01]);

    let response = transact(&mut stream, 2, &[0x03, 0x00, 0x6E, 0x00, 0x01]).await;
    assert_eq!(response, vec![0x83, 0x02]);

    backend.stop().await.unwrap();
}

#[tokio::test]
async fn lifecycle_errors() {
    let mut backend = ModbusBackend::new();

    let publish = backend.publish(&BTreeMap::new()).await;
    assert!(matches!(publish, Err(BackendError::NotStarted)));

    backend.start(&device(), &sensors()).await.unwrap();
    let again = backend.start(&device(), &sensors()).await;
    assert!(matches!(again, Err(BackendError::AlreadyStarted)));

    backend.stop().await.unwrap();
    backend.stop().await.unwrap();
}

#[tokio::test]
async fn bind_conflict_fails_start() {
    let mut first = ModbusBackend::new();
    first.start(&device(), &sensors()).await.unwrap();
    let port = first.local_addr().unwrap().port();

    let taken = device().with_endpoint("127.0.0.1", port);
    let mut second = ModbusBackend::new();
    let result = second.start(&taken, &sensors()).await;

    assert!(matches!(result, Err(BackendError::Bind { .. })));
    assert!(second.local_addr().is_none());

    first.stop().await.unwrap();
}

#[tokio::test]
async fn stop_releases_port() {
    let mut backend = ModbusBackend::new();
    backend.start(&device(), &sensors()).await.unwrap();
    let port = backend.local_addr().unwrap().port();
    backend.stop().await.unwrap();

    let same = device().with_endpoint("127.0.0.1", port);
    let mut replacement = ModbusBackend::new();
    replacement.start(&same, &sensors()).await.unwrap();

    assert_eq!(replacement.local_addr().unwrap().port(), port);
    replacement.stop().await.unwrap();
}

#[tokio::test]
async fn drop_without_stop_releases_port() {
    let mut backend = ModbusBackend::new();
    backend.start(&device(), &sensors()).await.unwrap();
    let port = backend.local_addr().unwrap().port();
    drop(backend);

    // Cancellation of the aborted listener lands on a later runtime turn
    let same = device().with_endpoint("127.0.0.1", port);
    let mut replacement = ModbusBackend::new();
    let mut rebound = Err(BackendError::NotStarted);
    for _ in 0..50 {
        rebound = replacement.start(&same, &sensors()).await;
        if rebound.is_ok() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert!(rebound.is_ok(), "rebind after drop failed: {rebound:?}");
    assert_eq!(replacement.local_addr().unwrap().port(), port);
    replacement.stop().await.unwrap();
}

#[tokio::test]
async fn overlapping_explicit_addresses_fail_start() {
    let sensors = vec![
        SensorDefinition::new(1, 1, "Temp").with_address(10),
        SensorDefinition::new(2, 1, "Count").with_type(DataType::Int).with_address(11),
    ];
    let mut backend = ModbusBackend::new();

    let result = backend.start(&device(), &sensors).await;

    assert!(matches!(result, Err(BackendError::Registers(_))));
    assert!(backend.local_addr().is_none());
}
