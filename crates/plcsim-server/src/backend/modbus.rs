//! Modbus TCP backend.
//!
//! Sensor values are encoded into holding registers of a [`RegisterBank`]
//! shared with a TCP listener that answers MBAP requests. Each accepted
//! connection runs in its own task; stopping the backend aborts the listener
//! and every connection and releases the port.

use std::{net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use bytes::BytesMut;
use parking_lot::Mutex;
use plcsim_core::{
    AddressMap, BackendError, Device, ProtocolBackend, ProtocolKind, RegisterAllocator,
    RegisterBank, RegisterLayout, SensorAddress, SensorDefinition, ValueSnapshot,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    task::{JoinHandle, JoinSet},
};

use crate::mbap;

struct Serving {
    bank: Arc<Mutex<RegisterBank>>,
    layout: RegisterLayout,
    local_addr: SocketAddr,
    listener_task: JoinHandle<()>,
}

// A backend dropped without `stop` still releases its port
impl Drop for Serving {
    fn drop(&mut self) {
        self.listener_task.abort();
    }
}

/// Fixed-width register backend speaking Modbus TCP.
#[derive(Default)]
pub struct ModbusBackend {
    serving: Option<Serving>,
}

impl ModbusBackend {
    /// Create an unstarted backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Address the listener is bound to while started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.serving.as_ref().map(|s| s.local_addr)
    }

    /// Copy of holding registers while started.
    pub fn holding_registers(&self, start: u16, count: u16) -> Option<Vec<u16>> {
        let serving = self.serving.as_ref()?;
        let bank = serving.bank.lock();
        bank.holding(start, count).ok().map(<[u16]>::to_vec)
    }
}

#[async_trait]
impl ProtocolBackend for ModbusBackend {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Modbus
    }

    async fn start(
        &mut self,
        device: &Device,
        sensors: &[SensorDefinition],
    ) -> Result<AddressMap, BackendError> {
        if self.serving.is_some() {
            return Err(BackendError::AlreadyStarted);
        }

        let layout = RegisterAllocator::allocate(sensors)?;
        let bank = Arc::new(Mutex::new(RegisterBank::for_layout(&layout)));

        let listener = super::bind_listener(&device.host, device.port).await?;
        let local_addr = listener.local_addr()?;

        tracing::info!(
            device = device.id,
            "Modbus server for {} listening on {} ({} registers)",
            device.name,
            local_addr,
            layout.total_registers()
        );

        let addresses = layout
            .slots()
            .iter()
            .map(|slot| {
                (slot.sensor, SensorAddress::Registers { start: slot.start, count: slot.width })
            })
            .collect();

        let listener_task = tokio::spawn(serve(listener, Arc::clone(&bank)));
        self.serving = Some(Serving { bank, layout, local_addr, listener_task });

        Ok(addresses)
    }

    async fn stop(&mut self) -> Result<(), BackendError> {
        let Some(mut serving) = self.serving.take() else {
            return Ok(());
        };

        serving.listener_task.abort();
        if let Err(e) = (&mut serving.listener_task).await {
            if e.is_panic() {
                tracing::error!("Modbus listener panicked: {}", e);
            }
        }

        tracing::debug!("Modbus server on {} stopped", serving.local_addr);
        Ok(())
    }

    async fn publish(&mut self, values: &ValueSnapshot) -> Result<(), BackendError> {
        let serving = self.serving.as_ref().ok_or(BackendError::NotStarted)?;
        let mut bank = serving.bank.lock();

        for (sensor, value) in values {
            if let Some(slot) = serving.layout.slot(*sensor) {
                bank.write_slot(slot, *value)?;
            }
        }

        Ok(())
    }
}

/// Accept connections until aborted. Dropping the `JoinSet` on abort tears
/// down every connection.
async fn serve(listener: TcpListener, bank: Arc<Mutex<RegisterBank>>) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tracing::debug!("Modbus connection from {}", peer);
                    connections.spawn(handle_connection(stream, Arc::clone(&bank)));
                },
                Err(e) => {
                    tracing::warn!("Modbus accept error: {}", e);
                },
            },
            Some(finished) = connections.join_next(), if !connections.is_empty() => {
                match finished {
                    Ok(Ok(())) => {},
                    Ok(Err(e)) => tracing::debug!("Modbus connection closed: {}", e),
                    Err(e) => tracing::warn!("Modbus connection task failed: {}", e),
                }
            },
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    bank: Arc<Mutex<RegisterBank>>,
) -> Result<(), std::io::Error> {
    let mut buf = BytesMut::with_capacity(mbap::HEADER_LEN + mbap::MAX_PDU_LEN);

    loop {
        while let Some(frame) = mbap::decode(&mut buf)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?
        {
            let response = mbap::respond(&mut bank.lock(), &frame);
            stream.write_all(&response).await?;
        }

        if stream.read_buf(&mut buf).await? == 0 {
            return Ok(());
        }
    }
}
