//! OPC UA backend.
//!
//! Holds the device's [`NodeTree`] and binds an `opc.tcp` listener at the
//! device endpoint so bind conflicts surface at start.
//!
//! The OPC UA session protocol is not implemented. Accepted connections are
//! closed immediately, so network clients cannot browse or read the node
//! tree. Published values are visible in-process only, through
//! [`OpcUaBackend::read`] and [`OpcUaBackend::tree`].

use std::{collections::BTreeMap, net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use parking_lot::Mutex;
use plcsim_core::{
    AddressMap, BackendError, Device, NodeId, NodeTree, ProtocolBackend, ProtocolKind,
    SensorAddress, SensorDefinition, SensorId, SensorValue, ValueSnapshot,
};
use tokio::{net::TcpListener, task::JoinHandle};

struct Serving {
    tree: Arc<Mutex<NodeTree>>,
    variables: BTreeMap<SensorId, NodeId>,
    local_addr: SocketAddr,
    listener_task: JoinHandle<()>,
}

// A backend dropped without `stop` still releases its port
impl Drop for Serving {
    fn drop(&mut self) {
        self.listener_task.abort();
    }
}

/// Hierarchical node backend exposing an OPC UA address space.
#[derive(Default)]
pub struct OpcUaBackend {
    serving: Option<Serving>,
}

impl OpcUaBackend {
    /// Create an unstarted backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Address the listener is bound to while started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.serving.as_ref().map(|s| s.local_addr)
    }

    /// Read a variable by browse path while started.
    pub fn read(&self, path: &str) -> Option<SensorValue> {
        let serving = self.serving.as_ref()?;
        let tree = serving.tree.lock();
        let id = tree.browse(path)?.id;
        tree.read(id)
    }

    /// Copy of the address space while started.
    pub fn tree(&self) -> Option<NodeTree> {
        self.serving.as_ref().map(|s| s.tree.lock().clone())
    }
}

#[async_trait]
impl ProtocolBackend for OpcUaBackend {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::OpcUa
    }

    async fn start(
        &mut self,
        device: &Device,
        sensors: &[SensorDefinition],
    ) -> Result<AddressMap, BackendError> {
        if self.serving.is_some() {
            return Err(BackendError::AlreadyStarted);
        }

        let (tree, variables) = NodeTree::for_device(device, sensors);

        let addresses = variables
            .iter()
            .filter_map(|(sensor, node)| {
                let path = tree.path(*node)?;
                Some((*sensor, SensorAddress::Node { path, node_id: *node }))
            })
            .collect();

        let listener = super::bind_listener(&device.host, device.port).await?;
        let local_addr = listener.local_addr()?;

        tracing::info!(
            device = device.id,
            "OPC UA server '{}' listening on opc.tcp://{} (namespace {})",
            tree.server_name(),
            local_addr,
            tree.namespace_uri()
        );

        let listener_task = tokio::spawn(refuse_sessions(listener));
        self.serving =
            Some(Serving { tree: Arc::new(Mutex::new(tree)), variables, local_addr, listener_task });

        Ok(addresses)
    }

    async fn stop(&mut self) -> Result<(), BackendError> {
        let Some(mut serving) = self.serving.take() else {
            return Ok(());
        };

        serving.listener_task.abort();
        if let Err(e) = (&mut serving.listener_task).await {
            if e.is_panic() {
                tracing::error!("OPC UA listener panicked: {}", e);
            }
        }

        tracing::debug!("OPC UA server on {} stopped", serving.local_addr);
        Ok(())
    }

    async fn publish(&mut self, values: &ValueSnapshot) -> Result<(), BackendError> {
        let serving = self.serving.as_ref().ok_or(BackendError::NotStarted)?;
        let mut tree = serving.tree.lock();

        for (sensor, value) in values {
            if let Some(node) = serving.variables.get(sensor) {
                tree.write(*node, *value);
            }
        }

        Ok(())
    }
}

async fn refuse_sessions(listener: TcpListener) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                tracing::debug!("Closing OPC UA connection from {}", peer);
                drop(stream);
            },
            Err(e) => {
                tracing::warn!("OPC UA accept error: {}", e);
            },
        }
    }
}
