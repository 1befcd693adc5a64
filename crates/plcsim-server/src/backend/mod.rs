//! Protocol backends and their selection.
//!
//! ```text
//! ProtocolKind::Modbus ──> ModbusBackend  (register bank + MBAP listener)
//! ProtocolKind::OpcUa  ──> OpcUaBackend   (node tree + opc.tcp listener)
//! ```

mod modbus;
mod opcua;

pub use modbus::ModbusBackend;
pub use opcua::OpcUaBackend;
use plcsim_core::{ProtocolBackend, ProtocolKind};

/// Creates a fresh backend for a protocol.
///
/// The manager calls this once per simulator start, so every simulator owns
/// its own backend instance.
pub trait BackendFactory: Send + Sync {
    /// Create an unstarted backend speaking `kind`.
    fn create(&self, kind: ProtocolKind) -> Box<dyn ProtocolBackend>;
}

/// Factory producing the real network backends.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetworkBackends;

impl BackendFactory for NetworkBackends {
    fn create(&self, kind: ProtocolKind) -> Box<dyn ProtocolBackend> {
        match kind {
            ProtocolKind::Modbus => Box::new(ModbusBackend::new()),
            ProtocolKind::OpcUa => Box::new(OpcUaBackend::new()),
        }
    }
}

/// Bind a TCP listener at `host:port`, mapping failure to a bind error.
async fn bind_listener(
    host: &str,
    port: u16,
) -> Result<tokio::net::TcpListener, plcsim_core::BackendError> {
    tokio::net::TcpListener::bind((host, port)).await.map_err(|e| {
        plcsim_core::BackendError::Bind { endpoint: format!("{host}:{port}"), reason: e.to_string() }
    })
}
