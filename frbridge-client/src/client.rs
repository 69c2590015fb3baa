//! High-level client API.

use crate::connection::{Connection, ConnectionConfig};
use crate::error::ClientError;
use frbridge_protocol::{override_slice, Frame, HostCommand, MAX_PAYLOAD_BYTES};
use std::sync::Arc;
use std::time::Duration;

/// High-level client for a bridge.
pub struct Client {
    conn: Arc<Connection>,
}

impl Client {
    /// Creates a new client with the given configuration.
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            conn: Arc::new(Connection::new(config)),
        }
    }

    /// Connects to the bridge.
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.conn.connect().await
    }

    /// Returns whether the client is connected.
    pub fn is_connected(&self) -> bool {
        self.conn.is_connected()
    }

    /// Closes the connection.
    pub async fn close(&self) -> Result<(), ClientError> {
        self.conn.close().await
    }

    /// Returns the underlying connection.
    pub fn connection(&self) -> Arc<Connection> {
        self.conn.clone()
    }

    /// Queues `replacement` for the next injection of frame `id` on cycle
    /// base `base`. The self-identifying prefix is added here.
    pub async fn submit_override(
        &self,
        id: u16,
        base: u8,
        replacement: &[u8],
    ) -> Result<(), ClientError> {
        if replacement.is_empty() || replacement.len() > MAX_PAYLOAD_BYTES {
            return Err(ClientError::InvalidOverride(format!(
                "replacement must be 1..={} bytes, got {}",
                MAX_PAYLOAD_BYTES,
                replacement.len()
            )));
        }
        let command = HostCommand::SubmitOverride {
            id,
            base,
            data: override_slice(id, base, replacement),
        };
        self.conn.send(&command).await
    }

    /// Enables or disables template injection on the bridge.
    pub async fn set_injection(&self, enabled: bool) -> Result<(), ClientError> {
        self.conn
            .send(&HostCommand::SetInjection { enabled })
            .await
    }

    /// Asks the bridge to stream exported frames on this connection.
    ///
    /// Only one connection streams at a time; a later caller starts
    /// receiving once the current one disconnects.
    pub async fn start_export(&self) -> Result<(), ClientError> {
        self.conn.send(&HostCommand::StartExport).await
    }

    /// Waits for the next exported frame.
    pub async fn next_frame(&self) -> Result<Frame, ClientError> {
        self.conn.next_frame().await
    }

    /// Waits up to `timeout` for the next exported frame.
    pub async fn next_frame_timeout(&self, timeout: Duration) -> Result<Frame, ClientError> {
        self.conn.next_frame_timeout(timeout).await
    }
}
