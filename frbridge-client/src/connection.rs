//! Bridge connection.
//!
//! A connection is full duplex: export records arrive on the read half
//! while commands go out on the write half, so the halves are locked
//! independently and a pending `next_frame` never blocks a command.

use crate::error::ClientError;
use frbridge_protocol::{Decoder, Frame, HostCommand, MAX_RECORD_BODY, RECORD_LEN_SIZE};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

/// Largest export record on the wire.
pub const MAX_RECORD_LEN: usize = RECORD_LEN_SIZE + MAX_RECORD_BODY;

/// Socket reads are sized in whole worst-case records.
pub const DEFAULT_READ_RECORDS: usize = 16;

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub addr: SocketAddr,
    pub connect_timeout: Duration,
    /// Bytes requested per socket read; never less than one record.
    pub read_buffer_size: usize,
}

impl ConnectionConfig {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            connect_timeout: Duration::from_secs(5),
            read_buffer_size: DEFAULT_READ_RECORDS * MAX_RECORD_LEN,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(MAX_RECORD_LEN);
        self
    }
}

/// A connection to a bridge.
pub struct Connection {
    config: ConnectionConfig,
    commands: Mutex<Option<OwnedWriteHalf>>,
    records: Mutex<RecordStream>,
    connected: AtomicBool,
    frames_received: AtomicU64,
}

/// Read half plus the decoder reassembling records split across reads.
struct RecordStream {
    reader: Option<OwnedReadHalf>,
    decoder: Decoder,
    buf: Vec<u8>,
}

impl Connection {
    /// Creates an unconnected connection.
    pub fn new(config: ConnectionConfig) -> Self {
        let buf = vec![0u8; config.read_buffer_size];
        Self {
            config,
            commands: Mutex::new(None),
            records: Mutex::new(RecordStream {
                reader: None,
                decoder: Decoder::new(),
                buf,
            }),
            connected: AtomicBool::new(false),
            frames_received: AtomicU64::new(0),
        }
    }

    /// Connects to the bridge, replacing any previous stream.
    pub async fn connect(&self) -> Result<(), ClientError> {
        let addr = self.config.addr;
        tracing::debug!("Connecting to bridge at {}", addr);

        let stream = match tokio::time::timeout(
            self.config.connect_timeout,
            TcpStream::connect(addr),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                tracing::debug!("Connect to {} failed: {}", addr, e);
                return Err(ClientError::Io(e));
            }
            Err(_) => {
                tracing::debug!("Connect to {} timed out", addr);
                return Err(ClientError::Timeout);
            }
        };
        stream.set_nodelay(true).ok();

        let (read_half, write_half) = stream.into_split();
        {
            let mut records = self.records.lock().await;
            records.reader = Some(read_half);
            // bytes from a previous stream cannot complete a record on this one
            records.decoder.clear();
        }
        *self.commands.lock().await = Some(write_half);
        self.connected.store(true, Ordering::SeqCst);

        tracing::debug!("Connected to bridge at {}", addr);
        Ok(())
    }

    /// Sends one host command. The bridge does not reply.
    pub async fn send(&self, command: &HostCommand) -> Result<(), ClientError> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        let encoded = command.encode();
        tracing::debug!("-> {} ({} bytes)", command.name(), encoded.len());

        let mut commands = self.commands.lock().await;
        let writer = commands.as_mut().ok_or(ClientError::NotConnected)?;
        writer.write_all(&encoded).await.map_err(ClientError::Io)
    }

    /// Waits for the next exported frame.
    pub async fn next_frame(&self) -> Result<Frame, ClientError> {
        let mut guard = self.records.lock().await;
        let records = &mut *guard;

        loop {
            if let Some(frame) = records.decoder.decode_record()? {
                self.frames_received.fetch_add(1, Ordering::Relaxed);
                return Ok(frame);
            }

            let reader = records.reader.as_mut().ok_or(ClientError::NotConnected)?;
            let n = reader
                .read(&mut records.buf)
                .await
                .map_err(ClientError::Io)?;
            if n == 0 {
                tracing::debug!(
                    "Bridge closed the stream ({} bytes of a partial record pending)",
                    records.decoder.buffered()
                );
                self.connected.store(false, Ordering::SeqCst);
                return Err(ClientError::ConnectionClosed);
            }
            records.decoder.extend(&records.buf[..n]);
        }
    }

    /// [`next_frame`](Self::next_frame) with a deadline.
    pub async fn next_frame_timeout(&self, timeout: Duration) -> Result<Frame, ClientError> {
        tokio::time::timeout(timeout, self.next_frame())
            .await
            .map_err(|_| ClientError::Timeout)?
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Frames decoded since this connection was created.
    pub fn frames_received(&self) -> u64 {
        self.frames_received.load(Ordering::Relaxed)
    }

    /// Shuts down the command half and drops the record stream.
    pub async fn close(&self) -> Result<(), ClientError> {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(mut writer) = self.commands.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        self.records.lock().await.reader = None;
        tracing::debug!("Disconnected from {}", self.config.addr);
        Ok(())
    }
}
