//! TCP host transport.
//!
//! Each host connection carries two byte streams: host commands from the
//! host and, once the host sends `StartExport`, export records back.
//! There is a single output queue, so only one streaming connection at a
//! time owns it. Other streaming connections wait and take it over when
//! the owner disconnects; connections that never ask for the stream only
//! send commands and never touch the queue.

use crate::error::ServerError;
use crate::handler::CommandHandler;
use crate::metrics::Metrics;
use bytes::BytesMut;
use frbridge_core::{FifoReader, InjectorHandle};
use frbridge_protocol::{CommandDecoder, Encoder, HostCommand};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;

/// How often a streaming connection checks the output queue.
const EXPORT_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Host transport configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Largest single export write in bytes.
    pub export_batch_bytes: usize,
    /// Metrics instance (if metrics are enabled).
    pub metrics: Option<Arc<Metrics>>,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind_addr", &self.bind_addr)
            .field("max_connections", &self.max_connections)
            .field("export_batch_bytes", &self.export_batch_bytes)
            .field("metrics_enabled", &self.metrics.is_some())
            .finish()
    }
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            max_connections: 4,
            export_batch_bytes: 4096,
            metrics: None,
        }
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    pub fn with_export_batch_bytes(mut self, bytes: usize) -> Self {
        self.export_batch_bytes = bytes;
        self
    }

    /// Sets the metrics instance.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

/// Server statistics.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections_total: AtomicU64,
    pub connections_active: AtomicU64,
    pub records_exported: AtomicU64,
    pub commands_total: AtomicU64,
    pub errors_total: AtomicU64,
}

/// Holds the output queue reader while no connection owns it.
struct ExportSlot {
    reader: Mutex<Option<FifoReader>>,
}

impl ExportSlot {
    fn acquire(self: &Arc<Self>) -> Option<ExportLease> {
        let reader = self.reader.lock().take()?;
        Some(ExportLease {
            slot: self.clone(),
            reader: Some(reader),
        })
    }
}

/// Exclusive use of the output queue; handed back on drop.
struct ExportLease {
    slot: Arc<ExportSlot>,
    reader: Option<FifoReader>,
}

impl Drop for ExportLease {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            *self.slot.reader.lock() = Some(reader);
        }
    }
}

/// Moves queued frames into `batch` as export records.
///
/// A frame is popped only once its record is known to fit in the
/// remaining `limit`; the first record of an empty batch is always taken.
/// Returns the number of records added.
pub fn fill_batch(reader: &mut FifoReader, batch: &mut BytesMut, limit: usize) -> usize {
    let mut records = 0;
    while let Some(frame) = reader.peek() {
        let len = Encoder::record_len(&frame);
        if !batch.is_empty() && batch.len() + len > limit {
            break;
        }
        if reader.pop().is_none() {
            break;
        }
        Encoder::encode_record_into(&frame, batch);
        records += 1;
    }
    records
}

/// TCP host transport for the bridge.
pub struct Server {
    config: ServerConfig,
    handler: Arc<CommandHandler>,
    export: Arc<ExportSlot>,
    stats: Arc<ServerStats>,
    shutdown: broadcast::Sender<()>,
    running: AtomicBool,
}

impl Server {
    /// Creates a new server owning the export side of the output queue.
    pub fn new(config: ServerConfig, injector: InjectorHandle, export: FifoReader) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let mut handler = CommandHandler::new(injector);
        if let Some(ref metrics) = config.metrics {
            handler = handler.with_metrics(metrics.clone());
        }
        Self {
            config,
            handler: Arc::new(handler),
            export: Arc::new(ExportSlot {
                reader: Mutex::new(Some(export)),
            }),
            stats: Arc::new(ServerStats::default()),
            shutdown: shutdown_tx,
            running: AtomicBool::new(false),
        }
    }

    /// Binds the configured address and runs the server.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Runs the server on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        self.running.store(true, Ordering::SeqCst);
        tracing::info!("Host transport listening on {}", listener.local_addr()?);

        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            if self.stats.connections_active.load(Ordering::Relaxed)
                                >= self.config.max_connections as u64
                            {
                                tracing::warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }

                            self.stats.connections_total.fetch_add(1, Ordering::Relaxed);
                            self.stats.connections_active.fetch_add(1, Ordering::Relaxed);

                            if let Some(ref metrics) = self.config.metrics {
                                metrics.connections_total.inc();
                                metrics.connections_active.inc();
                            }

                            let slot = self.export.clone();
                            let handler = self.handler.clone();
                            let stats = self.stats.clone();
                            let config = self.config.clone();
                            let mut conn_shutdown = self.shutdown.subscribe();

                            tokio::spawn(async move {
                                let result = Self::handle_connection(
                                    stream,
                                    addr,
                                    handler,
                                    slot,
                                    &config,
                                    &stats,
                                    &mut conn_shutdown,
                                )
                                .await;

                                if let Err(e) = result {
                                    tracing::debug!("Connection {} error: {}", addr, e);
                                    stats.errors_total.fetch_add(1, Ordering::Relaxed);
                                }

                                stats.connections_active.fetch_sub(1, Ordering::Relaxed);

                                if let Some(ref metrics) = config.metrics {
                                    metrics.connections_active.dec();
                                }

                                tracing::info!("Host disconnected: {}", addr);
                            });
                        }
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("Host transport shutting down");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn handle_connection(
        mut stream: TcpStream,
        addr: SocketAddr,
        handler: Arc<CommandHandler>,
        slot: Arc<ExportSlot>,
        config: &ServerConfig,
        stats: &ServerStats,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        tracing::info!("Host connected: {}", addr);
        stream.set_nodelay(true)?;

        let mut streaming = false;
        let mut export: Option<ExportLease> = None;

        let mut decoder = CommandDecoder::new();
        let mut buf = [0u8; 1024];
        let mut batch = BytesMut::with_capacity(config.export_batch_bytes);
        let mut poll = tokio::time::interval(EXPORT_POLL_INTERVAL);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                result = stream.read(&mut buf) => {
                    match result {
                        Ok(0) => {
                            tracing::debug!("[{}] Connection closed by host", addr);
                            return Ok(());
                        }
                        Ok(n) => {
                            tracing::trace!("[{}] Received {} bytes", addr, n);
                            decoder.extend(&buf[..n]);
                        }
                        Err(e) => {
                            tracing::debug!("[{}] Read error: {}", addr, e);
                            return Err(ServerError::Io(e));
                        }
                    }
                }

                _ = poll.tick(), if streaming => {
                    if export.is_none() {
                        export = slot.acquire();
                        if export.is_some() {
                            tracing::info!("[{}] Export stream owner", addr);
                        }
                    }
                    if let Some(reader) = export.as_mut().and_then(|lease| lease.reader.as_mut()) {
                        loop {
                            let records = fill_batch(reader, &mut batch, config.export_batch_bytes);
                            if records == 0 {
                                break;
                            }
                            stream.write_all(&batch).await?;
                            stats.records_exported.fetch_add(records as u64, Ordering::Relaxed);
                            if let Some(ref metrics) = config.metrics {
                                metrics.records_exported_total.inc_by(records as f64);
                                metrics.export_batch_bytes.observe(batch.len() as f64);
                            }
                            batch.clear();
                        }
                    }
                }

                _ = shutdown.recv() => {
                    tracing::debug!("[{}] Shutdown signal received", addr);
                    return Err(ServerError::ShuttingDown);
                }
            }

            loop {
                match decoder.decode_command() {
                    Ok(Some(command)) => {
                        stats.commands_total.fetch_add(1, Ordering::Relaxed);
                        if command == HostCommand::StartExport {
                            streaming = true;
                        }
                        // rejections are already logged and counted by the handler
                        let _ = handler.handle(addr, &command);
                    }
                    Ok(None) => break,
                    Err(e) => {
                        let err = ServerError::Protocol(e);
                        handler.record_error(&err);
                        stats.errors_total.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!("[{}] Malformed command stream: {}", addr, err);
                        break;
                    }
                }
            }
        }
    }

    /// Initiates server shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    /// Returns whether the server is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Returns server statistics.
    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }

    /// Returns whether the output queue is waiting for an owner.
    pub fn export_available(&self) -> bool {
        self.export.reader.lock().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use frbridge_core::fifo::{output_queue, FifoWriter};
    use frbridge_core::{CacheRule, RuleSet, TriggerEngine, TriggerRule};
    use frbridge_protocol::{override_slice, Decoder, Direction, Frame, Indicators, Source};

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn rules() -> RuleSet {
        RuleSet {
            cache_rules: vec![CacheRule {
                watch_id: 0x44,
                cycle_mask: 1,
                cycle_base: 0,
            }],
            trigger_rules: vec![TriggerRule {
                trigger_id: 0x40,
                target_id: 0x44,
                cycle_mask: 1,
                cycle_base: 0,
                e2e_offset: 9,
                e2e_len: 7,
                e2e_init: 0xDC,
                replace_offset: 12,
                replace_len: 2,
                direction: Direction::ToEcu,
            }],
        }
    }

    fn frame(id: u16) -> Frame {
        Frame::new(id, 0, Indicators::new(), &[id as u8, 0, 0, 0], Source::Vehicle).unwrap()
    }

    async fn start() -> (Arc<Server>, SocketAddr, FifoWriter, InjectorHandle) {
        let (writer, reader) = output_queue(16).unwrap();
        let (_engine, injector) = TriggerEngine::new(rules(), 4, false).unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let config = ServerConfig::new(addr).with_metrics(Arc::new(Metrics::new().unwrap()));
        let server = Arc::new(Server::new(config, injector.clone(), reader));

        let running = server.clone();
        tokio::spawn(async move { running.serve(listener).await });

        (server, addr, writer, injector)
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(TIMEOUT, async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[test]
    fn test_fill_batch_respects_limit() {
        let (mut writer, mut reader) = output_queue(8).unwrap();
        for id in 1..=3 {
            writer.push(frame(id));
        }
        // 15 byte records: two fit in 40 bytes, the third waits
        let mut batch = BytesMut::new();
        assert_eq!(fill_batch(&mut reader, &mut batch, 40), 2);
        assert_eq!(batch.len(), 30);
        assert_eq!(reader.len(), 1);

        batch.clear();
        assert_eq!(fill_batch(&mut reader, &mut batch, 10), 1);
        assert_eq!(fill_batch(&mut reader, &mut batch, 10), 0);
    }

    async fn read_frames(client: &mut TcpStream, count: usize) -> Vec<(u16, Source)> {
        let mut decoder = Decoder::new();
        let mut received = Vec::new();
        let mut buf = [0u8; 256];
        tokio::time::timeout(TIMEOUT, async {
            while received.len() < count {
                let n = client.read(&mut buf).await.unwrap();
                assert!(n > 0);
                decoder.extend(&buf[..n]);
                while let Some(f) = decoder.decode_record().unwrap() {
                    received.push((f.frame_id, f.source));
                }
            }
        })
        .await
        .unwrap();
        received
    }

    #[tokio::test]
    async fn test_exports_queued_frames() {
        let (server, addr, mut writer, _injector) = start().await;
        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(&HostCommand::StartExport.encode()).await.unwrap();
        wait_until(|| !server.export_available()).await;

        for id in [0x10, 0x20, 0x30] {
            assert!(writer.push(frame(id)));
        }

        assert_eq!(
            read_frames(&mut client, 3).await,
            vec![
                (0x10, Source::Vehicle),
                (0x20, Source::Vehicle),
                (0x30, Source::Vehicle)
            ]
        );
        assert_eq!(server.stats().records_exported.load(Ordering::Relaxed), 3);
        server.shutdown();
    }

    #[tokio::test]
    async fn test_command_only_host_leaves_queue_alone() {
        let (server, addr, mut writer, injector) = start().await;
        for id in 1..=5 {
            assert!(writer.push(frame(id)));
        }

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(&[0x91, 0x01]).await.unwrap();
        wait_until(|| injector.injection_enabled()).await;
        drop(client);
        wait_until(|| server.stats().connections_active.load(Ordering::Relaxed) == 0).await;

        let fifo = writer.stats();
        assert_eq!(fifo.received, 5);
        assert_eq!(fifo.transmitted, 0);
        assert!(server.export_available());
        assert_eq!(server.stats().records_exported.load(Ordering::Relaxed), 0);

        // the frames are still there for the next streaming host
        let mut monitor = TcpStream::connect(addr).await.unwrap();
        monitor.write_all(&HostCommand::StartExport.encode()).await.unwrap();
        let ids: Vec<u16> = read_frames(&mut monitor, 5)
            .await
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
        server.shutdown();
    }

    #[tokio::test]
    async fn test_commands_reach_injector() {
        let (server, addr, _writer, injector) = start().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        let mut bytes = BytesMut::new();
        bytes.extend_from_slice(&[0x00, 0x00]);
        HostCommand::SubmitOverride {
            id: 0x44,
            base: 0,
            data: override_slice(0x44, 0, &[0x12, 0x34]),
        }
        .encode_into(&mut bytes);
        HostCommand::SetInjection { enabled: true }.encode_into(&mut bytes);
        client.write_all(&bytes).await.unwrap();

        wait_until(|| injector.pending_overrides() == 1 && injector.injection_enabled()).await;
        assert_eq!(server.stats().commands_total.load(Ordering::Relaxed), 2);
        assert!(server.export_available());
        server.shutdown();
    }

    #[tokio::test]
    async fn test_unknown_opcode_discards_buffer() {
        let (server, addr, _writer, injector) = start().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        // the enable command after the bad opcode is dropped with it
        client.write_all(&[0x7A, 0x91, 0x01]).await.unwrap();
        wait_until(|| server.stats().errors_total.load(Ordering::Relaxed) == 1).await;
        assert!(!injector.injection_enabled());

        client.write_all(&[0x91, 0x01]).await.unwrap();
        wait_until(|| injector.injection_enabled()).await;
        server.shutdown();
    }

    #[tokio::test]
    async fn test_waiting_stream_takes_over_on_disconnect() {
        let (server, addr, mut writer, _injector) = start().await;

        let mut first = TcpStream::connect(addr).await.unwrap();
        first.write_all(&HostCommand::StartExport.encode()).await.unwrap();
        wait_until(|| !server.export_available()).await;

        let mut second = TcpStream::connect(addr).await.unwrap();
        second.write_all(&HostCommand::StartExport.encode()).await.unwrap();
        wait_until(|| server.stats().commands_total.load(Ordering::Relaxed) == 2).await;

        assert!(writer.push(frame(0x10)));
        assert_eq!(read_frames(&mut first, 1).await, vec![(0x10, Source::Vehicle)]);

        drop(first);
        wait_until(|| server.stats().connections_active.load(Ordering::Relaxed) == 1).await;
        assert!(writer.push(frame(0x20)));
        assert_eq!(read_frames(&mut second, 1).await, vec![(0x20, Source::Vehicle)]);
        assert!(!server.export_available());
        server.shutdown();
    }
}
