//! Prometheus metrics for the bridge daemon.
//!
//! This module provides:
//! - Metrics registry with host transport counters and pipeline gauges
//! - A refresh task copying pipeline snapshots into the registry
//! - HTTP server to expose metrics at `/metrics` endpoint

use crate::transmit::{TransmitMonitor, TransmitStats};
use frbridge_core::{PipelineMonitor, PipelineStats};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, GaugeVec, Histogram, HistogramOpts, Opts, Registry,
    TextEncoder,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

/// Export write size buckets (in bytes).
const BATCH_BUCKETS: &[f64] = &[16.0, 64.0, 256.0, 512.0, 1024.0, 2048.0, 4096.0, 8192.0];

/// Prometheus metrics for the bridge daemon.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    /// Total host connections accepted.
    pub connections_total: Counter,
    /// Currently active host connections.
    pub connections_active: Gauge,
    /// Export records written to hosts.
    pub records_exported_total: Counter,
    /// Bytes per export write.
    pub export_batch_bytes: Histogram,
    /// Host commands applied, by command.
    pub commands_total: CounterVec,
    /// Host commands rejected, by error code.
    pub command_errors_total: CounterVec,
    /// Notification channel counters.
    pub notifications: GaugeVec,
    /// Processing outcomes.
    pub frames: GaugeVec,
    /// Output queue counters.
    pub fifo: GaugeVec,
    /// Frames currently queued for export.
    pub fifo_depth: Gauge,
    /// Trigger engine counters.
    pub injector: GaugeVec,
    /// Override store counters.
    pub overrides: GaugeVec,
    /// 1 while injection is enabled.
    pub injection_enabled: Gauge,
    /// Armed transmissions by direction.
    pub transmissions: GaugeVec,
}

impl Metrics {
    /// Creates a new Metrics instance with all metrics registered.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        // Host transport
        let connections_total = Counter::with_opts(Opts::new(
            "frbridge_connections_total",
            "Total number of host connections accepted",
        ))?;
        registry.register(Box::new(connections_total.clone()))?;

        let connections_active = Gauge::with_opts(Opts::new(
            "frbridge_connections_active",
            "Number of currently active host connections",
        ))?;
        registry.register(Box::new(connections_active.clone()))?;

        let records_exported_total = Counter::with_opts(Opts::new(
            "frbridge_records_exported_total",
            "Total export records written to hosts",
        ))?;
        registry.register(Box::new(records_exported_total.clone()))?;

        let export_batch_bytes = Histogram::with_opts(
            HistogramOpts::new("frbridge_export_batch_bytes", "Bytes per export write")
                .buckets(BATCH_BUCKETS.to_vec()),
        )?;
        registry.register(Box::new(export_batch_bytes.clone()))?;

        let commands_total = CounterVec::new(
            Opts::new("frbridge_commands_total", "Host commands applied by command"),
            &["command"],
        )?;
        registry.register(Box::new(commands_total.clone()))?;

        let command_errors_total = CounterVec::new(
            Opts::new(
                "frbridge_command_errors_total",
                "Host commands rejected by error code",
            ),
            &["code"],
        )?;
        registry.register(Box::new(command_errors_total.clone()))?;

        // Pipeline
        let notifications = GaugeVec::new(
            Opts::new(
                "frbridge_notifications",
                "Notification channel counters by event",
            ),
            &["event"],
        )?;
        registry.register(Box::new(notifications.clone()))?;

        let frames = GaugeVec::new(
            Opts::new("frbridge_frames", "Processed frames by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(frames.clone()))?;

        let fifo = GaugeVec::new(
            Opts::new("frbridge_fifo", "Output queue counters by event"),
            &["event"],
        )?;
        registry.register(Box::new(fifo.clone()))?;

        let fifo_depth = Gauge::with_opts(Opts::new(
            "frbridge_fifo_depth",
            "Frames currently queued for export",
        ))?;
        registry.register(Box::new(fifo_depth.clone()))?;

        let injector = GaugeVec::new(
            Opts::new("frbridge_injector", "Trigger engine counters by event"),
            &["event"],
        )?;
        registry.register(Box::new(injector.clone()))?;

        let overrides = GaugeVec::new(
            Opts::new("frbridge_overrides", "Override store counters by event"),
            &["event"],
        )?;
        registry.register(Box::new(overrides.clone()))?;

        let injection_enabled = Gauge::with_opts(Opts::new(
            "frbridge_injection_enabled",
            "1 while template injection is enabled",
        ))?;
        registry.register(Box::new(injection_enabled.clone()))?;

        let transmissions = GaugeVec::new(
            Opts::new(
                "frbridge_transmissions",
                "Armed template transmissions by direction",
            ),
            &["direction"],
        )?;
        registry.register(Box::new(transmissions.clone()))?;

        Ok(Self {
            registry,
            connections_total,
            connections_active,
            records_exported_total,
            export_batch_bytes,
            commands_total,
            command_errors_total,
            notifications,
            frames,
            fifo,
            fifo_depth,
            injector,
            overrides,
            injection_enabled,
            transmissions,
        })
    }

    /// Copies a pipeline snapshot into the gauges.
    pub fn observe(&self, stats: &PipelineStats, transmit: &TransmitStats, enabled: bool) {
        let set = |vec: &GaugeVec, label: &str, value: u64| {
            vec.with_label_values(&[label]).set(value as f64);
        };

        set(&self.notifications, "pushed", stats.notify.pushed);
        set(&self.notifications, "dropped", stats.notify.dropped);
        set(&self.notifications, "popped", stats.notify.popped);
        set(&self.notifications, "sequence_gap", stats.notify.sequence_gaps);

        set(&self.frames, "decoded", stats.processing.frames_decoded);
        set(&self.frames, "valid", stats.processing.frames_valid);
        set(&self.frames, "invalid", stats.processing.frames_invalid);
        set(&self.frames, "decode_error", stats.processing.decode_errors);
        set(&self.frames, "oversized_span", stats.processing.oversized_spans);
        set(&self.frames, "recovered", stats.processing.frames_recovered);
        set(&self.frames, "overrun_span", stats.processing.overrun_spans);

        set(&self.fifo, "received", stats.fifo.received);
        set(&self.fifo, "dropped", stats.fifo.dropped);
        set(&self.fifo, "transmitted", stats.fifo.transmitted);
        self.fifo_depth
            .set(stats.fifo.received.saturating_sub(stats.fifo.transmitted) as f64);

        set(&self.injector, "cached", stats.engine.cached);
        set(&self.injector, "trigger_matched", stats.engine.triggers_matched);
        set(&self.injector, "injected", stats.engine.injected);
        set(&self.injector, "skipped_no_template", stats.engine.skipped_no_template);
        set(&self.injector, "skipped_bounds", stats.engine.skipped_bounds);
        set(&self.injector, "skipped_no_override", stats.engine.skipped_no_override);
        set(&self.injector, "skipped_disabled", stats.engine.skipped_disabled);

        set(&self.overrides, "accepted", stats.overrides.accepted);
        set(&self.overrides, "rejected", stats.overrides.rejected);
        set(&self.overrides, "evicted", stats.overrides.evicted);
        set(&self.overrides, "consumed", stats.overrides.consumed);

        self.injection_enabled.set(if enabled { 1.0 } else { 0.0 });
        set(&self.transmissions, "to_ecu", transmit.to_ecu);
        set(&self.transmissions, "to_vehicle", transmit.to_vehicle);
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> Vec<u8> {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::warn!("Failed to encode metrics: {}", e);
        }
        buffer
    }

    /// Returns a reference to the registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

/// Periodically copies pipeline counters into `metrics` until shutdown.
pub async fn run_stats_refresh(
    metrics: Arc<Metrics>,
    pipeline: PipelineMonitor,
    transmit: TransmitMonitor,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                metrics.observe(
                    &pipeline.stats(),
                    &transmit.stats(),
                    pipeline.injection_enabled(),
                );
            }
            _ = shutdown.recv() => break,
        }
    }
}

/// Runs the HTTP metrics server.
///
/// The server listens on the given address and serves metrics at `/metrics`.
pub async fn run_metrics_server(
    addr: SocketAddr,
    metrics: Arc<Metrics>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Metrics server listening on http://{}/metrics", addr);

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _)) => {
                        let metrics = metrics.clone();
                        tokio::spawn(async move {
                            let io = TokioIo::new(stream);
                            let service = service_fn(move |req| {
                                let metrics = metrics.clone();
                                async move { handle_request(req, metrics).await }
                            });
                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                tracing::debug!("Metrics connection error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("Metrics server accept error: {}", e);
                    }
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("Metrics server shutting down");
                break;
            }
        }
    }

    Ok(())
}

/// Handles an HTTP request to the metrics server.
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    Ok(route(req.uri().path(), &metrics))
}

fn route(path: &str, metrics: &Metrics) -> Response<Full<Bytes>> {
    match path {
        "/metrics" => {
            let mut response = Response::new(Full::new(Bytes::from(metrics.encode())));
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4; charset=utf-8"),
            );
            response
        }
        "/health" | "/healthz" => Response::new(Full::new(Bytes::from("OK"))),
        _ => {
            let mut response = Response::new(Full::new(Bytes::from("Not Found")));
            *response.status_mut() = StatusCode::NOT_FOUND;
            response
        }
    }
}
