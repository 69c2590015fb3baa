//! frbridge - FlexRay in-line interceptor bridge
//!
//! Captures frames on both sides of the interceptor, exports valid frames to
//! the host over TCP and injects host-modified templates on trigger frames.

use frbridge_core::build;
use frbridge_server::metrics::{run_metrics_server, run_stats_refresh};
use frbridge_server::{
    Config, LogTransmitter, Metrics, ProcessingWorker, ReplaySource, Server, ServerConfig,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

const STATS_REFRESH_INTERVAL: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration (from file if FRBRIDGE_CONFIG is set, then env overrides)
    let config_path = std::env::var("FRBRIDGE_CONFIG").ok();
    let config = match Config::load() {
        Ok(c) => {
            if let Some(ref path) = config_path {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            // If a config file was explicitly specified, fail on error
            if config_path.is_some() {
                tracing::error!("Failed to load config: {}", e);
                return Err(e.into());
            }
            tracing::info!("Using default configuration");
            Config::default()
        }
    };

    if let Err(e) = config.validate() {
        tracing::error!("Invalid configuration: {}", e);
        return Err(e.into());
    }

    tracing::info!("Starting frbridge");
    tracing::info!("  Bind address: {}", config.network.bind);
    tracing::info!(
        "  Capture rings: {} bytes, {} notification slots",
        config.capture.ring_bytes,
        config.capture.notify_capacity
    );
    tracing::info!("  Output queue: {} frames", config.fifo.capacity);
    tracing::info!(
        "  Injection: {} ({} cache rule(s), {} trigger rule(s))",
        if config.injector.enabled {
            "enabled"
        } else {
            "disabled"
        },
        config.injector.cache_rules.len(),
        config.injector.trigger_rules.len()
    );

    let pipeline = build(config.pipeline_config())?;
    let monitor = pipeline.monitor.clone();

    // Processing thread
    let transmitter = LogTransmitter::new();
    let transmit_monitor = transmitter.monitor();
    let worker = ProcessingWorker::spawn(
        pipeline.processing,
        transmitter,
        frbridge_server::worker::DEFAULT_WAIT,
    )?;

    // Capture thread, fed from a capture file when one is configured
    let replay_stop = Arc::new(AtomicBool::new(false));
    let replay_handle = match config.capture.replay_file {
        Some(ref path) => {
            let source = ReplaySource::from_file(
                path,
                config.capture.replay_interval(),
                config.capture.replay_loop,
            )?;
            tracing::info!("  Replay: {} ({} frames)", path.display(), source.len());
            Some(source.spawn(pipeline.capture, replay_stop.clone())?)
        }
        None => {
            tracing::info!("  Replay: none, no frames will be captured");
            None
        }
    };

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let mut server_config = ServerConfig::new(config.network.bind)
        .with_max_connections(config.network.max_connections)
        .with_export_batch_bytes(config.network.export_batch_bytes);

    // Metrics endpoint and counter refresh
    let mut background = Vec::new();
    if config.metrics.enabled {
        let metrics = Arc::new(Metrics::new()?);
        server_config = server_config.with_metrics(metrics.clone());

        let addr = config.metrics.bind;
        let rx = shutdown_tx.subscribe();
        let m = metrics.clone();
        background.push(tokio::spawn(async move {
            if let Err(e) = run_metrics_server(addr, m, rx).await {
                tracing::error!("Metrics server error: {}", e);
            }
        }));

        background.push(tokio::spawn(run_stats_refresh(
            metrics,
            monitor.clone(),
            transmit_monitor.clone(),
            STATS_REFRESH_INTERVAL,
            shutdown_tx.subscribe(),
        )));
    } else {
        tracing::info!("  Metrics: disabled");
    }

    let server = Arc::new(Server::new(
        server_config,
        pipeline.injector,
        pipeline.export,
    ));

    // Spawn shutdown signal handler
    let shutdown_server = server.clone();
    let shutdown_background = shutdown_tx.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal, stopping bridge...");
        shutdown_server.shutdown();
        let _ = shutdown_background.send(());
    });

    // Run server (blocks until shutdown)
    server.run().await?;

    for handle in background {
        let _ = handle.await;
    }

    replay_stop.store(true, Ordering::Release);
    if let Some(handle) = replay_handle {
        if handle.join().is_err() {
            tracing::error!("Capture thread panicked");
        }
    }

    match worker.stop() {
        Some(stats) => tracing::info!(
            "Processed {} frames ({} valid, {} invalid, {} recovered, {} decode errors, {} oversized, {} overrun)",
            stats.frames_decoded,
            stats.frames_valid,
            stats.frames_invalid,
            stats.frames_recovered,
            stats.decode_errors,
            stats.oversized_spans,
            stats.overrun_spans
        ),
        None => tracing::error!("Processing thread panicked"),
    }

    let final_stats = monitor.stats();
    let transmitted = transmit_monitor.stats();
    tracing::info!(
        "Output queue: {} received, {} dropped; injected {}; transmitted {} to ECU, {} to vehicle",
        final_stats.fifo.received,
        final_stats.fifo.dropped,
        final_stats.engine.injected,
        transmitted.to_ecu,
        transmitted.to_vehicle
    );

    tracing::info!("Bridge stopped");
    Ok(())
}
