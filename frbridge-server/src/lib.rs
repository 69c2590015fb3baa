//! # frbridge-server
//!
//! Bridge daemon components for frbridge.
//!
//! This crate provides:
//! - YAML + environment configuration
//! - TCP host transport: export record streaming and command intake
//! - Host command handling against the injector
//! - Prometheus metrics and the `/metrics` endpoint
//! - Capture replay source and logging transmit sink
//! - The processing thread

pub mod config;
pub mod error;
pub mod handler;
pub mod metrics;
pub mod replay;
pub mod server;
pub mod transmit;
pub mod worker;

pub use config::{
    CaptureConfig, Config, ConfigError, FifoConfig, InjectorConfig, MetricsConfig, NetworkConfig,
};
pub use error::ServerError;
pub use handler::CommandHandler;
pub use metrics::Metrics;
pub use replay::{load_capture, ReplaySource, ReplayStats};
pub use server::{Server, ServerConfig, ServerStats};
pub use transmit::{LogTransmitter, TransmitMonitor, TransmitStats};
pub use worker::ProcessingWorker;
