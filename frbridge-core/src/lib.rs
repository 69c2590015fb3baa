//! # frbridge-core
//!
//! Frame processing engine for the frbridge bus interceptor.
//!
//! This crate provides:
//! - Lock-free single-producer/single-consumer rings
//! - Capture rings and frame-boundary notifications with gap detection
//! - The processing context: decode, validate, export and trigger
//! - Cache/trigger rules and the template injection engine
//! - A bounded host override store
//! - The tail-drop output queue feeding the host export path
//!
//! ## Architecture
//!
//! ```text
//! capture ──bytes──> CaptureRing[ecu|vehicle]
//!    │                      │
//!    └──NotificationEvent──>│
//!                           v
//!                  ProcessingContext ──Frame──> FifoWriter ··· FifoReader ──> export
//!                           │
//!                           v
//!                     TriggerEngine ──armed bytes──> Transmitter
//!                           ^
//!                           │
//!                    InjectorHandle <── host commands
//! ```

pub mod capture;
pub mod error;
pub mod fifo;
pub mod injector;
pub mod notify;
pub mod overrides;
pub mod pipeline;
pub mod ring;
pub mod rules;

pub use capture::{CaptureContext, CaptureRing, MAX_CAPTURE_RING_BYTES, MIN_CAPTURE_RING_BYTES};
pub use error::CoreError;
pub use fifo::{FifoMonitor, FifoReader, FifoStats, FifoWriter, DEFAULT_FIFO_CAPACITY};
pub use injector::{
    EngineOutcome, EngineStats, FrameTemplate, InjectorHandle, SkipReason, Transmitter,
    TriggerEngine,
};
pub use notify::{NotificationEvent, NotifyMonitor, NotifyReceiver, NotifySender, NotifyStats};
pub use overrides::{HostOverride, OverrideRing, OverrideStats, DEFAULT_OVERRIDE_CAPACITY};
pub use pipeline::{
    build, FrameOutcome, Pipeline, PipelineConfig, PipelineMonitor, PipelineStats,
    ProcessingContext, ProcessingStats,
};
pub use rules::{CacheRule, RuleSet, TriggerRule};
