//! Processing context and pipeline assembly.
//!
//! [`build`] wires the capture side, the processing side and the export
//! side together from one [`PipelineConfig`]. The processing context pops
//! notifications in order, cuts each frame out of its capture ring,
//! decodes and validates it, queues valid frames for export and feeds
//! them to the trigger engine.
//!
//! A span runs from the end of the previous frame in that direction to the
//! notified end offset. When a notification was dropped the span holds
//! more than one frame; valid frames at its front are handled first, in
//! capture order.

use crate::capture::{CaptureContext, CaptureRing};
use crate::error::CoreError;
use crate::fifo::{self, FifoMonitor, FifoReader, FifoStats, FifoWriter};
use crate::injector::{EngineStats, InjectorHandle, Transmitter, TriggerEngine};
use crate::notify::{self, NotificationEvent, NotifyMonitor, NotifyReceiver, NotifyStats};
use crate::overrides::OverrideStats;
use crate::rules::RuleSet;
use frbridge_protocol::{Direction, Frame, ProtocolError, MAX_FRAME_BYTES};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Sizing and rules for one pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub ring_bytes: usize,
    pub notify_capacity: usize,
    pub fifo_capacity: usize,
    pub override_capacity: usize,
    pub injection_enabled: bool,
    pub rules: RuleSet,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ring_bytes: 4096,
            notify_capacity: 1024,
            fifo_capacity: fifo::DEFAULT_FIFO_CAPACITY,
            override_capacity: crate::overrides::DEFAULT_OVERRIDE_CAPACITY,
            injection_enabled: false,
            rules: RuleSet::default(),
        }
    }
}

/// All halves of a freshly built pipeline.
pub struct Pipeline {
    pub capture: CaptureContext,
    pub processing: ProcessingContext,
    pub export: FifoReader,
    pub injector: InjectorHandle,
    pub monitor: PipelineMonitor,
}

/// Builds a pipeline from `config`.
pub fn build(config: PipelineConfig) -> Result<Pipeline, CoreError> {
    let (sender, receiver) = notify::channel(config.notify_capacity)?;
    let (writer, reader) = fifo::output_queue(config.fifo_capacity)?;
    let (engine, injector) = TriggerEngine::new(
        config.rules,
        config.override_capacity,
        config.injection_enabled,
    )?;

    let notify_monitor = sender.monitor();
    let capture = CaptureContext::new(config.ring_bytes, sender)?;
    let processing = ProcessingContext::new(receiver, capture.rings(), engine, writer);

    let monitor = PipelineMonitor {
        notify: notify_monitor,
        fifo: reader.monitor(),
        processing: processing.counters.clone(),
        injector: injector.clone(),
    };

    Ok(Pipeline {
        capture,
        processing,
        export: reader,
        injector,
        monitor,
    })
}

/// Processing context counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessingStats {
    pub frames_decoded: u64,
    pub frames_valid: u64,
    pub frames_invalid: u64,
    pub decode_errors: u64,
    pub oversized_spans: u64,
    /// Frames found ahead of a notified frame after a dropped notification.
    pub frames_recovered: u64,
    /// Spans the capture side overwrote before they were processed.
    pub overrun_spans: u64,
}

#[derive(Default)]
struct ProcessingCounters {
    frames_decoded: AtomicU64,
    frames_valid: AtomicU64,
    frames_invalid: AtomicU64,
    decode_errors: AtomicU64,
    oversized_spans: AtomicU64,
    frames_recovered: AtomicU64,
    overrun_spans: AtomicU64,
}

/// What happened to one notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Valid frame: queued for export (`exported == false` if the queue
    /// was full) and run through the trigger engine.
    Accepted {
        frame_id: u16,
        cycle_count: u8,
        exported: bool,
        armed: Option<Direction>,
    },
    /// Decoded but failed CRC checks.
    Invalid { frame_id: u16 },
    Malformed(ProtocolError),
    Oversized { len: usize },
    /// The capture side lapped the ring before the span was read.
    Overrun { len: usize },
    UnknownSource,
}

/// State owned by the processing execution context.
pub struct ProcessingContext {
    notifications: NotifyReceiver,
    rings: [Arc<CaptureRing>; 2],
    last_end: [u32; 2],
    scratch: [u8; MAX_FRAME_BYTES],
    engine: TriggerEngine,
    fifo: FifoWriter,
    counters: Arc<ProcessingCounters>,
}

impl ProcessingContext {
    fn new(
        notifications: NotifyReceiver,
        rings: [Arc<CaptureRing>; 2],
        engine: TriggerEngine,
        fifo: FifoWriter,
    ) -> Self {
        Self {
            notifications,
            rings,
            last_end: [0; 2],
            scratch: [0; MAX_FRAME_BYTES],
            engine,
            fifo,
            counters: Arc::new(ProcessingCounters::default()),
        }
    }

    /// Handles the next pending notification, `None` if there is none.
    pub fn process_next<T: Transmitter + ?Sized>(&mut self, tx: &mut T) -> Option<FrameOutcome> {
        let event = self.notifications.pop()?;
        Some(self.handle(event, tx))
    }

    /// Like [`process_next`](Self::process_next) but waits up to
    /// `timeout` for the capture side's wake signal.
    pub fn wait_and_process<T: Transmitter + ?Sized>(
        &mut self,
        timeout: Duration,
        tx: &mut T,
    ) -> Option<FrameOutcome> {
        let event = self.notifications.wait(timeout)?;
        Some(self.handle(event, tx))
    }

    /// Processes every pending notification; returns how many were handled.
    pub fn drain<T: Transmitter + ?Sized>(&mut self, tx: &mut T) -> usize {
        let mut handled = 0;
        while self.process_next(tx).is_some() {
            handled += 1;
        }
        handled
    }

    fn handle<T: Transmitter + ?Sized>(
        &mut self,
        event: NotificationEvent,
        tx: &mut T,
    ) -> FrameOutcome {
        let Self {
            rings,
            last_end,
            scratch,
            engine,
            fifo,
            counters,
            ..
        } = self;

        let Some(idx) = event.source.index() else {
            counters.decode_errors.fetch_add(1, Ordering::Relaxed);
            return FrameOutcome::UnknownSource;
        };

        let ring = &rings[idx];
        let mut start = last_end[idx];
        let end = event.end_offset;
        last_end[idx] = end;

        loop {
            let len = CaptureRing::span_len(start, end);
            let n = len.min(MAX_FRAME_BYTES);
            ring.read_into(start, &mut scratch[..n]);
            if ring.overwritten(start) {
                counters.overrun_spans.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Capture ring overrun: {} byte span lost", len);
                return FrameOutcome::Overrun { len };
            }
            let raw = &scratch[..n];
            let decoded = Frame::decode_slice(raw, n, event.source);

            // A dropped notification leaves its frame in front of ours.
            // Only a frame that checks out is taken as a boundary.
            if let Ok(frame) = &decoded {
                let wire_len = frame.wire_len();
                if wire_len < len && frame.is_valid(&raw[..wire_len]) {
                    counters.frames_recovered.fetch_add(1, Ordering::Relaxed);
                    counters.frames_decoded.fetch_add(1, Ordering::Relaxed);
                    counters.frames_valid.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(
                        "Recovered frame 0x{:03X} ahead of notification {}",
                        frame.frame_id,
                        event.sequence
                    );
                    fifo.push(*frame);
                    engine.process(frame, &raw[..wire_len], tx);
                    start = start.wrapping_add(wire_len as u32);
                    continue;
                }
            }

            if len > MAX_FRAME_BYTES {
                counters.oversized_spans.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Oversized capture span: {} bytes", len);
                return FrameOutcome::Oversized { len };
            }

            let frame = match decoded {
                Ok(frame) => frame,
                Err(e) => {
                    counters.decode_errors.fetch_add(1, Ordering::Relaxed);
                    tracing::trace!("Decode error ({}): {}", e.error_code(), e);
                    return FrameOutcome::Malformed(e);
                }
            };
            counters.frames_decoded.fetch_add(1, Ordering::Relaxed);

            if !frame.is_valid(raw) {
                counters.frames_invalid.fetch_add(1, Ordering::Relaxed);
                return FrameOutcome::Invalid {
                    frame_id: frame.frame_id,
                };
            }
            counters.frames_valid.fetch_add(1, Ordering::Relaxed);

            let exported = fifo.push(frame);
            let engine = engine.process(&frame, raw, tx);

            return FrameOutcome::Accepted {
                frame_id: frame.frame_id,
                cycle_count: frame.cycle_count,
                exported,
                armed: engine.armed,
            };
        }
    }

    pub fn engine(&self) -> &TriggerEngine {
        &self.engine
    }

    pub fn stats(&self) -> ProcessingStats {
        snapshot(&self.counters)
    }
}

fn snapshot(counters: &ProcessingCounters) -> ProcessingStats {
    ProcessingStats {
        frames_decoded: counters.frames_decoded.load(Ordering::Relaxed),
        frames_valid: counters.frames_valid.load(Ordering::Relaxed),
        frames_invalid: counters.frames_invalid.load(Ordering::Relaxed),
        decode_errors: counters.decode_errors.load(Ordering::Relaxed),
        oversized_spans: counters.oversized_spans.load(Ordering::Relaxed),
        frames_recovered: counters.frames_recovered.load(Ordering::Relaxed),
        overrun_spans: counters.overrun_spans.load(Ordering::Relaxed),
    }
}

/// Combined statistics for the whole pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub notify: NotifyStats,
    pub processing: ProcessingStats,
    pub fifo: FifoStats,
    pub engine: EngineStats,
    pub overrides: OverrideStats,
}

/// Thread-safe read-only view of every pipeline counter.
#[derive(Clone)]
pub struct PipelineMonitor {
    notify: NotifyMonitor,
    fifo: FifoMonitor,
    processing: Arc<ProcessingCounters>,
    injector: InjectorHandle,
}

impl PipelineMonitor {
    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            notify: self.notify.stats(),
            processing: snapshot(&self.processing),
            fifo: self.fifo.stats(),
            engine: self.injector.engine_stats(),
            overrides: self.injector.override_stats(),
        }
    }

    pub fn fifo_depth(&self) -> u64 {
        self.fifo.depth()
    }

    pub fn injection_enabled(&self) -> bool {
        self.injector.injection_enabled()
    }
}
