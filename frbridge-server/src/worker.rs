//! Processing thread.

use frbridge_core::{ProcessingContext, ProcessingStats, Transmitter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Longest the processing thread sleeps before rechecking the stop flag.
pub const DEFAULT_WAIT: Duration = Duration::from_millis(50);

/// Handle to the running processing thread.
pub struct ProcessingWorker {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<ProcessingStats>,
}

impl ProcessingWorker {
    /// Starts draining notifications on a dedicated thread.
    pub fn spawn<T>(
        mut processing: ProcessingContext,
        mut transmitter: T,
        wait: Duration,
    ) -> std::io::Result<Self>
    where
        T: Transmitter + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let handle = thread::Builder::new()
            .name("frbridge-processing".to_string())
            .spawn(move || {
                tracing::debug!("Processing thread started");
                while !flag.load(Ordering::Acquire) {
                    processing.wait_and_process(wait, &mut transmitter);
                }
                let drained = processing.drain(&mut transmitter);
                tracing::debug!("Processing thread stopped ({} drained on exit)", drained);
                processing.stats()
            })?;
        Ok(Self { stop, handle })
    }

    /// Signals the thread to stop and waits for it.
    pub fn stop(self) -> Option<ProcessingStats> {
        self.stop.store(true, Ordering::Release);
        self.handle.join().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transmit::LogTransmitter;
    use frbridge_core::{build, PipelineConfig};
    use frbridge_protocol::{Frame, Indicators, Source};
    use std::time::Instant;

    #[test]
    fn test_worker_processes_captured_frames() {
        let pipeline = build(PipelineConfig {
            ring_bytes: 1024,
            notify_capacity: 64,
            fifo_capacity: 64,
            ..PipelineConfig::default()
        })
        .unwrap();
        let mut capture = pipeline.capture;
        let mut export = pipeline.export;
        let worker = ProcessingWorker::spawn(
            pipeline.processing,
            LogTransmitter::new(),
            Duration::from_millis(5),
        )
        .unwrap();

        for id in 0..10u16 {
            let frame = Frame::new(id, 0, Indicators::new(), &[0xAB; 8], Source::Ecu).unwrap();
            capture.capture_frame(Source::Ecu, &frame.encode()).unwrap();
        }

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut exported = Vec::new();
        while exported.len() < 10 && Instant::now() < deadline {
            match export.pop() {
                Some(frame) => exported.push(frame.frame_id),
                None => thread::yield_now(),
            }
        }
        assert_eq!(exported, (0..10).collect::<Vec<_>>());

        let stats = worker.stop().unwrap();
        assert_eq!(stats.frames_valid, 10);
    }
}
