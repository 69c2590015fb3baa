//! Capture replay source.
//!
//! Feeds frames from a capture file into the capture rings, standing in
//! for the bus sampling front end. A capture file is a plain sequence of
//! export records, the same bytes a host receives over the transport.

use crate::error::ServerError;
use bytes::Bytes;
use frbridge_core::CaptureContext;
use frbridge_protocol::{Decoder, Frame, Source};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Totals for one replay run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub frames_captured: u64,
    pub notifications_dropped: u64,
    pub passes: u64,
}

/// Parses a capture file into frames.
///
/// A truncated final record is ignored with a warning; any other
/// malformed record fails the whole file.
pub fn load_capture(path: impl AsRef<Path>) -> Result<Vec<Frame>, ServerError> {
    let path = path.as_ref();
    let content = std::fs::read(path).map_err(|e| ServerError::CaptureFile {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let mut decoder = Decoder::new();
    decoder.extend(&content);

    let mut frames = Vec::new();
    loop {
        match decoder.decode_record() {
            Ok(Some(frame)) => frames.push(frame),
            Ok(None) => break,
            Err(e) => {
                return Err(ServerError::CaptureFile {
                    path: path.to_path_buf(),
                    reason: format!("record {}: {}", frames.len(), e),
                })
            }
        }
    }

    if decoder.buffered() > 0 {
        tracing::warn!(
            "Capture file {} ends with {} bytes of a partial record",
            path.display(),
            decoder.buffered()
        );
    }
    Ok(frames)
}

/// Paced replay of captured frames.
pub struct ReplaySource {
    frames: Vec<(Source, Bytes)>,
    interval: Duration,
    looping: bool,
}

impl ReplaySource {
    pub fn new(frames: &[Frame], interval: Duration, looping: bool) -> Self {
        Self {
            frames: frames
                .iter()
                .map(|f| (f.source, f.encode().freeze()))
                .collect(),
            interval,
            looping,
        }
    }

    pub fn from_file(
        path: impl AsRef<Path>,
        interval: Duration,
        looping: bool,
    ) -> Result<Self, ServerError> {
        let frames = load_capture(path)?;
        Ok(Self::new(&frames, interval, looping))
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Captures every frame in order until the file is exhausted (or,
    /// when looping, until `stop` is set).
    pub fn run(&self, capture: &mut CaptureContext, stop: &AtomicBool) -> ReplayStats {
        let mut stats = ReplayStats::default();
        if self.frames.is_empty() {
            return stats;
        }

        'replay: loop {
            for (source, bytes) in &self.frames {
                if stop.load(Ordering::Relaxed) {
                    break 'replay;
                }
                match capture.capture_frame(*source, bytes) {
                    Ok(true) => stats.frames_captured += 1,
                    Ok(false) => {
                        stats.frames_captured += 1;
                        stats.notifications_dropped += 1;
                    }
                    Err(e) => tracing::warn!("Replay skipped frame: {}", e),
                }
                if !self.interval.is_zero() {
                    thread::sleep(self.interval);
                }
            }
            stats.passes += 1;
            if !self.looping {
                break;
            }
        }
        stats
    }

    /// Runs the replay on a dedicated capture thread.
    pub fn spawn(
        self,
        mut capture: CaptureContext,
        stop: Arc<AtomicBool>,
    ) -> std::io::Result<JoinHandle<ReplayStats>> {
        thread::Builder::new()
            .name("frbridge-capture".to_string())
            .spawn(move || {
                tracing::info!(
                    "Replaying {} frames{}",
                    self.len(),
                    if self.looping { " (looping)" } else { "" }
                );
                let stats = self.run(&mut capture, &stop);
                tracing::info!(
                    "Replay finished: {} frames in {} passes, {} notifications dropped",
                    stats.frames_captured,
                    stats.passes,
                    stats.notifications_dropped
                );
                stats
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use frbridge_core::notify;
    use frbridge_protocol::{Encoder, Indicators};
    use tempfile::TempDir;

    fn frames() -> Vec<Frame> {
        (0..4u16)
            .map(|i| {
                let source = if i % 2 == 0 { Source::Ecu } else { Source::Vehicle };
                Frame::new(0x100 + i, i as u8, Indicators::new(), &[i as u8; 6], source).unwrap()
            })
            .collect()
    }

    fn write_capture(dir: &TempDir, frames: &[Frame], tail: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join("capture.bin");
        let mut bytes = Vec::new();
        for frame in frames {
            bytes.extend_from_slice(&Encoder::encode_record(frame));
        }
        bytes.extend_from_slice(tail);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn test_load_capture() {
        let dir = TempDir::new().unwrap();
        let path = write_capture(&dir, &frames(), &[]);
        assert_eq!(load_capture(&path).unwrap(), frames());
    }

    #[test]
    fn test_load_ignores_partial_tail() {
        let dir = TempDir::new().unwrap();
        let path = write_capture(&dir, &frames(), &[0x10, 0x00, 0x00]);
        assert_eq!(load_capture(&path).unwrap().len(), 4);
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        let path = write_capture(&dir, &frames()[..1], &[0x02, 0x00, 0x00, 0x00]);
        let err = load_capture(&path).unwrap_err();
        assert_eq!(err.error_code(), "CAPTURE_FILE_ERROR");
        assert!(err.to_string().contains("record 1"));
    }

    #[test]
    fn test_replay_feeds_capture_rings() {
        let (sender, mut receiver) = notify::channel(16).unwrap();
        let mut capture = CaptureContext::new(1024, sender).unwrap();
        let source = ReplaySource::new(&frames(), Duration::ZERO, false);

        let stats = source.run(&mut capture, &AtomicBool::new(false));
        assert_eq!(stats.frames_captured, 4);
        assert_eq!(stats.passes, 1);

        let sources: Vec<Source> = std::iter::from_fn(|| receiver.pop())
            .map(|ev| ev.source)
            .collect();
        assert_eq!(
            sources,
            vec![Source::Ecu, Source::Vehicle, Source::Ecu, Source::Vehicle]
        );
    }

    #[test]
    fn test_looping_replay_stops_on_signal() {
        let (sender, mut receiver) = notify::channel(16).unwrap();
        let capture = CaptureContext::new(1024, sender).unwrap();
        let stop = Arc::new(AtomicBool::new(false));
        let source = ReplaySource::new(&frames(), Duration::from_micros(100), true);

        let handle = source.spawn(capture, stop.clone()).unwrap();
        let mut seen = 0;
        while seen < 20 {
            if receiver.pop().is_some() {
                seen += 1;
            } else {
                thread::yield_now();
            }
        }
        stop.store(true, Ordering::Relaxed);

        let stats = handle.join().unwrap();
        assert!(stats.passes >= 4);
        assert!(stats.frames_captured >= 20);
    }
}
