//! Transmit sink for armed templates.
//!
//! There is no bus driver behind the bridge daemon; armed frames are
//! logged and counted per direction.

use frbridge_core::Transmitter;
use frbridge_protocol::{Direction, Frame, Source};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Transmission counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransmitStats {
    pub to_ecu: u64,
    pub to_vehicle: u64,
    pub bytes: u64,
}

#[derive(Default)]
struct Counters {
    to_ecu: AtomicU64,
    to_vehicle: AtomicU64,
    bytes: AtomicU64,
}

/// Logs every armed frame.
#[derive(Default)]
pub struct LogTransmitter {
    counters: Arc<Counters>,
}

impl LogTransmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn monitor(&self) -> TransmitMonitor {
        TransmitMonitor {
            counters: self.counters.clone(),
        }
    }
}

impl Transmitter for LogTransmitter {
    fn arm_transmission(&mut self, direction: Direction, bytes: &[u8]) {
        let counter = match direction {
            Direction::ToEcu => &self.counters.to_ecu,
            Direction::ToVehicle => &self.counters.to_vehicle,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.counters
            .bytes
            .fetch_add(bytes.len() as u64, Ordering::Relaxed);

        match Frame::decode(bytes, Source::Unknown) {
            Ok(frame) => tracing::debug!(
                "TX {} id={:#05x} cycle={} {}",
                direction.as_str(),
                frame.frame_id,
                frame.cycle_count,
                hex::encode(bytes)
            ),
            Err(e) => tracing::warn!("TX {} undecodable template: {}", direction.as_str(), e),
        }
    }
}

/// Read-only view of the transmit counters.
#[derive(Clone)]
pub struct TransmitMonitor {
    counters: Arc<Counters>,
}

impl TransmitMonitor {
    pub fn stats(&self) -> TransmitStats {
        TransmitStats {
            to_ecu: self.counters.to_ecu.load(Ordering::Relaxed),
            to_vehicle: self.counters.to_vehicle.load(Ordering::Relaxed),
            bytes: self.counters.bytes.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use frbridge_protocol::Indicators;

    #[test]
    fn test_counts_per_direction() {
        let mut tx = LogTransmitter::new();
        let monitor = tx.monitor();
        let frame = Frame::new(0x44, 6, Indicators::new(), &[1, 2, 3, 4], Source::Ecu).unwrap();
        let bytes = frame.encode();

        tx.arm_transmission(Direction::ToEcu, &bytes);
        tx.arm_transmission(Direction::ToEcu, &bytes);
        tx.arm_transmission(Direction::ToVehicle, &bytes);

        assert_eq!(
            monitor.stats(),
            TransmitStats {
                to_ecu: 2,
                to_vehicle: 1,
                bytes: 3 * bytes.len() as u64,
            }
        );
    }
}
