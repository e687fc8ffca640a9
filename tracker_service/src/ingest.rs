//! Measurement ingest: wire-format decoding plus the bounded queue between
//! the transport's receive path and the worker tick thread.
//!
//! The queue is drop-newest under pressure: when the worker falls behind and
//! the queue is full, the incoming measurement is discarded and a counter is
//! incremented (surfaced through the health endpoint). The receive path
//! never blocks.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use serde::Deserialize;
use tracker_core::types::{Measurement, ObserverId, Vec3};
use tracing::{debug, warn};

/// High-water mark of the ingest queue. At 100 ms ticks this is far more
/// than any expected per-cycle burst.
pub const DEFAULT_QUEUE_CAPACITY: usize = 4096;

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct MeasurementMsg {
    /// Optional by design: a report without an observer id is silently
    /// discarded rather than treated as a decode error.
    #[serde(rename = "ObserverId")]
    observer_id: Option<i64>,
    #[serde(rename = "Timestamp")]
    timestamp: f64,
    #[serde(rename = "Position")]
    position: PositionMsg,
}

#[derive(Debug, Deserialize)]
struct PositionMsg {
    x: f64,
    y: f64,
    z: f64,
}

/// Decode one inbound payload. `Ok(None)` means a well-formed message that
/// carries no observer id and is to be dropped without noise.
pub fn decode_measurement(payload: &[u8]) -> Result<Option<Measurement>, serde_json::Error> {
    let msg: MeasurementMsg = serde_json::from_slice(payload)?;
    let Some(observer_id) = msg.observer_id else {
        return Ok(None);
    };
    Ok(Some(Measurement::new(
        Vec3::new(msg.position.x, msg.position.y, msg.position.z),
        msg.timestamp,
        ObserverId(observer_id),
    )))
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

/// Producer side of the ingest queue, handed to the transport's receive
/// path. Cloneable; all clones share the drop counter.
#[derive(Clone)]
pub struct IngestHandle {
    tx: Sender<Measurement>,
    dropped: Arc<AtomicU64>,
}

impl IngestHandle {
    /// Transport receive callback: decode and enqueue without blocking.
    pub fn on_receive(&self, payload: &[u8]) {
        match decode_measurement(payload) {
            Ok(Some(measurement)) => self.push(measurement),
            Ok(None) => {}
            Err(err) => warn!(%err, "dropping undecodable measurement"),
        }
    }

    /// Enqueue an already-decoded measurement (used by tests and tooling).
    pub fn push(&self, measurement: Measurement) {
        match self.tx.try_send(measurement) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(total, "ingest queue full; measurement dropped");
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!("ingest queue consumer gone; measurement dropped");
            }
        }
    }

    /// Total measurements discarded because the queue was full.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Create the bounded queue connecting transport and worker. The worker tick
/// thread is the sole consumer of the returned receiver.
pub fn ingest_queue(capacity: usize) -> (IngestHandle, Receiver<Measurement>) {
    let (tx, rx) = bounded(capacity);
    (
        IngestHandle {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        },
        rx,
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_well_formed_message() {
        let payload =
            br#"{"ObserverId": 3, "Timestamp": 12.5, "Position": {"x": 1.0, "y": -2.0, "z": 0.5}}"#;
        let meas = decode_measurement(payload).unwrap().unwrap();
        assert_eq!(meas.observer_id, ObserverId(3));
        assert_eq!(meas.timestamp, 12.5);
        assert_eq!(meas.position, Vec3::new(1.0, -2.0, 0.5));
    }

    #[test]
    fn missing_observer_id_is_silently_dropped() {
        let payload = br#"{"Timestamp": 1.0, "Position": {"x": 0.0, "y": 0.0, "z": 0.0}}"#;
        assert!(decode_measurement(payload).unwrap().is_none());
    }

    #[test]
    fn malformed_payloads_are_errors() {
        assert!(decode_measurement(b"not json").is_err());
        // missing Position
        assert!(decode_measurement(br#"{"ObserverId": 1, "Timestamp": 1.0}"#).is_err());
        // wrong type
        assert!(decode_measurement(
            br#"{"ObserverId": 1, "Timestamp": "soon", "Position": {"x":0,"y":0,"z":0}}"#
        )
        .is_err());
    }

    #[test]
    fn queue_drops_newest_when_full() {
        let (handle, rx) = ingest_queue(2);
        for k in 0..5 {
            let payload = format!(
                r#"{{"ObserverId": 1, "Timestamp": {k}, "Position": {{"x":0,"y":0,"z":0}}}}"#
            );
            handle.on_receive(payload.as_bytes());
        }
        assert_eq!(handle.dropped_count(), 3);

        // The two oldest made it through.
        let kept: Vec<f64> = rx.try_iter().map(|m| m.timestamp).collect();
        assert_eq!(kept, vec![0.0, 1.0]);
    }

    #[test]
    fn undecodable_payload_does_not_enter_queue() {
        let (handle, rx) = ingest_queue(4);
        handle.on_receive(b"{broken");
        assert!(rx.try_iter().next().is_none());
        assert_eq!(handle.dropped_count(), 0, "decode errors are not overflow");
    }
}
