//! Worker: the time-driven loop at the heart of the service.
//!
//! One dedicated thread owns the tick. Per cycle it drains the ingest
//! queue, sorts the batch by timestamp, advances the manager to the batch's
//! latest time, folds the batch in, then publishes a report of the confirmed
//! tracks. The tick thread is the sole mutator of the manager; readers (the
//! health endpoint) take the shared side of the lock. No I/O happens while
//! the manager lock is held.

use crate::report::CycleReport;
use crate::transport::Transport;
use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, select, tick, Receiver, RecvTimeoutError, Sender};
use parking_lot::RwLock;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracker_core::types::Measurement;
use tracker_core::{Track, TrackManager};
use tracing::{error, info, warn};

// ---------------------------------------------------------------------------
// Status shared with readers
// ---------------------------------------------------------------------------

/// Heartbeat and running flag, readable from any thread.
#[derive(Debug, Default)]
pub struct WorkerStatus {
    /// Microseconds since the Unix epoch of the last completed tick; 0
    /// before the first tick.
    heartbeat_micros: AtomicI64,
    running: AtomicBool,
}

impl WorkerStatus {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Timestamp of the last completed tick, if any tick has completed.
    pub fn last_heartbeat(&self) -> Option<DateTime<Utc>> {
        let micros = self.heartbeat_micros.load(Ordering::Relaxed);
        if micros == 0 {
            return None;
        }
        DateTime::from_timestamp_micros(micros)
    }

    fn beat(&self) {
        self.heartbeat_micros
            .store(Utc::now().timestamp_micros(), Ordering::Relaxed);
    }

    fn set_running(&self, value: bool) {
        self.running.store(value, Ordering::Relaxed);
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

pub struct Worker {
    manager: Arc<RwLock<TrackManager>>,
    measurements: Receiver<Measurement>,
    transport: Arc<dyn Transport>,
    status: Arc<WorkerStatus>,
}

impl Worker {
    pub fn new(
        manager: Arc<RwLock<TrackManager>>,
        measurements: Receiver<Measurement>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            manager,
            measurements,
            transport,
            status: Arc::new(WorkerStatus::default()),
        }
    }

    pub fn status(&self) -> Arc<WorkerStatus> {
        self.status.clone()
    }

    pub fn manager(&self) -> Arc<RwLock<TrackManager>> {
        self.manager.clone()
    }

    /// Start the tick thread. The worker moves into the thread; interact
    /// with it through the returned handle.
    pub fn spawn(self, interval: Duration) -> io::Result<WorkerHandle> {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let (done_tx, done_rx) = bounded::<()>(1);
        let status = self.status.clone();
        let manager = self.manager.clone();

        let thread = thread::Builder::new()
            .name("tracker-worker".into())
            .spawn(move || self.run(interval, stop_rx, done_tx))?;

        Ok(WorkerHandle {
            thread: Some(thread),
            stop_tx,
            done_rx,
            status,
            manager,
        })
    }

    fn run(mut self, interval: Duration, stop_rx: Receiver<()>, done_tx: Sender<()>) {
        info!(interval_ms = interval.as_millis() as u64, "worker started");
        self.status.set_running(true);
        let ticker = tick(interval);
        loop {
            select! {
                recv(ticker) -> _ => self.run_cycle(),
                recv(stop_rx) -> _ => break,
            }
        }
        self.status.set_running(false);
        info!("worker stopped");
        let _ = done_tx.send(());
    }

    /// One tick: drain, sort, advance, associate, publish, heartbeat. An
    /// empty cycle only emits the heartbeat. Public so offline tooling can
    /// drive cycles without a timer.
    pub fn run_cycle(&mut self) {
        let mut batch: Vec<Measurement> = self.measurements.try_iter().collect();
        if !batch.is_empty() {
            batch.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));

            // Mutation and snapshot under the write lock; no I/O here.
            let snapshot: Vec<Track> = {
                let mut manager = self.manager.write();
                if let Some(last) = batch.last() {
                    manager.predict_to(last.timestamp);
                }
                manager.process_measurements(&batch);
                manager.get_tracks()
            };

            let report = CycleReport::build(&snapshot, Utc::now());
            if !report.is_empty() {
                match serde_json::to_vec(&report) {
                    Ok(payload) => {
                        if let Err(err) = self.transport.publish(&payload) {
                            warn!(%err, "publish failed; retrying next cycle");
                        }
                    }
                    Err(err) => error!(%err, "could not serialise cycle report"),
                }
            }
        }

        self.status.beat();
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Owner-side handle of a spawned worker.
pub struct WorkerHandle {
    thread: Option<JoinHandle<()>>,
    stop_tx: Sender<()>,
    done_rx: Receiver<()>,
    status: Arc<WorkerStatus>,
    manager: Arc<RwLock<TrackManager>>,
}

impl WorkerHandle {
    pub fn status(&self) -> Arc<WorkerStatus> {
        self.status.clone()
    }

    pub fn manager(&self) -> Arc<RwLock<TrackManager>> {
        self.manager.clone()
    }

    /// Cooperative stop: the loop exits at the next select wake-up. Waits up
    /// to `grace` for the thread, then detaches with a warning (the thread
    /// cannot be forced).
    pub fn stop(mut self, grace: Duration) {
        let _ = self.stop_tx.send(());
        match self.done_rx.recv_timeout(grace) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(thread) = self.thread.take() {
                    let _ = thread.join();
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(grace_s = grace.as_secs(), "worker did not stop in time; detaching");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::ingest_queue;
    use crate::transport::InMemoryTransport;
    use tracker_core::TrackManagerConfig;

    fn payload(observer: i64, t: f64, x: f64) -> Vec<u8> {
        format!(
            r#"{{"ObserverId": {observer}, "Timestamp": {t}, "Position": {{"x": {x}, "y": 0.0, "z": 0.0}}}}"#
        )
        .into_bytes()
    }

    fn test_worker() -> (Worker, crate::ingest::IngestHandle, Arc<InMemoryTransport>) {
        let manager = Arc::new(RwLock::new(TrackManager::new(TrackManagerConfig::default())));
        let (handle, rx) = ingest_queue(64);
        let transport = Arc::new(InMemoryTransport::new());
        let worker = Worker::new(manager, rx, transport.clone());
        (worker, handle, transport)
    }

    #[test]
    fn empty_cycle_beats_heartbeat_without_publishing() {
        let (mut worker, _handle, transport) = test_worker();
        let status = worker.status();
        assert!(status.last_heartbeat().is_none());

        worker.run_cycle();
        assert!(status.last_heartbeat().is_some());
        assert_eq!(transport.published_count(), 0);
    }

    #[test]
    fn confirmed_tracks_are_published_as_json() {
        let (mut worker, handle, transport) = test_worker();

        for k in 0..3 {
            handle.on_receive(&payload(1, 0.1 * k as f64, 0.1 * k as f64));
            worker.run_cycle();
        }

        let published = transport.take_published();
        assert_eq!(published.len(), 1, "report only once confirmed");
        let json: serde_json::Value = serde_json::from_slice(&published[0]).unwrap();
        assert_eq!(json["tracks"][0]["id"], 0);
        assert_eq!(json["tracks"][0]["hits"], 3);
        assert_eq!(
            json["tracks"][0]["future_trajectory"].as_array().unwrap().len(),
            4
        );
        assert!(json["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn empty_batch_does_not_republish_confirmed_tracks() {
        let (mut worker, handle, transport) = test_worker();
        for k in 0..3 {
            handle.on_receive(&payload(1, 0.1 * k as f64, 0.0));
            worker.run_cycle();
        }
        assert_eq!(transport.published_count(), 1);

        worker.run_cycle();
        assert_eq!(transport.published_count(), 1, "no publish without input");
    }

    #[test]
    fn out_of_order_batch_is_sorted_before_processing() {
        let (mut worker, handle, _transport) = test_worker();
        let manager = worker.manager();

        handle.on_receive(&payload(1, 0.3, 0.0));
        handle.on_receive(&payload(1, 0.1, 0.0));
        handle.on_receive(&payload(1, 0.2, 0.0));
        worker.run_cycle();

        assert_eq!(manager.read().last_process_time(), Some(0.3));
    }

    #[test]
    fn undecodable_and_anonymous_messages_never_reach_the_manager() {
        let (mut worker, handle, _transport) = test_worker();
        let manager = worker.manager();

        handle.on_receive(b"garbage");
        handle.on_receive(br#"{"Timestamp": 1.0, "Position": {"x":0,"y":0,"z":0}}"#);
        worker.run_cycle();

        assert_eq!(manager.read().track_count(), 0);
    }

    #[test]
    fn spawned_worker_ticks_and_stops_cleanly() {
        let (worker, handle, transport) = test_worker();
        let status = worker.status();
        let spawned = worker.spawn(Duration::from_millis(10)).unwrap();

        for k in 0..5 {
            handle.on_receive(&payload(1, 0.1 * k as f64, 0.0));
            thread::sleep(Duration::from_millis(15));
        }
        assert!(status.is_running());
        assert!(status.last_heartbeat().is_some());

        spawned.stop(Duration::from_secs(2));
        assert!(!status.is_running());
        assert!(transport.published_count() >= 1);
    }
}
