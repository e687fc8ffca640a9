//! Service assembly: configuration → manager → ingest queue → worker thread
//! → health endpoint, with ordered shutdown. Ownership is a tree (service ⊃
//! worker ⊃ manager ⊃ tracks); the transport is a handle passed in by the
//! caller, never a global.

use crate::config::ServiceConfig;
use crate::health::{HealthServer, HealthState};
use crate::ingest::{ingest_queue, IngestHandle, DEFAULT_QUEUE_CAPACITY};
use crate::transport::Transport;
use crate::worker::{Worker, WorkerHandle};
use anyhow::Context;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracker_core::TrackManager;
use tracing::info;

/// How long shutdown waits for the worker thread before detaching it.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

pub struct Service {
    worker: Option<WorkerHandle>,
    health: Option<HealthServer>,
    ingest: IngestHandle,
    running: Arc<AtomicBool>,
    listener: Option<JoinHandle<()>>,
}

impl Service {
    /// Wire everything up and start the worker and health threads. The
    /// caller connects the transport's receive path to [`Service::ingest`]
    /// (for the UDP transport, via `spawn_listener` + [`Service::attach_listener`]).
    pub fn start(config: &ServiceConfig, transport: Arc<dyn Transport>) -> anyhow::Result<Self> {
        info!("starting service");
        let manager = Arc::new(RwLock::new(TrackManager::new(config.tracker_config())));
        let (ingest, measurements) = ingest_queue(DEFAULT_QUEUE_CAPACITY);

        let worker = Worker::new(manager.clone(), measurements, transport);
        let status = worker.status();
        let handle = worker
            .spawn(config.worker_interval())
            .context("spawning worker thread")?;

        let health = HealthServer::start(
            config.health_check.port,
            HealthState {
                service_name: env!("CARGO_PKG_NAME"),
                version: env!("CARGO_PKG_VERSION"),
                status,
                manager,
                ingest: ingest.clone(),
            },
        )
        .context("spawning health endpoint")?;

        info!("service started");
        Ok(Self {
            worker: Some(handle),
            health: Some(health),
            ingest,
            running: Arc::new(AtomicBool::new(true)),
            listener: None,
        })
    }

    /// Producer handle for the transport's receive path.
    pub fn ingest(&self) -> IngestHandle {
        self.ingest.clone()
    }

    /// Shared flag background receive loops should watch.
    pub fn running(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    /// Adopt a transport receive thread so shutdown joins it.
    pub fn attach_listener(&mut self, listener: JoinHandle<()>) {
        self.listener = Some(listener);
    }

    /// Ordered shutdown: worker first (grace-bounded), then health, then the
    /// transport receive thread.
    pub fn stop(mut self) {
        info!("stopping service");
        self.running.store(false, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            worker.stop(SHUTDOWN_GRACE);
        }
        if let Some(health) = self.health.take() {
            health.stop();
        }
        if let Some(listener) = self.listener.take() {
            let _ = listener.join();
        }
        info!("service stopped");
    }

    /// Block until SIGINT, then stop.
    pub fn run_until_shutdown(self) -> anyhow::Result<()> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("building signal runtime")?;
        runtime
            .block_on(tokio::signal::ctrl_c())
            .context("waiting for shutdown signal")?;
        info!("shutdown signal received");
        self.stop();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::InMemoryTransport;
    use std::thread;

    #[test]
    fn service_runs_a_full_ingest_to_publish_path() {
        let config = ServiceConfig {
            general: crate::config::GeneralSection { worker_interval: 10 },
            health_check: crate::config::HealthCheckSection { port: 0 },
            ..Default::default()
        };
        let transport = Arc::new(InMemoryTransport::new());
        let service = Service::start(&config, transport.clone()).unwrap();
        let ingest = service.ingest();

        for k in 0..4 {
            let payload = format!(
                r#"{{"ObserverId": 9, "Timestamp": {}, "Position": {{"x": 5.0, "y": 5.0, "z": 0.0}}}}"#,
                0.1 * k as f64
            );
            ingest.on_receive(payload.as_bytes());
            thread::sleep(Duration::from_millis(15));
        }

        service.stop();
        assert!(
            transport.published_count() >= 1,
            "confirmed track must have been published"
        );
    }
}
