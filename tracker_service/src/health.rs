//! HTTP health endpoint: one JSON payload describing whether the worker is
//! alive. Served by axum on a current-thread tokio runtime living on its own
//! thread, so the rest of the service stays synchronous.
//!
//! Health is heartbeat-based: a worker that has not completed a tick within
//! the staleness window is reported unhealthy even if its thread is still
//! running.

use crate::ingest::IngestHandle;
use crate::worker::WorkerStatus;
use axum::{extract::State, routing::get, Json, Router};
use chrono::{SecondsFormat, Utc};
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::oneshot;
use tracker_core::TrackManager;
use tracing::{error, info};

/// Heartbeat age beyond which the worker counts as stalled.
pub const STALE_HEARTBEAT_SECS: i64 = 30;

/// Everything the health handler needs to answer without touching the
/// worker thread.
#[derive(Clone)]
pub struct HealthState {
    pub service_name: &'static str,
    pub version: &'static str,
    pub status: Arc<WorkerStatus>,
    pub manager: Arc<RwLock<TrackManager>>,
    pub ingest: IngestHandle,
}

async fn health(State(state): State<HealthState>) -> Json<Value> {
    let now = Utc::now();
    let mut healthy = false;
    let mut details = json!({
        "activeTracks": state.manager.read().track_count(),
        "droppedMeasurements": state.ingest.dropped_count(),
    });

    match state.status.last_heartbeat() {
        Some(heartbeat) if state.status.is_running() => {
            let age = (now - heartbeat).num_seconds();
            healthy = age < STALE_HEARTBEAT_SECS;
            details["workerThread"] = json!(if healthy {
                "running"
            } else {
                "running but stalled (no heartbeat)"
            });
            details["lastHeartbeat"] =
                json!(heartbeat.to_rfc3339_opts(SecondsFormat::Secs, true));
            details["secsSinceLastHeartbeat"] = json!(age);
        }
        Some(_) | None => {
            details["workerThread"] = json!("stopped or not yet ticking");
        }
    }

    Json(json!({
        "serviceName": state.service_name,
        "version": state.version,
        "timestamp": now.to_rfc3339_opts(SecondsFormat::Secs, true),
        "healthy": healthy,
        "details": details,
    }))
}

/// Running health server; stop via [`HealthServer::stop`].
pub struct HealthServer {
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl HealthServer {
    /// Bind and serve on a dedicated thread. Bind failures are logged from
    /// that thread; the rest of the service keeps running without health
    /// reporting, matching the non-fatal taxonomy.
    pub fn start(port: u16, state: HealthState) -> std::io::Result<Self> {
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let thread = thread::Builder::new()
            .name("health-http".into())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(err) => {
                        error!(%err, "health runtime failed to start");
                        return;
                    }
                };

                runtime.block_on(async move {
                    let app = Router::new()
                        .route("/", get(health))
                        .route("/health", get(health))
                        .with_state(state);

                    let listener =
                        match tokio::net::TcpListener::bind(("0.0.0.0", port)).await {
                            Ok(listener) => listener,
                            Err(err) => {
                                error!(port, %err, "health endpoint failed to bind");
                                return;
                            }
                        };
                    info!(port, "health endpoint listening");

                    let served = axum::serve(listener, app)
                        .with_graceful_shutdown(async {
                            let _ = shutdown_rx.await;
                        })
                        .await;
                    if let Err(err) = served {
                        error!(%err, "health endpoint terminated");
                    }
                });
            })?;

        Ok(Self {
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }

    pub fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
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
    use tracker_core::TrackManagerConfig;

    fn test_state() -> HealthState {
        let (ingest, _rx) = ingest_queue(4);
        HealthState {
            service_name: "tracker_service",
            version: "0.0.0",
            status: Arc::new(WorkerStatus::default()),
            manager: Arc::new(RwLock::new(TrackManager::new(TrackManagerConfig::default()))),
            ingest,
        }
    }

    #[tokio::test]
    async fn reports_unhealthy_before_first_tick() {
        let Json(body) = health(State(test_state())).await;
        assert_eq!(body["healthy"], false);
        assert_eq!(body["details"]["workerThread"], "stopped or not yet ticking");
        assert_eq!(body["details"]["activeTracks"], 0);
        assert_eq!(body["details"]["droppedMeasurements"], 0);
        assert_eq!(body["serviceName"], "tracker_service");
    }
}
