//! `tracker_service` — Runtime around the tracking core.
//!
//! # Module layout
//! - [`config`]    — Typed configuration file (written with defaults on first run)
//! - [`ingest`]    — Wire-format decoding and the bounded ingest queue
//! - [`report`]    — Per-cycle output payload for confirmed tracks
//! - [`transport`] — Pub/sub boundary: trait, in-memory and UDP adapters
//! - [`worker`]    — Periodic tick loop driving the track manager
//! - [`health`]    — HTTP health endpoint
//! - [`service`]   — Assembly and ordered startup/shutdown

pub mod config;
pub mod health;
pub mod ingest;
pub mod report;
pub mod service;
pub mod transport;
pub mod worker;

pub use config::ServiceConfig;
pub use ingest::{ingest_queue, IngestHandle};
pub use report::CycleReport;
pub use service::Service;
pub use transport::{InMemoryTransport, Transport, TransportError, UdpTransport};
pub use worker::{Worker, WorkerHandle, WorkerStatus};
