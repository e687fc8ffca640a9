//! Per-cycle output payload: confirmed tracks with position, velocity and a
//! short-horizon predicted trajectory.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tracker_core::types::Vec3;
use tracker_core::Track;

/// Future trajectory horizon (seconds) and step between points.
pub const TRAJECTORY_HORIZON_S: f64 = 2.0;
pub const TRAJECTORY_STEP_S: f64 = 0.5;

#[derive(Clone, Copy, Debug, Serialize)]
pub struct Xyz {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl From<Vec3> for Xyz {
    fn from(v: Vec3) -> Self {
        Self {
            x: v.x,
            y: v.y,
            z: v.z,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct TrackReport {
    pub id: u64,
    pub hits: u32,
    pub position: Xyz,
    pub velocity: Xyz,
    pub future_trajectory: Vec<Xyz>,
}

impl TrackReport {
    fn from_track(track: &Track) -> Self {
        Self {
            id: track.id().0,
            hits: track.hits(),
            position: track.position().into(),
            // components 3..5 for every model; CA keeps acceleration in 6..8
            velocity: track.velocity().into(),
            future_trajectory: track
                .predict_future_trajectory(TRAJECTORY_HORIZON_S, TRAJECTORY_STEP_S)
                .into_iter()
                .map(Xyz::from)
                .collect(),
        }
    }
}

/// One published cycle: UTC wall-clock timestamp plus every confirmed track.
#[derive(Clone, Debug, Serialize)]
pub struct CycleReport {
    pub timestamp: String,
    pub tracks: Vec<TrackReport>,
}

impl CycleReport {
    /// Build a report from the confirmed subset of a track snapshot.
    pub fn build(tracks: &[Track], now: DateTime<Utc>) -> Self {
        Self {
            timestamp: now.to_rfc3339_opts(SecondsFormat::Secs, true),
            tracks: tracks
                .iter()
                .filter(|t| t.is_confirmed())
                .map(TrackReport::from_track)
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
