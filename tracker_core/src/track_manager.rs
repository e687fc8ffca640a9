//! Track lifecycle management across all live tracks: association, update,
//! spawn with spatial de-duplication, loss management.
//!
//! # Per-batch pipeline
//! 1. **Associate**: greedy per-track nearest neighbour inside the
//!    association gate. Tracks are visited in ascending id order so
//!    tie-breaking is reproducible; a claimed measurement is unavailable to
//!    later tracks.
//! 2. **Update**: matched tracks fold their measurement in.
//! 3. **Spawn**: unmatched measurements seed new tracks unless they sit
//!    within the new-track gate of a live track's *updated* position or of a
//!    seed already accepted this cycle.
//! 4. **Loss**: unmatched tracks take a miss; lost tracks are erased.
//!
//! Greedy nearest neighbour is intentional: it is O(T·M) and sufficient
//! while tracks rarely compete for a measurement; a global assignment stage
//! is a different product.

use crate::cubature::CubatureFilter;
use crate::motion::ConstantAcceleration;
use crate::track::Track;
use crate::types::{Measurement, TrackId, Vec3};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Configuration for track management and the filters behind it.
#[derive(Clone, Debug)]
pub struct TrackManagerConfig {
    /// Maximum distance (m) for binding a measurement to a track
    pub association_gate_distance: f64,
    /// Minimum separation (m) a new-track seed must keep from live tracks
    /// and from other seeds of the same cycle. At most the association gate.
    pub new_track_gate_distance: f64,
    /// Hits required for confirmation
    pub confirmation_hits: u32,
    /// Consecutive misses after which a track is deleted
    pub max_misses_to_delete: u32,
    /// Observation noise std σ_meas (m)
    pub measurement_noise_std: f64,
    /// CV acceleration noise std σ_acc (m/s²)
    pub process_noise_std: f64,
    /// CA jerk noise std σ_jerk (m/s³)
    pub process_noise_std_ca: f64,
    /// Initial position variance (m²)
    pub initial_position_uncertainty: f64,
    /// Initial velocity variance (m²/s²)
    pub initial_velocity_uncertainty: f64,
    /// Initial acceleration variance (m²/s⁴)
    pub initial_acceleration_uncertainty: f64,
    /// Filter variant new tracks are built with
    pub filter: CubatureFilter,
}

impl Default for TrackManagerConfig {
    fn default() -> Self {
        Self {
            association_gate_distance: 10.0,
            new_track_gate_distance: 5.0,
            confirmation_hits: 3,
            max_misses_to_delete: 5,
            measurement_noise_std: 2.0,
            process_noise_std: 5.0,
            process_noise_std_ca: 1.0,
            initial_position_uncertainty: 10.0,
            initial_velocity_uncertainty: 100.0,
            initial_acceleration_uncertainty: 10.0,
            filter: CubatureFilter::Standard,
        }
    }
}

// ---------------------------------------------------------------------------
// Association result
// ---------------------------------------------------------------------------

/// Outcome of one association pass over a measurement batch.
#[derive(Clone, Debug, Default)]
pub struct Association {
    /// (track, index into the batch) pairs bound this cycle
    pub matches: Vec<(TrackId, usize)>,
    /// Tracks that claimed no measurement
    pub unmatched_tracks: Vec<TrackId>,
    /// Batch indexes no track claimed
    pub unmatched_measurements: Vec<usize>,
    /// Ids of the tracks in `matches`
    pub matched_track_ids: BTreeSet<TrackId>,
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// Owns the track map and drives the per-cycle pipeline. Ids are minted from
/// a local monotonic counter and never reused.
pub struct TrackManager {
    config: TrackManagerConfig,
    tracks: BTreeMap<TrackId, Track>,
    next_id: u64,
    last_process_time: Option<f64>,
}

impl TrackManager {
    pub fn new(mut config: TrackManagerConfig) -> Self {
        if config.new_track_gate_distance > config.association_gate_distance {
            warn!(
                new_track_gate = config.new_track_gate_distance,
                association_gate = config.association_gate_distance,
                "new-track gate exceeds association gate; clamping"
            );
            config.new_track_gate_distance = config.association_gate_distance;
        }
        Self {
            config,
            tracks: BTreeMap::new(),
            next_id: 0,
            last_process_time: None,
        }
    }

    /// Advance every track to `timestamp`. The first call only records the
    /// timestamp; a non-positive dt is a no-op. Does not advance the
    /// last-processed time; only [`process_measurements`](Self::process_measurements)
    /// does that.
    pub fn predict_to(&mut self, timestamp: f64) {
        let last = match self.last_process_time {
            None => {
                self.last_process_time = Some(timestamp);
                return;
            }
            Some(t) => t,
        };
        let dt = timestamp - last;
        if dt <= 0.0 {
            return;
        }

        self.tracks
            .values_mut()
            .collect::<Vec<_>>()
            .into_par_iter()
            .for_each(|track| {
                if let Err(err) = track.predict(dt) {
                    warn!(track = %track.id(), %err, "prediction skipped");
                    track.increment_misses();
                }
            });
        // A skipped prediction may have exhausted the miss budget.
        self.cull_lost();
    }

    /// Run one association / update / spawn / loss cycle over a batch sorted
    /// by ascending timestamp. An empty batch changes nothing.
    pub fn process_measurements(&mut self, measurements: &[Measurement]) {
        let last = match measurements.last() {
            None => return,
            Some(m) => m.timestamp,
        };

        let association = self.associate(measurements);
        debug!(
            matches = association.matches.len(),
            unmatched_tracks = association.unmatched_tracks.len(),
            unmatched_measurements = association.unmatched_measurements.len(),
            "association complete"
        );

        self.update_matched(&association.matches, measurements);
        // A skipped update may have exhausted the miss budget.
        self.cull_lost();
        self.spawn_new_tracks(&association.unmatched_measurements, measurements);
        self.manage_unmatched(&association.unmatched_tracks);

        self.last_process_time = Some(last);
    }

    /// Snapshot of the current track set.
    pub fn get_tracks(&self) -> Vec<Track> {
        self.tracks.values().cloned().collect()
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn last_process_time(&self) -> Option<f64> {
        self.last_process_time
    }

    pub fn config(&self) -> &TrackManagerConfig {
        &self.config
    }

    // -----------------------------------------------------------------
    // Pipeline stages
    // -----------------------------------------------------------------

    /// Greedy nearest-neighbour association: each track, in ascending id
    /// order, claims the closest unclaimed measurement inside the gate.
    fn associate(&self, measurements: &[Measurement]) -> Association {
        let mut association = Association::default();
        if self.tracks.is_empty() {
            association.unmatched_measurements = (0..measurements.len()).collect();
            return association;
        }

        let mut claimed = vec![false; measurements.len()];
        for (id, track) in &self.tracks {
            let predicted = track.position();
            let mut best: Option<(usize, f64)> = None;
            for (j, meas) in measurements.iter().enumerate() {
                if claimed[j] {
                    continue;
                }
                let dist = (predicted - meas.position).norm();
                if best.map_or(true, |(_, d)| dist < d) {
                    best = Some((j, dist));
                }
            }
            match best {
                Some((j, dist)) if dist < self.config.association_gate_distance => {
                    claimed[j] = true;
                    association.matches.push((*id, j));
                    association.matched_track_ids.insert(*id);
                }
                _ => association.unmatched_tracks.push(*id),
            }
        }

        association.unmatched_measurements = claimed
            .iter()
            .enumerate()
            .filter(|(_, taken)| !**taken)
            .map(|(j, _)| j)
            .collect();
        association
    }

    fn update_matched(&mut self, matches: &[(TrackId, usize)], measurements: &[Measurement]) {
        for (id, meas_idx) in matches {
            match self.tracks.get_mut(id) {
                Some(track) => {
                    if let Err(err) = track.update(&measurements[*meas_idx]) {
                        warn!(track = %id, %err, "update skipped");
                        track.increment_misses();
                    }
                }
                // Benign race against deletion.
                None => debug!(track = %id, "track vanished before update"),
            }
        }
    }

    /// Birth tracks from unmatched measurements. A seed within the new-track
    /// gate of any live track's current position is a duplicate return of an
    /// existing target; a seed within the gate of an already accepted seed
    /// belongs to the same spatial cluster. This stage runs after the
    /// updates, so the proximity tests see updated track positions.
    fn spawn_new_tracks(&mut self, unmatched: &[usize], measurements: &[Measurement]) {
        let gate = self.config.new_track_gate_distance;
        let mut accepted_seeds: Vec<Vec3> = Vec::new();

        for &meas_idx in unmatched {
            let meas = &measurements[meas_idx];
            let pos = meas.position;

            if let Some(near) = self
                .tracks
                .values()
                .find(|t| (t.position() - pos).norm() < gate)
            {
                debug!(
                    track = %near.id(),
                    "dropping duplicate return near existing track"
                );
                continue;
            }
            if accepted_seeds.iter().any(|s| (s - pos).norm() < gate) {
                debug!("measurement absorbed into an accepted seed cluster");
                continue;
            }

            let model = Box::new(ConstantAcceleration::new(
                self.config.process_noise_std_ca,
                self.config.initial_position_uncertainty,
                self.config.initial_velocity_uncertainty,
                self.config.initial_acceleration_uncertainty,
            ));
            let id = TrackId(self.next_id);
            match Track::new(
                meas,
                id,
                model,
                self.config.filter,
                self.config.measurement_noise_std,
                self.config.confirmation_hits,
                self.config.max_misses_to_delete,
            ) {
                Ok(track) => {
                    info!(track = %id, x = pos.x, y = pos.y, z = pos.z, "new track");
                    self.next_id += 1;
                    self.tracks.insert(id, track);
                    accepted_seeds.push(pos);
                }
                Err(err) => warn!(%err, "failed to initialise new track"),
            }
        }
    }

    fn manage_unmatched(&mut self, unmatched: &[TrackId]) {
        for id in unmatched {
            if let Some(track) = self.tracks.get_mut(id) {
                track.increment_misses();
            }
        }
        self.cull_lost();
    }

    /// Remove every track past its miss budget. Lost tracks are never
    /// observable through [`get_tracks`](Self::get_tracks).
    fn cull_lost(&mut self) {
        self.tracks.retain(|id, track| {
            if track.is_lost() {
                info!(track = %id, misses = track.misses(), "deleting lost track");
                false
            } else {
                true
            }
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
