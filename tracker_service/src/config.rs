//! Service configuration: a typed, read-only parameter bundle loaded at
//! startup from a TOML file. A missing file is written back with defaults so
//! operators always have a template to edit; an unreadable file is logged
//! and replaced by defaults in memory.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracker_core::{CubatureFilter, TrackManagerConfig};
use tracing::{info, warn};

/// Default configuration file name, next to the binary's working directory.
pub const DEFAULT_CONFIG_FILE: &str = "Server.toml";

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    #[serde(rename = "General")]
    pub general: GeneralSection,
    #[serde(rename = "HealthCheck")]
    pub health_check: HealthCheckSection,
    #[serde(rename = "KalmanFilter")]
    pub kalman_filter: KalmanFilterSection,
    #[serde(rename = "Transport")]
    pub transport: TransportSection,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GeneralSection {
    /// Worker tick interval in milliseconds
    pub worker_interval: u64,
}

impl Default for GeneralSection {
    fn default() -> Self {
        Self {
            worker_interval: 100,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HealthCheckSection {
    pub port: u16,
}

impl Default for HealthCheckSection {
    fn default() -> Self {
        Self { port: 8899 }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct KalmanFilterSection {
    /// CV acceleration noise std (m/s²)
    pub process_noise_std: f64,
    /// CA jerk noise std (m/s³)
    #[serde(rename = "processNoiseStd_CA")]
    pub process_noise_std_ca: f64,
    /// Observation noise std (m)
    pub measurement_noise_std: f64,
    pub initial_position_uncertainty: f64,
    pub initial_velocity_uncertainty: f64,
    pub initial_acceleration_uncertainty: f64,
    pub association_gate_distance: f64,
    pub new_track_gate_distance: f64,
    pub confirmation_hits: u32,
    pub max_misses_to_delete: u32,
    /// Carry covariance square roots instead of full matrices
    pub use_square_root: bool,
}

impl Default for KalmanFilterSection {
    fn default() -> Self {
        Self {
            process_noise_std: 5.0,
            process_noise_std_ca: 1.0,
            measurement_noise_std: 2.0,
            initial_position_uncertainty: 10.0,
            initial_velocity_uncertainty: 100.0,
            initial_acceleration_uncertainty: 10.0,
            association_gate_distance: 10.0,
            new_track_gate_distance: 5.0,
            confirmation_hits: 3,
            max_misses_to_delete: 5,
            use_square_root: false,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TransportSection {
    /// UDP port measurements arrive on
    pub listen_port: u16,
    /// Peer address cycle reports are published to
    pub peer_addr: String,
}

impl Default for TransportSection {
    fn default() -> Self {
        Self {
            listen_port: 47800,
            peer_addr: "127.0.0.1:47801".to_owned(),
        }
    }
}

impl ServiceConfig {
    /// Load the configuration, creating the file with defaults when absent.
    /// Never fails: an unreadable or unparsable file falls back to defaults.
    pub fn load_or_init(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(text) => match toml::from_str(&text) {
                Ok(config) => {
                    info!(path = %path.display(), "configuration loaded");
                    config
                }
                Err(err) => {
                    warn!(path = %path.display(), %err, "configuration unreadable; using defaults");
                    Self::default()
                }
            },
            Err(_) => {
                let config = Self::default();
                match toml::to_string_pretty(&config) {
                    Ok(text) => match std::fs::write(path, text) {
                        Ok(()) => info!(path = %path.display(), "wrote default configuration"),
                        Err(err) => {
                            warn!(path = %path.display(), %err, "could not write default configuration")
                        }
                    },
                    Err(err) => warn!(%err, "could not serialise default configuration"),
                }
                config
            }
        }
    }

    pub fn worker_interval(&self) -> Duration {
        Duration::from_millis(self.general.worker_interval)
    }

    /// Project the filter section into the core's manager configuration.
    pub fn tracker_config(&self) -> TrackManagerConfig {
        let kf = &self.kalman_filter;
        TrackManagerConfig {
            association_gate_distance: kf.association_gate_distance,
            new_track_gate_distance: kf.new_track_gate_distance,
            confirmation_hits: kf.confirmation_hits,
            max_misses_to_delete: kf.max_misses_to_delete,
            measurement_noise_std: kf.measurement_noise_std,
            process_noise_std: kf.process_noise_std,
            process_noise_std_ca: kf.process_noise_std_ca,
            initial_position_uncertainty: kf.initial_position_uncertainty,
            initial_velocity_uncertainty: kf.initial_velocity_uncertainty,
            initial_acceleration_uncertainty: kf.initial_acceleration_uncertainty,
            filter: if kf.use_square_root {
                CubatureFilter::SquareRoot
            } else {
                CubatureFilter::Standard
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = ServiceConfig::default();
        assert_eq!(config.general.worker_interval, 100);
        assert_eq!(config.health_check.port, 8899);
        assert_eq!(config.kalman_filter.process_noise_std, 5.0);
        assert_eq!(config.kalman_filter.process_noise_std_ca, 1.0);
        assert_eq!(config.kalman_filter.confirmation_hits, 3);
        assert_eq!(config.kalman_filter.max_misses_to_delete, 5);
        assert!(!config.kalman_filter.use_square_root);
    }

    #[test]
    fn parses_camel_case_keys_and_fills_gaps() {
        let text = r#"
            [General]
            workerInterval = 50

            [KalmanFilter]
            processNoiseStd_CA = 2.5
            associationGateDistance = 20.0
            useSquareRoot = true
        "#;
        let config: ServiceConfig = toml::from_str(text).unwrap();
        assert_eq!(config.general.worker_interval, 50);
        assert_eq!(config.kalman_filter.process_noise_std_ca, 2.5);
        assert_eq!(config.kalman_filter.association_gate_distance, 20.0);
        // untouched keys keep their defaults
        assert_eq!(config.kalman_filter.new_track_gate_distance, 5.0);
        assert_eq!(config.health_check.port, 8899);

        let tracker = config.tracker_config();
        assert_eq!(tracker.process_noise_std_ca, 2.5);
        assert_eq!(tracker.filter, CubatureFilter::SquareRoot);
    }

    #[test]
    fn round_trips_through_toml() {
        let config = ServiceConfig::default();
        let text = toml::to_string_pretty(&config).unwrap();
        assert!(text.contains("[KalmanFilter]"));
        assert!(text.contains("processNoiseStd_CA"));
        let back: ServiceConfig = toml::from_str(&text).unwrap();
        assert_eq!(back.kalman_filter.measurement_noise_std, 2.0);
        assert_eq!(back.transport.peer_addr, "127.0.0.1:47801");
    }

    #[test]
    fn missing_file_is_written_with_defaults() {
        let path = std::env::temp_dir().join(format!(
            "tracker-config-test-{}.toml",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);

        let config = ServiceConfig::load_or_init(&path);
        assert_eq!(config.general.worker_interval, 100);
        assert!(path.exists(), "defaults must be persisted");

        let reloaded = ServiceConfig::load_or_init(&path);
        assert_eq!(reloaded.health_check.port, 8899);
        let _ = std::fs::remove_file(&path);
    }
}
