//! Runtime configuration

use std::path::PathBuf;
use std::time::Duration;

use geomesh_spatial::PrivacyLevel;

/// Corroboration lifetime bonus
pub const CORROBORATION_BONUS: Duration = Duration::from_secs(10 * 60);
/// Route sampling radius around each segment midpoint, in metres
pub const ROUTE_SAMPLE_RADIUS_METERS: f64 = 500.0;
/// Maximum user-to-business distance for a review, in metres
pub const MAX_REVIEW_DISTANCE_METERS: f64 = 500.0;
/// Default QR code validity window
pub const QR_VALIDITY: Duration = Duration::from_secs(30 * 60);
/// Fixed persistence key for the hazard cache
pub const HAZARD_STORAGE_KEY: &str = "geomesh_hazard_cache";

/// Traffic/hazard coordinator configuration
#[derive(Clone, Debug)]
pub struct CoordinatorConfig {
    /// Lifetime added per corroboration
    pub corroboration_bonus: Duration,
    /// Target number of segments when sampling a route
    pub route_segments: usize,
    pub route_sample_radius_meters: f64,
    /// Fuzzing applied to outgoing traffic samples
    pub traffic_privacy: PrivacyLevel,
    /// Fuzzing applied to outgoing hazard reports
    pub hazard_privacy: PrivacyLevel,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        CoordinatorConfig {
            corroboration_bonus: CORROBORATION_BONUS,
            route_segments: 10,
            route_sample_radius_meters: ROUTE_SAMPLE_RADIUS_METERS,
            traffic_privacy: PrivacyLevel::Medium,
            hazard_privacy: PrivacyLevel::High,
        }
    }
}

impl CoordinatorConfig {
    pub fn with_corroboration_bonus(mut self, bonus: Duration) -> Self {
        self.corroboration_bonus = bonus;
        self
    }

    pub fn with_route_segments(mut self, segments: usize) -> Self {
        self.route_segments = segments.max(1);
        self
    }

    pub fn with_route_sample_radius(mut self, meters: f64) -> Self {
        self.route_sample_radius_meters = meters;
        self
    }

    pub fn with_traffic_privacy(mut self, level: PrivacyLevel) -> Self {
        self.traffic_privacy = level;
        self
    }

    pub fn with_hazard_privacy(mut self, level: PrivacyLevel) -> Self {
        self.hazard_privacy = level;
        self
    }
}

/// Per-code options when a business issues a QR code
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QrCodeConfig {
    pub validity: Duration,
}

impl Default for QrCodeConfig {
    fn default() -> Self {
        QrCodeConfig {
            validity: QR_VALIDITY,
        }
    }
}

impl QrCodeConfig {
    pub fn with_validity(mut self, validity: Duration) -> Self {
        self.validity = validity;
        self
    }
}

/// Proof-of-presence service configuration
#[derive(Clone, Debug)]
pub struct QrConfig {
    pub max_review_distance_meters: f64,
    /// How long consumed QR codes are remembered
    pub replay_retention: Duration,
}

impl Default for QrConfig {
    fn default() -> Self {
        QrConfig {
            max_review_distance_meters: MAX_REVIEW_DISTANCE_METERS,
            replay_retention: geomesh_crypto::DEFAULT_REPLAY_RETENTION,
        }
    }
}

impl QrConfig {
    pub fn with_max_review_distance(mut self, meters: f64) -> Self {
        self.max_review_distance_meters = meters;
        self
    }

    pub fn with_replay_retention(mut self, retention: Duration) -> Self {
        self.replay_retention = retention;
        self
    }
}

/// Node event-loop configuration
#[derive(Clone, Debug)]
pub struct NodeConfig {
    /// Expired report and replay-guard purge interval
    pub sweep_interval: Duration,
    /// Re-broadcast interval for the last traffic sample
    pub traffic_refresh_interval: Duration,
    /// Capacity of the inbound event and command queues
    pub queue_capacity: usize,
    /// Directory for the hazard cache file; in-memory when unset
    pub storage_dir: Option<PathBuf>,
    pub coordinator: CoordinatorConfig,
    pub qr: QrConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            sweep_interval: Duration::from_secs(60 * 60),
            traffic_refresh_interval: Duration::from_secs(30),
            queue_capacity: 1024,
            storage_dir: None,
            coordinator: CoordinatorConfig::default(),
            qr: QrConfig::default(),
        }
    }
}

impl NodeConfig {
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_traffic_refresh_interval(mut self, interval: Duration) -> Self {
        self.traffic_refresh_interval = interval;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn with_storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage_dir = Some(dir.into());
        self
    }

    pub fn with_coordinator(mut self, config: CoordinatorConfig) -> Self {
        self.coordinator = config;
        self
    }

    pub fn with_qr(mut self, config: QrConfig) -> Self {
        self.qr = config;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let node = NodeConfig::default();
        assert_eq!(node.sweep_interval, Duration::from_secs(3600));
        assert_eq!(node.traffic_refresh_interval, Duration::from_secs(30));
        assert!(node.storage_dir.is_none());
        assert_eq!(node.coordinator.route_segments, 10);
        assert_eq!(node.coordinator.corroboration_bonus, Duration::from_secs(600));
        assert_eq!(node.qr.max_review_distance_meters, 500.0);
        assert_eq!(QrCodeConfig::default().validity, Duration::from_secs(1800));
    }

    #[test]
    fn test_builders() {
        let config = CoordinatorConfig::default()
            .with_route_segments(0)
            .with_hazard_privacy(PrivacyLevel::Maximum);
        assert_eq!(config.route_segments, 1);
        assert_eq!(config.hazard_privacy, PrivacyLevel::Maximum);

        let node = NodeConfig::default()
            .with_queue_capacity(0)
            .with_storage_dir("/tmp/geomesh");
        assert_eq!(node.queue_capacity, 1);
        assert_eq!(node.storage_dir, Some(PathBuf::from("/tmp/geomesh")));
    }
}
