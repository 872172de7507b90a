//! End-to-end scenarios
//!
//! Drives a [`GeoSwarm`] through whole reporting flows:
//! - Hazard propagation over both delivery paths
//! - Corroboration converging on one count
//! - Catch-up through the relay after a partition
//! - Proof-of-presence reviews travelling between peers

use std::time::Duration;

use geomesh_core::{GeoLocation, HazardType, Severity};
use geomesh_runtime::{HazardInput, QrCodeConfig, TrafficSample};

use crate::harness::{ChaosConfig, DeliveryStats, GeoSwarm};

/// Spacing between reporters, roughly 110 m of latitude
const REPORTER_SPACING_DEGREES: f64 = 0.001;

// ============================================================================
// SCENARIO CONFIGURATION
// ============================================================================

#[derive(Clone, Debug)]
pub struct ScenarioConfig {
    pub peer_count: usize,
    /// Hazards reported by every peer
    pub reports_per_peer: usize,
    pub chaos: ChaosConfig,
    pub seed: u64,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        ScenarioConfig {
            peer_count: 4,
            reports_per_peer: 2,
            chaos: ChaosConfig::perfect(),
            seed: 7,
        }
    }
}

impl ScenarioConfig {
    pub fn with_chaos(mut self, chaos: ChaosConfig, seed: u64) -> Self {
        self.chaos = chaos;
        self.seed = seed;
        self
    }
}

/// What a propagation run ended with
#[derive(Clone, Debug)]
pub struct ScenarioResult {
    pub hazards_reported: usize,
    /// Hazards held by each peer at the end
    pub hazards_per_peer: Vec<usize>,
    /// Peers holding the same report under two entries
    pub duplicate_views: usize,
    pub converged: bool,
    pub delivery: DeliveryStats,
    pub errors: Vec<String>,
}

impl ScenarioResult {
    pub fn passed(&self) -> bool {
        self.errors.is_empty() && self.converged && self.duplicate_views == 0
    }
}

/// Location of the `n`th reporter around a fixed origin
pub fn reporter_location(swarm: &GeoSwarm, n: usize) -> GeoLocation {
    GeoLocation::new(
        52.5200 + n as f64 * REPORTER_SPACING_DEGREES,
        13.4050,
        swarm.now(),
    )
}

// ============================================================================
// SCENARIOS
// ============================================================================

/// Every peer reports hazards, then the swarm is pumped until quiet
pub fn run_hazard_propagation(config: &ScenarioConfig) -> ScenarioResult {
    let mut swarm = GeoSwarm::new(config.peer_count).with_chaos(config.chaos.clone(), config.seed);
    let mut errors = Vec::new();
    let mut reported = 0;

    for peer in 0..swarm.len() {
        for n in 0..config.reports_per_peer {
            let location = reporter_location(&swarm, peer * config.reports_per_peer + n);
            let input = HazardInput::new(location, HazardType::Accident, Severity::Medium)
                .with_description(format!("report {} from peer {}", n, peer));
            match swarm.peer_mut(peer).node.coordinator_mut().report_hazard(input) {
                Ok(_) => reported += 1,
                Err(e) => errors.push(format!("peer {} report {}: {}", peer, n, e)),
            }
            swarm.advance(Duration::from_millis(5));
        }
    }
    swarm.pump();

    let hazards_per_peer: Vec<usize> = swarm
        .peers()
        .iter()
        .map(|p| p.node.coordinator().hazard_count())
        .collect();
    let duplicate_views = hazards_per_peer.iter().filter(|&&n| n > reported).count();

    ScenarioResult {
        hazards_reported: reported,
        hazards_per_peer,
        duplicate_views,
        converged: swarm.converged(),
        delivery: swarm.stats().clone(),
        errors,
    }
}

/// One peer reports, every other peer corroborates it.
/// Returns the final verification count seen by each peer.
pub fn run_corroboration(peer_count: usize) -> Vec<Option<u32>> {
    let mut swarm = GeoSwarm::new(peer_count);
    let location = reporter_location(&swarm, 0);
    let id = match swarm
        .peer_mut(0)
        .node
        .coordinator_mut()
        .report_hazard(HazardInput::new(location, HazardType::RoadClosed, Severity::High))
    {
        Ok(id) => id,
        Err(_) => return vec![None; peer_count],
    };
    swarm.pump();

    for peer in 1..swarm.len() {
        swarm.peer_mut(peer).node.coordinator_mut().verify_incident(&id);
        swarm.pump();
    }
    swarm.verification_counts(&id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geomesh_core::{CongestionLevel, Coordinate, GeoError};
    use geomesh_core::HAZARD_TTL;
    use geomesh_runtime::CORROBORATION_BONUS;

    #[test]
    fn test_basic_propagation() {
        let result = run_hazard_propagation(&ScenarioConfig::default());
        assert!(result.passed(), "{:?}", result);
        assert_eq!(result.hazards_reported, 8);
        assert_eq!(result.hazards_per_peer, vec![8; 4]);
    }

    #[test]
    fn test_propagation_with_duplicates_and_reordering() {
        for seed in 0..5 {
            let config = ScenarioConfig::default().with_chaos(ChaosConfig::noisy(), seed);
            let result = run_hazard_propagation(&config);
            assert!(result.passed(), "seed {}: {:?}", seed, result);
            assert!(result.delivery.duplicated > 0);
        }
    }

    #[test]
    fn test_lossy_network_never_duplicates() {
        let config = ScenarioConfig {
            peer_count: 6,
            reports_per_peer: 3,
            ..ScenarioConfig::default()
        }
        .with_chaos(ChaosConfig::hostile(), 42);
        let result = run_hazard_propagation(&config);

        assert!(result.errors.is_empty());
        assert_eq!(result.duplicate_views, 0);
        // Each reporter always keeps its own hazards
        assert!(result.hazards_per_peer.iter().all(|&n| n >= 3));
        assert!(result.delivery.dropped > 0);
    }

    #[test]
    fn test_corroboration_converges() {
        assert_eq!(run_corroboration(2), vec![Some(2); 2]);
        assert_eq!(run_corroboration(5), vec![Some(5); 5]);
    }

    #[test]
    fn test_corroboration_extends_only_verifier() {
        let mut swarm = GeoSwarm::new(2);
        let location = reporter_location(&swarm, 0);
        let id = swarm
            .peer_mut(0)
            .node
            .coordinator_mut()
            .report_hazard(HazardInput::new(location, HazardType::Accident, Severity::Low))
            .unwrap();
        swarm.pump();
        let original = swarm.peer(0).node.coordinator().hazard(&id).unwrap().expires_at;

        swarm.peer_mut(1).node.coordinator_mut().verify_incident(&id);
        swarm.pump();

        let reporter = swarm.peer(0).node.coordinator().hazard(&id).unwrap();
        let verifier = swarm.peer(1).node.coordinator().hazard(&id).unwrap();
        assert_eq!(reporter.verification_count, 2);
        assert_eq!(reporter.expires_at, original);
        assert_eq!(verifier.expires_at, original + CORROBORATION_BONUS);
        assert_eq!(
            swarm.relay().hazard(&id).unwrap().expires_at,
            original + CORROBORATION_BONUS
        );
    }

    #[test]
    fn test_catch_up_after_partition() {
        let mut swarm = GeoSwarm::new(2);
        swarm.partition(1);
        let location = reporter_location(&swarm, 0);
        swarm
            .peer_mut(0)
            .node
            .coordinator_mut()
            .report_hazard(HazardInput::new(location.clone(), HazardType::Weather, Severity::Medium))
            .unwrap();
        swarm.pump();
        assert_eq!(swarm.peer(1).node.coordinator().hazard_count(), 0);

        swarm.heal(1);
        let local = swarm
            .peer(1)
            .node
            .coordinator()
            .get_nearby_incidents(&location, 5_000.0);
        assert!(local.is_empty());
        swarm.pump();

        assert_eq!(swarm.peer(1).node.coordinator().hazard_count(), 1);
        assert!(swarm.converged());
    }

    #[test]
    fn test_expiry_everywhere() {
        let mut swarm = GeoSwarm::new(3);
        let location = reporter_location(&swarm, 0);
        swarm
            .peer_mut(0)
            .node
            .coordinator_mut()
            .report_hazard(HazardInput::new(location.clone(), HazardType::Police, Severity::Low))
            .unwrap();
        swarm
            .peer_mut(1)
            .node
            .coordinator_mut()
            .report_hazard(HazardInput::new(location, HazardType::Construction, Severity::Low))
            .unwrap();
        swarm.pump();
        assert_eq!(swarm.verification_counts("missing"), vec![None; 3]);

        swarm.advance(Duration::from_secs(31 * 60));
        swarm.sweep_all();
        for peer in swarm.peers() {
            assert_eq!(peer.node.coordinator().hazard_count(), 1);
        }

        swarm.advance(HAZARD_TTL);
        swarm.sweep_all();
        assert!(swarm.peers().iter().all(|p| p.node.coordinator().hazard_count() == 0));
        assert_eq!(swarm.relay().hazard_count(), 0);
    }

    #[test]
    fn test_traffic_reaches_route_view() {
        let mut swarm = GeoSwarm::new(2);
        let location = reporter_location(&swarm, 0);
        swarm
            .peer_mut(0)
            .node
            .coordinator_mut()
            .report_traffic(TrafficSample::new(location.clone(), 4.0).with_free_flow_speed(50.0))
            .unwrap();
        swarm.pump();

        let viewer = swarm.peer(1).node.coordinator();
        assert_eq!(viewer.traffic_count(), 1);

        let route = [
            Coordinate::new(location.latitude - 0.001, location.longitude),
            Coordinate::new(location.latitude + 0.001, location.longitude),
        ];
        let segments = viewer.get_route_traffic(&route);
        assert_eq!(segments.len(), 1);
        assert!(segments[0].has_data);
        assert_eq!(segments[0].congestion_level, Some(CongestionLevel::Standstill));
    }

    #[test]
    fn test_review_travels_between_peers() {
        let mut swarm = GeoSwarm::new(3);
        let shop = reporter_location(&swarm, 0);
        swarm
            .peer_mut(0)
            .node
            .qr_mut()
            .register_business("cafe-1", "Corner Cafe", shop.clone());
        let code = swarm
            .peer(0)
            .node
            .qr()
            .generate_signed_qr_code("cafe-1", &QrCodeConfig::default())
            .unwrap();

        let visitor = swarm.peer(1).identity().clone();
        let at_counter = GeoLocation::new(shop.latitude + 0.0005, shop.longitude, swarm.now());
        let review = swarm
            .peer_mut(1)
            .node
            .qr_mut()
            .validate_qr_code_and_create_review(
                &code,
                5,
                Some("great coffee".into()),
                &at_counter,
                &visitor,
            )
            .unwrap();
        assert!(swarm.peer(1).node.qr().broadcast_review(&review));
        swarm.pump();

        for peer in swarm.peers() {
            let reviews = peer.node.qr().reviews_for("cafe-1");
            assert_eq!(reviews.len(), 1, "{}", peer.name);
            assert_eq!(reviews[0].id, review.id);
        }
        assert_eq!(swarm.peer(0).node.stats().reviews_accepted, 1);

        // The same code cannot back a second review on another device
        let other = swarm.peer(2).identity().clone();
        let second = swarm
            .peer_mut(2)
            .node
            .qr_mut()
            .validate_qr_code_and_create_review(&code, 1, None, &at_counter, &other)
            .unwrap();
        assert!(swarm.peer(2).node.qr().broadcast_review(&second));
        swarm.pump();
        assert_eq!(swarm.peer(0).node.qr().reviews_for("cafe-1").len(), 1);
        assert_eq!(
            swarm
                .peer_mut(0)
                .node
                .qr_mut()
                .accept_remote_review(&geomesh_crypto::codec::encode_report(&second).unwrap())
                .unwrap_err(),
            GeoError::ProofAlreadyUsed
        );
    }

    #[test]
    fn test_restart_mid_scenario() {
        let mut swarm = GeoSwarm::new(2);
        let location = reporter_location(&swarm, 0);
        let id = swarm
            .peer_mut(0)
            .node
            .coordinator_mut()
            .report_hazard(HazardInput::new(location, HazardType::Hazard, Severity::Critical))
            .unwrap();
        swarm.pump();

        let index = swarm.add_peer("peer-1", Default::default());
        assert!(swarm.peer(index).node.coordinator().hazard(&id).is_some());

        swarm.peer_mut(index).node.coordinator_mut().verify_incident(&id);
        swarm.pump();
        assert_eq!(swarm.verification_counts(&id), vec![Some(2); 2]);
    }
}
