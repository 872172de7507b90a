//! Traffic and hazard coordination
//!
//! The coordinator owns the local hazard and traffic caches. Local reports
//! are fuzzed, cached, handed to the session channel and published on the
//! P2P topics; inbound reports from either path are validated before they
//! touch the caches. Transport failures are logged and never fail a local
//! operation.

use std::sync::Arc;

use tracing::{debug, info, warn};

use geomesh_core::{
    generate_report_id, Clock, CongestionLevel, Coordinate, GeoError, GeoLocation, GeoResult,
    HazardData, HazardType, ReportType, Severity, StoredHazard, Timestamp, TrafficData,
    TrafficReport,
};
use geomesh_crypto::codec::{decode_verified, encode_report, sign_with_ttl};
use geomesh_crypto::Identity;
use geomesh_spatial::{midpoint, GeoRegionCache, Nearby, PrivacyLevel, PrivacyObfuscator};
use geomesh_transport::{
    BestEffort, OutboundEvent, P2pMessage, P2pTransport, SessionChannel, SessionEvent,
    HAZARD_TOPIC, TRAFFIC_TOPIC,
};

use crate::config::CoordinatorConfig;
use crate::store::HazardStore;

/// A speed sample taken on the device
#[derive(Clone, Debug, PartialEq)]
pub struct TrafficSample {
    pub location: GeoLocation,
    /// km/h
    pub speed: f64,
    pub free_flow_speed: Option<f64>,
    /// Derived from the speeds when not given
    pub congestion_level: Option<CongestionLevel>,
    pub road_segment_id: Option<String>,
    pub direction: Option<f64>,
}

impl TrafficSample {
    pub fn new(location: GeoLocation, speed: f64) -> Self {
        TrafficSample {
            location,
            speed,
            free_flow_speed: None,
            congestion_level: None,
            road_segment_id: None,
            direction: None,
        }
    }

    pub fn with_free_flow_speed(mut self, speed: f64) -> Self {
        self.free_flow_speed = Some(speed);
        self
    }

    pub fn with_congestion_level(mut self, level: CongestionLevel) -> Self {
        self.congestion_level = Some(level);
        self
    }

    pub fn with_road_segment(mut self, id: impl Into<String>) -> Self {
        self.road_segment_id = Some(id.into());
        self
    }

    pub fn with_direction(mut self, degrees: f64) -> Self {
        self.direction = Some(degrees);
        self
    }

    fn data(&self) -> TrafficData {
        TrafficData {
            road_segment_id: self.road_segment_id.clone(),
            speed: self.speed,
            free_flow_speed: self.free_flow_speed,
            congestion_level: self
                .congestion_level
                .unwrap_or_else(|| CongestionLevel::from_speeds(self.speed, self.free_flow_speed)),
            sample_count: 1,
            direction: self.direction,
        }
    }
}

/// A hazard as entered by the user
#[derive(Clone, Debug, PartialEq)]
pub struct HazardInput {
    pub location: GeoLocation,
    pub hazard_type: HazardType,
    pub severity: Severity,
    pub description: Option<String>,
    pub direction: Option<f64>,
    pub lane_affected: Option<String>,
}

impl HazardInput {
    pub fn new(location: GeoLocation, hazard_type: HazardType, severity: Severity) -> Self {
        HazardInput {
            location,
            hazard_type,
            severity,
            description: None,
            direction: None,
            lane_affected: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_direction(mut self, degrees: f64) -> Self {
        self.direction = Some(degrees);
        self
    }

    pub fn with_lane_affected(mut self, lane: impl Into<String>) -> Self {
        self.lane_affected = Some(lane.into());
        self
    }

    fn data(&self) -> HazardData {
        HazardData {
            hazard_type: self.hazard_type,
            severity: self.severity,
            description: self.description.clone(),
            direction: self.direction,
            lane_affected: self.lane_affected.clone(),
        }
    }
}

/// A cached hazard near a queried point
#[derive(Clone, Debug, PartialEq)]
pub struct Incident {
    pub hazard: StoredHazard,
    pub distance_meters: f64,
}

impl From<Nearby<StoredHazard>> for Incident {
    fn from(nearby: Nearby<StoredHazard>) -> Self {
        Incident {
            hazard: nearby.report,
            distance_meters: nearby.distance_meters,
        }
    }
}

/// Aggregated conditions around one route segment
#[derive(Clone, Debug, PartialEq)]
pub struct RouteSegmentTraffic {
    pub start: Coordinate,
    pub end: Coordinate,
    pub midpoint: Coordinate,
    /// Mean of the nearby speed samples, km/h
    pub average_speed: Option<f64>,
    pub free_flow_speed: Option<f64>,
    pub congestion_level: Option<CongestionLevel>,
    pub sample_count: u32,
    pub incident_count: usize,
    /// False when neither samples nor incidents were found
    pub has_data: bool,
}

/// Local notifications for UI layers
#[derive(Clone, Debug, PartialEq)]
pub enum GeoEvent {
    TrafficUpdated(TrafficReport),
    HazardAdded(StoredHazard),
    HazardCorroborated { id: String, count: u32 },
}

/// Handle returned by [`TrafficBroadcastCoordinator::subscribe`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Box<dyn FnMut(&GeoEvent) + Send>;

/// Hazard/traffic reporting, caching and corroboration for one peer
pub struct TrafficBroadcastCoordinator {
    identity: Identity,
    p2p: Arc<dyn P2pTransport>,
    session: Arc<dyn SessionChannel>,
    store: Box<dyn HazardStore>,
    clock: Arc<dyn Clock>,
    config: CoordinatorConfig,
    obfuscator: PrivacyObfuscator,
    hazards: GeoRegionCache<StoredHazard>,
    traffic: GeoRegionCache<TrafficReport>,
    /// Last local sample, re-broadcast on refresh
    last_sample: Option<TrafficSample>,
    listeners: Vec<(SubscriptionId, Listener)>,
    next_subscription: u64,
}

impl TrafficBroadcastCoordinator {
    /// Create a coordinator, restoring unexpired hazards from the store and
    /// subscribing to the hazard and traffic topics.
    pub fn new(
        identity: Identity,
        p2p: Arc<dyn P2pTransport>,
        session: Arc<dyn SessionChannel>,
        store: Box<dyn HazardStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let now = clock.now();
        let restored = match store.load() {
            Ok(hazards) => hazards,
            Err(e) => {
                warn!(error = %e, "hazard cache unavailable, starting empty");
                Vec::new()
            }
        };
        let hazards = GeoRegionCache::from_reports(
            restored
                .into_iter()
                .filter(|h| h.location.coordinate().is_valid()),
            now,
        );

        for topic in [HAZARD_TOPIC, TRAFFIC_TOPIC] {
            p2p.subscribe(topic).best_effort("subscribe");
        }
        info!(
            peer = %identity.fingerprint(),
            restored = hazards.len(),
            "coordinator started"
        );

        TrafficBroadcastCoordinator {
            identity,
            p2p,
            session,
            store,
            clock,
            config: CoordinatorConfig::default(),
            obfuscator: PrivacyObfuscator::new(),
            hazards,
            traffic: GeoRegionCache::new(),
            last_sample: None,
            listeners: Vec::new(),
            next_subscription: 0,
        }
    }

    pub fn with_config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the obfuscator (fixed salts make simulations reproducible)
    pub fn with_obfuscator(mut self, obfuscator: PrivacyObfuscator) -> Self {
        self.obfuscator = obfuscator;
        self
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Share a local speed sample.
    ///
    /// Only invalid input is an error; delivery is best effort.
    pub fn report_traffic(&mut self, sample: TrafficSample) -> GeoResult<TrafficReport> {
        ensure_valid_location(&sample.location)?;
        if !sample.speed.is_finite() || sample.speed < 0.0 {
            return Err(GeoError::MalformedPayload(format!(
                "invalid speed {}",
                sample.speed
            )));
        }

        let now = self.clock.now();
        let location = self.obfuscate(&sample.location, self.config.traffic_privacy);
        let report_type = ReportType::TrafficSpeed;
        let report = TrafficReport {
            id: generate_report_id(report_type.id_prefix(), now),
            location,
            timestamp: now,
            expires_at: now + report_type.ttl(),
            data: sample.data(),
        };

        self.traffic.insert(report.clone(), now);
        self.session
            .emit(OutboundEvent::TrafficReport(report.clone()))
            .best_effort("emit traffic_report");
        match serde_json::to_vec(&report) {
            Ok(bytes) => {
                self.p2p
                    .publish(TRAFFIC_TOPIC, &bytes)
                    .best_effort("publish traffic");
            }
            Err(e) => warn!(error = %e, "traffic report not encodable"),
        }

        debug!(id = %report.id, speed = report.data.speed, "traffic reported");
        self.last_sample = Some(sample);
        self.notify(GeoEvent::TrafficUpdated(report.clone()));
        Ok(report)
    }

    /// Re-share the last local sample with a fresh timestamp
    pub fn refresh_traffic(&mut self) -> Option<TrafficReport> {
        let mut sample = self.last_sample.clone()?;
        sample.location.timestamp = self.clock.now();
        match self.report_traffic(sample) {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(error = %e, "traffic refresh failed");
                None
            }
        }
    }

    /// Report a hazard and return its id.
    ///
    /// The hazard is signed so peers on the P2P topic can check its origin;
    /// police sightings live 30 minutes, everything else an hour.
    pub fn report_hazard(&mut self, input: HazardInput) -> GeoResult<String> {
        ensure_valid_location(&input.location)?;

        let now = self.clock.now();
        let location = self.obfuscate(&input.location, self.config.hazard_privacy);
        let data = input.data();
        let ttl = data.hazard_type.ttl();
        let signed = sign_with_ttl(data, location, &self.identity, now, ttl)?;
        let hazard = StoredHazard::from_signed(&signed);
        let id = hazard.id.clone();

        self.hazards.insert(hazard.clone(), now);
        self.persist();

        self.session
            .emit(OutboundEvent::HazardReport(hazard.clone()))
            .best_effort("emit hazard_report");
        match encode_report(&signed) {
            Ok(bytes) => {
                self.p2p
                    .publish(HAZARD_TOPIC, &bytes)
                    .best_effort("publish hazard");
            }
            Err(e) => warn!(error = %e, "hazard report not encodable"),
        }

        info!(id = %id, hazard_type = ?hazard.hazard_type, "hazard reported");
        self.notify(GeoEvent::HazardAdded(hazard));
        Ok(id)
    }

    /// Hazards within `radius_meters` of `location`, nearest first.
    ///
    /// Also asks the session relay for its view; answers arrive later as a
    /// `nearby_hazards` event.
    pub fn get_nearby_incidents(&self, location: &GeoLocation, radius_meters: f64) -> Vec<Incident> {
        self.session
            .emit(OutboundEvent::GetNearbyHazards {
                location: location.clone(),
                radius: radius_meters,
            })
            .best_effort("emit get_nearby_hazards");

        self.hazards
            .query(location.coordinate(), radius_meters, self.clock.now())
            .into_iter()
            .map(Incident::from)
            .collect()
    }

    /// Corroborate a hazard. Returns the new verification count, or None
    /// for an unknown or expired hazard.
    pub fn verify_incident(&mut self, id: &str) -> Option<u32> {
        let now = self.clock.now();
        if self.hazards.get(id).map_or(true, |h| h.is_expired(now)) {
            debug!(id, "cannot verify unknown hazard");
            return None;
        }

        let count = self
            .hazards
            .extend_on_corroboration(id, self.config.corroboration_bonus)?;
        self.persist();
        self.session
            .emit(OutboundEvent::HazardVerify {
                hazard_id: id.to_string(),
            })
            .best_effort("emit hazard_verify");

        self.notify(GeoEvent::HazardCorroborated {
            id: id.to_string(),
            count,
        });
        Some(count)
    }

    /// Conditions along a route, sampled at about `route_segments` points
    pub fn get_route_traffic(&self, coordinates: &[Coordinate]) -> Vec<RouteSegmentTraffic> {
        if coordinates.len() < 2 {
            return Vec::new();
        }

        let now = self.clock.now();
        let last = coordinates.len() - 1;
        let stride = (last / self.config.route_segments.max(1)).max(1);
        let mut segments = Vec::new();

        let mut start = 0;
        while start < last {
            let end = (start + stride).min(last);
            segments.push(self.segment_traffic(coordinates[start], coordinates[end], now));
            start = end;
        }
        segments
    }

    fn segment_traffic(&self, start: Coordinate, end: Coordinate, now: Timestamp) -> RouteSegmentTraffic {
        let center = midpoint(start, end);
        let radius = self.config.route_sample_radius_meters;
        let incidents = self.hazards.query(center, radius, now);
        let samples = self.traffic.query(center, radius, now);

        let average_speed = mean(samples.iter().map(|s| s.report.data.speed));
        let free_flow_speed = mean(samples.iter().filter_map(|s| s.report.data.free_flow_speed));
        let from_speed = average_speed.map(|speed| CongestionLevel::from_speeds(speed, free_flow_speed));
        let from_incidents = incidents.iter().map(|n| incident_congestion(&n.report)).max();

        RouteSegmentTraffic {
            start,
            end,
            midpoint: center,
            average_speed,
            free_flow_speed,
            congestion_level: from_speed.max(from_incidents),
            sample_count: samples.iter().map(|s| s.report.data.sample_count).sum(),
            incident_count: incidents.len(),
            has_data: !samples.is_empty() || !incidents.is_empty(),
        }
    }

    /// Apply an event pushed by the session relay.
    /// Returns whether it changed the local caches.
    pub fn handle_session_event(&mut self, event: SessionEvent) -> bool {
        let now = self.clock.now();
        match event {
            SessionEvent::HazardBroadcast(hazard) => self.ingest_hazard(hazard, now),
            SessionEvent::HazardVerified { id, count } => self.merge_verification(&id, count),
            SessionEvent::TrafficUpdate(report) => self.ingest_traffic(report, now),
            SessionEvent::NearbyHazards(hazards) => hazards
                .into_iter()
                .fold(false, |changed, h| self.ingest_hazard(h, now) | changed),
        }
    }

    /// Apply a message from a P2P topic.
    /// Returns whether it changed the local caches.
    pub fn handle_p2p_message(&mut self, message: &P2pMessage) -> bool {
        let now = self.clock.now();
        match message.topic.as_str() {
            HAZARD_TOPIC => match decode_verified::<HazardData>(&message.payload, now) {
                Ok(report) => self.ingest_hazard(StoredHazard::from_signed(&report), now),
                Err(e) => {
                    debug!(from = ?message.from, error = %e, "dropping hazard message");
                    false
                }
            },
            TRAFFIC_TOPIC => match serde_json::from_slice::<TrafficReport>(&message.payload) {
                Ok(report) => self.ingest_traffic(report, now),
                Err(e) => {
                    debug!(from = ?message.from, error = %e, "dropping traffic message");
                    false
                }
            },
            topic => {
                debug!(topic, "no handler for topic");
                false
            }
        }
    }

    fn ingest_hazard(&mut self, mut hazard: StoredHazard, now: Timestamp) -> bool {
        if !hazard.location.coordinate().is_valid() {
            debug!(id = %hazard.id, "dropping hazard with invalid location");
            return false;
        }
        // Expiry is not signed; never trust more than the type's lifetime
        let ceiling = hazard.reported_at + hazard.hazard_type.ttl();
        if hazard.expires_at > ceiling {
            debug!(id = %hazard.id, claimed = %hazard.expires_at, %ceiling, "capping hazard expiry");
            hazard.expires_at = ceiling;
        }
        if hazard.is_expired(now) {
            debug!(id = %hazard.id, "dropping expired hazard");
            return false;
        }
        hazard.verification_count = hazard.verification_count.max(1);

        if let Some(existing) = self.hazards.get(&hazard.id) {
            // Same report seen twice. Expiry stays local; it only grows
            // through corroboration on this device.
            let count = hazard.verification_count.max(existing.verification_count);
            let key = existing.reporter_key.clone().or(hazard.reporter_key);
            if count == existing.verification_count && key == existing.reporter_key {
                return false;
            }
            self.hazards.update(&hazard.id, |h| {
                h.verification_count = count;
                h.reporter_key = key;
            });
            self.persist();
            return true;
        }

        let duplicate = self
            .hazards
            .find(|h| same_report(h, &hazard))
            .map(|h| h.id.clone());
        if let Some(existing_id) = duplicate {
            debug!(id = %hazard.id, existing = %existing_id, "folding duplicate hazard");
            let key = hazard.reporter_key;
            let mut filled = false;
            self.hazards.update(&existing_id, |h| {
                if h.reporter_key.is_none() && key.is_some() {
                    h.reporter_key = key;
                    filled = true;
                }
            });
            if filled {
                self.persist();
            }
            return false;
        }

        self.hazards.insert(hazard.clone(), now);
        self.persist();
        debug!(id = %hazard.id, "hazard received");
        self.notify(GeoEvent::HazardAdded(hazard));
        true
    }

    /// Counts from the relay only ever raise the local count. Lifetime is
    /// extended by local corroborations only.
    fn merge_verification(&mut self, id: &str, count: u32) -> bool {
        let mut raised = false;
        self.hazards.update(id, |h| {
            if count > h.verification_count {
                h.verification_count = count;
                raised = true;
            }
        });
        if raised {
            self.persist();
            self.notify(GeoEvent::HazardCorroborated {
                id: id.to_string(),
                count,
            });
        }
        raised
    }

    fn ingest_traffic(&mut self, report: TrafficReport, now: Timestamp) -> bool {
        if !report.location.coordinate().is_valid()
            || !report.data.speed.is_finite()
            || report.data.speed < 0.0
        {
            debug!(id = %report.id, "dropping malformed traffic report");
            return false;
        }
        if report.is_expired(now) {
            debug!(id = %report.id, "dropping expired traffic report");
            return false;
        }
        if self.traffic.get(&report.id).is_some_and(|r| *r == report) {
            return false;
        }

        self.traffic.insert(report.clone(), now);
        self.notify(GeoEvent::TrafficUpdated(report));
        true
    }

    /// Purge expired hazards and traffic. Returns the number removed.
    pub fn sweep(&mut self) -> usize {
        let now = self.clock.now();
        let hazards = self.hazards.sweep(now);
        let traffic = self.traffic.sweep(now);
        if hazards > 0 {
            self.persist();
        }
        if hazards + traffic > 0 {
            debug!(hazards, traffic, "expired reports purged");
        }
        hazards + traffic
    }

    /// Register a listener for local events
    pub fn subscribe(&mut self, listener: impl FnMut(&GeoEvent) + Send + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    /// Remove a listener. Returns false if it was already gone.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(listener_id, _)| *listener_id != id);
        self.listeners.len() != before
    }

    /// Rotate the obfuscation salt so later reports cannot be linked to
    /// earlier ones
    pub fn clear_privacy_session(&mut self) {
        self.obfuscator.clear_session();
    }

    pub fn hazard(&self, id: &str) -> Option<&StoredHazard> {
        self.hazards.get(id)
    }

    pub fn hazards(&self) -> impl Iterator<Item = &StoredHazard> {
        self.hazards.iter()
    }

    pub fn hazard_count(&self) -> usize {
        self.hazards.len()
    }

    pub fn traffic_count(&self) -> usize {
        self.traffic.len()
    }

    fn obfuscate(&mut self, location: &GeoLocation, level: PrivacyLevel) -> GeoLocation {
        location.with_coordinate(self.obfuscator.obfuscate(location.coordinate(), level))
    }

    fn persist(&self) {
        let hazards: Vec<StoredHazard> = self.hazards.iter().cloned().collect();
        if let Err(e) = self.store.save(&hazards) {
            warn!(error = %e, count = hazards.len(), "hazard cache not persisted");
        }
    }

    fn notify(&mut self, event: GeoEvent) {
        for (_, listener) in self.listeners.iter_mut() {
            listener(&event);
        }
    }
}

fn ensure_valid_location(location: &GeoLocation) -> GeoResult<()> {
    if location.coordinate().is_valid() {
        Ok(())
    } else {
        Err(GeoError::MalformedPayload(format!(
            "invalid coordinate ({}, {})",
            location.latitude, location.longitude
        )))
    }
}

/// Two reports of the same sighting: same kind, place and report time
fn same_report(a: &StoredHazard, b: &StoredHazard) -> bool {
    a.hazard_type == b.hazard_type
        && a.reported_at == b.reported_at
        && a.location.latitude == b.location.latitude
        && a.location.longitude == b.location.longitude
}

fn incident_congestion(hazard: &StoredHazard) -> CongestionLevel {
    match (hazard.hazard_type, hazard.severity) {
        (HazardType::RoadClosed, _) | (_, Severity::Critical) => CongestionLevel::Standstill,
        (_, Severity::High) => CongestionLevel::Heavy,
        (_, Severity::Medium) => CongestionLevel::Moderate,
        (_, Severity::Low) => CongestionLevel::Light,
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}
