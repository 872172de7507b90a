//! Report payloads, signed reports and their local-cache projections
//!
//! Three report kinds travel through the layer:
//! - `HAZARD`: driver-reported road hazards, signed and corroborated
//! - `TRAFFIC_SPEED`: ephemeral speed samples, broadcast unsigned
//! - `BUSINESS_REVIEW`: reviews gated by a business-signed QR proof
//!
//! Wire names are camelCase so the JSON matches what other peers emit.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{GeoLocation, Timestamp};

/// Hazard lifetime
pub const HAZARD_TTL: Duration = Duration::from_secs(60 * 60);
/// Police sightings go stale faster than other hazards
pub const POLICE_HAZARD_TTL: Duration = Duration::from_secs(30 * 60);
/// Traffic speed sample lifetime
pub const TRAFFIC_TTL: Duration = Duration::from_secs(5 * 60);
/// Business review lifetime
pub const REVIEW_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Report kind, tagged as `type` on the wire
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReportType {
    #[serde(rename = "HAZARD")]
    Hazard,
    #[serde(rename = "TRAFFIC_SPEED")]
    TrafficSpeed,
    #[serde(rename = "BUSINESS_REVIEW")]
    BusinessReview,
}

impl ReportType {
    /// Wire name
    pub fn as_str(self) -> &'static str {
        match self {
            ReportType::Hazard => "HAZARD",
            ReportType::TrafficSpeed => "TRAFFIC_SPEED",
            ReportType::BusinessReview => "BUSINESS_REVIEW",
        }
    }

    /// Default time-to-live for reports of this kind
    pub fn ttl(self) -> Duration {
        match self {
            ReportType::Hazard => HAZARD_TTL,
            ReportType::TrafficSpeed => TRAFFIC_TTL,
            ReportType::BusinessReview => REVIEW_TTL,
        }
    }

    /// Prefix of generated report ids
    pub fn id_prefix(self) -> &'static str {
        match self {
            ReportType::Hazard => "hazard",
            ReportType::TrafficSpeed => "traffic",
            ReportType::BusinessReview => "review",
        }
    }
}

impl std::fmt::Display for ReportType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of road hazard
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HazardType {
    Accident,
    Police,
    Construction,
    RoadClosed,
    Hazard,
    TrafficJam,
    SpeedCamera,
    Weather,
}

impl HazardType {
    /// Lifetime of a freshly reported hazard of this kind
    pub fn ttl(self) -> Duration {
        match self {
            HazardType::Police => POLICE_HAZARD_TTL,
            HazardType::Accident
            | HazardType::Construction
            | HazardType::RoadClosed
            | HazardType::Hazard
            | HazardType::TrafficJam
            | HazardType::SpeedCamera
            | HazardType::Weather => HAZARD_TTL,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Traffic congestion, ordered from free-flowing to stopped
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CongestionLevel {
    Free,
    Light,
    Moderate,
    Heavy,
    Standstill,
}

impl CongestionLevel {
    /// Classify a speed sample (km/h).
    ///
    /// Uses the ratio to free-flow speed when one is known, otherwise
    /// absolute urban speed bands.
    pub fn from_speeds(speed: f64, free_flow_speed: Option<f64>) -> Self {
        match free_flow_speed.filter(|f| *f > 0.0) {
            Some(free_flow) => {
                let ratio = speed / free_flow;
                if ratio >= 0.8 {
                    CongestionLevel::Free
                } else if ratio >= 0.6 {
                    CongestionLevel::Light
                } else if ratio >= 0.4 {
                    CongestionLevel::Moderate
                } else if ratio >= 0.15 {
                    CongestionLevel::Heavy
                } else {
                    CongestionLevel::Standstill
                }
            }
            None => {
                if speed >= 50.0 {
                    CongestionLevel::Free
                } else if speed >= 30.0 {
                    CongestionLevel::Light
                } else if speed >= 15.0 {
                    CongestionLevel::Moderate
                } else if speed >= 5.0 {
                    CongestionLevel::Heavy
                } else {
                    CongestionLevel::Standstill
                }
            }
        }
    }
}

/// Access to the report kind of a payload
pub trait ReportData {
    fn report_type(&self) -> ReportType;
}

/// Road hazard payload
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HazardData {
    pub hazard_type: HazardType,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Travel direction in degrees
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lane_affected: Option<String>,
}

impl ReportData for HazardData {
    fn report_type(&self) -> ReportType {
        ReportType::Hazard
    }
}

/// Traffic speed payload (km/h)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub road_segment_id: Option<String>,
    pub speed: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub free_flow_speed: Option<f64>,
    pub congestion_level: CongestionLevel,
    pub sample_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<f64>,
}

impl ReportData for TrafficData {
    fn report_type(&self) -> ReportType {
        ReportType::TrafficSpeed
    }
}

/// Proof-of-presence evidence copied from a scanned business QR code
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QrProof {
    pub business_public_key: String,
    pub signed_timestamp: String,
    pub signature: String,
    pub valid_until: Timestamp,
}

/// Business review payload
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewData {
    pub business_id: String,
    pub business_name: String,
    /// 1 to 5 stars
    pub rating: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub qr_proof: QrProof,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categories: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photos: Option<Vec<String>>,
}

impl ReportData for ReviewData {
    fn report_type(&self) -> ReportType {
        ReportType::BusinessReview
    }
}

/// Any report payload.
///
/// Serialized without a tag: the kind lives in the enclosing report's
/// `type` field. Variants are tried most-specific first when decoding.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReportPayload {
    Review(ReviewData),
    Traffic(TrafficData),
    Hazard(HazardData),
}

impl ReportData for ReportPayload {
    fn report_type(&self) -> ReportType {
        match self {
            ReportPayload::Hazard(data) => data.report_type(),
            ReportPayload::Traffic(data) => data.report_type(),
            ReportPayload::Review(data) => data.report_type(),
        }
    }
}

impl From<HazardData> for ReportPayload {
    fn from(data: HazardData) -> Self {
        ReportPayload::Hazard(data)
    }
}

impl From<TrafficData> for ReportPayload {
    fn from(data: TrafficData) -> Self {
        ReportPayload::Traffic(data)
    }
}

impl From<ReviewData> for ReportPayload {
    fn from(data: ReviewData) -> Self {
        ReportPayload::Review(data)
    }
}

/// A signed, location-bound, time-limited report.
///
/// `signature` is a detached Ed25519 signature over the canonical payload
/// of `type`, `location` (lat, lng, ts), `data` and `timestamp`. Never
/// mutated after signing; re-signing produces a new report with a new id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedGeoReport<T> {
    pub id: String,
    #[serde(rename = "type")]
    pub report_type: ReportType,
    pub location: GeoLocation,
    pub timestamp: Timestamp,
    pub expires_at: Timestamp,
    pub data: T,
    /// Base64 detached signature
    pub signature: String,
    /// Base64 Ed25519 verifying key
    pub public_key: String,
    /// Canonical payload version
    pub version: u32,
}

impl<T> SignedGeoReport<T> {
    #[inline]
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at <= now
    }

    /// Erase the payload type
    pub fn into_payload(self) -> SignedGeoReport<ReportPayload>
    where
        T: Into<ReportPayload>,
    {
        SignedGeoReport {
            id: self.id,
            report_type: self.report_type,
            location: self.location,
            timestamp: self.timestamp,
            expires_at: self.expires_at,
            data: self.data.into(),
            signature: self.signature,
            public_key: self.public_key,
            version: self.version,
        }
    }
}

/// Local-cache projection of a hazard report
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredHazard {
    pub id: String,
    pub hazard_type: HazardType,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lane_affected: Option<String>,
    pub location: GeoLocation,
    pub reported_at: Timestamp,
    pub expires_at: Timestamp,
    /// Starts at 1 and grows with every corroboration
    pub verification_count: u32,
    /// Public key of the signer when the hazard arrived signed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reporter_key: Option<String>,
}

impl StoredHazard {
    /// Project a verified signed hazard into the cache shape
    pub fn from_signed(report: &SignedGeoReport<HazardData>) -> Self {
        StoredHazard {
            id: report.id.clone(),
            hazard_type: report.data.hazard_type,
            severity: report.data.severity,
            description: report.data.description.clone(),
            direction: report.data.direction,
            lane_affected: report.data.lane_affected.clone(),
            location: report.location.clone(),
            reported_at: report.timestamp,
            expires_at: report.expires_at,
            verification_count: 1,
            reporter_key: Some(report.public_key.clone()),
        }
    }

    /// Payload view for signing
    pub fn hazard_data(&self) -> HazardData {
        HazardData {
            hazard_type: self.hazard_type,
            severity: self.severity,
            description: self.description.clone(),
            direction: self.direction,
            lane_affected: self.lane_affected.clone(),
        }
    }

    #[inline]
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at <= now
    }

    /// Record one corroboration: one more confirmation, `bonus` more lifetime
    pub fn corroborate(&mut self, bonus: Duration) -> u32 {
        self.verification_count = self.verification_count.saturating_add(1);
        self.expires_at = self.expires_at + bonus;
        self.verification_count
    }
}

/// Unsigned traffic speed report as cached and broadcast
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficReport {
    pub id: String,
    pub location: GeoLocation,
    pub timestamp: Timestamp,
    pub expires_at: Timestamp,
    pub data: TrafficData,
}

impl TrafficReport {
    #[inline]
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at <= now
    }
}

/// Business-signed QR code content
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessQrData {
    pub business_id: String,
    pub business_name: String,
    pub business_public_key: String,
    /// JSON-encoded [`QrStamp`]; the signed message
    pub signed_timestamp: String,
    pub signature: String,
    pub valid_until: Timestamp,
    pub location: GeoLocation,
}

impl BusinessQrData {
    /// Composite single-use key
    pub fn replay_key(&self) -> String {
        format!("{}_{}", self.business_id, self.signed_timestamp)
    }

    /// Evidence embedded into the review
    pub fn proof(&self) -> QrProof {
        QrProof {
            business_public_key: self.business_public_key.clone(),
            signed_timestamp: self.signed_timestamp.clone(),
            signature: self.signature.clone(),
            valid_until: self.valid_until,
        }
    }
}

/// The message a business signs when issuing a QR code
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QrStamp {
    pub business_id: String,
    pub timestamp: Timestamp,
    pub valid_until: Timestamp,
    pub nonce: String,
}
