//! Session channel events
//!
//! The session channel is a socket connection to a relay that fans reports
//! out to nearby peers. Events are JSON objects tagged by name:
//! `{"event":"hazard_verify","data":{"hazardId":"..."}}`.

use serde::{Deserialize, Serialize};

use geomesh_core::{GeoLocation, StoredHazard, TrafficReport};

use crate::TransportResult;

/// Events this peer emits on the session channel
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum OutboundEvent {
    TrafficReport(TrafficReport),
    HazardReport(StoredHazard),
    HazardVerify {
        #[serde(rename = "hazardId")]
        hazard_id: String,
    },
    GetNearbyHazards {
        location: GeoLocation,
        radius: f64,
    },
}

impl OutboundEvent {
    pub fn name(&self) -> &'static str {
        match self {
            OutboundEvent::TrafficReport(_) => "traffic_report",
            OutboundEvent::HazardReport(_) => "hazard_report",
            OutboundEvent::HazardVerify { .. } => "hazard_verify",
            OutboundEvent::GetNearbyHazards { .. } => "get_nearby_hazards",
        }
    }
}

/// Events received from the session channel
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum SessionEvent {
    HazardBroadcast(StoredHazard),
    HazardVerified { id: String, count: u32 },
    TrafficUpdate(TrafficReport),
    NearbyHazards(Vec<StoredHazard>),
}

impl SessionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::HazardBroadcast(_) => "hazard_broadcast",
            SessionEvent::HazardVerified { .. } => "hazard_verified",
            SessionEvent::TrafficUpdate(_) => "traffic_update",
            SessionEvent::NearbyHazards(_) => "nearby_hazards",
        }
    }
}

/// Outbound side of the session channel.
///
/// `emit` only enqueues; it never waits for the relay. Callers treat the
/// result as best effort.
pub trait SessionChannel: Send + Sync {
    fn emit(&self, event: OutboundEvent) -> TransportResult<()>;
}
