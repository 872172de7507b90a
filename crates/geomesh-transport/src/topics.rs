//! Pub/sub topic names

/// Signed hazard reports
pub const HAZARD_TOPIC: &str = "/g3zkp/geo/hazard/v1";
/// Unsigned traffic speed samples
pub const TRAFFIC_TOPIC: &str = "/g3zkp/geo/traffic/v1";
/// Signed business reviews
pub const REVIEW_TOPIC: &str = "/g3zkp/business/review/v1";
