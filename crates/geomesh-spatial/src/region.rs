//! Regional report cache
//!
//! Reports are bucketed into 0.1° cells (about 11 km) keyed by
//! `floor(lat * 10), floor(lon * 10)`. Buckets are small and few in
//! practice, so queries scan linearly and filter by distance and TTL.
//!
//! INVARIANT: a report id appears at most once in the whole cache.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use geomesh_core::{Coordinate, SignedGeoReport, StoredHazard, Timestamp, TrafficReport};

use crate::distance_meters;

/// Anything the region cache can hold
pub trait CachedReport {
    fn id(&self) -> &str;
    fn coordinate(&self) -> Coordinate;
    fn expires_at(&self) -> Timestamp;

    #[inline]
    fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at() <= now
    }
}

/// Reports whose lifetime grows as peers confirm them
pub trait Corroborable: CachedReport {
    /// Add one confirmation and `bonus` lifetime; returns the new count
    fn corroborate(&mut self, bonus: Duration) -> u32;
    fn verification_count(&self) -> u32;
}

impl CachedReport for StoredHazard {
    fn id(&self) -> &str {
        &self.id
    }

    fn coordinate(&self) -> Coordinate {
        self.location.coordinate()
    }

    fn expires_at(&self) -> Timestamp {
        self.expires_at
    }
}

impl Corroborable for StoredHazard {
    fn corroborate(&mut self, bonus: Duration) -> u32 {
        StoredHazard::corroborate(self, bonus)
    }

    fn verification_count(&self) -> u32 {
        self.verification_count
    }
}

impl CachedReport for TrafficReport {
    fn id(&self) -> &str {
        &self.id
    }

    fn coordinate(&self) -> Coordinate {
        self.location.coordinate()
    }

    fn expires_at(&self) -> Timestamp {
        self.expires_at
    }
}

impl<T> CachedReport for SignedGeoReport<T> {
    fn id(&self) -> &str {
        &self.id
    }

    fn coordinate(&self) -> Coordinate {
        self.location.coordinate()
    }

    fn expires_at(&self) -> Timestamp {
        self.expires_at
    }
}

/// A 0.1° grid cell
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionKey {
    pub lat_cell: i32,
    pub lon_cell: i32,
}

impl RegionKey {
    /// Cell containing a coordinate
    pub fn for_coordinate(coordinate: Coordinate) -> Self {
        RegionKey {
            lat_cell: (coordinate.latitude * 10.0).floor() as i32,
            lon_cell: (coordinate.longitude * 10.0).floor() as i32,
        }
    }
}

impl fmt::Display for RegionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.lat_cell, self.lon_cell)
    }
}

/// A query hit
#[derive(Clone, Debug, PartialEq)]
pub struct Nearby<R> {
    pub report: R,
    pub distance_meters: f64,
}

/// Reports bucketed by region with TTL eviction
#[derive(Clone, Debug)]
pub struct GeoRegionCache<R> {
    buckets: HashMap<RegionKey, Vec<R>>,
}

impl<R: CachedReport> GeoRegionCache<R> {
    pub fn new() -> Self {
        GeoRegionCache {
            buckets: HashMap::new(),
        }
    }

    /// Build from previously persisted reports, dropping expired ones
    pub fn from_reports(reports: impl IntoIterator<Item = R>, now: Timestamp) -> Self {
        let mut cache = Self::new();
        for report in reports {
            if !report.is_expired(now) {
                cache.insert(report, now);
            }
        }
        cache
    }

    /// Insert or replace a report.
    ///
    /// A report with the same id in the target bucket is replaced in place;
    /// otherwise the report is appended and any copy left in another bucket
    /// is removed. Expired entries of the target bucket are dropped
    /// afterwards. Returns true when an existing entry was replaced.
    pub fn insert(&mut self, report: R, now: Timestamp) -> bool {
        let key = RegionKey::for_coordinate(report.coordinate());
        let bucket = self.buckets.entry(key).or_default();

        let replaced = match bucket.iter_mut().find(|r| r.id() == report.id()) {
            Some(existing) => {
                *existing = report;
                true
            }
            None => {
                let id = report.id().to_string();
                bucket.push(report);
                self.remove_elsewhere(&id, key)
            }
        };

        if let Some(bucket) = self.buckets.get_mut(&key) {
            bucket.retain(|r| !r.is_expired(now));
            if bucket.is_empty() {
                self.buckets.remove(&key);
            }
        }
        replaced
    }

    fn remove_elsewhere(&mut self, id: &str, keep: RegionKey) -> bool {
        let mut removed = false;
        for (key, bucket) in self.buckets.iter_mut() {
            if *key == keep {
                continue;
            }
            let before = bucket.len();
            bucket.retain(|r| r.id() != id);
            removed |= bucket.len() != before;
        }
        self.buckets.retain(|_, bucket| !bucket.is_empty());
        removed
    }

    /// Unexpired reports within `radius_meters` of `center`, nearest first
    pub fn query(&self, center: Coordinate, radius_meters: f64, now: Timestamp) -> Vec<Nearby<R>>
    where
        R: Clone,
    {
        let mut hits: Vec<Nearby<R>> = self
            .buckets
            .values()
            .flatten()
            .filter(|r| !r.is_expired(now))
            .filter_map(|r| {
                let distance = distance_meters(r.coordinate(), center);
                (distance <= radius_meters).then(|| Nearby {
                    report: r.clone(),
                    distance_meters: distance,
                })
            })
            .collect();
        hits.sort_by(|a, b| a.distance_meters.total_cmp(&b.distance_meters));
        hits
    }

    pub fn get(&self, id: &str) -> Option<&R> {
        self.buckets.values().flatten().find(|r| r.id() == id)
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut R> {
        self.buckets.values_mut().flatten().find(|r| r.id() == id)
    }

    /// First report matching a predicate
    pub fn find(&self, predicate: impl Fn(&R) -> bool) -> Option<&R> {
        self.buckets.values().flatten().find(|r| predicate(r))
    }

    /// Mutate a report in place. The closure must not move it to another
    /// cell. Returns false if the id is unknown.
    pub fn update(&mut self, id: &str, f: impl FnOnce(&mut R)) -> bool {
        match self.get_mut(id) {
            Some(report) => {
                f(report);
                true
            }
            None => false,
        }
    }

    /// Drop every expired report. Returns the number removed.
    pub fn sweep(&mut self, now: Timestamp) -> usize {
        let mut removed = 0;
        for bucket in self.buckets.values_mut() {
            let before = bucket.len();
            bucket.retain(|r| !r.is_expired(now));
            removed += before - bucket.len();
        }
        self.buckets.retain(|_, bucket| !bucket.is_empty());
        removed
    }

    pub fn iter(&self) -> impl Iterator<Item = &R> {
        self.buckets.values().flatten()
    }

    pub fn len(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

impl<R: Corroborable> GeoRegionCache<R> {
    /// Corroborate a report: one more confirmation, `bonus` more lifetime.
    /// Returns the new verification count, or None if the id is unknown.
    pub fn extend_on_corroboration(&mut self, id: &str, bonus: Duration) -> Option<u32> {
        self.get_mut(id).map(|report| report.corroborate(bonus))
    }
}

impl<R: CachedReport> Default for GeoRegionCache<R> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geomesh_core::{GeoLocation, HazardType, Severity};
    use proptest::prelude::*;

    const NOW: Timestamp = Timestamp(1_000_000);

    fn hazard(id: &str, lat: f64, lon: f64, expires_at: i64) -> StoredHazard {
        StoredHazard {
            id: id.to_string(),
            hazard_type: HazardType::Accident,
            severity: Severity::Medium,
            description: None,
            direction: None,
            lane_affected: None,
            location: GeoLocation::new(lat, lon, NOW),
            reported_at: NOW,
            expires_at: Timestamp(expires_at),
            verification_count: 1,
            reporter_key: None,
        }
    }

    #[test]
    fn test_region_keys() {
        let a = RegionKey::for_coordinate(Coordinate::new(51.501, -0.141));
        let b = RegionKey::for_coordinate(Coordinate::new(51.509, -0.149));
        let c = RegionKey::for_coordinate(Coordinate::new(51.601, -0.141));

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.to_string(), "515_-2");
    }

    #[test]
    fn test_insert_replaces_by_id() {
        let mut cache = GeoRegionCache::new();
        assert!(!cache.insert(hazard("h1", 51.5, -0.1, 2_000_000), NOW));

        let mut updated = hazard("h1", 51.5, -0.1, 3_000_000);
        updated.verification_count = 4;
        assert!(cache.insert(updated, NOW));

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("h1").unwrap().verification_count, 4);
    }

    #[test]
    fn test_insert_moving_report_keeps_single_copy() {
        let mut cache = GeoRegionCache::new();
        cache.insert(hazard("h1", 51.5, -0.1, 2_000_000), NOW);
        assert!(cache.insert(hazard("h1", 52.5, -0.1, 2_000_000), NOW));

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.bucket_count(), 1);
        assert_eq!(cache.get("h1").unwrap().location.latitude, 52.5);
    }

    #[test]
    fn test_insert_drops_expired_in_bucket() {
        let mut cache = GeoRegionCache::new();
        cache.insert(hazard("old", 51.5, -0.1, 1_500_000), NOW);
        cache.insert(hazard("new", 51.5, -0.1, 5_000_000), Timestamp(2_000_000));

        assert!(cache.get("old").is_none());
        assert!(cache.get("new").is_some());
    }

    #[test]
    fn test_query_sorted_and_filtered() {
        let mut cache = GeoRegionCache::new();
        cache.insert(hazard("far", 51.5050, -0.1, 2_000_000), NOW);
        cache.insert(hazard("near", 51.5001, -0.1, 2_000_000), NOW);
        cache.insert(hazard("outside", 51.6, -0.1, 2_000_000), NOW);

        let hits = cache.query(Coordinate::new(51.5, -0.1), 1_000.0, NOW);
        let ids: Vec<&str> = hits.iter().map(|h| h.report.id.as_str()).collect();
        assert_eq!(ids, vec!["near", "far"]);
        assert!(hits[0].distance_meters < hits[1].distance_meters);
    }

    #[test]
    fn test_query_excludes_expired_still_stored() {
        let mut cache = GeoRegionCache::new();
        cache.insert(hazard("h1", 51.5, -0.1, 1_500_000), NOW);

        let later = Timestamp(1_600_000);
        assert_eq!(cache.len(), 1);
        assert!(cache.query(Coordinate::new(51.5, -0.1), 100.0, later).is_empty());
    }

    #[test]
    fn test_extend_on_corroboration() {
        let mut cache = GeoRegionCache::new();
        cache.insert(hazard("h1", 51.5, -0.1, 2_000_000), NOW);

        let bonus = Duration::from_secs(600);
        assert_eq!(cache.extend_on_corroboration("h1", bonus), Some(2));
        assert_eq!(cache.extend_on_corroboration("h1", bonus), Some(3));
        assert_eq!(cache.get("h1").unwrap().expires_at, Timestamp(3_200_000));
        assert_eq!(cache.extend_on_corroboration("missing", bonus), None);
    }

    #[test]
    fn test_sweep() {
        let mut cache = GeoRegionCache::new();
        cache.insert(hazard("a", 10.0, 10.0, 1_100_000), NOW);
        cache.insert(hazard("b", 20.0, 20.0, 1_200_000), NOW);
        cache.insert(hazard("c", 20.0, 20.0, 9_000_000), NOW);

        assert_eq!(cache.sweep(Timestamp(1_200_000)), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.bucket_count(), 1);
    }

    #[test]
    fn test_from_reports_drops_expired() {
        let cache = GeoRegionCache::from_reports(
            vec![
                hazard("live", 1.0, 1.0, 2_000_000),
                hazard("dead", 1.0, 1.0, 900_000),
            ],
            NOW,
        );
        assert_eq!(cache.len(), 1);
        assert!(cache.get("live").is_some());
    }

    #[test]
    fn test_update_and_find() {
        let mut cache = GeoRegionCache::new();
        cache.insert(hazard("h1", 1.0, 1.0, 2_000_000), NOW);

        assert!(cache.update("h1", |h| h.verification_count = 9));
        assert!(!cache.update("nope", |h| h.verification_count = 9));
        assert!(cache.find(|h| h.verification_count == 9).is_some());
    }

    proptest! {
        #[test]
        fn prop_same_cell_same_key(
            lat_cell in -899i32..899,
            lon_cell in -1799i32..1799,
            a in 0.001f64..0.099,
            b in 0.001f64..0.099,
        ) {
            let base_lat = lat_cell as f64 / 10.0;
            let base_lon = lon_cell as f64 / 10.0;
            let first = RegionKey::for_coordinate(Coordinate::new(base_lat + a, base_lon + a));
            let second = RegionKey::for_coordinate(Coordinate::new(base_lat + b, base_lon + b));
            prop_assert_eq!(first, second);
            prop_assert_eq!(first.lat_cell, lat_cell);
        }
    }
}
