//! Location obfuscation
//!
//! Coordinates are fuzzed before they leave the device. The offset is
//! derived from a hash of the coordinate (rounded to 4 decimals), the
//! privacy level and a per-session salt, so the same place maps to the same
//! fuzzed point for the whole session. Rotating the salt breaks that link.

use std::collections::{HashMap, VecDeque};

use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use geomesh_core::Coordinate;

/// Memoized entries before eviction kicks in
pub const OBFUSCATION_CACHE_LIMIT: usize = 1000;
/// Entries dropped per eviction, oldest first
pub const OBFUSCATION_EVICT_BATCH: usize = 500;

/// How far a coordinate may be moved
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrivacyLevel {
    Low,
    Medium,
    High,
    Maximum,
}

impl PrivacyLevel {
    /// Maximum offset per axis, in degrees
    pub fn max_offset_degrees(self) -> f64 {
        match self {
            PrivacyLevel::Low => 0.0001,
            PrivacyLevel::Medium => 0.0005,
            PrivacyLevel::High => 0.001,
            PrivacyLevel::Maximum => 0.005,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            PrivacyLevel::Low => "low",
            PrivacyLevel::Medium => "medium",
            PrivacyLevel::High => "high",
            PrivacyLevel::Maximum => "maximum",
        }
    }
}

/// (lon to 4 dp, lat to 4 dp, level)
type CacheKey = (String, String, PrivacyLevel);

/// Deterministic, session-salted coordinate fuzzer
#[derive(Debug)]
pub struct PrivacyObfuscator {
    session_salt: String,
    cache: HashMap<CacheKey, Coordinate>,
    /// Insertion order of cache keys
    order: VecDeque<CacheKey>,
}

impl PrivacyObfuscator {
    pub fn new() -> Self {
        PrivacyObfuscator {
            session_salt: new_salt(),
            cache: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// Create with a fixed salt (reproducible simulations)
    pub fn with_salt(salt: impl Into<String>) -> Self {
        PrivacyObfuscator {
            session_salt: salt.into(),
            cache: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// Fuzz a coordinate
    pub fn obfuscate(&mut self, coordinate: Coordinate, level: PrivacyLevel) -> Coordinate {
        let key: CacheKey = (
            format!("{:.4}", coordinate.longitude),
            format!("{:.4}", coordinate.latitude),
            level,
        );
        if let Some(cached) = self.cache.get(&key) {
            return *cached;
        }

        let fuzzed = self.compute(&key);
        if self.cache.len() >= OBFUSCATION_CACHE_LIMIT {
            self.evict_oldest();
        }
        self.cache.insert(key.clone(), fuzzed);
        self.order.push_back(key);
        fuzzed
    }

    /// Rotate the session salt; earlier outputs are no longer reproducible
    pub fn clear_session(&mut self) {
        self.session_salt = new_salt();
        self.cache.clear();
        self.order.clear();
    }

    /// Number of memoized coordinates
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    fn evict_oldest(&mut self) {
        for _ in 0..OBFUSCATION_EVICT_BATCH {
            match self.order.pop_front() {
                Some(key) => {
                    self.cache.remove(&key);
                }
                None => break,
            }
        }
    }

    fn compute(&self, key: &CacheKey) -> Coordinate {
        let (lon, lat, level) = key;
        let mut hasher = Sha256::new();
        hasher.update(lon.as_bytes());
        hasher.update(b":");
        hasher.update(lat.as_bytes());
        hasher.update(b":");
        hasher.update(level.as_str().as_bytes());
        hasher.update(b":");
        hasher.update(self.session_salt.as_bytes());
        let hash = hasher.finalize();

        let max = level.max_offset_degrees();
        let lat_offset = (unit(&hash[0..8]) * 2.0 - 1.0) * max;
        let lon_offset = (unit(&hash[8..16]) * 2.0 - 1.0) * max;

        // Offsets apply to the rounded coordinate so cached and fresh
        // results agree
        let lat: f64 = lat.parse().unwrap_or(0.0);
        let lon: f64 = lon.parse().unwrap_or(0.0);
        Coordinate::new(
            (lat + lat_offset).clamp(-90.0, 90.0),
            (lon + lon_offset).clamp(-180.0, 180.0),
        )
    }
}

impl Default for PrivacyObfuscator {
    fn default() -> Self {
        Self::new()
    }
}

/// Map 8 hash bytes onto [0, 1]
fn unit(bytes: &[u8]) -> f64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    u64::from_be_bytes(buf) as f64 / u64::MAX as f64
}

fn new_salt() -> String {
    let bytes: [u8; 16] = rand::thread_rng().gen();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
