//! Hazard persistence
//!
//! The hazard cache is saved as one JSON array of [`StoredHazard`] under a
//! fixed key. Persistence is a convenience: callers log failures and carry
//! on with the in-memory cache.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use geomesh_core::{GeoError, GeoResult, StoredHazard};

use crate::config::HAZARD_STORAGE_KEY;

/// Load/save backend for the hazard cache
pub trait HazardStore: Send {
    /// Read every stored hazard; an empty store yields an empty list
    fn load(&self) -> GeoResult<Vec<StoredHazard>>;

    /// Replace the stored list
    fn save(&self, hazards: &[StoredHazard]) -> GeoResult<()>;
}

fn encode(hazards: &[StoredHazard]) -> GeoResult<Vec<u8>> {
    serde_json::to_vec(hazards).map_err(|e| GeoError::PersistenceFailure(e.to_string()))
}

fn decode(bytes: &[u8]) -> GeoResult<Vec<StoredHazard>> {
    serde_json::from_slice(bytes).map_err(|e| GeoError::PersistenceFailure(e.to_string()))
}

fn io_error(err: std::io::Error) -> GeoError {
    GeoError::PersistenceFailure(err.to_string())
}

/// One JSON file per storage key inside a directory
#[derive(Clone, Debug)]
pub struct FileHazardStore {
    path: PathBuf,
}

impl FileHazardStore {
    /// Store under `<dir>/geomesh_hazard_cache.json`
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self::with_key(dir, HAZARD_STORAGE_KEY)
    }

    pub fn with_key(dir: impl AsRef<Path>, key: &str) -> Self {
        FileHazardStore {
            path: dir.as_ref().join(format!("{}.json", key)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl HazardStore for FileHazardStore {
    fn load(&self) -> GeoResult<Vec<StoredHazard>> {
        match std::fs::read(&self.path) {
            Ok(bytes) => decode(&bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(io_error(e)),
        }
    }

    fn save(&self, hazards: &[StoredHazard]) -> GeoResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(io_error)?;
        }
        let bytes = encode(hazards)?;

        // Write the sibling temp file first so a crash never leaves half a list
        let temp_path = self.path.with_extension("tmp");
        let mut file = std::fs::File::create(&temp_path).map_err(io_error)?;
        file.write_all(&bytes).map_err(io_error)?;
        file.sync_all().map_err(io_error)?;
        std::fs::rename(&temp_path, &self.path).map_err(io_error)
    }
}

/// Key-value store held in memory, shareable between handles
#[derive(Clone, Debug)]
pub struct MemoryHazardStore {
    key: String,
    entries: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    failing: Arc<Mutex<bool>>,
}

impl MemoryHazardStore {
    pub fn new() -> Self {
        MemoryHazardStore {
            key: HAZARD_STORAGE_KEY.to_string(),
            entries: Arc::new(Mutex::new(HashMap::new())),
            failing: Arc::new(Mutex::new(false)),
        }
    }

    /// Make every load and save fail (storage quota, revoked access)
    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock() = failing;
    }

    /// Raw JSON saved under `key`
    pub fn raw(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.lock().get(key).cloned()
    }

    fn check(&self) -> GeoResult<()> {
        if *self.failing.lock() {
            Err(GeoError::PersistenceFailure("storage unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

impl Default for MemoryHazardStore {
    fn default() -> Self {
        Self::new()
    }
}

impl HazardStore for MemoryHazardStore {
    fn load(&self) -> GeoResult<Vec<StoredHazard>> {
        self.check()?;
        match self.entries.lock().get(&self.key) {
            Some(bytes) => decode(bytes),
            None => Ok(Vec::new()),
        }
    }

    fn save(&self, hazards: &[StoredHazard]) -> GeoResult<()> {
        self.check()?;
        let bytes = encode(hazards)?;
        self.entries.lock().insert(self.key.clone(), bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geomesh_core::{GeoLocation, HazardType, Severity, Timestamp};
    use tempfile::TempDir;

    fn hazard(id: &str) -> StoredHazard {
        StoredHazard {
            id: id.to_string(),
            hazard_type: HazardType::Construction,
            severity: Severity::Medium,
            description: Some("lane closed".to_string()),
            direction: None,
            lane_affected: None,
            location: GeoLocation::new(51.5, -0.1, Timestamp(1_000)),
            reported_at: Timestamp(1_000),
            expires_at: Timestamp(3_601_000),
            verification_count: 1,
            reporter_key: None,
        }
    }

    #[test]
    fn test_file_store_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = FileHazardStore::new(dir.path());
        assert!(store.load().unwrap().is_empty());

        let hazards = vec![hazard("hazard_a"), hazard("hazard_b")];
        store.save(&hazards).unwrap();
        assert!(store.path().ends_with("geomesh_hazard_cache.json"));
        assert_eq!(store.load().unwrap(), hazards);

        // Overwrite replaces the whole list
        store.save(&hazards[..1]).unwrap();
        assert_eq!(store.load().unwrap().len(), 1);
    }

    #[test]
    fn test_file_store_corrupt() {
        let dir = TempDir::new().unwrap();
        let store = FileHazardStore::new(dir.path());
        std::fs::write(store.path(), b"{not json").unwrap();

        assert!(matches!(store.load(), Err(GeoError::PersistenceFailure(_))));
    }

    #[test]
    fn test_memory_store_json_array() {
        let store = MemoryHazardStore::new();
        store.save(&[hazard("hazard_a")]).unwrap();

        let raw = store.raw(HAZARD_STORAGE_KEY).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(value[0]["id"], "hazard_a");
        assert_eq!(value[0]["verificationCount"], 1);

        // Handles share the same backing map
        let other = store.clone();
        assert_eq!(other.load().unwrap().len(), 1);
    }

    #[test]
    fn test_memory_store_failure() {
        let store = MemoryHazardStore::new();
        store.set_failing(true);
        assert!(store.save(&[hazard("hazard_a")]).is_err());
        assert!(store.load().is_err());

        store.set_failing(false);
        assert!(store.load().unwrap().is_empty());
    }
}
