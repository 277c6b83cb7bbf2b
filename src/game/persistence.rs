//! World object persistence
//!
//! Placed objects are saved per area as versioned JSON (`<data>/<area>.json`).
//! The simulation only hands over object lists; file handling stays here.
//! Saves are collected under the world lock and written after it is released.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::error::{PersistenceError, Result};
use crate::game::object::WorldObject;
use crate::game::world::Simulation;

/// Current on-disk format version
pub const AREA_SAVE_VERSION: u16 = 1;

/// Saved contents of one area
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AreaSave {
    pub version: u16,
    pub area: String,
    pub saved_at: DateTime<Utc>,
    pub objects: Vec<WorldObject>,
}

/// Storage for area objects
pub trait WorldStore: Send + Sync {
    /// Load the objects saved for `area`; an area never saved yields an empty list
    fn load_objects(&self, area: &str) -> Result<Vec<WorldObject>>;

    /// Replace the saved objects for `area`
    fn save_objects(&self, area: &str, objects: &[WorldObject]) -> Result<()>;
}

/// JSON files under a data directory
#[derive(Debug, Clone)]
pub struct JsonWorldStore {
    data_path: PathBuf,
}

impl JsonWorldStore {
    pub fn new(data_path: impl Into<PathBuf>) -> Self {
        Self {
            data_path: data_path.into(),
        }
    }

    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    /// File holding `area`
    pub fn area_path(&self, area: &str) -> PathBuf {
        self.data_path.join(format!("{}.json", area))
    }
}

impl WorldStore for JsonWorldStore {
    fn load_objects(&self, area: &str) -> Result<Vec<WorldObject>> {
        let path = self.area_path(area);
        if !path.exists() {
            debug!(area = %area, path = %path.display(), "No saved area, starting empty");
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&path)?;
        let save: AreaSave = serde_json::from_str(&content)?;

        if save.version != AREA_SAVE_VERSION {
            return Err(PersistenceError::UnsupportedVersion {
                found: save.version,
                supported: AREA_SAVE_VERSION,
            }
            .into());
        }
        if save.area != area {
            return Err(PersistenceError::AreaMismatch {
                found: save.area,
                expected: area.to_string(),
            }
            .into());
        }

        info!(area = %area, objects = save.objects.len(), "Loaded area objects");
        Ok(save.objects)
    }

    fn save_objects(&self, area: &str, objects: &[WorldObject]) -> Result<()> {
        fs::create_dir_all(&self.data_path)?;

        let save = AreaSave {
            version: AREA_SAVE_VERSION,
            area: area.to_string(),
            saved_at: Utc::now(),
            objects: objects.to_vec(),
        };
        let json = serde_json::to_string_pretty(&save)?;

        // Write then rename so a crash never leaves a half-written save
        let path = self.area_path(area);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &path)?;

        debug!(area = %area, objects = objects.len(), "Saved area objects");
        Ok(())
    }
}

/// Objects of one dirty area awaiting a write
#[derive(Debug, Clone)]
pub struct PendingSave {
    pub area: String,
    pub objects: Vec<WorldObject>,
}

/// Take the objects of every dirty area, clearing their dirty flags
pub fn collect_dirty(sim: &Simulation) -> Vec<PendingSave> {
    sim.areas()
        .iter()
        .filter(|area| area.take_dirty())
        .map(|area| PendingSave {
            area: area.name().to_string(),
            objects: area.objects(),
        })
        .collect()
}

/// Take the objects of every area regardless of dirtiness
pub fn collect_all(sim: &Simulation) -> Vec<PendingSave> {
    sim.areas()
        .iter()
        .map(|area| {
            area.take_dirty();
            PendingSave {
                area: area.name().to_string(),
                objects: area.objects(),
            }
        })
        .collect()
}

/// Write pending saves, returning the names of areas that failed
pub fn write_pending(store: &dyn WorldStore, pending: Vec<PendingSave>) -> Vec<String> {
    let mut failed = Vec::new();
    for save in pending {
        match store.save_objects(&save.area, &save.objects) {
            Ok(()) => info!(area = %save.area, objects = save.objects.len(), "Area saved"),
            Err(e) => {
                error!(area = %save.area, error = %e, "Failed to save area");
                failed.push(save.area);
            }
        }
    }
    failed
}

/// Mark areas dirty again after a failed write
pub fn restore_dirty(sim: &Simulation, failed: &[String]) {
    for name in failed {
        if let Some(area) = sim.area_by_name(name) {
            area.mark_dirty();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::object::{ObjectCategory, ObjectKind};
    use crate::game::position::Position;
    use crate::game::world::{WorldSettings, DEFAULT_AREA};

    fn objects() -> Vec<WorldObject> {
        vec![
            WorldObject::new(1, ObjectKind::new(ObjectCategory::Blocking, 2, 3), Position::new(4, 5)),
            WorldObject::new(9, ObjectKind::new(ObjectCategory::Marker, 0, 77), Position::CENTER),
        ]
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonWorldStore::new(dir.path().join("data"));
        store.save_objects("test", &objects()).unwrap();

        assert!(store.area_path("test").exists());
        assert_eq!(store.load_objects("test").unwrap(), objects());
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonWorldStore::new(dir.path());
        assert!(store.load_objects("nowhere").unwrap().is_empty());
    }

    #[test]
    fn test_rejects_unknown_version() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonWorldStore::new(dir.path());
        let save = AreaSave {
            version: 7,
            area: "test".into(),
            saved_at: Utc::now(),
            objects: vec![],
        };
        fs::write(store.area_path("test"), serde_json::to_string(&save).unwrap()).unwrap();

        let err = store.load_objects("test").unwrap_err();
        assert!(err.to_string().contains("Unsupported save version 7"));
    }

    #[test]
    fn test_rejects_other_area() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonWorldStore::new(dir.path());
        store.save_objects("desert", &[]).unwrap();
        fs::rename(store.area_path("desert"), store.area_path("test")).unwrap();
        assert!(store.load_objects("test").is_err());
    }

    #[test]
    fn test_collect_dirty_clears_flag() {
        let mut sim = Simulation::new(WorldSettings::default());
        assert!(collect_dirty(&sim).is_empty());

        sim.place_object(
            DEFAULT_AREA,
            ObjectKind::new(ObjectCategory::Decoration, 1, 1),
            Position::CENTER,
        )
        .unwrap();
        let pending = collect_dirty(&sim);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].area, "test");
        assert_eq!(pending[0].objects.len(), 1);
        assert!(collect_dirty(&sim).is_empty());

        restore_dirty(&sim, &["test".to_string()]);
        assert!(sim.area(DEFAULT_AREA).unwrap().is_dirty());
    }
}
