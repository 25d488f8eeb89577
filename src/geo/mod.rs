//! Local reference of administrative territorial entities.
//!
//! Loaded from the CSV tables produced by the `build-geo-data` binary, one
//! table per administrative level (`admin_0.csv` through `admin_5.csv`;
//! the builder currently produces levels 0-2). Resolution is by
//! case-insensitive name; when several entities share a name the lowest
//! (coarsest) level wins, deterministically.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::ProfileError;

/// Administrative levels understood by the reference (country through
/// fifth-level subdivision).
pub const MAX_ADMIN_LEVEL: u8 = 5;

/// Geographic bounding box of an entity, `(min_lon, max_lon, min_lat, max_lat)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

/// One administrative territorial entity.
#[derive(Debug, Clone, PartialEq)]
pub struct AdminArea {
    /// Knowledge-base entity identifier (e.g. a Wikidata Q-id).
    pub id: String,
    pub name: String,
    pub level: u8,
    /// Entity id of the parent area, absent for countries.
    pub parent: Option<String>,
    pub bounds: Option<Bounds>,
}

#[derive(Debug, Deserialize)]
struct AdminRecord {
    id: String,
    name: String,
    parent: String,
    min_lon: String,
    max_lon: String,
    min_lat: String,
    max_lat: String,
}

impl AdminRecord {
    fn into_area(self, level: u8) -> AdminArea {
        let bounds = match (
            self.min_lon.parse::<f64>(),
            self.max_lon.parse::<f64>(),
            self.min_lat.parse::<f64>(),
            self.max_lat.parse::<f64>(),
        ) {
            (Ok(min_lon), Ok(max_lon), Ok(min_lat), Ok(max_lat)) => Some(Bounds {
                min_lon,
                max_lon,
                min_lat,
                max_lat,
            }),
            _ => None,
        };
        AdminArea {
            id: self.id,
            name: self.name,
            level,
            parent: if self.parent.is_empty() {
                None
            } else {
                Some(self.parent)
            },
            bounds,
        }
    }
}

/// In-memory geo reference.
#[derive(Debug, Default)]
pub struct GeoData {
    areas: Vec<AdminArea>,
    by_name: HashMap<String, Vec<usize>>,
}

impl GeoData {
    /// Build a reference from a list of areas (used by tests and tools).
    pub fn from_areas(areas: Vec<AdminArea>) -> Self {
        let mut by_name: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, area) in areas.iter().enumerate() {
            by_name
                .entry(area.name.to_lowercase())
                .or_default()
                .push(idx);
        }
        Self { areas, by_name }
    }

    /// Load the reference tables from a directory.
    ///
    /// Missing per-level files are skipped; a directory with no tables at
    /// all is a configuration error.
    pub fn from_dir(dir: &Path) -> Result<Self, ProfileError> {
        let mut areas = Vec::new();
        let mut found = false;
        for level in 0..=MAX_ADMIN_LEVEL {
            let path = dir.join(format!("admin_{level}.csv"));
            if !path.exists() {
                continue;
            }
            found = true;
            let mut reader = csv::Reader::from_path(&path)?;
            for record in reader.deserialize::<AdminRecord>() {
                areas.push(record?.into_area(level));
            }
        }
        if !found {
            return Err(ProfileError::Config(format!(
                "no admin_N.csv tables under {}",
                dir.display()
            )));
        }
        tracing::info!(count = areas.len(), "Loaded geo reference");
        Ok(Self::from_areas(areas))
    }

    /// Resolve a name to an administrative entity, case-insensitively.
    ///
    /// Several entities may share a name (a city and its county); the
    /// lowest level wins, then the smallest entity id, so resolution is
    /// deterministic.
    pub fn resolve(&self, name: &str) -> Option<&AdminArea> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return None;
        }
        self.by_name
            .get(&trimmed.to_lowercase())?
            .iter()
            .map(|&idx| &self.areas[idx])
            .min_by(|a, b| a.level.cmp(&b.level).then_with(|| a.id.cmp(&b.id)))
    }

    pub fn is_empty(&self) -> bool {
        self.areas.is_empty()
    }

    pub fn len(&self) -> usize {
        self.areas.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn area(id: &str, name: &str, level: u8) -> AdminArea {
        AdminArea {
            id: id.to_owned(),
            name: name.to_owned(),
            level,
            parent: None,
            bounds: Some(Bounds {
                min_lon: 0.0,
                max_lon: 1.0,
                min_lat: 0.0,
                max_lat: 1.0,
            }),
        }
    }

    #[test]
    fn test_resolve_case_insensitive() {
        let geo = GeoData::from_areas(vec![area("Q142", "France", 0)]);
        assert_eq!(geo.resolve("france").unwrap().id, "Q142");
        assert_eq!(geo.resolve(" FRANCE ").unwrap().id, "Q142");
        assert!(geo.resolve("atlantis").is_none());
    }

    #[test]
    fn test_resolve_prefers_lowest_level() {
        let geo = GeoData::from_areas(vec![
            area("Q1000", "Springfield", 2),
            area("Q2000", "Springfield", 1),
        ]);
        assert_eq!(geo.resolve("Springfield").unwrap().level, 1);
    }

    #[test]
    fn test_load_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("admin_0.csv"),
            "id,name,parent,min_lon,max_lon,min_lat,max_lat\n\
             Q142,France,,-5.1,9.6,41.3,51.1\n",
        )
        .unwrap();
        let geo = GeoData::from_dir(dir.path()).unwrap();
        assert_eq!(geo.len(), 1);
        let bounds = geo.resolve("France").unwrap().bounds.unwrap();
        assert_eq!(bounds.min_lon, -5.1);
    }

    #[test]
    fn test_empty_dir_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            GeoData::from_dir(dir.path()),
            Err(ProfileError::Config(_))
        ));
    }
}
