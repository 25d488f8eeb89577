//! Per-column type identification: structural type by majority rule,
//! semantic types by independent detectors, plus the resolved auxiliaries
//! (datetimes, admin areas) that downstream analyzers reuse.

pub mod datetime;

use std::collections::HashMap;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::common::expand_attribute_name;
use crate::geo::{AdminArea, GeoData};
use crate::spatial::{parse_point, LATITUDE_NAMES, LONGITUDE_NAMES};
use crate::types::{ManualColumn, PointFormat, SemanticType, StructuralType};

/// Share of non-empty cells that must parse for a structural type to win.
pub const STRUCTURAL_THRESHOLD: f64 = 0.90;

/// Share of non-empty cells that must parse as datetimes.
pub const DATETIME_THRESHOLD: f64 = 0.90;

/// Maximum distinct/total ratio for a categorical column.
pub const MAX_CATEGORICAL_RATIO: f64 = 0.10;

/// Share of distinct values that must resolve for an admin column.
pub const ADMIN_RESOLUTION_THRESHOLD: f64 = 0.70;

/// Maximum value length for a text identifier column.
const MAX_ID_TEXT_LENGTH: usize = 32;

static RE_INTEGER: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)] // literal pattern
    Regex::new(r"^[+-]?[0-9]+$").unwrap()
});

/// Everything the identifier learns about one column.
#[derive(Debug, Clone, Default)]
pub struct TypeIdentification {
    pub structural_type: Option<StructuralType>,
    pub semantic_types: Vec<SemanticType>,
    pub point_format: Option<PointFormat>,
    pub admin_area_level: Option<u8>,
    /// Parsed datetimes, cached for temporal coverage.
    pub datetimes: Option<Vec<DateTime<Utc>>>,
    /// Resolution result per non-empty cell, cached for spatial coverage.
    pub admin_areas: Option<Vec<Option<AdminArea>>>,
}

impl TypeIdentification {
    fn add(&mut self, t: SemanticType) {
        if !self.semantic_types.contains(&t) {
            self.semantic_types.push(t);
        }
    }
}

fn ratio(count: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64
    }
}

/// Does this column name look like an identifier (`id`, `user_id`, `rowId`)?
fn name_is_identifier(name: &str) -> bool {
    let lower = name.trim().to_lowercase();
    if lower == "id" || lower == "identifier" || lower == "key" {
        return true;
    }
    expand_attribute_name(name)
        .last()
        .is_some_and(|token| token.eq_ignore_ascii_case("id"))
}

/// Does this column name carry one of the lat/long tokens?
fn name_has_token(name: &str, tokens: &[&str]) -> bool {
    let lower = name.trim().to_lowercase();
    tokens.iter().any(|t| lower.contains(t))
}

fn all_in_range(cells: &[&str], min: f64, max: f64) -> bool {
    cells.iter().all(|c| {
        c.parse::<f64>()
            .is_ok_and(|v| v.is_finite() && min < v && v < max)
    })
}

/// Detect the WKT point order that validates the most cells.
fn detect_point_format(cells: &[&str]) -> PointFormat {
    let long_lat = cells.iter().filter(|c| parse_point(c, false).is_some()).count();
    let lat_long = cells.iter().filter(|c| parse_point(c, true).is_some()).count();
    if lat_long > long_lat {
        PointFormat::LatLong
    } else {
        PointFormat::LongLat
    }
}

/// Identify the structural and semantic types of one column.
///
/// `geo_data` enables admin-area resolution; `manual` overrides whatever
/// was detected, field by field.
pub fn identify_types(
    cells: &[String],
    name: &str,
    geo_data: Option<&GeoData>,
    manual: Option<&ManualColumn>,
) -> TypeIdentification {
    let mut id = TypeIdentification::default();

    let non_empty: Vec<&str> = cells
        .iter()
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .collect();
    if non_empty.is_empty() {
        id.structural_type = Some(StructuralType::Missing);
        apply_manual(&mut id, manual);
        return id;
    }

    // Structural type by majority rule; ties resolve toward the stricter
    // type: integer before float before geo-point before text
    let n = non_empty.len();
    let n_integer = non_empty.iter().filter(|c| RE_INTEGER.is_match(c)).count();
    let n_float = non_empty
        .iter()
        .filter(|c| c.parse::<f64>().is_ok_and(f64::is_finite))
        .count();
    let all_points = non_empty
        .iter()
        .all(|c| parse_point(c, false).is_some() || parse_point(c, true).is_some());

    let structural = if ratio(n_integer, n) >= STRUCTURAL_THRESHOLD {
        StructuralType::Integer
    } else if ratio(n_float, n) >= STRUCTURAL_THRESHOLD {
        StructuralType::Float
    } else if all_points {
        StructuralType::GeoPoint
    } else {
        StructuralType::Text
    };
    id.structural_type = Some(structural);

    let mut distinct: HashMap<String, usize> = HashMap::new();
    for cell in &non_empty {
        *distinct.entry(cell.to_lowercase()).or_default() += 1;
    }
    let all_unique = distinct.len() == n;

    match structural {
        StructuralType::GeoPoint => {
            id.point_format = Some(detect_point_format(&non_empty));
        }
        StructuralType::Integer | StructuralType::Float => {
            if name_has_token(name, LATITUDE_NAMES) && all_in_range(&non_empty, -90.0, 90.0) {
                id.add(SemanticType::Latitude);
            }
            if name_has_token(name, LONGITUDE_NAMES) && all_in_range(&non_empty, -180.0, 180.0) {
                id.add(SemanticType::Longitude);
            }
            if structural == StructuralType::Integer {
                if all_unique && name_is_identifier(name) {
                    id.add(SemanticType::Id);
                }
                if distinct.len() == 2 {
                    id.add(SemanticType::Boolean);
                }
                if ratio(distinct.len(), n) <= MAX_CATEGORICAL_RATIO {
                    id.add(SemanticType::Categorical);
                }
            }
        }
        StructuralType::Text => {
            let datetimes: Vec<DateTime<Utc>> = non_empty
                .iter()
                .filter_map(|c| datetime::parse_datetime(c))
                .collect();
            if ratio(datetimes.len(), n) >= DATETIME_THRESHOLD {
                id.add(SemanticType::DateTime);
                id.datetimes = Some(datetimes);
            } else {
                if distinct.len() == 2 {
                    id.add(SemanticType::Boolean);
                }
                if ratio(distinct.len(), n) <= MAX_CATEGORICAL_RATIO {
                    id.add(SemanticType::Categorical);
                }

                let is_id = all_unique
                    && name_is_identifier(name)
                    && non_empty.iter().all(|c| c.len() <= MAX_ID_TEXT_LENGTH);
                if is_id {
                    id.add(SemanticType::Id);
                }

                let mut is_admin = false;
                if let Some(geo) = geo_data {
                    is_admin = resolve_admin(&mut id, &non_empty, geo);
                }

                if !is_id && !is_admin {
                    id.add(SemanticType::Text);
                }
            }
        }
        StructuralType::Missing => {}
    }

    apply_manual(&mut id, manual);
    id
}

/// Resolve the column against the geo reference; tags it `admin` when
/// enough distinct values are known entities.
fn resolve_admin(id: &mut TypeIdentification, non_empty: &[&str], geo: &GeoData) -> bool {
    if geo.is_empty() {
        return false;
    }
    let mut resolved_distinct: HashMap<String, Option<AdminArea>> = HashMap::new();
    for cell in non_empty {
        resolved_distinct
            .entry(cell.to_lowercase())
            .or_insert_with(|| geo.resolve(cell).cloned());
    }
    let n_resolved = resolved_distinct.values().filter(|a| a.is_some()).count();
    if ratio(n_resolved, resolved_distinct.len()) < ADMIN_RESOLUTION_THRESHOLD {
        return false;
    }

    // Most common level wins; ties break toward the coarser level
    let mut level_counts: HashMap<u8, usize> = HashMap::new();
    for area in resolved_distinct.values().flatten() {
        *level_counts.entry(area.level).or_default() += 1;
    }
    let level = level_counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
        .map(|(level, _)| level);

    id.add(SemanticType::Admin);
    id.admin_area_level = level;
    id.admin_areas = Some(
        non_empty
            .iter()
            .map(|cell| {
                resolved_distinct
                    .get(&cell.to_lowercase())
                    .cloned()
                    .flatten()
            })
            .collect(),
    );
    true
}

fn apply_manual(id: &mut TypeIdentification, manual: Option<&ManualColumn>) {
    let Some(manual) = manual else { return };
    if let Some(structural) = manual.structural_type {
        id.structural_type = Some(structural);
    }
    if let Some(semantic) = &manual.semantic_types {
        id.semantic_types = semantic.clone();
    }
}
