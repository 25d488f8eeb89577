//! Shared data structures for the profiling pipeline:
//! - structural, semantic, and dataset-level type tags
//! - the metadata document emitted by the orchestrator
//! - coverage entries (numerical ranges, spatial envelopes, temporal ranges)
//! - plot descriptions and recommendations

mod metadata;

pub use metadata::*;

use serde::{Deserialize, Serialize};

/// The physical shape of a column's values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructuralType {
    Integer,
    Float,
    Text,
    GeoPoint,
    Missing,
}

/// A domain interpretation of a column, independent of physical shape.
///
/// Multiple semantic types may co-occur on one column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticType {
    DateTime,
    Categorical,
    Text,
    Latitude,
    Longitude,
    Admin,
    Address,
    Id,
    Boolean,
}

/// Dataset-level type tag aggregated across columns.
///
/// Variants are declared in their lexicographic serialization order so the
/// derived `Ord` matches the sorted `types` list in the output document.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum DatasetType {
    Categorical,
    Numerical,
    Spatial,
    Temporal,
}

/// Classify a column into a dataset-level bucket.
///
/// Spatial evidence wins over everything else (a latitude column is also a
/// float), then temporal, then categorical, then plain numbers. Columns
/// with no bucket (free text, identifiers) return `None`.
pub fn determine_dataset_type(
    structural_type: StructuralType,
    semantic_types: &[SemanticType],
) -> Option<DatasetType> {
    let has = |t: SemanticType| semantic_types.contains(&t);

    if structural_type == StructuralType::GeoPoint
        || has(SemanticType::Latitude)
        || has(SemanticType::Longitude)
        || has(SemanticType::Admin)
        || has(SemanticType::Address)
    {
        Some(DatasetType::Spatial)
    } else if has(SemanticType::DateTime) {
        Some(DatasetType::Temporal)
    } else if has(SemanticType::Categorical) || has(SemanticType::Boolean) {
        Some(DatasetType::Categorical)
    } else if matches!(
        structural_type,
        StructuralType::Integer | StructuralType::Float
    ) {
        Some(DatasetType::Numerical)
    } else {
        None
    }
}
