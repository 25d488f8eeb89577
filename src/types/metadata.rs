//! The metadata document model.
//!
//! One [`DatasetMetadata`] is created per profiling call, mutated only
//! within that call, and returned as an immutable document. The caller may
//! pre-fill descriptive fields (name, description, materialization hints,
//! column names, manual annotations); the profiler fills in everything else.

use serde::{Deserialize, Serialize};

use super::{DatasetType, SemanticType, StructuralType};

/// A closed numerical interval, `gte ..= lte`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GteLte {
    pub gte: f64,
    pub lte: f64,
}

/// One clustered numerical (or timestamp) range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NumericalRange {
    pub range: GteLte,
}

impl NumericalRange {
    pub fn new(gte: f64, lte: f64) -> Self {
        Self {
            range: GteLte { gte, lte },
        }
    }
}

/// Axis-aligned geographic rectangle, `[[min_lon, max_lat], [max_lon, min_lat]]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub shape: String,
    pub coordinates: [[f64; 2]; 2],
}

impl Envelope {
    pub fn new(min_lon: f64, max_lat: f64, max_lon: f64, min_lat: f64) -> Self {
        Self {
            shape: "envelope".to_owned(),
            coordinates: [[min_lon, max_lat], [max_lon, min_lat]],
        }
    }

    pub fn min_lon(&self) -> f64 {
        self.coordinates[0][0]
    }

    pub fn max_lat(&self) -> f64 {
        self.coordinates[0][1]
    }

    pub fn max_lon(&self) -> f64 {
        self.coordinates[1][0]
    }

    pub fn min_lat(&self) -> f64 {
        self.coordinates[1][1]
    }
}

/// One clustered spatial range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialRange {
    pub range: Envelope,
}

/// Source of a spatial-coverage entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpatialCoverageType {
    Latlong,
    Point,
    PointLatlong,
    Address,
    Admin,
}

/// Spatial coverage computed from one column (or one lat/long pair).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialCoverage {
    #[serde(rename = "type")]
    pub kind: SpatialCoverageType,
    pub column_names: Vec<String>,
    pub column_indexes: Vec<usize>,
    pub ranges: Vec<SpatialRange>,
}

/// Granularity of a temporal column, finest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemporalResolution {
    Second,
    Minute,
    Hour,
    Day,
    Month,
    Year,
}

/// Temporal coverage computed from one datetime column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporalCoverage {
    #[serde(rename = "type")]
    pub kind: String,
    pub column_names: Vec<String>,
    pub column_indexes: Vec<usize>,
    pub column_types: Vec<SemanticType>,
    pub ranges: Vec<NumericalRange>,
    pub temporal_resolution: TemporalResolution,
}

/// Ordering of coordinates inside a WKT point literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PointFormat {
    #[serde(rename = "lat,long")]
    LatLong,
    #[serde(rename = "long,lat")]
    LongLat,
}

/// Sketch from the set-overlap index service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LazoSketch {
    pub n_permutations: u64,
    pub hash_values: Vec<u64>,
    pub cardinality: u64,
}

/// One histogram bar over a numerical bin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericalBin {
    pub count: usize,
    pub bin_start: f64,
    pub bin_end: f64,
}

/// One histogram bar over a time interval (ISO-8601 bounds).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemporalBin {
    pub count: usize,
    pub date_start: String,
    pub date_end: String,
}

/// One histogram bar over a categorical value or word.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoricalBin {
    pub bin: String,
    pub count: usize,
}

/// Per-column plot, selected by the detected types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Plot {
    #[serde(rename = "histogram_numerical")]
    HistogramNumerical { data: Vec<NumericalBin> },
    #[serde(rename = "histogram_temporal")]
    HistogramTemporal { data: Vec<TemporalBin> },
    #[serde(rename = "histogram_categorical")]
    HistogramCategorical { data: Vec<CategoricalBin> },
    #[serde(rename = "histogram_text")]
    HistogramText { data: Vec<CategoricalBin> },
}

/// A dataset-level plot recommendation with a Vega-Lite-style spec and
/// inline values drawn from the sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlotRecommendation {
    pub numerical_column: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temporal_column: Option<String>,
    #[serde(
        rename = "spatial/categorical_column",
        skip_serializing_if = "Option::is_none"
    )]
    pub categorical_column: Option<String>,
    pub generated_question: String,
    pub data: serde_json::Value,
    pub spec: serde_json::Value,
}

/// Caller-supplied override for one column's detection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManualColumn {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structural_type: Option<StructuralType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semantic_types: Option<Vec<SemanticType>>,
    /// Explicit pairing tag: lat and long columns sharing a tag are paired.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latlong_pair: Option<String>,
}

/// Caller-supplied manual annotations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManualAnnotations {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<ManualColumn>,
}

/// Metadata for one column, in input order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMetadata {
    pub name: String,
    pub structural_type: StructuralType,
    pub semantic_types: Vec<SemanticType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stddev: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coverage: Option<Vec<NumericalRange>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plot: Option<Plot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_area_level: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub point_format: Option<PointFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lazo: Option<LazoSketch>,
}

impl ColumnMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            structural_type: StructuralType::Missing,
            semantic_types: Vec::new(),
            mean: None,
            stddev: None,
            coverage: None,
            plot: None,
            admin_area_level: None,
            point_format: None,
            lazo: None,
        }
    }

    /// Append a semantic type, keeping the list a set.
    pub fn add_semantic_type(&mut self, t: SemanticType) {
        if !self.semantic_types.contains(&t) {
            self.semantic_types.push(t);
        }
    }
}

/// The profiling result document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Profiling timestamp, RFC 3339.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    /// Profiler version.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Opaque materialization hints from the discoverer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub materialize: Option<serde_json::Value>,
    /// Input size in bytes (absent for frame inputs).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    pub nb_rows: u64,
    pub nb_profiled_rows: u64,
    pub nb_columns: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_row_size: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nb_spatial_columns: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nb_temporal_columns: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nb_categorical_columns: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nb_numerical_columns: Option<usize>,
    pub types: Vec<DatasetType>,
    pub columns: Vec<ColumnMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spatial_coverage: Option<Vec<SpatialCoverage>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temporal_coverage: Option<Vec<TemporalCoverage>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribute_keywords: Option<Vec<String>>,
    /// Up to 20 sample rows as CRLF-terminated CSV text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommend_plots: Option<Vec<PlotRecommendation>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manual_annotations: Option<ManualAnnotations>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_accessors() {
        let e = Envelope::new(-74.0, 40.8, -73.9, 40.7);
        assert_eq!(e.min_lon(), -74.0);
        assert_eq!(e.max_lat(), 40.8);
        assert_eq!(e.max_lon(), -73.9);
        assert_eq!(e.min_lat(), 40.7);
    }

    #[test]
    fn test_envelope_json_shape() {
        let e = Envelope::new(-74.0, 40.8, -73.9, 40.7);
        let v = serde_json::to_value(&e).unwrap();
        assert_eq!(
            v,
            serde_json::json!({
                "type": "envelope",
                "coordinates": [[-74.0, 40.8], [-73.9, 40.7]],
            })
        );
    }

    #[test]
    fn test_column_metadata_skips_absent_fields() {
        let col = ColumnMetadata::new("a");
        let v = serde_json::to_value(&col).unwrap();
        let obj = v.as_object().unwrap();
        assert!(obj.contains_key("name"));
        assert!(obj.contains_key("structural_type"));
        assert!(!obj.contains_key("mean"));
        assert!(!obj.contains_key("lazo"));
    }

    #[test]
    fn test_semantic_types_stay_a_set() {
        let mut col = ColumnMetadata::new("a");
        col.add_semantic_type(SemanticType::Text);
        col.add_semantic_type(SemanticType::Text);
        assert_eq!(col.semantic_types, vec![SemanticType::Text]);
    }

    #[test]
    fn test_point_format_serialization() {
        assert_eq!(
            serde_json::to_string(&PointFormat::LatLong).unwrap(),
            "\"lat,long\""
        );
        assert_eq!(
            serde_json::to_string(&PointFormat::LongLat).unwrap(),
            "\"long,lat\""
        );
    }
}
