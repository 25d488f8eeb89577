//! Flattening of one metadata document into the wire documents for the
//! search backend.
//!
//! Index names are part of the wire contract: `datamart` holds one
//! document per dataset, `datamart_columns` one per column (inherited
//! fields prefixed `dataset_`), `datamart_spatial_coverage` and
//! `datamart_temporal_coverage` one per coverage entry with the range
//! bounds copied up for range queries. No search client lives here; the
//! caller indexes the returned documents.

use serde_json::{json, Map, Value};

use crate::error::ProfileError;
use crate::types::DatasetMetadata;

/// Dataset index name.
pub const INDEX_DATASETS: &str = "datamart";
/// Per-column index name.
pub const INDEX_COLUMNS: &str = "datamart_columns";
/// Per-spatial-coverage-entry index name.
pub const INDEX_SPATIAL: &str = "datamart_spatial_coverage";
/// Per-temporal-coverage-entry index name.
pub const INDEX_TEMPORAL: &str = "datamart_temporal_coverage";

/// Dataset fields that stay out of the flattened documents.
const DISCARD_DATASET_FIELDS: &[&str] = &[
    "columns",
    "sample",
    "materialize",
    "spatial_coverage",
    "temporal_coverage",
    "manual_annotations",
];

/// Column fields that stay out of the per-column documents.
const DISCARD_COLUMN_FIELDS: &[&str] = &["plot"];

fn to_object(value: Value) -> Result<Map<String, Value>, ProfileError> {
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(ProfileError::Config(
            "metadata did not serialize to an object".to_owned(),
        )),
    }
}

fn serialize(metadata: &DatasetMetadata) -> Result<Map<String, Value>, ProfileError> {
    let value = serde_json::to_value(metadata)
        .map_err(|e| ProfileError::Config(format!("unserializable metadata: {e}")))?;
    to_object(value)
}

/// The `datamart` document: the whole metadata plus the dataset id.
pub fn dataset_document(
    dataset_id: &str,
    metadata: &DatasetMetadata,
) -> Result<Value, ProfileError> {
    let mut doc = serialize(metadata)?;
    doc.insert("id".to_owned(), json!(dataset_id));
    Ok(Value::Object(doc))
}

/// Fields every flattened document inherits, `dataset_`-prefixed.
fn common_dataset_fields(
    dataset_id: &str,
    metadata: &DatasetMetadata,
) -> Result<Map<String, Value>, ProfileError> {
    let mut common = Map::new();
    common.insert("dataset_id".to_owned(), json!(dataset_id));
    for (key, value) in serialize(metadata)? {
        if !DISCARD_DATASET_FIELDS.contains(&key.as_str()) {
            common.insert(format!("dataset_{key}"), value);
        }
    }
    Ok(common)
}

/// The `datamart_columns` documents, one per column in order.
pub fn column_documents(
    dataset_id: &str,
    metadata: &DatasetMetadata,
) -> Result<Vec<Value>, ProfileError> {
    let common = common_dataset_fields(dataset_id, metadata)?;

    let mut documents = Vec::with_capacity(metadata.columns.len());
    for (index, column) in metadata.columns.iter().enumerate() {
        let value = serde_json::to_value(column)
            .map_err(|e| ProfileError::Config(format!("unserializable column: {e}")))?;
        let mut doc = to_object(value)?;
        for field in DISCARD_COLUMN_FIELDS {
            doc.remove(*field);
        }
        doc.extend(common.clone());
        doc.insert("index".to_owned(), json!(index));
        // Copy the bounds up so the backend can range-query them
        if let Some(coverage) = column.coverage.as_ref() {
            let ranges: Vec<Value> = coverage
                .iter()
                .map(|r| {
                    json!({
                        "range": r.range,
                        "gte": r.range.gte,
                        "lte": r.range.lte,
                    })
                })
                .collect();
            doc.insert("coverage".to_owned(), json!(ranges));
        }
        documents.push(Value::Object(doc));
    }
    Ok(documents)
}

/// The `datamart_spatial_coverage` documents, one per coverage entry.
///
/// Each range is annotated with its envelope corners (`min_lon`,
/// `max_lat`, `max_lon`, `min_lat`) alongside the original envelope.
pub fn spatial_coverage_documents(
    dataset_id: &str,
    metadata: &DatasetMetadata,
) -> Result<Vec<Value>, ProfileError> {
    let common = common_dataset_fields(dataset_id, metadata)?;

    let entries = metadata.spatial_coverage.as_deref().unwrap_or_default();
    let mut documents = Vec::with_capacity(entries.len());
    for entry in entries {
        let value = serde_json::to_value(entry)
            .map_err(|e| ProfileError::Config(format!("unserializable coverage: {e}")))?;
        let mut doc = to_object(value)?;
        doc.extend(common.clone());
        let ranges: Vec<Value> = entry
            .ranges
            .iter()
            .map(|r| {
                json!({
                    "range": r.range,
                    "min_lon": r.range.min_lon(),
                    "max_lat": r.range.max_lat(),
                    "max_lon": r.range.max_lon(),
                    "min_lat": r.range.min_lat(),
                })
            })
            .collect();
        doc.insert("ranges".to_owned(), json!(ranges));
        documents.push(Value::Object(doc));
    }
    Ok(documents)
}

/// The `datamart_temporal_coverage` documents, one per coverage entry,
/// with `gte`/`lte` copied up next to each range.
pub fn temporal_coverage_documents(
    dataset_id: &str,
    metadata: &DatasetMetadata,
) -> Result<Vec<Value>, ProfileError> {
    let common = common_dataset_fields(dataset_id, metadata)?;

    let entries = metadata.temporal_coverage.as_deref().unwrap_or_default();
    let mut documents = Vec::with_capacity(entries.len());
    for entry in entries {
        let value = serde_json::to_value(entry)
            .map_err(|e| ProfileError::Config(format!("unserializable coverage: {e}")))?;
        let mut doc = to_object(value)?;
        doc.extend(common.clone());
        let ranges: Vec<Value> = entry
            .ranges
            .iter()
            .map(|r| {
                json!({
                    "range": r.range,
                    "gte": r.range.gte,
                    "lte": r.range.lte,
                })
            })
            .collect();
        doc.insert("ranges".to_owned(), json!(ranges));
        documents.push(Value::Object(doc));
    }
    Ok(documents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        ColumnMetadata, Envelope, NumericalRange, SpatialCoverage, SpatialCoverageType,
        SpatialRange, StructuralType, TemporalCoverage, TemporalResolution, SemanticType,
    };

    fn sample_metadata() -> DatasetMetadata {
        let mut salary = ColumnMetadata::new("salary");
        salary.structural_type = StructuralType::Integer;
        salary.coverage = Some(vec![NumericalRange::new(30000.0, 60000.0)]);

        DatasetMetadata {
            name: Some("test".to_owned()),
            nb_rows: 4,
            nb_profiled_rows: 4,
            nb_columns: 1,
            columns: vec![salary],
            spatial_coverage: Some(vec![SpatialCoverage {
                kind: SpatialCoverageType::Latlong,
                column_names: vec!["lat".to_owned(), "long".to_owned()],
                column_indexes: vec![1, 2],
                ranges: vec![SpatialRange {
                    range: Envelope::new(-74.0, 40.8, -73.9, 40.7),
                }],
            }]),
            temporal_coverage: Some(vec![TemporalCoverage {
                kind: "datetime".to_owned(),
                column_names: vec!["date".to_owned()],
                column_indexes: vec![3],
                column_types: vec![SemanticType::DateTime],
                ranges: vec![NumericalRange::new(0.0, 100.0)],
                temporal_resolution: TemporalResolution::Day,
            }]),
            sample: Some("salary\r\n30000\r\n".to_owned()),
            ..Default::default()
        }
    }

    #[test]
    fn test_dataset_document_carries_id() {
        let doc = dataset_document("datamart.test.ds", &sample_metadata()).unwrap();
        assert_eq!(doc["id"], "datamart.test.ds");
        assert_eq!(doc["nb_rows"], 4);
    }

    #[test]
    fn test_column_documents_flattened() {
        let docs = column_documents("ds1", &sample_metadata()).unwrap();
        assert_eq!(docs.len(), 1);
        let doc = &docs[0];
        assert_eq!(doc["index"], 0);
        assert_eq!(doc["name"], "salary");
        assert_eq!(doc["dataset_id"], "ds1");
        assert_eq!(doc["dataset_name"], "test");
        // Inherited documents leave the heavy fields behind
        assert!(doc.get("dataset_columns").is_none());
        assert!(doc.get("dataset_sample").is_none());
        // Bounds copied up beside the original range
        assert_eq!(doc["coverage"][0]["gte"], 30000.0);
        assert_eq!(doc["coverage"][0]["lte"], 60000.0);
        assert_eq!(doc["coverage"][0]["range"]["gte"], 30000.0);
    }

    #[test]
    fn test_spatial_documents_envelope_corners() {
        let docs = spatial_coverage_documents("ds1", &sample_metadata()).unwrap();
        assert_eq!(docs.len(), 1);
        let range = &docs[0]["ranges"][0];
        assert_eq!(range["min_lon"], -74.0);
        assert_eq!(range["max_lat"], 40.8);
        assert_eq!(range["max_lon"], -73.9);
        assert_eq!(range["min_lat"], 40.7);
        assert_eq!(range["range"]["type"], "envelope");
    }

    #[test]
    fn test_temporal_documents_bounds() {
        let docs = temporal_coverage_documents("ds1", &sample_metadata()).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0]["ranges"][0]["gte"], 0.0);
        assert_eq!(docs[0]["ranges"][0]["lte"], 100.0);
        assert_eq!(docs[0]["temporal_resolution"], "day");
    }
}
