//! End-to-end profiling tests.
//!
//! Each test drives the full pipeline through `process_dataset` on a small
//! CSV written to disk, with fakes standing in for the remote geocoder and
//! sketch services.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use datascope::error::{GeocoderError, SketchError};
use datascope::profile::{process_dataset, ProfileOptions};
use datascope::sketch::SketchService;
use datascope::spatial::nominatim::Geocoder;
use datascope::spatial::LatLong;
use datascope::types::{
    DatasetType, LazoSketch, Plot, SemanticType, SpatialCoverageType, StructuralType,
    TemporalResolution,
};
use datascope::DataInput;

fn write_csv(dir: &tempfile::TempDir, content: &str) -> std::path::PathBuf {
    let path = dir.path().join("data.csv");
    std::fs::write(&path, content).unwrap();
    path
}

fn profile(content: &str, options: ProfileOptions<'_>) -> datascope::DatasetMetadata {
    let dir = tempfile::tempdir().unwrap();
    let path = write_csv(&dir, content);
    process_dataset(DataInput::path(path), options).unwrap()
}

#[test]
fn empty_csv_short_circuits() {
    let metadata = profile("name,salary\n", ProfileOptions::default());
    assert_eq!(metadata.nb_rows, 0);
    assert_eq!(metadata.nb_profiled_rows, 0);
    assert!(metadata.columns.is_empty());
    assert!(metadata.types.is_empty());
}

#[test]
fn zero_byte_input_short_circuits() {
    let metadata = profile("", ProfileOptions::default());
    assert_eq!(metadata.nb_rows, 0);
    assert!(metadata.columns.is_empty());
}

#[test]
fn numeric_column_statistics() {
    let metadata = profile(
        "salary\n30000\n40000\n50000\n60000\n",
        ProfileOptions {
            plots: true,
            ..Default::default()
        },
    );

    assert_eq!(metadata.nb_rows, 4);
    assert_eq!(metadata.nb_columns, 1);
    let column = &metadata.columns[0];
    assert_eq!(column.name, "salary");
    assert_eq!(column.structural_type, StructuralType::Integer);
    assert!((column.mean.unwrap() - 45000.0).abs() < 1e-9);
    assert!((column.stddev.unwrap() - 12909.944487).abs() < 1e-5);

    let coverage = column.coverage.as_ref().unwrap();
    assert_eq!(coverage.len(), 1);
    assert_eq!(coverage[0].range.gte, 30000.0);
    assert_eq!(coverage[0].range.lte, 60000.0);

    let Some(Plot::HistogramNumerical { data }) = &column.plot else {
        panic!("expected a numerical histogram, got {:?}", column.plot);
    };
    assert_eq!(data.len(), 10);
    assert_eq!(data.iter().map(|b| b.count).sum::<usize>(), 4);

    assert_eq!(metadata.types, vec![DatasetType::Numerical]);
    assert_eq!(metadata.nb_numerical_columns, Some(1));
}

#[test]
fn latlong_pair_produces_spatial_coverage() {
    let metadata = profile(
        "lat,long\n40.7,-74.0\n40.8,-73.9\n40.75,-73.95\n",
        ProfileOptions::default(),
    );

    assert!(metadata.columns[0]
        .semantic_types
        .contains(&SemanticType::Latitude));
    assert!(metadata.columns[1]
        .semantic_types
        .contains(&SemanticType::Longitude));

    let coverage = metadata.spatial_coverage.as_ref().unwrap();
    assert_eq!(coverage.len(), 1);
    let entry = &coverage[0];
    assert_eq!(entry.kind, SpatialCoverageType::Latlong);
    assert_eq!(entry.column_names, vec!["lat", "long"]);
    assert_eq!(entry.column_indexes, vec![0, 1]);
    assert_eq!(entry.ranges.len(), 1);

    // One envelope enclosing all three points, with positive area
    let envelope = &entry.ranges[0].range;
    assert!(envelope.min_lon() <= -74.0 && -73.9 <= envelope.max_lon());
    assert!(envelope.min_lat() <= 40.7 && 40.8 <= envelope.max_lat());
    assert!(envelope.min_lon() < envelope.max_lon());
    assert!(envelope.min_lat() < envelope.max_lat());

    assert_eq!(metadata.types, vec![DatasetType::Spatial]);
    assert_eq!(metadata.nb_spatial_columns, Some(2));
}

#[test]
fn unpaired_latitude_loses_semantic_type() {
    let metadata = profile("lat\n40.7\n40.8\n", ProfileOptions::default());
    assert!(!metadata.columns[0]
        .semantic_types
        .contains(&SemanticType::Latitude));
    assert!(metadata.spatial_coverage.is_none());
}

#[test]
fn datetime_column_temporal_coverage() {
    let metadata = profile(
        "date\n2021-01-01\n2021-06-01\n2021-12-01\n",
        ProfileOptions::default(),
    );

    let column = &metadata.columns[0];
    assert_eq!(column.structural_type, StructuralType::Text);
    assert!(column.semantic_types.contains(&SemanticType::DateTime));

    let coverage = metadata.temporal_coverage.as_ref().unwrap();
    assert_eq!(coverage.len(), 1);
    let entry = &coverage[0];
    assert_eq!(entry.kind, "datetime");
    assert_eq!(entry.column_names, vec!["date"]);
    assert_eq!(entry.column_indexes, vec![0]);
    // All three dates are firsts of a month at midnight
    assert_eq!(entry.temporal_resolution, TemporalResolution::Month);

    assert_eq!(entry.ranges.len(), 1);
    let start = chrono::DateTime::parse_from_rfc3339("2021-01-01T00:00:00Z").unwrap();
    let end = chrono::DateTime::parse_from_rfc3339("2021-12-01T00:00:00Z").unwrap();
    assert_eq!(entry.ranges[0].range.gte, start.timestamp() as f64);
    assert_eq!(entry.ranges[0].range.lte, end.timestamp() as f64);

    assert_eq!(metadata.types, vec![DatasetType::Temporal]);
}

#[test]
fn garbage_header_rows_discarded() {
    let mut content = String::new();
    content.push_str("Survey of salaries\n");
    content.push_str("Produced,by,an,awful,tool\n");
    content.push_str("2021\n");
    content.push_str("name,salary\n");
    for i in 0..500 {
        content.push_str(&format!("person {i},{}\n", 30000 + i));
    }

    let metadata = profile(&content, ProfileOptions::default());
    assert_eq!(metadata.nb_rows, 500);
    assert_eq!(metadata.nb_profiled_rows, 500);
    let names: Vec<&str> = metadata.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["name", "salary"]);
}

/// Geocoder fake backed by a fixed table.
struct TableGeocoder {
    known: HashMap<String, LatLong>,
}

impl Geocoder for TableGeocoder {
    fn geocode_batch(&self, queries: &[&str]) -> Result<Vec<Option<LatLong>>, GeocoderError> {
        Ok(queries.iter().map(|q| self.known.get(*q).copied()).collect())
    }
}

#[test]
fn address_column_geocoded() {
    // 100 distinct city names; 95 resolve, 5 do not
    let mut known = HashMap::new();
    let mut content = String::from("city\n");
    for i in 0..100 {
        let name = format!("city {i}");
        content.push_str(&name);
        content.push('\n');
        if i < 95 {
            known.insert(
                name,
                [40.0 + (i as f64) * 0.01, -74.0 + (i as f64) * 0.01],
            );
        }
    }
    let geocoder = TableGeocoder { known };

    let metadata = profile(
        &content,
        ProfileOptions {
            geocoder: Some(&geocoder),
            ..Default::default()
        },
    );

    let column = &metadata.columns[0];
    assert!(column.semantic_types.contains(&SemanticType::Address));

    let coverage = metadata.spatial_coverage.as_ref().unwrap();
    let entry = coverage
        .iter()
        .find(|e| e.kind == SpatialCoverageType::Address)
        .expect("no address coverage entry");
    assert_eq!(entry.column_names, vec!["city"]);
    assert!(!entry.ranges.is_empty());
}

#[test]
fn unreliable_addresses_discarded() {
    // Only half the values resolve: the column keeps plain text semantics
    let mut known = HashMap::new();
    let mut content = String::from("place\n");
    for i in 0..40 {
        let name = format!("place {i}");
        content.push_str(&name);
        content.push('\n');
        if i % 2 == 0 {
            known.insert(name, [40.0, -74.0]);
        }
    }
    let geocoder = TableGeocoder { known };

    let metadata = profile(
        &content,
        ProfileOptions {
            geocoder: Some(&geocoder),
            ..Default::default()
        },
    );
    assert!(!metadata.columns[0]
        .semantic_types
        .contains(&SemanticType::Address));
}

/// Sketch-service fake that counts calls and fails once per method when
/// asked to, exercising the single-retry policy.
#[derive(Default)]
struct FlakySketchService {
    index_calls: AtomicUsize,
    sketch_calls: AtomicUsize,
    fail_first: bool,
}

impl SketchService for FlakySketchService {
    fn index_data_path(
        &self,
        _path: &std::path::Path,
        _dataset_id: &str,
        _column_names: &[String],
    ) -> Result<(), SketchError> {
        let call = self.index_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_first && call == 0 {
            return Err(SketchError::Service("transient".to_owned()));
        }
        Ok(())
    }

    fn index_data(
        &self,
        _values: &[String],
        _dataset_id: &str,
        _column_name: &str,
    ) -> Result<(), SketchError> {
        self.index_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn sketch_from_data_path(
        &self,
        _path: &std::path::Path,
        _dataset_id: &str,
        column_names: &[String],
    ) -> Result<Vec<LazoSketch>, SketchError> {
        self.sketch_calls.fetch_add(1, Ordering::SeqCst);
        Ok(column_names
            .iter()
            .map(|_| LazoSketch {
                n_permutations: 256,
                hash_values: vec![1, 2, 3],
                cardinality: 7,
            })
            .collect())
    }

    fn sketch_from_data(
        &self,
        _values: &[String],
        _dataset_id: &str,
        _column_name: &str,
    ) -> Result<LazoSketch, SketchError> {
        self.sketch_calls.fetch_add(1, Ordering::SeqCst);
        Ok(LazoSketch {
            n_permutations: 256,
            hash_values: vec![1, 2, 3],
            cardinality: 7,
        })
    }

    fn remove_sketches(
        &self,
        _dataset_id: &str,
        _column_names: &[String],
    ) -> Result<bool, SketchError> {
        Ok(true)
    }
}

#[test]
fn textual_columns_indexed_with_retry() {
    let service = FlakySketchService {
        fail_first: true,
        ..Default::default()
    };
    let metadata = profile(
        "word,n\nalpha,1\nbeta,2\ngamma,3\n",
        ProfileOptions {
            dataset_id: Some("test.ds".to_owned()),
            sketch_client: Some(&service),
            ..Default::default()
        },
    );
    // First call failed, the retry succeeded
    assert_eq!(service.index_calls.load(Ordering::SeqCst), 2);
    assert!(metadata.columns[0].lazo.is_none());
}

#[test]
fn search_mode_attaches_sketches() {
    let service = FlakySketchService::default();
    let metadata = profile(
        "word,n\nalpha,1\nbeta,2\ngamma,3\n",
        ProfileOptions {
            sketch_client: Some(&service),
            search: true,
            ..Default::default()
        },
    );
    let sketch = metadata.columns[0].lazo.as_ref().expect("no sketch");
    assert_eq!(sketch.n_permutations, 256);
    assert_eq!(sketch.cardinality, 7);
    // The numeric column gets none
    assert!(metadata.columns[1].lazo.is_none());
}

#[test]
fn attribute_keywords_expanded() {
    let metadata = profile("firstName2\nalpha\nbeta\n", ProfileOptions::default());
    let keywords = metadata.attribute_keywords.as_ref().unwrap();
    for expected in ["firstName2", "first", "Name", "2"] {
        assert!(
            keywords.iter().any(|k| k == expected),
            "missing keyword {expected:?} in {keywords:?}"
        );
    }
}

#[test]
fn sample_is_bounded_and_crlf() {
    let mut content = String::from("name,salary\n");
    for i in 0..100 {
        content.push_str(&format!("person {i},{}\n", 30000 + i));
    }
    let metadata = profile(
        &content,
        ProfileOptions {
            include_sample: true,
            ..Default::default()
        },
    );
    let sample = metadata.sample.as_ref().unwrap();
    assert!(sample.contains("\r\n"));
    // Header plus at most 20 rows
    assert_eq!(sample.trim_end().lines().count(), 21);
    assert!(sample.starts_with("name,salary"));
}

#[test]
fn profiling_is_deterministic() {
    let mut content = String::from("name,salary,date\n");
    for i in 0..200 {
        content.push_str(&format!(
            "person {i},{},2021-{:02}-01\n",
            30000 + i * 7,
            (i % 12) + 1
        ));
    }

    let run = || {
        profile(
            &content,
            ProfileOptions {
                include_sample: true,
                plots: true,
                ..Default::default()
            },
        )
    };
    let first = serde_json::to_string(&run()).unwrap();
    let second = serde_json::to_string(&run()).unwrap();
    assert_eq!(first, second);
}

#[test]
fn mismatched_column_metadata_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_csv(&dir, "a,b\n1,2\n");
    let options = ProfileOptions {
        metadata: datascope::DatasetMetadata {
            columns: vec![datascope::ColumnMetadata::new("only_one")],
            ..Default::default()
        },
        ..Default::default()
    };
    let result = process_dataset(DataInput::path(path), options);
    assert!(matches!(
        result,
        Err(datascope::ProfileError::MalformedInput(_))
    ));
}

#[test]
fn recommend_plots_from_sample() {
    let mut content = String::from("salary,date,kind\n");
    for i in 0..50 {
        content.push_str(&format!(
            "{},2021-{:02}-01,{}\n",
            30000 + i * 100,
            (i % 12) + 1,
            ["a", "b", "c"][i % 3]
        ));
    }
    let metadata = profile(
        &content,
        ProfileOptions {
            include_sample: true,
            ..Default::default()
        },
    );
    let recommendations = metadata.recommend_plots.as_ref().unwrap();
    assert!(!recommendations.is_empty());
    assert!(recommendations.len() <= 4);
    assert_eq!(recommendations[0].numerical_column, "salary");
    assert!(recommendations
        .iter()
        .any(|r| r.temporal_column.as_deref() == Some("date")));
}
