//! The profiling orchestrator: composes loading, typing, analysis,
//! coverage, sketching, and plot recommendation into one synchronous call
//! that returns a single metadata document.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use rand::SeedableRng;
use rayon::prelude::*;

use crate::common::{expand_attribute_name, truncate_string};
use crate::config::{DEFAULT_LOAD_MAX_SIZE, RANDOM_SEED};
use crate::error::ProfileError;
use crate::geo::{AdminArea, GeoData};
use crate::loader::{load_data, DataInput, Frame};
use crate::metrics;
use crate::numerical::{collect_numerical_values, get_numerical_ranges, mean_stddev};
use crate::plots;
use crate::spatial::nominatim::{resolve_all, Geocoder, MAX_GEOCODER_REQUESTS};
use crate::spatial::{
    get_spatial_ranges, merge_admin_area_ranges, pair_latlong_columns, parse_wkt_column,
    LatLong, LatLongColumn,
};
use crate::sketch::{with_retry, SketchService};
use crate::temporal::{get_temporal_resolution, get_temporal_ranges, to_timestamps};
use crate::typing::identify_types;
use crate::types::{
    determine_dataset_type, ColumnMetadata, DatasetMetadata, DatasetType, ManualColumn,
    PointFormat, SemanticType, SpatialCoverage, SpatialCoverageType, StructuralType,
    TemporalCoverage,
};

/// Rows included in the metadata sample.
pub const SAMPLE_ROWS: usize = 20;

/// Maximum length of a sample cell before truncation.
const SAMPLE_CELL_LIMIT: usize = 140;

/// A column's geocoding is discarded when more than this share of its
/// non-empty values fail to resolve.
const MAX_UNCLEAN_ADDRESSES: f64 = 0.20;

/// How to profile one dataset.
///
/// `metadata` may be pre-filled by the discoverer (name, description,
/// materialization hints, column names, manual annotations); everything
/// else is computed.
pub struct ProfileOptions<'a> {
    pub dataset_id: Option<String>,
    pub metadata: DatasetMetadata,
    /// Sketch service; textual columns are indexed (or sketched, during
    /// search) when present.
    pub sketch_client: Option<&'a dyn SketchService>,
    /// Geocoder for address resolution.
    pub geocoder: Option<&'a dyn Geocoder>,
    /// Local geo reference for admin-area resolution.
    pub geo_data: Option<&'a GeoData>,
    /// True when called from the search path: fetch sketches instead of
    /// indexing.
    pub search: bool,
    /// Include up to [`SAMPLE_ROWS`] random rows as CSV text.
    pub include_sample: bool,
    /// Compute numerical/spatial/temporal ranges (k-means clustering).
    pub coverage: bool,
    /// Compute per-column plots.
    pub plots: bool,
    /// Overrides the configured size budget.
    pub load_max_size: Option<u64>,
}

impl Default for ProfileOptions<'_> {
    fn default() -> Self {
        Self {
            dataset_id: None,
            metadata: DatasetMetadata::default(),
            sketch_client: None,
            geocoder: None,
            geo_data: None,
            search: false,
            include_sample: false,
            coverage: true,
            plots: false,
            load_max_size: None,
        }
    }
}

/// Everything learned about one column: its metadata plus the resolved
/// auxiliaries reused for coverage computation. Resolving addresses or
/// admin areas once for typing and again for coverage would be too slow.
#[derive(Default)]
struct ColumnProfile {
    meta: Option<ColumnMetadata>,
    datetimes: Option<Vec<DateTime<Utc>>>,
    timestamps: Option<Vec<f64>>,
    addresses: Option<Vec<LatLong>>,
    admin_areas: Option<Vec<Option<AdminArea>>>,
}

fn empty_document(mut metadata: DatasetMetadata) -> DatasetMetadata {
    metadata.nb_rows = 0;
    metadata.nb_profiled_rows = 0;
    metadata.columns = Vec::new();
    metadata.types = Vec::new();
    metadata.version = Some(env!("CARGO_PKG_VERSION").to_owned());
    metadata
}

/// Compute all metadata from a dataset.
///
/// Returns one complete document or one error; errors in a single column's
/// optional analysis (geocoding, sketching) are logged and skipped, errors
/// in loading or the caller contract abort the call.
pub fn process_dataset(
    data: DataInput,
    options: ProfileOptions<'_>,
) -> Result<DatasetMetadata, ProfileError> {
    let _timer = metrics::PROFILE_SECONDS.start_timer();

    let ProfileOptions {
        dataset_id,
        metadata: mut meta,
        sketch_client,
        geocoder,
        geo_data,
        search,
        include_sample,
        coverage,
        plots,
        load_max_size,
    } = options;

    let load_max_size = load_max_size.unwrap_or(DEFAULT_LOAD_MAX_SIZE);
    let loaded = match load_data(data, load_max_size) {
        Ok(loaded) => loaded,
        Err(ProfileError::EmptyInput) => {
            tracing::warn!("Input is empty");
            return Ok(empty_document(meta));
        }
        Err(e) => return Err(e),
    };
    let frame = &loaded.frame;

    meta.version = Some(env!("CARGO_PKG_VERSION").to_owned());
    if meta.size.is_none() {
        meta.size = loaded.size;
    }
    meta.nb_rows = loaded.nb_rows;
    meta.nb_profiled_rows = frame.nb_rows() as u64;
    meta.nb_columns = frame.nb_columns();
    meta.average_row_size = loaded.average_row_size;

    // Caller-supplied column metadata must line up with the actual table
    if meta.columns.is_empty() {
        tracing::info!("Setting column names from header");
        meta.columns = frame
            .column_names
            .iter()
            .map(|name| ColumnMetadata::new(name.clone()))
            .collect();
    } else {
        tracing::info!("Using provided columns info");
        if meta.columns.len() != frame.nb_columns() {
            return Err(ProfileError::MalformedInput(
                "column metadata doesn't match number of columns".to_owned(),
            ));
        }
        for (column, name) in meta.columns.iter_mut().zip(&frame.column_names) {
            if !column.name.is_empty() && column.name != *name {
                return Err(ProfileError::MalformedInput(
                    "column names don't match".to_owned(),
                ));
            }
            column.name.clone_from(name);
        }
    }

    if frame.nb_rows() == 0 {
        tracing::info!("0 rows, returning early");
        meta.columns = Vec::new();
        meta.types = Vec::new();
        return Ok(meta);
    }

    let manual_columns: HashMap<&str, &ManualColumn> = meta
        .manual_annotations
        .as_ref()
        .map(|annotations| {
            annotations
                .columns
                .iter()
                .map(|col| (col.name.as_str(), col))
                .collect()
        })
        .unwrap_or_default();

    // Identify types and analyze every column; workers run in parallel but
    // results are collected back in input order
    tracing::info!(columns = meta.nb_columns, "Identifying types");
    let mut profiles: Vec<ColumnProfile> = {
        let _timer = metrics::PROFILE_TYPES_SECONDS.start_timer();
        meta.columns
            .par_iter()
            .enumerate()
            .map(|(idx, column)| {
                process_column(
                    &frame.columns[idx],
                    &column.name,
                    manual_columns.get(column.name.as_str()).copied(),
                    geo_data,
                    geocoder,
                    coverage,
                    plots,
                )
            })
            .collect()
    };
    for (column, profile) in meta.columns.iter_mut().zip(profiles.iter_mut()) {
        if let Some(column_meta) = profile.meta.take() {
            *column = column_meta;
        }
    }

    // Textual columns feed the sketch index
    let columns_textual: Vec<usize> = meta
        .columns
        .iter()
        .enumerate()
        .filter(|(_, col)| {
            col.structural_type == StructuralType::Text
                && !col.semantic_types.contains(&SemanticType::DateTime)
        })
        .map(|(idx, _)| idx)
        .collect();
    if let Some(sketch) = sketch_client {
        if !columns_textual.is_empty() {
            let _timer = metrics::PROFILE_SKETCH_SECONDS.start_timer();
            run_sketches(
                sketch,
                frame,
                loaded.data_path.as_deref(),
                dataset_id.as_deref().unwrap_or(""),
                &columns_textual,
                search,
                &mut meta.columns,
            );
        }
    }

    // Pair latitude and longitude columns; unpaired ones lose the tag
    let latlong_column = |idx: usize, col: &ColumnMetadata| LatLongColumn {
        index: idx,
        name: col.name.clone(),
        annot_pair: manual_columns
            .get(col.name.as_str())
            .and_then(|m| m.latlong_pair.clone()),
    };
    let columns_lat: Vec<LatLongColumn> = meta
        .columns
        .iter()
        .enumerate()
        .filter(|(_, col)| col.semantic_types.contains(&SemanticType::Latitude))
        .map(|(idx, col)| latlong_column(idx, col))
        .collect();
    let columns_long: Vec<LatLongColumn> = meta
        .columns
        .iter()
        .enumerate()
        .filter(|(_, col)| col.semantic_types.contains(&SemanticType::Longitude))
        .map(|(idx, col)| latlong_column(idx, col))
        .collect();
    let (latlong_pairs, (missed_lat, missed_long)) =
        pair_latlong_columns(&columns_lat, &columns_long);
    if !missed_lat.is_empty() {
        tracing::warn!(?missed_lat, "Unmatched latitude columns");
    }
    if !missed_long.is_empty() {
        tracing::warn!(?missed_long, "Unmatched longitude columns");
    }
    for column in &mut meta.columns {
        if missed_lat.contains(&column.name) {
            column.semantic_types.retain(|t| *t != SemanticType::Latitude);
        }
        if missed_long.contains(&column.name) {
            column
                .semantic_types
                .retain(|t| *t != SemanticType::Longitude);
        }
    }

    // Dataset-level type tags
    let mut type_counts: HashMap<DatasetType, usize> = HashMap::new();
    for column in &meta.columns {
        if let Some(t) = determine_dataset_type(column.structural_type, &column.semantic_types)
        {
            *type_counts.entry(t).or_default() += 1;
        }
    }
    meta.nb_spatial_columns = type_counts.get(&DatasetType::Spatial).copied();
    meta.nb_temporal_columns = type_counts.get(&DatasetType::Temporal).copied();
    meta.nb_categorical_columns = type_counts.get(&DatasetType::Categorical).copied();
    meta.nb_numerical_columns = type_counts.get(&DatasetType::Numerical).copied();
    let mut types: Vec<DatasetType> = type_counts.into_keys().collect();
    types.sort();
    meta.types = types;

    if coverage {
        tracing::info!("Computing spatial coverage");
        let spatial_coverage = {
            let _timer = metrics::PROFILE_SPATIAL_SECONDS.start_timer();
            compute_spatial_coverage(frame, &meta.columns, &latlong_pairs, &profiles)
        };
        if !spatial_coverage.is_empty() {
            meta.spatial_coverage = Some(spatial_coverage);
        }

        tracing::info!("Computing temporal coverage");
        let temporal_coverage = compute_temporal_coverage(&meta.columns, &profiles);
        if !temporal_coverage.is_empty() {
            meta.temporal_coverage = Some(temporal_coverage);
        }
    }

    // Attribute names, expanded into keywords
    let mut attribute_keywords = Vec::new();
    for column in &meta.columns {
        attribute_keywords.push(column.name.clone());
        let keywords = expand_attribute_name(&column.name);
        if keywords != vec![column.name.clone()] {
            attribute_keywords.extend(keywords);
        }
    }
    meta.attribute_keywords = Some(attribute_keywords);

    if include_sample {
        meta.sample = Some(build_sample(frame)?);
    }

    if coverage {
        meta.recommend_plots = Some(plots::recommend_plots(&meta));
    }

    Ok(meta)
}

#[allow(clippy::too_many_arguments)]
fn process_column(
    cells: &[String],
    name: &str,
    manual: Option<&ManualColumn>,
    geo_data: Option<&GeoData>,
    geocoder: Option<&dyn Geocoder>,
    coverage: bool,
    plots_wanted: bool,
) -> ColumnProfile {
    let mut profile = ColumnProfile::default();
    let mut column = ColumnMetadata::new(name);

    let identification = identify_types(cells, name, geo_data, manual);
    let structural = identification
        .structural_type
        .unwrap_or(StructuralType::Missing);
    tracing::info!(
        column = name,
        structural_type = ?structural,
        semantic_types = ?identification.semantic_types,
        "Column type"
    );
    column.structural_type = structural;
    for semantic in &identification.semantic_types {
        column.add_semantic_type(*semantic);
    }
    column.point_format = identification.point_format;
    column.admin_area_level = identification.admin_area_level;

    // Numerical statistics and ranges
    if matches!(
        structural,
        StructuralType::Integer | StructuralType::Float
    ) && coverage
    {
        let values = collect_numerical_values(cells);
        if let Some((mean, stddev)) = mean_stddev(&values) {
            column.mean = Some(mean);
            column.stddev = Some(stddev);
        }
        if plots_wanted && !values.is_empty() {
            column.plot = Some(plots::numerical_plot(&values));
        }
        let ranges = get_numerical_ranges(&values);
        if !ranges.is_empty() {
            column.coverage = Some(ranges);
        }
    }

    // Cache datetimes and timestamps for temporal coverage
    if let Some(datetimes) = identification.datetimes {
        let timestamps = to_timestamps(&datetimes);
        if plots_wanted && column.plot.is_none() {
            column.plot = Some(plots::temporal_plot(&timestamps));
        }
        profile.datetimes = Some(datetimes);
        profile.timestamps = Some(timestamps);
    }

    if plots_wanted && column.semantic_types.contains(&SemanticType::Categorical) {
        column.plot = Some(plots::categorical_plot(cells));
    }
    if plots_wanted
        && column.semantic_types.contains(&SemanticType::Text)
        && column.plot.is_none()
    {
        column.plot = Some(plots::text_plot(cells));
    }

    // Resolve addresses into coordinates
    if let Some(geocoder) = geocoder {
        if structural == StructuralType::Text
            && column.semantic_types.contains(&SemanticType::Text)
        {
            match resolve_all(geocoder, cells, MAX_GEOCODER_REQUESTS) {
                Ok((locations, non_empty)) if non_empty > 0 => {
                    let unclean = 1.0 - locations.len() as f64 / non_empty as f64;
                    if unclean <= MAX_UNCLEAN_ADDRESSES {
                        profile.addresses = Some(locations);
                        column.add_semantic_type(SemanticType::Address);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    // Non-fatal: the column just loses address candidacy
                    tracing::warn!(column = name, error = %e, "Geocoding failed");
                }
            }
        }
    }

    profile.admin_areas = identification.admin_areas;
    profile.meta = Some(column);
    profile
}

/// Index textual columns, or fetch their sketches during search.
fn run_sketches(
    sketch: &dyn SketchService,
    frame: &Frame,
    data_path: Option<&Path>,
    dataset_id: &str,
    columns_textual: &[usize],
    search: bool,
    columns: &mut [ColumnMetadata],
) {
    let names: Vec<String> = columns_textual
        .iter()
        .map(|&idx| columns[idx].name.clone())
        .collect();

    if !search {
        tracing::info!("Indexing textual data with the sketch service");
        let result = if let Some(path) = data_path {
            // The service can read the file itself
            with_retry(|| sketch.index_data_path(path, dataset_id, &names))
        } else {
            columns_textual
                .iter()
                .zip(&names)
                .try_for_each(|(&idx, name)| {
                    with_retry(|| sketch.index_data(&frame.columns[idx], dataset_id, name))
                })
        };
        if let Err(e) = result {
            tracing::warn!(error = %e, "Error indexing textual attributes");
        }
        return;
    }

    tracing::info!("Sketching textual data");
    let sketches = if let Some(path) = data_path {
        match with_retry(|| sketch.sketch_from_data_path(path, dataset_id, &names)) {
            Ok(sketches) => sketches.into_iter().map(Some).collect(),
            Err(e) => {
                tracing::warn!(error = %e, "Error getting sketches");
                return;
            }
        }
    } else {
        columns_textual
            .iter()
            .zip(&names)
            .map(|(&idx, name)| {
                with_retry(|| sketch.sketch_from_data(&frame.columns[idx], dataset_id, name))
                    .map_err(|e| {
                        tracing::warn!(column = name, error = %e, "Error getting sketch");
                    })
                    .ok()
            })
            .collect::<Vec<_>>()
    };
    for (&idx, sketch) in columns_textual.iter().zip(sketches) {
        columns[idx].lazo = sketch;
    }
}

/// Spatial coverage, in source order: lat/long pairs, WKT points,
/// geocoded addresses, admin areas.
fn compute_spatial_coverage(
    frame: &Frame,
    columns: &[ColumnMetadata],
    latlong_pairs: &[(LatLongColumn, LatLongColumn)],
    profiles: &[ColumnProfile],
) -> Vec<SpatialCoverage> {
    let mut coverage = Vec::new();

    for (col_lat, col_long) in latlong_pairs {
        let lat_cells = &frame.columns[col_lat.index];
        let long_cells = &frame.columns[col_long.index];
        let points: Vec<LatLong> = lat_cells
            .iter()
            .zip(long_cells.iter())
            .filter_map(|(lat, lon)| {
                let lat: f64 = lat.trim().parse().ok()?;
                let lon: f64 = lon.trim().parse().ok()?;
                (-90.0 < lat && lat < 90.0 && -180.0 < lon && lon < 180.0)
                    .then_some([lat, lon])
            })
            .collect();
        if points.is_empty() {
            continue;
        }
        tracing::info!(
            lat = %col_lat.name,
            long = %col_long.name,
            rows = points.len(),
            "Computing spatial ranges for pair"
        );
        let ranges = get_spatial_ranges(&points);
        if !ranges.is_empty() {
            coverage.push(SpatialCoverage {
                kind: SpatialCoverageType::Latlong,
                column_names: vec![col_lat.name.clone(), col_long.name.clone()],
                column_indexes: vec![col_lat.index, col_long.index],
                ranges,
            });
        }
    }

    for (idx, column) in columns.iter().enumerate() {
        if column.structural_type != StructuralType::GeoPoint {
            continue;
        }
        let latlong = column.point_format == Some(PointFormat::LatLong);
        let points = parse_wkt_column(&frame.columns[idx], latlong);
        tracing::info!(column = %column.name, rows = points.len(), "Computing point ranges");
        let ranges = get_spatial_ranges(&points);
        if !ranges.is_empty() {
            coverage.push(SpatialCoverage {
                kind: if latlong {
                    SpatialCoverageType::PointLatlong
                } else {
                    SpatialCoverageType::Point
                },
                column_names: vec![column.name.clone()],
                column_indexes: vec![idx],
                ranges,
            });
        }
    }

    for (idx, profile) in profiles.iter().enumerate() {
        if let Some(locations) = &profile.addresses {
            tracing::info!(
                column = %columns[idx].name,
                rows = locations.len(),
                "Computing address ranges"
            );
            let ranges = get_spatial_ranges(locations);
            if !ranges.is_empty() {
                coverage.push(SpatialCoverage {
                    kind: SpatialCoverageType::Address,
                    column_names: vec![columns[idx].name.clone()],
                    column_indexes: vec![idx],
                    ranges,
                });
            }
        }
    }

    for (idx, profile) in profiles.iter().enumerate() {
        if let Some(areas) = &profile.admin_areas {
            match merge_admin_area_ranges(areas) {
                Some(range) => {
                    coverage.push(SpatialCoverage {
                        kind: SpatialCoverageType::Admin,
                        column_names: vec![columns[idx].name.clone()],
                        column_indexes: vec![idx],
                        ranges: vec![range],
                    });
                }
                None => {
                    tracing::info!(
                        column = %columns[idx].name,
                        "Couldn't build an admin bounding box"
                    );
                }
            }
        }
    }

    coverage
}

fn compute_temporal_coverage(
    columns: &[ColumnMetadata],
    profiles: &[ColumnProfile],
) -> Vec<TemporalCoverage> {
    let mut coverage = Vec::new();
    for (idx, column) in columns.iter().enumerate() {
        if !column.semantic_types.contains(&SemanticType::DateTime) {
            continue;
        }
        let (Some(datetimes), Some(timestamps)) =
            (&profiles[idx].datetimes, &profiles[idx].timestamps)
        else {
            continue;
        };
        tracing::info!(
            column = %column.name,
            rows = datetimes.len(),
            "Computing temporal ranges"
        );
        let ranges = get_temporal_ranges(timestamps);
        if ranges.is_empty() {
            continue;
        }
        coverage.push(TemporalCoverage {
            kind: "datetime".to_owned(),
            column_names: vec![column.name.clone()],
            column_indexes: vec![idx],
            column_types: vec![SemanticType::DateTime],
            ranges,
            temporal_resolution: get_temporal_resolution(datetimes),
        });
    }
    coverage
}

/// Draw up to [`SAMPLE_ROWS`] random rows (seeded, in order) and serialize
/// them as CRLF CSV with long cells truncated.
fn build_sample(frame: &Frame) -> Result<String, ProfileError> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(RANDOM_SEED);
    let count = SAMPLE_ROWS.min(frame.nb_rows());
    let mut chosen = rand::seq::index::sample(&mut rng, frame.nb_rows(), count).into_vec();
    chosen.sort_unstable();

    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::CRLF)
        .from_writer(Vec::new());
    writer.write_record(&frame.column_names)?;
    for row_idx in chosen {
        let row: Vec<String> = frame
            .row(row_idx)
            .into_iter()
            .map(|cell| truncate_string(cell, SAMPLE_CELL_LIMIT))
            .collect();
        writer.write_record(&row)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| ProfileError::MalformedInput(e.to_string()))?;
    String::from_utf8(bytes)
        .map_err(|e| ProfileError::MalformedInput(format!("sample is not UTF-8: {e}")))
}
