//! Spatial column analysis: lat/long column pairing, WKT point parsing,
//! clustered bounding boxes, admin-area aggregation, and point-set
//! diagnostics.

pub mod geohash;
pub mod nominatim;

use std::sync::LazyLock;

use rand::seq::SliceRandom;
use rand::SeedableRng;
use regex::Regex;

use crate::config::RANDOM_SEED;
use crate::geo::{AdminArea, Bounds};
use crate::numerical::kmeans;
use crate::numerical::MIN_RANGE_SIZE;
use crate::types::{Envelope, SpatialRange};

/// A geographic point as `[latitude, longitude]`.
pub type LatLong = [f64; 2];

/// Inflation applied to degenerate (line/point) envelopes so downstream
/// spatial indexes can tessellate them.
const SPATIAL_RANGE_DELTA_LONG: f64 = 0.0001;
const SPATIAL_RANGE_DELTA_LAT: f64 = 0.0001;

/// Minimum extent, per axis, for an admin-area envelope to be emitted.
const ADMIN_RANGE_MIN_EXTENT: f64 = 0.01;

/// Name tokens marking a latitude column.
pub const LATITUDE_NAMES: &[&str] = &["latitude", "lat", "ycoord", "y_coord"];

/// Name tokens marking a longitude column.
pub const LONGITUDE_NAMES: &[&str] = &["longitude", "long", "lon", "lng", "xcoord", "x_coord"];

/// Compute the spatial ranges (bounding boxes) of a point set.
///
/// Clusters the points, drops clusters below the 10% floor, trims each
/// surviving cluster to per-axis 5th/95th percentiles, inflates degenerate
/// envelopes, and returns at most 3 ranges sorted by position.
pub fn get_spatial_ranges(points: &[LatLong]) -> Vec<SpatialRange> {
    if points.is_empty() {
        return Vec::new();
    }

    let k = kmeans::cluster_count(points.len());
    let labels = kmeans::cluster(points, k);

    let mut ranges: Vec<(f64, f64, f64, f64)> = Vec::new();
    for cluster_id in 0..k {
        let mut cluster: Vec<LatLong> = points
            .iter()
            .zip(labels.iter())
            .filter(|&(_, &label)| label == cluster_id)
            .map(|(&p, _)| p)
            .collect();
        if cluster.is_empty() {
            continue;
        }
        // Eliminate clusters of outliers
        if (cluster.len() as f64) < MIN_RANGE_SIZE * points.len() as f64 {
            continue;
        }
        let min_idx = (0.05 * cluster.len() as f64) as usize;
        let max_idx = (0.95 * cluster.len() as f64) as usize;
        cluster.sort_by(|a, b| a[0].total_cmp(&b[0]));
        let min_lat = cluster[min_idx][0];
        let max_lat = cluster[max_idx][0];
        cluster.sort_by(|a, b| a[1].total_cmp(&b[1]));
        let min_lon = cluster[min_idx][1];
        let max_lon = cluster[max_idx][1];
        ranges.push((min_lon, max_lat, max_lon, min_lat));
    }
    ranges.sort_by(|a, b| {
        a.0.total_cmp(&b.0)
            .then(a.1.total_cmp(&b.1))
            .then(a.2.total_cmp(&b.2))
            .then(a.3.total_cmp(&b.3))
    });

    // Spatial indexes need shapes with an area (no point or line)
    ranges
        .into_iter()
        .map(|(mut min_lon, mut max_lat, mut max_lon, mut min_lat)| {
            if min_lon == max_lon {
                min_lon -= SPATIAL_RANGE_DELTA_LONG;
                max_lon += SPATIAL_RANGE_DELTA_LONG;
            }
            if max_lat == min_lat {
                max_lat += SPATIAL_RANGE_DELTA_LAT;
                min_lat -= SPATIAL_RANGE_DELTA_LAT;
            }
            SpatialRange {
                range: Envelope::new(min_lon, max_lat, max_lon, min_lat),
            }
        })
        .collect()
}

/// Strip the first matching lat/long token from a column name.
pub fn normalize_latlong_column_name(name: &str, substrings: &[&str]) -> String {
    let name = name.trim().to_lowercase();
    for substr in substrings {
        if let Some(idx) = name.find(substr) {
            let mut stripped = String::with_capacity(name.len() - substr.len());
            stripped.push_str(&name[..idx]);
            stripped.push_str(&name[idx + substr.len()..]);
            return stripped;
        }
    }
    name
}

/// A column tagged latitude or longitude, candidate for pairing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatLongColumn {
    pub index: usize,
    pub name: String,
    /// Caller-supplied pairing tag; columns sharing a tag pair directly.
    pub annot_pair: Option<String>,
}

/// Pair latitude and longitude columns.
///
/// Explicitly annotated pairs match first; the rest match when their names
/// are equal after stripping the lat/long token. Returns the pairs plus the
/// names of unmatched columns on either side, which must lose their
/// semantic type.
pub fn pair_latlong_columns(
    columns_lat: &[LatLongColumn],
    columns_long: &[LatLongColumn],
) -> (Vec<(LatLongColumn, LatLongColumn)>, (Vec<String>, Vec<String>)) {
    let mut pairs = Vec::new();
    let mut remaining_lat: Vec<&LatLongColumn> = columns_lat.iter().collect();
    let mut missed_long = Vec::new();

    for col_long in columns_long {
        // Annotation pairing takes precedence over name matching
        let pos = if let Some(tag) = &col_long.annot_pair {
            remaining_lat
                .iter()
                .position(|c| c.annot_pair.as_deref() == Some(tag.as_str()))
        } else {
            let norm = normalize_latlong_column_name(&col_long.name, LONGITUDE_NAMES);
            remaining_lat.iter().position(|c| {
                c.annot_pair.is_none()
                    && normalize_latlong_column_name(&c.name, LATITUDE_NAMES) == norm
            })
        };
        match pos {
            Some(pos) => pairs.push((remaining_lat.remove(pos).clone(), col_long.clone())),
            None => missed_long.push(col_long.name.clone()),
        }
    }

    let missed_lat = remaining_lat.into_iter().map(|c| c.name.clone()).collect();
    (pairs, (missed_lat, missed_long))
}

/// WKT-style point literal: two decimal numbers with 1-15 fractional
/// digits, separated by a space, a comma, or both, inside parentheses.
static RE_POINT: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)] // literal pattern
    Regex::new(
        r"\((-?[0-9]{1,3}\.[0-9]{1,15})(?:,| |(?:, ))(-?[0-9]{1,3}\.[0-9]{1,15})\)$",
    )
    .unwrap()
});

/// Parse one point literal into `[lat, long]`.
///
/// The default reading is `(long lat)` (the WKT order); `latlong` flips it.
/// Values outside the valid geographic range are dropped.
pub fn parse_point(value: &str, latlong: bool) -> Option<LatLong> {
    let caps = RE_POINT.captures(value.trim())?;
    let first: f64 = caps.get(1)?.as_str().parse().ok()?;
    let second: f64 = caps.get(2)?.as_str().parse().ok()?;
    let (lat, lon) = if latlong {
        (first, second)
    } else {
        (second, first)
    };
    if -90.0 < lat && lat < 90.0 && -180.0 < lon && lon < 180.0 {
        Some([lat, lon])
    } else {
        None
    }
}

/// Parse a column of point literals, dropping cells that fail validation.
pub fn parse_wkt_column(cells: &[String], latlong: bool) -> Vec<LatLong> {
    cells
        .iter()
        .filter_map(|cell| parse_point(cell, latlong))
        .collect()
}

/// Union the pre-known bounds of resolved admin areas.
///
/// Emits an envelope only when the union's extent exceeds 0.01 degrees in
/// both axes; point-like aggregates (a single small town, say) are
/// suppressed.
pub fn merge_admin_area_ranges(areas: &[Option<AdminArea>]) -> Option<SpatialRange> {
    let mut merged: Option<Bounds> = None;
    for area in areas.iter().flatten() {
        let Some(new) = area.bounds else { continue };
        merged = Some(match merged {
            None => new,
            Some(prev) => Bounds {
                min_lon: prev.min_lon.min(new.min_lon),
                max_lon: prev.max_lon.max(new.max_lon),
                min_lat: prev.min_lat.min(new.min_lat),
                max_lat: prev.max_lat.max(new.max_lat),
            },
        });
    }
    let merged = merged?;
    if merged.max_lon - merged.min_lon > ADMIN_RANGE_MIN_EXTENT
        && merged.max_lat - merged.min_lat > ADMIN_RANGE_MIN_EXTENT
    {
        Some(SpatialRange {
            range: Envelope::new(
                merged.min_lon,
                merged.max_lat,
                merged.max_lon,
                merged.min_lat,
            ),
        })
    } else {
        None
    }
}

/// Median over sampled points of the distance to their closest neighbor.
///
/// This gives an idea of the "grid size" of a point dataset. Returns `None`
/// for fewer than two distinct points.
pub fn median_smallest_distance(points: &[LatLong]) -> Option<f64> {
    let mut distinct: Vec<LatLong> = points.to_vec();
    distinct.sort_by(|a, b| a[0].total_cmp(&b[0]).then(a[1].total_cmp(&b[1])));
    distinct.dedup();
    if distinct.len() < 2 {
        return None;
    }

    let mut rng = rand::rngs::StdRng::seed_from_u64(RANDOM_SEED);
    let sample_size = distinct.len().min(100);
    let sample: Vec<LatLong> = distinct
        .choose_multiple(&mut rng, sample_size)
        .copied()
        .collect();

    let mut nearest: Vec<f64> = sample
        .iter()
        .map(|p| {
            distinct
                .iter()
                .filter(|&q| q != p)
                .map(|q| ((p[0] - q[0]).powi(2) + (p[1] - q[1]).powi(2)).sqrt())
                .fold(f64::INFINITY, f64::min)
        })
        .collect();
    nearest.sort_by(f64::total_cmp);

    let mid = nearest.len() / 2;
    if nearest.len() % 2 == 1 {
        Some(nearest[mid])
    } else {
        Some((nearest[mid - 1] + nearest[mid]) / 2.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(index: usize, name: &str) -> LatLongColumn {
        LatLongColumn {
            index,
            name: name.to_owned(),
            annot_pair: None,
        }
    }

    #[test]
    fn test_three_points_make_one_enclosing_envelope() {
        let points = vec![[40.7, -74.0], [40.8, -73.9], [40.75, -73.95]];
        let ranges = get_spatial_ranges(&points);
        assert_eq!(ranges.len(), 1);
        let envelope = &ranges[0].range;
        assert!(envelope.min_lon() <= -74.0 && envelope.max_lon() >= -73.9);
        assert!(envelope.min_lat() <= 40.7 && envelope.max_lat() >= 40.8);
    }

    #[test]
    fn test_envelopes_are_valid_and_non_degenerate() {
        let points = vec![[10.0, 20.0]; 5]; // identical points
        let ranges = get_spatial_ranges(&points);
        assert_eq!(ranges.len(), 1);
        let envelope = &ranges[0].range;
        assert!(envelope.min_lon() < envelope.max_lon());
        assert!(envelope.min_lat() < envelope.max_lat());
    }

    #[test]
    fn test_two_cities_two_envelopes() {
        let mut points: Vec<LatLong> = Vec::new();
        for i in 0..50 {
            points.push([40.7 + f64::from(i) * 0.001, -74.0 + f64::from(i) * 0.001]);
            points.push([34.0 + f64::from(i) * 0.001, -118.2 + f64::from(i) * 0.001]);
        }
        let ranges = get_spatial_ranges(&points);
        assert!(ranges.len() >= 2, "got {ranges:?}");
        // Sorted by min_lon: Los Angeles before New York
        assert!(ranges[0].range.min_lon() < ranges[1].range.min_lon());
    }

    #[test]
    fn test_normalize_strips_token() {
        assert_eq!(
            normalize_latlong_column_name("pickup_latitude", LATITUDE_NAMES),
            "pickup_"
        );
        assert_eq!(
            normalize_latlong_column_name("Pickup_Longitude", LONGITUDE_NAMES),
            "pickup_"
        );
        assert_eq!(normalize_latlong_column_name("lat", LATITUDE_NAMES), "");
    }

    #[test]
    fn test_pairing_by_name() {
        let lats = vec![col(0, "pickup_lat"), col(2, "dropoff_lat")];
        let longs = vec![col(1, "pickup_long"), col(3, "dropoff_long")];
        let (pairs, (missed_lat, missed_long)) = pair_latlong_columns(&lats, &longs);
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].0.index, 0);
        assert_eq!(pairs[0].1.index, 1);
        assert!(missed_lat.is_empty());
        assert!(missed_long.is_empty());
    }

    #[test]
    fn test_pairing_reports_unmatched() {
        let lats = vec![col(0, "lat"), col(1, "other_lat")];
        let longs = vec![col(2, "long")];
        let (pairs, (missed_lat, missed_long)) = pair_latlong_columns(&lats, &longs);
        assert_eq!(pairs.len(), 1);
        assert_eq!(missed_lat, vec!["other_lat".to_owned()]);
        assert!(missed_long.is_empty());
    }

    #[test]
    fn test_pairing_by_annotation() {
        let mut lat = col(0, "a");
        lat.annot_pair = Some("p1".to_owned());
        let mut long = col(1, "b");
        long.annot_pair = Some("p1".to_owned());
        let (pairs, _) = pair_latlong_columns(&[lat], &[long]);
        assert_eq!(pairs.len(), 1);
    }

    #[test]
    fn test_parse_point_wkt_order() {
        // WKT order: (long lat)
        let p = parse_point("POINT (-73.9 40.7)", false).unwrap();
        assert_eq!(p, [40.7, -73.9]);
        // latlong order flips it
        let p = parse_point("(40.7, -73.9)", true).unwrap();
        assert_eq!(p, [40.7, -73.9]);
    }

    #[test]
    fn test_parse_point_rejects_out_of_range() {
        assert!(parse_point("(200.0 40.7)", false).is_none());
        assert!(parse_point("(-73.9 95.0)", false).is_none());
        assert!(parse_point("not a point", false).is_none());
        // integer coordinates lack the mandatory fractional part
        assert!(parse_point("(12 34)", false).is_none());
    }

    #[test]
    fn test_merge_admin_bounds() {
        let area = |min_lon: f64, max_lon: f64, min_lat: f64, max_lat: f64| AdminArea {
            id: "Q".to_owned(),
            name: "x".to_owned(),
            level: 1,
            parent: None,
            bounds: Some(crate::geo::Bounds {
                min_lon,
                max_lon,
                min_lat,
                max_lat,
            }),
        };
        let merged = merge_admin_area_ranges(&[
            Some(area(0.0, 1.0, 0.0, 1.0)),
            Some(area(2.0, 3.0, 2.0, 3.0)),
            None,
        ])
        .unwrap();
        assert_eq!(merged.range.min_lon(), 0.0);
        assert_eq!(merged.range.max_lon(), 3.0);
        assert_eq!(merged.range.min_lat(), 0.0);
        assert_eq!(merged.range.max_lat(), 3.0);
    }

    #[test]
    fn test_point_like_admin_aggregate_suppressed() {
        let tiny = AdminArea {
            id: "Q".to_owned(),
            name: "x".to_owned(),
            level: 2,
            parent: None,
            bounds: Some(crate::geo::Bounds {
                min_lon: 10.0,
                max_lon: 10.005,
                min_lat: 20.0,
                max_lat: 20.005,
            }),
        };
        assert!(merge_admin_area_ranges(&[Some(tiny)]).is_none());
    }

    #[test]
    fn test_median_smallest_distance_grid() {
        // 1-degree grid: nearest neighbor is always 1.0 away
        let mut points = Vec::new();
        for i in 0..5 {
            for j in 0..5 {
                points.push([f64::from(i), f64::from(j)]);
            }
        }
        let median = median_smallest_distance(&points).unwrap();
        assert!((median - 1.0).abs() < 1e-9);
    }
}
