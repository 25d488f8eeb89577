//! Numerical column analysis: mean/stddev, equal-width histograms, and
//! clustered value ranges.

pub mod kmeans;

use statrs::statistics::Statistics;

use crate::types::{NumericalBin, NumericalRange};

/// Values at or beyond this magnitude overflow the downstream index and are
/// dropped before any statistics.
pub const MAX_INDEXABLE_MAGNITUDE: f64 = 3.4e38;

/// A cluster must hold at least this share of the values to become a range.
pub const MIN_RANGE_SIZE: f64 = 0.10;

/// Parse the finite, indexable numerical values out of a column of cells.
pub fn collect_numerical_values(cells: &[String]) -> Vec<f64> {
    cells
        .iter()
        .filter_map(|cell| cell.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite() && v.abs() < MAX_INDEXABLE_MAGNITUDE)
        .collect()
}

/// Mean and sample standard deviation. `None` when there are no values.
pub fn mean_stddev(values: &[f64]) -> Option<(f64, f64)> {
    match values.len() {
        0 => None,
        1 => Some((values[0], 0.0)),
        _ => Some((values.mean(), values.std_dev())),
    }
}

/// Equal-width histogram with `bins` buckets.
///
/// The last bucket is closed on both ends. A degenerate value range
/// (min == max) is widened by ±0.5 so every bucket has width.
pub fn histogram(values: &[f64], bins: usize) -> Vec<NumericalBin> {
    if values.is_empty() || bins == 0 {
        return Vec::new();
    }
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for &v in values {
        min = min.min(v);
        max = max.max(v);
    }
    if min == max {
        min -= 0.5;
        max += 0.5;
    }
    let width = (max - min) / bins as f64;

    let mut counts = vec![0usize; bins];
    for &v in values {
        let mut bin = ((v - min) / width) as usize;
        if bin >= bins {
            bin = bins - 1;
        }
        counts[bin] += 1;
    }

    counts
        .into_iter()
        .enumerate()
        .map(|(i, count)| NumericalBin {
            count,
            bin_start: min + width * i as f64,
            bin_end: min + width * (i + 1) as f64,
        })
        .collect()
}

/// Compute up to 3 value ranges by clustering the 1-D values.
///
/// Clusters below the 10% size floor are dropped, surviving clusters are
/// trimmed to their 5th/95th percentile values, overlapping ranges merge,
/// and the result is sorted ascending.
pub fn get_numerical_ranges(values: &[f64]) -> Vec<NumericalRange> {
    if values.is_empty() {
        return Vec::new();
    }

    let points: Vec<[f64; 1]> = values.iter().map(|&v| [v]).collect();
    let k = kmeans::cluster_count(values.len());
    let labels = kmeans::cluster(&points, k);

    let mut ranges: Vec<(f64, f64)> = Vec::new();
    for cluster_id in 0..k {
        let mut cluster: Vec<f64> = values
            .iter()
            .zip(labels.iter())
            .filter(|&(_, &label)| label == cluster_id)
            .map(|(&v, _)| v)
            .collect();
        if cluster.is_empty() {
            continue;
        }
        // Eliminate clusters of outliers
        if (cluster.len() as f64) < MIN_RANGE_SIZE * values.len() as f64 {
            continue;
        }
        cluster.sort_by(f64::total_cmp);
        let min_idx = (0.05 * cluster.len() as f64) as usize;
        let max_idx = (0.95 * cluster.len() as f64) as usize;
        ranges.push((cluster[min_idx], cluster[max_idx]));
    }
    ranges.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1)));

    // Merge overlapping ranges
    let mut merged: Vec<(f64, f64)> = Vec::with_capacity(ranges.len());
    for (gte, lte) in ranges {
        match merged.last_mut() {
            Some(last) if last.1 >= gte => last.1 = last.1.max(lte),
            _ => merged.push((gte, lte)),
        }
    }

    merged
        .into_iter()
        .map(|(gte, lte)| NumericalRange::new(gte, lte))
        .collect()
}
