//! Plot selection and recommendation.
//!
//! Each column gets at most one plot, chosen by its detected types; the
//! dataset gets up to four recommended plots (line over time, bar over
//! category) built from the typed schema and the sample rows.

use std::collections::HashMap;
use std::sync::LazyLock;

use rand::seq::SliceRandom;
use rand::SeedableRng;
use regex::Regex;
use serde_json::json;

use crate::config::RANDOM_SEED;
use crate::numerical::histogram;
use crate::types::{
    determine_dataset_type, CategoricalBin, DatasetMetadata, DatasetType, Plot,
    PlotRecommendation, SemanticType, TemporalBin,
};

/// Bins in every histogram plot.
const HISTOGRAM_BINS: usize = 10;

/// Bars in categorical and text histograms.
const TOP_VALUES: usize = 5;

/// Maximum number of recommended plots per dataset.
const MAX_RECOMMENDATIONS: usize = 4;

static RE_WORD_SPLIT: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)] // literal pattern
    Regex::new(r"\W+").unwrap()
});

/// Histogram over a numerical column.
pub fn numerical_plot(values: &[f64]) -> Plot {
    Plot::HistogramNumerical {
        data: histogram(values, HISTOGRAM_BINS),
    }
}

fn format_timestamp(ts: f64) -> String {
    chrono::DateTime::from_timestamp(ts as i64, 0)
        .map(|dt| dt.naive_utc().format("%Y-%m-%dT%H:%M:%S").to_string())
        .unwrap_or_default()
}

/// Histogram over a datetime column's timestamps, with ISO bounds.
pub fn temporal_plot(timestamps: &[f64]) -> Plot {
    let data = histogram(timestamps, HISTOGRAM_BINS)
        .into_iter()
        .map(|bin| TemporalBin {
            count: bin.count,
            date_start: format_timestamp(bin.bin_start),
            date_end: format_timestamp(bin.bin_end),
        })
        .collect();
    Plot::HistogramTemporal { data }
}

fn top_bins(counter: HashMap<String, usize>) -> Vec<CategoricalBin> {
    let mut entries: Vec<(String, usize)> = counter.into_iter().collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    entries.truncate(TOP_VALUES);
    entries
        .into_iter()
        .map(|(bin, count)| CategoricalBin { bin, count })
        .collect()
}

/// Histogram over the most common values of a categorical column,
/// presented in value order.
pub fn categorical_plot(cells: &[String]) -> Plot {
    let mut counter: HashMap<String, usize> = HashMap::new();
    for cell in cells {
        if cell.is_empty() {
            continue;
        }
        *counter.entry(cell.clone()).or_default() += 1;
    }
    let mut data = top_bins(counter);
    data.sort_by(|a, b| a.bin.cmp(&b.bin));
    Plot::HistogramCategorical { data }
}

/// Histogram over the most common words of a text column.
pub fn text_plot(cells: &[String]) -> Plot {
    let mut counter: HashMap<String, usize> = HashMap::new();
    for cell in cells {
        for word in RE_WORD_SPLIT.split(cell) {
            let word = word.to_lowercase();
            if !word.is_empty() {
                *counter.entry(word).or_default() += 1;
            }
        }
    }
    Plot::HistogramText {
        data: top_bins(counter),
    }
}

fn cell_to_json(cell: &str) -> serde_json::Value {
    if let Ok(i) = cell.parse::<i64>() {
        return json!(i);
    }
    if let Ok(f) = cell.parse::<f64>() {
        if f.is_finite() {
            return json!(f);
        }
    }
    json!(cell)
}

/// Parse the sample CSV back into named columns.
fn sample_columns(sample: &str) -> Option<HashMap<String, Vec<String>>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(sample.as_bytes());
    let headers: Vec<String> = reader.headers().ok()?.iter().map(str::to_owned).collect();
    let mut columns: HashMap<String, Vec<String>> =
        headers.iter().map(|h| (h.clone(), Vec::new())).collect();
    for record in reader.records() {
        let record = record.ok()?;
        for (header, cell) in headers.iter().zip(record.iter()) {
            if let Some(column) = columns.get_mut(header) {
                column.push(cell.to_owned());
            }
        }
    }
    Some(columns)
}

fn inline_values(
    sample: &HashMap<String, Vec<String>>,
    x_name: &str,
    y_name: &str,
) -> serde_json::Value {
    let empty = Vec::new();
    let xs = sample.get(x_name).unwrap_or(&empty);
    let ys = sample.get(y_name).unwrap_or(&empty);
    let values: Vec<serde_json::Value> = xs
        .iter()
        .zip(ys.iter())
        .map(|(x, y)| json!({ x_name: cell_to_json(x), y_name: cell_to_json(y) }))
        .collect();
    json!({ "values": values })
}

/// Recommend up to four plots from the typed schema and the sample rows.
///
/// Numerical columns are ranked by coefficient of variation; each gets a
/// line plot against a temporal column and/or a bar plot against a
/// spatial-admin or categorical column. Column choice uses the seeded PRNG
/// so the result is reproducible.
pub fn recommend_plots(metadata: &DatasetMetadata) -> Vec<PlotRecommendation> {
    let Some(sample) = metadata.sample.as_deref().and_then(sample_columns) else {
        return Vec::new();
    };

    let mut numerical: Vec<(String, f64)> = Vec::new();
    let mut categorical: Vec<String> = Vec::new();
    let mut spatial_admin: Vec<String> = Vec::new();
    let mut temporal: Vec<String> = Vec::new();

    for col in &metadata.columns {
        match determine_dataset_type(col.structural_type, &col.semantic_types) {
            Some(DatasetType::Numerical) => {
                if col.semantic_types.contains(&SemanticType::Id) {
                    continue;
                }
                if let (Some(mean), Some(stddev)) = (col.mean, col.stddev) {
                    if mean != 0.0 {
                        numerical.push((col.name.clone(), (stddev / mean).abs()));
                    }
                }
            }
            Some(DatasetType::Spatial) => {
                if col.semantic_types.contains(&SemanticType::Admin) {
                    spatial_admin.push(col.name.clone());
                }
            }
            Some(DatasetType::Temporal) => temporal.push(col.name.clone()),
            Some(DatasetType::Categorical) => categorical.push(col.name.clone()),
            None => {}
        }
    }
    numerical.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let mut rng = rand::rngs::StdRng::seed_from_u64(RANDOM_SEED);
    let mut recommendations = Vec::new();
    for (numerical_name, _) in &numerical {
        if let Some(temporal_name) = temporal.choose(&mut rng) {
            recommendations.push(PlotRecommendation {
                numerical_column: numerical_name.clone(),
                temporal_column: Some(temporal_name.clone()),
                categorical_column: None,
                generated_question: format!(
                    "How does {numerical_name} change over {temporal_name} ?"
                ),
                data: inline_values(&sample, temporal_name, numerical_name),
                spec: json!({
                    "mark": "line",
                    "encoding": {
                        "x": { "field": temporal_name, "type": "temporal" },
                        "y": { "field": numerical_name, "type": "quantitative" },
                    },
                    "data": { "name": "values" },
                }),
            });
        }

        let category = if spatial_admin.is_empty() {
            categorical.choose(&mut rng)
        } else {
            spatial_admin.choose(&mut rng)
        };
        if let Some(categorical_name) = category {
            recommendations.push(PlotRecommendation {
                numerical_column: numerical_name.clone(),
                temporal_column: None,
                categorical_column: Some(categorical_name.clone()),
                generated_question: format!(
                    "What is the distribution of {numerical_name} over {categorical_name} ?"
                ),
                data: inline_values(&sample, categorical_name, numerical_name),
                spec: json!({
                    "mark": "bar",
                    "encoding": {
                        "x": { "field": categorical_name, "type": "nominal" },
                        "y": {
                            "field": numerical_name,
                            "type": "quantitative",
                            "aggregate": "sum",
                        },
                    },
                    "data": { "name": "values" },
                }),
            });
        }

        if recommendations.len() >= MAX_RECOMMENDATIONS {
            break;
        }
    }
    recommendations.truncate(MAX_RECOMMENDATIONS);
    recommendations
}
