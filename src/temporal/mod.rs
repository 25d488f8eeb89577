//! Temporal column analysis: timestamp conversion, clustered timestamp
//! ranges, and resolution inference.

use chrono::{DateTime, Datelike, Timelike, Utc};

use crate::numerical::get_numerical_ranges;
use crate::types::{NumericalRange, TemporalResolution};

/// Share of values that must align to a granularity for it to be chosen.
const RESOLUTION_THRESHOLD: f64 = 0.90;

/// Unix timestamps (seconds, UTC) for the parsed datetimes.
pub fn to_timestamps(datetimes: &[DateTime<Utc>]) -> Vec<f64> {
    datetimes.iter().map(|dt| dt.timestamp() as f64).collect()
}

/// Clustered ranges over the timestamps, same procedure as numerical data.
pub fn get_temporal_ranges(timestamps: &[f64]) -> Vec<NumericalRange> {
    get_numerical_ranges(timestamps)
}

fn aligned(dt: &DateTime<Utc>, resolution: TemporalResolution) -> bool {
    let time_is_zero = dt.hour() == 0 && dt.minute() == 0 && dt.second() == 0;
    match resolution {
        TemporalResolution::Year => dt.month() == 1 && dt.day() == 1 && time_is_zero,
        TemporalResolution::Month => dt.day() == 1 && time_is_zero,
        TemporalResolution::Day => time_is_zero,
        TemporalResolution::Hour => dt.minute() == 0 && dt.second() == 0,
        TemporalResolution::Minute => dt.second() == 0,
        TemporalResolution::Second => true,
    }
}

/// Infer the resolution of a datetime column.
///
/// Walks from coarse to fine and picks the first granularity that at least
/// 90% of the values align to exactly; a column of arbitrary instants ends
/// up at `second`.
pub fn get_temporal_resolution(datetimes: &[DateTime<Utc>]) -> TemporalResolution {
    if datetimes.is_empty() {
        return TemporalResolution::Second;
    }
    let total = datetimes.len() as f64;
    for resolution in [
        TemporalResolution::Year,
        TemporalResolution::Month,
        TemporalResolution::Day,
        TemporalResolution::Hour,
        TemporalResolution::Minute,
    ] {
        let hits = datetimes.iter().filter(|dt| aligned(dt, resolution)).count();
        if hits as f64 / total >= RESOLUTION_THRESHOLD {
            return resolution;
        }
    }
    TemporalResolution::Second
}
