//! Address resolution through a Nominatim-compatible geocoder.
//!
//! Values are deduplicated and submitted in batches; 500s on large batches
//! are assumed to be one bad query and the batch is halved recursively,
//! gateway errors are retried with a fixed backoff, and the number of
//! unique lookups per column is capped so one huge free-text column cannot
//! stall profiling.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde_json::Value;

use super::LatLong;
use crate::config::ProfilerConfig;
use crate::error::GeocoderError;
use crate::metrics;

/// Addresses longer than this are never submitted.
pub const MAX_ADDRESS_LENGTH: usize = 90;

/// Cap on unique lookups per column.
pub const MAX_GEOCODER_REQUESTS: usize = 200;

/// Number of unique values per batch request.
pub const BATCH_SIZE: usize = 30;

/// Batches at least this large are halved on a 500 instead of failing.
pub const MIN_SPLIT_BATCH_SIZE: usize = 6;

/// Attempts per request; 502/503/504 responses are retried with a 1s pause.
const GATEWAY_RETRIES: usize = 5;

/// Resolves free-text values to geographic points.
///
/// One implementation talks to a real Nominatim server; tests substitute a
/// table-backed fake.
pub trait Geocoder: Send + Sync {
    /// Resolve a batch of queries, one result per query, in order.
    fn geocode_batch(&self, queries: &[&str]) -> Result<Vec<Option<LatLong>>, GeocoderError>;
}

/// HTTP client for a Nominatim-compatible `/search` endpoint.
pub struct NominatimClient {
    http: reqwest::blocking::Client,
    url: String,
}

impl NominatimClient {
    pub fn new(url: &str) -> Result<Self, GeocoderError> {
        let http = reqwest::blocking::Client::builder()
            .user_agent(ProfilerConfig::user_agent())
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            url: url.trim_end_matches('/').to_owned(),
        })
    }

    /// Issue one `/search` request, retrying gateway errors.
    fn search(&self, params: &[(&str, String)]) -> Result<Value, GeocoderError> {
        let mut response = None;
        for attempt in 0..GATEWAY_RETRIES {
            if attempt > 0 {
                std::thread::sleep(Duration::from_secs(1));
            }
            metrics::GEOCODER_REQUESTS.inc(); // count all requests
            let start = Instant::now();
            let res = self
                .http
                .get(format!("{}/search", self.url))
                .query(params)
                .send()?;
            let elapsed = start.elapsed();
            if matches!(res.status().as_u16(), 502 | 503 | 504) {
                response = Some(res);
                continue;
            }
            // Record time for successful request
            metrics::GEOCODER_REQUEST_SECONDS.observe(elapsed.as_secs_f64());
            response = Some(res);
            break;
        }
        #[allow(clippy::unwrap_used)] // GATEWAY_RETRIES > 0, the loop always stores a response
        let res = response.unwrap();

        let status = res.status();
        if !status.is_success() {
            return Err(GeocoderError::Status(status));
        }
        let content_type = res
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        if !content_type
            .as_deref()
            .is_some_and(|ct| ct.starts_with("application/json"))
        {
            return Err(GeocoderError::NotJson(content_type));
        }
        Ok(res.json()?)
    }

    /// Resolve a single free-form query.
    pub fn geocode(&self, query: &str) -> Result<Option<LatLong>, GeocoderError> {
        let body = self.search(&[("q", query.to_owned()), ("format", "jsonv2".to_owned())])?;
        let places = body
            .as_array()
            .ok_or_else(|| GeocoderError::BadResponse("expected a JSON array".to_owned()))?;
        Ok(places.first().and_then(parse_place))
    }
}

impl Geocoder for NominatimClient {
    fn geocode_batch(&self, queries: &[&str]) -> Result<Vec<Option<LatLong>>, GeocoderError> {
        let batch: Vec<Value> = queries
            .iter()
            .map(|q| serde_json::json!({ "q": q }))
            .collect();
        let batch_param = serde_json::to_string(&batch)
            .map_err(|e| GeocoderError::BadResponse(e.to_string()))?;
        let body = self.search(&[("batch", batch_param), ("format", "jsonv2".to_owned())])?;
        let results = body
            .get("batch")
            .and_then(Value::as_array)
            .ok_or_else(|| GeocoderError::BadResponse("missing 'batch' field".to_owned()))?;
        if results.len() != queries.len() {
            return Err(GeocoderError::BadResponse(format!(
                "{} results for {} queries",
                results.len(),
                queries.len()
            )));
        }
        Ok(results
            .iter()
            .map(|places| {
                places
                    .as_array()
                    .and_then(|p| p.first())
                    .and_then(parse_place)
            })
            .collect())
    }
}

/// Pull `(lat, lon)` out of one place object; Nominatim sends them as
/// strings.
fn parse_place(place: &Value) -> Option<LatLong> {
    let coord = |key: &str| -> Option<f64> {
        match place.get(key)? {
            Value::String(s) => s.parse().ok(),
            v => v.as_f64(),
        }
    };
    Some([coord("lat")?, coord("lon")?])
}

/// Submit one batch, halving it recursively on a 500.
///
/// Appends resolved points to `locations` (weighted by occurrence count),
/// records every value in `cache`, and returns the number of occurrences
/// that could not be resolved.
fn resolve_batch(
    geocoder: &dyn Geocoder,
    batch: &[(String, usize)],
    locations: &mut Vec<LatLong>,
    cache: &mut HashMap<String, Option<LatLong>>,
) -> Result<usize, GeocoderError> {
    let queries: Vec<&str> = batch.iter().map(|(value, _)| value.as_str()).collect();
    let results = match geocoder.geocode_batch(&queries) {
        Ok(results) => results,
        Err(GeocoderError::Status(status))
            if status.as_u16() == 500 && batch.len() >= MIN_SPLIT_BATCH_SIZE.max(2) =>
        {
            // Try smaller batch size
            let mid = batch.len() / 2;
            return Ok(resolve_batch(geocoder, &batch[..mid], locations, cache)?
                + resolve_batch(geocoder, &batch[mid..], locations, cache)?);
        }
        Err(e) => return Err(e),
    };

    let mut not_found = 0;
    for (result, (value, count)) in results.into_iter().zip(batch.iter()) {
        cache.insert(value.clone(), result);
        match result {
            Some(loc) => locations.extend(std::iter::repeat(loc).take(*count)),
            None => not_found += count,
        }
    }
    Ok(not_found)
}

/// Resolve a whole column of values.
///
/// Returns the resolved points (one per resolvable occurrence) and the
/// number of non-empty cells, so the caller can judge whether the column
/// really holds addresses.
pub fn resolve_all(
    geocoder: &dyn Geocoder,
    cells: &[String],
    max_requests: usize,
) -> Result<(Vec<LatLong>, usize), GeocoderError> {
    let mut cache: HashMap<String, Option<LatLong>> = HashMap::new();
    let mut locations = Vec::new();
    let mut not_found = 0usize;
    let mut non_empty = 0usize;
    let mut batch: Vec<(String, usize)> = Vec::with_capacity(BATCH_SIZE);
    let start = Instant::now();

    for cell in cells {
        let value = cell.trim();
        if value.is_empty() {
            continue;
        }
        non_empty += 1;

        if value.len() > MAX_ADDRESS_LENGTH {
            continue;
        }
        if let Some(cached) = cache.get(value) {
            if let Some(loc) = cached {
                locations.push(*loc);
            }
        } else if let Some(entry) = batch.iter_mut().find(|(v, _)| v == value) {
            entry.1 += 1;
        } else {
            batch.push((value.to_owned(), 1));
            if batch.len() == BATCH_SIZE {
                not_found += resolve_batch(geocoder, &batch, &mut locations, &mut cache)?;
                batch.clear();
                if cache.len() >= max_requests {
                    break;
                }
            }
        }
    }

    if !batch.is_empty() && cache.len() < max_requests {
        not_found += resolve_batch(geocoder, &batch, &mut locations, &mut cache)?;
    }

    tracing::info!(
        queries = cache.len(),
        elapsed = ?start.elapsed(),
        hits = cache.len() - cache.values().filter(|v| v.is_none()).count(),
        found = locations.len(),
        not_found,
        "Geocoder resolution done"
    );
    Ok((locations, non_empty))
}
