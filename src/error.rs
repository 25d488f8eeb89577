//! Error taxonomy for the profiling pipeline.
//!
//! Errors in a single column's optional analysis (geocoding, sketching) are
//! logged and swallowed by the orchestrator; errors in loading, typing, or
//! the caller contract abort the whole call. The profiler returns one
//! metadata document or one error, never a partial document.

use thiserror::Error;

/// Fatal profiling errors, surfaced to the caller.
#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("Input contains no data")]
    EmptyInput,

    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("I/O error reading input: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Geocoder (Nominatim) failures.
///
/// After retries these are logged and the column loses `address` candidacy,
/// but profiling continues.
#[derive(Debug, Error)]
pub enum GeocoderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Geocoder returned status {0}")]
    Status(reqwest::StatusCode),

    #[error("Geocoder response is not JSON (content-type {0:?})")]
    NotJson(Option<String>),

    #[error("Malformed geocoder response: {0}")]
    BadResponse(String),
}

/// Sketch-service failures.
///
/// The service is known to fail transiently; every call is retried once.
/// Persistent failure leaves the column without a sketch and is non-fatal.
#[derive(Debug, Error)]
pub enum SketchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Sketch service returned status {0}")]
    Status(reqwest::StatusCode),

    #[error("Sketch service error: {0}")]
    Service(String),
}
