//! Client interface to the remote set-overlap (Lazo) sketch service.
//!
//! The service is known to fail transiently, so every call goes through a
//! single-retry wrapper. Persistent failure leaves the affected column
//! without a sketch; it never aborts profiling.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::config::ProfilerConfig;
use crate::error::SketchError;
use crate::types::LazoSketch;

/// Operations offered by the sketch index.
pub trait SketchService: Send + Sync {
    /// Index the named textual columns of an on-disk dataset.
    fn index_data_path(
        &self,
        path: &Path,
        dataset_id: &str,
        column_names: &[String],
    ) -> Result<(), SketchError>;

    /// Index one column given its values.
    fn index_data(
        &self,
        values: &[String],
        dataset_id: &str,
        column_name: &str,
    ) -> Result<(), SketchError>;

    /// Compute sketches for the named columns of an on-disk dataset
    /// without indexing them.
    fn sketch_from_data_path(
        &self,
        path: &Path,
        dataset_id: &str,
        column_names: &[String],
    ) -> Result<Vec<LazoSketch>, SketchError>;

    /// Compute the sketch of one column given its values.
    fn sketch_from_data(
        &self,
        values: &[String],
        dataset_id: &str,
        column_name: &str,
    ) -> Result<LazoSketch, SketchError>;

    /// Drop the sketches of a dataset's columns. Returns whether the
    /// service acknowledged the removal.
    fn remove_sketches(&self, dataset_id: &str, column_names: &[String])
        -> Result<bool, SketchError>;
}

/// Run a sketch-service call, retrying once on any error.
pub fn with_retry<T>(mut call: impl FnMut() -> Result<T, SketchError>) -> Result<T, SketchError> {
    match call() {
        Ok(value) => Ok(value),
        Err(first) => {
            tracing::warn!(error = %first, "Sketch service call failed, retrying once");
            call()
        }
    }
}

#[derive(Debug, Deserialize)]
struct SketchResponse {
    n_permutations: u64,
    hash_values: Vec<u64>,
    cardinality: u64,
}

impl From<SketchResponse> for LazoSketch {
    fn from(r: SketchResponse) -> Self {
        Self {
            n_permutations: r.n_permutations,
            hash_values: r.hash_values,
            cardinality: r.cardinality,
        }
    }
}

#[derive(Debug, Deserialize)]
struct AckResponse {
    ack: bool,
}

/// HTTP binding of the sketch service.
pub struct HttpSketchClient {
    http: reqwest::blocking::Client,
    url: String,
}

impl HttpSketchClient {
    pub fn new(url: &str) -> Result<Self, SketchError> {
        let http = reqwest::blocking::Client::builder()
            .user_agent(ProfilerConfig::user_agent())
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            http,
            url: url.trim_end_matches('/').to_owned(),
        })
    }

    fn post(&self, endpoint: &str, body: serde_json::Value) -> Result<reqwest::blocking::Response, SketchError> {
        let res = self
            .http
            .post(format!("{}/{endpoint}", self.url))
            .json(&body)
            .send()?;
        let status = res.status();
        if !status.is_success() {
            return Err(SketchError::Status(status));
        }
        Ok(res)
    }
}

impl SketchService for HttpSketchClient {
    fn index_data_path(
        &self,
        path: &Path,
        dataset_id: &str,
        column_names: &[String],
    ) -> Result<(), SketchError> {
        self.post(
            "index/path",
            serde_json::json!({
                "path": path.to_string_lossy(),
                "dataset_id": dataset_id,
                "column_names": column_names,
            }),
        )?;
        Ok(())
    }

    fn index_data(
        &self,
        values: &[String],
        dataset_id: &str,
        column_name: &str,
    ) -> Result<(), SketchError> {
        self.post(
            "index/data",
            serde_json::json!({
                "values": values,
                "dataset_id": dataset_id,
                "column_name": column_name,
            }),
        )?;
        Ok(())
    }

    fn sketch_from_data_path(
        &self,
        path: &Path,
        dataset_id: &str,
        column_names: &[String],
    ) -> Result<Vec<LazoSketch>, SketchError> {
        let res = self.post(
            "sketch/path",
            serde_json::json!({
                "path": path.to_string_lossy(),
                "dataset_id": dataset_id,
                "column_names": column_names,
            }),
        )?;
        let sketches: Vec<SketchResponse> = res.json()?;
        if sketches.len() != column_names.len() {
            return Err(SketchError::Service(format!(
                "{} sketches for {} columns",
                sketches.len(),
                column_names.len()
            )));
        }
        Ok(sketches.into_iter().map(Into::into).collect())
    }

    fn sketch_from_data(
        &self,
        values: &[String],
        dataset_id: &str,
        column_name: &str,
    ) -> Result<LazoSketch, SketchError> {
        let res = self.post(
            "sketch/data",
            serde_json::json!({
                "values": values,
                "dataset_id": dataset_id,
                "column_name": column_name,
            }),
        )?;
        let sketch: SketchResponse = res.json()?;
        Ok(sketch.into())
    }

    fn remove_sketches(
        &self,
        dataset_id: &str,
        column_names: &[String],
    ) -> Result<bool, SketchError> {
        let res = self.post(
            "remove",
            serde_json::json!({
                "dataset_id": dataset_id,
                "column_names": column_names,
            }),
        )?;
        let ack: AckResponse = res.json()?;
        Ok(ack.ack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_retry_succeeds_second_time() {
        let calls = AtomicUsize::new(0);
        let result = with_retry(|| {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(SketchError::Service("transient".to_owned()))
            } else {
                Ok(42)
            }
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_retry_gives_up_after_two_failures() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = with_retry(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(SketchError::Service("down".to_owned()))
        });
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_retry_skipped_on_success() {
        let calls = AtomicUsize::new(0);
        let result = with_retry(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok("ok")
        });
        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
