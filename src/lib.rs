//! Datascope: dataset profiling core
//!
//! Given a tabular dataset (a file, a byte stream, or a materialized
//! frame), the profiler samples it under a memory budget, detects column
//! structural and semantic types, derives per-column statistics, computes
//! spatial and temporal coverage, pushes textual columns to a set-overlap
//! sketch service, and recommends plots -- producing one metadata document
//! for the caller to index.
//!
//! ## Architecture
//!
//! - **Loader**: garbage-header detection, CSV parsing, seeded sub-sampling
//! - **Type identifier**: structural types by majority rule, semantic
//!   detectors (datetimes, lat/long, admin areas, identifiers, ...)
//! - **Analyzers**: numerical statistics and clustered ranges, temporal
//!   resolution, spatial bounding boxes (k-means), address geocoding
//! - **Sketch client**: set-overlap index for join discovery
//! - **Orchestrator**: [`process_dataset`] composes the above

pub mod common;
pub mod config;
pub mod error;
pub mod geo;
pub mod indexing;
pub mod loader;
pub mod metrics;
pub mod numerical;
pub mod plots;
pub mod profile;
pub mod sketch;
pub mod spatial;
pub mod temporal;
pub mod types;
pub mod typing;

// Re-export the main entry point and its companions
pub use error::{GeocoderError, ProfileError, SketchError};
pub use loader::{DataInput, Frame};
pub use profile::{process_dataset, ProfileOptions};

// Re-export commonly used types
pub use types::{
    determine_dataset_type, ColumnMetadata, DatasetMetadata, DatasetType, SemanticType,
    StructuralType,
};
