//! Process-wide Prometheus collectors.
//!
//! Registered lazily into the default registry at first use and updated
//! atomically; there is no teardown. Callers export them by gathering the
//! default registry.

use std::sync::LazyLock;

use prometheus::{Histogram, HistogramOpts, IntCounter};

/// Bucket ladder for the phase histograms, in seconds.
const BUCKETS: &[f64] = &[
    1.0, 2.0, 4.0, 7.0, 12.0, 20.0, 32.0, 52.0, 80.0, 120.0, 190.0, 300.0, 480.0, 720.0, 1200.0,
    1800.0, 3600.0, 5760.0, 7200.0,
];

fn phase_histogram(name: &str, help: &str) -> Histogram {
    let opts = HistogramOpts::new(name, help).buckets(BUCKETS.to_vec());
    #[allow(clippy::expect_used)] // static name/help and fixed buckets
    let histogram = Histogram::with_opts(opts).expect("valid histogram opts");
    // A second registration (tests re-initializing statics) is harmless
    let _ = prometheus::default_registry().register(Box::new(histogram.clone()));
    histogram
}

/// Wall-clock time of a whole profiling call.
pub static PROFILE_SECONDS: LazyLock<Histogram> =
    LazyLock::new(|| phase_histogram("profile_seconds", "Profile time"));

/// Time spent identifying column types.
pub static PROFILE_TYPES_SECONDS: LazyLock<Histogram> =
    LazyLock::new(|| phase_histogram("profile_types_seconds", "Profile types time"));

/// Time spent computing spatial coverage.
pub static PROFILE_SPATIAL_SECONDS: LazyLock<Histogram> = LazyLock::new(|| {
    phase_histogram(
        "profile_spatial_seconds",
        "Profile spatial coverage time",
    )
});

/// Time spent talking to the sketch service.
pub static PROFILE_SKETCH_SECONDS: LazyLock<Histogram> =
    LazyLock::new(|| phase_histogram("profile_lazo_seconds", "Profile time with Lazo, time"));

/// Total queries sent to the geocoder (including retries).
pub static GEOCODER_REQUESTS: LazyLock<IntCounter> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    let counter = IntCounter::new("profile_nominatim_reqs", "Queries to Nominatim")
        .expect("valid counter opts");
    let _ = prometheus::default_registry().register(Box::new(counter.clone()));
    counter
});

/// Latency of successful geocoder queries.
pub static GEOCODER_REQUEST_SECONDS: LazyLock<Histogram> = LazyLock::new(|| {
    let opts = HistogramOpts::new(
        "profile_nominatim_req_seconds",
        "Time for Nominatim to answer a query",
    );
    #[allow(clippy::expect_used)]
    let histogram = Histogram::with_opts(opts).expect("valid histogram opts");
    let _ = prometheus::default_registry().register(Box::new(histogram.clone()));
    histogram
});
