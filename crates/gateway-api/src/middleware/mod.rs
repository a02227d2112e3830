//! HTTP middleware.

mod metrics;

pub use metrics::metrics_layer;
