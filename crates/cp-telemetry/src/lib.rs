//! Observability for command-post.
//!
//! - **Logging**: human-readable or JSON output via `tracing-subscriber`
//! - **Metrics**: process-local counters, gauges and histograms with
//!   Prometheus-style text export, fed by the request client and the
//!   terminal orchestrator

pub mod logging;
pub mod metrics;
