//! Observability metrics for docnum.
//!
//! All counters are lock-free atomics so recording never contends with
//! the allocation path.

pub mod histogram;
pub mod registry;

pub use histogram::Histogram;
pub use registry::{HistoryMetrics, IssueMetrics, MetricsRegistry};
