//! Counters for document issuance and history queries.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;

use super::Histogram;

/// All docnum metrics, rendered together on `/metrics`.
pub struct MetricsRegistry {
    pub issue: Arc<IssueMetrics>,
    pub history: Arc<HistoryMetrics>,
    start_time: Instant,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            issue: Arc::new(IssueMetrics::default()),
            history: Arc::new(HistoryMetrics::default()),
            start_time: Instant::now(),
        }
    }

    pub fn format_prometheus(&self) -> String {
        let mut output = String::with_capacity(4096);
        let _ = writeln!(output, "# HELP docnum_uptime_secs Server uptime in seconds");
        let _ = writeln!(output, "# TYPE docnum_uptime_secs gauge");
        let _ = writeln!(
            output,
            "docnum_uptime_secs {:.3}",
            self.start_time.elapsed().as_secs_f64()
        );
        output.push_str(&self.issue.format_prometheus());
        output.push_str(&self.history.format_prometheus());
        output
    }
}

/// Outcomes of `issue_and_save`.
#[derive(Default)]
pub struct IssueMetrics {
    issued_total: AtomicU64,
    /// Candidates tried by successful issues
    attempts_total: AtomicU64,
    /// Successful issues that needed more than one candidate
    retried_total: AtomicU64,
    conflicts_total: AtomicU64,
    exhausted_total: AtomicU64,
    validation_errors_total: AtomicU64,
    storage_errors_total: AtomicU64,
    /// Successful issues by type key
    issued_by_type: DashMap<String, AtomicU64>,
    latency_us: Histogram,
}

impl IssueMetrics {
    pub fn record_issued(&self, type_key: &str, attempts: u32, latency_us: u64) {
        self.issued_total.fetch_add(1, Ordering::Relaxed);
        self.attempts_total
            .fetch_add(u64::from(attempts), Ordering::Relaxed);
        if attempts > 1 {
            self.retried_total.fetch_add(1, Ordering::Relaxed);
        }
        self.latency_us.observe(latency_us);
        if let Some(counter) = self.issued_by_type.get(type_key) {
            counter.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.issued_by_type
            .entry(type_key.to_string())
            .or_default()
            .fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_conflict(&self) {
        self.conflicts_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_exhausted(&self) {
        self.exhausted_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_validation_error(&self) {
        self.validation_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_storage_error(&self) {
        self.storage_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn issued(&self) -> u64 {
        self.issued_total.load(Ordering::Relaxed)
    }

    pub fn issue_attempts(&self) -> u64 {
        self.attempts_total.load(Ordering::Relaxed)
    }

    pub fn retried(&self) -> u64 {
        self.retried_total.load(Ordering::Relaxed)
    }

    pub fn conflicts(&self) -> u64 {
        self.conflicts_total.load(Ordering::Relaxed)
    }

    pub fn exhausted(&self) -> u64 {
        self.exhausted_total.load(Ordering::Relaxed)
    }

    pub fn validation_errors(&self) -> u64 {
        self.validation_errors_total.load(Ordering::Relaxed)
    }

    pub fn storage_errors(&self) -> u64 {
        self.storage_errors_total.load(Ordering::Relaxed)
    }

    pub fn format_prometheus(&self) -> String {
        let mut output = String::with_capacity(2048);

        let counters = [
            (
                "docnum_documents_issued_total",
                "Documents issued successfully",
                self.issued(),
            ),
            (
                "docnum_issue_attempts_total",
                "Candidate numbers tried by successful issues",
                self.issue_attempts(),
            ),
            (
                "docnum_issues_retried_total",
                "Successful issues that needed more than one candidate",
                self.retried(),
            ),
            (
                "docnum_number_conflicts_total",
                "Candidate numbers rejected as already issued",
                self.conflicts(),
            ),
            (
                "docnum_allocation_exhausted_total",
                "Requests that ran out of allocation attempts",
                self.exhausted(),
            ),
            (
                "docnum_validation_errors_total",
                "Requests rejected before reaching storage",
                self.validation_errors(),
            ),
            (
                "docnum_storage_errors_total",
                "Requests failed by the storage backend",
                self.storage_errors(),
            ),
        ];
        for (name, help, value) in counters {
            let _ = writeln!(output, "# HELP {} {}", name, help);
            let _ = writeln!(output, "# TYPE {} counter", name);
            let _ = writeln!(output, "{} {}", name, value);
        }

        let _ = writeln!(
            output,
            "# HELP docnum_documents_issued_by_type_total Documents issued per document type"
        );
        let _ = writeln!(output, "# TYPE docnum_documents_issued_by_type_total counter");
        let mut by_type: Vec<(String, u64)> = self
            .issued_by_type
            .iter()
            .map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed)))
            .collect();
        by_type.sort();
        for (type_key, value) in by_type {
            let _ = writeln!(
                output,
                "docnum_documents_issued_by_type_total{{type=\"{}\"}} {}",
                type_key, value
            );
        }

        output.push_str(&self.latency_us.format_prometheus(
            "docnum_issue_latency_us",
            "End-to-end issue latency in microseconds",
        ));
        output
    }
}

/// History endpoint usage.
#[derive(Default)]
pub struct HistoryMetrics {
    queries_total: AtomicU64,
    rows_total: AtomicU64,
    latency_us: Histogram,
}

impl HistoryMetrics {
    pub fn record_query(&self, rows: u64, latency_us: u64) {
        self.queries_total.fetch_add(1, Ordering::Relaxed);
        self.rows_total.fetch_add(rows, Ordering::Relaxed);
        self.latency_us.observe(latency_us);
    }

    pub fn queries(&self) -> u64 {
        self.queries_total.load(Ordering::Relaxed)
    }

    pub fn format_prometheus(&self) -> String {
        let mut output = String::with_capacity(1024);
        let _ = writeln!(output, "# HELP docnum_history_queries_total History queries served");
        let _ = writeln!(output, "# TYPE docnum_history_queries_total counter");
        let _ = writeln!(output, "docnum_history_queries_total {}", self.queries());
        let _ = writeln!(output, "# HELP docnum_history_rows_total History rows returned");
        let _ = writeln!(output, "# TYPE docnum_history_rows_total counter");
        let _ = writeln!(
            output,
            "docnum_history_rows_total {}",
            self.rows_total.load(Ordering::Relaxed)
        );
        output.push_str(&self.latency_us.format_prometheus(
            "docnum_history_latency_us",
            "History query latency in microseconds",
        ));
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_by_type_is_labelled() {
        let metrics = IssueMetrics::default();
        metrics.record_issued("oficio", 1, 900);
        metrics.record_issued("oficio", 2, 1_100);
        metrics.record_issued("protocolo", 1, 800);

        assert_eq!(metrics.issued(), 3);
        let output = metrics.format_prometheus();
        assert!(output.contains("docnum_documents_issued_by_type_total{type=\"oficio\"} 2"));
        assert!(output.contains("docnum_documents_issued_by_type_total{type=\"protocolo\"} 1"));
        assert!(output.contains("docnum_issue_latency_us_count 3"));
    }

    #[test]
    fn attempts_are_summed_and_retries_counted() {
        let metrics = IssueMetrics::default();
        metrics.record_issued("oficio", 1, 500);
        metrics.record_issued("protocolo", 3, 700);
        metrics.record_issued("protocolo", 2, 600);

        assert_eq!(metrics.issue_attempts(), 6);
        assert_eq!(metrics.retried(), 2);
        let output = metrics.format_prometheus();
        assert!(output.contains("docnum_issue_attempts_total 6"));
        assert!(output.contains("docnum_issues_retried_total 2"));
    }

    #[test]
    fn failure_counters_are_separate() {
        let metrics = IssueMetrics::default();
        metrics.record_conflict();
        metrics.record_conflict();
        metrics.record_exhausted();
        metrics.record_storage_error();

        assert_eq!(metrics.conflicts(), 2);
        assert_eq!(metrics.exhausted(), 1);
        assert_eq!(metrics.storage_errors(), 1);
        assert_eq!(metrics.validation_errors(), 0);
        assert!(metrics
            .format_prometheus()
            .contains("docnum_allocation_exhausted_total 1"));
    }

    #[test]
    fn registry_renders_all_sections() {
        let registry = MetricsRegistry::new();
        registry.history.record_query(5, 2_000);
        let output = registry.format_prometheus();
        assert!(output.contains("docnum_uptime_secs"));
        assert!(output.contains("docnum_documents_issued_total 0"));
        assert!(output.contains("docnum_history_rows_total 5"));
    }
}
