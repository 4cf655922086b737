//! Prometheus metrics and tracing spans.
//!
//! Counters and histograms are registered on first use of [`METRICS`]
//! (feature `metrics`) with a meter provider whose reader is the Prometheus
//! exporter; [`QuarryMetrics::render`] produces the scrape text. Span
//! constructors live in [`tracing_helpers`] (feature `tracing`).

#[cfg(feature = "metrics")]
pub use self::prometheus_metrics::*;

#[cfg(feature = "metrics")]
mod prometheus_metrics {
    use once_cell::sync::Lazy;
    use opentelemetry::metrics::{Counter, Histogram, MeterProvider as _};
    use opentelemetry_sdk::metrics::SdkMeterProvider;
    use prometheus::{Encoder, Registry, TextEncoder};
    use std::time::Duration;

    pub static METRICS: Lazy<QuarryMetrics> = Lazy::new(QuarryMetrics::init);

    pub struct QuarryMetrics {
        pub registry: Registry,
        pub provider: SdkMeterProvider,
        pub queries_total: Counter<u64>,
        pub query_errors_total: Counter<u64>,
        pub query_duration: Histogram<f64>,
        pub commits_total: Counter<u64>,
        pub rollbacks_total: Counter<u64>,
        pub batches_applied_total: Counter<u64>,
        pub batches_failed_total: Counter<u64>,
        pub batch_duration: Histogram<f64>,
    }

    impl QuarryMetrics {
        pub fn init() -> Self {
            let registry = Registry::new();
            let exporter = opentelemetry_prometheus::exporter()
                .with_registry(registry.clone())
                .build()
                .expect("failed to build prometheus exporter");
            let provider = SdkMeterProvider::builder().with_reader(exporter).build();
            let meter = provider.meter("quarry");

            let queries_total = meter
                .u64_counter("quarry_queries_total")
                .with_description("Total statements executed")
                .build();
            let query_errors_total = meter
                .u64_counter("quarry_query_errors_total")
                .with_description("Statements that failed in the driver")
                .build();
            let query_duration = meter
                .f64_histogram("quarry_query_duration_seconds")
                .with_description("Duration of statements")
                .build();
            let commits_total = meter
                .u64_counter("quarry_transaction_commits_total")
                .with_description("Outer transactions committed")
                .build();
            let rollbacks_total = meter
                .u64_counter("quarry_transaction_rollbacks_total")
                .with_description("Outer transactions and savepoints rolled back")
                .build();
            let batches_applied_total = meter
                .u64_counter("quarry_migration_batches_applied_total")
                .with_description("Migration batches applied")
                .build();
            let batches_failed_total = meter
                .u64_counter("quarry_migration_batches_failed_total")
                .with_description("Migration batches that failed and were rolled back")
                .build();
            let batch_duration = meter
                .f64_histogram("quarry_migration_batch_duration_seconds")
                .with_description("Duration of migration batch apply/revert")
                .build();

            Self {
                registry,
                provider,
                queries_total,
                query_errors_total,
                query_duration,
                commits_total,
                rollbacks_total,
                batches_applied_total,
                batches_failed_total,
                batch_duration,
            }
        }

        pub fn record_query(&self, elapsed: Duration) {
            self.queries_total.add(1, &[]);
            self.query_duration.record(elapsed.as_secs_f64(), &[]);
        }

        pub fn record_query_error(&self) {
            self.query_errors_total.add(1, &[]);
        }

        pub fn record_commit(&self) {
            self.commits_total.add(1, &[]);
        }

        pub fn record_rollback(&self) {
            self.rollbacks_total.add(1, &[]);
        }

        pub fn record_batch_applied(&self, elapsed: Duration) {
            self.batches_applied_total.add(1, &[]);
            self.batch_duration.record(elapsed.as_secs_f64(), &[]);
        }

        pub fn record_batch_failed(&self) {
            self.batches_failed_total.add(1, &[]);
        }

        /// Prometheus text exposition of everything recorded so far
        pub fn render(&self) -> Result<String, prometheus::Error> {
            let mut buffer = Vec::new();
            TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
            String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_recorded_counters_are_exported() {
            METRICS.record_query(Duration::from_millis(3));
            METRICS.record_batch_failed();
            let text = METRICS.render().unwrap();
            assert!(text.contains("quarry_queries_total"));
            assert!(text.contains("quarry_migration_batches_failed_total"));
        }
    }
}

#[cfg(feature = "tracing")]
pub mod tracing_helpers {
    use tracing::{info_span, Span};

    /// Longest statement prefix recorded on a span.
    const SQL_PREVIEW: usize = 120;

    fn preview(sql: &str) -> &str {
        match sql.char_indices().nth(SQL_PREVIEW) {
            Some((end, _)) => &sql[..end],
            None => sql,
        }
    }

    pub fn execute_query_span(sql: &str) -> Span {
        info_span!("quarry.execute", db.system = "postgresql", db.statement = preview(sql))
    }

    pub fn acquire_connection_span() -> Span {
        info_span!("quarry.connect", db.system = "postgresql")
    }

    pub fn begin_transaction_span() -> Span {
        info_span!("quarry.transaction.begin")
    }

    pub fn commit_transaction_span() -> Span {
        info_span!("quarry.transaction.commit")
    }

    pub fn rollback_transaction_span() -> Span {
        info_span!("quarry.transaction.rollback")
    }

    pub fn savepoint_span(name: &str) -> Span {
        info_span!("quarry.transaction.savepoint", savepoint = name)
    }

    pub fn migration_span(action: &'static str, identifier: &str) -> Span {
        info_span!("quarry.migration", action = action, batch = identifier)
    }

}
