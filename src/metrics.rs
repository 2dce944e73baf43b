// src/metrics.rs
use anyhow::{Context, Result};
use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder. The recorder is process-global, so later
    /// calls reuse the first handle.
    pub fn init() -> Result<Self> {
        static HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();
        // Use default buckets to avoid API differences across crate versions.
        let handle = HANDLE
            .get_or_try_init(|| {
                PrometheusBuilder::new()
                    .install_recorder()
                    .context("prometheus: install recorder")
            })?
            .clone();
        ensure_metrics_described();
        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("scheduler_ticks_total", "Scheduler tick loop iterations.");
        describe_counter!(
            "scheduler_dispatched_total",
            "Crawl units started by the tick loop."
        );
        describe_counter!(
            "scheduler_skipped_in_flight_total",
            "Due sources skipped because their previous crawl was still running."
        );
        describe_gauge!("scheduler_in_flight", "Crawl units currently running.");
        describe_counter!("crawl_runs_total", "Crawl passes started.");
        describe_counter!(
            "crawl_errors_total",
            "Crawl passes that failed to scan the listing page."
        );
        describe_counter!(
            "crawl_new_items_total",
            "Candidates reported as new by the detector."
        );
        describe_histogram!("crawl_duration_ms", "Crawl pass duration in milliseconds.");
        describe_histogram!("fetch_duration_ms", "HTTP fetch duration in milliseconds.");
        describe_counter!("articles_created_total", "Articles created by ingestion.");
        describe_counter!(
            "rewrite_degraded_total",
            "Rewrite attempts that failed and kept the previous text."
        );
        describe_counter!(
            "review_submit_errors_total",
            "Failed deliveries to the review channel."
        );
        describe_counter!("publish_success_total", "Successful publications.");
        describe_counter!("publish_failures_total", "Failed publications.");
        describe_counter!(
            "decisions_ignored_total",
            "Late or duplicate review decisions that changed nothing."
        );
    });
}
