// src/crawl/mod.rs
//! Crawl unit: scan one source, detect new items, ingest them in page order and
//! advance the source's high-water marker.

pub mod detector;
pub mod fetcher;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Utc;
use metrics::{counter, histogram};
use serde::Serialize;

use crate::article::NewArticle;
use crate::cancel::Cancel;
use crate::config::CrawlConfig;
use crate::lifecycle::Lifecycle;
use crate::registry::{Source, SourceEntry, SourceId};
use crate::stage::{bounded, error_text, Stage};
use detector::detect_new;
use fetcher::ContentFetcher;

pub type DynFetcher = Arc<dyn ContentFetcher>;

#[derive(Debug, Clone, Default, Serialize)]
pub struct CrawlReport {
    pub source_id: SourceId,
    /// Candidates on the listing page.
    pub scanned: usize,
    /// Candidates the detector reported as new.
    pub detected: usize,
    /// Articles actually created.
    pub ingested: usize,
    pub item_errors: usize,
    pub cancelled: bool,
    /// Set when the listing page could not be scanned.
    pub error: Option<String>,
}

pub struct Crawler {
    fetcher: DynFetcher,
    lifecycle: Arc<Lifecycle>,
    cfg: CrawlConfig,
    fetch_timeout: Duration,
}

impl Crawler {
    pub fn new(
        fetcher: DynFetcher,
        lifecycle: Arc<Lifecycle>,
        cfg: CrawlConfig,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            fetcher,
            lifecycle,
            cfg,
            fetch_timeout,
        }
    }

    /// One pass over `entry`. Never fails: errors end up on the Source record.
    pub async fn run(&self, entry: &SourceEntry, mut cancel: Cancel) -> CrawlReport {
        let t0 = Instant::now();
        counter!("crawl_runs_total").increment(1);
        let source = entry.snapshot();
        let mut report = CrawlReport {
            source_id: source.id,
            ..Default::default()
        };

        let outcome = self.pass(&source, &mut cancel, &mut report).await;
        let now = Utc::now();
        match outcome {
            Ok(marker) => {
                let ingested = report.ingested as u64;
                entry.update(|s| {
                    s.last_checked_at = Some(now);
                    s.last_success_at = Some(now);
                    // The marker belongs to the listing that was scanned.
                    if s.url == source.url {
                        if let Some(key) = marker {
                            s.last_seen_key = Some(key);
                        }
                    }
                    s.total_ingested += ingested;
                    s.last_error = None;
                    s.error_count = 0;
                });
                tracing::info!(
                    target: "crawl",
                    source_id = source.id,
                    scanned = report.scanned,
                    detected = report.detected,
                    ingested = report.ingested,
                    item_errors = report.item_errors,
                    cancelled = report.cancelled,
                    "crawl pass done"
                );
            }
            Err(e) => {
                counter!("crawl_errors_total").increment(1);
                let msg = error_text(&e, self.cfg.max_error_len);
                tracing::warn!(target: "crawl", source_id = source.id, url = %source.url, error = %msg, "crawl failed");
                entry.update(|s| {
                    s.last_checked_at = Some(now);
                    s.last_error = Some(msg.clone());
                    s.error_count += 1;
                });
                report.error = Some(msg);
            }
        }
        histogram!("crawl_duration_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        report
    }

    /// Returns the new high-water key: the newest candidate that is now stored.
    async fn pass(
        &self,
        source: &Source,
        cancel: &mut Cancel,
        report: &mut CrawlReport,
    ) -> Result<Option<String>> {
        let candidates = bounded(
            Stage::Fetch,
            self.fetch_timeout,
            self.fetcher.scan(&source.url),
        )
        .await?;
        report.scanned = candidates.len();

        let store = Arc::clone(self.lifecycle.store());
        let detection = detect_new(
            &candidates,
            source.last_seen_key.as_deref(),
            self.cfg.max_scan_depth,
            |key| {
                let store = Arc::clone(&store);
                async move { store.contains_key(&key).await }
            },
        )
        .await?;
        report.detected = detection.new_items.len();
        counter!("crawl_new_items_total").increment(detection.new_items.len() as u64);

        let delay = Duration::from_millis(self.cfg.request_delay_ms);
        let mut marker: Option<String> = None;
        for cand in &detection.new_items {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    report.cancelled = true;
                    break;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            let fetched = bounded(
                Stage::Fetch,
                self.fetch_timeout,
                self.fetcher.fetch_item(&cand.key),
            )
            .await;
            let item = match fetched {
                Ok(item) => item,
                Err(e) => {
                    report.item_errors += 1;
                    tracing::warn!(target: "crawl", source_id = source.id, key = %cand.key, error = %e, "item fetch failed");
                    continue;
                }
            };

            let title = if item.title.is_empty() {
                cand.title.clone()
            } else {
                item.title
            };
            let inserted = self
                .lifecycle
                .intake(NewArticle {
                    source_id: Some(source.id),
                    key: cand.key.clone(),
                    title,
                    content: item.body,
                    images: item.images,
                    videos: item.videos,
                })
                .await;
            let inserted = match inserted {
                Ok(ins) => ins,
                Err(e) => {
                    report.item_errors += 1;
                    tracing::warn!(target: "crawl", source_id = source.id, key = %cand.key, error = %e, "article insert failed");
                    continue;
                }
            };
            marker.get_or_insert_with(|| cand.key.clone());
            if !inserted.created {
                continue;
            }
            report.ingested += 1;

            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            if let Err(e) = self
                .lifecycle
                .advance_new(inserted.article.id, cancel)
                .await
            {
                tracing::warn!(target: "crawl", source_id = source.id, id = inserted.article.id, error = %e, "article not advanced");
            }
        }
        Ok(marker)
    }
}
