// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod article;
pub mod cancel;
pub mod config;
pub mod crawl;
pub mod error;
pub mod lifecycle;
pub mod metrics;
pub mod publish;
pub mod registry;
pub mod review;
pub mod rewrite;
pub mod scheduler;
pub mod stage;
pub mod store;
pub mod telemetry;
pub mod testing;

use std::sync::Arc;

use anyhow::Result;
use axum::Router;

pub use crate::api::{router, AppState};
pub use crate::error::ControlError;

use crate::config::{AppConfig, SeedSource};
use crate::crawl::{Crawler, DynFetcher};
use crate::lifecycle::Lifecycle;
use crate::publish::DynPublisher;
use crate::registry::{NewSource, SourceRegistry};
use crate::review::DynReviewChannel;
use crate::rewrite::DynRewriter;
use crate::scheduler::Scheduler;
use crate::store::{snapshot, MemoryStore};

/// External collaborators the pipeline talks to.
pub struct Collaborators {
    pub fetcher: DynFetcher,
    pub rewriter: DynRewriter,
    pub review: DynReviewChannel,
    pub publisher: DynPublisher,
}

/// Fully wired process state: one scheduler, one lifecycle, one store.
pub struct App {
    pub registry: Arc<SourceRegistry>,
    pub store: Arc<MemoryStore>,
    pub lifecycle: Arc<Lifecycle>,
    pub scheduler: Arc<Scheduler>,
}

impl App {
    pub fn build(cfg: &AppConfig, collab: Collaborators) -> Self {
        let registry = Arc::new(SourceRegistry::new());
        let store = Arc::new(MemoryStore::new());
        let lifecycle = Arc::new(Lifecycle::new(
            store.clone(),
            collab.rewriter,
            collab.review,
            collab.publisher,
            cfg.timeouts.clone(),
            &cfg.lifecycle,
        ));
        let crawler = Arc::new(Crawler::new(
            collab.fetcher,
            Arc::clone(&lifecycle),
            cfg.crawl.clone(),
            cfg.timeouts.fetch(),
        ));
        let scheduler = Arc::new(Scheduler::new(
            Arc::clone(&registry),
            crawler,
            cfg.scheduler.clone(),
        ));
        Self {
            registry,
            store,
            lifecycle,
            scheduler,
        }
    }

    pub fn state(&self) -> AppState {
        AppState {
            scheduler: Arc::clone(&self.scheduler),
            lifecycle: Arc::clone(&self.lifecycle),
        }
    }

    pub fn router(&self) -> Router {
        api::router(self.state())
    }

    /// Register seed sources whose URL is not known yet. Invalid seeds are
    /// logged and skipped.
    pub fn seed(&self, seeds: &[SeedSource]) -> usize {
        let mut added = 0;
        for s in seeds {
            let res = self.registry.register(NewSource {
                name: s.name.clone(),
                url: s.url.clone(),
                interval_minutes: s.interval_minutes,
                enabled: s.enabled,
            });
            match res {
                Ok(_) => added += 1,
                Err(ControlError::DuplicateSource(_)) => {}
                Err(e) => tracing::warn!(name = %s.name, error = %e, "seed source skipped"),
            }
        }
        added
    }

    /// Load sources and articles from the snapshot file, if configured.
    pub async fn restore(&self, cfg: &AppConfig) -> Result<()> {
        let Some(path) = &cfg.storage.snapshot_path else {
            return Ok(());
        };
        let snap = snapshot::read(path).await?;
        tracing::info!(
            path = %path.display(),
            sources = snap.sources.len(),
            articles = snap.articles.len(),
            "snapshot restored"
        );
        snap.restore_into(&self.registry, &self.store);
        Ok(())
    }

    /// Write the snapshot file, if configured.
    pub async fn persist(&self, cfg: &AppConfig) -> Result<()> {
        let Some(path) = &cfg.storage.snapshot_path else {
            return Ok(());
        };
        let snap = snapshot::Snapshot::capture(&self.registry, &self.store);
        snapshot::write(path, &snap).await?;
        tracing::info!(path = %path.display(), "snapshot written");
        Ok(())
    }
}
