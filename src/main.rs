//! newsflow: binary entrypoint.
//! Loads config, wires collaborators, restores state, starts the scheduler and
//! the review listener, and serves the control surface.

use std::sync::Arc;
use std::time::Duration;

use shuttle_axum::ShuttleAxum;
use tokio::sync::mpsc;

use newsflow::cancel::Cancel;
use newsflow::config::AppConfig;
use newsflow::crawl::fetcher::HttpFetcher;
use newsflow::metrics::Metrics;
use newsflow::publish::build_publisher;
use newsflow::review::telegram::TelegramReview;
use newsflow::review::{ApiOnlyReview, DynReviewChannel};
use newsflow::rewrite::build_rewriter;
use newsflow::{telemetry, App, Collaborators};

const DECISION_QUEUE: usize = 64;

fn build_review(cfg: &AppConfig) -> Option<Arc<TelegramReview>> {
    let tg = cfg.review.telegram.as_ref()?;
    match TelegramReview::from_config(tg) {
        Ok(t) => Some(Arc::new(t)),
        Err(e) => {
            tracing::warn!(error = %e, "telegram review disabled; decisions via HTTP only");
            None
        }
    }
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    telemetry::init_tracing();

    let cfg = AppConfig::load_default()?;
    let metrics = Metrics::init()?;

    let telegram = build_review(&cfg);
    let review: DynReviewChannel = match &telegram {
        Some(t) => t.clone(),
        None => Arc::new(ApiOnlyReview),
    };
    let collab = Collaborators {
        fetcher: Arc::new(HttpFetcher::new(cfg.timeouts.fetch())?),
        rewriter: build_rewriter(&cfg.rewriter),
        review,
        publisher: build_publisher(&cfg.publish),
    };
    tracing::info!(
        rewriter = collab.rewriter.name(),
        review = collab.review.name(),
        publisher = collab.publisher.name(),
        "collaborators ready"
    );

    let app = Arc::new(App::build(&cfg, collab));
    if let Err(e) = app.restore(&cfg).await {
        tracing::warn!(error = %e, "snapshot not restored; starting empty");
    }
    let seeded = app.seed(&cfg.sources);
    tracing::info!(seeded, sources = app.registry.len(), "sources loaded");

    // Review decisions: Telegram listener -> lifecycle.
    if let Some(tg) = telegram {
        let (tx, rx) = mpsc::channel(DECISION_QUEUE);
        tokio::spawn(Arc::clone(&app.lifecycle).run_decisions(rx, Cancel::never()));
        tg.spawn_listener(tx, Cancel::never());
    }

    if cfg.storage.snapshot_path.is_some() {
        let app = Arc::clone(&app);
        let cfg = cfg.clone();
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_secs(cfg.storage.snapshot_secs));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = app.persist(&cfg).await {
                    tracing::warn!(error = %e, "snapshot write failed");
                }
            }
        });
    }

    app.scheduler.start();

    let router = app.router().merge(metrics.router());
    Ok(router.into())
}
