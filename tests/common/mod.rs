// tests/common/mod.rs
//
// Shared wiring for integration tests: a full App over in-memory mocks.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use newsflow::config::{AppConfig, CrawlConfig};
use newsflow::registry::{NewSource, SourceId};
use newsflow::testing::{MockFetcher, MockPublisher, MockReview, MockRewriter};
use newsflow::{App, Collaborators};

pub struct Harness {
    pub app: App,
    pub fetcher: Arc<MockFetcher>,
    pub rewriter: Arc<MockRewriter>,
    pub review: Arc<MockReview>,
    pub publisher: Arc<MockPublisher>,
}

pub fn config() -> AppConfig {
    AppConfig {
        crawl: CrawlConfig {
            request_delay_ms: 0,
            ..CrawlConfig::default()
        },
        ..AppConfig::default()
    }
}

pub fn harness() -> Harness {
    harness_with(config(), MockRewriter::ok())
}

pub fn harness_with(cfg: AppConfig, rewriter: MockRewriter) -> Harness {
    let fetcher = Arc::new(MockFetcher::new());
    let rewriter = Arc::new(rewriter);
    let review = Arc::new(MockReview::new());
    let publisher = Arc::new(MockPublisher::new());
    let app = App::build(
        &cfg,
        Collaborators {
            fetcher: fetcher.clone(),
            rewriter: rewriter.clone(),
            review: review.clone(),
            publisher: publisher.clone(),
        },
    );
    Harness {
        app,
        fetcher,
        rewriter,
        review,
        publisher,
    }
}

impl Harness {
    pub fn add_source(&self, url: &str) -> SourceId {
        self.app
            .scheduler
            .register(NewSource {
                name: format!("src {url}"),
                url: url.to_string(),
                interval_minutes: 5,
                enabled: true,
            })
            .expect("register source")
            .id
    }

    /// Wait until no crawl unit is running (bounded).
    pub async fn settle(&self) {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                tokio::time::sleep(Duration::from_millis(5)).await;
                if self.app.scheduler.status().in_flight == 0 {
                    break;
                }
            }
        })
        .await
        .expect("crawl units did not finish");
    }
}
