// src/testing.rs
//! Scriptable in-memory collaborators for tests and local dry runs.
//! Nothing here talks to the network.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::article::{Article, ArticleId};
use crate::crawl::fetcher::{CandidateItem, ContentFetcher, ItemContent};
use crate::publish::{PublishTarget, Published};
use crate::review::ReviewChannel;
use crate::rewrite::Rewriter;

#[derive(Debug, Default)]
struct ScanLoad {
    active: usize,
    peak: usize,
    calls: usize,
}

/// Serves listing pages and items from memory. Unknown item URLs get
/// generated content so tests only script what they care about.
#[derive(Debug, Default)]
pub struct MockFetcher {
    listings: Mutex<HashMap<String, Vec<CandidateItem>>>,
    items: Mutex<HashMap<String, ItemContent>>,
    failing_scans: Mutex<HashMap<String, String>>,
    failing_items: Mutex<HashMap<String, String>>,
    scan_delay: Mutex<Duration>,
    load: Mutex<HashMap<String, ScanLoad>>,
    item_fetches: Mutex<Vec<String>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Listing for `url`, newest first.
    pub fn set_listing(&self, url: &str, keys: &[&str]) {
        let cands = keys
            .iter()
            .enumerate()
            .map(|(i, k)| CandidateItem {
                key: k.to_string(),
                position: i,
                title: format!("Title {k}"),
            })
            .collect();
        self.listings
            .lock()
            .expect("mock poisoned")
            .insert(url.to_string(), cands);
    }

    pub fn set_item(&self, key: &str, item: ItemContent) {
        self.items
            .lock()
            .expect("mock poisoned")
            .insert(key.to_string(), item);
    }

    pub fn fail_scan(&self, url: &str, msg: &str) {
        self.failing_scans
            .lock()
            .expect("mock poisoned")
            .insert(url.to_string(), msg.to_string());
    }

    pub fn heal_scan(&self, url: &str) {
        self.failing_scans.lock().expect("mock poisoned").remove(url);
    }

    pub fn fail_item(&self, key: &str, msg: &str) {
        self.failing_items
            .lock()
            .expect("mock poisoned")
            .insert(key.to_string(), msg.to_string());
    }

    pub fn set_scan_delay(&self, d: Duration) {
        *self.scan_delay.lock().expect("mock poisoned") = d;
    }

    pub fn scan_calls(&self, url: &str) -> usize {
        self.load
            .lock()
            .expect("mock poisoned")
            .get(url)
            .map_or(0, |l| l.calls)
    }

    /// Highest number of scans of `url` that were running at the same time.
    pub fn peak_concurrent_scans(&self, url: &str) -> usize {
        self.load
            .lock()
            .expect("mock poisoned")
            .get(url)
            .map_or(0, |l| l.peak)
    }

    pub fn item_fetches(&self) -> Vec<String> {
        self.item_fetches.lock().expect("mock poisoned").clone()
    }
}

#[async_trait]
impl ContentFetcher for MockFetcher {
    async fn scan(&self, url: &str) -> Result<Vec<CandidateItem>> {
        {
            let mut load = self.load.lock().expect("mock poisoned");
            let l = load.entry(url.to_string()).or_default();
            l.calls += 1;
            l.active += 1;
            l.peak = l.peak.max(l.active);
        }
        let delay = *self.scan_delay.lock().expect("mock poisoned");
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(l) = self.load.lock().expect("mock poisoned").get_mut(url) {
            l.active -= 1;
        }
        if let Some(msg) = self.failing_scans.lock().expect("mock poisoned").get(url) {
            bail!("{msg}");
        }
        Ok(self
            .listings
            .lock()
            .expect("mock poisoned")
            .get(url)
            .cloned()
            .unwrap_or_default())
    }

    async fn fetch_item(&self, url: &str) -> Result<ItemContent> {
        self.item_fetches
            .lock()
            .expect("mock poisoned")
            .push(url.to_string());
        if let Some(msg) = self.failing_items.lock().expect("mock poisoned").get(url) {
            bail!("{msg}");
        }
        let scripted = self.items.lock().expect("mock poisoned").get(url).cloned();
        Ok(scripted.unwrap_or_else(|| ItemContent {
            title: format!("Title {url}"),
            body: format!("Body of {url}"),
            images: Vec::new(),
            videos: Vec::new(),
        }))
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Prefixes text with `rewritten:`; records the last instruction it saw.
#[derive(Debug, Default)]
pub struct MockRewriter {
    failing: AtomicBool,
    calls: AtomicUsize,
    last_instruction: Mutex<Option<String>>,
    delay: Mutex<Duration>,
}

impl MockRewriter {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let r = Self::default();
        r.set_failing(true);
        r
    }

    pub fn set_failing(&self, on: bool) {
        self.failing.store(on, Ordering::SeqCst);
    }

    pub fn set_delay(&self, d: Duration) {
        *self.delay.lock().expect("mock poisoned") = d;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_instruction(&self) -> Option<String> {
        self.last_instruction.lock().expect("mock poisoned").clone()
    }
}

#[async_trait]
impl Rewriter for MockRewriter {
    async fn rewrite(&self, text: &str, instruction: Option<&str>) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_instruction.lock().expect("mock poisoned") = instruction.map(str::to_string);
        let delay = *self.delay.lock().expect("mock poisoned");
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("rewriter unavailable"));
        }
        Ok(format!("rewritten: {text}"))
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Records what was delivered. Failed deliveries are not recorded.
#[derive(Debug, Default)]
pub struct MockReview {
    failing: AtomicBool,
    submitted: Mutex<Vec<ArticleId>>,
    details: Mutex<Vec<ArticleId>>,
    notes: Mutex<Vec<(ArticleId, String)>>,
}

impl MockReview {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, on: bool) {
        self.failing.store(on, Ordering::SeqCst);
    }

    pub fn submitted(&self) -> Vec<ArticleId> {
        self.submitted.lock().expect("mock poisoned").clone()
    }

    pub fn details(&self) -> Vec<ArticleId> {
        self.details.lock().expect("mock poisoned").clone()
    }

    pub fn notes(&self) -> Vec<(ArticleId, String)> {
        self.notes.lock().expect("mock poisoned").clone()
    }
}

#[async_trait]
impl ReviewChannel for MockReview {
    async fn submit(&self, article: &Article) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("review channel down");
        }
        self.submitted
            .lock()
            .expect("mock poisoned")
            .push(article.id);
        Ok(())
    }

    async fn send_details(&self, article: &Article) -> Result<()> {
        self.details.lock().expect("mock poisoned").push(article.id);
        Ok(())
    }

    async fn notify(&self, article: &Article, message: &str) -> Result<()> {
        self.notes
            .lock()
            .expect("mock poisoned")
            .push((article.id, message.to_string()));
        Ok(())
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Returns `post-{id}`; can be switched into failure mode.
#[derive(Debug, Default)]
pub struct MockPublisher {
    failing: AtomicBool,
    calls: AtomicUsize,
    texts: Mutex<Vec<String>>,
}

impl MockPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, on: bool) {
        self.failing.store(on, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Final texts of successful publications.
    pub fn published_texts(&self) -> Vec<String> {
        self.texts.lock().expect("mock poisoned").clone()
    }
}

#[async_trait]
impl PublishTarget for MockPublisher {
    async fn publish(&self, article: &Article) -> Result<Published> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            bail!("cms returned 502");
        }
        self.texts
            .lock()
            .expect("mock poisoned")
            .push(article.final_text().to_string());
        Ok(Published {
            id: format!("post-{}", article.id),
            url: Some(format!("https://cms.test/?p={}", article.id)),
        })
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
