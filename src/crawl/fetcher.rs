// src/crawl/fetcher.rs
//! Content Fetcher boundary: homepage scans and single-item fetches.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use metrics::histogram;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use url::Url;

/// One entry of a listing page; position 0 is the most prominent (newest).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateItem {
    pub key: String,
    pub position: usize,
    pub title: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemContent {
    pub title: String,
    pub body: String,
    pub images: Vec<String>,
    pub videos: Vec<String>,
}

#[async_trait]
pub trait ContentFetcher: Send + Sync {
    /// Ordered candidates from a source's listing page.
    async fn scan(&self, url: &str) -> Result<Vec<CandidateItem>>;
    /// Structured content of a single item.
    async fn fetch_item(&self, url: &str) -> Result<ItemContent>;
    fn name(&self) -> &'static str;
}

const MAX_LINKS: usize = 20;
const MAX_IMAGES: usize = 5;
const MAX_VIDEOS: usize = 3;

const LINK_SELECTOR: &str = "article a[href], .article a[href], .news a[href], .post a[href], \
     .entry a[href], h1 a[href], h2 a[href], h3 a[href], .latest-news a[href], \
     .news-item a[href], .story a[href], .headline a[href], a[href*=\"/article/\"], \
     a[href*=\"/news/\"], a[href*=\"/lajme/\"], a[href*=\"/aktualitet/\"]";

const EXCLUDED_LINK_PARTS: &[&str] = &[
    "/category/", "/tag/", "/author/", "/search/", "/contact/", "/about/", "/privacy/",
    "/terms/", ".pdf", ".jpg", ".png", ".gif", ".mp4", ".mp3", "mailto:", "tel:",
    "facebook.com", "twitter.com", "instagram.com", "youtube.com", "#comment",
];

static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("ws regex"));

fn selector(s: &str) -> Result<Selector> {
    Selector::parse(s).map_err(|e| anyhow!("bad selector {s:?}: {e}"))
}

/// Decode entities and collapse whitespace.
pub fn clean_text(s: &str) -> String {
    let decoded = html_escape::decode_html_entities(s);
    RE_WS.replace_all(&decoded, " ").trim().to_string()
}

fn is_news_link(href: &str, base: &Url) -> bool {
    let lower = href.to_ascii_lowercase();
    if lower.is_empty() || lower.starts_with('#') || lower.starts_with("javascript:") {
        return false;
    }
    if EXCLUDED_LINK_PARTS.iter().any(|p| lower.contains(p)) {
        return false;
    }
    if lower.starts_with("http") {
        return base.host_str().is_some_and(|h| lower.contains(h));
    }
    true
}

/// Extract candidate links in document order, deduplicated, capped at 20.
pub fn extract_candidates(html: &str, base_url: &str) -> Result<Vec<CandidateItem>> {
    let base = Url::parse(base_url).with_context(|| format!("base url {base_url}"))?;
    let doc = Html::parse_document(html);
    let links = selector(LINK_SELECTOR)?;

    let mut out: Vec<CandidateItem> = Vec::new();
    for a in doc.select(&links) {
        let Some(href) = a.value().attr("href") else {
            continue;
        };
        if !is_news_link(href, &base) {
            continue;
        }
        let Ok(mut full) = base.join(href) else {
            continue;
        };
        full.set_fragment(None);
        let key = full.to_string();
        if key == base.as_str() || out.iter().any(|c| c.key == key) {
            continue;
        }
        out.push(CandidateItem {
            position: out.len(),
            title: clean_text(&a.text().collect::<String>()),
            key,
        });
        if out.len() >= MAX_LINKS {
            break;
        }
    }
    Ok(out)
}

/// Extract title, body paragraphs and media links from an article page.
pub fn extract_item(html: &str, page_url: &str) -> Result<ItemContent> {
    let base = Url::parse(page_url).with_context(|| format!("page url {page_url}"))?;
    let doc = Html::parse_document(html);

    let og_title = selector(r#"meta[property="og:title"]"#)?;
    let h1 = selector("h1")?;
    let title_tag = selector("title")?;
    let title = doc
        .select(&og_title)
        .find_map(|m| m.value().attr("content").map(clean_text))
        .filter(|t| !t.is_empty())
        .or_else(|| {
            doc.select(&h1)
                .map(|e| clean_text(&e.text().collect::<String>()))
                .find(|t| !t.is_empty())
        })
        .or_else(|| {
            doc.select(&title_tag)
                .map(|e| clean_text(&e.text().collect::<String>()))
                .find(|t| !t.is_empty())
        })
        .unwrap_or_default();

    let article_p = selector("article p, .entry-content p, .post-content p, .article-body p")?;
    let any_p = selector("p")?;
    let mut paragraphs: Vec<String> = doc
        .select(&article_p)
        .map(|p| clean_text(&p.text().collect::<String>()))
        .filter(|t| t.chars().count() >= 40)
        .collect();
    if paragraphs.is_empty() {
        paragraphs = doc
            .select(&any_p)
            .map(|p| clean_text(&p.text().collect::<String>()))
            .filter(|t| t.chars().count() >= 40)
            .collect();
    }
    let body = paragraphs.join("\n\n");
    if body.is_empty() {
        return Err(anyhow!("no article text found at {page_url}"));
    }

    let og_image = selector(r#"meta[property="og:image"]"#)?;
    let imgs = selector("article img[src], .entry-content img[src]")?;
    let mut images: Vec<String> = Vec::new();
    let candidates = doc
        .select(&og_image)
        .filter_map(|m| m.value().attr("content"))
        .chain(doc.select(&imgs).filter_map(|i| i.value().attr("src")));
    for src in candidates {
        let Ok(abs) = base.join(src) else { continue };
        let s = abs.to_string();
        let lower = s.to_ascii_lowercase();
        let is_image = [".jpg", ".jpeg", ".png", ".webp"]
            .iter()
            .any(|ext| lower.contains(ext));
        if is_image && !lower.contains("logo") && !lower.contains("icon") && !images.contains(&s)
        {
            images.push(s);
        }
        if images.len() >= MAX_IMAGES {
            break;
        }
    }

    let iframes = selector("iframe[src]")?;
    let mut videos: Vec<String> = Vec::new();
    for f in doc.select(&iframes) {
        let Some(src) = f.value().attr("src") else { continue };
        if (src.contains("youtube") || src.contains("vimeo")) && !videos.iter().any(|v| v == src)
        {
            videos.push(src.to_string());
        }
        if videos.len() >= MAX_VIDEOS {
            break;
        }
    }

    Ok(ItemContent {
        title,
        body,
        images,
        videos,
    })
}

/// Plain HTTP fetcher. Timeouts are applied by the caller.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("Mozilla/5.0 (compatible; newsflow/0.1)")
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()
            .context("building http client")?;
        Ok(Self { client })
    }

    async fn get_text(&self, url: &str) -> Result<String> {
        let t0 = std::time::Instant::now();
        let body = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("GET {url}"))?
            .error_for_status()
            .with_context(|| format!("GET {url} non-2xx"))?
            .text()
            .await
            .with_context(|| format!("reading body of {url}"))?;
        histogram!("fetch_duration_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        Ok(body)
    }
}

#[async_trait]
impl ContentFetcher for HttpFetcher {
    async fn scan(&self, url: &str) -> Result<Vec<CandidateItem>> {
        let html = self.get_text(url).await?;
        extract_candidates(&html, url)
    }

    async fn fetch_item(&self, url: &str) -> Result<ItemContent> {
        let html = self.get_text(url).await?;
        extract_item(&html, url)
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOME: &str = r##"
        <html><body>
          <nav><a href="/category/politics/">Politics</a></nav>
          <article><h2><a href="/news/first-story">First &amp; newest</a></h2></article>
          <article><h2><a href="https://news.test/news/second-story#top">Second</a></h2></article>
          <div class="news"><a href="https://other.test/news/x">Elsewhere</a></div>
          <article><a href="/news/first-story">First again</a></article>
          <h3><a href="javascript:void(0)">noop</a></h3>
          <h3><a href="/news/third-story">Third</a></h3>
        </body></html>
    "##;

    #[test]
    fn candidates_keep_page_order_and_filter() {
        let c = extract_candidates(HOME, "https://news.test/").unwrap();
        let keys: Vec<_> = c.iter().map(|c| c.key.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "https://news.test/news/first-story",
                "https://news.test/news/second-story",
                "https://news.test/news/third-story",
            ]
        );
        assert_eq!(c[0].title, "First & newest");
        assert_eq!(c[2].position, 2);
    }

    #[test]
    fn item_extraction_reads_title_body_and_media() {
        let html = r#"
            <html><head>
              <meta property="og:title" content="  Big   headline ">
              <meta property="og:image" content="/img/photo.jpg">
            </head><body><article>
              <p>This is the first paragraph of the article, long enough to keep.</p>
              <p>short</p>
              <p>Second paragraph that also carries enough characters to survive.</p>
              <img src="/img/logo.png">
              <iframe src="https://www.youtube.com/embed/abc"></iframe>
            </article></body></html>
        "#;
        let item = extract_item(html, "https://news.test/news/a").unwrap();
        assert_eq!(item.title, "Big headline");
        assert_eq!(item.body.split("\n\n").count(), 2);
        assert_eq!(item.images, vec!["https://news.test/img/photo.jpg"]);
        assert_eq!(item.videos, vec!["https://www.youtube.com/embed/abc"]);
    }

    #[test]
    fn empty_page_is_an_error() {
        assert!(extract_item("<html></html>", "https://news.test/a").is_err());
    }
}
