// src/publish.rs
//! Publish Target boundary: WordPress REST and a demo target for local runs.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::article::Article;
use crate::config::{resolve_secret, PublishConfig, WordPressConfig};

/// Images embedded into a published post.
const MAX_POST_IMAGES: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Published {
    pub id: String,
    pub url: Option<String>,
}

#[async_trait]
pub trait PublishTarget: Send + Sync {
    async fn publish(&self, article: &Article) -> Result<Published>;
    fn name(&self) -> &'static str;
}

pub type DynPublisher = Arc<dyn PublishTarget>;

/// WordPress when configured and credentials resolve, demo otherwise.
pub fn build_publisher(cfg: &PublishConfig) -> DynPublisher {
    let Some(wp) = &cfg.wordpress else {
        return Arc::new(DemoPublisher);
    };
    match WordPressPublisher::from_config(wp) {
        Ok(p) => Arc::new(p),
        Err(e) => {
            tracing::warn!(error = %e, "wordpress not configured; using demo publisher");
            Arc::new(DemoPublisher)
        }
    }
}

/// Accepts everything and returns a synthetic post id.
pub struct DemoPublisher;

#[async_trait]
impl PublishTarget for DemoPublisher {
    async fn publish(&self, article: &Article) -> Result<Published> {
        tracing::info!(target: "publish", id = article.id, title = %article.title, "demo publish");
        Ok(Published {
            id: format!("demo-post-{}", article.id),
            url: None,
        })
    }

    fn name(&self) -> &'static str {
        "demo"
    }
}

pub struct WordPressPublisher {
    client: Client,
    endpoint: String,
    username: String,
    app_password: String,
    author_id: u64,
}

impl WordPressPublisher {
    pub fn from_config(cfg: &WordPressConfig) -> Result<Self> {
        if cfg.site_url.trim().is_empty() {
            bail!("wordpress site_url is empty");
        }
        let app_password = resolve_secret(&cfg.app_password, "WORDPRESS_APP_PASSWORD")?;
        let client = Client::builder()
            .user_agent("newsflow/0.1")
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("building wordpress client")?;
        Ok(Self {
            client,
            endpoint: format!(
                "{}/wp-json/wp/v2/posts",
                cfg.site_url.trim().trim_end_matches('/')
            ),
            username: cfg.username.clone(),
            app_password,
            author_id: cfg.author_id,
        })
    }
}

/// HTML body of a post: paragraphs, then up to three images and the video links.
pub fn post_html(article: &Article) -> String {
    let mut html: String = article
        .final_text()
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| format!("<p>{}</p>\n", html_escape::encode_text(p)))
        .collect();
    for src in article.images.iter().take(MAX_POST_IMAGES) {
        html.push_str(&format!(
            "<figure><img src=\"{}\" alt=\"{}\"></figure>\n",
            html_escape::encode_double_quoted_attribute(src),
            html_escape::encode_double_quoted_attribute(&article.title),
        ));
    }
    if !article.videos.is_empty() {
        html.push_str("<h3>Video</h3>\n");
        for v in &article.videos {
            html.push_str(&format!(
                "<p><a href=\"{0}\">{0}</a></p>\n",
                html_escape::encode_double_quoted_attribute(v)
            ));
        }
    }
    html
}

#[async_trait]
impl PublishTarget for WordPressPublisher {
    async fn publish(&self, article: &Article) -> Result<Published> {
        #[derive(Serialize)]
        struct Post<'a> {
            title: &'a str,
            content: String,
            status: &'a str,
            author: u64,
        }
        #[derive(Deserialize)]
        struct Created {
            id: u64,
            link: Option<String>,
        }

        let post = Post {
            title: &article.title,
            content: post_html(article),
            status: "publish",
            author: self.author_id,
        };
        let created: Created = self
            .client
            .post(&self.endpoint)
            .basic_auth(&self.username, Some(&self.app_password))
            .json(&post)
            .send()
            .await
            .context("wordpress post")?
            .error_for_status()
            .context("wordpress non-2xx")?
            .json()
            .await
            .context("wordpress response json")?;
        Ok(Published {
            id: created.id.to_string(),
            url: created.link,
        })
    }

    fn name(&self) -> &'static str {
        "wordpress"
    }
}
