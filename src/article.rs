// src/article.rs
//! Article record and its status vocabulary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::registry::SourceId;

pub type ArticleId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArticleStatus {
    Scraped,
    Rewritten,
    UnderReview,
    Edited,
    Approved,
    Rejected,
    Published,
    Failed,
}

impl ArticleStatus {
    /// `published`, `rejected` and `failed` accept no further review decisions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ArticleStatus::Published | ArticleStatus::Rejected | ArticleStatus::Failed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ArticleStatus::Scraped => "scraped",
            ArticleStatus::Rewritten => "rewritten",
            ArticleStatus::UnderReview => "under_review",
            ArticleStatus::Edited => "edited",
            ArticleStatus::Approved => "approved",
            ArticleStatus::Rejected => "rejected",
            ArticleStatus::Published => "published",
            ArticleStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ArticleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewVerdict {
    Approved,
    Rejected,
    Edited,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReviewMeta {
    pub reviewer: Option<String>,
    pub decided_at: Option<DateTime<Utc>>,
    pub verdict: Option<ReviewVerdict>,
}

/// Data captured by the fetcher for one item, before it becomes an Article.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewArticle {
    pub source_id: Option<SourceId>,
    pub key: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub videos: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub id: ArticleId,
    pub source_id: Option<SourceId>,
    /// Canonical URL; unique across all articles.
    pub key: String,
    pub title: String,
    pub content: String,
    pub images: Vec<String>,
    pub videos: Vec<String>,
    pub rewritten: Option<String>,
    /// Set when the last rewrite attempt failed and raw content stands in.
    #[serde(default)]
    pub rewrite_degraded: bool,
    pub status: ArticleStatus,
    pub publish_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub review: ReviewMeta,
    #[serde(default)]
    pub edit_rounds: u32,
    pub failure: Option<String>,
}

impl Article {
    pub fn from_new(id: ArticleId, new: NewArticle, now: DateTime<Utc>) -> Self {
        Self {
            id,
            source_id: new.source_id,
            key: new.key,
            title: new.title,
            content: new.content,
            images: new.images,
            videos: new.videos,
            rewritten: None,
            rewrite_degraded: false,
            status: ArticleStatus::Scraped,
            publish_id: None,
            created_at: now,
            updated_at: now,
            review: ReviewMeta::default(),
            edit_rounds: 0,
            failure: None,
        }
    }

    /// Text that goes to review and publication: rewritten if present, raw otherwise.
    pub fn final_text(&self) -> &str {
        self.rewritten.as_deref().unwrap_or(&self.content)
    }

    pub fn was_approved(&self) -> bool {
        self.review.verdict == Some(ReviewVerdict::Approved)
    }
}
