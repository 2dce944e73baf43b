// src/review/mod.rs
//! Review Channel boundary and the fixed review action vocabulary.

pub mod telegram;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::article::{Article, ArticleId};

/// How an `edit` decision changes the text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditRequest {
    /// Re-run the rewriter with this instruction.
    Instruction(String),
    /// Replace the text verbatim.
    Manual(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewAction {
    Approve,
    Reject,
    Edit(EditRequest),
    RequestDetails,
}

impl ReviewAction {
    /// Build from the loose wire shape used by the HTTP surface.
    pub fn from_parts(
        action: &str,
        instruction: Option<String>,
        manual_text: Option<String>,
    ) -> Result<Self, String> {
        match action.trim().to_ascii_lowercase().as_str() {
            "approve" => Ok(ReviewAction::Approve),
            "reject" => Ok(ReviewAction::Reject),
            "request_details" | "details" => Ok(ReviewAction::RequestDetails),
            "edit" => {
                let manual = manual_text.filter(|t| !t.trim().is_empty());
                let instr = instruction.filter(|t| !t.trim().is_empty());
                match (manual, instr) {
                    (Some(text), None) => Ok(ReviewAction::Edit(EditRequest::Manual(text))),
                    (None, Some(i)) => Ok(ReviewAction::Edit(EditRequest::Instruction(i))),
                    (Some(_), Some(_)) => {
                        Err("edit takes either instruction or manual_text, not both".into())
                    }
                    (None, None) => Err("edit needs instruction or manual_text".into()),
                }
            }
            other => Err(format!("unknown action {other:?}")),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ReviewAction::Approve => "approve",
            ReviewAction::Reject => "reject",
            ReviewAction::Edit(EditRequest::Instruction(_)) => "edit_instruction",
            ReviewAction::Edit(EditRequest::Manual(_)) => "edit_manual",
            ReviewAction::RequestDetails => "request_details",
        }
    }
}

/// Canned rewrite instructions offered next to free-text edits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditPreset {
    Improve,
    NewsStyle,
    Shorten,
    Expand,
}

impl EditPreset {
    pub const ALL: [EditPreset; 4] = [
        EditPreset::Improve,
        EditPreset::NewsStyle,
        EditPreset::Shorten,
        EditPreset::Expand,
    ];

    pub fn code(self) -> &'static str {
        match self {
            EditPreset::Improve => "improve",
            EditPreset::NewsStyle => "news_style",
            EditPreset::Shorten => "shorten",
            EditPreset::Expand => "expand",
        }
    }

    pub fn from_code(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.code() == s)
    }

    pub fn label(self) -> &'static str {
        match self {
            EditPreset::Improve => "Improve wording",
            EditPreset::NewsStyle => "News style",
            EditPreset::Shorten => "Shorten",
            EditPreset::Expand => "Expand",
        }
    }

    pub fn instruction(self) -> &'static str {
        match self {
            EditPreset::Improve => {
                "Improve this text, keeping all information but making it clearer and more professional."
            }
            EditPreset::NewsStyle => {
                "Rewrite this text in a professional news style, keeping every fact."
            }
            EditPreset::Shorten => {
                "Shorten this text to about 60% of its length, keeping the key information."
            }
            EditPreset::Expand => {
                "Expand this text with more detail and context, without inventing new facts."
            }
        }
    }
}

/// A reviewer's decision, keyed by article identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionEvent {
    pub article_id: ArticleId,
    pub action: ReviewAction,
    pub reviewer: Option<String>,
}

#[async_trait]
pub trait ReviewChannel: Send + Sync {
    /// Deliver an article for a human decision. Decisions come back asynchronously.
    async fn submit(&self, article: &Article) -> Result<()>;

    /// Answer a `request_details` action.
    async fn send_details(&self, article: &Article) -> Result<()>;

    /// Best-effort status note (published, failed, rejected).
    async fn notify(&self, _article: &Article, _message: &str) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str;
}

pub type DynReviewChannel = Arc<dyn ReviewChannel>;

/// Channel used when no chat integration is configured; reviewers act through
/// the HTTP control surface instead.
pub struct ApiOnlyReview;

#[async_trait]
impl ReviewChannel for ApiOnlyReview {
    async fn submit(&self, article: &Article) -> Result<()> {
        tracing::info!(target: "review", id = article.id, title = %article.title, "awaiting review via API");
        Ok(())
    }

    async fn send_details(&self, article: &Article) -> Result<()> {
        tracing::info!(target: "review", id = article.id, status = %article.status, "details requested");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "api"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_wire_actions() {
        assert_eq!(
            ReviewAction::from_parts("Approve", None, None).unwrap(),
            ReviewAction::Approve
        );
        assert_eq!(
            ReviewAction::from_parts("edit", Some("shorter".into()), None).unwrap(),
            ReviewAction::Edit(EditRequest::Instruction("shorter".into()))
        );
        assert_eq!(
            ReviewAction::from_parts("edit", None, Some("new text".into())).unwrap(),
            ReviewAction::Edit(EditRequest::Manual("new text".into()))
        );
        assert!(ReviewAction::from_parts("edit", None, None).is_err());
        assert!(ReviewAction::from_parts("edit", Some("a".into()), Some("b".into())).is_err());
        assert!(ReviewAction::from_parts("publish", None, None).is_err());
    }

    #[test]
    fn presets_round_trip_codes() {
        for p in EditPreset::ALL {
            assert_eq!(EditPreset::from_code(p.code()), Some(p));
        }
        assert_eq!(EditPreset::from_code("nope"), None);
    }
}
