// src/lifecycle/mod.rs
//! Lifecycle State Machine.
//!
//! ```text
//! scraped -> rewritten -> under_review -> approved -> published
//!                              |    ^          \-> failed (manual retry)
//!                              |    |
//!                              |    edited
//!                              \-> rejected
//! ```
//!
//! Status changes that race with reviewer decisions go through the store's
//! compare-and-set `transition`, so at most one `approve` reaches the publisher.

use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::article::{Article, ArticleId, ArticleStatus, NewArticle, ReviewMeta, ReviewVerdict};
use crate::cancel::Cancel;
use crate::config::{LifecycleConfig, TimeoutConfig};
use crate::error::ControlError;
use crate::publish::DynPublisher;
use crate::review::{DecisionEvent, DynReviewChannel, EditRequest, ReviewAction};
use crate::rewrite::DynRewriter;
use crate::stage::{bounded, error_text, Stage};
use crate::store::{DynStore, Inserted};

use ArticleStatus::*;

const MAX_FAILURE_LEN: usize = 500;
const REVIEW_SUBMIT_FAILED: &str = "review submit failed";
const EDIT_LIMIT_REACHED: &str = "edit limit reached";

/// States in which a reviewer decision is accepted. `edited` is excluded: an
/// edit is still producing the text the reviewer has not seen yet.
const REVIEWABLE: &[ArticleStatus] = &[UnderReview];

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DecisionOutcome {
    Applied { article: Article },
    /// Late or duplicate decision; nothing changed.
    Ignored { status: ArticleStatus },
}

pub struct Lifecycle {
    store: DynStore,
    rewriter: DynRewriter,
    review: DynReviewChannel,
    publisher: DynPublisher,
    timeouts: TimeoutConfig,
    max_edit_rounds: Option<u32>,
}

impl Lifecycle {
    pub fn new(
        store: DynStore,
        rewriter: DynRewriter,
        review: DynReviewChannel,
        publisher: DynPublisher,
        timeouts: TimeoutConfig,
        cfg: &LifecycleConfig,
    ) -> Self {
        Self {
            store,
            rewriter,
            review,
            publisher,
            timeouts,
            max_edit_rounds: cfg.max_edit_rounds,
        }
    }

    pub fn store(&self) -> &DynStore {
        &self.store
    }

    async fn load(&self, id: ArticleId) -> Result<Article, ControlError> {
        self.store
            .get(id)
            .await?
            .ok_or(ControlError::ArticleNotFound(id))
    }

    async fn modify(
        &self,
        id: ArticleId,
        f: impl FnOnce(&mut Article) + Send + 'static,
    ) -> Result<Article, ControlError> {
        self.store
            .update(id, Box::new(f))
            .await?
            .ok_or(ControlError::ArticleNotFound(id))
    }

    /// Idempotent ingestion: a known key returns the stored article untouched.
    pub async fn intake(&self, new: NewArticle) -> anyhow::Result<Inserted> {
        let ins = self.store.create_article_if_absent(new).await?;
        if ins.created {
            counter!("articles_created_total").increment(1);
            tracing::info!(target: "lifecycle", id = ins.article.id, key = %ins.article.key, "article created");
        }
        Ok(ins)
    }

    /// Rewrite, then hand to review. Stops before review if `cancel` fired
    /// while the rewrite was in flight.
    pub async fn advance_new(&self, id: ArticleId, cancel: &Cancel) -> Result<Article, ControlError> {
        let article = self.rewrite_stage(id).await?;
        if cancel.is_cancelled() || article.status != Rewritten {
            return Ok(article);
        }
        self.submit_for_review(id).await
    }

    async fn run_rewriter(
        &self,
        id: ArticleId,
        text: &str,
        instruction: Option<&str>,
    ) -> Result<String, String> {
        let res = bounded(
            Stage::Rewrite,
            self.timeouts.rewrite(),
            self.rewriter.rewrite(text, instruction),
        )
        .await;
        res.map_err(|e| {
            counter!("rewrite_degraded_total").increment(1);
            tracing::warn!(target: "lifecycle", id, rewriter = self.rewriter.name(), error = %e, "rewrite failed; keeping current text");
            error_text(&e, MAX_FAILURE_LEN)
        })
    }

    /// `scraped -> rewritten`. A failed rewrite still advances, flagged as
    /// degraded with the raw content standing in.
    pub async fn rewrite_stage(&self, id: ArticleId) -> Result<Article, ControlError> {
        let article = self.load(id).await?;
        if article.status != Scraped {
            return Ok(article);
        }
        let res = self.run_rewriter(id, &article.content, None).await;
        self.modify(id, move |a| {
            if a.status != Scraped {
                return;
            }
            match res {
                Ok(text) => {
                    a.rewritten = Some(text);
                    a.rewrite_degraded = false;
                }
                Err(e) => {
                    a.rewrite_degraded = true;
                    a.failure = Some(format!("rewrite failed: {e}"));
                }
            }
            a.status = Rewritten;
        })
        .await
    }

    /// Move to `under_review` and deliver to the review channel. A failed
    /// delivery is recorded on the article; the article stays reviewable
    /// through the control surface and can be re-sent.
    pub async fn submit_for_review(&self, id: ArticleId) -> Result<Article, ControlError> {
        let Some(article) = self
            .store
            .transition(id, &[Rewritten, Edited, UnderReview], UnderReview)
            .await?
        else {
            let status = self.load(id).await?.status;
            return Err(ControlError::InvalidTransition {
                id,
                status,
                reason: "not ready for review",
            });
        };

        let sent = bounded(
            Stage::Review,
            self.timeouts.review(),
            self.review.submit(&article),
        )
        .await;
        match sent {
            Ok(()) => {
                tracing::info!(target: "lifecycle", id, channel = self.review.name(), degraded = article.rewrite_degraded, "sent for review");
                if article
                    .failure
                    .as_deref()
                    .is_some_and(|f| f.starts_with(REVIEW_SUBMIT_FAILED))
                {
                    return self.modify(id, |a| a.failure = None).await;
                }
                Ok(article)
            }
            Err(e) => {
                counter!("review_submit_errors_total").increment(1);
                tracing::warn!(target: "lifecycle", id, channel = self.review.name(), error = %e, "review submit failed");
                let detail = format!("{REVIEW_SUBMIT_FAILED}: {}", error_text(&e, MAX_FAILURE_LEN));
                self.modify(id, move |a| a.failure = Some(detail)).await
            }
        }
    }

    /// Apply one reviewer decision. Decisions for terminal articles and
    /// repeated approvals are no-ops.
    pub async fn decide(&self, ev: DecisionEvent) -> Result<DecisionOutcome, ControlError> {
        let DecisionEvent {
            article_id: id,
            action,
            reviewer,
        } = ev;
        let current = self.load(id).await?;
        if current.status.is_terminal() {
            return Ok(self.ignored(id, action.name(), current.status));
        }
        tracing::info!(target: "lifecycle", id, action = action.name(), reviewer = reviewer.as_deref().unwrap_or("-"), "decision");
        match action {
            ReviewAction::Approve => self.approve(id, reviewer).await,
            ReviewAction::Reject => self.reject(id, reviewer).await,
            ReviewAction::Edit(req) => self.edit(id, req, reviewer).await,
            ReviewAction::RequestDetails => {
                let sent = bounded(
                    Stage::Review,
                    self.timeouts.review(),
                    self.review.send_details(&current),
                )
                .await;
                if let Err(e) = sent {
                    tracing::warn!(target: "lifecycle", id, error = %e, "details not delivered");
                }
                Ok(DecisionOutcome::Applied { article: current })
            }
        }
    }

    fn ignored(&self, id: ArticleId, action: &'static str, status: ArticleStatus) -> DecisionOutcome {
        counter!("decisions_ignored_total").increment(1);
        tracing::debug!(target: "lifecycle", id, action, %status, "decision ignored");
        DecisionOutcome::Ignored { status }
    }

    /// The compare-and-set lost: a late duplicate, a decision racing an edit, or
    /// a decision for an article that never reached review.
    async fn lost_claim(
        &self,
        id: ArticleId,
        action: &'static str,
    ) -> Result<DecisionOutcome, ControlError> {
        let status = self.load(id).await?.status;
        if status.is_terminal() || status == Approved {
            return Ok(self.ignored(id, action, status));
        }
        Err(ControlError::InvalidTransition {
            id,
            status,
            reason: if status == Edited {
                "edit in progress"
            } else {
                "not under review"
            },
        })
    }

    async fn record_verdict(
        &self,
        id: ArticleId,
        reviewer: Option<String>,
        verdict: ReviewVerdict,
    ) -> Result<Article, ControlError> {
        self.modify(id, move |a| {
            a.review = ReviewMeta {
                reviewer,
                decided_at: Some(Utc::now()),
                verdict: Some(verdict),
            };
        })
        .await
    }

    async fn approve(
        &self,
        id: ArticleId,
        reviewer: Option<String>,
    ) -> Result<DecisionOutcome, ControlError> {
        if self.store.transition(id, REVIEWABLE, Approved).await?.is_none() {
            return self.lost_claim(id, "approve").await;
        }
        let article = self
            .record_verdict(id, reviewer, ReviewVerdict::Approved)
            .await?;
        let article = self.publish_stage(article).await?;
        Ok(DecisionOutcome::Applied { article })
    }

    async fn reject(
        &self,
        id: ArticleId,
        reviewer: Option<String>,
    ) -> Result<DecisionOutcome, ControlError> {
        if self.store.transition(id, REVIEWABLE, Rejected).await?.is_none() {
            return self.lost_claim(id, "reject").await;
        }
        let article = self
            .record_verdict(id, reviewer, ReviewVerdict::Rejected)
            .await?;
        self.notify(&article, "rejected").await;
        Ok(DecisionOutcome::Applied { article })
    }

    async fn edit(
        &self,
        id: ArticleId,
        req: EditRequest,
        reviewer: Option<String>,
    ) -> Result<DecisionOutcome, ControlError> {
        let Some(claimed) = self.store.transition(id, REVIEWABLE, Edited).await? else {
            return self.lost_claim(id, "edit").await;
        };

        if let Some(max) = self.max_edit_rounds {
            if claimed.edit_rounds >= max {
                tracing::warn!(target: "lifecycle", id, rounds = claimed.edit_rounds, "edit limit reached");
                let article = self
                    .modify(id, |a| {
                        if a.status != Edited {
                            return;
                        }
                        a.status = Failed;
                        a.failure = Some(EDIT_LIMIT_REACHED.to_string());
                    })
                    .await?;
                if article.status != Failed {
                    return Ok(self.ignored(id, "edit", article.status));
                }
                self.notify(&article, EDIT_LIMIT_REACHED).await;
                return Ok(DecisionOutcome::Applied { article });
            }
        }

        let res = match req {
            EditRequest::Manual(text) => Ok(text.trim().to_string()),
            EditRequest::Instruction(instr) => {
                self.run_rewriter(id, claimed.final_text(), Some(instr.as_str()))
                    .await
            }
        };
        // The article may have been re-sent and decided while the rewriter ran;
        // the late edit result is then dropped.
        let updated = self
            .modify(id, move |a| {
                if a.status != Edited {
                    return;
                }
                a.edit_rounds += 1;
                a.review = ReviewMeta {
                    reviewer,
                    decided_at: Some(Utc::now()),
                    verdict: Some(ReviewVerdict::Edited),
                };
                match res {
                    Ok(text) => {
                        a.rewritten = Some(text);
                        a.rewrite_degraded = false;
                        a.failure = None;
                    }
                    Err(e) => a.failure = Some(format!("rewrite failed: {e}")),
                }
            })
            .await?;
        if updated.status != Edited {
            tracing::warn!(target: "lifecycle", id, status = %updated.status, "edit result dropped");
            return Ok(self.ignored(id, "edit", updated.status));
        }

        let article = self.submit_for_review(id).await?;
        Ok(DecisionOutcome::Applied { article })
    }

    /// `approved -> published | failed`. The caller must hold the `approved` claim.
    async fn publish_stage(&self, article: Article) -> Result<Article, ControlError> {
        let id = article.id;
        let res = bounded(
            Stage::Publish,
            self.timeouts.publish(),
            self.publisher.publish(&article),
        )
        .await;
        let (updated, note) = match res {
            Ok(p) => {
                counter!("publish_success_total").increment(1);
                tracing::info!(target: "publish", id, target_name = self.publisher.name(), publish_id = %p.id, "published");
                let note = match &p.url {
                    Some(url) => format!("published: {url}"),
                    None => format!("published as {}", p.id),
                };
                let updated = self
                    .modify(id, move |a| {
                        a.status = Published;
                        a.publish_id = Some(p.id);
                        a.failure = None;
                    })
                    .await?;
                (updated, note)
            }
            Err(e) => {
                counter!("publish_failures_total").increment(1);
                tracing::warn!(target: "publish", id, target_name = self.publisher.name(), error = %e, "publish failed");
                let note = format!("publish failed: {}", error_text(&e, MAX_FAILURE_LEN));
                let detail = note.clone();
                let updated = self
                    .modify(id, move |a| {
                        a.status = Failed;
                        a.failure = Some(detail);
                    })
                    .await?;
                (updated, note)
            }
        };
        self.notify(&updated, &note).await;
        Ok(updated)
    }

    async fn notify(&self, article: &Article, message: &str) {
        let sent = bounded(
            Stage::Review,
            self.timeouts.review(),
            self.review.notify(article, message),
        )
        .await;
        if let Err(e) = sent {
            tracing::debug!(target: "lifecycle", id = article.id, error = %e, "status note not delivered");
        }
    }

    /// Manual re-trigger for an approved article whose publication failed.
    pub async fn retry_publish(&self, id: ArticleId) -> Result<Article, ControlError> {
        let article = self.load(id).await?;
        if !article.was_approved() {
            return Err(ControlError::InvalidTransition {
                id,
                status: article.status,
                reason: "article was never approved",
            });
        }
        let Some(claimed) = self.store.transition(id, &[Failed], Approved).await? else {
            let status = self.load(id).await?.status;
            return Err(ControlError::InvalidTransition {
                id,
                status,
                reason: "only failed publications can be retried",
            });
        };
        tracing::info!(target: "lifecycle", id, "retrying publish");
        self.publish_stage(claimed).await
    }

    /// Rewrite the raw content again, optionally with an instruction. Does not
    /// re-send to review.
    pub async fn manual_rewrite(
        &self,
        id: ArticleId,
        instruction: Option<String>,
    ) -> Result<Article, ControlError> {
        let article = self.load(id).await?;
        if article.status.is_terminal() || article.status == Approved {
            return Err(ControlError::InvalidTransition {
                id,
                status: article.status,
                reason: "article is past review",
            });
        }
        let res = self
            .run_rewriter(id, &article.content, instruction.as_deref())
            .await;
        self.modify(id, move |a| {
            if a.status.is_terminal() || a.status == Approved {
                return;
            }
            match res {
                Ok(text) => {
                    a.rewritten = Some(text);
                    a.rewrite_degraded = false;
                    a.failure = None;
                }
                Err(e) => {
                    a.rewrite_degraded = a.rewritten.is_none();
                    a.failure = Some(format!("rewrite failed: {e}"));
                }
            }
            if a.status == Scraped {
                a.status = Rewritten;
            }
        })
        .await
    }

    /// Deliver to review again, rewriting first if the article never got that far.
    pub async fn resend_review(&self, id: ArticleId) -> Result<Article, ControlError> {
        if self.load(id).await?.status == Scraped {
            self.rewrite_stage(id).await?;
        }
        self.submit_for_review(id).await
    }

    /// Consume decision events in arrival order until `cancel` fires or every
    /// sender is gone.
    pub async fn run_decisions(
        self: Arc<Self>,
        mut rx: mpsc::Receiver<DecisionEvent>,
        mut cancel: Cancel,
    ) {
        loop {
            let ev = tokio::select! {
                _ = cancel.cancelled() => break,
                ev = rx.recv() => ev,
            };
            let Some(ev) = ev else { break };
            let id = ev.article_id;
            if let Err(e) = self.decide(ev).await {
                tracing::warn!(target: "lifecycle", id, error = %e, "decision rejected");
            }
        }
        tracing::info!(target: "lifecycle", "decision loop stopped");
    }
}
