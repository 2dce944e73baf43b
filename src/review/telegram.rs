// src/review/telegram.rs
//! Telegram review channel: articles go out as messages with an inline keyboard,
//! decisions come back through a getUpdates long-poll loop.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{DecisionEvent, EditPreset, EditRequest, ReviewAction, ReviewChannel};
use crate::article::{Article, ArticleId};
use crate::cancel::Cancel;
use crate::config::{resolve_secret, TelegramConfig};

/// Telegram rejects longer messages.
pub const MAX_MESSAGE_CHARS: usize = 4096;

const RETRY_AFTER_ERROR: Duration = Duration::from_secs(5);

/// Parsed inline-button payload (`<verb>:<article id>`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Callback {
    Decision(ArticleId, ReviewAction),
    /// Show the edit preset keyboard; not a decision by itself.
    EditMenu(ArticleId),
}

pub fn parse_callback(data: &str) -> Option<Callback> {
    let (verb, id) = data.split_once(':')?;
    let id: ArticleId = id.trim().parse().ok()?;
    let cb = match verb {
        "approve" => Callback::Decision(id, ReviewAction::Approve),
        "reject" => Callback::Decision(id, ReviewAction::Reject),
        "details" => Callback::Decision(id, ReviewAction::RequestDetails),
        "edit" => Callback::EditMenu(id),
        other => {
            let preset = EditPreset::from_code(other.strip_prefix("edit.")?)?;
            Callback::Decision(
                id,
                ReviewAction::Edit(EditRequest::Instruction(preset.instruction().to_string())),
            )
        }
    };
    Some(cb)
}

/// Text commands: `/edit <id> <replacement text>` and `/rewrite <id> <instruction>`.
pub fn parse_command(text: &str) -> Option<(ArticleId, ReviewAction)> {
    let text = text.trim();
    let (cmd, rest) = text.split_once(char::is_whitespace)?;
    let (id, body) = rest.trim_start().split_once(char::is_whitespace)?;
    let id: ArticleId = id.parse().ok()?;
    let body = body.trim();
    if body.is_empty() {
        return None;
    }
    let req = match cmd {
        "/edit" => EditRequest::Manual(body.to_string()),
        "/rewrite" => EditRequest::Instruction(body.to_string()),
        _ => return None,
    };
    Some((id, ReviewAction::Edit(req)))
}

fn escape(s: &str) -> String {
    html_escape::encode_text(s).into_owned()
}

/// Cut already-escaped text to `budget` chars without splitting an entity.
fn fit_escaped(escaped: String, budget: usize) -> String {
    if escaped.chars().count() <= budget {
        return escaped;
    }
    let mut cut: String = escaped.chars().take(budget.saturating_sub(1)).collect();
    if let Some(amp) = cut.rfind('&') {
        if !cut[amp..].contains(';') {
            cut.truncate(amp);
        }
    }
    cut.push('…');
    cut
}

pub fn review_message(article: &Article) -> String {
    let mut header = format!("<b>{}</b>\n", escape(&article.title));
    if article.rewrite_degraded {
        header.push_str("<i>(rewrite failed, original text)</i>\n");
    }
    if article.edit_rounds > 0 {
        header.push_str(&format!("<i>edit round {}</i>\n", article.edit_rounds));
    }
    header.push('\n');
    let footer = format!(
        "\n\n#{} · {} image(s) · {} video(s)\n{}",
        article.id,
        article.images.len(),
        article.videos.len(),
        escape(&article.key)
    );
    let budget = MAX_MESSAGE_CHARS
        .saturating_sub(header.chars().count())
        .saturating_sub(footer.chars().count());
    let body = fit_escaped(escape(article.final_text()), budget);
    format!("{header}{body}{footer}")
}

fn details_message(article: &Article) -> String {
    let preview: String = article.content.chars().take(300).collect();
    let mut out = format!(
        "<b>Details #{}</b>\nStatus: {}\nSource: {}\nCreated: {}\nEdit rounds: {}\n",
        article.id,
        article.status,
        escape(&article.key),
        article.created_at.format("%Y-%m-%d %H:%M UTC"),
        article.edit_rounds,
    );
    for img in &article.images {
        out.push_str(&format!("🖼 {}\n", escape(img)));
    }
    for v in &article.videos {
        out.push_str(&format!("🎬 {}\n", escape(v)));
    }
    out.push_str(&format!("\n<b>Original:</b>\n{}", escape(&preview)));
    fit_escaped(out, MAX_MESSAGE_CHARS)
}

fn button(text: &str, data: String) -> Value {
    json!({ "text": text, "callback_data": data })
}

fn decision_keyboard(id: ArticleId) -> Value {
    json!({
        "inline_keyboard": [
            [button("✅ Approve", format!("approve:{id}")), button("❌ Reject", format!("reject:{id}"))],
            [button("✏️ Edit", format!("edit:{id}")), button("ℹ️ Details", format!("details:{id}"))],
        ]
    })
}

fn preset_keyboard(id: ArticleId) -> Value {
    let rows: Vec<Value> = EditPreset::ALL
        .chunks(2)
        .map(|pair| {
            Value::Array(
                pair.iter()
                    .map(|p| button(p.label(), format!("edit.{}:{id}", p.code())))
                    .collect(),
            )
        })
        .collect();
    json!({ "inline_keyboard": rows })
}

#[derive(Debug, Deserialize)]
struct TgResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    callback_query: Option<CallbackQuery>,
    message: Option<Message>,
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    id: String,
    from: User,
    data: Option<String>,
    message: Option<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    chat: Chat,
    from: Option<User>,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct User {
    first_name: String,
    username: Option<String>,
}

impl User {
    fn display(&self) -> String {
        self.username
            .clone()
            .unwrap_or_else(|| self.first_name.clone())
    }
}

pub struct TelegramReview {
    client: Client,
    api: String,
    chat_id: String,
    poll_secs: u64,
}

impl TelegramReview {
    pub fn from_config(cfg: &TelegramConfig) -> Result<Self> {
        let token = resolve_secret(&cfg.bot_token, "TELEGRAM_BOT_TOKEN")?;
        let chat_id = resolve_secret(&cfg.chat_id, "TELEGRAM_CHAT_ID")?;
        if token.trim().is_empty() || chat_id.trim().is_empty() {
            bail!("telegram bot token and chat id are required");
        }
        let client = Client::builder()
            // Long polls must outlive the server-side wait.
            .timeout(Duration::from_secs(cfg.poll_secs + 15))
            .build()
            .context("building telegram client")?;
        Ok(Self {
            client,
            api: format!("{}/bot{}", cfg.api_base.trim_end_matches('/'), token.trim()),
            chat_id: chat_id.trim().to_string(),
            poll_secs: cfg.poll_secs,
        })
    }

    async fn call<T: for<'de> Deserialize<'de>>(&self, method: &str, body: Value) -> Result<T> {
        let resp: TgResponse<T> = self
            .client
            .post(format!("{}/{method}", self.api))
            .json(&body)
            .send()
            .await
            .with_context(|| format!("telegram {method}"))?
            .error_for_status()
            .with_context(|| format!("telegram {method} non-2xx"))?
            .json()
            .await
            .with_context(|| format!("telegram {method} json"))?;
        match (resp.ok, resp.result) {
            (true, Some(r)) => Ok(r),
            _ => bail!(
                "telegram {method} failed: {}",
                resp.description.unwrap_or_else(|| "no description".into())
            ),
        }
    }

    async fn send(&self, text: String, keyboard: Option<Value>) -> Result<()> {
        let mut body = json!({
            "chat_id": self.chat_id,
            "text": text,
            "parse_mode": "HTML",
            "disable_web_page_preview": true,
        });
        if let Some(k) = keyboard {
            body["reply_markup"] = k;
        }
        let _: Value = self.call("sendMessage", body).await?;
        Ok(())
    }

    fn from_our_chat(&self, chat: &Chat) -> bool {
        match self.chat_id.parse::<i64>() {
            Ok(id) => chat.id == id,
            // Channel usernames cannot be compared against numeric ids.
            Err(_) => true,
        }
    }

    async fn get_updates(&self, offset: i64) -> Result<Vec<Update>> {
        self.call(
            "getUpdates",
            json!({
                "offset": offset,
                "timeout": self.poll_secs,
                "allowed_updates": ["callback_query", "message"],
            }),
        )
        .await
    }

    async fn handle_update(&self, update: Update) -> Option<DecisionEvent> {
        if let Some(q) = update.callback_query {
            if q.message.as_ref().is_some_and(|m| !self.from_our_chat(&m.chat)) {
                return None;
            }
            let ack = self
                .call::<Value>("answerCallbackQuery", json!({ "callback_query_id": q.id }))
                .await;
            if let Err(e) = ack {
                tracing::debug!(target: "review", error = %e, "answerCallbackQuery failed");
            }
            let data = q.data.as_deref().unwrap_or_default();
            return match parse_callback(data) {
                Some(Callback::Decision(article_id, action)) => Some(DecisionEvent {
                    article_id,
                    action,
                    reviewer: Some(q.from.display()),
                }),
                Some(Callback::EditMenu(id)) => {
                    let text = format!("Choose an edit for #{id}, or reply with\n<code>/rewrite {id} your instruction</code>\n<code>/edit {id} replacement text</code>");
                    if let Err(e) = self.send(text, Some(preset_keyboard(id))).await {
                        tracing::warn!(target: "review", id, error = %e, "edit menu not sent");
                    }
                    None
                }
                None => {
                    tracing::debug!(target: "review", data, "ignoring unknown callback");
                    None
                }
            };
        }
        let msg = update.message?;
        if !self.from_our_chat(&msg.chat) {
            return None;
        }
        let (article_id, action) = parse_command(msg.text.as_deref()?)?;
        Some(DecisionEvent {
            article_id,
            action,
            reviewer: msg.from.as_ref().map(User::display),
        })
    }

    /// Forward decisions to `tx` until `cancel` fires or the receiver goes away.
    pub fn spawn_listener(
        self: Arc<Self>,
        tx: mpsc::Sender<DecisionEvent>,
        mut cancel: Cancel,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut offset = 0_i64;
            tracing::info!(target: "review", "telegram listener started");
            loop {
                let polled = tokio::select! {
                    _ = cancel.cancelled() => break,
                    res = self.get_updates(offset) => res,
                };
                match polled {
                    Ok(updates) => {
                        for u in updates {
                            offset = offset.max(u.update_id + 1);
                            if let Some(ev) = self.handle_update(u).await {
                                if tx.send(ev).await.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(target: "review", error = %e, "telegram poll failed");
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(RETRY_AFTER_ERROR) => {}
                        }
                    }
                }
            }
            tracing::info!(target: "review", "telegram listener stopped");
        })
    }
}

#[async_trait]
impl ReviewChannel for TelegramReview {
    async fn submit(&self, article: &Article) -> Result<()> {
        self.send(review_message(article), Some(decision_keyboard(article.id)))
            .await
    }

    async fn send_details(&self, article: &Article) -> Result<()> {
        self.send(details_message(article), None).await
    }

    async fn notify(&self, article: &Article, message: &str) -> Result<()> {
        let text = format!("#{} {}\n{}", article.id, escape(&article.title), escape(message));
        self.send(fit_escaped(text, MAX_MESSAGE_CHARS), None).await
    }

    fn name(&self) -> &'static str {
        "telegram"
    }
}
