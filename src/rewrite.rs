// src/rewrite.rs
//! Rewriter boundary: provider abstraction + OpenAI-compatible client.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::{resolve_secret, RewriterConfig};

#[async_trait]
pub trait Rewriter: Send + Sync {
    /// Rewrite `text`, optionally following a free-text `instruction`.
    /// Empty or unusable output is an error.
    async fn rewrite(&self, text: &str, instruction: Option<&str>) -> Result<String>;
    /// Provider name for diagnostics.
    fn name(&self) -> &'static str;
}

pub type DynRewriter = Arc<dyn Rewriter>;

/// Used when rewriting is switched off; every article degrades to raw content.
pub struct DisabledRewriter;

#[async_trait]
impl Rewriter for DisabledRewriter {
    async fn rewrite(&self, _text: &str, _instruction: Option<&str>) -> Result<String> {
        bail!("rewriter disabled")
    }

    fn name(&self) -> &'static str {
        "disabled"
    }
}

/// Factory: disabled client unless config enables it and an API key resolves.
pub fn build_rewriter(cfg: &RewriterConfig) -> DynRewriter {
    if !cfg.enabled {
        return Arc::new(DisabledRewriter);
    }
    match OpenAiRewriter::from_config(cfg) {
        Ok(r) => Arc::new(r),
        Err(e) => {
            tracing::warn!(error = %e, "rewriter not configured; falling back to raw content");
            Arc::new(DisabledRewriter)
        }
    }
}

const SYSTEM_PROMPT: &str = "You are a news editor. Rewrite the article in the same language, \
keeping every fact, names and numbers. Remove any reference to the original website, \
bylines, copyright notices and calls to read more. Output only the article text.";

/// Chat Completions client (OpenAI, OpenRouter and compatible gateways).
pub struct OpenAiRewriter {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    max_input_chars: usize,
}

impl OpenAiRewriter {
    pub fn from_config(cfg: &RewriterConfig) -> Result<Self> {
        let api_key = resolve_secret(&cfg.api_key, "REWRITER_API_KEY")?;
        if api_key.trim().is_empty() {
            bail!("empty rewriter api key");
        }
        let http = reqwest::Client::builder()
            .user_agent("newsflow/0.1")
            .connect_timeout(Duration::from_secs(5))
            .build()
            .context("building rewriter http client")?;
        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", cfg.base_url.trim_end_matches('/')),
            api_key,
            model: cfg.model.clone(),
            temperature: cfg.temperature,
            max_tokens: cfg.max_tokens,
            max_input_chars: cfg.max_input_chars,
        })
    }
}

#[async_trait]
impl Rewriter for OpenAiRewriter {
    async fn rewrite(&self, text: &str, instruction: Option<&str>) -> Result<String> {
        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            temperature: f32,
            max_tokens: u32,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            content: Option<String>,
        }

        let input = truncate_chars(text, self.max_input_chars);
        let user = match instruction {
            Some(i) if !i.trim().is_empty() => format!("Instruction: {}\n\n{}", i.trim(), input),
            _ => input,
        };
        let req = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                Msg {
                    role: "user",
                    content: &user,
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let resp: Resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .context("rewriter request")?
            .error_for_status()
            .context("rewriter non-2xx")?
            .json()
            .await
            .context("rewriter response json")?;

        let raw = resp
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow!("rewriter returned no choices"))?;
        clean_output(&raw)
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

static RE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[a-zA-Z]*\s*(.*?)\s*```$").expect("fence regex"));
static RE_BLANKS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").expect("blank regex"));
static RE_SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]+").expect("space regex"));

/// Strip code fences, collapse runs of blanks. Empty output is an error.
pub fn clean_output(raw: &str) -> Result<String> {
    let t = raw.trim();
    let t = match RE_FENCE.captures(t) {
        Some(c) => c.get(1).map_or("", |m| m.as_str()).to_string(),
        None => t.to_string(),
    };
    let t = RE_SPACES.replace_all(&t, " ");
    let t = RE_BLANKS.replace_all(&t, "\n\n");
    let out = t.trim().to_string();
    if out.is_empty() {
        bail!("rewriter returned empty text");
    }
    Ok(out)
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let mut out: String = s.chars().take(max).collect();
        out.push_str("...");
        out
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_output_strips_fences_and_blanks() {
        let raw = "```text\nTitle\n\n\n\nBody   text\n```";
        assert_eq!(clean_output(raw).unwrap(), "Title\n\nBody text");
    }

    #[test]
    fn empty_output_is_error() {
        assert!(clean_output("   ").is_err());
        assert!(clean_output("```\n```").is_err());
    }

    #[test]
    fn truncation_marks_cut() {
        assert_eq!(truncate_chars("abcdef", 3), "abc...");
        assert_eq!(truncate_chars("abc", 3), "abc");
    }

    #[tokio::test]
    async fn disabled_always_fails() {
        let r = build_rewriter(&RewriterConfig::default());
        assert_eq!(r.name(), "disabled");
        assert!(r.rewrite("x", None).await.is_err());
    }
}
