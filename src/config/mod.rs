// src/config/mod.rs
//! Application configuration: TOML file + env overrides.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_CONFIG_PATH: &str = "NEWSFLOW_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/newsflow.toml";

const ENV_TICK_SECS: &str = "NEWSFLOW_TICK_SECS";
const ENV_MAX_SCAN_DEPTH: &str = "NEWSFLOW_MAX_SCAN_DEPTH";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub scheduler: SchedulerConfig,
    pub crawl: CrawlConfig,
    pub timeouts: TimeoutConfig,
    pub lifecycle: LifecycleConfig,
    pub rewriter: RewriterConfig,
    pub review: ReviewConfig,
    pub publish: PublishConfig,
    pub storage: StorageConfig,
    pub sources: Vec<SeedSource>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Wall-clock cadence of the due check, independent of source intervals.
    pub tick_secs: u64,
    /// How long `stop` waits for in-flight crawl units before aborting them.
    pub stop_grace_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_secs: 30,
            stop_grace_secs: 10,
        }
    }
}

impl SchedulerConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    pub max_scan_depth: usize,
    /// Fixed delay between consecutive requests to the same source.
    pub request_delay_ms: u64,
    pub max_error_len: usize,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            max_scan_depth: 10,
            request_delay_ms: 1_000,
            max_error_len: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub fetch_secs: u64,
    pub rewrite_secs: u64,
    pub review_secs: u64,
    pub publish_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            fetch_secs: 30,
            rewrite_secs: 30,
            review_secs: 15,
            publish_secs: 60,
        }
    }
}

impl TimeoutConfig {
    pub fn fetch(&self) -> Duration {
        Duration::from_secs(self.fetch_secs)
    }
    pub fn rewrite(&self) -> Duration {
        Duration::from_secs(self.rewrite_secs)
    }
    pub fn review(&self) -> Duration {
        Duration::from_secs(self.review_secs)
    }
    pub fn publish(&self) -> Duration {
        Duration::from_secs(self.publish_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Unset means an article may cycle through edit -> review forever.
    pub max_edit_rounds: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RewriterConfig {
    pub enabled: bool,
    /// OpenAI-compatible chat completions base, e.g. https://openrouter.ai/api/v1
    pub base_url: String,
    pub model: String,
    /// "ENV" means: read from REWRITER_API_KEY
    pub api_key: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Raw content is cut to this many chars before it is sent.
    pub max_input_chars: usize,
}

impl Default for RewriterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: "https://openrouter.ai/api/v1".to_string(),
            model: "deepseek/deepseek-chat".to_string(),
            api_key: "ENV".to_string(),
            temperature: 0.3,
            max_tokens: 1_000,
            max_input_chars: 1_200,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewConfig {
    pub telegram: Option<TelegramConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    /// "ENV" means: read from TELEGRAM_BOT_TOKEN
    pub bot_token: String,
    /// "ENV" means: read from TELEGRAM_CHAT_ID
    pub chat_id: String,
    /// Long-poll timeout for getUpdates.
    pub poll_secs: u64,
    pub api_base: String,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: "ENV".to_string(),
            chat_id: "ENV".to_string(),
            poll_secs: 25,
            api_base: "https://api.telegram.org".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    pub wordpress: Option<WordPressConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WordPressConfig {
    pub site_url: String,
    pub username: String,
    /// "ENV" means: read from WORDPRESS_APP_PASSWORD
    pub app_password: String,
    pub author_id: u64,
}

impl Default for WordPressConfig {
    fn default() -> Self {
        Self {
            site_url: String::new(),
            username: "admin".to_string(),
            app_password: "ENV".to_string(),
            author_id: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub snapshot_path: Option<PathBuf>,
    /// How often the snapshot is rewritten while running.
    pub snapshot_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            snapshot_path: None,
            snapshot_secs: 300,
        }
    }
}

/// A source registered at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedSource {
    pub name: String,
    pub url: String,
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_interval_minutes() -> u64 {
    5
}

fn default_true() -> bool {
    true
}

impl AppConfig {
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        let mut cfg: AppConfig =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        cfg.apply_env_overrides();
        cfg.sanitize();
        Ok(cfg)
    }

    /// Load config using env var + fallbacks:
    /// 1) $NEWSFLOW_CONFIG_PATH
    /// 2) config/newsflow.toml
    /// 3) built-in defaults
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from(&pb);
            }
            return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
        }
        let default_p = PathBuf::from(DEFAULT_CONFIG_PATH);
        if default_p.exists() {
            return Self::load_from(&default_p);
        }
        let mut cfg = AppConfig::default();
        cfg.apply_env_overrides();
        cfg.sanitize();
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parse::<u64>(ENV_TICK_SECS) {
            self.scheduler.tick_secs = v;
        }
        if let Some(v) = env_parse::<usize>(ENV_MAX_SCAN_DEPTH) {
            self.crawl.max_scan_depth = v;
        }
    }

    fn sanitize(&mut self) {
        self.scheduler.tick_secs = self.scheduler.tick_secs.max(1);
        self.crawl.max_scan_depth = self.crawl.max_scan_depth.max(1);
        self.crawl.max_error_len = self.crawl.max_error_len.max(16);
        self.storage.snapshot_secs = self.storage.snapshot_secs.max(1);
        let t = &mut self.timeouts;
        for secs in [
            &mut t.fetch_secs,
            &mut t.rewrite_secs,
            &mut t.review_secs,
            &mut t.publish_secs,
        ] {
            *secs = (*secs).max(1);
        }
        if !(0.0..=2.0).contains(&self.rewriter.temperature) {
            self.rewriter.temperature = RewriterConfig::default().temperature;
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

/// Resolve a secret that may be given literally or as "ENV" (read from `env_name`).
pub fn resolve_secret(value: &str, env_name: &str) -> Result<String> {
    if value.trim().eq_ignore_ascii_case("env") {
        return std::env::var(env_name).map_err(|_| anyhow!("Missing {env_name} env var"));
    }
    Ok(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn parses_partial_toml_with_defaults() {
        let toml = r#"
            [scheduler]
            tick_secs = 0

            [crawl]
            max_scan_depth = 15

            [lifecycle]
            max_edit_rounds = 3

            [[sources]]
            name = "Balkanweb"
            url = "https://www.balkanweb.com/"
        "#;
        let mut cfg: AppConfig = toml::from_str(toml).unwrap();
        cfg.sanitize();
        assert_eq!(cfg.scheduler.tick_secs, 1);
        assert_eq!(cfg.scheduler.stop_grace_secs, 10);
        assert_eq!(cfg.crawl.max_scan_depth, 15);
        assert_eq!(cfg.crawl.request_delay_ms, 1_000);
        assert_eq!(cfg.lifecycle.max_edit_rounds, Some(3));
        assert_eq!(cfg.sources.len(), 1);
        assert_eq!(cfg.sources[0].interval_minutes, 5);
        assert!(cfg.sources[0].enabled);
        assert!(cfg.review.telegram.is_none());
    }

    #[serial_test::serial]
    #[test]
    fn default_uses_env_then_fallbacks() {
        let old = env::current_dir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        env::set_current_dir(tmp.path()).unwrap();
        env::remove_var(ENV_CONFIG_PATH);
        env::remove_var(ENV_TICK_SECS);

        let cfg = AppConfig::load_default().unwrap();
        assert_eq!(cfg.scheduler.tick_secs, 30);

        let p = tmp.path().join("custom.toml");
        fs::write(&p, "[scheduler]\ntick_secs = 7\n").unwrap();
        env::set_var(ENV_CONFIG_PATH, p.display().to_string());
        let cfg = AppConfig::load_default().unwrap();
        assert_eq!(cfg.scheduler.tick_secs, 7);

        env::set_var(ENV_TICK_SECS, "3");
        let cfg = AppConfig::load_default().unwrap();
        assert_eq!(cfg.scheduler.tick_secs, 3);
        env::remove_var(ENV_TICK_SECS);

        env::set_var(ENV_CONFIG_PATH, tmp.path().join("missing.toml"));
        assert!(AppConfig::load_default().is_err());
        env::remove_var(ENV_CONFIG_PATH);

        env::set_current_dir(&old).unwrap();
    }

    #[serial_test::serial]
    #[test]
    fn secrets_resolve_from_env() {
        env::set_var("NEWSFLOW_TEST_SECRET", "s3cret");
        assert_eq!(resolve_secret("ENV", "NEWSFLOW_TEST_SECRET").unwrap(), "s3cret");
        assert_eq!(resolve_secret("literal", "NEWSFLOW_TEST_SECRET").unwrap(), "literal");
        env::remove_var("NEWSFLOW_TEST_SECRET");
        assert!(resolve_secret("env", "NEWSFLOW_TEST_SECRET").is_err());
    }
}
