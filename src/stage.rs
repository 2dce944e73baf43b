// src/stage.rs
//! Every external call goes through [`bounded`]: a timeout is just another failure.

use std::future::Future;
use std::time::Duration;

use anyhow::{anyhow, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetch,
    Rewrite,
    Review,
    Publish,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Fetch => "fetch",
            Stage::Rewrite => "rewrite",
            Stage::Review => "review",
            Stage::Publish => "publish",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub async fn bounded<T, F>(stage: Stage, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(res) => res,
        Err(_) => Err(anyhow!("{stage} timed out after {}ms", limit.as_millis())),
    }
}

/// Shorten an error chain for storage on a status field.
pub fn error_text(e: &anyhow::Error, max_len: usize) -> String {
    let s = format!("{e:#}");
    if s.chars().count() > max_len {
        s.chars().take(max_len).collect()
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn timeout_is_an_error() {
        let res: Result<()> = bounded(Stage::Publish, Duration::from_secs(2), async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        })
        .await;
        let msg = format!("{:#}", res.unwrap_err());
        assert!(msg.contains("publish timed out"), "{msg}");
    }

    #[tokio::test]
    async fn inner_result_passes_through() {
        let ok = bounded(Stage::Fetch, Duration::from_secs(1), async { Ok(7) }).await;
        assert_eq!(ok.unwrap(), 7);
    }

    #[test]
    fn error_text_truncates() {
        let e = anyhow!("{}", "x".repeat(40));
        assert_eq!(error_text(&e, 10).len(), 10);
    }
}
