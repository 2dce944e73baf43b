// src/store/snapshot.rs
//! JSON snapshot of sources and articles, read on startup and rewritten periodically
//! while running.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

use super::MemoryStore;
use crate::article::Article;
use crate::registry::{Source, SourceRegistry};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub sources: Vec<Source>,
    #[serde(default)]
    pub articles: Vec<Article>,
}

impl Snapshot {
    pub fn capture(registry: &SourceRegistry, store: &MemoryStore) -> Self {
        Self {
            sources: registry.list(),
            articles: store.all(),
        }
    }

    pub fn restore_into(self, registry: &SourceRegistry, store: &MemoryStore) {
        registry.restore(self.sources);
        store.restore(self.articles);
    }
}

/// A missing file is an empty snapshot; a corrupt one is an error.
pub async fn read(path: &Path) -> Result<Snapshot> {
    match fs::read_to_string(path).await {
        Ok(s) => serde_json::from_str(&s)
            .with_context(|| format!("parsing snapshot {}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Snapshot::default()),
        Err(e) => Err(e).with_context(|| format!("reading snapshot {}", path.display())),
    }
}

pub async fn write(path: &Path, snap: &Snapshot) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)
            .await
            .with_context(|| format!("creating {}", dir.display()))?;
    }
    let body = serde_json::to_vec_pretty(snap).context("serializing snapshot")?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, body)
        .await
        .with_context(|| format!("writing {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .await
        .with_context(|| format!("replacing {}", path.display()))?;
    Ok(())
}
