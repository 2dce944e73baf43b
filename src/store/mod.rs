// src/store/mod.rs
//! Article persistence boundary.

pub mod memory;
pub mod snapshot;

pub use memory::MemoryStore;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::article::{Article, ArticleId, ArticleStatus, NewArticle};

/// In-place edit applied by [`ArticleStore::update`] under the store's lock.
pub type ArticleFn = Box<dyn for<'a> FnOnce(&'a mut Article) + Send>;

/// Outcome of the dedup insert.
#[derive(Debug, Clone)]
pub struct Inserted {
    pub article: Article,
    /// `false` when the key already existed and the stored record was returned.
    pub created: bool,
}

#[async_trait]
pub trait ArticleStore: Send + Sync {
    /// Atomic create-if-absent keyed by `new.key`. Calling it twice with the same key
    /// returns the same article and never duplicates it.
    async fn create_article_if_absent(&self, new: NewArticle) -> Result<Inserted>;

    async fn get(&self, id: ArticleId) -> Result<Option<Article>>;

    async fn get_by_key(&self, key: &str) -> Result<Option<Article>>;

    async fn contains_key(&self, key: &str) -> Result<bool> {
        Ok(self.get_by_key(key).await?.is_some())
    }

    /// Newest first.
    async fn list(&self, skip: usize, limit: usize) -> Result<Vec<Article>>;

    /// Apply `f` to the stored record and return the result. `None` if absent.
    async fn update(
        &self,
        id: ArticleId,
        f: ArticleFn,
    ) -> Result<Option<Article>>;

    /// Move to `to` only if the current status is one of `from`. Returns the updated
    /// record on success, `None` if the article is absent or in another state.
    async fn transition(
        &self,
        id: ArticleId,
        from: &[ArticleStatus],
        to: ArticleStatus,
    ) -> Result<Option<Article>>;
}

pub type DynStore = Arc<dyn ArticleStore>;
