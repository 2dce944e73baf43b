// src/store/memory.rs
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;

use super::{ArticleFn, ArticleStore, Inserted};
use crate::article::{Article, ArticleId, ArticleStatus, NewArticle};

pub const PUBLISH_INTERRUPTED: &str = "publish interrupted";

#[derive(Debug, Default)]
struct Inner {
    by_id: BTreeMap<ArticleId, Article>,
    by_key: HashMap<String, ArticleId>,
    next_id: ArticleId,
}

/// In-process article store. One mutex makes the dedup insert a single
/// conditional step.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("store mutex poisoned").by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn all(&self) -> Vec<Article> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        inner.by_id.values().cloned().collect()
    }

    /// Load persisted articles, keeping their ids. An article captured while its
    /// publication was in flight comes back as `failed` so it can be retried.
    pub fn restore(&self, articles: Vec<Article>) {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        for mut a in articles {
            if a.status == ArticleStatus::Approved {
                tracing::warn!(target: "lifecycle", id = a.id, "publish interrupted by restart");
                a.status = ArticleStatus::Failed;
                a.failure = Some(PUBLISH_INTERRUPTED.to_string());
            }
            inner.next_id = inner.next_id.max(a.id);
            inner.by_key.insert(a.key.clone(), a.id);
            inner.by_id.insert(a.id, a);
        }
    }
}

#[async_trait]
impl ArticleStore for MemoryStore {
    async fn create_article_if_absent(&self, new: NewArticle) -> Result<Inserted> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        if let Some(id) = inner.by_key.get(&new.key).copied() {
            if let Some(existing) = inner.by_id.get(&id) {
                return Ok(Inserted {
                    article: existing.clone(),
                    created: false,
                });
            }
        }
        inner.next_id += 1;
        let id = inner.next_id;
        let article = Article::from_new(id, new, Utc::now());
        inner.by_key.insert(article.key.clone(), id);
        inner.by_id.insert(id, article.clone());
        Ok(Inserted {
            article,
            created: true,
        })
    }

    async fn get(&self, id: ArticleId) -> Result<Option<Article>> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        Ok(inner.by_id.get(&id).cloned())
    }

    async fn get_by_key(&self, key: &str) -> Result<Option<Article>> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        Ok(inner
            .by_key
            .get(key)
            .and_then(|id| inner.by_id.get(id))
            .cloned())
    }

    async fn contains_key(&self, key: &str) -> Result<bool> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        Ok(inner.by_key.contains_key(key))
    }

    async fn list(&self, skip: usize, limit: usize) -> Result<Vec<Article>> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        Ok(inner
            .by_id
            .values()
            .rev()
            .skip(skip)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn update(
        &self,
        id: ArticleId,
        f: ArticleFn,
    ) -> Result<Option<Article>> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        let Some(article) = inner.by_id.get_mut(&id) else {
            return Ok(None);
        };
        f(article);
        article.updated_at = Utc::now();
        Ok(Some(article.clone()))
    }

    async fn transition(
        &self,
        id: ArticleId,
        from: &[ArticleStatus],
        to: ArticleStatus,
    ) -> Result<Option<Article>> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        let Some(article) = inner.by_id.get_mut(&id) else {
            return Ok(None);
        };
        if !from.contains(&article.status) {
            return Ok(None);
        }
        article.status = to;
        article.updated_at = Utc::now();
        Ok(Some(article.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn new_article(key: &str) -> NewArticle {
        NewArticle {
            source_id: Some(1),
            key: key.into(),
            title: "T".into(),
            content: "body".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_if_absent_is_idempotent() {
        let store = MemoryStore::new();
        let a = store
            .create_article_if_absent(new_article("https://x.test/1"))
            .await
            .unwrap();
        let b = store
            .create_article_if_absent(new_article("https://x.test/1"))
            .await
            .unwrap();
        assert!(a.created);
        assert!(!b.created);
        assert_eq!(a.article.id, b.article.id);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_inserts_of_same_key_create_one_row() {
        let store = Arc::new(MemoryStore::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let s = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                s.create_article_if_absent(new_article("https://x.test/same"))
                    .await
                    .unwrap()
            }));
        }
        let mut created = 0;
        let mut ids = Vec::new();
        for h in handles {
            let ins = h.await.unwrap();
            created += ins.created as usize;
            ids.push(ins.article.id);
        }
        assert_eq!(created, 1);
        assert!(ids.iter().all(|id| *id == ids[0]));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn transition_is_compare_and_set() {
        let store = MemoryStore::new();
        let id = store
            .create_article_if_absent(new_article("https://x.test/1"))
            .await
            .unwrap()
            .article
            .id;
        let moved = store
            .transition(id, &[ArticleStatus::Scraped], ArticleStatus::Rewritten)
            .await
            .unwrap();
        assert_eq!(moved.unwrap().status, ArticleStatus::Rewritten);
        let again = store
            .transition(id, &[ArticleStatus::Scraped], ArticleStatus::Rewritten)
            .await
            .unwrap();
        assert!(again.is_none());
    }

    #[tokio::test]
    async fn update_applies_edit_and_stamps_time() {
        let store = MemoryStore::new();
        let created = store
            .create_article_if_absent(new_article("https://x.test/1"))
            .await
            .unwrap()
            .article;
        let updated = store
            .update(created.id, Box::new(|a| a.title = "Edited".into()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.title, "Edited");
        assert!(updated.updated_at >= created.updated_at);
        assert!(store
            .update(999, Box::new(|a| a.title.clear()))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn list_is_newest_first_with_paging() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store
                .create_article_if_absent(new_article(&format!("https://x.test/{i}")))
                .await
                .unwrap();
        }
        let page = store.list(1, 2).await.unwrap();
        let keys: Vec<_> = page.iter().map(|a| a.key.as_str()).collect();
        assert_eq!(keys, vec!["https://x.test/3", "https://x.test/2"]);
    }
}
