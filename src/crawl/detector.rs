// src/crawl/detector.rs
//! Incremental Crawl Detector.
//!
//! Walks candidates newest-first and returns the prefix that precedes the first
//! already-known key. Nothing past that key is inspected: the listing page is
//! assumed to be in reverse-chronological order, so an older item that shows up
//! again after a known one (promotion, re-ordering) is not picked up.

use std::future::Future;

use anyhow::Result;

use super::fetcher::CandidateItem;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Detection {
    /// New candidates, in listing order.
    pub new_items: Vec<CandidateItem>,
    /// How many candidates were looked at.
    pub inspected: usize,
    /// Position of the first known candidate, if the scan stopped on one.
    pub stopped_at: Option<usize>,
}

/// `marker` is the source's high-water key; `None` means the source never ingested
/// anything and every candidate within `max_depth` counts as new.
pub async fn detect_new<F, Fut>(
    candidates: &[CandidateItem],
    marker: Option<&str>,
    max_depth: usize,
    mut is_known: F,
) -> Result<Detection>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let mut out = Detection::default();
    for cand in candidates.iter().take(max_depth) {
        out.inspected += 1;
        if let Some(m) = marker {
            if cand.key == m || is_known(cand.key.clone()).await? {
                out.stopped_at = Some(cand.position);
                break;
            }
        }
        out.new_items.push(cand.clone());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};

    fn cands(keys: &[&str]) -> Vec<CandidateItem> {
        keys.iter()
            .enumerate()
            .map(|(i, k)| CandidateItem {
                key: k.to_string(),
                position: i,
                title: format!("title {k}"),
            })
            .collect()
    }

    fn known_set(keys: &[&str]) -> Arc<HashSet<String>> {
        Arc::new(keys.iter().map(|k| k.to_string()).collect())
    }

    #[tokio::test]
    async fn stops_at_first_known_and_never_looks_further() {
        let known = known_set(&["k2", "k3"]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let c = cands(&["k1", "k2", "k3", "k4"]);

        let det = detect_new(&c, Some("k0"), 10, |key| {
            let known = Arc::clone(&known);
            let seen = Arc::clone(&seen);
            async move {
                seen.lock().unwrap().push(key.clone());
                Ok(known.contains(&key))
            }
        })
        .await
        .unwrap();

        let keys: Vec<_> = det.new_items.iter().map(|c| c.key.as_str()).collect();
        assert_eq!(keys, vec!["k1"]);
        assert_eq!(det.stopped_at, Some(1));
        assert_eq!(*seen.lock().unwrap(), vec!["k1".to_string(), "k2".to_string()]);
    }

    #[tokio::test]
    async fn first_run_takes_everything_up_to_depth() {
        let keys: Vec<String> = (1..=15).map(|i| format!("k{i}")).collect();
        let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        let c = cands(&refs);

        let det = detect_new(&c, None, 10, |_k| async { Ok(false) })
            .await
            .unwrap();

        let got: Vec<_> = det.new_items.iter().map(|c| c.key.clone()).collect();
        assert_eq!(got, keys[..10].to_vec());
        assert_eq!(det.inspected, 10);
        assert_eq!(det.stopped_at, None);
    }

    #[tokio::test]
    async fn marker_key_stops_scan_even_if_store_forgot_it() {
        let c = cands(&["k1", "k2", "k3"]);
        let det = detect_new(&c, Some("k2"), 10, |_k| async { Ok(false) })
            .await
            .unwrap();
        assert_eq!(det.new_items.len(), 1);
        assert_eq!(det.stopped_at, Some(1));
    }

    #[tokio::test]
    async fn newest_known_yields_nothing() {
        let c = cands(&["k1", "k2"]);
        let det = detect_new(&c, Some("k1"), 10, |_k| async { Ok(true) })
            .await
            .unwrap();
        assert!(det.new_items.is_empty());
        assert_eq!(det.inspected, 1);
    }

    #[tokio::test]
    async fn lookup_errors_propagate() {
        let c = cands(&["k1"]);
        let res = detect_new(&c, Some("k9"), 10, |_k| async {
            Err(anyhow::anyhow!("store down"))
        })
        .await;
        assert!(res.is_err());
    }
}
