// src/dedup.rs
//! Drop candidates whose identity key is already stored.

use std::collections::HashSet;

use metrics::counter;

use crate::error::StoreError;
use crate::ingest::types::{CandidateItem, IdentityKey};
use crate::store::Store;

#[derive(Debug, Default)]
pub struct DedupOutcome {
    /// Not in the store (or lookup failed), first occurrence per key, input order.
    pub fresh: Vec<CandidateItem>,
    /// Already stored.
    pub known: usize,
    /// Repeats inside the batch itself.
    pub in_batch_duplicates: usize,
    /// Failed lookups; those items are in `fresh`.
    pub lookup_errors: Vec<(IdentityKey, StoreError)>,
}

pub async fn filter_new(items: Vec<CandidateItem>, store: &dyn Store) -> DedupOutcome {
    let mut out = DedupOutcome::default();
    let mut seen: HashSet<IdentityKey> = HashSet::with_capacity(items.len());

    for item in items {
        let key = item.identity_key();
        if !seen.insert(key.clone()) {
            out.in_batch_duplicates += 1;
            continue;
        }
        match store.exists(&key).await {
            Ok(true) => out.known += 1,
            Ok(false) => out.fresh.push(item),
            Err(e) => {
                tracing::warn!(target: "ingest", key = %key, error = %e, "dedup lookup failed; treating as new");
                out.fresh.push(item);
                out.lookup_errors.push((key, e));
            }
        }
    }

    counter!("ingest_dedup_known_total").increment(out.known as u64);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::types::SourceTag;
    use crate::store::{ItemQuery, MemoryStore, RelevanceRecord, StoredItem};
    use async_trait::async_trait;
    use chrono::Utc;

    fn cand(id: &str) -> CandidateItem {
        CandidateItem::new(SourceTag::HackerNews, id, format!("title {id}"))
    }

    #[tokio::test]
    async fn known_and_repeated_keys_are_dropped() {
        let known = StoredItem::pending(
            &cand("https://a.example"),
            RelevanceRecord {
                keep: true,
                reason: "keyword_strong".into(),
            },
            Utc::now(),
        );
        let store = MemoryStore::with_items([known]);

        let out = filter_new(
            vec![
                cand("https://a.example"),
                cand("https://b.example"),
                cand("https://b.example"),
                cand("https://c.example"),
            ],
            &store,
        )
        .await;

        let ids: Vec<_> = out.fresh.iter().map(|c| c.external_id.as_str()).collect();
        assert_eq!(ids, vec!["https://b.example", "https://c.example"]);
        assert_eq!(out.known, 1);
        assert_eq!(out.in_batch_duplicates, 1);
        assert!(out.lookup_errors.is_empty());
    }

    struct Broken;

    #[async_trait]
    impl Store for Broken {
        async fn exists(&self, _key: &IdentityKey) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("db down".into()))
        }
        async fn upsert(&self, _item: StoredItem) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("db down".into()))
        }
        async fn pending(&self, _limit: usize) -> Result<Vec<StoredItem>, StoreError> {
            Ok(Vec::new())
        }
        async fn list(&self, _q: &ItemQuery) -> Result<Vec<StoredItem>, StoreError> {
            Ok(Vec::new())
        }
        async fn sources(&self) -> Result<Vec<SourceTag>, StoreError> {
            Ok(Vec::new())
        }
        fn name(&self) -> &'static str {
            "broken"
        }
    }

    #[tokio::test]
    async fn failed_lookup_counts_as_new_and_is_reported() {
        let out = filter_new(vec![cand("x"), cand("y")], &Broken).await;
        assert_eq!(out.fresh.len(), 2);
        assert_eq!(out.lookup_errors.len(), 2);
        assert_eq!(out.lookup_errors[0].0.external_id, "x");
    }
}
