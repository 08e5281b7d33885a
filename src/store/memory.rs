//! In-process implementation of [`KvStore`].
//!
//! Mirrors the redis semantics (score assignment, insert-if-absent, rolling
//! TTL with lazy expiry, prefix pattern deletes) over a mutexed map. Used
//! when running without redis and throughout the test suite.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::Result;

use super::{KvStore, RECORD_TTL};

#[derive(Debug)]
enum Value {
    Log(Vec<(i64, String)>),
    Hash(HashMap<String, String>),
}

#[derive(Debug)]
struct Record {
    expires_at: Instant,
    value: Value,
}

impl Record {
    fn fresh(value: Value) -> Self {
        Self {
            expires_at: Instant::now() + RECORD_TTL,
            value,
        }
    }

    fn touch(&mut self) {
        self.expires_at = Instant::now() + RECORD_TTL;
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<HashMap<String, Record>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn purge_expired(map: &mut HashMap<String, Record>) {
        let now = Instant::now();
        map.retain(|_, record| record.expires_at > now);
    }

    fn matches(pattern: &str, key: &str) -> bool {
        match pattern.strip_suffix('*') {
            Some(prefix) => key.starts_with(prefix),
            None => key == pattern,
        }
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn log_append(&self, key: &str, entry: &str) -> Result<()> {
        let mut map = self.inner.lock().await;
        Self::purge_expired(&mut map);

        let record = map
            .entry(key.to_owned())
            .or_insert_with(|| Record::fresh(Value::Log(Vec::new())));
        if let Value::Log(entries) = &mut record.value {
            // Insert-if-absent: an entry already present keeps its score.
            if !entries.iter().any(|(_, e)| e == entry) {
                let max_score = entries.iter().map(|(s, _)| *s).max().unwrap_or(0);
                entries.push((max_score + 1, entry.to_owned()));
            }
        }
        record.touch();
        Ok(())
    }

    async fn log_overwrite(&self, key: &str, entries: &[String]) -> Result<()> {
        let mut map = self.inner.lock().await;
        Self::purge_expired(&mut map);

        let renumbered = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (i as i64 + 1, e.clone()))
            .collect();
        map.insert(key.to_owned(), Record::fresh(Value::Log(renumbered)));
        Ok(())
    }

    async fn log_read(&self, key: &str) -> Result<Vec<String>> {
        let mut map = self.inner.lock().await;
        Self::purge_expired(&mut map);

        Ok(match map.get(key) {
            Some(Record {
                value: Value::Log(entries),
                ..
            }) => {
                let mut sorted: Vec<_> = entries.clone();
                sorted.sort_by_key(|(score, _)| *score);
                sorted.into_iter().map(|(_, e)| e).collect()
            }
            _ => Vec::new(),
        })
    }

    async fn hash_merge(&self, key: &str, fields: &[(&str, String)]) -> Result<()> {
        let mut map = self.inner.lock().await;
        Self::purge_expired(&mut map);

        let record = map
            .entry(key.to_owned())
            .or_insert_with(|| Record::fresh(Value::Hash(HashMap::new())));
        if let Value::Hash(hash) = &mut record.value {
            for (field, value) in fields {
                hash.insert((*field).to_owned(), value.clone());
            }
        }
        record.touch();
        Ok(())
    }

    async fn hash_read(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut map = self.inner.lock().await;
        Self::purge_expired(&mut map);

        Ok(match map.get(key) {
            Some(Record {
                value: Value::Hash(hash),
                ..
            }) => hash.clone(),
            _ => HashMap::new(),
        })
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut map = self.inner.lock().await;
        map.remove(key);
        Ok(())
    }

    async fn delete_matching(&self, pattern: &str) -> Result<u64> {
        let mut map = self.inner.lock().await;
        let before = map.len();
        map.retain(|key, _| !Self::matches(pattern, key));
        Ok((before - map.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_assigns_sequential_scores_in_call_order() {
        let store = MemoryStore::new();
        store.log_append("k", "a").await.unwrap();
        store.log_append("k", "b").await.unwrap();
        store.log_append("k", "c").await.unwrap();

        assert_eq!(store.log_read("k").await.unwrap(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn append_does_not_duplicate_existing_entries() {
        let store = MemoryStore::new();
        store.log_append("k", "a").await.unwrap();
        store.log_append("k", "b").await.unwrap();
        store.log_append("k", "b").await.unwrap();

        assert_eq!(store.log_read("k").await.unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn overwrite_replaces_prior_state() {
        let store = MemoryStore::new();
        store.log_append("k", "old-1").await.unwrap();
        store.log_append("k", "old-2").await.unwrap();

        let fresh = vec!["a".to_owned(), "b".to_owned(), "c".to_owned()];
        store.log_overwrite("k", &fresh).await.unwrap();

        assert_eq!(store.log_read("k").await.unwrap(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn hash_merge_overwrites_fields() {
        let store = MemoryStore::new();
        store
            .hash_merge("h", &[("response", "Hel".to_owned()), ("done", "false".to_owned())])
            .await
            .unwrap();
        store
            .hash_merge("h", &[("response", "Hello!".to_owned()), ("done", "true".to_owned())])
            .await
            .unwrap();

        let map = store.hash_read("h").await.unwrap();
        assert_eq!(map.get("response").unwrap(), "Hello!");
        assert_eq!(map.get("done").unwrap(), "true");
    }

    #[tokio::test]
    async fn absent_keys_read_as_empty() {
        let store = MemoryStore::new();
        assert!(store.log_read("nope").await.unwrap().is_empty());
        assert!(store.hash_read("nope").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_matching_removes_prefixed_keys_only() {
        let store = MemoryStore::new();
        store.log_append("ns:ctx1:a", "x").await.unwrap();
        store.log_append("ns:ctx1:b", "x").await.unwrap();
        store.log_append("ns:ctx2:a", "x").await.unwrap();

        let deleted = store.delete_matching("ns:ctx1:*").await.unwrap();
        assert_eq!(deleted, 2);
        assert!(store.log_read("ns:ctx1:a").await.unwrap().is_empty());
        assert_eq!(store.log_read("ns:ctx2:a").await.unwrap(), vec!["x"]);
    }
}
