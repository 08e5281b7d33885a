//! Conversation history store.
//!
//! Per-context, per-key ordered message logs. Entries are stored as
//! `tag:::content` strings where the tag is either a role or the caller's
//! assistant name; scores are insertion order and never reused while the key
//! lives. Records expire after ten minutes of inactivity.

use std::sync::Arc;

use crate::error::Result;
use crate::store::KvStore;

const KEY_PREFIX: &str = "inferd:llm:conversation";
const TAG_SEPARATOR: &str = ":::";

/// One stored conversation turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationEntry {
    /// Role or assistant name that produced the content
    pub tag: String,
    pub content: String,
}

impl ConversationEntry {
    pub fn new(tag: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            content: content.into(),
        }
    }

    fn encode(&self) -> String {
        format!("{}{}{}", self.tag, TAG_SEPARATOR, self.content)
    }

    fn decode(raw: &str) -> Self {
        match raw.split_once(TAG_SEPARATOR) {
            Some((tag, content)) => Self::new(tag, content),
            // Entry without a separator: treat the whole string as content.
            None => Self::new("", raw),
        }
    }
}

/// Conversation log keyed by `(context id, key)`.
#[derive(Clone)]
pub struct ConversationStore {
    kv: Arc<dyn KvStore>,
}

impl ConversationStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    pub fn storage_key(ctx_id: &str, key: &str) -> String {
        format!("{KEY_PREFIX}:{ctx_id}:{key}")
    }

    fn context_pattern(ctx_id: &str) -> String {
        format!("{KEY_PREFIX}:{ctx_id}:*")
    }

    /// Append one entry at the next score, refreshing the expiry.
    pub async fn append(&self, ctx_id: &str, key: &str, entry: &ConversationEntry) -> Result<()> {
        self.kv
            .log_append(&Self::storage_key(ctx_id, key), &entry.encode())
            .await
    }

    /// Replace the stored history with `entries`, renumbered from 1.
    pub async fn overwrite(
        &self,
        ctx_id: &str,
        key: &str,
        entries: &[ConversationEntry],
    ) -> Result<()> {
        let encoded: Vec<String> = entries.iter().map(ConversationEntry::encode).collect();
        self.kv
            .log_overwrite(&Self::storage_key(ctx_id, key), &encoded)
            .await
    }

    /// Full ordered read. An absent key reads as an empty history.
    pub async fn load(&self, ctx_id: &str, key: &str) -> Result<Vec<ConversationEntry>> {
        let raw = self.kv.log_read(&Self::storage_key(ctx_id, key)).await?;
        Ok(raw.iter().map(|r| ConversationEntry::decode(r)).collect())
    }

    /// Delete every conversation stored under the context.
    pub async fn delete_all_for_context(&self, ctx_id: &str) -> Result<u64> {
        self.kv.delete_matching(&Self::context_pattern(ctx_id)).await
    }

    /// Delete a single conversation.
    pub async fn delete_one(&self, ctx_id: &str, key: &str) -> Result<()> {
        self.kv.delete(&Self::storage_key(ctx_id, key)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn store() -> ConversationStore {
        ConversationStore::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn append_then_load_preserves_order() {
        let conv = store();
        conv.append("ctx", "chat", &ConversationEntry::new("user", "Hi"))
            .await
            .unwrap();
        conv.append("ctx", "chat", &ConversationEntry::new("default", "Hello"))
            .await
            .unwrap();

        let loaded = conv.load("ctx", "chat").await.unwrap();
        assert_eq!(
            loaded,
            vec![
                ConversationEntry::new("user", "Hi"),
                ConversationEntry::new("default", "Hello"),
            ]
        );
    }

    #[tokio::test]
    async fn overwrite_discards_prior_history() {
        let conv = store();
        conv.append("ctx", "chat", &ConversationEntry::new("user", "old"))
            .await
            .unwrap();

        let fresh = vec![
            ConversationEntry::new("user", "a"),
            ConversationEntry::new("default", "b"),
            ConversationEntry::new("user", "c"),
        ];
        conv.overwrite("ctx", "chat", &fresh).await.unwrap();

        assert_eq!(conv.load("ctx", "chat").await.unwrap(), fresh);
    }

    #[tokio::test]
    async fn entries_keep_separators_inside_content() {
        let conv = store();
        let entry = ConversationEntry::new("user", "a:::b:::c");
        conv.append("ctx", "chat", &entry).await.unwrap();

        let loaded = conv.load("ctx", "chat").await.unwrap();
        assert_eq!(loaded[0].tag, "user");
        assert_eq!(loaded[0].content, "a:::b:::c");
    }

    #[tokio::test]
    async fn context_delete_is_scoped() {
        let conv = store();
        conv.append("ctx-a", "one", &ConversationEntry::new("user", "x"))
            .await
            .unwrap();
        conv.append("ctx-a", "two", &ConversationEntry::new("user", "x"))
            .await
            .unwrap();
        conv.append("ctx-b", "one", &ConversationEntry::new("user", "x"))
            .await
            .unwrap();

        assert_eq!(conv.delete_all_for_context("ctx-a").await.unwrap(), 2);
        assert!(conv.load("ctx-a", "one").await.unwrap().is_empty());
        assert_eq!(conv.load("ctx-b", "one").await.unwrap().len(), 1);
    }
}
