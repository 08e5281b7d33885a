//! Key-value store abstraction.
//!
//! Conversation history and lateral-stream snapshots live in an external
//! key-value store behind the [`KvStore`] trait: an ordered log (sorted-set
//! semantics) and a snapshot hash, both with a rolling expiry refreshed on
//! every mutation. The redis backend is the production implementation; the
//! memory backend serves development and tests.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

pub mod memory;
pub mod redis;

pub use memory::MemoryStore;
pub use redis::RedisStore;

/// Rolling lifetime of every stored record. Each mutation resets it.
pub const RECORD_TTL: Duration = Duration::from_secs(60 * 10);

/// Storage contract shared by the conversation store and the lateral stream
/// bridge. All cross-request coordination happens through these per-key
/// operations; no in-process locks are held across calls.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Append `entry` to the ordered log at `key` with score `max + 1`.
    /// An entry already present anywhere in the log is not duplicated and
    /// keeps its score. Refreshes the TTL.
    async fn log_append(&self, key: &str, entry: &str) -> Result<()>;

    /// Replace the log at `key` with `entries`, renumbered 1..=N in the given
    /// order. Refreshes the TTL.
    async fn log_overwrite(&self, key: &str, entries: &[String]) -> Result<()>;

    /// Full ordered read by ascending score. Absent key reads as empty.
    async fn log_read(&self, key: &str) -> Result<Vec<String>>;

    /// Merge `fields` into the hash at `key`, overwriting existing fields.
    /// Refreshes the TTL.
    async fn hash_merge(&self, key: &str, fields: &[(&str, String)]) -> Result<()>;

    /// Full hash read. Absent key reads as empty.
    async fn hash_read(&self, key: &str) -> Result<HashMap<String, String>>;

    /// Delete a single key. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Scan for keys matching `pattern` (redis glob syntax, in practice a
    /// `prefix:*` pattern) and delete them. Returns the number deleted.
    async fn delete_matching(&self, pattern: &str) -> Result<u64>;
}
