//! Lateral stream bridge.
//!
//! Lets a second, independent consumer observe an in-flight generation
//! without being the connection that triggered it. The producing side
//! overwrites a per-context snapshot record with the cumulative response on
//! every chunk; consumers poll that record at a fixed interval and stop after
//! the done flag. Polling against a snapshot is a deliberate trade-off for
//! simplicity over latency.

use std::sync::Arc;
use std::time::Duration;

use futures::Stream;

use crate::error::Result;
use crate::store::KvStore;

const KEY_PREFIX: &str = "inferd:llm:result";

/// Default inter-poll wait for subscribers.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Latest observed generation state. Always a full snapshot, never a delta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LateralSnapshot {
    pub response: String,
    pub done: bool,
}

#[derive(Clone)]
pub struct LateralStreamBridge {
    kv: Arc<dyn KvStore>,
}

impl LateralStreamBridge {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    pub fn storage_key(ctx_id: &str, key: &str) -> String {
        format!("{KEY_PREFIX}:{ctx_id}:{key}")
    }

    fn context_pattern(ctx_id: &str) -> String {
        format!("{KEY_PREFIX}:{ctx_id}:*")
    }

    /// Overwrite the snapshot for `(ctx_id, key)` and refresh its expiry.
    /// Last publish wins; concurrent producers on the same key race here.
    pub async fn publish(&self, ctx_id: &str, key: &str, response: &str, done: bool) -> Result<()> {
        self.kv
            .hash_merge(
                &Self::storage_key(ctx_id, key),
                &[
                    ("response", response.to_owned()),
                    ("done", done.to_string()),
                ],
            )
            .await
    }

    /// Poll the snapshot record every `interval`. An absent record means the
    /// generation has not started yet and the poller keeps waiting; each
    /// non-empty read is emitted, and the stream ends after the first
    /// snapshot with `done = true`. Dropping the stream cancels the polling.
    pub fn subscribe(
        &self,
        ctx_id: &str,
        key: &str,
        interval: Duration,
    ) -> impl Stream<Item = Result<LateralSnapshot>> + Send + 'static {
        let kv = Arc::clone(&self.kv);
        let storage_key = Self::storage_key(ctx_id, key);

        async_stream::try_stream! {
            loop {
                let record = kv.hash_read(&storage_key).await?;
                if !record.is_empty() {
                    let snapshot = LateralSnapshot {
                        response: record.get("response").cloned().unwrap_or_default(),
                        done: record.get("done").map(|d| d == "true").unwrap_or(false),
                    };
                    let done = snapshot.done;
                    yield snapshot;
                    if done {
                        break;
                    }
                }
                tokio::time::sleep(interval).await;
            }
        }
    }

    /// Delete every snapshot stored under the context.
    pub async fn delete_all_for_context(&self, ctx_id: &str) -> Result<u64> {
        self.kv.delete_matching(&Self::context_pattern(ctx_id)).await
    }

    /// Delete a single snapshot.
    pub async fn delete_one(&self, ctx_id: &str, key: &str) -> Result<()> {
        self.kv.delete(&Self::storage_key(ctx_id, key)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use futures::StreamExt;

    fn bridge() -> LateralStreamBridge {
        LateralStreamBridge::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn publish_overwrites_previous_snapshot() {
        let bridge = bridge();
        bridge.publish("ctx", "slot", "Hel", false).await.unwrap();
        bridge.publish("ctx", "slot", "Hello!", true).await.unwrap();

        let mut stream = Box::pin(bridge.subscribe("ctx", "slot", Duration::from_millis(5)));
        let snapshot = stream.next().await.unwrap().unwrap();
        assert_eq!(
            snapshot,
            LateralSnapshot {
                response: "Hello!".to_owned(),
                done: true,
            }
        );
        // Terminal snapshot ends the stream.
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn subscriber_observes_snapshots_in_order_and_terminates() {
        let bridge = bridge();
        bridge.publish("ctx", "slot", "Hel", false).await.unwrap();

        let mut stream = Box::pin(bridge.subscribe("ctx", "slot", Duration::from_millis(5)));
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.response, "Hel");
        assert!(!first.done);

        bridge.publish("ctx", "slot", "Hello!", true).await.unwrap();
        // The poller may re-observe the first snapshot before the second
        // publish lands; skip until the terminal one arrives.
        let terminal = loop {
            let snapshot = stream.next().await.unwrap().unwrap();
            if snapshot.done {
                break snapshot;
            }
            assert_eq!(snapshot.response, "Hel");
        };
        assert_eq!(terminal.response, "Hello!");
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn absent_record_keeps_the_poller_waiting() {
        let bridge = bridge();
        let mut stream = Box::pin(bridge.subscribe("ctx", "slot", Duration::from_millis(5)));

        let probe =
            tokio::time::timeout(Duration::from_millis(30), stream.next()).await;
        assert!(probe.is_err(), "poller should wait, not fail, on absent record");

        bridge.publish("ctx", "slot", "now", true).await.unwrap();
        let snapshot = stream.next().await.unwrap().unwrap();
        assert_eq!(snapshot.response, "now");
    }

    #[tokio::test]
    async fn delete_scopes_by_context_and_key() {
        let bridge = bridge();
        bridge.publish("ctx-a", "one", "x", true).await.unwrap();
        bridge.publish("ctx-a", "two", "x", true).await.unwrap();
        bridge.publish("ctx-b", "one", "x", true).await.unwrap();

        bridge.delete_one("ctx-a", "one").await.unwrap();
        assert_eq!(bridge.delete_all_for_context("ctx-a").await.unwrap(), 1);
        assert_eq!(bridge.delete_all_for_context("ctx-b").await.unwrap(), 1);
    }
}
