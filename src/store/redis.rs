//! Redis implementation of [`KvStore`].
//!
//! Ordered logs map to sorted sets (ZADD NX with a ZREVRANGE max-score
//! lookup), snapshots to hashes (HSET field-merge). Every mutation refreshes
//! the record TTL with EXPIRE. A single multiplexed connection manager is
//! shared by all requests.

use std::collections::HashMap;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::info;

use crate::error::Result;

use super::{KvStore, RECORD_TTL};

#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect to redis and verify the connection with a PING.
    pub async fn connect(url: &str) -> Result<Self> {
        info!("Connecting to redis at {}", url);
        let client = redis::Client::open(url).map_err(crate::error::Error::from)?;
        let mut conn = ConnectionManager::new(client).await?;
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        info!("Redis ping result: {}", pong);
        Ok(Self { conn })
    }

    fn ttl_secs() -> i64 {
        RECORD_TTL.as_secs() as i64
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn log_append(&self, key: &str, entry: &str) -> Result<()> {
        let mut conn = self.conn.clone();

        // Highest-scored member tells us the next score; 0 for an absent key.
        let top: Vec<(String, i64)> = redis::cmd("ZREVRANGE")
            .arg(key)
            .arg(0)
            .arg(0)
            .arg("WITHSCORES")
            .query_async(&mut conn)
            .await?;
        let max_score = top.first().map(|(_, score)| *score).unwrap_or(0);

        redis::cmd("ZADD")
            .arg(key)
            .arg("NX")
            .arg(max_score + 1)
            .arg(entry)
            .query_async::<_, ()>(&mut conn)
            .await?;
        conn.expire::<_, ()>(key, Self::ttl_secs()).await?;
        Ok(())
    }

    async fn log_overwrite(&self, key: &str, entries: &[String]) -> Result<()> {
        let mut conn = self.conn.clone();

        let mut pipe = redis::pipe();
        pipe.atomic().del(key).ignore();
        if !entries.is_empty() {
            let mut zadd = redis::cmd("ZADD");
            zadd.arg(key);
            for (i, entry) in entries.iter().enumerate() {
                zadd.arg(i as i64 + 1).arg(entry);
            }
            pipe.add_command(zadd).ignore();
        }
        pipe.expire(key, Self::ttl_secs()).ignore();
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn log_read(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let entries: Vec<String> = conn.zrange(key, 0, -1).await?;
        Ok(entries)
    }

    async fn hash_merge(&self, key: &str, fields: &[(&str, String)]) -> Result<()> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("HSET");
        cmd.arg(key);
        for (field, value) in fields {
            cmd.arg(*field).arg(value);
        }
        cmd.query_async::<_, ()>(&mut conn).await?;
        conn.expire::<_, ()>(key, Self::ttl_secs()).await?;
        Ok(())
    }

    async fn hash_read(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut conn = self.conn.clone();
        let map: HashMap<String, String> = conn.hgetall(key).await?;
        Ok(map)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn delete_matching(&self, pattern: &str) -> Result<u64> {
        let mut scan_conn = self.conn.clone();
        let keys: Vec<String> = {
            let mut iter = scan_conn.scan_match::<_, String>(pattern).await?;
            let mut keys = Vec::new();
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
            keys
        };

        let mut conn = self.conn.clone();
        let mut deleted = 0;
        for key in keys {
            conn.del::<_, ()>(&key).await?;
            deleted += 1;
        }
        Ok(deleted)
    }
}
