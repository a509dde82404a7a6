//! Redis window store using sorted sets.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, Script};
use tracing::{debug, info};

use super::{StoreError, StoreResult, WindowEntry, WindowStore};

/// Prune, insert, refresh expiry and count in one server-side step.
const RECORD_AND_COUNT: &str = r#"
local key = KEYS[1]
local score = tonumber(ARGV[1])
local member = ARGV[2]
local ttl_ms = tonumber(ARGV[3])
local lo = tonumber(ARGV[4])
local hi = tonumber(ARGV[5])

redis.call('ZREMRANGEBYSCORE', key, '-inf', '(' .. lo)
redis.call('ZADD', key, score, member)
redis.call('PEXPIRE', key, ttl_ms)
return redis.call('ZCOUNT', key, lo, hi)
"#;

/// [`WindowStore`] backed by a shared Redis instance.
///
/// The connection manager multiplexes every evaluation over one connection
/// and reconnects on failure. Cloning it is cheap.
#[derive(Clone)]
pub struct RedisWindowStore {
    conn: ConnectionManager,
    script: Script,
}

impl RedisWindowStore {
    /// Connect to Redis and verify the connection with a `PING`.
    pub async fn connect(url: &str, connect_timeout: Duration) -> StoreResult<Self> {
        let client = Client::open(url)?;

        let conn = tokio::time::timeout(connect_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| StoreError::Timeout(connect_timeout))??;

        let store = Self {
            conn,
            script: Script::new(RECORD_AND_COUNT),
        };
        tokio::time::timeout(connect_timeout, store.ping())
            .await
            .map_err(|_| StoreError::Timeout(connect_timeout))??;

        info!(url = %redacted(url), "Connected to Redis window store");
        Ok(store)
    }
}

/// Strip credentials from a Redis URL before logging it.
fn redacted(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &url[..scheme_end], &url[at..])
        }
        _ => url.to_string(),
    }
}

fn ttl_millis(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX).max(1)
}

#[async_trait]
impl WindowStore for RedisWindowStore {
    async fn add_entry(&self, key: &str, entry: &WindowEntry) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("ZADD")
            .arg(key)
            .arg(entry.score)
            .arg(&entry.member)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn set_expiry(&self, key: &str, ttl: Duration) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("PEXPIRE")
            .arg(key)
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn count_in_range(&self, key: &str, lo: i64, hi: i64) -> StoreResult<u64> {
        let mut conn = self.conn.clone();
        let count: u64 = redis::cmd("ZCOUNT")
            .arg(key)
            .arg(lo)
            .arg(hi)
            .query_async(&mut conn)
            .await?;
        Ok(count)
    }

    async fn oldest_entries(&self, key: &str, n: usize) -> StoreResult<Vec<WindowEntry>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let raw: Vec<(String, f64)> = redis::cmd("ZRANGE")
            .arg(key)
            .arg(0)
            .arg(n as i64 - 1)
            .arg("WITHSCORES")
            .query_async(&mut conn)
            .await?;

        Ok(raw
            .into_iter()
            .map(|(member, score)| WindowEntry::new(score as i64, member))
            .collect())
    }

    async fn prune_before(&self, key: &str, cutoff: i64) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("ZREMRANGEBYSCORE")
            .arg(key)
            .arg("-inf")
            .arg(format!("({}", cutoff))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn record(
        &self,
        key: &str,
        entry: &WindowEntry,
        ttl: Duration,
        cutoff: i64,
    ) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .cmd("ZREMRANGEBYSCORE")
            .arg(key)
            .arg("-inf")
            .arg(format!("({}", cutoff))
            .ignore()
            .cmd("ZADD")
            .arg(key)
            .arg(entry.score)
            .arg(&entry.member)
            .ignore()
            .cmd("PEXPIRE")
            .arg(key)
            .arg(ttl_millis(ttl))
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn record_and_count(
        &self,
        key: &str,
        entry: &WindowEntry,
        ttl: Duration,
        lo: i64,
        hi: i64,
    ) -> StoreResult<u64> {
        let mut conn = self.conn.clone();
        let count: u64 = self
            .script
            .key(key)
            .arg(entry.score)
            .arg(&entry.member)
            .arg(ttl_millis(ttl))
            .arg(lo)
            .arg(hi)
            .invoke_async(&mut conn)
            .await?;
        Ok(count)
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let reply: String = redis::cmd("PING").query_async(&mut conn).await?;
        if reply != "PONG" {
            debug!(reply = %reply, "Unexpected PING reply");
            return Err(StoreError::Unavailable(format!(
                "unexpected PING reply: {}",
                reply
            )));
        }
        Ok(())
    }
}
