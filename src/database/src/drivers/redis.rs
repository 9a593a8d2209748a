//! Redis driver using a multiplexed connection manager

use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client};
use std::collections::{BTreeSet, HashMap};
use tracing::info;

use super::{DriverResult, KeyTtl, KeyValueDriver, KeyValueInfo};

#[derive(Clone)]
pub struct RedisDriver {
    connection: ConnectionManager,
}

impl RedisDriver {
    pub fn new(connection: ConnectionManager) -> Self {
        Self { connection }
    }

    pub async fn connect(url: &str) -> DriverResult<Self> {
        info!("Connecting to Redis at {}", url);
        let client = Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;
        Ok(Self::new(connection))
    }

    /// Walk the SCAN cursor, returning early once `limit` keys are collected
    async fn scan_keys(
        &self,
        pattern: &str,
        count_hint: u64,
        limit: Option<u64>,
    ) -> DriverResult<Vec<String>> {
        let mut conn = self.connection.clone();
        let mut keys = BTreeSet::new();
        let mut cursor: u64 = 0;

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(count_hint.max(1))
                .query_async(&mut conn)
                .await?;

            keys.extend(batch);
            cursor = next;
            let full = limit.map(|l| keys.len() as u64 >= l).unwrap_or(false);
            if cursor == 0 || full {
                break;
            }
        }

        let limit = limit.unwrap_or(u64::MAX).min(usize::MAX as u64) as usize;
        Ok(keys.into_iter().take(limit).collect())
    }
}

/// Split `INFO` output into `field -> value`, skipping section headers
fn parse_info(raw: &str) -> HashMap<String, String> {
    raw.lines()
        .filter(|line| !line.starts_with('#'))
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .collect()
}

fn info_u64(fields: &HashMap<String, String>, key: &str) -> u64 {
    fields
        .get(key)
        .and_then(|value| value.parse().ok())
        .unwrap_or(0)
}

/// Sum `expires=` over every `dbN:keys=..,expires=..` keyspace line
fn keys_with_expiry(fields: &HashMap<String, String>) -> u64 {
    fields
        .iter()
        .filter(|(key, _)| key.starts_with("db"))
        .filter_map(|(_, value)| {
            value
                .split(',')
                .filter_map(|pair| pair.split_once('='))
                .find(|(name, _)| *name == "expires")
                .and_then(|(_, count)| count.parse::<u64>().ok())
        })
        .sum()
}

fn ttl_from_reply(seconds: i64) -> KeyTtl {
    match seconds {
        -2 => KeyTtl::Missing,
        -1 => KeyTtl::Persistent,
        n => KeyTtl::Expires(n.max(0) as u64),
    }
}

#[async_trait]
impl KeyValueDriver for RedisDriver {
    async fn ping(&self) -> DriverResult<()> {
        let mut conn = self.connection.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn scan(&self, pattern: &str, count_hint: u64) -> DriverResult<Vec<String>> {
        self.scan_keys(pattern, count_hint, None).await
    }

    async fn scan_at_most(
        &self,
        pattern: &str,
        count_hint: u64,
        limit: u64,
    ) -> DriverResult<Vec<String>> {
        self.scan_keys(pattern, count_hint, Some(limit)).await
    }

    async fn delete(&self, keys: &[String]) -> DriverResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }

        let mut conn = self.connection.clone();
        let removed: u64 = redis::cmd("DEL").arg(keys).query_async(&mut conn).await?;
        Ok(removed)
    }

    async fn ttl(&self, key: &str) -> DriverResult<KeyTtl> {
        let mut conn = self.connection.clone();
        let seconds: i64 = redis::cmd("TTL").arg(key).query_async(&mut conn).await?;
        Ok(ttl_from_reply(seconds))
    }

    async fn db_size(&self) -> DriverResult<u64> {
        let mut conn = self.connection.clone();
        let size: u64 = redis::cmd("DBSIZE").query_async(&mut conn).await?;
        Ok(size)
    }

    async fn info(&self) -> DriverResult<KeyValueInfo> {
        let mut conn = self.connection.clone();
        let raw: String = redis::cmd("INFO").query_async(&mut conn).await?;
        let fields = parse_info(&raw);

        Ok(KeyValueInfo {
            used_memory: info_u64(&fields, "used_memory"),
            peak_memory: info_u64(&fields, "used_memory_peak"),
            max_memory: info_u64(&fields, "maxmemory"),
            keys_with_expiry: keys_with_expiry(&fields),
            connected_clients: info_u64(&fields, "connected_clients"),
            blocked_clients: info_u64(&fields, "blocked_clients"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_INFO: &str = "# Clients\r\nconnected_clients:3\r\nblocked_clients:1\r\n\r\n# Memory\r\nused_memory:1048576\r\nused_memory_peak:2097152\r\nmaxmemory:0\r\n\r\n# Keyspace\r\ndb0:keys=120,expires=20,avg_ttl=3000\r\ndb2:keys=5,expires=5,avg_ttl=10\r\n";

    #[test]
    fn test_parse_info_fields() {
        let fields = parse_info(SAMPLE_INFO);
        assert_eq!(info_u64(&fields, "used_memory"), 1_048_576);
        assert_eq!(info_u64(&fields, "blocked_clients"), 1);
        assert_eq!(info_u64(&fields, "not_there"), 0);
        assert!(!fields.contains_key("# Memory"));
    }

    #[test]
    fn test_keys_with_expiry_sums_databases() {
        let fields = parse_info(SAMPLE_INFO);
        assert_eq!(keys_with_expiry(&fields), 25);
    }

    #[test]
    fn test_ttl_reply_mapping() {
        assert_eq!(ttl_from_reply(-2), KeyTtl::Missing);
        assert_eq!(ttl_from_reply(-1), KeyTtl::Persistent);
        assert_eq!(ttl_from_reply(90), KeyTtl::Expires(90));
    }
}
