use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use super::{glob_to_regex, Faults};
use crate::drivers::{DriverError, DriverResult, KeyTtl, KeyValueDriver, KeyValueInfo};

/// Accounted size of one key in `INFO` figures
const KEY_BYTES: u64 = 64;

#[derive(Debug, Clone, Copy)]
struct Entry {
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_lapsed(&self, now: Instant) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

/// Key-value driver with lazy expiry: lapsed keys stay visible to `SCAN`
/// until deleted, but report as missing to `TTL` and `DEL`.
#[derive(Debug, Default)]
pub struct MemoryKeyValueDriver {
    keys: Mutex<BTreeMap<String, Entry>>,
    faults: Faults,
    peak_keys: AtomicU64,
    max_memory: AtomicU64,
    blocked_clients: AtomicU64,
}

impl MemoryKeyValueDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: &str) {
        self.put(key, None);
    }

    pub fn insert_with_ttl(&self, key: &str, ttl: Duration) {
        self.put(key, Some(Instant::now() + ttl));
    }

    /// Insert a key whose lifetime has already run out
    pub fn insert_lapsed(&self, key: &str) {
        self.put(key, Some(Instant::now()));
    }

    fn put(&self, key: &str, expires_at: Option<Instant>) {
        let mut keys = self.keys.lock();
        keys.insert(key.to_string(), Entry { expires_at });
        self.peak_keys
            .fetch_max(keys.len() as u64, Ordering::SeqCst);
    }

    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        self.keys
            .lock()
            .get(key)
            .map(|entry| !entry.is_lapsed(now))
            .unwrap_or(false)
    }

    /// Every stored key, lapsed or not
    pub fn stored_keys(&self) -> usize {
        self.keys.lock().len()
    }

    pub fn set_max_memory(&self, bytes: u64) {
        self.max_memory.store(bytes, Ordering::SeqCst);
    }

    pub fn set_blocked_clients(&self, count: u64) {
        self.blocked_clients.store(count, Ordering::SeqCst);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.faults.set_unavailable(unavailable);
    }

    /// Fail any scan using exactly this pattern
    pub fn fail_on(&self, pattern: &str) {
        self.faults.fail_on(pattern);
    }

    pub fn clear_faults(&self) {
        self.faults.clear();
    }

    pub fn set_latency(&self, latency: Duration) {
        self.faults.set_latency(latency);
    }
}

#[async_trait]
impl KeyValueDriver for MemoryKeyValueDriver {
    async fn ping(&self) -> DriverResult<()> {
        self.faults.enter().await
    }

    async fn scan(&self, pattern: &str, count_hint: u64) -> DriverResult<Vec<String>> {
        self.scan_at_most(pattern, count_hint, u64::MAX).await
    }

    async fn scan_at_most(
        &self,
        pattern: &str,
        _count_hint: u64,
        limit: u64,
    ) -> DriverResult<Vec<String>> {
        self.faults.enter().await?;
        self.faults.check(pattern)?;

        let matcher = glob_to_regex(pattern)
            .map_err(|e| DriverError::Query(format!("invalid pattern '{}': {}", pattern, e)))?;

        Ok(self
            .keys
            .lock()
            .keys()
            .filter(|key| matcher.is_match(key))
            .take(limit.min(usize::MAX as u64) as usize)
            .cloned()
            .collect())
    }

    async fn delete(&self, keys: &[String]) -> DriverResult<u64> {
        self.faults.enter().await?;
        let now = Instant::now();
        let mut stored = self.keys.lock();

        let mut removed = 0;
        for key in keys {
            if let Some(entry) = stored.remove(key) {
                if !entry.is_lapsed(now) {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    async fn ttl(&self, key: &str) -> DriverResult<KeyTtl> {
        self.faults.enter().await?;
        let now = Instant::now();

        let ttl = match self.keys.lock().get(key) {
            None => KeyTtl::Missing,
            Some(entry) if entry.is_lapsed(now) => KeyTtl::Missing,
            Some(Entry { expires_at: None }) => KeyTtl::Persistent,
            Some(Entry {
                expires_at: Some(at),
            }) => KeyTtl::Expires(at.saturating_duration_since(now).as_secs()),
        };
        Ok(ttl)
    }

    async fn db_size(&self) -> DriverResult<u64> {
        self.faults.enter().await?;
        let now = Instant::now();
        Ok(self
            .keys
            .lock()
            .values()
            .filter(|entry| !entry.is_lapsed(now))
            .count() as u64)
    }

    async fn info(&self) -> DriverResult<KeyValueInfo> {
        self.faults.enter().await?;
        let keys = self.keys.lock();

        Ok(KeyValueInfo {
            used_memory: keys.len() as u64 * KEY_BYTES,
            peak_memory: self.peak_keys.load(Ordering::SeqCst) * KEY_BYTES,
            max_memory: self.max_memory.load(Ordering::SeqCst),
            keys_with_expiry: keys.values().filter(|e| e.expires_at.is_some()).count() as u64,
            connected_clients: 1,
            blocked_clients: self.blocked_clients.load(Ordering::SeqCst),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scan_matches_glob() {
        let driver = MemoryKeyValueDriver::new();
        driver.insert("test:user:1");
        driver.insert("test:user:2");
        driver.insert("prod:user:1");

        let keys = driver.scan("test:*", 100).await.unwrap();
        assert_eq!(keys, vec!["test:user:1", "test:user:2"]);
    }

    #[tokio::test]
    async fn test_bounded_scan_stops_at_limit() {
        let driver = MemoryKeyValueDriver::new();
        for i in 0..5 {
            driver.insert(&format!("test:{}", i));
        }

        let keys = driver.scan_at_most("test:*", 100, 2).await.unwrap();
        assert_eq!(keys, vec!["test:0", "test:1"]);
        assert_eq!(driver.scan("test:*", 100).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_lapsed_keys_scan_but_do_not_count() {
        let driver = MemoryKeyValueDriver::new();
        driver.insert_lapsed("session:old");
        driver.insert_with_ttl("session:live", Duration::from_secs(60));

        assert_eq!(driver.scan("session:*", 10).await.unwrap().len(), 2);
        assert_eq!(driver.ttl("session:old").await.unwrap(), KeyTtl::Missing);
        assert!(matches!(
            driver.ttl("session:live").await.unwrap(),
            KeyTtl::Expires(_)
        ));
        assert_eq!(driver.db_size().await.unwrap(), 1);

        let removed = driver
            .delete(&["session:old".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 0);
        assert_eq!(driver.stored_keys(), 1);
    }

    #[tokio::test]
    async fn test_info_reports_memory() {
        let driver = MemoryKeyValueDriver::new();
        driver.insert("a");
        driver.insert("b");
        driver.set_max_memory(160);

        let info = driver.info().await.unwrap();
        assert_eq!(info.used_memory, 128);
        assert_eq!(info.memory_ratio(), Some(0.8));
    }
}
