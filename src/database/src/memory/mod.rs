//! In-memory drivers
//!
//! Each driver keeps its state behind a `parking_lot` mutex and can be told to
//! become unreachable, to fail on a named object, or to add latency to every
//! call. Tests keep an `Arc` to the driver, seed it, hand a clone to a
//! strategy, then inspect what is left.

use parking_lot::Mutex;
use regex::Regex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use crate::drivers::{DriverError, DriverResult};

mod document;
mod key_value;
mod relational;
mod vector;

pub use document::MemoryDocumentDriver;
pub use key_value::MemoryKeyValueDriver;
pub use relational::{MemoryRelationalDriver, MemoryRelationalTransaction};
pub use vector::MemoryVectorDriver;

/// Fault injection shared by every in-memory driver
#[derive(Debug, Default)]
pub(crate) struct Faults {
    unavailable: AtomicBool,
    failing: Mutex<HashSet<String>>,
    latency_ms: AtomicU64,
}

impl Faults {
    pub(crate) fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub(crate) fn fail_on(&self, object: &str) {
        self.failing.lock().insert(object.to_string());
    }

    pub(crate) fn clear(&self) {
        self.failing.lock().clear();
        self.unavailable.store(false, Ordering::SeqCst);
    }

    pub(crate) fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Apply latency, then fail if the backend is marked unreachable
    pub(crate) async fn enter(&self) -> DriverResult<()> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        if self.unavailable.load(Ordering::SeqCst) {
            return Err(DriverError::Connection("backend unavailable".to_string()));
        }
        Ok(())
    }

    pub(crate) fn check(&self, object: &str) -> DriverResult<()> {
        if self.failing.lock().contains(object) {
            return Err(DriverError::Query(format!(
                "injected failure on '{}'",
                object
            )));
        }
        Ok(())
    }
}

/// Translate a Redis-style glob (`*`, `?`, `[...]`) into an anchored regex
pub fn glob_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut expression = String::with_capacity(pattern.len() + 8);
    expression.push('^');

    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => expression.push_str(".*"),
            '?' => expression.push('.'),
            '[' => {
                expression.push('[');
                if chars.peek() == Some(&'^') {
                    chars.next();
                    expression.push('^');
                }
                for inner in chars.by_ref() {
                    if inner == ']' {
                        break;
                    }
                    if inner == '\\' || inner == '[' {
                        expression.push('\\');
                    }
                    expression.push(inner);
                }
                expression.push(']');
            }
            '\\' => {
                if let Some(escaped) = chars.next() {
                    expression.push_str(&regex::escape(&escaped.to_string()));
                }
            }
            other => expression.push_str(&regex::escape(&other.to_string())),
        }
    }

    expression.push('$');
    Regex::new(&expression)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_star_and_question_mark() {
        let re = glob_to_regex("test:*").unwrap();
        assert!(re.is_match("test:user:1"));
        assert!(!re.is_match("prod:test:1"));

        let re = glob_to_regex("session:?").unwrap();
        assert!(re.is_match("session:a"));
        assert!(!re.is_match("session:ab"));
    }

    #[test]
    fn test_glob_escapes_regex_metacharacters() {
        let re = glob_to_regex("cache.v1+*").unwrap();
        assert!(re.is_match("cache.v1+x"));
        assert!(!re.is_match("cacheXv1+x"));
    }

    #[test]
    fn test_glob_character_class() {
        let re = glob_to_regex("tmp_[ab]").unwrap();
        assert!(re.is_match("tmp_a"));
        assert!(!re.is_match("tmp_c"));
    }

    #[tokio::test]
    async fn test_faults() {
        let faults = Faults::default();
        assert!(faults.enter().await.is_ok());

        faults.fail_on("users");
        assert!(faults.check("users").is_err());
        assert!(faults.check("orders").is_ok());

        faults.set_unavailable(true);
        assert!(matches!(faults.enter().await, Err(DriverError::Connection(_))));

        faults.clear();
        assert!(faults.enter().await.is_ok());
        assert!(faults.check("users").is_ok());
    }
}
