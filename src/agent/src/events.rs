//! # Lifecycle Events
//!
//! The orchestrator announces every backend call through a small synchronous
//! event bus. Listeners are invoked in subscription order on the task that
//! produced the event, so they must not block.

use cleanup_shared::{BackendKind, CleanupFailure, CleanupResult, CleanupVerificationResult, LogLevel};
use parking_lot::RwLock;
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Which mutating strategy call produced an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupOperation {
    Cleanup,
    Reset,
}

impl CleanupOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            CleanupOperation::Cleanup => "cleanup",
            CleanupOperation::Reset => "reset",
        }
    }
}

impl std::fmt::Display for CleanupOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CleanupEvent {
    CleanupStart {
        execution_id: Uuid,
        operation: CleanupOperation,
        backend: BackendKind,
    },
    CleanupComplete {
        execution_id: Uuid,
        operation: CleanupOperation,
        result: CleanupResult,
    },
    CleanupError {
        execution_id: Uuid,
        operation: CleanupOperation,
        backend: BackendKind,
        failure: CleanupFailure,
    },
    VerificationStart {
        execution_id: Uuid,
        backend: BackendKind,
    },
    VerificationComplete {
        execution_id: Uuid,
        result: CleanupVerificationResult,
    },
}

impl CleanupEvent {
    pub fn name(&self) -> &'static str {
        match self {
            CleanupEvent::CleanupStart { .. } => "cleanup_start",
            CleanupEvent::CleanupComplete { .. } => "cleanup_complete",
            CleanupEvent::CleanupError { .. } => "cleanup_error",
            CleanupEvent::VerificationStart { .. } => "verification_start",
            CleanupEvent::VerificationComplete { .. } => "verification_complete",
        }
    }

    pub fn backend(&self) -> BackendKind {
        match self {
            CleanupEvent::CleanupStart { backend, .. }
            | CleanupEvent::CleanupError { backend, .. }
            | CleanupEvent::VerificationStart { backend, .. } => *backend,
            CleanupEvent::CleanupComplete { result, .. } => result.database,
            CleanupEvent::VerificationComplete { result, .. } => result.database,
        }
    }

    pub fn execution_id(&self) -> Uuid {
        match self {
            CleanupEvent::CleanupStart { execution_id, .. }
            | CleanupEvent::CleanupComplete { execution_id, .. }
            | CleanupEvent::CleanupError { execution_id, .. }
            | CleanupEvent::VerificationStart { execution_id, .. }
            | CleanupEvent::VerificationComplete { execution_id, .. } => *execution_id,
        }
    }
}

/// Receives orchestrator events
pub trait CleanupEventListener: Send + Sync {
    fn on_event(&self, event: &CleanupEvent);
}

impl<F> CleanupEventListener for F
where
    F: Fn(&CleanupEvent) + Send + Sync,
{
    fn on_event(&self, event: &CleanupEvent) {
        self(event)
    }
}

/// Handle returned by [`EventBus::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<Vec<(ListenerId, Arc<dyn CleanupEventListener>)>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: Arc<dyn CleanupEventListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.listeners.write().push((id, listener));
        id
    }

    /// Returns false when the id was not subscribed
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Deliver `event` to every listener in subscription order
    pub fn emit(&self, event: &CleanupEvent) {
        // Snapshot so listeners may (un)subscribe while being notified
        let listeners: Vec<_> = self
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();

        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener.on_event(event))).is_err() {
                warn!("Event listener panicked while handling {}", event.name());
            }
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// Default listener: writes events to `tracing` according to a [`LogLevel`]
#[derive(Debug)]
pub struct LoggingListener {
    level: RwLock<LogLevel>,
}

impl LoggingListener {
    pub fn new(level: LogLevel) -> Self {
        Self {
            level: RwLock::new(level),
        }
    }

    pub fn level(&self) -> LogLevel {
        *self.level.read()
    }

    pub fn set_level(&self, level: LogLevel) {
        *self.level.write() = level;
    }
}

impl CleanupEventListener for LoggingListener {
    fn on_event(&self, event: &CleanupEvent) {
        let level = self.level();

        match event {
            CleanupEvent::CleanupStart {
                execution_id,
                operation,
                backend,
            } => {
                if level.allows(LogLevel::Debug) {
                    debug!(%execution_id, backend = %backend, "Starting {}", operation);
                }
            }
            CleanupEvent::CleanupComplete {
                execution_id,
                operation,
                result,
            } => {
                if !result.success && level.allows(LogLevel::Warn) {
                    warn!(
                        %execution_id,
                        backend = %result.database,
                        errors = result.error_count(),
                        "{} finished with errors after {}ms",
                        operation,
                        result.duration_ms
                    );
                } else if result.success && level.allows(LogLevel::Info) {
                    info!(
                        %execution_id,
                        backend = %result.database,
                        records_removed = result.records_removed,
                        "{} completed in {}ms",
                        operation,
                        result.duration_ms
                    );
                }
            }
            CleanupEvent::CleanupError {
                execution_id,
                operation,
                backend,
                failure,
            } => {
                if level.allows(LogLevel::Error) {
                    error!(
                        %execution_id,
                        backend = %backend,
                        kind = %failure.kind,
                        "{} failed: {}",
                        operation,
                        failure.message
                    );
                }
            }
            CleanupEvent::VerificationStart {
                execution_id,
                backend,
            } => {
                if level.allows(LogLevel::Debug) {
                    debug!(%execution_id, backend = %backend, "Starting verification");
                }
            }
            CleanupEvent::VerificationComplete {
                execution_id,
                result,
            } => {
                if result.is_clean {
                    if level.allows(LogLevel::Info) {
                        info!(
                            %execution_id,
                            backend = %result.database,
                            "Verification clean in {}ms",
                            result.verification_time_ms
                        );
                    }
                } else if level.allows(LogLevel::Warn) {
                    warn!(
                        %execution_id,
                        backend = %result.database,
                        issues = result.issues.len(),
                        "Verification found issues"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn start_event() -> CleanupEvent {
        CleanupEvent::CleanupStart {
            execution_id: Uuid::new_v4(),
            operation: CleanupOperation::Cleanup,
            backend: BackendKind::KeyValue,
        }
    }

    #[test]
    fn test_listeners_receive_events_in_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let first = seen.clone();
        bus.subscribe(Arc::new(move |e: &CleanupEvent| {
            first.lock().push(format!("first:{}", e.name()))
        }));
        let second = seen.clone();
        bus.subscribe(Arc::new(move |e: &CleanupEvent| {
            second.lock().push(format!("second:{}", e.name()))
        }));

        bus.emit(&start_event());
        assert_eq!(
            *seen.lock(),
            vec!["first:cleanup_start", "second:cleanup_start"]
        );
    }

    #[test]
    fn test_unsubscribe_by_id() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicU64::new(0));

        let counter = count.clone();
        let id = bus.subscribe(Arc::new(move |_: &CleanupEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        bus.emit(&start_event());
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.emit(&start_event());

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.listener_count(), 0);
    }

    #[test]
    fn test_panicking_listener_does_not_stop_dispatch() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicU64::new(0));

        bus.subscribe(Arc::new(|_: &CleanupEvent| panic!("listener bug")));
        let counter = count.clone();
        bus.subscribe(Arc::new(move |_: &CleanupEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        bus.emit(&start_event());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_event_metadata() {
        let event = start_event();
        assert_eq!(event.backend(), BackendKind::KeyValue);

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "cleanup_start");
        assert_eq!(json["backend"], "key_value");
    }
}
