//! Event log for provisioning runs
//!
//! Append-only audit trail of one run.
//! - Event: envelope with id + timestamp + kind
//! - EventKind: run / resource / bootstrap / export levels
//! - EventLog: thread-safe, clonable handle
//!
//! Resource inputs are recorded by name only; values may carry secrets.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Single event in the run log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic sequence ID (for ordering)
    pub id: u64,
    /// Time since run start (ms)
    pub timestamp_ms: u64,
    pub kind: EventKind,
}

/// All possible event types
///
/// Uses Arc<str> for resource names to enable zero-cost cloning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    // ═══════════════════════════════════════════
    // RUN LEVEL
    // ═══════════════════════════════════════════
    RunStarted {
        run_id: String,
        planning: bool,
    },
    RunFinalized {
        exports: usize,
        failed: usize,
        total_duration_ms: u64,
    },

    // ═══════════════════════════════════════════
    // RESOURCE LEVEL
    // ═══════════════════════════════════════════
    ResourceDeclared {
        resource: Arc<str>,
        kind: String,
        dependencies: Vec<Arc<str>>,
    },
    /// All inputs resolved; the provider has been called
    ResourceSubmitted {
        resource: Arc<str>,
        inputs: Vec<String>,
    },
    ResourceCreated {
        resource: Arc<str>,
        attributes: Vec<String>,
        duration_ms: u64,
    },
    ResourceFailed {
        resource: Arc<str>,
        error: String,
        duration_ms: u64,
    },
    /// Never submitted because an input failed
    ResourceSkipped {
        resource: Arc<str>,
        cause: String,
    },

    // ═══════════════════════════════════════════
    // BOOTSTRAP / EXPORT
    // ═══════════════════════════════════════════
    BootstrapTransition {
        from: String,
        to: String,
    },
    ExportSettled {
        name: String,
        ok: bool,
    },
}

impl EventKind {
    /// Extract the resource name if the event is resource-related
    pub fn resource(&self) -> Option<&str> {
        match self {
            Self::ResourceDeclared { resource, .. }
            | Self::ResourceSubmitted { resource, .. }
            | Self::ResourceCreated { resource, .. }
            | Self::ResourceFailed { resource, .. }
            | Self::ResourceSkipped { resource, .. } => Some(resource),
            Self::RunStarted { .. }
            | Self::RunFinalized { .. }
            | Self::BootstrapTransition { .. }
            | Self::ExportSettled { .. } => None,
        }
    }

    pub fn is_run_event(&self) -> bool {
        matches!(self, Self::RunStarted { .. } | Self::RunFinalized { .. })
    }
}

/// Thread-safe, append-only event log
#[derive(Clone)]
pub struct EventLog {
    events: Arc<RwLock<Vec<Event>>>,
    start_time: Instant,
    next_id: Arc<AtomicU64>,
}

impl EventLog {
    /// Create a new event log (call at run start)
    pub fn new() -> Self {
        Self {
            events: Arc::new(RwLock::new(Vec::new())),
            start_time: Instant::now(),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Emit an event (thread-safe, returns event ID)
    pub fn emit(&self, kind: EventKind) -> u64 {
        // id allocation and push under one lock keeps ids in vector order
        let mut events = self.events.write();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        events.push(Event {
            id,
            timestamp_ms: self.elapsed_ms(),
            kind,
        });
        id
    }

    /// Milliseconds since the log was created
    pub fn elapsed_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.read().clone()
    }

    /// Filter events by resource name
    pub fn filter_resource(&self, resource: &str) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| e.kind.resource() == Some(resource))
            .collect()
    }

    /// Run-level events only
    pub fn run_events(&self) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| e.kind.is_run_event())
            .collect()
    }

    /// Serialize to JSON for persistence/debugging
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self.events()).unwrap_or(Value::Null)
    }

    /// Write the log as pretty JSON
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let body = serde_json::to_string_pretty(&self.events())?;
        std::fs::write(path, body)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn declared(name: &str) -> EventKind {
        EventKind::ResourceDeclared {
            resource: name.into(),
            kind: "storage.Bucket".into(),
            dependencies: vec![],
        }
    }

    #[test]
    fn eventkind_resource_extraction() {
        assert_eq!(declared("vault-storage").resource(), Some("vault-storage"));
        let run = EventKind::RunStarted {
            run_id: "r".into(),
            planning: false,
        };
        assert_eq!(run.resource(), None);
        assert!(run.is_run_event());
    }

    #[test]
    fn eventkind_serializes_with_type_tag() {
        let kind = EventKind::ResourceCreated {
            resource: "vault".into(),
            attributes: vec!["uri".into()],
            duration_ms: 150,
        };
        let json = serde_json::to_value(&kind).unwrap();
        assert_eq!(json["type"], "resource_created");
        assert_eq!(json["resource"], "vault");
        assert_eq!(json["attributes"], json!(["uri"]));
    }

    #[test]
    fn eventkind_deserializes_from_tagged_json() {
        let kind: EventKind = serde_json::from_value(json!({
            "type": "bootstrap_transition",
            "from": "waiting_for_endpoint",
            "to": "initializing"
        }))
        .unwrap();
        assert_eq!(
            kind,
            EventKind::BootstrapTransition {
                from: "waiting_for_endpoint".into(),
                to: "initializing".into(),
            }
        );
    }

    #[test]
    fn written_log_reads_back_as_events() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.json");
        let log = EventLog::new();
        log.emit(EventKind::ResourceDeclared {
            resource: "vault".into(),
            kind: "cloudrunv2.Service".into(),
            dependencies: vec!["vault-svc".into(), "vault-storage".into()],
        });
        log.write_to(&path).unwrap();

        let events: Vec<Event> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, log.events()[0].kind);
        assert_eq!(events[0].kind.resource(), Some("vault"));
    }

    #[test]
    fn eventlog_emit_returns_monotonic_ids() {
        let log = EventLog::new();
        assert!(log.is_empty());
        assert_eq!(log.emit(declared("a")), 0);
        assert_eq!(log.emit(declared("b")), 1);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn eventlog_filters() {
        let log = EventLog::new();
        log.emit(EventKind::RunStarted {
            run_id: "r".into(),
            planning: true,
        });
        log.emit(declared("alpha"));
        log.emit(declared("beta"));
        log.emit(EventKind::ResourceSkipped {
            resource: "alpha".into(),
            cause: "upstream".into(),
        });

        assert_eq!(log.filter_resource("alpha").len(), 2);
        assert_eq!(log.filter_resource("beta").len(), 1);
        assert_eq!(log.run_events().len(), 1);
    }

    #[test]
    fn eventlog_clone_shares_storage() {
        let log = EventLog::new();
        let cloned = log.clone();
        log.emit(declared("x"));
        assert_eq!(cloned.len(), 1);
        assert_eq!(cloned.to_json()[0]["kind"]["type"], "resource_declared");
    }

    #[test]
    fn eventlog_write_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.json");
        let log = EventLog::new();
        log.emit(declared("vault"));
        log.write_to(&path).unwrap();

        let body: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(body[0]["kind"]["resource"], "vault");
    }

    #[test]
    fn eventlog_thread_safe_concurrent_emits() {
        let log = EventLog::new();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let log = log.clone();
                std::thread::spawn(move || {
                    for j in 0..10 {
                        log.emit(declared(&format!("r{}-{}", i, j)));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let events = log.events();
        assert_eq!(events.len(), 80);
        assert!(events.windows(2).all(|w| w[0].id < w[1].id));
    }
}
