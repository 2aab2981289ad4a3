//! Export sink
//!
//! Collects named top-level results while the topology is composed, then
//! waits for all of them at the end of a run. One failed export never hides
//! another: every entry is reported with its own value or error.

mod report;

pub use report::{ExportReport, ExportResult};

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::bootstrap::Sensitive;
use crate::deferred::Deferred;
use crate::error::GraphError;
use crate::event_log::{EventKind, EventLog};

/// How an export is shown to the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Exposure {
    Plain,
    /// Masked unless the operator opts in
    Sensitive,
}

/// Secret values that can be turned into JSON for an export
pub trait Reveal {
    fn reveal(&self) -> Value;
}

impl Reveal for Sensitive<String> {
    fn reveal(&self) -> Value {
        Value::String(self.expose().clone())
    }
}

impl<T: Reveal> Reveal for Vec<T> {
    fn reveal(&self) -> Value {
        Value::Array(self.iter().map(Reveal::reveal).collect())
    }
}

struct Entry {
    name: String,
    exposure: Exposure,
    value: Deferred<Value>,
}

/// Named results awaiting the end of the run
pub struct ExportSink {
    entries: Vec<Entry>,
    events: EventLog,
}

impl ExportSink {
    pub fn new(events: EventLog) -> Self {
        Self {
            entries: Vec::new(),
            events,
        }
    }

    /// Register a plain export
    pub fn export<T>(&mut self, name: impl Into<String>, value: &Deferred<T>)
    where
        T: Serialize + Clone + Send + Sync + 'static,
    {
        let json = value.try_then(|v| serde_json::to_value(v).map_err(GraphError::from));
        self.push(name.into(), Exposure::Plain, json);
    }

    /// Register a secret export
    pub fn export_sensitive<T>(&mut self, name: impl Into<String>, value: &Deferred<T>)
    where
        T: Reveal + Clone + Send + Sync + 'static,
    {
        let json = value.then(|v| v.reveal());
        self.push(name.into(), Exposure::Sensitive, json);
    }

    fn push(&mut self, name: String, exposure: Exposure, value: Deferred<Value>) {
        // Re-registering a name replaces the earlier entry
        self.entries.retain(|e| e.name != name);
        self.entries.push(Entry {
            name,
            exposure,
            value,
        });
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Wait for every export to settle, up to `deadline`
    ///
    /// Exports still pending at the deadline are failed with
    /// `DependencyFailed` (cause `Unsettled`) so they show up in the report.
    #[instrument(skip(self), fields(exports = self.entries.len()))]
    pub async fn finalize(self, deadline: Duration) -> ExportReport {
        let until = tokio::time::Instant::now() + deadline;

        let waits = self.entries.iter().map(|entry| {
            let settled = entry.value.settled();
            async move {
                match tokio::time::timeout_at(until, settled).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        warn!(export = %entry.name, "still pending at deadline");
                        let cause = Arc::new(GraphError::Unsettled {
                            label: entry.value.label().to_string(),
                        });
                        let _ = entry
                            .value
                            .fail(GraphError::dependency(entry.name.clone(), cause));
                        // Settled either by us or by a late producer
                        entry.value.try_get().unwrap_or_else(|| {
                            Err(Arc::new(GraphError::Unsettled {
                                label: entry.name.clone(),
                            }))
                        })
                    }
                }
            }
        });
        let outcomes = join_all(waits).await;

        let results: Vec<ExportResult> = self
            .entries
            .iter()
            .zip(outcomes)
            .map(|(entry, outcome)| {
                debug!(export = %entry.name, ok = outcome.is_ok(), "export settled");
                self.events.emit(EventKind::ExportSettled {
                    name: entry.name.clone(),
                    ok: outcome.is_ok(),
                });
                ExportResult {
                    name: entry.name.clone(),
                    exposure: entry.exposure,
                    outcome,
                }
            })
            .collect();

        ExportReport::new(results)
    }
}

impl std::fmt::Debug for ExportSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportSink")
            .field("exports", &self.names())
            .finish()
    }
}
