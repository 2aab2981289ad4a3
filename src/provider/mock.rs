//! Mock provider for testing
//!
//! Scripted per-resource outputs, failures and delays. Every request is
//! recorded with the instant it arrived, so tests can check ordering.
//! Unscripted resources fall back to simulated attributes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;

use super::{Provider, ProviderOutputs, ProvisionRequest, SimulatedProvider};

/// One request as seen by the mock
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub request: ProvisionRequest,
    pub at: Instant,
}

#[derive(Debug, Clone, Default)]
struct Script {
    outputs: Option<ProviderOutputs>,
    failure: Option<String>,
    delay: Option<Duration>,
}

/// Mock provider that returns scripted attributes
pub struct MockProvider {
    scripts: DashMap<String, Script>,
    /// Track all requests made (for assertions)
    calls: Arc<Mutex<Vec<RecordedCall>>>,
    fallback: SimulatedProvider,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            scripts: DashMap::new(),
            calls: Arc::new(Mutex::new(Vec::new())),
            fallback: SimulatedProvider::new(),
        }
    }

    /// Return exactly these attributes for the named resource
    ///
    /// Non-object values are ignored.
    pub fn with_outputs(self, resource: impl Into<String>, outputs: Value) -> Self {
        if let Value::Object(map) = outputs {
            self.scripts.entry(resource.into()).or_default().outputs = Some(map);
        }
        self
    }

    /// Fail the named resource with a provider error
    pub fn with_failure(self, resource: impl Into<String>, reason: impl Into<String>) -> Self {
        self.scripts.entry(resource.into()).or_default().failure = Some(reason.into());
        self
    }

    /// Delay the answer for the named resource
    pub fn with_delay(self, resource: impl Into<String>, delay: Duration) -> Self {
        self.scripts.entry(resource.into()).or_default().delay = Some(delay);
        self
    }

    /// Pin a service URI in the simulated fallback
    pub fn with_endpoint(mut self, resource: impl Into<String>, uri: impl Into<String>) -> Self {
        self.fallback = self.fallback.with_endpoint(resource, uri);
        self
    }

    /// All requests received, in arrival order
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    /// Requests received for one resource
    pub fn calls_for(&self, resource: &str) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.request.name == resource)
            .cloned()
            .collect()
    }

    pub fn call_count(&self, resource: &str) -> usize {
        self.calls_for(resource).len()
    }

    pub fn was_called(&self, resource: &str) -> bool {
        self.call_count(resource) > 0
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn create(&self, request: ProvisionRequest) -> Result<ProviderOutputs> {
        self.calls.lock().push(RecordedCall {
            request: request.clone(),
            at: Instant::now(),
        });

        let script = self
            .scripts
            .get(&request.name)
            .map(|s| s.value().clone())
            .unwrap_or_default();

        if let Some(delay) = script.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(reason) = script.failure {
            return Err(anyhow!(reason));
        }
        match script.outputs {
            Some(outputs) => Ok(outputs),
            None => self.fallback.synthesize(&request),
        }
    }
}
