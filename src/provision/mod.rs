//! Resource provisioner
//!
//! `declare` turns a [`ResourceDescriptor`] into output handles:
//!
//! 1. The descriptor is recorded in the [`ResourceGraph`]; its dependencies
//!    are the origins of its input values.
//! 2. Inputs are fanned in with `all_named`.
//! 3. Once they resolve, one provider call is spawned on the runtime that was
//!    current at declaration time. The continuation is `FnOnce`, so the
//!    provider is invoked at most once per resource.
//! 4. The provider's attributes resolve each declared output field. A
//!    provider error fails every field with `ProvisionFailed`; a failed input
//!    fails every field with `DependencyFailed` and the provider is never called.
//!
//! In planning mode step 3 never happens: the graph is recorded and outputs
//! stay pending.

mod descriptor;

pub use descriptor::{ResourceDescriptor, ResourceOutputs};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::deferred::{Deferred, DeferredState, Origins};
use crate::error::{GraphError, Result};
use crate::event_log::{EventKind, EventLog};
use crate::graph::{self, ResourceGraph};
use crate::provider::{Provider, ProvisionRequest, ResourceKind};

/// One row of a plan: a resource and what it waits on
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanEntry {
    pub name: String,
    pub kind: String,
    pub dependencies: Vec<String>,
}

/// Settlement state of a declared resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceStatus {
    pub name: String,
    pub kind: String,
    pub state: DeferredState,
}

struct Inner {
    /// `None` in planning mode
    provider: Option<Arc<dyn Provider>>,
    graph: Mutex<ResourceGraph>,
    declared: Mutex<Vec<(Arc<str>, Arc<str>, Deferred<Value>)>>,
    events: EventLog,
}

/// Declares resources against a provider
#[derive(Clone)]
pub struct Provisioner {
    inner: Arc<Inner>,
}

impl Provisioner {
    pub fn new(provider: Arc<dyn Provider>, events: EventLog) -> Self {
        Self::build(Some(provider), events)
    }

    /// Record declarations without ever calling a provider
    pub fn planning(events: EventLog) -> Self {
        Self::build(None, events)
    }

    fn build(provider: Option<Arc<dyn Provider>>, events: EventLog) -> Self {
        Self {
            inner: Arc::new(Inner {
                provider,
                graph: Mutex::new(ResourceGraph::new()),
                declared: Mutex::new(Vec::new()),
                events,
            }),
        }
    }

    pub fn is_planning(&self) -> bool {
        self.inner.provider.is_none()
    }

    pub fn events(&self) -> &EventLog {
        &self.inner.events
    }

    /// Declare a resource and get its output handles
    pub fn declare(&self, descriptor: ResourceDescriptor) -> Result<ResourceOutputs> {
        let ResourceDescriptor {
            name,
            kind,
            inputs,
            config,
            outputs,
        } = descriptor;

        let dependencies =
            self.record(&name, kind.as_str(), inputs.values().map(Deferred::origins))?;
        debug!(resource = %name, %kind, ?dependencies, "declared");

        let id: Arc<str> = Arc::from(name.as_str());
        let created = Deferred::<Value>::from_resource(format!("{}.created", name), &name);
        self.inner.declared.lock().push((
            Arc::clone(&id),
            Arc::from(kind.as_str()),
            created.clone(),
        ));

        let fields = outputs
            .into_iter()
            .map(|attribute| {
                let field = extract(&id, &attribute, &created);
                (attribute, field)
            })
            .collect::<BTreeMap<_, _>>();

        if let Some(provider) = &self.inner.provider {
            self.schedule(
                Submission {
                    resource: Arc::clone(&id),
                    kind,
                    config,
                    provider: Arc::clone(provider),
                    events: self.inner.events.clone(),
                    created: created.clone(),
                },
                &inputs,
            );
        }

        Ok(ResourceOutputs {
            name: id,
            kind,
            created,
            fields,
        })
    }

    /// Record a non-provider step (such as the bootstrap handshake) in the graph
    pub fn register_step(&self, name: &str, kind: &str, origins: &Origins) -> Result<()> {
        self.record(name, kind, std::iter::once(origins)).map(|_| ())
    }

    fn record<'a>(
        &self,
        name: &str,
        kind: &str,
        origins: impl Iterator<Item = &'a Origins>,
    ) -> Result<Vec<Arc<str>>> {
        let mut dependencies: Vec<Arc<str>> = Vec::new();
        for set in origins {
            for origin in set.iter() {
                if !dependencies.contains(origin) {
                    dependencies.push(Arc::clone(origin));
                }
            }
        }

        self.inner
            .graph
            .lock()
            .add_node(name, kind, dependencies.iter().map(|d| d.as_ref()))?;
        self.inner.events.emit(EventKind::ResourceDeclared {
            resource: Arc::from(name),
            kind: kind.to_string(),
            dependencies: dependencies.clone(),
        });
        Ok(dependencies)
    }

    fn schedule(&self, submission: Submission, inputs: &graph::Bindings) {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                let _ = submission.created.fail(GraphError::NoRuntime {
                    label: submission.resource.to_string(),
                });
                return;
            }
        };

        let combined = graph::all_named(format!("{}.inputs", submission.resource), inputs);
        combined.on_settled(move |outcome| match outcome {
            Ok(values) => {
                submission.events.emit(EventKind::ResourceSubmitted {
                    resource: Arc::clone(&submission.resource),
                    inputs: values.keys().cloned().collect(),
                });
                let values = values.clone();
                handle.spawn(submission.run(values));
            }
            Err(cause) => {
                warn!(resource = %submission.resource, error = %cause, "skipped: input failed");
                submission.events.emit(EventKind::ResourceSkipped {
                    resource: Arc::clone(&submission.resource),
                    cause: cause.to_string(),
                });
                let _ = submission.created.fail(GraphError::dependency(
                    submission.resource.to_string(),
                    Arc::clone(cause),
                ));
            }
        });
    }

    /// Resources in dependency order with their direct dependencies
    pub fn plan(&self) -> Result<Vec<PlanEntry>> {
        let graph = self.inner.graph.lock();
        let order = graph.topological_order()?;
        Ok(order
            .iter()
            .map(|name| PlanEntry {
                name: name.to_string(),
                kind: graph.kind_of(name).unwrap_or_default().to_string(),
                dependencies: graph
                    .dependencies(name)
                    .iter()
                    .map(|d| d.to_string())
                    .collect(),
            })
            .collect())
    }

    /// Run `f` against the recorded graph
    pub fn with_graph<R>(&self, f: impl FnOnce(&ResourceGraph) -> R) -> R {
        f(&self.inner.graph.lock())
    }

    /// Wait until every declared resource has settled or `until` passes
    ///
    /// Returns the number of resources still pending.
    pub async fn wait_settled(&self, until: tokio::time::Instant) -> usize {
        let created: Vec<Deferred<Value>> = self
            .inner
            .declared
            .lock()
            .iter()
            .map(|(_, _, created)| created.clone())
            .collect();

        let mut pending = 0;
        for value in created {
            if tokio::time::timeout_at(until, value.settled()).await.is_err() {
                pending += 1;
            }
        }
        pending
    }

    /// Current state of every provider-backed resource, in declaration order
    pub fn statuses(&self) -> Vec<ResourceStatus> {
        self.inner
            .declared
            .lock()
            .iter()
            .map(|(name, kind, created)| ResourceStatus {
                name: name.to_string(),
                kind: kind.to_string(),
                state: created.state(),
            })
            .collect()
    }
}

impl std::fmt::Debug for Provisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provisioner")
            .field("planning", &self.is_planning())
            .field("resources", &self.inner.declared.lock().len())
            .finish()
    }
}

/// Everything one provider call needs, moved into the spawned task
struct Submission {
    resource: Arc<str>,
    kind: ResourceKind,
    config: Value,
    provider: Arc<dyn Provider>,
    events: EventLog,
    created: Deferred<Value>,
}

impl Submission {
    #[instrument(
        name = "provision",
        skip_all,
        fields(resource = %self.resource, kind = %self.kind)
    )]
    async fn run(self, inputs: serde_json::Map<String, Value>) {
        let request = ProvisionRequest {
            name: self.resource.to_string(),
            kind: self.kind,
            inputs,
            config: self.config,
        };

        let started = Instant::now();
        let result = self.provider.create(request).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(attributes) => {
                debug!(duration_ms, "created");
                self.events.emit(EventKind::ResourceCreated {
                    resource: Arc::clone(&self.resource),
                    attributes: attributes.keys().cloned().collect(),
                    duration_ms,
                });
                let _ = self.created.resolve(Value::Object(attributes));
            }
            Err(e) => {
                let reason = format!("{:#}", e);
                warn!(duration_ms, error = %reason, "provider failed");
                self.events.emit(EventKind::ResourceFailed {
                    resource: Arc::clone(&self.resource),
                    error: reason.clone(),
                    duration_ms,
                });
                let _ = self.created.fail(GraphError::ProvisionFailed {
                    resource: self.resource.to_string(),
                    reason,
                });
            }
        }
    }
}

/// Output field pulled from the attribute bundle
fn extract(resource: &Arc<str>, attribute: &str, created: &Deferred<Value>) -> Deferred<Value> {
    let field = Deferred::<Value>::from_resource(format!("{}.{}", resource, attribute), resource);
    let target = field.clone();
    let resource = resource.to_string();
    let attribute = attribute.to_string();
    created.on_settled(move |outcome| {
        let next = match outcome {
            Ok(bundle) => bundle.get(&attribute).cloned().ok_or_else(|| {
                Arc::new(GraphError::MissingAttribute {
                    resource,
                    attribute,
                })
            }),
            Err(failure) => Err(Arc::clone(failure)),
        };
        let _ = target.settle(next);
    });
    field
}
