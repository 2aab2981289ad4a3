//! vaultgraph - deferred-output resource graph for a self-bootstrapping Vault deployment
//!
//! Resources are declared up front; their outputs are [`Deferred`] values
//! that settle as a [`Provider`] creates them. Dependencies are never listed
//! by hand: they follow from which outputs feed which inputs.

pub mod bootstrap;
pub mod config;
pub mod deferred;
pub mod error;
pub mod event_log;
pub mod export;
pub mod graph;
pub mod provider;
pub mod provision;
pub mod topology;
pub mod util;

pub use bootstrap::{BootstrapSequencer, BootstrapState, InitClient, SecretBundle, Sensitive};
pub use config::{RunSettings, TopologyConfig};
pub use deferred::{Deferred, DeferredState, Settled};
pub use error::{ErrorKind, FixSuggestion, GraphError, Result};
pub use event_log::{Event, EventKind, EventLog};
pub use export::{ExportReport, ExportSink, Exposure};
pub use graph::ResourceGraph;
pub use provider::{create_provider, MockProvider, Provider, ResourceKind, SimulatedProvider};
pub use provision::{PlanEntry, Provisioner, ResourceDescriptor, ResourceOutputs};
pub use topology::{Deployment, RunReport};
