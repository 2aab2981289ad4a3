//! # Provider Abstraction Layer
//!
//! Trait and implementations for the cloud resource collaborator.
//!
//! ## Overview
//!
//! The provider receives one fully-resolved [`ProvisionRequest`] per declared
//! resource and asynchronously yields a named attribute bundle:
//!
//! - [`Provider`] - Core trait for creating resources
//! - [`SimulatedProvider`] - Synthesizes plausible attributes per resource kind
//! - [`MockProvider`] - Scripted outputs, failures and delays for tests
//!
//! ## Available Providers
//!
//! | Provider | Use Case | Features |
//! |----------|----------|----------|
//! | `simulated` | Dry runs, demos | Random IDs, pinned service endpoints |
//! | `mock` | Testing | Per-resource scripts, request recording |
//!
//! ## Creating Providers
//!
//! ```rust
//! use vaultgraph::provider::create_provider;
//!
//! assert!(create_provider("simulated", &[]).is_ok());
//! assert!(create_provider("mock", &[("vault", "http://127.0.0.1:8200")]).is_ok());
//! assert!(create_provider("terraform", &[]).is_err());
//! ```

mod mock;
mod simulated;

pub use mock::{MockProvider, RecordedCall};
pub use simulated::SimulatedProvider;

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// RESOURCE KINDS
// ============================================================================

/// Kinds of resources the topology declares
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    DnsManagedZone,
    DnsRecordSet,
    KmsKeyRing,
    KmsCryptoKey,
    RandomId,
    ServiceAccount,
    ProjectIamMember,
    KeyRingIamMember,
    StorageBucket,
    CloudRunService,
    CloudRunIamMember,
    DomainMapping,
    ComputeDisk,
    ComputeInstance,
    JwtAuthBackend,
    JwtAuthRole,
    SecretsMount,
    VaultPolicy,
    PkiRootCert,
    PkiConfigUrls,
    SshCa,
    SshRole,
}

impl ResourceKind {
    /// Provider type token, as shown in plans and events
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DnsManagedZone => "dns.ManagedZone",
            Self::DnsRecordSet => "dns.RecordSet",
            Self::KmsKeyRing => "kms.KeyRing",
            Self::KmsCryptoKey => "kms.CryptoKey",
            Self::RandomId => "random.RandomId",
            Self::ServiceAccount => "serviceaccount.Account",
            Self::ProjectIamMember => "projects.IAMMember",
            Self::KeyRingIamMember => "kms.KeyRingIAMMember",
            Self::StorageBucket => "storage.Bucket",
            Self::CloudRunService => "cloudrunv2.Service",
            Self::CloudRunIamMember => "cloudrunv2.ServiceIamMember",
            Self::DomainMapping => "cloudrun.DomainMapping",
            Self::ComputeDisk => "compute.Disk",
            Self::ComputeInstance => "compute.Instance",
            Self::JwtAuthBackend => "vault.jwt.AuthBackend",
            Self::JwtAuthRole => "vault.jwt.AuthBackendRole",
            Self::SecretsMount => "vault.Mount",
            Self::VaultPolicy => "vault.Policy",
            Self::PkiRootCert => "vault.pkiSecret.SecretBackendRootCert",
            Self::PkiConfigUrls => "vault.pkiSecret.SecretBackendConfigUrls",
            Self::SshCa => "vault.ssh.SecretBackendCa",
            Self::SshRole => "vault.ssh.SecretBackendRole",
        }
    }

    /// Resources that live inside the secrets service rather than the cloud
    pub fn is_vault_side(self) -> bool {
        matches!(
            self,
            Self::JwtAuthBackend
                | Self::JwtAuthRole
                | Self::SecretsMount
                | Self::VaultPolicy
                | Self::PkiRootCert
                | Self::PkiConfigUrls
                | Self::SshCa
                | Self::SshRole
        )
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// PROVIDER TRAIT (ASYNC)
// ============================================================================

/// Attribute bundle returned by a successful creation
pub type ProviderOutputs = Map<String, Value>;

/// Core trait for the external resource API
///
/// The provider is opaque to the graph: it is only ever called with inputs
/// that have already resolved, at most once per declared resource.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Returns the provider name (e.g., "simulated", "mock")
    fn name(&self) -> &str;

    /// Create the resource and return its attributes
    async fn create(&self, request: ProvisionRequest) -> Result<ProviderOutputs>;
}

// ============================================================================
// REQUEST TYPE
// ============================================================================

/// Fully resolved creation request
#[derive(Debug, Clone, Serialize)]
pub struct ProvisionRequest {
    /// Resource name (unique within a run)
    pub name: String,

    pub kind: ResourceKind,

    /// Resolved input values, by input name
    pub inputs: Map<String, Value>,

    /// Static configuration known at declaration time
    pub config: Value,
}

impl ProvisionRequest {
    pub fn new(name: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            name: name.into(),
            kind,
            inputs: Map::new(),
            config: Value::Null,
        }
    }

    /// Look up an input, then a config field, as a string
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.inputs
            .get(key)
            .or_else(|| self.config.get(key))
            .and_then(Value::as_str)
    }
}

// ============================================================================
// PROVIDER FACTORY
// ============================================================================

/// Create a provider instance by name
///
/// | Name | Description |
/// |------|-------------|
/// | `simulated` | Deterministic-shape synthetic attributes |
/// | `mock` | Empty script, falls back to simulated attributes |
///
/// `endpoints` pins service URIs by resource name (see
/// [`SimulatedProvider::with_endpoint`]).
pub fn create_provider(name: &str, endpoints: &[(&str, &str)]) -> Result<Arc<dyn Provider>> {
    match name.to_lowercase().as_str() {
        "simulated" | "sim" => Ok(Arc::new(
            endpoints
                .iter()
                .fold(SimulatedProvider::new(), |p, (res, uri)| p.with_endpoint(*res, *uri)),
        )),
        "mock" => Ok(Arc::new(
            endpoints
                .iter()
                .fold(MockProvider::new(), |p, (res, uri)| p.with_endpoint(*res, *uri)),
        )),
        _ => Err(anyhow::anyhow!(
            "Unknown provider: '{}'. Available: simulated, mock",
            name
        )),
    }
}
