// The #[error] attribute from thiserror uses struct fields via string interpolation,
// but Rust's unused_assignments lint doesn't recognize this.
#![allow(unused_assignments)]

//! vaultgraph error types with error codes
//!
//! Error code ranges:
//! - VG-000-009: Deferred value / graph errors
//! - VG-010-019: Provisioning errors
//! - VG-020-029: Bootstrap handshake errors
//! - VG-030-039: Template errors
//! - VG-040-049: Configuration / IO errors

use std::sync::Arc;

use miette::Diagnostic;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GraphError>;

/// Shared failure handed to every dependent of a failed deferred value
pub type Failure = Arc<GraphError>;

/// Trait for errors that provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

/// Flat classification used by reports and tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    AlreadySettled,
    DependencyFailed,
    ProvisionFailed,
    BootstrapFailed,
    Template,
    Config,
    Graph,
}

/// All error variants are part of the public API.
///
/// Implements both `thiserror::Error` for std error compatibility
/// and `miette::Diagnostic` for terminal error display.
#[derive(Error, Debug, Diagnostic)]
pub enum GraphError {
    // ═══════════════════════════════════════════
    // DEFERRED / GRAPH ERRORS (000-009)
    // ═══════════════════════════════════════════
    #[error("[VG-001] Deferred value '{label}' was already settled")]
    #[diagnostic(code(vaultgraph::already_settled))]
    AlreadySettled { label: String },

    #[error("[VG-002] '{label}' never settled before the run was finalized")]
    #[diagnostic(code(vaultgraph::unsettled))]
    Unsettled { label: String },

    #[error("[VG-003] Cycle detected in resource graph: {cycle}")]
    #[diagnostic(code(vaultgraph::cycle_detected))]
    CycleDetected { cycle: String },

    #[error("[VG-004] Resource '{resource}' is declared more than once")]
    #[diagnostic(code(vaultgraph::duplicate_resource))]
    DuplicateResource { resource: String },

    #[error("[VG-005] Resource '{resource}' depends on undeclared '{dependency}'")]
    #[diagnostic(code(vaultgraph::unknown_dependency))]
    UnknownDependency { resource: String, dependency: String },

    #[error("[VG-006] No tokio runtime available to schedule '{label}'")]
    #[diagnostic(code(vaultgraph::no_runtime))]
    NoRuntime { label: String },

    // ═══════════════════════════════════════════
    // PROVISIONING ERRORS (010-019)
    // ═══════════════════════════════════════════
    #[error("[VG-010] '{resource}' was not created because a dependency failed: {cause}")]
    #[diagnostic(code(vaultgraph::dependency_failed))]
    DependencyFailed {
        resource: String,
        #[source]
        cause: Failure,
    },

    #[error("[VG-011] Provider failed to create '{resource}': {reason}")]
    #[diagnostic(code(vaultgraph::provision_failed))]
    ProvisionFailed { resource: String, reason: String },

    #[error("[VG-012] Provider created '{resource}' without attribute '{attribute}'")]
    #[diagnostic(code(vaultgraph::missing_attribute))]
    MissingAttribute { resource: String, attribute: String },

    #[error("[VG-013] Provider error: {0}")]
    Provider(String),

    // ═══════════════════════════════════════════
    // BOOTSTRAP ERRORS (020-029)
    // ═══════════════════════════════════════════
    #[error("[VG-020] Vault initialization failed ({}): {snippet}", status_label(.status))]
    #[diagnostic(code(vaultgraph::bootstrap_failed))]
    BootstrapFailed { status: Option<u16>, snippet: String },

    // ═══════════════════════════════════════════
    // TEMPLATE ERRORS (030-039)
    // ═══════════════════════════════════════════
    #[error("[VG-030] Template error in '{template}': {reason}")]
    #[diagnostic(code(vaultgraph::template_error))]
    TemplateError { template: String, reason: String },

    #[error("[VG-031] Placeholder '{{{{{name}}}}}' is not bound")]
    #[diagnostic(code(vaultgraph::unbound_placeholder))]
    UnboundPlaceholder { name: String, template: String },

    // ═══════════════════════════════════════════
    // CONFIG / IO ERRORS (040-049)
    // ═══════════════════════════════════════════
    #[error("[VG-040] Configuration error: {reason}")]
    #[diagnostic(code(vaultgraph::config_error))]
    ConfigError { reason: String },

    #[error("[VG-041] Invalid configuration value for '{field}': {reason}")]
    #[diagnostic(code(vaultgraph::invalid_config))]
    InvalidConfig { field: String, reason: String },

    #[error("[VG-042] IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("[VG-043] JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn status_label(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!("HTTP {}", code),
        None => "no response".to_string(),
    }
}

impl GraphError {
    /// Flat classification of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AlreadySettled { .. } => ErrorKind::AlreadySettled,
            Self::DependencyFailed { .. } | Self::Unsettled { .. } => ErrorKind::DependencyFailed,
            Self::ProvisionFailed { .. } | Self::MissingAttribute { .. } | Self::Provider(_) => {
                ErrorKind::ProvisionFailed
            }
            Self::BootstrapFailed { .. } => ErrorKind::BootstrapFailed,
            Self::TemplateError { .. } | Self::UnboundPlaceholder { .. } => ErrorKind::Template,
            Self::ConfigError { .. }
            | Self::InvalidConfig { .. }
            | Self::Io(_)
            | Self::Json(_) => ErrorKind::Config,
            Self::CycleDetected { .. }
            | Self::DuplicateResource { .. }
            | Self::UnknownDependency { .. }
            | Self::NoRuntime { .. } => ErrorKind::Graph,
        }
    }

    /// Follow `DependencyFailed` links down to the originating failure
    pub fn root_cause(&self) -> &GraphError {
        let mut current = self;
        while let Self::DependencyFailed { cause, .. } = current {
            current = cause.as_ref();
        }
        current
    }

    /// Wrap a shared failure as the cause of a dependent that could not proceed
    pub fn dependency(resource: impl Into<String>, cause: Failure) -> Self {
        Self::DependencyFailed {
            resource: resource.into(),
            cause,
        }
    }
}

impl FixSuggestion for GraphError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            Self::AlreadySettled { .. } => {
                Some("A value was settled twice; this is a bug in the graph wiring")
            }
            Self::Unsettled { .. } => {
                Some("Increase --deadline-secs or check the provider for stuck operations")
            }
            Self::CycleDetected { .. } => Some("Remove the circular dependency between resources"),
            Self::DuplicateResource { .. } => Some("Give every declared resource a unique name"),
            Self::UnknownDependency { .. } => {
                Some("Declare the dependency before the resource using it")
            }
            Self::NoRuntime { .. } => Some("Build the topology from inside a tokio runtime"),
            Self::DependencyFailed { .. } => {
                Some("Fix the root cause reported for the upstream resource")
            }
            Self::ProvisionFailed { .. } | Self::Provider(_) => {
                Some("Check provider credentials and quota, then re-run")
            }
            Self::MissingAttribute { .. } => {
                Some("Check that the provider reports every attribute the resource declares")
            }
            Self::BootstrapFailed { .. } => Some(
                "Check the service is reachable and not already initialized; re-run after fixing",
            ),
            Self::TemplateError { .. } => Some("Check template syntax: {{name}} or {{name.field}}"),
            Self::UnboundPlaceholder { .. } => Some("Bind every {{name}} used by the template"),
            Self::ConfigError { .. } => {
                Some("Run `vaultgraph init-config` to write a default file")
            }
            Self::InvalidConfig { .. } => {
                Some("Fix the configuration value and run `vaultgraph validate`")
            }
            Self::Io(_) => Some("Check file path and permissions"),
            Self::Json(_) => Some("Check the JSON payload is well formed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_cause_walks_dependency_chain() {
        let origin: Failure = Arc::new(GraphError::ProvisionFailed {
            resource: "vault-key".into(),
            reason: "quota exceeded".into(),
        });
        let mid: Failure = Arc::new(GraphError::dependency("vault", origin));
        let top = GraphError::dependency("vault-init", mid);

        assert_eq!(top.kind(), ErrorKind::DependencyFailed);
        assert_eq!(top.root_cause().kind(), ErrorKind::ProvisionFailed);
        assert!(top.root_cause().to_string().contains("quota exceeded"));
    }

    #[test]
    fn bootstrap_failed_display_includes_status() {
        let err = GraphError::BootstrapFailed {
            status: Some(500),
            snippet: "internal".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("VG-020"));
        assert!(msg.contains("HTTP 500"));

        let transport = GraphError::BootstrapFailed {
            status: None,
            snippet: "connection refused".into(),
        };
        assert!(transport.to_string().contains("no response"));
    }

    #[test]
    fn unbound_placeholder_renders_braces() {
        let err = GraphError::UnboundPlaceholder {
            name: "bucket".into(),
            template: "{{bucket}}".into(),
        };
        assert!(err.to_string().contains("{{bucket}}"));
    }

    #[test]
    fn every_variant_has_a_suggestion() {
        let samples = vec![
            GraphError::AlreadySettled { label: "x".into() },
            GraphError::Unsettled { label: "x".into() },
            GraphError::Provider("boom".into()),
            GraphError::ConfigError { reason: "x".into() },
        ];
        for err in samples {
            assert!(err.fix_suggestion().is_some(), "missing suggestion: {err}");
        }
    }
}
