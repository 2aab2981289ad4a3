//! Topology composition
//!
//! Wires the whole deployment as one deferred graph:
//!
//! ```text
//! dns-zone ─┬─ vault-dns ─────────────────────────────┐
//!           │                                          ▼
//! vault-keys ─ vault-key ─┐                     public_vault_domain
//! vault-svc-id ─ vault-svc ┼─ IAM grants ─┐
//! vault-storage ───────────┴──────────────┴─ vault ─ vault-public ─ vault-init
//!                                                                     │
//!                                       vault-oidc ─ vault-oidc-role ◀┤
//!                                       kv-*, policy-* ◀──────────────┤
//!                                       vault-pki ─ root, urls ◀──────┤
//!                                       vault-ssh ─ ca, roles ◀───────┘
//! giteadata ─ gitea ─ gitea-dns
//! ```
//!
//! Composition only declares. Resources are submitted as their inputs
//! resolve; [`Deployment::finalize`] waits for the exports and for any
//! provider call still in flight.

pub mod auth;
pub mod dns;
pub mod engines;
pub mod git;
pub mod vault;

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::bootstrap::{BootstrapSequencer, BootstrapState, InitClient, Sensitive};
use crate::config::TopologyConfig;
use crate::error::Result;
use crate::event_log::{EventKind, EventLog};
use crate::export::{ExportReport, ExportSink};
use crate::provision::{Provisioner, ResourceStatus};

/// Graph node name of the init handshake
pub const BOOTSTRAP_STEP: &str = "vault-init";

/// A composed topology waiting to be finalized
#[derive(Debug)]
pub struct Deployment {
    run_id: Uuid,
    provisioner: Provisioner,
    bootstrap: BootstrapSequencer,
    exports: ExportSink,
    started: Instant,
}

impl Deployment {
    /// Declare every resource of `config` against `provisioner`
    ///
    /// Must be called inside a tokio runtime. Fails only on declaration
    /// errors (invalid config, duplicate names, bad templates); provisioning
    /// failures surface through the exports.
    #[instrument(skip_all, fields(project = %config.project))]
    pub fn compose(
        config: &TopologyConfig,
        provisioner: Provisioner,
        client: InitClient,
    ) -> Result<Self> {
        config.validate()?;
        let policies = match &config.vault.policies_dir {
            Some(dir) => engines::load_policies(dir)?,
            None => Vec::new(),
        };

        let run_id = Uuid::new_v4();
        let events = provisioner.events().clone();
        events.emit(EventKind::RunStarted {
            run_id: run_id.to_string(),
            planning: provisioner.is_planning(),
        });
        info!(%run_id, planning = provisioner.is_planning(), "composing topology");

        let mut exports = ExportSink::new(events.clone());

        let zone = dns::managed_zone(&provisioner, config)?;
        let service = vault::declare(&provisioner, config, &zone)?;

        exports.export("url", &service.uri);
        exports.export("private_vault_url", &service.private_host);
        exports.export("public_vault_domain", &service.public_domain);

        provisioner.register_step(BOOTSTRAP_STEP, "vault.Init", service.address.origins())?;
        let bootstrap =
            BootstrapSequencer::start(BOOTSTRAP_STEP, &service.address, client, events)?;
        exports.export_sensitive("root_token", &bootstrap.root_token());
        exports.export_sensitive("recovery_keys", &bootstrap.recovery_keys());

        let session = auth::VaultSession {
            address: service.address.clone(),
            token: bootstrap.root_token().then(Sensitive::into_inner),
        };

        if let Some(oidc) = &config.vault.oidc {
            let ui_base = if config.vault.domain_mapping {
                service.public_domain.then(|domain| format!("https://{}", domain))
            } else {
                service.address.clone()
            };
            let accessor = auth::declare_oidc(&provisioner, &session, oidc, &ui_base)?;
            exports.export("oidc_accessor", &accessor);
        }

        if !config.vault.kv_mounts.is_empty() {
            let mounts = auth::declare_kv_mounts(&provisioner, &session, &config.vault.kv_mounts)?;
            exports.export("kv_mounts", &mounts);
        }

        if !policies.is_empty() {
            let names = engines::declare_policies(&provisioner, &session, &policies)?;
            exports.export("policies", &names);
        }

        if let Some(pki) = &config.vault.pki {
            let certificate = engines::declare_pki(&provisioner, &session, pki)?;
            exports.export("pki_ca_certificate", &certificate);
        }

        if let Some(ssh) = &config.vault.ssh_ca {
            let public_key = engines::declare_ssh_ca(&provisioner, &session, ssh)?;
            exports.export("ssh_ca_public_key", &public_key);
        }

        if let Some(git) = &config.git {
            let url = git::declare(&provisioner, config, git, &zone)?;
            exports.export("git_url", &url);
        }

        provisioner.with_graph(|graph| graph.validate())?;

        Ok(Self {
            run_id,
            provisioner,
            bootstrap,
            exports,
            started: Instant::now(),
        })
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn provisioner(&self) -> &Provisioner {
        &self.provisioner
    }

    pub fn bootstrap(&self) -> &BootstrapSequencer {
        &self.bootstrap
    }

    pub fn exports(&self) -> &ExportSink {
        &self.exports
    }

    pub fn events(&self) -> &EventLog {
        self.provisioner.events()
    }

    /// Wait for every export (up to `deadline`) and build the run report
    ///
    /// A bootstrap bundle still pending afterwards is failed, so nothing
    /// waiting on the root token hangs past the run.
    pub async fn finalize(self, deadline: Duration) -> RunReport {
        let Self {
            run_id,
            provisioner,
            bootstrap,
            exports,
            started,
        } = self;

        let until = tokio::time::Instant::now() + deadline;
        let report = exports.finalize(deadline).await;
        if bootstrap.abandon() {
            info!(step = BOOTSTRAP_STEP, "bundle still pending at finalization");
        }
        // Resources nothing exports (roles, domain mapping) may still be in flight
        let in_flight = provisioner.wait_settled(until).await;
        if in_flight > 0 {
            warn!(in_flight, "resources still pending at deadline");
        }

        let total_duration_ms = started.elapsed().as_millis() as u64;
        provisioner.events().emit(EventKind::RunFinalized {
            exports: report.len(),
            failed: report.failed_count(),
            total_duration_ms,
        });
        info!(%run_id, failed = report.failed_count(), total_duration_ms, "run finalized");

        RunReport {
            run_id,
            finished_at: Utc::now(),
            bootstrap: bootstrap.state(),
            resources: provisioner.statuses(),
            exports: report,
        }
    }
}

/// Everything known at the end of a run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub finished_at: DateTime<Utc>,
    pub bootstrap: BootstrapState,
    pub resources: Vec<ResourceStatus>,
    pub exports: ExportReport,
}

#[derive(Serialize)]
struct ResourceRow<'a> {
    name: &'a str,
    kind: &'a str,
    state: String,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.exports.is_success()
    }

    pub fn to_json(&self, show_secrets: bool) -> Value {
        let resources: Vec<ResourceRow<'_>> = self
            .resources
            .iter()
            .map(|r| ResourceRow {
                name: &r.name,
                kind: &r.kind,
                state: format!("{:?}", r.state).to_lowercase(),
            })
            .collect();
        json!({
            "run_id": self.run_id.to_string(),
            "finished_at": self.finished_at.to_rfc3339(),
            "bootstrap": self.bootstrap,
            "resources": resources,
            "exports": self.exports.to_json(show_secrets),
        })
    }
}
