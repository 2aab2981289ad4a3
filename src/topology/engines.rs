//! Policies and certificate authorities configured after bootstrap
//!
//! Like the auth wiring, every resource here takes the service address and
//! the root token as inputs.

use std::fs;
use std::path::Path;

use serde_json::{json, Map, Value};

use super::auth::{slug, VaultSession};
use crate::config::{PkiConfig, SshCaConfig};
use crate::deferred::{self, Deferred};
use crate::error::{GraphError, Result};
use crate::provider::ResourceKind;
use crate::provision::{Provisioner, ResourceDescriptor};
use crate::util::constants::SSH_EXTENSIONS;

/// One policy read from `<name>.hcl`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyFile {
    pub name: String,
    pub body: String,
}

/// Read every `*.hcl` file in `dir`, sorted by file name
pub fn load_policies(dir: &Path) -> Result<Vec<PolicyFile>> {
    let pattern = dir.join("*.hcl").to_string_lossy().to_string();
    let entries = glob::glob(&pattern).map_err(|e| GraphError::ConfigError {
        reason: format!("Invalid policy pattern {}: {}", pattern, e),
    })?;

    let mut policies = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| GraphError::ConfigError {
            reason: format!("Failed to list policies in {}: {}", dir.display(), e),
        })?;
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        if name.is_empty() || name == "root" {
            return Err(GraphError::InvalidConfig {
                field: "vault.policies_dir".into(),
                reason: format!("{} is not a usable policy name", path.display()),
            });
        }

        let body = fs::read_to_string(&path).map_err(|e| GraphError::ConfigError {
            reason: format!("Failed to read policy {}: {}", path.display(), e),
        })?;
        if body.trim().is_empty() {
            return Err(GraphError::InvalidConfig {
                field: "vault.policies_dir".into(),
                reason: format!("policy {} is empty", path.display()),
            });
        }
        policies.push(PolicyFile { name, body });
    }
    Ok(policies)
}

/// Declare one ACL policy per file; resolves with the policy names
pub fn declare_policies(
    prov: &Provisioner,
    session: &VaultSession,
    policies: &[PolicyFile],
) -> Result<Deferred<Vec<String>>> {
    let mut written = Vec::with_capacity(policies.len());
    for policy in policies {
        let declared = prov.declare(
            session
                .descriptor(&format!("policy-{}", slug(&policy.name)), ResourceKind::VaultPolicy)
                .config(json!({ "name": policy.name, "policy": policy.body }))
                .outputs(["name"]),
        )?;
        written.push(declared.string("name"));
    }
    Ok(deferred::all("vault.policies", written))
}

/// Declare a PKI engine with an internal root CA; resolves with the CA certificate
pub fn declare_pki(
    prov: &Provisioner,
    session: &VaultSession,
    pki: &PkiConfig,
) -> Result<Deferred<String>> {
    let path = pki.path.trim_matches('/');
    let mount = prov.declare(
        session
            .descriptor("vault-pki", ResourceKind::SecretsMount)
            .config(json!({
                "path": path,
                "type": "pki",
                "description": "Internal root certificate authority",
                "max_lease_ttl_seconds": pki.max_ttl_secs,
            }))
            .outputs(["path"]),
    )?;
    let backend = mount.string("path");

    let root = prov.declare(
        session
            .descriptor("vault-pki-root", ResourceKind::PkiRootCert)
            .input("backend", &backend)
            .config(json!({
                "type": "internal",
                "format": "pem",
                "common_name": pki.common_name,
                "organization": pki.organization,
                "ou": pki.ou,
                "ttl": pki.max_ttl_secs,
                "exclude_cn_from_sans": true,
            }))
            .outputs(["certificate", "serial_number"]),
    )?;

    let urls = deferred::zip("vault.pki.urls", &session.address, &backend)
        .then(|(address, backend)| pki_urls(&address, &backend));
    prov.declare(
        session
            .descriptor("vault-pki-urls", ResourceKind::PkiConfigUrls)
            .input("backend", &backend)
            .input("issuing_certificates", &urls.then(|(issuing, _)| issuing))
            .input("crl_distribution_points", &urls.then(|(_, crl)| crl))
            .outputs(["backend"]),
    )?;

    Ok(root.string("certificate"))
}

/// Declare an SSH engine signing user certificates; resolves with the CA public key
pub fn declare_ssh_ca(
    prov: &Provisioner,
    session: &VaultSession,
    ssh: &SshCaConfig,
) -> Result<Deferred<String>> {
    let mount = prov.declare(
        session
            .descriptor("vault-ssh", ResourceKind::SecretsMount)
            .config(json!({
                "path": ssh.path.trim_matches('/'),
                "type": "ssh",
                "description": "SSH user certificate authority",
            }))
            .outputs(["path"]),
    )?;
    let backend = mount.string("path");

    let ca = prov.declare(
        session
            .descriptor("vault-ssh-ca", ResourceKind::SshCa)
            .input("backend", &backend)
            .config(json!({ "generate_signing_key": true }))
            .outputs(["public_key"]),
    )?;

    let default_extensions: Map<String, Value> = SSH_EXTENSIONS
        .iter()
        .map(|ext| (ext.to_string(), Value::String(String::new())))
        .collect();
    for role in &ssh.roles {
        prov.declare(
            session
                .descriptor(&format!("vault-ssh-role-{}", role.name), ResourceKind::SshRole)
                .input("backend", &backend)
                .config(json!({
                    "name": role.name,
                    "key_type": "ca",
                    "allow_user_certificates": true,
                    "allowed_users": role.allowed_users.join(","),
                    "allowed_extensions": SSH_EXTENSIONS.join(","),
                    "default_extensions": default_extensions,
                    "cidr_list": "0.0.0.0/0",
                    "ttl": role.ttl_secs,
                    "max_ttl": role.ttl_secs,
                }))
                .outputs(["name"]),
        )?;
    }

    Ok(ca.string("public_key"))
}

/// Issuing-CA and CRL URLs published in every certificate the engine signs
pub fn pki_urls(address: &str, backend: &str) -> (Vec<String>, Vec<String>) {
    let base = format!("{}/v1/{}", address.trim_end_matches('/'), backend);
    (vec![format!("{}/ca", base)], vec![format!("{}/crl", base)])
}
