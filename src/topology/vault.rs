//! Secrets service: identity, storage, optional auto-unseal key and the
//! Cloud Run service itself

use serde_json::{json, Value};
use tracing::debug;
use url::Url;

use super::dns::{self, Zone};
use crate::config::TopologyConfig;
use crate::deferred::{self, Deferred};
use crate::error::{GraphError, Result};
use crate::graph::{self, Bindings};
use crate::provider::ResourceKind;
use crate::provision::{Provisioner, ResourceDescriptor};

/// Target of the custom-domain CNAME
pub const GOOGLE_HOSTED: &str = "ghs.googlehosted.com.";
pub const VAULT_PORT: u16 = 8200;
pub const KEY_ROTATION: &str = "100000s";

const STORAGE_ROLE: &str = "roles/storage.objectAdmin";
const KEY_RING_ROLE: &str = "roles/owner";
const INVOKER_ROLE: &str = "roles/run.invoker";

const BASE_CONFIG: &str = r#"ui = true

storage "gcs" {
  bucket = "{{bucket}}"
}

listener "tcp" {
  address     = "0.0.0.0:8200"
  tls_disable = true
}
"#;

const SEAL_CONFIG: &str = r#"
seal "gcpckms" {
  project    = "{{project}}"
  region     = "global"
  key_ring   = "{{key_ring}}"
  crypto_key = "{{crypto_key}}"
}
"#;

/// Handles the rest of the topology builds on
#[derive(Debug, Clone)]
pub struct VaultService {
    /// Service URI as reported by the provider
    pub uri: Deferred<String>,
    /// Service URI, released only once public access is granted
    pub address: Deferred<String>,
    /// `vault.example.com` (no trailing dot)
    pub public_domain: Deferred<String>,
    /// Host of the service URI with a trailing dot
    pub private_host: Deferred<String>,
}

/// KMS key material for auto-unseal
struct UnsealKey {
    ring_id: Deferred<String>,
    ring_name: Deferred<String>,
    key_name: Deferred<String>,
}

pub fn declare(prov: &Provisioner, config: &TopologyConfig, zone: &Zone) -> Result<VaultService> {
    let vault = &config.vault;

    let cname = Deferred::resolved("vault-dns.rrdatas", json!([GOOGLE_HOSTED]));
    let fqdn = dns::record(
        prov,
        "vault-dns",
        &vault.subdomain,
        zone,
        "CNAME",
        &cname,
        &config.project,
    )?;
    let public_domain = fqdn.then(|name| dns::trim_fqdn(&name));

    let unseal = if vault.auto_unseal {
        Some(declare_unseal_key(prov, config)?)
    } else {
        None
    };

    // Service identity
    let suffix = prov.declare(
        ResourceDescriptor::new("vault-svc-id", ResourceKind::RandomId)
            .config(json!({ "byte_length": 6 }))
            .outputs(["hex"]),
    )?;
    let account_id = suffix.string("hex").then(|hex| format!("svc-vault-storage-{}", hex));
    let account = prov.declare(
        ResourceDescriptor::new("vault-svc", ResourceKind::ServiceAccount)
            .input("account_id", &account_id)
            .config(json!({
                "display_name": "Vault Storage Admin",
                "project": config.project,
            }))
            .outputs(["email", "name"]),
    )?;
    let email = account.string("email");
    let member = email.then(|email| format!("serviceAccount:{}", email));

    let storage_grant = prov.declare(
        ResourceDescriptor::new("vault-svc-storage-role", ResourceKind::ProjectIamMember)
            .input("member", &member)
            .config(json!({ "project": config.project, "role": STORAGE_ROLE }))
            .outputs(["etag"]),
    )?;

    let key_grant = match &unseal {
        Some(key) => Some(prov.declare(
            ResourceDescriptor::new("vault-svc-key-ring-role", ResourceKind::KeyRingIamMember)
                .input("key_ring_id", &key.ring_id)
                .input("member", &member)
                .config(json!({ "role": KEY_RING_ROLE }))
                .outputs(["etag"]),
        )?),
        None => None,
    };

    let bucket = prov.declare(
        ResourceDescriptor::new("vault-storage", ResourceKind::StorageBucket)
            .config(json!({
                "project": config.project,
                "location": "US",
                "force_destroy": true,
                "public_access_prevention": "enforced",
            }))
            .outputs(["name", "url"]),
    )?;

    let local_config = server_config(config, &bucket.get("name"), unseal.as_ref())?;

    let mut service = ResourceDescriptor::new("vault", ResourceKind::CloudRunService)
        .input("service_account", &email)
        .input("local_config", &local_config)
        .input_json("storage_grant", &storage_grant.get("etag"));
    if let Some(grant) = &key_grant {
        service = service.input_json("key_grant", &grant.get("etag"));
    }
    let service = prov.declare(
        service
            .config(json!({
                "project": config.project,
                "location": config.region,
                "image": vault.image,
                "memory": vault.memory,
                "cpu": vault.cpu,
                "port": VAULT_PORT,
                "args": ["server"],
                "env": { "SKIP_SETCAP": "true" },
                "annotations": { "run.googleapis.com/cpu-throttling": "false" },
            }))
            .outputs(["uri", "name", "location"]),
    )?;
    let uri = service.string("uri");

    let public = prov.declare(
        ResourceDescriptor::new("vault-public", ResourceKind::CloudRunIamMember)
            .input("service", &service.string("name"))
            .input("location", &service.string("location"))
            .config(json!({ "role": INVOKER_ROLE, "member": "allUsers" }))
            .outputs(["etag"]),
    )?;

    if vault.domain_mapping {
        prov.declare(
            ResourceDescriptor::new("vault-domain", ResourceKind::DomainMapping)
                .input("name", &public_domain)
                .input("route_name", &service.string("name"))
                .config(json!({ "project": config.project, "location": config.region }))
                .outputs(["name", "status"]),
        )?;
    }

    let address = deferred::zip("vault.address", &uri, &public.get("etag")).then(|(uri, _)| uri);
    let private_host = uri.try_then(|uri| service_host(&uri));

    Ok(VaultService {
        uri,
        address,
        public_domain,
        private_host,
    })
}

fn declare_unseal_key(prov: &Provisioner, config: &TopologyConfig) -> Result<UnsealKey> {
    let ring = prov.declare(
        ResourceDescriptor::new("vault-keys", ResourceKind::KmsKeyRing)
            .config(json!({ "project": config.project, "location": "global" }))
            .outputs(["id", "name"]),
    )?;
    let ring_id = ring.string("id");

    let key = prov.declare(
        ResourceDescriptor::new("vault-key", ResourceKind::KmsCryptoKey)
            .input("key_ring", &ring_id)
            .config(json!({ "rotation_period": KEY_ROTATION }))
            .outputs(["id", "name"]),
    )?;

    Ok(UnsealKey {
        ring_id,
        ring_name: ring.string("name"),
        key_name: key.string("name"),
    })
}

/// HCL server configuration, rendered once the bucket (and key) exist
fn server_config(
    config: &TopologyConfig,
    bucket: &Deferred<Value>,
    unseal: Option<&UnsealKey>,
) -> Result<Deferred<String>> {
    let mut bindings = Bindings::new();
    bindings.insert("bucket".into(), bucket.clone());

    let template = match unseal {
        Some(key) => {
            bindings.insert(
                "project".into(),
                Deferred::resolved("project", Value::String(config.project.clone())),
            );
            bindings.insert("key_ring".into(), graph::json(&key.ring_name));
            bindings.insert("crypto_key".into(), graph::json(&key.key_name));
            format!("{}{}", BASE_CONFIG, SEAL_CONFIG)
        }
        None => BASE_CONFIG.to_string(),
    };
    debug!(auto_unseal = unseal.is_some(), "rendering server config");

    graph::interpolate("vault.local_config", &template, &bindings)
}

/// `https://vault-abc-uc.a.run.app` → `vault-abc-uc.a.run.app.`
pub fn service_host(uri: &str) -> Result<String> {
    let parsed = Url::parse(uri).map_err(|e| GraphError::ProvisionFailed {
        resource: "vault".into(),
        reason: format!("service URI '{}' is not a URL: {}", uri, e),
    })?;
    let host = parsed.host_str().ok_or_else(|| GraphError::ProvisionFailed {
        resource: "vault".into(),
        reason: format!("service URI '{}' has no host", uri),
    })?;
    Ok(format!("{}.", host))
}
