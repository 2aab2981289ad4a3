//! Simulated provider
//!
//! Synthesizes plausible attributes per resource kind without calling any
//! cloud API. Service endpoints can be pinned so the bootstrap handshake can
//! target a real (local) server.

use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use rand::Rng;
use serde_json::{json, Value};

use super::{ProviderOutputs, Provider, ProvisionRequest, ResourceKind};

const DEFAULT_PROJECT: &str = "vaultgraph-sim";

/// Provider that fabricates attributes locally
pub struct SimulatedProvider {
    /// Resource name → service URI to report instead of a generated one
    endpoints: DashMap<String, String>,
    /// Artificial latency per creation
    latency: Option<Duration>,
}

impl SimulatedProvider {
    pub fn new() -> Self {
        Self {
            endpoints: DashMap::new(),
            latency: None,
        }
    }

    /// Report `uri` for the named service instead of a synthetic `run.app` URI
    pub fn with_endpoint(self, resource: impl Into<String>, uri: impl Into<String>) -> Self {
        self.endpoints.insert(resource.into(), uri.into());
        self
    }

    /// Sleep this long before answering each creation
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Build the attribute bundle for a request
    pub fn synthesize(&self, request: &ProvisionRequest) -> Result<ProviderOutputs> {
        let name = request.name.as_str();
        let project = request.str_field("project").unwrap_or(DEFAULT_PROJECT);

        let outputs = match request.kind {
            ResourceKind::DnsManagedZone => {
                let zone = request.str_field("zone").unwrap_or(name);
                json!({ "name": zone, "dns_name": zone_dns_name(zone) })
            }
            ResourceKind::DnsRecordSet => {
                let fqdn = request
                    .str_field("name")
                    .ok_or_else(|| anyhow!("record set '{}' has no name", name))?;
                json!({
                    "name": fqdn,
                    "type": request.str_field("type").unwrap_or("A"),
                    "rrdatas": request.inputs.get("rrdatas")
                        .or_else(|| request.config.get("rrdatas"))
                        .cloned()
                        .unwrap_or(Value::Array(Vec::new())),
                })
            }
            ResourceKind::KmsKeyRing => {
                let location = request.str_field("location").unwrap_or("global");
                json!({
                    "name": name,
                    "id": format!("projects/{}/locations/{}/keyRings/{}", project, location, name),
                })
            }
            ResourceKind::KmsCryptoKey => {
                let ring = request
                    .str_field("key_ring")
                    .ok_or_else(|| anyhow!("crypto key '{}' has no key ring", name))?;
                json!({ "name": name, "id": format!("{}/cryptoKeys/{}", ring, name) })
            }
            ResourceKind::RandomId => {
                let bytes = request
                    .config
                    .get("byte_length")
                    .and_then(Value::as_u64)
                    .unwrap_or(8) as usize;
                json!({ "hex": random_hex(bytes) })
            }
            ResourceKind::ServiceAccount => {
                let account = request.str_field("account_id").unwrap_or(name);
                json!({
                    "name": format!("projects/{}/serviceAccounts/{}", project, account),
                    "email": format!("{}@{}.iam.gserviceaccount.com", account, project),
                })
            }
            ResourceKind::ProjectIamMember
            | ResourceKind::KeyRingIamMember
            | ResourceKind::CloudRunIamMember => {
                json!({ "etag": format!("BwY{}", random_hex(6)) })
            }
            ResourceKind::StorageBucket => {
                let bucket = format!("{}-{}", name, random_hex(4));
                json!({ "url": format!("gs://{}", bucket), "name": bucket })
            }
            ResourceKind::CloudRunService => {
                let location = request.str_field("location").unwrap_or("us-central1");
                let uri = match self.endpoints.get(name) {
                    Some(pinned) => pinned.value().clone(),
                    None => format!("https://{}-{}-uc.a.run.app", name, random_hex(5)),
                };
                json!({ "name": name, "location": location, "uri": uri })
            }
            ResourceKind::DomainMapping => {
                let domain = request.str_field("name").unwrap_or(name);
                json!({ "name": domain, "status": "Ready" })
            }
            ResourceKind::ComputeDisk => {
                json!({
                    "name": name,
                    "size": request.config.get("size").cloned().unwrap_or(json!(10)),
                    "self_link": format!("projects/{}/zones/us-central1-a/disks/{}", project, name),
                })
            }
            ResourceKind::ComputeInstance => {
                let octet = rand::thread_rng().gen_range(1..=254);
                json!({
                    "name": name,
                    "instance_id": random_hex(8),
                    // TEST-NET-3
                    "nat_ip": format!("203.0.113.{}", octet),
                })
            }
            ResourceKind::JwtAuthBackend => {
                let path = request.str_field("path").unwrap_or("oidc");
                json!({ "path": path, "accessor": format!("auth_{}_{}", path, random_hex(4)) })
            }
            ResourceKind::JwtAuthRole => {
                json!({ "role_name": request.str_field("role_name").unwrap_or(name) })
            }
            ResourceKind::SecretsMount => {
                let path = request.str_field("path").unwrap_or(name);
                let engine = request
                    .str_field("type")
                    .and_then(|t| t.split('-').next())
                    .unwrap_or("kv");
                json!({ "path": path, "accessor": format!("{}_{}", engine, random_hex(4)) })
            }
            ResourceKind::VaultPolicy => {
                json!({ "name": request.str_field("name").unwrap_or(name) })
            }
            ResourceKind::PkiRootCert => {
                let common_name = request.str_field("common_name").unwrap_or(name);
                json!({
                    "certificate": format!(
                        "-----BEGIN CERTIFICATE-----\n{}\n-----END CERTIFICATE-----",
                        random_hex(48)
                    ),
                    "issuing_ca": common_name,
                    "serial_number": serial_number(),
                })
            }
            ResourceKind::PkiConfigUrls => {
                json!({ "backend": request.str_field("backend").unwrap_or(name) })
            }
            ResourceKind::SshCa => {
                json!({ "public_key": format!("ssh-ed25519 AAAAC3Nza{} vault", random_hex(16)) })
            }
            ResourceKind::SshRole => {
                json!({ "name": request.str_field("name").unwrap_or(name) })
            }
        };

        match outputs {
            Value::Object(map) => Ok(map),
            _ => Err(anyhow!("attributes for '{}' are not an object", name)),
        }
    }
}

impl Default for SimulatedProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for SimulatedProvider {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn create(&self, request: ProvisionRequest) -> Result<ProviderOutputs> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.synthesize(&request)
    }
}

/// `example-com` → `example.com.`
fn zone_dns_name(zone: &str) -> String {
    match zone.rsplit_once('-') {
        Some((domain, tld)) => format!("{}.{}.", domain, tld),
        None => format!("{}.", zone),
    }
}

/// `3a:0f:...` style certificate serial
fn serial_number() -> String {
    let mut rng = rand::thread_rng();
    (0..16)
        .map(|_| format!("{:02x}", rng.gen::<u8>()))
        .collect::<Vec<_>>()
        .join(":")
}

fn random_hex(bytes: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..bytes).map(|_| format!("{:02x}", rng.gen::<u8>())).collect()
}
