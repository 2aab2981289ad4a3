//! vaultgraph Configuration Module
//!
//! Describes one topology: project, region, DNS zone and the optional
//! extension points (auto-unseal key, domain mapping, OIDC backend, KV
//! mounts, policies, PKI and SSH certificate authorities, git host).
//! Stored in `~/.config/vaultgraph/topology.toml`.
//!
//! ## Priority Order (highest to lowest)
//!
//! 1. CLI flags
//! 2. Environment variables (`VAULTGRAPH_PROJECT`, `VAULTGRAPH_REGION`, ...)
//! 3. Config file
//! 4. Defaults

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{GraphError, Result};
use crate::util::constants::{
    CONNECT_TIMEOUT, FINALIZE_DEADLINE, INIT_TIMEOUT, PKI_MAX_TTL, SSH_CERT_TTL,
};

pub use crate::util::mask_secret;

static SUBDOMAIN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9-]+$").unwrap());
static ZONE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9]+-[a-z]+$").unwrap());

pub const ENV_PROJECT: &str = "VAULTGRAPH_PROJECT";
pub const ENV_REGION: &str = "VAULTGRAPH_REGION";
pub const ENV_DNS_ZONE: &str = "VAULTGRAPH_DNS_ZONE";
pub const ENV_OIDC_CLIENT_ID: &str = "VAULTGRAPH_OIDC_CLIENT_ID";
pub const ENV_OIDC_CLIENT_SECRET: &str = "VAULTGRAPH_OIDC_CLIENT_SECRET";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TopologyConfig {
    /// Cloud project every resource is created in
    pub project: String,

    pub region: String,

    /// Managed DNS zone name (`example-com` for `example.com.`)
    pub dns_zone: String,

    #[serde(default)]
    pub vault: VaultConfig,

    /// Git host; omitted when absent
    #[serde(default)]
    pub git: Option<GitConfig>,
}

/// Secrets-service settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VaultConfig {
    pub subdomain: String,
    pub image: String,
    pub memory: String,
    pub cpu: String,
    /// Create a KMS key ring + crypto key and add a seal stanza
    pub auto_unseal: bool,
    /// Map the public domain onto the service
    pub domain_mapping: bool,
    /// KV v2 mount paths
    pub kv_mounts: Vec<String>,
    /// Directory of `<name>.hcl` policy files, one policy per file
    pub policies_dir: Option<PathBuf>,
    pub oidc: Option<OidcConfig>,
    /// Internal root CA
    pub pki: Option<PkiConfig>,
    /// SSH user-certificate authority
    pub ssh_ca: Option<SshCaConfig>,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            subdomain: "vault".into(),
            image: "docker.io/hashicorp/vault:1.16.2".into(),
            memory: "512Mi".into(),
            cpu: "1".into(),
            auto_unseal: true,
            domain_mapping: false,
            kv_mounts: Vec::new(),
            policies_dir: None,
            oidc: None,
            pki: None,
            ssh_ca: None,
        }
    }
}

/// OIDC auth backend settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OidcConfig {
    pub path: String,
    pub description: String,
    pub discovery_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub default_role: String,
    pub user_claim: String,
    pub groups_claim: String,
    pub policies: Vec<String>,
    pub scopes: Vec<String>,
}

impl Default for OidcConfig {
    fn default() -> Self {
        Self {
            path: "oidc".into(),
            description: "OIDC provider".into(),
            discovery_url: "https://accounts.google.com".into(),
            client_id: String::new(),
            client_secret: String::new(),
            default_role: "user".into(),
            user_claim: "email".into(),
            groups_claim: "groups".into(),
            policies: vec!["default".into()],
            scopes: vec!["openid".into(), "email".into(), "profile".into()],
        }
    }
}

/// PKI secrets engine with a generated root certificate
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PkiConfig {
    pub path: String,
    pub common_name: String,
    pub organization: String,
    pub ou: String,
    /// Root certificate TTL and mount max lease
    pub max_ttl_secs: u64,
}

impl Default for PkiConfig {
    fn default() -> Self {
        Self {
            path: "pki".into(),
            common_name: "Root CA".into(),
            organization: "Labs".into(),
            ou: "Vault".into(),
            max_ttl_secs: PKI_MAX_TTL.as_secs(),
        }
    }
}

/// SSH secrets engine signing user certificates
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SshCaConfig {
    pub path: String,
    pub roles: Vec<SshRoleConfig>,
}

impl Default for SshCaConfig {
    fn default() -> Self {
        Self {
            path: "ssh".into(),
            roles: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SshRoleConfig {
    pub name: String,
    /// Principals a signed certificate may carry
    pub allowed_users: Vec<String>,
    #[serde(default = "default_ssh_ttl")]
    pub ttl_secs: u64,
}

fn default_ssh_ttl() -> u64 {
    SSH_CERT_TTL.as_secs()
}

/// Git host settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GitConfig {
    pub subdomain: String,
    pub machine_type: String,
    pub zone: String,
    pub boot_image: String,
    pub data_disk_gb: u32,
    pub image: String,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            subdomain: "git".into(),
            machine_type: "f1-micro".into(),
            zone: "us-central1-a".into(),
            boot_image: "projects/cos-cloud/global/images/cos-stable-113-18244-151-9".into(),
            data_disk_gb: 12,
            image: "docker.io/gitea/gitea:1.22.3".into(),
        }
    }
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            project: "my-project".into(),
            region: "us-central1".into(),
            dns_zone: "example-com".into(),
            vault: VaultConfig::default(),
            git: Some(GitConfig::default()),
        }
    }
}

impl TopologyConfig {
    /// Returns `~/.config/vaultgraph/` on Unix, `%APPDATA%/vaultgraph/` on Windows
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("vaultgraph")
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join("topology.toml")
    }

    /// Load from the default path
    ///
    /// Returns the default config if the file doesn't exist.
    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load from an explicit path; a missing file is an error
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| GraphError::ConfigError {
            reason: format!("Failed to read config file {}: {}", path.display(), e),
        })?;

        toml::from_str(&content).map_err(|e| GraphError::ConfigError {
            reason: format!("Failed to parse config file {}: {}", path.display(), e),
        })
    }

    /// Save to a path, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                fs::create_dir_all(dir).map_err(|e| GraphError::ConfigError {
                    reason: format!("Failed to create config directory: {}", e),
                })?;
            }
        }

        let content = toml::to_string_pretty(self).map_err(|e| GraphError::ConfigError {
            reason: format!("Failed to serialize config: {}", e),
        })?;

        fs::write(path, content).map_err(|e| GraphError::ConfigError {
            reason: format!("Failed to write config file: {}", e),
        })
    }

    /// Merge with process environment variables
    pub fn with_env(self) -> Self {
        self.with_env_from(|key| std::env::var(key).ok())
    }

    /// Merge with variables from `lookup`; empty values are ignored
    pub fn with_env_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(project) = get(ENV_PROJECT) {
            self.project = project;
        }
        if let Some(region) = get(ENV_REGION) {
            self.region = region;
        }
        if let Some(zone) = get(ENV_DNS_ZONE) {
            self.dns_zone = zone;
        }

        // Credentials only fill a configured backend; they never enable one
        if let Some(oidc) = self.vault.oidc.as_mut() {
            if let Some(id) = get(ENV_OIDC_CLIENT_ID) {
                oidc.client_id = id;
            }
            if let Some(secret) = get(ENV_OIDC_CLIENT_SECRET) {
                oidc.client_secret = secret;
            }
        }
        self
    }

    /// Check every field the topology relies on
    pub fn validate(&self) -> Result<()> {
        non_empty("project", &self.project)?;
        non_empty("region", &self.region)?;

        if !ZONE_RE.is_match(&self.dns_zone) {
            return Err(invalid(
                "dns_zone",
                format!("'{}' must look like 'example-com'", self.dns_zone),
            ));
        }
        subdomain("vault.subdomain", &self.vault.subdomain)?;
        non_empty("vault.image", &self.vault.image)?;

        if let Some(oidc) = &self.vault.oidc {
            non_empty("vault.oidc.path", &oidc.path)?;
            non_empty("vault.oidc.client_id", &oidc.client_id)?;
            non_empty("vault.oidc.client_secret", &oidc.client_secret)?;
            non_empty("vault.oidc.default_role", &oidc.default_role)?;
        }

        for (i, mount) in self.vault.kv_mounts.iter().enumerate() {
            if mount.trim_matches('/').is_empty() {
                return Err(invalid(&format!("vault.kv_mounts[{}]", i), "mount path is empty"));
            }
        }

        if let Some(dir) = &self.vault.policies_dir {
            if !dir.is_dir() {
                return Err(invalid(
                    "vault.policies_dir",
                    format!("{} is not a directory", dir.display()),
                ));
            }
        }

        if let Some(pki) = &self.vault.pki {
            non_empty("vault.pki.path", pki.path.trim_matches('/'))?;
            non_empty("vault.pki.common_name", &pki.common_name)?;
            if pki.max_ttl_secs == 0 {
                return Err(invalid("vault.pki.max_ttl_secs", "TTL must be greater than 0"));
            }
        }

        if let Some(ssh) = &self.vault.ssh_ca {
            non_empty("vault.ssh_ca.path", ssh.path.trim_matches('/'))?;
            for (i, role) in ssh.roles.iter().enumerate() {
                subdomain(&format!("vault.ssh_ca.roles[{}].name", i), &role.name)?;
                if role.allowed_users.is_empty() {
                    return Err(invalid(
                        &format!("vault.ssh_ca.roles[{}].allowed_users", i),
                        "at least one principal is required",
                    ));
                }
            }
        }

        let mut paths: Vec<&str> = self
            .vault
            .kv_mounts
            .iter()
            .map(|m| m.trim_matches('/'))
            .collect();
        paths.extend(self.vault.pki.as_ref().map(|p| p.path.trim_matches('/')));
        paths.extend(self.vault.ssh_ca.as_ref().map(|s| s.path.trim_matches('/')));
        paths.sort_unstable();
        if let Some(pair) = paths.windows(2).find(|w| w[0] == w[1]) {
            return Err(invalid(
                "vault",
                format!("mount path '{}' is used by more than one engine", pair[0]),
            ));
        }

        if let Some(git) = &self.git {
            subdomain("git.subdomain", &git.subdomain)?;
            if git.data_disk_gb == 0 {
                return Err(invalid("git.data_disk_gb", "disk size must be greater than 0"));
            }
            if git.subdomain == self.vault.subdomain {
                return Err(invalid(
                    "git.subdomain",
                    "must differ from vault.subdomain",
                ));
            }
        }
        Ok(())
    }

    /// Masked OIDC client secret for display
    pub fn masked_oidc_secret(&self) -> Option<String> {
        self.vault
            .oidc
            .as_ref()
            .map(|o| mask_secret(&o.client_secret, 6))
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> GraphError {
    GraphError::InvalidConfig {
        field: field.to_string(),
        reason: reason.into(),
    }
}

fn non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(invalid(field, "must not be empty"));
    }
    Ok(())
}

fn subdomain(field: &str, value: &str) -> Result<()> {
    if !SUBDOMAIN_RE.is_match(value) {
        return Err(invalid(
            field,
            format!("'{}' may only contain a-z, 0-9 and '-'", value),
        ));
    }
    Ok(())
}

/// Timeouts for one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSettings {
    pub init_timeout: Duration,
    pub connect_timeout: Duration,
    pub finalize_deadline: Duration,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            init_timeout: INIT_TIMEOUT,
            connect_timeout: CONNECT_TIMEOUT,
            finalize_deadline: FINALIZE_DEADLINE,
        }
    }
}

impl RunSettings {
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.finalize_deadline = deadline;
        self
    }
}
