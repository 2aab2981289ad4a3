//! Resources configured inside the secrets service once it is initialized:
//! the OIDC auth backend with its default role, and KV v2 mounts.
//!
//! Every declaration here takes the service address and the root token as
//! inputs, so nothing is submitted before the bootstrap handshake succeeds.

use serde_json::json;

use crate::config::OidcConfig;
use crate::deferred::{self, Deferred};
use crate::error::Result;
use crate::provider::ResourceKind;
use crate::provision::{Provisioner, ResourceDescriptor};

/// Redirect used by `vault login -method=oidc`
pub const CLI_REDIRECT: &str = "http://localhost:8250/oidc/callback";

/// Address and credentials of an initialized service
#[derive(Debug, Clone)]
pub struct VaultSession {
    pub address: Deferred<String>,
    pub token: Deferred<String>,
}

impl VaultSession {
    pub(crate) fn descriptor(&self, name: &str, kind: ResourceKind) -> ResourceDescriptor {
        ResourceDescriptor::new(name, kind)
            .input("address", &self.address)
            .input("token", &self.token)
    }
}

/// Declare the OIDC backend and its default role; returns the backend accessor
///
/// `ui_base` is the origin users reach the UI on.
pub fn declare_oidc(
    prov: &Provisioner,
    session: &VaultSession,
    oidc: &OidcConfig,
    ui_base: &Deferred<String>,
) -> Result<Deferred<String>> {
    let backend = prov.declare(
        session
            .descriptor("vault-oidc", ResourceKind::JwtAuthBackend)
            .config(json!({
                "path": oidc.path,
                "type": "oidc",
                "description": oidc.description,
                "oidc_discovery_url": oidc.discovery_url,
                "oidc_client_id": oidc.client_id,
                "oidc_client_secret": oidc.client_secret,
                "default_role": oidc.default_role,
            }))
            .outputs(["accessor", "path"]),
    )?;

    let path = oidc.path.clone();
    let redirects = ui_base.then(move |base| redirect_uris(&base, &path));

    prov.declare(
        session
            .descriptor("vault-oidc-role", ResourceKind::JwtAuthRole)
            .input("backend", &backend.string("path"))
            .input("allowed_redirect_uris", &redirects)
            .config(json!({
                "role_name": oidc.default_role,
                "role_type": "oidc",
                "user_claim": oidc.user_claim,
                "groups_claim": oidc.groups_claim,
                "token_policies": oidc.policies,
                "oidc_scopes": oidc.scopes,
                "bound_audiences": [oidc.client_id],
            }))
            .outputs(["role_name"]),
    )?;

    Ok(backend.string("accessor"))
}

/// Declare one KV v2 engine per path; resolves with the mounted paths
pub fn declare_kv_mounts(
    prov: &Provisioner,
    session: &VaultSession,
    paths: &[String],
) -> Result<Deferred<Vec<String>>> {
    let mut mounted = Vec::with_capacity(paths.len());
    for path in paths {
        let path = path.trim_matches('/');
        let mount = prov.declare(
            session
                .descriptor(&mount_name(path), ResourceKind::SecretsMount)
                .config(json!({
                    "path": path,
                    "type": "kv-v2",
                    "options": { "version": "2" },
                    "description": format!("KV v2 secrets at {}/", path),
                }))
                .outputs(["path"]),
        )?;
        mounted.push(mount.string("path"));
    }
    Ok(deferred::all("vault.kv_mounts", mounted))
}

/// `team/app` → `kv-team-app`
pub fn mount_name(path: &str) -> String {
    format!("kv-{}", slug(path))
}

/// Lowercase, with every run of other characters folded to single dashes
pub(crate) fn slug(value: &str) -> String {
    let mapped: String = value
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    mapped
        .split('-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Callback URIs accepted by the default role
pub fn redirect_uris(ui_base: &str, path: &str) -> Vec<String> {
    vec![
        format!(
            "{}/ui/vault/auth/{}/oidc/callback",
            ui_base.trim_end_matches('/'),
            path
        ),
        CLI_REDIRECT.to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_log::EventLog;
    use pretty_assertions::assert_eq;

    fn session() -> VaultSession {
        VaultSession {
            address: Deferred::from_resource("vault.address", "vault"),
            token: Deferred::from_resource("vault-init.token", "vault-init"),
        }
    }

    #[test]
    fn mount_names_are_sanitized() {
        assert_eq!(mount_name("secret"), "kv-secret");
        assert_eq!(mount_name("Team/App_1"), "kv-team-app-1");
        assert_eq!(mount_name("/edge/"), "kv-edge");
    }

    #[test]
    fn redirects_include_ui_and_cli() {
        assert_eq!(
            redirect_uris("https://vault.example.com/", "oidc"),
            vec![
                "https://vault.example.com/ui/vault/auth/oidc/oidc/callback".to_string(),
                CLI_REDIRECT.to_string(),
            ]
        );
    }

    #[test]
    fn oidc_resources_wait_for_bootstrap() {
        let prov = Provisioner::planning(EventLog::new());
        // stand-ins for the producers the session values come from
        for name in ["vault", "vault-init"] {
            prov.register_step(name, "test.Step", &Default::default()).unwrap();
        }
        let oidc = OidcConfig {
            client_id: "client".into(),
            client_secret: "secret".into(),
            ..OidcConfig::default()
        };
        let session = session();
        declare_oidc(&prov, &session, &oidc, &session.address).unwrap();

        prov.with_graph(|g| {
            assert!(g.has_path("vault-init", "vault-oidc"));
            assert!(g.has_path("vault-oidc", "vault-oidc-role"));
        });
    }

    #[test]
    fn kv_mounts_resolve_to_paths() {
        let prov = Provisioner::planning(EventLog::new());
        for name in ["vault", "vault-init"] {
            prov.register_step(name, "test.Step", &Default::default()).unwrap();
        }
        let paths = ["secret".to_string(), "team/app".to_string()];
        let mounts = declare_kv_mounts(&prov, &session(), &paths).unwrap();
        assert!(mounts.origins().contains("kv-secret"));
        assert!(mounts.origins().contains("kv-team-app"));
    }
}
