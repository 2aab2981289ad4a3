//! End-to-end runs of the composed topology: mock provider plus a local
//! server standing in for the secrets service.

use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use vaultgraph::bootstrap::{BootstrapState, InitClient};
use vaultgraph::config::{
    OidcConfig, PkiConfig, RunSettings, SshCaConfig, SshRoleConfig, TopologyConfig,
};
use vaultgraph::error::{ErrorKind, GraphError};
use vaultgraph::event_log::EventLog;
use vaultgraph::provider::{MockProvider, Provider};
use vaultgraph::provision::Provisioner;
use vaultgraph::topology::{Deployment, RunReport};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const DEADLINE: Duration = Duration::from_secs(10);

fn config() -> TopologyConfig {
    let mut config = TopologyConfig::default();
    config.vault.kv_mounts = vec!["secret".into(), "team/app".into()];
    config.vault.oidc = Some(OidcConfig {
        client_id: "client-id".into(),
        client_secret: "client-secret".into(),
        ..OidcConfig::default()
    });
    config
}

async fn vault_server(status: u16) -> MockServer {
    let server = MockServer::start().await;
    let response = if status == 200 {
        ResponseTemplate::new(200).set_body_json(json!({
            "keys": ["k1", "k2", "k3", "k4", "k5"],
            "keys_base64": ["azE=", "azI=", "azM=", "azQ=", "azU="],
            "root_token": "tok-1"
        }))
    } else {
        ResponseTemplate::new(status).set_body_string("internal error")
    };
    Mock::given(method("POST"))
        .and(path("/v1/sys/init"))
        .respond_with(response)
        .mount(&server)
        .await;
    server
}

async fn run(
    config: &TopologyConfig,
    mock: MockProvider,
) -> (RunReport, Arc<MockProvider>, EventLog) {
    let mock = Arc::new(mock);
    let provider: Arc<dyn Provider> = mock.clone();
    let events = EventLog::new();
    let provisioner = Provisioner::new(provider, events.clone());
    let client = InitClient::new(&RunSettings::default()).unwrap();
    let deployment = Deployment::compose(config, provisioner, client).unwrap();
    (deployment.finalize(DEADLINE).await, mock, events)
}

fn value(report: &RunReport, name: &str) -> Value {
    report
        .exports
        .get(name)
        .unwrap_or_else(|| panic!("no export {name}"))
        .outcome
        .clone()
        .unwrap_or_else(|e| panic!("export {name} failed: {e}"))
}

#[tokio::test]
async fn test_full_run_resolves_every_export() {
    let server = vault_server(200).await;
    let mock = MockProvider::new().with_endpoint("vault", server.uri());
    let (report, mock, _) = run(&config(), mock).await;

    assert!(report.is_success(), "{}", report.exports.render_text(false));
    assert_eq!(report.bootstrap, BootstrapState::Succeeded);

    assert_eq!(value(&report, "url"), json!(server.uri()));
    assert_eq!(value(&report, "private_vault_url"), json!("127.0.0.1."));
    assert_eq!(value(&report, "public_vault_domain"), json!("vault.example.com"));
    assert_eq!(value(&report, "root_token"), json!("tok-1"));
    assert_eq!(value(&report, "recovery_keys").as_array().unwrap().len(), 5);
    assert_eq!(value(&report, "kv_mounts"), json!(["secret", "team/app"]));
    assert_eq!(value(&report, "git_url"), json!("git.example.com."));
    assert!(value(&report, "oidc_accessor").as_str().unwrap().starts_with("auth_oidc_"));

    // Vault-side resources see the token and the released address
    let backend = &mock.calls_for("vault-oidc")[0].request;
    assert_eq!(backend.inputs["token"], json!("tok-1"));
    assert_eq!(backend.inputs["address"], json!(server.uri()));
    let role = &mock.calls_for("vault-oidc-role")[0].request;
    assert_eq!(
        role.inputs["allowed_redirect_uris"][0],
        json!(format!("{}/ui/vault/auth/oidc/oidc/callback", server.uri()))
    );

    // Every provider-backed resource was created exactly once
    for status in &report.resources {
        assert_eq!(mock.call_count(&status.name), 1, "{}", status.name);
    }
}

#[tokio::test]
async fn test_init_error_fails_vault_side_only() {
    let server = vault_server(500).await;
    let mock = MockProvider::new().with_endpoint("vault", server.uri());
    let (report, mock, _) = run(&config(), mock).await;

    assert_eq!(report.bootstrap, BootstrapState::Failed);
    for name in ["root_token", "recovery_keys"] {
        let failure = report.exports.get(name).unwrap().outcome.clone().unwrap_err();
        assert_eq!(failure.kind(), ErrorKind::BootstrapFailed, "{name}");
    }
    for name in ["oidc_accessor", "kv_mounts"] {
        let failure = report.exports.get(name).unwrap().outcome.clone().unwrap_err();
        assert_eq!(failure.kind(), ErrorKind::DependencyFailed, "{name}");
        assert!(matches!(
            failure.root_cause(),
            GraphError::BootstrapFailed { status: Some(500), .. }
        ));
    }
    assert!(!mock.was_called("vault-oidc"));
    assert!(!mock.was_called("kv-secret"));

    assert_eq!(value(&report, "git_url"), json!("git.example.com."));
    assert_eq!(value(&report, "url"), json!(server.uri()));
    assert_eq!(report.exports.failed_count(), 4);
}

#[tokio::test]
async fn test_unseal_key_failure_never_reaches_init() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/sys/init"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let mock = MockProvider::new()
        .with_endpoint("vault", server.uri())
        .with_failure("vault-key", "KMS API not enabled");
    let (report, mock, _) = run(&config(), mock).await;

    assert_eq!(report.bootstrap, BootstrapState::WaitingForEndpoint);
    assert!(!mock.was_called("vault"));

    let token = report.exports.get("root_token").unwrap().outcome.clone().unwrap_err();
    assert_eq!(token.kind(), ErrorKind::DependencyFailed);
    assert!(token.root_cause().to_string().contains("KMS API not enabled"));

    // Unrelated branches still complete
    assert_eq!(value(&report, "public_vault_domain"), json!("vault.example.com"));
    assert_eq!(value(&report, "git_url"), json!("git.example.com."));
}

#[tokio::test]
async fn test_engines_and_policies_wait_for_init() {
    let server = vault_server(200).await;
    let policies = TempDir::new().unwrap();
    for (name, body) in [
        ("admin.hcl", "path \"*\" { capabilities = [\"sudo\"] }"),
        ("reader.hcl", "path \"kv/*\" { capabilities = [\"read\"] }"),
    ] {
        std::fs::write(policies.path().join(name), body).unwrap();
    }

    let mut config = config();
    config.vault.policies_dir = Some(policies.path().to_path_buf());
    config.vault.pki = Some(PkiConfig::default());
    config.vault.ssh_ca = Some(SshCaConfig {
        roles: vec![SshRoleConfig {
            name: "sysadmin".into(),
            allowed_users: vec!["sysadmin".into()],
            ttl_secs: 3600,
        }],
        ..SshCaConfig::default()
    });

    let mock = MockProvider::new().with_endpoint("vault", server.uri());
    let (report, mock, _) = run(&config, mock).await;
    assert!(report.is_success(), "{}", report.exports.render_text(false));

    assert_eq!(value(&report, "policies"), json!(["admin", "reader"]));
    let cert = value(&report, "pki_ca_certificate");
    assert!(cert.as_str().unwrap().starts_with("-----BEGIN CERTIFICATE-----"));
    assert!(value(&report, "ssh_ca_public_key").as_str().unwrap().starts_with("ssh-"));

    let policy = &mock.calls_for("policy-admin")[0].request;
    assert_eq!(policy.inputs["token"], json!("tok-1"));
    assert!(policy.config["policy"].as_str().unwrap().contains("sudo"));

    let urls = &mock.calls_for("vault-pki-urls")[0].request;
    assert_eq!(
        urls.inputs["issuing_certificates"],
        json!([format!("{}/v1/pki/ca", server.uri())])
    );
    let role = &mock.calls_for("vault-ssh-role-sysadmin")[0].request;
    assert_eq!(role.inputs["backend"], json!("ssh"));
    assert_eq!(role.config["allowed_users"], json!("sysadmin"));
}

#[tokio::test]
async fn test_engines_fail_with_init() {
    let server = vault_server(500).await;
    let mut config = TopologyConfig::default();
    config.vault.pki = Some(PkiConfig::default());

    let mock = MockProvider::new().with_endpoint("vault", server.uri());
    let (report, mock, _) = run(&config, mock).await;

    let failure = report.exports.get("pki_ca_certificate").unwrap().outcome.clone().unwrap_err();
    assert_eq!(failure.kind(), ErrorKind::DependencyFailed);
    assert_eq!(failure.root_cause().kind(), ErrorKind::BootstrapFailed);
    assert!(!mock.was_called("vault-pki"));
    assert_eq!(value(&report, "git_url"), json!("git.example.com."));
}

#[tokio::test]
async fn test_without_optional_parts() {
    let server = vault_server(200).await;
    let mut config = TopologyConfig::default();
    config.vault.auto_unseal = false;
    config.git = None;

    let mock = MockProvider::new().with_endpoint("vault", server.uri());
    let (report, mock, _) = run(&config, mock).await;

    assert!(report.is_success());
    let names: Vec<&str> = report.exports.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["url", "private_vault_url", "public_vault_domain", "root_token", "recovery_keys"]
    );
    assert!(!mock.was_called("vault-keys"));
    assert!(!mock.was_called("gitea"));

    let hcl = mock.calls_for("vault")[0].request.inputs["local_config"]
        .as_str()
        .unwrap()
        .to_string();
    assert!(!hcl.contains("gcpckms"));
}

#[tokio::test]
async fn test_event_log_round_trips_to_disk() {
    let server = vault_server(200).await;
    let mock = MockProvider::new().with_endpoint("vault", server.uri());
    let (report, _, events) = run(&config(), mock).await;
    assert!(report.is_success());

    let dir = TempDir::new().unwrap();
    let file = dir.path().join("events.json");
    events.write_to(&file).unwrap();

    let parsed: Value = serde_json::from_str(&std::fs::read_to_string(&file).unwrap()).unwrap();
    let entries = parsed.as_array().unwrap();
    assert_eq!(entries.first().unwrap()["kind"]["type"], "run_started");
    assert_eq!(entries.last().unwrap()["kind"]["type"], "run_finalized");
    assert!(!parsed.to_string().contains("tok-1"));
}
