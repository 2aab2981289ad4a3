//! Init handshake against a local HTTP server

use std::time::Duration;
use serde_json::json;
use vaultgraph::bootstrap::{BootstrapSequencer, BootstrapState, InitClient};
use vaultgraph::config::RunSettings;
use vaultgraph::deferred::Deferred;
use vaultgraph::error::{ErrorKind, GraphError};
use vaultgraph::event_log::{EventKind, EventLog};
use vaultgraph::export::ExportSink;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client() -> InitClient {
    let settings = RunSettings {
        init_timeout: Duration::from_secs(5),
        ..RunSettings::default()
    };
    InitClient::new(&settings).unwrap()
}

fn init_body() -> serde_json::Value {
    json!({
        "keys": ["k1", "k2", "k3", "k4", "k5"],
        "keys_base64": ["azE=", "azI=", "azM=", "azQ=", "azU="],
        "root_token": "tok-1"
    })
}

#[tokio::test]
async fn test_successful_init_resolves_bundle() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/sys/init"))
        .and(body_json(json!({
            "recovery_shares": 5,
            "recovery_threshold": 3,
            "stored_shares": 5
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(init_body()))
        .expect(1)
        .mount(&server)
        .await;

    let url = Deferred::<String>::from_resource("vault.address", "vault");
    let events = EventLog::new();
    let seq = BootstrapSequencer::start("vault-init", &url, client(), events.clone()).unwrap();
    url.resolve(server.uri()).unwrap();

    let token = seq.root_token().settled().await.unwrap();
    assert_eq!(token.expose(), "tok-1");
    let keys = seq.recovery_keys().settled().await.unwrap();
    assert_eq!(keys.len(), 5);
    assert_eq!(seq.state(), BootstrapState::Succeeded);
    assert_eq!(seq.attempts(), 1);

    let transitions: Vec<(String, String)> = events
        .events()
        .into_iter()
        .filter_map(|e| match e.kind {
            EventKind::BootstrapTransition { from, to } => Some((from, to)),
            _ => None,
        })
        .collect();
    assert_eq!(
        transitions,
        vec![
            ("waiting_for_endpoint".to_string(), "initializing".to_string()),
            ("initializing".to_string(), "succeeded".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_server_error_fails_bundle() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/sys/init"))
        .respond_with(ResponseTemplate::new(500).set_body_string("Vault is already initialized"))
        .expect(1)
        .mount(&server)
        .await;

    let url = Deferred::<String>::pending("vault.address");
    let seq = BootstrapSequencer::start("vault-init", &url, client(), EventLog::new()).unwrap();
    url.resolve(server.uri()).unwrap();

    let failure = seq.bundle().settled().await.unwrap_err();
    assert_eq!(failure.kind(), ErrorKind::BootstrapFailed);
    match &*failure {
        GraphError::BootstrapFailed { status, snippet } => {
            assert_eq!(*status, Some(500));
            assert!(snippet.contains("already initialized"));
        }
        other => panic!("unexpected failure: {other}"),
    }
    assert_eq!(seq.state(), BootstrapState::Failed);
}

#[tokio::test]
async fn test_malformed_body_fails_bundle() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/sys/init"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "keys": [] })))
        .mount(&server)
        .await;

    let url = Deferred::<String>::pending("vault.address");
    let seq = BootstrapSequencer::start("vault-init", &url, client(), EventLog::new()).unwrap();
    url.resolve(server.uri()).unwrap();

    let failure = seq.root_token().settled().await.unwrap_err();
    assert!(failure.to_string().contains("malformed response"));
    assert_eq!(seq.state(), BootstrapState::Failed);
}

#[tokio::test]
async fn test_partial_body_never_leaks_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/sys/init"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "keys": ["k1"],
            "root_token": "hvs.partial-secret"
        })))
        .mount(&server)
        .await;

    let url = Deferred::<String>::pending("vault.address");
    let events = EventLog::new();
    let seq = BootstrapSequencer::start("vault-init", &url, client(), events.clone()).unwrap();
    let mut exports = ExportSink::new(events);
    exports.export_sensitive("root_token", &seq.root_token());
    exports.export_sensitive("recovery_keys", &seq.recovery_keys());
    url.resolve(server.uri()).unwrap();

    let report = exports.finalize(Duration::from_secs(5)).await;
    let failure = report.get("root_token").unwrap().outcome.clone().unwrap_err();
    let message = failure.to_string();
    assert!(message.contains("missing field `keys_base64`"), "{message}");
    assert!(!message.contains("hvs.partial-secret"));
    assert!(!message.contains("k1"));

    let text = report.render_text(false);
    let json = report.to_json(false).to_string();
    assert!(!text.contains("hvs.partial-secret"), "{text}");
    assert!(!json.contains("hvs.partial-secret"), "{json}");
    assert_eq!(seq.state(), BootstrapState::Failed);
}

#[tokio::test]
async fn test_no_request_before_url_resolves() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/sys/init"))
        .respond_with(ResponseTemplate::new(200).set_body_json(init_body()))
        .expect(1)
        .mount(&server)
        .await;

    let url = Deferred::<String>::pending("vault.address");
    let seq = BootstrapSequencer::start("vault-init", &url, client(), EventLog::new()).unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(server.received_requests().await.unwrap().is_empty());
    assert_eq!(seq.state(), BootstrapState::WaitingForEndpoint);

    url.resolve(server.uri()).unwrap();
    seq.bundle().settled().await.unwrap();
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_unreachable_endpoint_reports_no_status() {
    let url = Deferred::resolved("vault.address", "http://127.0.0.1:9".to_string());
    let seq = BootstrapSequencer::start("vault-init", &url, client(), EventLog::new()).unwrap();

    let failure = seq.bundle().settled().await.unwrap_err();
    assert!(matches!(&*failure, GraphError::BootstrapFailed { status: None, .. }));
    assert_eq!(seq.attempts(), 1);
}
