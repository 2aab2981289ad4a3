//! HTTP client for the init handshake

use reqwest::StatusCode;
use serde_json::error::Category;
use tracing::{debug, instrument};

use super::bundle::{InitRequest, InitResponse};
use crate::config::RunSettings;
use crate::error::{GraphError, Result};
use crate::util::constants::{REDIRECT_LIMIT, SNIPPET_LIMIT, USER_AGENT};
use crate::util::truncate_snippet;

/// One-shot `POST {url}/v1/sys/init` client
///
/// No retries: any failure is reported as `BootstrapFailed`.
#[derive(Debug, Clone)]
pub struct InitClient {
    http: reqwest::Client,
    request: InitRequest,
}

impl InitClient {
    pub fn new(settings: &RunSettings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.init_timeout)
            .connect_timeout(settings.connect_timeout)
            .redirect(reqwest::redirect::Policy::limited(REDIRECT_LIMIT))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| GraphError::ConfigError {
                reason: format!("Failed to build HTTP client: {}", e),
            })?;
        Ok(Self {
            http,
            request: InitRequest::default(),
        })
    }

    pub fn request(&self) -> &InitRequest {
        &self.request
    }

    /// Send the init request and parse the response
    #[instrument(name = "sys_init", skip(self))]
    pub async fn initialize(&self, base_url: &str) -> Result<InitResponse> {
        let endpoint = format!("{}/v1/sys/init", base_url.trim_end_matches('/'));

        let response = self
            .http
            .post(&endpoint)
            .json(&self.request)
            .send()
            .await
            .map_err(|e| GraphError::BootstrapFailed {
                status: None,
                snippet: format!("request to {} failed: {}", endpoint, e),
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| GraphError::BootstrapFailed {
            status: Some(status.as_u16()),
            snippet: format!("failed to read body: {}", e),
        })?;
        debug!(status = status.as_u16(), body_len = body.len(), "init responded");

        if status != StatusCode::OK {
            return Err(GraphError::BootstrapFailed {
                status: Some(status.as_u16()),
                snippet: truncate_snippet(&body, SNIPPET_LIMIT),
            });
        }

        // A partial 200 body can still carry the root token: never echo it
        serde_json::from_str(&body).map_err(|e| GraphError::BootstrapFailed {
            status: Some(status.as_u16()),
            snippet: format!("malformed response ({} bytes): {}", body.len(), parse_reason(&e)),
        })
    }
}

/// Category and position of a parse error, without the offending input
fn parse_reason(e: &serde_json::Error) -> String {
    let category = match e.classify() {
        Category::Io => "io error",
        Category::Syntax => "invalid JSON",
        Category::Data => "unexpected shape",
        Category::Eof => "truncated body",
    };
    let missing = e
        .to_string()
        .split_once("missing field `")
        .and_then(|(_, rest)| rest.split_once('`'))
        .map(|(field, _)| format!(", missing field `{}`", field))
        .unwrap_or_default();
    format!("{}{} at line {} column {}", category, missing, e.line(), e.column())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_reason_omits_field_values() {
        let err = serde_json::from_str::<InitResponse>(r#"{"keys":["k1"],"root_token":"hvs.abc"}"#)
            .unwrap_err();
        let reason = parse_reason(&err);
        assert!(reason.starts_with("unexpected shape, missing field `keys_base64`"));
        assert!(!reason.contains("hvs.abc"));

        let err = serde_json::from_str::<InitResponse>(r#"{"root_token": 42}"#).unwrap_err();
        assert!(!parse_reason(&err).contains("42"));
    }
}
