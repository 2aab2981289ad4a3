//! Init handshake payloads and the secret bundle

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::util::constants::{RECOVERY_SHARES, RECOVERY_THRESHOLD, STORED_SHARES};

/// Secret value whose `Debug` and `Display` are redacted
///
/// Deserializes transparently from the wrapped type. Not `Serialize`, so a
/// secret cannot end up in a report or event by accident; call
/// [`Sensitive::expose`] where the raw value is needed.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Sensitive<T>(T);

impl<T> Sensitive<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }

    pub fn expose(&self) -> &T {
        &self.0
    }

    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for Sensitive<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Sensitive(***)")
    }
}

impl<T> fmt::Display for Sensitive<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

impl From<&str> for Sensitive<String> {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Body of `POST /v1/sys/init`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InitRequest {
    pub recovery_shares: u8,
    pub recovery_threshold: u8,
    pub stored_shares: u8,
}

impl Default for InitRequest {
    fn default() -> Self {
        Self {
            recovery_shares: RECOVERY_SHARES,
            recovery_threshold: RECOVERY_THRESHOLD,
            stored_shares: STORED_SHARES,
        }
    }
}

/// Successful init response; every field is required
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InitResponse {
    pub keys: Vec<Sensitive<String>>,
    pub keys_base64: Vec<Sensitive<String>>,
    pub root_token: Sensitive<String>,
}

/// Secret material produced once per secrets-service instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretBundle {
    /// Recovery / unseal key shares
    pub keys: Vec<Sensitive<String>>,
    pub keys_base64: Vec<Sensitive<String>>,
    pub recovery_threshold: u8,
    pub root_token: Sensitive<String>,
}

impl SecretBundle {
    pub fn from_response(response: InitResponse, request: &InitRequest) -> Self {
        Self {
            keys: response.keys,
            keys_base64: response.keys_base64,
            recovery_threshold: request.recovery_threshold,
            root_token: response.root_token,
        }
    }
}
