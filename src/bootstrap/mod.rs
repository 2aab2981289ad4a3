//! Bootstrap sequencer
//!
//! Performs the one-time initialization handshake against the secrets
//! service and exposes the resulting secret material as deferred values.
//!
//! ```text
//! WaitingForEndpoint ──url resolves──▶ Initializing ──200 + valid body──▶ Succeeded
//!        │                                   └──────any other outcome────▶ Failed
//!        └── url fails / run finalized: bundle fails with DependencyFailed,
//!            state stays WaitingForEndpoint
//! ```
//!
//! The request is an async continuation on the URL (`then_async`), so it can
//! never happen before the URL resolves, and the continuation runs once.

mod bundle;
mod client;

pub use bundle::{InitRequest, InitResponse, SecretBundle, Sensitive};
pub use client::InitClient;

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

use crate::deferred::{Deferred, Settled};
use crate::error::{GraphError, Result};
use crate::event_log::{EventKind, EventLog};

/// Sequencer state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BootstrapState {
    WaitingForEndpoint,
    Initializing,
    Succeeded,
    Failed,
}

impl BootstrapState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WaitingForEndpoint => "waiting_for_endpoint",
            Self::Initializing => "initializing",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for BootstrapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Inner {
    name: Arc<str>,
    url_label: Arc<str>,
    state: Mutex<BootstrapState>,
    bundle: Deferred<SecretBundle>,
    attempts: AtomicUsize,
    events: EventLog,
}

impl Inner {
    fn transition(&self, to: BootstrapState) {
        let from = {
            let mut state = self.state.lock();
            let from = *state;
            *state = to;
            from
        };
        info!(step = %self.name, %from, %to, "bootstrap transition");
        self.events.emit(EventKind::BootstrapTransition {
            from: from.to_string(),
            to: to.to_string(),
        });
    }
}

/// Drives the init handshake for one secrets-service instance
#[derive(Clone)]
pub struct BootstrapSequencer {
    inner: Arc<Inner>,
}

impl BootstrapSequencer {
    /// Attach to the service URL
    ///
    /// Must be called from inside a tokio runtime; the handshake is spawned
    /// on it once `url` resolves.
    pub fn start(
        name: &str,
        url: &Deferred<String>,
        client: InitClient,
        events: EventLog,
    ) -> Result<Self> {
        tokio::runtime::Handle::try_current().map_err(|_| GraphError::NoRuntime {
            label: name.to_string(),
        })?;

        let inner = Arc::new(Inner {
            name: Arc::from(name),
            url_label: Arc::from(url.label()),
            state: Mutex::new(BootstrapState::WaitingForEndpoint),
            bundle: Deferred::from_resource(format!("{}.bundle", name), name),
            attempts: AtomicUsize::new(0),
            events,
        });

        let seq = Arc::clone(&inner);
        let handshake = url.then_async(move |url| {
            // Abandoned runs never initialize: the keys would have nowhere to go
            let abandoned = !seq.bundle.is_pending();
            if !abandoned {
                seq.transition(BootstrapState::Initializing);
            }
            async move {
                if abandoned {
                    return Err(GraphError::Unsettled {
                        label: seq.url_label.to_string(),
                    });
                }
                seq.attempts.fetch_add(1, Ordering::SeqCst);
                client
                    .initialize(&url)
                    .await
                    .map(|response| SecretBundle::from_response(response, client.request()))
            }
        });

        let seq = Arc::clone(&inner);
        handshake.on_settled(move |outcome| settle(&seq, outcome.clone()));

        Ok(Self { inner })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn state(&self) -> BootstrapState {
        *self.inner.state.lock()
    }

    /// Number of init requests issued (0 or 1)
    pub fn attempts(&self) -> usize {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    pub fn bundle(&self) -> &Deferred<SecretBundle> {
        &self.inner.bundle
    }

    pub fn root_token(&self) -> Deferred<Sensitive<String>> {
        self.inner.bundle.then(|b| b.root_token)
    }

    pub fn recovery_keys(&self) -> Deferred<Vec<Sensitive<String>>> {
        self.inner.bundle.then(|b| b.keys)
    }

    /// Fail a still-pending bundle at the end of a run
    ///
    /// Returns `true` if the bundle was pending. From `WaitingForEndpoint`
    /// the state is left as is; an in-flight handshake becomes `Failed`.
    pub fn abandon(&self) -> bool {
        let cause = Arc::new(GraphError::Unsettled {
            label: self.inner.url_label.to_string(),
        });
        let abandoned = self
            .inner
            .bundle
            .fail(GraphError::dependency(self.inner.name.to_string(), cause))
            .is_ok();
        if abandoned && self.state() == BootstrapState::Initializing {
            self.inner.transition(BootstrapState::Failed);
        }
        abandoned
    }
}

fn settle(seq: &Inner, outcome: Settled<SecretBundle>) {
    match outcome {
        Ok(bundle) => {
            if seq.bundle.resolve(bundle).is_ok() {
                seq.transition(BootstrapState::Succeeded);
            }
        }
        // The URL itself failed: the handshake never started
        Err(cause) if *seq.state.lock() == BootstrapState::WaitingForEndpoint => {
            warn!(step = %seq.name, error = %cause, "service URL failed; handshake not attempted");
            let _ = seq
                .bundle
                .fail(GraphError::dependency(seq.name.to_string(), cause));
        }
        Err(e) => {
            warn!(step = %seq.name, error = %e, "handshake failed");
            if seq.bundle.fail(e).is_ok() {
                seq.transition(BootstrapState::Failed);
            }
        }
    }
}

impl fmt::Debug for BootstrapSequencer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BootstrapSequencer")
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .field("attempts", &self.attempts())
            .finish()
    }
}
