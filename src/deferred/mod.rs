//! Deferred values - single-assignment cells for provider outputs
//!
//! A [`Deferred<T>`] is pending until exactly one of [`Deferred::resolve`] or
//! [`Deferred::fail`] is called. Continuations attached with `on_settled`,
//! `then`, `try_then` or `then_async` run once, after settlement, and never
//! interleave with other continuations on the same value.
//!
//! Every deferred carries a label (for diagnostics) and its *origins*: the
//! names of the resources it was derived from. Combinators union origins,
//! which is how the provisioner discovers dependency edges.

mod combine;

pub use combine::{all, zip};

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex};
use tokio::sync::oneshot;

use crate::error::{Failure, GraphError};

/// Outcome of a settled deferred value
pub type Settled<T> = Result<T, Failure>;

/// Resource names a deferred value was derived from
pub type Origins = Arc<BTreeSet<Arc<str>>>;

type Continuation<T> = Box<dyn FnOnce(&Settled<T>) + Send>;

enum State<T> {
    Pending(Vec<Continuation<T>>),
    Settled(Settled<T>),
}

struct Inner<T> {
    label: Arc<str>,
    origins: Origins,
    state: Mutex<State<T>>,
    /// Serializes continuation dispatch for this cell
    dispatch: ReentrantMutex<()>,
}

/// Observable state of a deferred value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredState {
    Pending,
    Resolved,
    Failed,
}

/// Single-assignment future shared by every dependent
pub struct Deferred<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &*self.inner.state.lock() {
            State::Pending(_) => DeferredState::Pending,
            State::Settled(Ok(_)) => DeferredState::Resolved,
            State::Settled(Err(_)) => DeferredState::Failed,
        };
        f.debug_struct("Deferred")
            .field("label", &self.inner.label)
            .field("state", &state)
            .finish()
    }
}

impl<T> Deferred<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a pending value with no origins
    pub fn pending(label: impl Into<Arc<str>>) -> Self {
        Self::with_origins(label, Arc::new(BTreeSet::new()))
    }

    /// Create a pending value produced by the named resource
    pub fn from_resource(label: impl Into<Arc<str>>, resource: &str) -> Self {
        let mut origins = BTreeSet::new();
        origins.insert(Arc::from(resource));
        Self::with_origins(label, Arc::new(origins))
    }

    pub(crate) fn with_origins(label: impl Into<Arc<str>>, origins: Origins) -> Self {
        Self {
            inner: Arc::new(Inner {
                label: label.into(),
                origins,
                state: Mutex::new(State::Pending(Vec::new())),
                dispatch: ReentrantMutex::new(()),
            }),
        }
    }

    /// Create an already-resolved value (static configuration lifted into the graph)
    pub fn resolved(label: impl Into<Arc<str>>, value: T) -> Self {
        let deferred = Self::pending(label);
        *deferred.inner.state.lock() = State::Settled(Ok(value));
        deferred
    }

    /// Create an already-failed value
    pub fn failed(label: impl Into<Arc<str>>, error: impl Into<Failure>) -> Self {
        let deferred = Self::pending(label);
        *deferred.inner.state.lock() = State::Settled(Err(error.into()));
        deferred
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn origins(&self) -> &Origins {
        &self.inner.origins
    }

    /// Transition pending → resolved and run attached continuations
    pub fn resolve(&self, value: T) -> Result<(), GraphError> {
        self.settle(Ok(value))
    }

    /// Transition pending → failed and run attached continuations
    pub fn fail(&self, error: impl Into<Failure>) -> Result<(), GraphError> {
        self.settle(Err(error.into()))
    }

    /// Settle with an outcome; a second settlement is rejected with `AlreadySettled`
    pub fn settle(&self, outcome: Settled<T>) -> Result<(), GraphError> {
        let _dispatch = self.inner.dispatch.lock();
        let continuations = {
            let mut state = self.inner.state.lock();
            match &mut *state {
                State::Settled(_) => {
                    return Err(GraphError::AlreadySettled {
                        label: self.inner.label.to_string(),
                    })
                }
                State::Pending(waiting) => {
                    let waiting = std::mem::take(waiting);
                    *state = State::Settled(outcome.clone());
                    waiting
                }
            }
        };

        for continuation in continuations {
            continuation(&outcome);
        }
        Ok(())
    }

    /// Attach a raw continuation on the outcome
    ///
    /// Runs immediately (on the caller's thread) if the value is already settled.
    pub fn on_settled<F>(&self, f: F)
    where
        F: FnOnce(&Settled<T>) + Send + 'static,
    {
        let _dispatch = self.inner.dispatch.lock();
        let settled = {
            let mut state = self.inner.state.lock();
            match &mut *state {
                State::Pending(waiting) => {
                    waiting.push(Box::new(f));
                    return;
                }
                State::Settled(outcome) => outcome.clone(),
            }
        };
        f(&settled);
    }

    /// Derive a value with a pure function; failures propagate without calling `f`
    pub fn then<U, F>(&self, f: F) -> Deferred<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.try_then(move |value| Ok(f(value)))
    }

    /// Derive a value with a fallible function
    pub fn try_then<U, F>(&self, f: F) -> Deferred<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> Result<U, GraphError> + Send + 'static,
    {
        let derived = Deferred::with_origins(
            format!("{}→then", self.inner.label),
            Arc::clone(&self.inner.origins),
        );
        let target = derived.clone();
        self.on_settled(move |outcome| {
            let next = match outcome {
                Ok(value) => f(value.clone()).map_err(Arc::new),
                Err(failure) => Err(Arc::clone(failure)),
            };
            // derived is private to this continuation
            let _ = target.settle(next);
        });
        derived
    }

    /// Derive a value with an async function spawned on the current tokio runtime
    ///
    /// The runtime handle is captured at registration time, so the future runs
    /// even when the value settles on a non-runtime thread.
    pub fn then_async<U, F, Fut>(&self, f: F) -> Deferred<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> Fut + Send + 'static,
        Fut: Future<Output = Result<U, GraphError>> + Send + 'static,
    {
        let derived = Deferred::with_origins(
            format!("{}→async", self.inner.label),
            Arc::clone(&self.inner.origins),
        );
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                let _ = derived.fail(GraphError::NoRuntime {
                    label: derived.label().to_string(),
                });
                return derived;
            }
        };

        let target = derived.clone();
        self.on_settled(move |outcome| match outcome {
            Ok(value) => {
                let fut = f(value.clone());
                handle.spawn(async move {
                    let next = fut.await.map_err(Arc::new);
                    let _ = target.settle(next);
                });
            }
            Err(failure) => {
                let _ = target.fail(Arc::clone(failure));
            }
        });
        derived
    }

    /// Wait for the outcome without blocking a thread
    pub fn settled(&self) -> impl Future<Output = Settled<T>> + Send + 'static {
        let (tx, rx) = oneshot::channel();
        let label = Arc::clone(&self.inner.label);
        self.on_settled(move |outcome| {
            let _ = tx.send(outcome.clone());
        });
        async move {
            rx.await.unwrap_or_else(|_| {
                Err(Arc::new(GraphError::Unsettled {
                    label: label.to_string(),
                }))
            })
        }
    }

    /// Snapshot of the current state
    pub fn state(&self) -> DeferredState {
        match &*self.inner.state.lock() {
            State::Pending(_) => DeferredState::Pending,
            State::Settled(Ok(_)) => DeferredState::Resolved,
            State::Settled(Err(_)) => DeferredState::Failed,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state() == DeferredState::Pending
    }

    /// Current outcome, if settled
    pub fn try_get(&self) -> Option<Settled<T>> {
        match &*self.inner.state.lock() {
            State::Pending(_) => None,
            State::Settled(outcome) => Some(outcome.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn resolve_runs_each_continuation_once() {
        let value = Deferred::<u32>::pending("answer");
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = Arc::clone(&calls);
            value.on_settled(move |outcome| {
                assert_eq!(*outcome.as_ref().unwrap(), 42);
                calls.fetch_add(1, Ordering::SeqCst);
            });
        }

        value.resolve(42).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(value.state(), DeferredState::Resolved);
    }

    #[test]
    fn second_settle_is_rejected() {
        let value = Deferred::<u32>::pending("once");
        value.resolve(1).unwrap();

        let err = value.resolve(2).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadySettled);

        let err = value.fail(GraphError::Provider("late".into())).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadySettled);

        // First value wins
        assert_eq!(*value.try_get().unwrap().as_ref().unwrap(), 1);
    }

    #[test]
    fn continuation_after_settle_runs_immediately() {
        let value = Deferred::resolved("ready", "x".to_string());
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        value.on_settled(move |outcome| {
            *sink.lock() = outcome.as_ref().ok().cloned();
        });
        assert_eq!(seen.lock().as_deref(), Some("x"));
    }

    #[test]
    fn then_maps_and_keeps_origins() {
        let email = Deferred::<String>::from_resource("vault-svc.email", "vault-svc");
        let member = email.then(|e| format!("serviceAccount:{}", e));

        assert!(member.is_pending());
        assert!(member.origins().contains("vault-svc"));

        email.resolve("svc@p.iam.gserviceaccount.com".into()).unwrap();
        assert_eq!(
            member.try_get().unwrap().unwrap(),
            "serviceAccount:svc@p.iam.gserviceaccount.com"
        );
    }

    #[test]
    fn then_propagates_failure_without_calling_fn() {
        let source = Deferred::<u32>::pending("src");
        let called = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&called);
        let derived = source.then(move |v| {
            counter.fetch_add(1, Ordering::SeqCst);
            v + 1
        });

        source
            .fail(GraphError::ProvisionFailed {
                resource: "src".into(),
                reason: "denied".into(),
            })
            .unwrap();

        assert_eq!(called.load(Ordering::SeqCst), 0);
        let failure = derived.try_get().unwrap().unwrap_err();
        assert_eq!(failure.kind(), ErrorKind::ProvisionFailed);
    }

    #[test]
    fn try_then_error_fails_derived() {
        let source = Deferred::resolved("n", 3u32);
        let derived = source.try_then(|_| -> Result<u32, GraphError> {
            Err(GraphError::Provider("nope".into()))
        });
        assert_eq!(derived.state(), DeferredState::Failed);
    }

    #[test]
    fn nested_registration_inside_continuation_does_not_deadlock() {
        let value = Deferred::<u32>::pending("reentrant");
        let inner = value.clone();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        value.on_settled(move |_| {
            let counter = Arc::clone(&counter);
            inner.on_settled(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        });
        value.resolve(7).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn settled_future_completes_after_resolve() {
        let value = Deferred::<String>::pending("uri");
        let waiter = tokio::spawn(value.settled());

        value.resolve("https://vault.run.app".into()).unwrap();
        let outcome = waiter.await.unwrap();
        assert_eq!(outcome.unwrap(), "https://vault.run.app");
    }

    #[tokio::test]
    async fn then_async_runs_on_runtime() {
        let value = Deferred::<u32>::pending("n");
        let doubled = value.then_async(|n| async move {
            tokio::task::yield_now().await;
            Ok(n * 2)
        });

        value.resolve(21).unwrap();
        assert_eq!(doubled.settled().await.unwrap(), 42);
    }

    #[test]
    fn then_async_without_runtime_fails() {
        let value = Deferred::resolved("n", 1u32);
        let derived = value.then_async(|n| async move { Ok(n) });
        let failure = derived.try_get().unwrap().unwrap_err();
        assert!(matches!(*failure, GraphError::NoRuntime { .. }));
    }
}
