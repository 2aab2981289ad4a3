//! Output graph builder
//!
//! Pure combinators that derive new deferred values from existing ones:
//! - [`map`] - one value through a pure function
//! - [`all_named`] - fan-in a name → deferred map into one JSON object
//! - [`interpolate`] - render a `{{name}}` template once its bindings resolve
//!
//! Nothing here touches the provider. Given the same resolved inputs, every
//! combinator produces the same output.

mod resource_graph;
mod template;

pub use resource_graph::{DepVec, GraphNode, ResourceGraph};
pub use template::{placeholders, render, TemplateCache, Token, TEMPLATE_CACHE};

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::deferred::{self, Deferred};
use crate::error::{GraphError, Result};

/// Named deferred JSON inputs
pub type Bindings = BTreeMap<String, Deferred<Value>>;

/// Derive a value with a pure function
pub fn map<T, U, F>(value: &Deferred<T>, f: F) -> Deferred<U>
where
    T: Clone + Send + Sync + 'static,
    U: Clone + Send + Sync + 'static,
    F: FnOnce(T) -> U + Send + 'static,
{
    value.then(f)
}

/// Fan-in named values into one JSON object
///
/// Same failure semantics as [`deferred::all`]: the first failure by
/// settlement order wins.
pub fn all_named(label: impl Into<Arc<str>>, inputs: &Bindings) -> Deferred<Map<String, Value>> {
    let names: Vec<String> = inputs.keys().cloned().collect();
    let values: Vec<Deferred<Value>> = inputs.values().cloned().collect();
    deferred::all(label, values).then(move |resolved| names.into_iter().zip(resolved).collect())
}

/// Render `template` once every referenced binding resolves
///
/// Placeholders are checked against `bindings` up front, so a template that
/// can never render fails here instead of inside the graph. Only the
/// referenced bindings become dependencies of the result.
pub fn interpolate(
    label: impl Into<Arc<str>>,
    template: &str,
    bindings: &Bindings,
) -> Result<Deferred<String>> {
    let names = placeholders(template)?;

    let mut used = Bindings::new();
    for name in names {
        let Some(value) = bindings.get(&name) else {
            return Err(GraphError::UnboundPlaceholder {
                name,
                template: template.to_string(),
            });
        };
        used.insert(name, value.clone());
    }

    let template = template.to_string();
    Ok(all_named(label, &used).try_then(move |values| render(&template, &values)))
}

/// Lift a deferred into the JSON domain
pub fn json<T>(value: &Deferred<T>) -> Deferred<Value>
where
    T: Clone + Send + Sync + Into<Value> + 'static,
{
    value.then(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deferred::DeferredState;
    use serde_json::json;

    fn bound(pairs: &[(&str, &Deferred<Value>)]) -> Bindings {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), (*v).clone()))
            .collect()
    }

    #[test]
    fn all_named_builds_object() {
        let bucket = Deferred::<Value>::from_resource("bucket", "vault-storage");
        let region = Deferred::resolved("region", json!("us-central1"));
        let combined = all_named("cfg", &bound(&[("bucket", &bucket), ("region", &region)]));

        assert!(combined.origins().contains("vault-storage"));
        bucket.resolve(json!("vault-storage-1234")).unwrap();

        let object = combined.try_get().unwrap().unwrap();
        assert_eq!(object["bucket"], json!("vault-storage-1234"));
        assert_eq!(object["region"], json!("us-central1"));
    }

    #[test]
    fn interpolate_waits_for_bindings() {
        let bucket = Deferred::<Value>::pending("bucket");
        let blob = interpolate(
            "config",
            "storage \"gcs\" { bucket = \"{{bucket}}\" }",
            &bound(&[("bucket", &bucket)]),
        )
        .unwrap();
        assert_eq!(blob.state(), DeferredState::Pending);

        bucket.resolve(json!("b-1")).unwrap();
        assert_eq!(
            blob.try_get().unwrap().unwrap(),
            "storage \"gcs\" { bucket = \"b-1\" }"
        );
    }

    #[test]
    fn interpolate_rejects_unbound_names_up_front() {
        let err = interpolate("config", "{{bucket}} {{key}}", &Bindings::new()).unwrap_err();
        assert!(matches!(err, GraphError::UnboundPlaceholder { name, .. } if name == "bucket"));
    }

    #[test]
    fn interpolate_only_depends_on_referenced_bindings() {
        let used = Deferred::<Value>::from_resource("used", "vault-storage");
        let unused = Deferred::<Value>::from_resource("unused", "vault-keys");
        let out = interpolate(
            "cfg",
            "{{used}}",
            &bound(&[("used", &used), ("unused", &unused)]),
        )
        .unwrap();

        assert!(out.origins().contains("vault-storage"));
        assert!(!out.origins().contains("vault-keys"));
    }

    #[test]
    fn map_is_deterministic_on_resolved_inputs() {
        let hex = Deferred::resolved("hex", "a1b2".to_string());
        let first = map(&hex, |h| format!("svc-vault-storage-{}", h));
        let second = map(&hex, |h| format!("svc-vault-storage-{}", h));
        assert_eq!(first.try_get().unwrap().unwrap(), second.try_get().unwrap().unwrap());
    }
}
