//! Resource descriptors and their output handles

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::deferred::Deferred;
use crate::error::GraphError;
use crate::graph::Bindings;
use crate::provider::ResourceKind;

/// Declaration of one resource: kind, named inputs, static config, expected attributes
#[derive(Debug, Clone)]
pub struct ResourceDescriptor {
    pub(crate) name: String,
    pub(crate) kind: ResourceKind,
    pub(crate) inputs: Bindings,
    pub(crate) config: Value,
    pub(crate) outputs: Vec<String>,
}

impl ResourceDescriptor {
    pub fn new(name: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            name: name.into(),
            kind,
            inputs: BTreeMap::new(),
            config: Value::Object(Default::default()),
            outputs: Vec::new(),
        }
    }

    /// Add a named input; the resource is submitted only after it resolves
    pub fn input<T>(mut self, name: impl Into<String>, value: &Deferred<T>) -> Self
    where
        T: Serialize + Clone + Send + Sync + 'static,
    {
        let json = value.try_then(|v| serde_json::to_value(v).map_err(GraphError::from));
        self.inputs.insert(name.into(), json);
        self
    }

    /// Add an input that is already JSON
    pub fn input_json(mut self, name: impl Into<String>, value: &Deferred<Value>) -> Self {
        self.inputs.insert(name.into(), value.clone());
        self
    }

    /// Static configuration handed to the provider as-is
    pub fn config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    /// Attributes the provider must report on success
    pub fn outputs<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.outputs.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }
}

/// Output handles of a declared resource
#[derive(Debug, Clone)]
pub struct ResourceOutputs {
    pub(crate) name: Arc<str>,
    pub(crate) kind: ResourceKind,
    pub(crate) created: Deferred<Value>,
    pub(crate) fields: BTreeMap<String, Deferred<Value>>,
}

impl ResourceOutputs {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Resolves with the whole attribute bundle once the provider confirms creation
    pub fn created(&self) -> &Deferred<Value> {
        &self.created
    }

    /// Declared attribute
    ///
    /// Asking for an attribute the descriptor did not declare yields a
    /// failed value carrying `MissingAttribute`.
    pub fn get(&self, attribute: &str) -> Deferred<Value> {
        match self.fields.get(attribute) {
            Some(field) => field.clone(),
            None => Deferred::failed(
                format!("{}.{}", self.name, attribute),
                GraphError::MissingAttribute {
                    resource: self.name.to_string(),
                    attribute: attribute.to_string(),
                },
            ),
        }
    }

    /// Declared attribute as a string
    pub fn string(&self, attribute: &str) -> Deferred<String> {
        let resource = self.name.to_string();
        let attribute = attribute.to_string();
        self.get(&attribute).try_then(move |value| match value {
            Value::String(s) => Ok(s),
            other => Err(GraphError::ProvisionFailed {
                resource,
                reason: format!("attribute '{}' is not a string: {}", attribute, other),
            }),
        })
    }

    pub fn attributes(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }
}
