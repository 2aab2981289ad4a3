//! Single-pass template interpolation with caching
//!
//! Templates use `{{name}}` or `{{name.field.0}}` placeholders. Templates are
//! tokenized once and cached; rendering is a single pass over the tokens.

use std::ops::Range;
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use serde_json::{Map, Value};

use crate::error::GraphError;

/// Token representing a parsed template fragment
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Literal text (range in the original string)
    Literal(Range<usize>),
    /// Placeholder: binding name plus optional path segments
    Placeholder { name: String, path: Vec<String> },
}

/// Template tokenizer with caching
pub struct TemplateCache {
    cache: DashMap<String, Arc<Vec<Token>>>,
}

impl Default for TemplateCache {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateCache {
    pub fn new() -> Self {
        Self {
            cache: DashMap::new(),
        }
    }

    /// Parse a template into tokens (cached)
    pub fn tokenize(&self, template: &str) -> Result<Arc<Vec<Token>>, GraphError> {
        if let Some(cached) = self.cache.get(template) {
            return Ok(Arc::clone(&cached));
        }

        let tokens = Arc::new(parse(template)?);
        self.cache
            .insert(template.to_string(), Arc::clone(&tokens));
        Ok(tokens)
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

fn parse(template: &str) -> Result<Vec<Token>, GraphError> {
    let mut tokens = Vec::new();
    let mut literal_start = 0;
    let mut cursor = 0;

    while let Some(offset) = template[cursor..].find("{{") {
        let open = cursor + offset;
        let body_start = open + 2;
        let Some(close_offset) = template[body_start..].find("}}") else {
            return Err(GraphError::TemplateError {
                template: template.to_string(),
                reason: format!("unterminated placeholder at position {}", open),
            });
        };
        let close = body_start + close_offset;

        if open > literal_start {
            tokens.push(Token::Literal(literal_start..open));
        }

        let body = template[body_start..close].trim();
        let mut segments = body.split('.');
        let name = segments.next().unwrap_or_default();
        if name.is_empty() || segments.clone().any(str::is_empty) {
            return Err(GraphError::TemplateError {
                template: template.to_string(),
                reason: format!("invalid placeholder '{{{{{}}}}}'", body),
            });
        }
        tokens.push(Token::Placeholder {
            name: name.to_string(),
            path: segments.map(str::to_string).collect(),
        });

        cursor = close + 2;
        literal_start = cursor;
    }

    if literal_start < template.len() {
        tokens.push(Token::Literal(literal_start..template.len()));
    }
    Ok(tokens)
}

/// Global tokenizer cache
pub static TEMPLATE_CACHE: Lazy<TemplateCache> = Lazy::new(TemplateCache::new);

/// Names referenced by a template, in order of first appearance
pub fn placeholders(template: &str) -> Result<Vec<String>, GraphError> {
    let tokens = TEMPLATE_CACHE.tokenize(template)?;
    let mut names: Vec<String> = Vec::new();
    for token in tokens.iter() {
        if let Token::Placeholder { name, .. } = token {
            if !names.iter().any(|n| n == name) {
                names.push(name.clone());
            }
        }
    }
    Ok(names)
}

/// Render a template against resolved values
pub fn render(template: &str, values: &Map<String, Value>) -> Result<String, GraphError> {
    let tokens = TEMPLATE_CACHE.tokenize(template)?;
    let mut out = String::with_capacity(template.len() * 2);

    for token in tokens.iter() {
        match token {
            Token::Literal(range) => out.push_str(&template[range.clone()]),
            Token::Placeholder { name, path } => {
                let root = values
                    .get(name)
                    .ok_or_else(|| GraphError::UnboundPlaceholder {
                        name: name.clone(),
                        template: template.to_string(),
                    })?;
                let value = traverse(root, path).ok_or_else(|| GraphError::TemplateError {
                    template: template.to_string(),
                    reason: format!("path '{}.{}' not found", name, path.join(".")),
                })?;
                match value {
                    Value::String(s) => out.push_str(s),
                    other => out.push_str(&other.to_string()),
                }
            }
        }
    }
    Ok(out)
}

fn traverse<'a>(root: &'a Value, path: &[String]) -> Option<&'a Value> {
    let mut current = root;
    for segment in path {
        current = match segment.parse::<usize>() {
            Ok(index) => current.get(index)?,
            Err(_) => current.get(segment.as_str())?,
        };
    }
    Some(current)
}
