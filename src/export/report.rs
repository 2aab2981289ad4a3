//! Rendering of the final export report

use std::fmt::Write as _;

use colored::Colorize;
use serde_json::{json, Map, Value};

use super::Exposure;
use crate::deferred::Settled;
use crate::error::FixSuggestion;
use crate::util::mask_secret;

/// One export after settlement
#[derive(Debug, Clone)]
pub struct ExportResult {
    pub name: String,
    pub exposure: Exposure,
    pub outcome: Settled<Value>,
}

impl ExportResult {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Value as shown to the operator
    fn display_value(&self, show_secrets: bool) -> Option<Value> {
        let value = self.outcome.as_ref().ok()?;
        if self.exposure == Exposure::Sensitive && !show_secrets {
            return Some(mask(value));
        }
        Some(value.clone())
    }
}

fn mask(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(mask_secret(s, 4)),
        Value::Array(items) => Value::Array(items.iter().map(mask).collect()),
        _ => Value::String("***".into()),
    }
}

/// Final report: every export with its value or error, in registration order
#[derive(Debug, Clone, Default)]
pub struct ExportReport {
    results: Vec<ExportResult>,
}

impl ExportReport {
    pub fn new(results: Vec<ExportResult>) -> Self {
        Self { results }
    }

    pub fn get(&self, name: &str) -> Option<&ExportResult> {
        self.results.iter().find(|r| r.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExportResult> {
        self.results.iter()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn failed_count(&self) -> usize {
        self.results.iter().filter(|r| !r.is_ok()).count()
    }

    pub fn is_success(&self) -> bool {
        self.failed_count() == 0
    }

    /// `{name: {"value": ...}}` or `{name: {"error": ..., "root_cause": ...}}`
    pub fn to_json(&self, show_secrets: bool) -> Value {
        let mut out = Map::new();
        for result in &self.results {
            let entry = match &result.outcome {
                Ok(_) => json!({
                    "value": result.display_value(show_secrets),
                    "sensitive": result.exposure == Exposure::Sensitive,
                }),
                Err(failure) => json!({
                    "error": failure.to_string(),
                    "root_cause": failure.root_cause().to_string(),
                }),
            };
            out.insert(result.name.clone(), entry);
        }
        Value::Object(out)
    }

    /// Coloured text for the terminal
    pub fn render_text(&self, show_secrets: bool) -> String {
        let width = self.results.iter().map(|r| r.name.len()).max().unwrap_or(0);
        let mut out = String::new();

        for result in &self.results {
            let name = format!("{:width$}", result.name, width = width);
            match &result.outcome {
                Ok(_) => {
                    let shown = match result.display_value(show_secrets) {
                        Some(Value::String(s)) => s,
                        Some(other) => other.to_string(),
                        None => String::new(),
                    };
                    let _ = writeln!(out, "{} {}  {}", "✓".green(), name.bold(), shown);
                }
                Err(failure) => {
                    let root = failure.root_cause();
                    let _ = writeln!(
                        out,
                        "{} {}  {}",
                        "✗".red(),
                        name.bold(),
                        failure.to_string().red()
                    );
                    if !std::ptr::eq(root, &**failure) {
                        let _ = writeln!(out, "  {} {}", "cause:".dimmed(), root);
                    }
                    if let Some(fix) = root.fix_suggestion() {
                        let _ = writeln!(out, "  {} {}", "Fix:".yellow(), fix);
                    }
                }
            }
        }

        let failed = self.failed_count();
        let summary = format!("{} exports, {} failed", self.results.len(), failed);
        let _ = writeln!(
            out,
            "{}",
            if failed == 0 { summary.green() } else { summary.red() }
        );
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GraphError;
    use std::sync::Arc;

    fn report() -> ExportReport {
        ExportReport::new(vec![
            ExportResult {
                name: "url".into(),
                exposure: Exposure::Plain,
                outcome: Ok(json!("https://vault.run.app")),
            },
            ExportResult {
                name: "root_token".into(),
                exposure: Exposure::Sensitive,
                outcome: Ok(json!("hvs.0123456789abcdef")),
            },
            ExportResult {
                name: "oidc_accessor".into(),
                exposure: Exposure::Plain,
                outcome: Err(Arc::new(GraphError::dependency(
                    "vault-oidc",
                    Arc::new(GraphError::BootstrapFailed {
                        status: Some(500),
                        snippet: "sealed".into(),
                    }),
                ))),
            },
        ])
    }

    #[test]
    fn secrets_are_masked_by_default() {
        let json = report().to_json(false);
        assert_eq!(json["url"]["value"], "https://vault.run.app");
        assert_eq!(json["root_token"]["value"], "hvs.****************");
        assert_eq!(json["root_token"]["sensitive"], true);
    }

    #[test]
    fn secrets_shown_on_request() {
        let json = report().to_json(true);
        assert_eq!(json["root_token"]["value"], "hvs.0123456789abcdef");
    }

    #[test]
    fn failures_report_root_cause() {
        let json = report().to_json(false);
        assert!(json["oidc_accessor"]["error"].as_str().unwrap().contains("VG-010"));
        assert!(json["oidc_accessor"]["root_cause"].as_str().unwrap().contains("HTTP 500"));
    }

    #[test]
    fn text_lists_every_export() {
        colored::control::set_override(false);
        let text = report().render_text(false);
        assert!(text.contains("url"));
        assert!(text.contains("oidc_accessor"));
        assert!(text.contains("cause:"));
        assert!(text.contains("3 exports, 1 failed"));
        assert!(!text.contains("0123456789abcdef"));
    }
}
