//! Generic HTTP tool (§4.8): a YAML-declared URL + method + headers +
//! body template, with `{{var}}` substitution drawn from
//! `{caller_number, called_number, call_id, pre_call_results.*, env.*}`
//! plus the AI-supplied arguments.
//!
//! Grounded in the teacher's `tools/src/integrations.rs` external-call
//! shape (a typed request struct dispatched over the network, errors
//! folded into `ToolOutput`), generalized from a bespoke per-integration
//! trait to one config-driven tool since this spec wants arbitrary
//! operator-declared endpoints rather than a fixed CRM/calendar pair.

use crate::tool::Tool;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;
use voxrelay_core::{Error, Result, ToolDefinition, ToolInvocation, ToolOutput, ToolPhase};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    fn to_reqwest(self) -> reqwest::Method {
        match self {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

/// One YAML-declared HTTP tool, as loaded from the tools configuration
/// directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpToolSpec {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub input_schema: Option<serde_json::Value>,
    pub method: HttpMethod,
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body_template: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    10
}

/// Everything the template substitution draws from besides the AI's own
/// tool arguments, which are merged on top at call time.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    pub caller_number: Option<String>,
    pub called_number: Option<String>,
    pub call_id: String,
    /// Keyed by tool name; each value is that tool's `ToolOutput::data`.
    pub pre_call_results: HashMap<String, serde_json::Value>,
    pub env: HashMap<String, String>,
}

impl CallContext {
    fn as_json(&self, arguments: &serde_json::Value) -> serde_json::Value {
        serde_json::json!({
            "caller_number": self.caller_number,
            "called_number": self.called_number,
            "call_id": self.call_id,
            "pre_call_results": self.pre_call_results,
            "env": self.env,
            "args": arguments,
        })
    }
}

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{\{\s*([a-zA-Z0-9_.]+)\s*\}\}").unwrap())
}

fn resolve_path<'a>(root: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    path.split('.').try_fold(root, |node, segment| node.get(segment))
}

fn render_value_as_str(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Substitute every `{{path.to.value}}` token in `template` against
/// `context`. Unresolvable paths render as an empty string rather than
/// failing the whole call, so an optional field missing doesn't break a
/// tool that doesn't need it.
pub fn render_template(template: &str, context: &serde_json::Value) -> String {
    placeholder_pattern()
        .replace_all(template, |caps: &regex::Captures| {
            let path = &caps[1];
            resolve_path(context, path).map(render_value_as_str).unwrap_or_default()
        })
        .into_owned()
}

/// Load one or more HTTP tool declarations from a YAML document (a
/// single mapping or a `- name: ...` sequence).
pub fn load_specs(yaml: &str) -> Result<Vec<HttpToolSpec>> {
    let value: serde_yaml::Value =
        serde_yaml::from_str(yaml).map_err(|e| Error::ConfigInvalid(format!("invalid HTTP tool YAML: {e}")))?;

    let specs = if value.is_sequence() {
        serde_yaml::from_value(value)
    } else {
        serde_yaml::from_value::<HttpToolSpec>(value).map(|spec| vec![spec])
    };

    specs.map_err(|e| Error::ConfigInvalid(format!("invalid HTTP tool YAML: {e}")))
}

pub struct HttpTool {
    definition: ToolDefinition,
    spec: HttpToolSpec,
    client: reqwest::Client,
    context: CallContext,
}

impl HttpTool {
    pub fn new(spec: HttpToolSpec, context: CallContext) -> Self {
        let definition = ToolDefinition {
            name: spec.name.clone(),
            description: spec.description.clone(),
            input_schema: spec
                .input_schema
                .clone()
                .unwrap_or_else(|| serde_json::json!({ "type": "object" })),
            phase: ToolPhase::InCall,
            timeout: Duration::from_secs(spec.timeout_secs),
        };
        Self {
            definition,
            spec,
            client: reqwest::Client::new(),
            context,
        }
    }
}

#[async_trait]
impl Tool for HttpTool {
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn execute(&self, invocation: &ToolInvocation) -> Result<ToolOutput> {
        let context_json = self.context.as_json(&invocation.arguments);

        let url = render_template(&self.spec.url, &context_json);
        let mut request = self.client.request(self.spec.method.to_reqwest(), url);

        for (key, value_template) in &self.spec.headers {
            request = request.header(key, render_template(value_template, &context_json));
        }

        if let Some(body_template) = &self.spec.body_template {
            request = request.body(render_template(body_template, &context_json));
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::ToolMalformed {
                tool: self.spec.name.clone(),
                detail: format!("request failed: {e}"),
            })?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if status.is_success() {
            let data = serde_json::from_str::<serde_json::Value>(&body).ok();
            Ok(ToolOutput {
                status: voxrelay_core::ToolStatus::Ok,
                message: format!("{} {}", self.spec.name, status),
                data,
            })
        } else {
            Ok(ToolOutput::error(format!("{} returned {status}: {body}", self.spec.name)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_known_paths_and_blanks_unknown_ones() {
        let context = serde_json::json!({
            "caller_number": "+15551234567",
            "pre_call_results": { "lookup_account": { "tier": "gold" } },
        });
        let rendered = render_template(
            "caller={{caller_number}} tier={{pre_call_results.lookup_account.tier}} missing={{nope}}",
            &context,
        );
        assert_eq!(rendered, "caller=+15551234567 tier=gold missing=");
    }

    #[test]
    fn loads_a_single_spec_from_yaml() {
        let yaml = "name: lookup_order\ndescription: look up an order\nmethod: GET\nurl: https://example.com/orders/{{args.order_id}}\n";
        let specs = load_specs(yaml).unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].name, "lookup_order");
        assert_eq!(specs[0].method, HttpMethod::Get);
    }

    #[test]
    fn loads_a_sequence_of_specs_from_yaml() {
        let yaml = "- name: a\n  description: d\n  method: GET\n  url: https://example.com/a\n- name: b\n  description: d\n  method: POST\n  url: https://example.com/b\n";
        let specs = load_specs(yaml).unwrap();
        assert_eq!(specs.len(), 2);
    }

    #[test]
    fn args_are_addressable_under_the_args_prefix() {
        let context = CallContext {
            call_id: "call-1".into(),
            ..Default::default()
        }
        .as_json(&serde_json::json!({ "order_id": "A1" }));
        assert_eq!(render_template("{{args.order_id}}", &context), "A1");
    }
}
