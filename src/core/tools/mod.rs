//! Typed tool runtime.
//!
//! Tools are registered once at startup with a name, a JSON-shaped parameter
//! schema and capability flags. Dispatch validates and coerces arguments,
//! applies the input guardrail to db-reading tools, runs the handler under a
//! deadline, caps the serialized result and records the invocation.

pub mod db_tools;
pub mod log_tools;
pub mod metrics_tools;
pub mod perf_tools;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::core::config::AppConfig;
use crate::core::db::DbGateway;
use crate::core::error::{DiagError, DiagResult};
use crate::core::guardrails;
use crate::core::observability::{
    InvocationOutcome, ObservabilitySink, TelemetryRecord, ToolInvocation,
};

pub const TOOL_TIMEOUT_DEFAULT_SECS: u64 = 30;
pub const TOOL_TIMEOUT_CAP_SECS: u64 = 120;
/// Serialized tool results larger than this are truncated with a marker.
pub const TOOL_RESULT_CAP_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Integer,
    Float,
    Boolean,
}

impl ParamKind {
    fn json_type(self) -> &'static str {
        match self {
            ParamKind::String => "string",
            ParamKind::Integer => "integer",
            ParamKind::Float => "number",
            ParamKind::Boolean => "boolean",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub description: &'static str,
    pub required: bool,
    pub default: Option<Value>,
    pub allowed: Option<Vec<&'static str>>,
}

impl ParamSpec {
    pub fn required(name: &'static str, kind: ParamKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            description,
            required: true,
            default: None,
            allowed: None,
        }
    }

    pub fn optional(
        name: &'static str,
        kind: ParamKind,
        description: &'static str,
        default: Value,
    ) -> Self {
        Self {
            name,
            kind,
            description,
            required: false,
            default: Some(default),
            allowed: None,
        }
    }

    /// Optional parameter with no default: absent means absent.
    pub fn nullable(name: &'static str, kind: ParamKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            description,
            required: false,
            default: None,
            allowed: None,
        }
    }
}

/// Capability flags; the input guardrail keys off `reads_db`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ToolCaps {
    pub reads_db: bool,
    pub reads_log: bool,
    pub pure: bool,
}

impl ToolCaps {
    pub const DB: Self = Self {
        reads_db: true,
        reads_log: false,
        pure: false,
    };
    pub const LOG: Self = Self {
        reads_db: false,
        reads_log: true,
        pure: false,
    };
    pub const PURE: Self = Self {
        reads_db: false,
        reads_log: false,
        pure: true,
    };
}

#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub params: Vec<ParamSpec>,
    pub caps: ToolCaps,
    pub timeout_secs: u64,
}

impl ToolSpec {
    pub fn new(
        name: &'static str,
        description: &'static str,
        params: Vec<ParamSpec>,
        caps: ToolCaps,
    ) -> Self {
        Self {
            name,
            description,
            params,
            caps,
            timeout_secs: TOOL_TIMEOUT_DEFAULT_SECS,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs.min(TOOL_TIMEOUT_CAP_SECS);
        self
    }

    /// Function-call schema in the shape the reasoning service consumes.
    pub fn catalog_entry(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for p in &self.params {
            let mut prop = Map::new();
            prop.insert("type".into(), json!(p.kind.json_type()));
            prop.insert("description".into(), json!(p.description));
            if let Some(allowed) = &p.allowed {
                prop.insert("enum".into(), json!(allowed));
            }
            if let Some(default) = &p.default {
                prop.insert("default".into(), default.clone());
            }
            properties.insert(p.name.to_string(), Value::Object(prop));
            if p.required {
                required.push(p.name);
            }
        }
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": {
                    "type": "object",
                    "properties": properties,
                    "required": required,
                }
            }
        })
    }
}

/// Shared handles every tool handler gets.
pub struct ToolContext {
    pub gateway: Arc<DbGateway>,
    pub config: Arc<AppConfig>,
}

#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, ctx: &ToolContext, args: &Map<String, Value>) -> DiagResult<Value>;
}

struct RegisteredTool {
    spec: ToolSpec,
    handler: Arc<dyn ToolHandler>,
}

/// Built once at startup, read-only thereafter.
pub struct ToolRegistry {
    tools: HashMap<&'static str, RegisteredTool>,
    order: Vec<&'static str>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn register(&mut self, spec: ToolSpec, handler: Arc<dyn ToolHandler>) {
        assert!(
            !self.tools.contains_key(spec.name),
            "duplicate tool name: {}",
            spec.name
        );
        self.order.push(spec.name);
        self.tools.insert(spec.name, RegisteredTool { spec, handler });
    }

    pub fn spec(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.get(name).map(|t| &t.spec)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.order.clone()
    }

    /// Catalog entries for a subset of tools, in registration order.
    pub fn catalog(&self, names: &[&str]) -> Vec<Value> {
        self.order
            .iter()
            .filter(|n| names.iter().any(|m| *m == **n))
            .filter_map(|n| self.tools.get(*n))
            .map(|t| t.spec.catalog_entry())
            .collect()
    }

    /// Validate, guard, execute and record a tool call.
    pub async fn dispatch(
        &self,
        name: &str,
        raw_args: &Value,
        ctx: &ToolContext,
        sink: &ObservabilitySink,
        root_id: &str,
        parent_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> DiagResult<Value> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| DiagError::UnknownTool(name.to_string()))?;

        let invocation_id = ObservabilitySink::new_invocation_id();
        let started_at = Utc::now();
        info!(tool = name, id = %invocation_id, "tool dispatch");

        // validation and guardrail failures are invocations too: they are
        // finalized below with their outcome, they just never run the handler
        let outcome = match self.prepare(tool, raw_args) {
            Ok(args) => {
                let deadline =
                    Duration::from_secs(tool.spec.timeout_secs.min(TOOL_TIMEOUT_CAP_SECS));
                let run = tokio::select! {
                    _ = cancel.cancelled() => Err(DiagError::Cancelled),
                    timed = tokio::time::timeout(deadline, tool.handler.call(ctx, &args)) => match timed {
                        Ok(result) => result,
                        Err(_) => Err(DiagError::Timeout(format!(
                            "tool '{name}' exceeded {}s",
                            deadline.as_secs()
                        ))),
                    },
                };
                run.map(|value| (args, value))
            }
            Err(e) => Err(e),
        };

        let (record_outcome, error_kind, recorded_args, result) = match outcome {
            Ok((args, value)) => (
                InvocationOutcome::Ok,
                None,
                Value::Object(args),
                Ok(cap_result(value)),
            ),
            Err(e) => {
                warn!(tool = name, "tool failed: {e}");
                let outcome = match &e {
                    DiagError::InputBlocked(_) | DiagError::UnsafeQuery(_) => {
                        InvocationOutcome::GuardrailRejected
                    }
                    DiagError::Timeout(_) => InvocationOutcome::Timeout,
                    DiagError::Cancelled => InvocationOutcome::Cancelled,
                    _ => InvocationOutcome::Failed,
                };
                (outcome, Some(e.kind().to_string()), raw_args.clone(), Err(e))
            }
        };

        let result_bytes = result
            .as_ref()
            .ok()
            .and_then(|v| serde_json::to_string(v).ok())
            .map(|s| s.len())
            .unwrap_or(0);
        sink.append(TelemetryRecord::Tool(ToolInvocation {
            id: invocation_id,
            root_id: root_id.to_string(),
            parent_id: parent_id.map(str::to_string),
            tool: name.to_string(),
            args: recorded_args,
            started_at,
            finished_at: Utc::now(),
            outcome: record_outcome,
            error_kind,
            result_bytes,
        }));
        result
    }

    /// Argument validation plus the input guardrail for db-reading tools.
    fn prepare(&self, tool: &RegisteredTool, raw_args: &Value) -> DiagResult<Map<String, Value>> {
        let args = validate_args(&tool.spec, raw_args)?;
        if tool.spec.caps.reads_db {
            for value in args.values() {
                if let Value::String(s) = value {
                    guardrails::check_input(s)?;
                }
            }
        }
        Ok(args)
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Coerce and check a raw argument object against the schema. Unknown keys
/// and missing required keys are rejected; defaults are applied centrally.
fn validate_args(spec: &ToolSpec, raw: &Value) -> DiagResult<Map<String, Value>> {
    let raw = match raw {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        _ => {
            return Err(DiagError::BadArgs(format!(
                "arguments for '{}' must be an object",
                spec.name
            )))
        }
    };

    for key in raw.keys() {
        if !spec.params.iter().any(|p| p.name == key) {
            return Err(DiagError::BadArgs(format!(
                "unknown argument '{key}' for tool '{}'",
                spec.name
            )));
        }
    }

    let mut out = Map::new();
    for param in &spec.params {
        let value = match raw.get(param.name) {
            Some(Value::Null) | None => {
                if param.required {
                    return Err(DiagError::BadArgs(format!(
                        "missing required argument '{}' for tool '{}'",
                        param.name, spec.name
                    )));
                }
                match &param.default {
                    Some(d) => d.clone(),
                    None => continue,
                }
            }
            Some(v) => coerce(param, v)?,
        };
        if let Some(allowed) = &param.allowed {
            let s = value.as_str().unwrap_or_default();
            if !allowed.contains(&s) {
                return Err(DiagError::BadArgs(format!(
                    "argument '{}' must be one of {:?}",
                    param.name, allowed
                )));
            }
        }
        out.insert(param.name.to_string(), value);
    }
    Ok(out)
}

fn coerce(param: &ParamSpec, value: &Value) -> DiagResult<Value> {
    let mismatch = || {
        DiagError::BadArgs(format!(
            "argument '{}' expected {}",
            param.name,
            param.kind.json_type()
        ))
    };
    match param.kind {
        ParamKind::String => match value {
            Value::String(_) => Ok(value.clone()),
            Value::Number(n) => Ok(Value::String(n.to_string())),
            _ => Err(mismatch()),
        },
        ParamKind::Integer => match value {
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value.clone()),
            Value::Number(n) => n
                .as_f64()
                .filter(|f| f.fract() == 0.0)
                .map(|f| json!(f as i64))
                .ok_or_else(mismatch),
            Value::String(s) => s.parse::<i64>().map(|v| json!(v)).map_err(|_| mismatch()),
            _ => Err(mismatch()),
        },
        ParamKind::Float => match value {
            Value::Number(n) => n.as_f64().map(|f| json!(f)).ok_or_else(mismatch),
            Value::String(s) => s.parse::<f64>().map(|v| json!(v)).map_err(|_| mismatch()),
            _ => Err(mismatch()),
        },
        ParamKind::Boolean => match value {
            Value::Bool(_) => Ok(value.clone()),
            Value::String(s) => match s.as_str() {
                "true" | "1" => Ok(json!(true)),
                "false" | "0" => Ok(json!(false)),
                _ => Err(mismatch()),
            },
            _ => Err(mismatch()),
        },
    }
}

/// Enforce the serialized result budget, replacing oversized payloads with a
/// truncated prefix and marker.
fn cap_result(value: Value) -> Value {
    let serialized = match serde_json::to_string(&value) {
        Ok(s) => s,
        Err(_) => return value,
    };
    if serialized.len() <= TOOL_RESULT_CAP_BYTES {
        return value;
    }
    let prefix: String = serialized.chars().take(TOOL_RESULT_CAP_BYTES / 2).collect();
    json!({
        "truncated": true,
        "original_bytes": serialized.len(),
        "result_prefix": prefix,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> ToolSpec {
        ToolSpec::new(
            "execute_sql",
            "run read-only sql",
            vec![
                ParamSpec::required("sql", ParamKind::String, "the statement"),
                ParamSpec::optional("max_rows", ParamKind::Integer, "row cap", json!(100)),
                ParamSpec::nullable("database", ParamKind::String, "db override"),
            ],
            ToolCaps::DB,
        )
    }

    #[test]
    fn defaults_are_applied_centrally() {
        let args = validate_args(&spec(), &json!({"sql": "SELECT 1"})).unwrap();
        assert_eq!(args["max_rows"], json!(100));
        assert!(!args.contains_key("database"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = validate_args(&spec(), &json!({"sql": "SELECT 1", "bogus": 1})).unwrap_err();
        assert_eq!(err.kind(), "bad_args");
    }

    #[test]
    fn missing_required_keys_are_rejected() {
        let err = validate_args(&spec(), &json!({"max_rows": 5})).unwrap_err();
        assert_eq!(err.kind(), "bad_args");
    }

    #[test]
    fn numeric_strings_coerce_to_integers() {
        let args = validate_args(&spec(), &json!({"sql": "SELECT 1", "max_rows": "50"})).unwrap();
        assert_eq!(args["max_rows"], json!(50));
    }

    #[test]
    fn fractional_numbers_do_not_coerce_to_integers() {
        let err =
            validate_args(&spec(), &json!({"sql": "SELECT 1", "max_rows": 2.5})).unwrap_err();
        assert_eq!(err.kind(), "bad_args");
    }

    #[test]
    fn enum_values_are_enforced() {
        let mut s = spec();
        s.params.push(ParamSpec {
            name: "metric",
            kind: ParamKind::String,
            description: "which metric",
            required: false,
            default: None,
            allowed: Some(vec!["cpu", "disk_data"]),
        });
        let err = validate_args(&s, &json!({"sql": "SELECT 1", "metric": "ram"})).unwrap_err();
        assert_eq!(err.kind(), "bad_args");
        let ok = validate_args(&s, &json!({"sql": "SELECT 1", "metric": "cpu"})).unwrap();
        assert_eq!(ok["metric"], json!("cpu"));
    }

    #[test]
    fn oversized_results_are_truncated_with_marker() {
        let big = json!({"rows": vec!["x".repeat(1024); 128]});
        let capped = cap_result(big);
        assert_eq!(capped["truncated"], json!(true));
        assert!(capped["original_bytes"].as_u64().unwrap() > TOOL_RESULT_CAP_BYTES as u64);
    }

    #[test]
    fn small_results_pass_untouched() {
        let v = json!({"rows": [1, 2, 3]});
        assert_eq!(cap_result(v.clone()), v);
    }

    #[test]
    fn catalog_entry_carries_schema() {
        let entry = spec().catalog_entry();
        assert_eq!(entry["function"]["name"], json!("execute_sql"));
        assert_eq!(
            entry["function"]["parameters"]["properties"]["sql"]["type"],
            json!("string")
        );
        assert_eq!(entry["function"]["parameters"]["required"], json!(["sql"]));
    }

    #[test]
    fn timeout_is_capped() {
        let s = spec().with_timeout(600);
        assert_eq!(s.timeout_secs, TOOL_TIMEOUT_CAP_SECS);
    }
}
