//! Log ingestion tools: error-log pattern extraction and slow-log tailing.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::core::error::{DiagError, DiagResult};
use crate::core::logs::ingest::{self, DEFAULT_TAIL_LINES};
use crate::core::logs::patterns::{self, DEFAULT_MAX_PATTERNS};

use super::{ParamKind, ParamSpec, ToolCaps, ToolContext, ToolHandler, ToolRegistry, ToolSpec};

struct ReadErrorLog;

#[async_trait]
impl ToolHandler for ReadErrorLog {
    async fn call(&self, ctx: &ToolContext, args: &Map<String, Value>) -> DiagResult<Value> {
        let path = args.get("path").and_then(Value::as_str);
        let service_id = args.get("service_id").and_then(Value::as_str);
        let tail_lines = args
            .get("tail_lines")
            .and_then(Value::as_i64)
            .unwrap_or(DEFAULT_TAIL_LINES as i64) as usize;
        let extract = args
            .get("extract_patterns")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        let max_patterns = args
            .get("max_patterns")
            .and_then(Value::as_i64)
            .unwrap_or(DEFAULT_MAX_PATTERNS as i64) as usize;

        let buffer = ingest::load(&ctx.config.skysql, path, service_id, tail_lines).await?;
        if extract {
            let extracted = patterns::extract(&buffer.content, max_patterns);
            Ok(json!({
                "patterns": extracted,
                "total_lines": buffer.total_lines,
                "source": buffer.source.as_str(),
            }))
        } else {
            Ok(json!({
                "content": buffer.content,
                "total_lines": buffer.total_lines,
                "source": buffer.source.as_str(),
            }))
        }
    }
}

struct ReadSlowLogFile;

#[async_trait]
impl ToolHandler for ReadSlowLogFile {
    async fn call(&self, _ctx: &ToolContext, args: &Map<String, Value>) -> DiagResult<Value> {
        let path = args
            .get("path")
            .and_then(Value::as_str)
            .ok_or_else(|| DiagError::BadArgs("path".into()))?;
        let tail_lines = args
            .get("tail_lines")
            .and_then(Value::as_i64)
            .unwrap_or(DEFAULT_TAIL_LINES as i64) as usize;
        let buffer = ingest::tail_local(path, tail_lines).await?;
        Ok(json!({
            "content": buffer.content,
            "total_lines": buffer.total_lines,
            "source": buffer.source.as_str(),
            "note": "tail of the slow query log file, not the full file",
        }))
    }
}

pub fn register(registry: &mut ToolRegistry) {
    registry.register(
        ToolSpec::new(
            "read_error_log",
            "Read the server error log (local file, or the managed-service API when a \
             service id is configured) and group it into severity-classified error \
             patterns with counts and time ranges. A local path always wins over the \
             remote service id.",
            vec![
                ParamSpec::nullable("path", ParamKind::String, "Local error-log path"),
                ParamSpec::nullable(
                    "service_id",
                    ParamKind::String,
                    "Managed-service id for remote fetch",
                ),
                ParamSpec::optional(
                    "tail_lines",
                    ParamKind::Integer,
                    "Lines to keep from the end",
                    json!(DEFAULT_TAIL_LINES),
                ),
                ParamSpec::optional(
                    "extract_patterns",
                    ParamKind::Boolean,
                    "Group lines into patterns instead of returning raw text",
                    json!(true),
                ),
                ParamSpec::optional(
                    "max_patterns",
                    ParamKind::Integer,
                    "Maximum patterns to return",
                    json!(DEFAULT_MAX_PATTERNS),
                ),
            ],
            ToolCaps::LOG,
        )
        .with_timeout(60),
        Arc::new(ReadErrorLog),
    );

    registry.register(
        ToolSpec::new(
            "read_slow_log_file",
            "Tail the slow query log file. Use only when log_output includes FILE; \
             table-based slow logs are read with execute_sql against mysql.slow_log.",
            vec![
                ParamSpec::required("path", ParamKind::String, "Slow-log file path"),
                ParamSpec::optional(
                    "tail_lines",
                    ParamKind::Integer,
                    "Lines to keep from the end",
                    json!(DEFAULT_TAIL_LINES),
                ),
            ],
            ToolCaps::LOG,
        ),
        Arc::new(ReadSlowLogFile),
    );
}
