//! Managed-service observability snapshot: CPU and disk metrics that are not
//! reachable over SQL, with threshold-based warnings.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::core::error::{DiagError, DiagResult};
use crate::core::skysql::SkySqlClient;

use super::{ParamKind, ParamSpec, ToolCaps, ToolContext, ToolHandler, ToolRegistry, ToolSpec};

struct GetObservabilitySnapshot;

#[async_trait]
impl ToolHandler for GetObservabilitySnapshot {
    async fn call(&self, ctx: &ToolContext, args: &Map<String, Value>) -> DiagResult<Value> {
        let skysql = &ctx.config.skysql;
        let service_id = args
            .get("service_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| skysql.service_id.clone())
            .ok_or_else(|| {
                DiagError::NotConfigured(
                    "no service id: pass service_id or set SKYSQL_SERVICE_ID".into(),
                )
            })?;
        skysql.require_key()?;

        let client = SkySqlClient::new(skysql.clone())?;
        let cpu = client.latest_metric(&service_id, "cpu").await?;
        let disk_data = client.latest_metric(&service_id, "disk_data").await?;
        let disk_logs = client.latest_metric(&service_id, "disk_logs").await?;

        let mut warnings = Vec::new();
        if let Some(cpu_pct) = cpu {
            // raw values below 1.5 are ratios, everything else is a percent
            let pct = if cpu_pct <= 1.5 { cpu_pct * 100.0 } else { cpu_pct };
            if pct >= 95.0 {
                warnings.push(format!("CRITICAL: CPU saturation suspected: ~{pct:.1}%"));
            } else if pct >= 85.0 {
                warnings.push(format!("WARN: CPU high: ~{pct:.1}%"));
            }
        }
        for (purpose, value) in [("data", disk_data), ("logs", disk_logs)] {
            if let Some(pct) = value {
                if pct >= 95.0 {
                    warnings.push(format!(
                        "CRITICAL: {purpose} volume nearly full: {pct:.2}% used"
                    ));
                } else if pct >= 90.0 {
                    warnings.push(format!("SEVERE: {purpose} volume high: {pct:.2}% used"));
                } else if pct >= 80.0 {
                    warnings.push(format!("WARN: {purpose} volume elevated: {pct:.2}% used"));
                }
            }
        }

        let details = client.service_details(&service_id).await.ok();
        Ok(json!({
            "available": true,
            "snapshot": {
                "cpu_pct": cpu,
                "disk_data_pct": disk_data,
                "disk_logs_pct": disk_logs,
            },
            "service": details.map(|d| json!({
                "region": d.region,
                "topology": d.topology,
                "replica_count": d.replica_count,
            })),
            "warnings": warnings,
            "source": "skysql_observability_api",
        }))
    }
}

pub fn register(registry: &mut ToolRegistry) {
    registry.register(
        ToolSpec::new(
            "get_observability_snapshot",
            "CPU percentage and data/log volume utilization from the managed-service \
             observability API, with threshold warnings. Requires SKYSQL_API_KEY; \
             inert without it.",
            vec![ParamSpec::nullable(
                "service_id",
                ParamKind::String,
                "Managed-service id; defaults to SKYSQL_SERVICE_ID",
            )],
            ToolCaps::LOG,
        )
        .with_timeout(60),
        Arc::new(GetObservabilitySnapshot),
    );
}
