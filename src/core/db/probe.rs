//! Round-robin replica discovery.
//!
//! A connection-level load balancer (MaxScale) routes each fresh session to
//! a different backend, so executing the same statement on fresh connections
//! reaches multiple replicas. Individual probe failures are logged and
//! skipped; results are deduplicated by replica identity.

use futures::TryStreamExt;
use serde_json::{Map, Value};
use sqlx::{Column, Connection, Row};
use tracing::debug;

use crate::core::config::MANAGED_HOST_SUFFIX;
use crate::core::error::{classify_sqlx, DiagError, DiagResult};

use super::{decode_row, DbGateway};

pub const PROBE_COUNT_DEFAULT: usize = 10;
pub const PROBE_COUNT_MAX: usize = 20;
/// The managed service tops out at this many replicas.
pub const MANAGED_MAX_REPLICAS: usize = 5;

#[derive(Debug, Clone, serde::Serialize)]
pub struct ProbeScan {
    pub replicas: Vec<Map<String, Value>>,
    pub unique_count: usize,
    pub executions: usize,
    pub primary_hits: usize,
    pub replica_hits: usize,
    pub failed_probes: usize,
    pub max_expected: usize,
    pub note: String,
}

/// Identity of a replica row: connection name if present, else source id,
/// else source host:port, else the row position within its probe.
fn replica_identity(row: &Map<String, Value>, position: usize) -> String {
    let lookup = |names: &[&str]| -> Option<String> {
        for name in names {
            if let Some(v) = row.iter().find_map(|(k, v)| {
                if k.eq_ignore_ascii_case(name) {
                    Some(v)
                } else {
                    None
                }
            }) {
                let s = match v {
                    Value::String(s) => s.clone(),
                    Value::Null => continue,
                    other => other.to_string(),
                };
                if !s.is_empty() {
                    return Some(s);
                }
            }
        }
        None
    };
    if let Some(name) = lookup(&["Connection_name"]) {
        return format!("conn:{name}");
    }
    if let Some(id) = lookup(&["Server_id", "Master_Server_Id", "Source_Server_Id"]) {
        return format!("source:{id}");
    }
    match (
        lookup(&["Master_Host", "Source_Host"]),
        lookup(&["Master_Port", "Source_Port"]),
    ) {
        (Some(h), Some(p)) => format!("host:{h}:{p}"),
        _ => format!("pos:{position}"),
    }
}

pub(super) async fn scan(
    gateway: &DbGateway,
    sql: &str,
    probe_count: usize,
    require_primary: bool,
) -> DiagResult<ProbeScan> {
    let probe_count = probe_count.clamp(1, PROBE_COUNT_MAX);
    let managed = gateway
        .config()
        .host
        .to_lowercase()
        .ends_with(MANAGED_HOST_SUFFIX);

    let mut seen: Vec<String> = Vec::new();
    let mut replicas: Vec<Map<String, Value>> = Vec::new();
    let mut primary_hits = 0usize;
    let mut replica_hits = 0usize;
    let mut failed = 0usize;
    let mut succeeded = 0usize;

    for attempt in 0..probe_count {
        match probe_once(gateway, sql, require_primary).await {
            Ok(ProbeOutcome::Skipped) => {
                replica_hits += 1;
                succeeded += 1;
            }
            Ok(ProbeOutcome::Rows { rows, on_primary }) => {
                succeeded += 1;
                if on_primary {
                    primary_hits += 1;
                } else {
                    replica_hits += 1;
                }
                for (position, row) in rows.into_iter().enumerate() {
                    let identity = replica_identity(&row, position);
                    if !seen.contains(&identity) {
                        seen.push(identity);
                        replicas.push(row);
                    }
                }
            }
            Err(e) => {
                // a single failed probe never aborts the scan
                debug!(attempt, "probe failed: {e}");
                failed += 1;
            }
        }
    }

    if succeeded == 0 {
        return Err(DiagError::ConnectionLost(format!(
            "all {probe_count} probes failed"
        )));
    }

    let mut note = format!(
        "Executed the probe statement {probe_count} times on fresh connections; \
         the load balancer routes each session non-deterministically, so the scan \
         is a sample, not a census. Found {} unique replica connection(s); \
         the managed service supports at most {MANAGED_MAX_REPLICAS} replicas.",
        replicas.len()
    );
    if managed && require_primary && primary_hits == succeeded && replicas.is_empty() {
        note.push_str(
            " Every probe landed on the primary with no replica rows; if replicas \
             exist this can indicate high replication lag steering reads away from them.",
        );
    } else if succeeded > 0 {
        note.push_str(&format!(
            " Routing: {primary_hits} primary hit(s), {replica_hits} replica hit(s), \
             {failed} failed probe(s)."
        ));
    }

    Ok(ProbeScan {
        unique_count: replicas.len(),
        replicas,
        executions: probe_count,
        primary_hits,
        replica_hits,
        failed_probes: failed,
        max_expected: MANAGED_MAX_REPLICAS,
        note,
    })
}

enum ProbeOutcome {
    /// Connected to a backend the caller is not interested in.
    Skipped,
    Rows {
        rows: Vec<Map<String, Value>>,
        on_primary: bool,
    },
}

async fn probe_once(
    gateway: &DbGateway,
    sql: &str,
    require_primary: bool,
) -> DiagResult<ProbeOutcome> {
    let mut conn = gateway.fresh_connection().await?;
    let outcome = probe_on(&mut conn, sql, require_primary).await;
    let _ = conn.close().await;
    outcome
}

async fn probe_on(
    conn: &mut sqlx::MySqlConnection,
    sql: &str,
    require_primary: bool,
) -> DiagResult<ProbeOutcome> {
    // autocommit makes every statement its own unit, which lets the proxy
    // route consecutive sessions independently
    sqlx::query("SET autocommit = 1")
        .execute(&mut *conn)
        .await
        .map_err(classify_sqlx)?;

    let (read_only, log_bin): (i64, i64) = sqlx::query_as("SELECT @@read_only, @@log_bin")
        .fetch_one(&mut *conn)
        .await
        .map_err(classify_sqlx)?;
    let on_primary = read_only == 0 && log_bin == 1;
    if require_primary && !on_primary {
        return Ok(ProbeOutcome::Skipped);
    }

    let mut stream = sqlx::query(sql).fetch(&mut *conn);
    let mut rows = Vec::new();
    while let Some(row) = stream.try_next().await.map_err(classify_sqlx)? {
        let columns: Vec<String> = row.columns().iter().map(|c| c.name().to_string()).collect();
        let cells = decode_row(&row);
        rows.push(columns.into_iter().zip(cells).collect());
    }
    Ok(ProbeOutcome::Rows { rows, on_primary })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn connection_name_wins_over_server_id() {
        let r = row(&[
            ("Connection_name", json!("dc2")),
            ("Server_id", json!(7)),
        ]);
        assert_eq!(replica_identity(&r, 0), "conn:dc2");
    }

    #[test]
    fn server_id_is_the_second_choice() {
        let r = row(&[("Server_id", json!(7)), ("Master_Host", json!("10.0.0.1"))]);
        assert_eq!(replica_identity(&r, 0), "source:7");
    }

    #[test]
    fn host_port_then_position_fall_back() {
        let r = row(&[
            ("Master_Host", json!("10.0.0.1")),
            ("Master_Port", json!(3306)),
        ]);
        assert_eq!(replica_identity(&r, 0), "host:10.0.0.1:3306");
        assert_eq!(replica_identity(&row(&[]), 3), "pos:3");
    }

    #[test]
    fn empty_connection_name_does_not_claim_identity() {
        let r = row(&[("Connection_name", json!("")), ("Server_id", json!(2))]);
        assert_eq!(replica_identity(&r, 0), "source:2");
    }
}
