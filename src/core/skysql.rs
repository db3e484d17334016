//! Client for the managed-service observability and provisioning APIs.
//!
//! Authentication is a single `X-API-Key` header. Log downloads are capped
//! at 10 MiB total and transparently unpacked when the service hands back a
//! zip archive.

use std::io::Read;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::core::config::SkySqlConfig;
use crate::core::error::{DiagError, DiagResult};

pub const LOG_DOWNLOAD_CAP_BYTES: u64 = 10 * 1024 * 1024;
const HTTP_DEADLINE_SECS: u64 = 30;

#[derive(Debug, Deserialize)]
pub struct LogListing {
    #[serde(default)]
    pub logs: Vec<LogEntryMeta>,
}

#[derive(Debug, Deserialize)]
pub struct LogEntryMeta {
    pub id: String,
    #[serde(default)]
    pub size: u64,
    #[serde(rename = "downloadUrl", default)]
    pub download_url: Option<String>,
    #[serde(rename = "serverDataSourceId", default)]
    pub server_data_source_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ServiceDetails {
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub topology: Option<String>,
    #[serde(default)]
    pub replica_count: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricSample {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

#[derive(Debug, Deserialize)]
struct MetricResponse {
    #[serde(default)]
    samples: Vec<MetricSample>,
}

pub struct SkySqlClient {
    cfg: SkySqlConfig,
    http: reqwest::Client,
}

impl SkySqlClient {
    pub fn new(cfg: SkySqlConfig) -> DiagResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_DEADLINE_SECS))
            .build()?;
        Ok(Self { cfg, http })
    }

    fn map_status(status: StatusCode, body: &str) -> DiagError {
        match status {
            StatusCode::UNAUTHORIZED => DiagError::Unauthorized,
            StatusCode::FORBIDDEN => DiagError::Forbidden,
            _ => DiagError::Backend {
                code: status.as_u16().to_string(),
                message: body.chars().take(200).collect(),
            },
        }
    }

    async fn get(&self, url: &str, query: &[(&str, String)]) -> DiagResult<reqwest::Response> {
        let key = self.cfg.require_key()?;
        let resp = self
            .http
            .get(url)
            .header("X-API-Key", key)
            .query(query)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DiagError::Timeout(format!("GET {url}"))
                } else {
                    DiagError::Http(e)
                }
            })?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Self::map_status(status, &body));
        }
        Ok(resp)
    }

    /// List error-log entries for a service within a time range.
    pub async fn list_error_logs(
        &self,
        service_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DiagResult<Vec<LogEntryMeta>> {
        let url = format!("{}/observability/v2/logs", self.cfg.base_url);
        let resp = self
            .get(
                &url,
                &[
                    ("logType", "error-log".to_string()),
                    ("fromDate", from.to_rfc3339_opts(SecondsFormat::Secs, true)),
                    ("toDate", to.to_rfc3339_opts(SecondsFormat::Secs, true)),
                ],
            )
            .await?;
        let listing: LogListing = resp.json().await?;
        let entries: Vec<LogEntryMeta> = listing
            .logs
            .into_iter()
            .filter(|l| {
                l.server_data_source_id
                    .split('/')
                    .next()
                    .map(|id| id == service_id)
                    .unwrap_or(false)
            })
            .collect();
        debug!(service_id, count = entries.len(), "listed error logs");
        Ok(entries)
    }

    /// Download, size-check and concatenate every error-log entry in range.
    pub async fn download_error_log(
        &self,
        service_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DiagResult<String> {
        let entries = self.list_error_logs(service_id, from, to).await?;
        if entries.is_empty() {
            return Err(DiagError::NotConfigured(format!(
                "no error-log files available for service {service_id}"
            )));
        }
        let total: u64 = entries.iter().map(|e| e.size).sum();
        if total > LOG_DOWNLOAD_CAP_BYTES {
            return Err(DiagError::TooLarge {
                got: total,
                cap: LOG_DOWNLOAD_CAP_BYTES,
            });
        }

        let mut combined = String::new();
        let mut downloaded: u64 = 0;
        for entry in &entries {
            let Some(url) = entry.download_url.as_deref() else {
                warn!(id = %entry.id, "log entry without download url, skipping");
                continue;
            };
            let resp = self.get(url, &[]).await?;
            let bytes = resp.bytes().await?;
            downloaded += bytes.len() as u64;
            if downloaded > LOG_DOWNLOAD_CAP_BYTES {
                return Err(DiagError::TooLarge {
                    got: downloaded,
                    cap: LOG_DOWNLOAD_CAP_BYTES,
                });
            }
            combined.push_str(&unpack_log_payload(&bytes)?);
            if !combined.ends_with('\n') {
                combined.push('\n');
            }
        }
        Ok(combined)
    }

    /// Provisioning details: region, topology, replica count.
    pub async fn service_details(&self, service_id: &str) -> DiagResult<ServiceDetails> {
        let url = format!(
            "{}/provisioning/v1/services/{}",
            self.cfg.base_url, service_id
        );
        let resp = self.get(&url, &[]).await?;
        Ok(resp.json().await?)
    }

    /// Time-stamped samples for one metric (`cpu`, `disk_data`, `disk_logs`).
    pub async fn metric_samples(
        &self,
        service_id: &str,
        metric: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DiagResult<Vec<MetricSample>> {
        let url = format!(
            "{}/observability/v1/metrics/{}",
            self.cfg.base_url, service_id
        );
        let resp = self
            .get(
                &url,
                &[
                    ("metric", metric.to_string()),
                    ("from", from.to_rfc3339_opts(SecondsFormat::Secs, true)),
                    ("to", to.to_rfc3339_opts(SecondsFormat::Secs, true)),
                ],
            )
            .await?;
        let parsed: MetricResponse = resp.json().await?;
        Ok(parsed.samples)
    }

    /// Latest sample value for a metric, if any were returned.
    pub async fn latest_metric(
        &self,
        service_id: &str,
        metric: &str,
    ) -> DiagResult<Option<f64>> {
        let to = Utc::now();
        let from = to - chrono::Duration::minutes(15);
        let mut samples = self.metric_samples(service_id, metric, from, to).await?;
        samples.sort_by_key(|s| s.timestamp);
        Ok(samples.last().map(|s| s.value))
    }
}

/// Log payloads arrive either as plain text or as a zip archive of one or
/// more daily files. Concatenate archive members in name order.
fn unpack_log_payload(bytes: &[u8]) -> DiagResult<String> {
    if bytes.starts_with(b"PK\x03\x04") {
        let cursor = std::io::Cursor::new(bytes);
        let mut archive = zip::ZipArchive::new(cursor).map_err(|e| DiagError::Backend {
            code: "archive".into(),
            message: e.to_string(),
        })?;
        let mut names: Vec<String> = archive.file_names().map(str::to_string).collect();
        names.sort();
        let mut out = String::new();
        for name in names {
            let mut file = archive.by_name(&name).map_err(|e| DiagError::Backend {
                code: "archive".into(),
                message: e.to_string(),
            })?;
            let mut buf = String::new();
            file.read_to_string(&mut buf)
                .map_err(|e| DiagError::Io(e))?;
            out.push_str(&buf);
            if !out.ends_with('\n') {
                out.push('\n');
            }
        }
        Ok(out)
    } else {
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn plain_payloads_pass_through() {
        let out = unpack_log_payload(b"2025-01-01 [ERROR] boom\n").unwrap();
        assert_eq!(out, "2025-01-01 [ERROR] boom\n");
    }

    #[test]
    fn zip_payloads_are_unpacked_in_name_order() {
        let mut raw = Vec::new();
        {
            let mut writer = zip::ZipWriter::new(std::io::Cursor::new(&mut raw));
            let opts = zip::write::SimpleFileOptions::default();
            writer.start_file("b_second.log", opts).unwrap();
            writer.write_all(b"second\n").unwrap();
            writer.start_file("a_first.log", opts).unwrap();
            writer.write_all(b"first\n").unwrap();
            writer.finish().unwrap();
        }
        let out = unpack_log_payload(&raw).unwrap();
        assert_eq!(out, "first\nsecond\n");
    }

    #[test]
    fn status_mapping_matches_error_kinds() {
        assert_eq!(
            SkySqlClient::map_status(StatusCode::UNAUTHORIZED, "").kind(),
            "unauthorized"
        );
        assert_eq!(
            SkySqlClient::map_status(StatusCode::FORBIDDEN, "").kind(),
            "forbidden"
        );
        assert_eq!(
            SkySqlClient::map_status(StatusCode::BAD_GATEWAY, "upstream").kind(),
            "backend_error"
        );
    }
}
