//! Log ingestion: local file tail or remote observability download.
//!
//! A supplied local path always wins over the remote service id.

use std::path::Path;

use tracing::info;

use crate::core::config::SkySqlConfig;
use crate::core::error::{DiagError, DiagResult};
use crate::core::skysql::SkySqlClient;

pub const DEFAULT_TAIL_LINES: usize = 5_000;
const READ_DEADLINE_SECS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSource {
    LocalFile,
    RemoteApi,
}

impl LogSource {
    pub fn as_str(self) -> &'static str {
        match self {
            LogSource::LocalFile => "local_file",
            LogSource::RemoteApi => "skysql_api",
        }
    }
}

#[derive(Debug)]
pub struct LogBuffer {
    pub content: String,
    pub total_lines: usize,
    pub source: LogSource,
}

/// Return the last `max_lines` lines of a local log file.
pub async fn tail_local(path: &str, max_lines: usize) -> DiagResult<LogBuffer> {
    let read = tokio::time::timeout(
        std::time::Duration::from_secs(READ_DEADLINE_SECS),
        tokio::fs::read_to_string(Path::new(path)),
    )
    .await
    .map_err(|_| DiagError::Timeout(format!("reading {path}")))?;

    let raw = match read {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(DiagError::FileNotFound(path.to_string()))
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(DiagError::PermissionDenied(path.to_string()))
        }
        Err(e) => return Err(e.into()),
    };

    let lines: Vec<&str> = raw.lines().collect();
    let start = lines.len().saturating_sub(max_lines);
    let tail = &lines[start..];
    info!(path, kept = tail.len(), total = lines.len(), "tailed local log");
    Ok(LogBuffer {
        content: tail.join("\n"),
        total_lines: tail.len(),
        source: LogSource::LocalFile,
    })
}

/// Fetch error-log content for a service over the observability API.
/// Returns the concatenated, decompressed log text for the time range.
pub async fn fetch_remote(
    skysql: &SkySqlConfig,
    service_id: &str,
    from: chrono::DateTime<chrono::Utc>,
    to: chrono::DateTime<chrono::Utc>,
    max_lines: usize,
) -> DiagResult<LogBuffer> {
    let client = SkySqlClient::new(skysql.clone())?;
    let content = client.download_error_log(service_id, from, to).await?;
    let lines: Vec<&str> = content
        .lines()
        .filter(|l| !is_ignorable_remote_line(l))
        .collect();
    let start = lines.len().saturating_sub(max_lines);
    let tail = &lines[start..];
    Ok(LogBuffer {
        content: tail.join("\n"),
        total_lines: tail.len(),
        source: LogSource::RemoteApi,
    })
}

/// Housekeeping warnings the managed service emits constantly; they drown
/// out real signal when grouped.
fn is_ignorable_remote_line(line: &str) -> bool {
    line.contains("[Warning] Aborted connection")
        || line.contains("[Warning] Access denied for user")
}

/// Resolve the preferred source: an explicit local path wins, then the
/// remote service id, then nothing.
pub async fn load(
    skysql: &SkySqlConfig,
    path: Option<&str>,
    service_id: Option<&str>,
    max_lines: usize,
) -> DiagResult<LogBuffer> {
    if let Some(path) = path {
        return tail_local(path, max_lines).await;
    }
    let service_id = service_id
        .map(str::to_string)
        .or_else(|| skysql.service_id.clone())
        .ok_or_else(|| {
            DiagError::NotConfigured(
                "no error-log source: provide a path or set SKYSQL_SERVICE_ID".into(),
            )
        })?;
    let to = chrono::Utc::now();
    let from = to - chrono::Duration::hours(24);
    fetch_remote(skysql, &service_id, from, to, max_lines).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn tail_returns_last_n_lines() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        for i in 0..100 {
            writeln!(f, "line {i}").unwrap();
        }
        let buf = tail_local(f.path().to_str().unwrap(), 10).await.unwrap();
        assert_eq!(buf.total_lines, 10);
        assert!(buf.content.starts_with("line 90"));
        assert!(buf.content.ends_with("line 99"));
        assert_eq!(buf.source, LogSource::LocalFile);
    }

    #[tokio::test]
    async fn short_files_come_back_whole() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "only line").unwrap();
        let buf = tail_local(f.path().to_str().unwrap(), 5_000).await.unwrap();
        assert_eq!(buf.total_lines, 1);
    }

    #[tokio::test]
    async fn missing_file_maps_to_file_not_found() {
        let err = tail_local("/nonexistent/error.log", 10).await.unwrap_err();
        assert_eq!(err.kind(), "file_not_found");
    }

    #[tokio::test]
    async fn no_source_is_a_configuration_error() {
        let cfg = SkySqlConfig::default();
        let err = load(&cfg, None, None, 10).await.unwrap_err();
        assert_eq!(err.kind(), "not_configured");
    }

    #[test]
    fn remote_noise_lines_are_ignorable() {
        assert!(is_ignorable_remote_line(
            "2025-01-01 10:00:00 [Warning] Aborted connection 55 to db"
        ));
        assert!(!is_ignorable_remote_line("2025-01-01 10:00:00 [ERROR] oom"));
    }
}
