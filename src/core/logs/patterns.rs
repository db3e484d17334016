//! Error-log pattern extraction.
//!
//! Raw log lines are normalized (volatile tokens replaced with placeholders),
//! grouped by the normalized fingerprint, classified by severity and returned
//! as a capped ranked list so a whole log tail fits in a prompt.

use std::collections::HashMap;
use std::sync::OnceLock;

use chrono::NaiveDateTime;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_PATTERNS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Error,
    Warning,
    Info,
    Unknown,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Error => "ERROR",
            Severity::Warning => "WARNING",
            Severity::Info => "INFO",
            Severity::Unknown => "UNKNOWN",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPattern {
    /// Normalized line; doubles as the grouping fingerprint.
    pub pattern: String,
    pub count: u64,
    pub severity: Severity,
    pub first_seen: Option<String>,
    pub last_seen: Option<String>,
    /// Original text of the first line that produced this fingerprint.
    pub sample_message: String,
}

struct Normalizer {
    k8s_prefix: Regex,
    iso_ts: Regex,
    plain_ts: Regex,
    pid: Regex,
    conn_id: Regex,
    long_num: Regex,
    db_table: Regex,
    whitespace: Regex,
}

fn normalizer() -> &'static Normalizer {
    static N: OnceLock<Normalizer> = OnceLock::new();
    N.get_or_init(|| Normalizer {
        // container runtime preamble: ISO timestamp + stdout/stderr + flag
        k8s_prefix: Regex::new(
            r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}\.\d+Z\s+(stdout|stderr)\s+[A-Z]\s+",
        )
        .expect("k8s prefix regex"),
        iso_ts: Regex::new(r"\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(\.\d+)?Z?").expect("iso ts"),
        plain_ts: Regex::new(r"\d{4}-\d{2}-\d{2}\s+\d{1,2}:\d{2}:\d{2}").expect("plain ts"),
        pid: Regex::new(r"\[\d+\]").expect("pid"),
        conn_id: Regex::new(r"\((?:conn(?:ection)?[ _-]?(?:id)?|thd|thread)?\s*:?\s*\d+\)")
            .expect("conn id"),
        long_num: Regex::new(r"\b\d{4,}\b").expect("long num"),
        // schema.table only when the left side is a word that does not look
        // like a version component (no digits-only parts)
        db_table: Regex::new(r"`?([A-Za-z_][A-Za-z0-9_]*)`?\.`?([A-Za-z_][A-Za-z0-9_]*)`?")
            .expect("db table"),
        whitespace: Regex::new(r"\s+").expect("whitespace"),
    })
}

/// Apply the normalization pipeline to one line. The result is the
/// fingerprint used for grouping.
pub fn normalize_line(line: &str) -> String {
    let n = normalizer();
    let s = n.k8s_prefix.replace(line, "");
    let s = n.iso_ts.replace_all(&s, "<TS>");
    let s = n.plain_ts.replace_all(&s, "<TS>");
    let s = n.pid.replace_all(&s, "<PID>");
    let s = n.conn_id.replace_all(&s, "(<ID>)");
    let s = n.long_num.replace_all(&s, "<NUM>");
    let s = n.db_table.replace_all(&s, "<DB>.<TBL>");
    let s = n.whitespace.replace_all(&s, " ");
    s.trim().to_string()
}

fn classify(line: &str) -> Severity {
    let upper = line.to_uppercase();
    if upper.contains("[ERROR]") || upper.contains(" ERROR ") {
        Severity::Error
    } else if upper.contains("[WARNING]") || upper.contains("WARN") {
        Severity::Warning
    } else if upper.contains("[NOTE]") || upper.contains("[INFO]") {
        Severity::Info
    } else {
        Severity::Unknown
    }
}

fn parse_timestamp(line: &str) -> Option<String> {
    let n = normalizer();
    n.plain_ts
        .find(line)
        .or_else(|| n.iso_ts.find(line))
        .map(|m| m.as_str().to_string())
}

fn timestamp_sort_key(ts: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(ts, "%Y-%m-%d %H:%M:%S")
        .ok()
        .or_else(|| {
            chrono::DateTime::parse_from_rfc3339(ts)
                .map(|dt| dt.naive_utc())
                .ok()
        })
}

/// Extract up to `max_patterns` grouped patterns from raw log text.
///
/// Lines without a parseable timestamp inherit the most recent parsed
/// timestamp for `last_seen`; `first_seen` stays unset until one is seen.
pub fn extract(text: &str, max_patterns: usize) -> Vec<ErrorPattern> {
    let mut groups: HashMap<String, ErrorPattern> = HashMap::new();
    let mut order: Vec<String> = Vec::new();
    let mut carried_ts: Option<String> = None;

    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let parsed_ts = parse_timestamp(line);
        if parsed_ts.is_some() {
            carried_ts = parsed_ts.clone();
        }
        let fingerprint = normalize_line(line);
        let severity = classify(line);
        let entry = groups.entry(fingerprint.clone()).or_insert_with(|| {
            order.push(fingerprint.clone());
            ErrorPattern {
                pattern: fingerprint.clone(),
                count: 0,
                severity,
                first_seen: None,
                last_seen: None,
                sample_message: line.chars().take(200).collect(),
            }
        });
        entry.count += 1;
        if entry.severity > severity {
            // keep the most severe classification seen for the group
            entry.severity = severity;
        }
        if let Some(ts) = &parsed_ts {
            if entry.first_seen.is_none() {
                entry.first_seen = Some(ts.clone());
            }
            entry.last_seen = Some(ts.clone());
        } else if let Some(ts) = &carried_ts {
            entry.last_seen = Some(ts.clone());
        }
    }

    let mut patterns: Vec<ErrorPattern> = order
        .into_iter()
        .filter_map(|fp| groups.remove(&fp))
        .collect();
    patterns.sort_by(|a, b| {
        a.severity
            .cmp(&b.severity)
            .then_with(|| b.count.cmp(&a.count))
            .then_with(|| {
                let ka = a.last_seen.as_deref().and_then(timestamp_sort_key);
                let kb = b.last_seen.as_deref().and_then(timestamp_sort_key);
                kb.cmp(&ka)
            })
    });
    patterns.truncate(max_patterns);
    patterns
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_shapes_share_a_fingerprint() {
        let a = normalize_line("2025-12-17 20:41:25 [12] [ERROR] Table 'shop.orders' is full");
        let b = normalize_line("2025-12-18 03:02:11 [99] [ERROR] Table 'shop.orders' is full");
        assert_eq!(a, b);
        assert!(a.contains("<TS>"), "got: {a}");
    }

    #[test]
    fn container_prefix_is_stripped() {
        let fp = normalize_line(
            "2025-12-17T20:41:23.711701291Z stdout F 2025-12-17 20:41:23 0 [Note] Starting",
        );
        assert!(!fp.contains("stdout"), "got: {fp}");
    }

    #[test]
    fn version_strings_keep_their_digits() {
        let fp = normalize_line("[Note] Server version: 10.6.14-MariaDB");
        // short numeric runs survive; only 4+ digit runs become <NUM>
        assert!(fp.contains("10.6"), "got: {fp}");
    }

    #[test]
    fn schema_table_pairs_are_masked() {
        let fp = normalize_line("[ERROR] Cannot open table shop.orders for read");
        assert!(fp.contains("<DB>.<TBL>"), "got: {fp}");
    }

    #[test]
    fn severity_first_match_wins() {
        let out = extract("[ERROR] boom\n[Warning] careful\n[Note] fine\nplain line\n", 10);
        let sevs: Vec<Severity> = out.iter().map(|p| p.severity).collect();
        assert!(sevs.contains(&Severity::Error));
        assert!(sevs.contains(&Severity::Warning));
        assert!(sevs.contains(&Severity::Info));
        assert!(sevs.contains(&Severity::Unknown));
    }

    #[test]
    fn groups_count_and_keep_first_sample() {
        let log = "2025-01-01 10:00:00 [5] [ERROR] Disk full on /data\n\
                   2025-01-01 10:05:00 [7] [ERROR] Disk full on /data\n\
                   2025-01-01 10:06:00 [7] [Warning] Aborted connection (4242)\n";
        let out = extract(log, 10);
        let disk = out.iter().find(|p| p.pattern.contains("Disk full")).unwrap();
        assert_eq!(disk.count, 2);
        assert_eq!(disk.first_seen.as_deref(), Some("2025-01-01 10:00:00"));
        assert_eq!(disk.last_seen.as_deref(), Some("2025-01-01 10:05:00"));
        assert!(disk.sample_message.contains("10:00:00"));
    }

    #[test]
    fn errors_rank_above_more_frequent_warnings() {
        let log = "[Warning] w\n[Warning] w\n[Warning] w\n[ERROR] e\n";
        let out = extract(log, 10);
        assert_eq!(out[0].severity, Severity::Error);
    }

    #[test]
    fn cap_applies_to_the_returned_slice_only() {
        let mut log = String::new();
        for i in 0..50 {
            log.push_str(&format!("[ERROR] unique failure shape number-{i} occurred\n"));
        }
        let out = extract(&log, 5);
        assert_eq!(out.len(), 5);
    }

    #[test]
    fn extraction_is_deterministic() {
        let log = "[ERROR] a\n[ERROR] b\n[Warning] c\n[ERROR] a\n";
        let one = extract(log, 10);
        let two = extract(log, 10);
        let fp1: Vec<_> = one.iter().map(|p| (&p.pattern, p.count)).collect();
        let fp2: Vec<_> = two.iter().map(|p| (&p.pattern, p.count)).collect();
        assert_eq!(fp1, fp2);
    }

    #[test]
    fn timestampless_lines_carry_forward_last_seen() {
        let log = "2025-01-01 10:00:00 1 [ERROR] first\ncontinuation without timestamp\n";
        let out = extract(log, 10);
        let cont = out
            .iter()
            .find(|p| p.pattern.contains("continuation"))
            .unwrap();
        assert_eq!(cont.last_seen.as_deref(), Some("2025-01-01 10:00:00"));
        assert!(cont.first_seen.is_none());
    }
}
