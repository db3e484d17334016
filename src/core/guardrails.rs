//! Input and output guardrails for the tool runtime.
//!
//! The input check rejects SQL-like payloads that could mutate state before
//! they ever reach a connection. The output check redacts probable secrets
//! from agent-produced text, leaving documentation placeholders alone.

use std::sync::OnceLock;

use regex::Regex;

use crate::core::error::{DiagError, DiagResult};

const WRITE_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "TRUNCATE", "ALTER", "CREATE", "GRANT", "REVOKE",
    "REPLACE", "LOAD", "RENAME", "SET", "FLUSH", "KILL",
];

const READ_KEYWORDS: &[&str] = &["SELECT", "SHOW", "DESCRIBE", "DESC", "EXPLAIN", "WITH", "USE"];

fn comment_escape_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // comment-escape smuggling: inline comment immediately followed by a
    // statement keyword, or the classic quote-comment tail
    RE.get_or_init(|| {
        Regex::new(r#"(?i)(/\*!?\s*\d*\s*(insert|update|delete|drop|alter|create)\b)|('\s*--)|('\s*#)"#)
            .expect("comment escape regex")
    })
}

/// Strip leading whitespace and SQL comments (`--`, `#`, `/* */`) so the
/// first significant keyword can be inspected.
pub fn strip_leading_comments(sql: &str) -> &str {
    let mut rest = sql.trim_start();
    loop {
        if let Some(stripped) = rest.strip_prefix("--") {
            rest = stripped.split_once('\n').map(|(_, r)| r).unwrap_or("");
        } else if let Some(stripped) = rest.strip_prefix('#') {
            rest = stripped.split_once('\n').map(|(_, r)| r).unwrap_or("");
        } else if let Some(stripped) = rest.strip_prefix("/*") {
            rest = stripped.split_once("*/").map(|(_, r)| r).unwrap_or("");
        } else {
            return rest;
        }
        rest = rest.trim_start();
    }
}

/// Reject string inputs destined for a db-reading tool when they contain
/// write keywords in statement position, stacked statements, or comment
/// escapes. Bound parameters never pass through here.
pub fn check_input(text: &str) -> DiagResult<()> {
    let significant = strip_leading_comments(text);
    let first = significant
        .split_whitespace()
        .next()
        .unwrap_or("")
        .to_uppercase();
    if WRITE_KEYWORDS.contains(&first.as_str()) {
        // a payload that *is* a write statement is an unsafe query, the
        // same kind the gateway itself would refuse
        let head: String = significant.chars().take(80).collect();
        return Err(DiagError::UnsafeQuery(head));
    }
    let statement_shaped = READ_KEYWORDS.contains(&first.as_str());
    // a statement-shaped payload must be a single statement: anything after
    // a ';' separator is treated as stacking
    if statement_shaped {
        if let Some((_, tail)) = significant.split_once(';') {
            if !tail.trim().is_empty() {
                return Err(DiagError::InputBlocked("stacked statements".into()));
            }
        }
    } else {
        // free text: still refuse write keywords smuggled after a separator
        for stmt in significant.split(';').skip(1) {
            let head = stmt.split_whitespace().next().unwrap_or("").to_uppercase();
            if WRITE_KEYWORDS.contains(&head.as_str()) {
                return Err(DiagError::InputBlocked(format!(
                    "stacked statement with write keyword '{}'",
                    head
                )));
            }
        }
    }
    if comment_escape_re().is_match(significant) {
        return Err(DiagError::InputBlocked("comment escape pattern".into()));
    }
    Ok(())
}

fn password_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)(password|passwd|pwd)(\s*[:=]\s*)("?)([^\s"',;]+)"#)
            .expect("password regex")
    })
}

fn labeled_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // a key/secret/token label with a 40+ char base62 value on the same line
    RE.get_or_init(|| {
        Regex::new(r#"(?i)([a-z_\-]*(key|secret|token)[a-z_\-]*)(\s*[:=]\s*)("?)([A-Za-z0-9]{40,})"#)
            .expect("labeled token regex")
    })
}

/// A value that reads like documentation rather than a live credential.
fn is_placeholder(value: &str) -> bool {
    if value.len() < 16 {
        return true;
    }
    let lower = value.to_lowercase();
    lower.contains("your")
        || lower.contains("example")
        || lower.contains("placeholder")
        || lower.contains("xxx")
        || lower.contains("...")
        || (lower.starts_with('<') && lower.ends_with('>'))
}

/// Redact probable secrets in-place. Never blocks: an empty output from a
/// tool-call-only turn passes through untouched.
pub fn sanitize_output(text: &str) -> String {
    let redacted = password_re().replace_all(text, |caps: &regex::Captures<'_>| {
        let value = &caps[4];
        if is_placeholder(value) {
            caps[0].to_string()
        } else {
            format!("{}{}{}***", &caps[1], &caps[2], &caps[3])
        }
    });
    labeled_token_re()
        .replace_all(&redacted, |caps: &regex::Captures<'_>| {
            let value = &caps[5];
            if is_placeholder(value) {
                caps[0].to_string()
            } else {
                format!("{}{}{}***", &caps[1], &caps[3], &caps[4])
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_and_show_pass_input_check() {
        assert!(check_input("SELECT * FROM t WHERE id = 1").is_ok());
        assert!(check_input("  show variables like 'max_connections'").is_ok());
        assert!(check_input("/* hint */ EXPLAIN SELECT 1").is_ok());
    }

    #[test]
    fn write_keywords_in_statement_position_are_blocked() {
        for sql in [
            "DELETE FROM users",
            "drop table t",
            "  INSERT INTO t VALUES (1)",
            "TRUNCATE TABLE audit",
        ] {
            assert!(check_input(sql).is_err(), "expected block for {sql}");
        }
    }

    #[test]
    fn mentioning_write_words_mid_sentence_is_allowed() {
        // natural language advice is not a statement
        assert!(check_input("why does the update of statistics lag?").is_ok());
    }

    #[test]
    fn stacked_statements_are_blocked() {
        assert!(check_input("SELECT 1; DROP TABLE t").is_err());
        assert!(check_input("SELECT 1; DELETE FROM t WHERE 1=1").is_err());
        assert!(check_input("SELECT 1; SELECT 2").is_err());
    }

    #[test]
    fn trailing_semicolon_is_not_stacking() {
        assert!(check_input("SELECT 1;").is_ok());
        assert!(check_input("SHOW PROCESSLIST;  ").is_ok());
        // free text with a semicolon is not a statement
        assert!(check_input("check the processlist; then look at locks").is_ok());
    }

    #[test]
    fn comment_escape_smuggling_is_blocked() {
        assert!(check_input("SELECT 1 /*!50000 DROP TABLE t*/").is_err());
        assert!(check_input("SELECT * FROM t WHERE name = '' -- AND secret").is_err());
    }

    #[test]
    fn real_passwords_are_redacted() {
        let out = sanitize_output("connection string: password=s3cr3tS3cr3tS3cr3t99");
        assert!(out.contains("password=***"), "got: {out}");
        assert!(!out.contains("s3cr3t"));
    }

    #[test]
    fn placeholder_passwords_survive() {
        let out = sanitize_output("set DB_PASSWORD=your-password-here in .env");
        assert!(out.contains("your-password-here"));
        let out = sanitize_output("password: <redacted-for-docs-here>");
        assert!(out.contains("<redacted-for-docs-here>"));
        // short values are treated as examples
        let out = sanitize_output("password=hunter2");
        assert!(out.contains("hunter2"));
    }

    #[test]
    fn labeled_long_tokens_are_redacted() {
        let raw = format!("api_key={} (from the secret store)", "8f3c9e2a".repeat(6));
        let out = sanitize_output(&raw);
        assert!(out.contains("api_key=***"), "got: {out}");
    }

    #[test]
    fn unlabeled_long_runs_are_left_alone() {
        // a bare hash with no key/secret label nearby is not a credential
        let raw = format!("commit {}", "a1b2c3d4".repeat(5));
        assert_eq!(sanitize_output(&raw), raw);
    }

    #[test]
    fn empty_output_passes_through() {
        assert_eq!(sanitize_output(""), "");
    }
}
