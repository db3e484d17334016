//! Query-shape validation for the read-only gateway.

use crate::core::error::{DiagError, DiagResult};
use crate::core::guardrails::strip_leading_comments;

const READONLY_KEYWORDS: &[&str] = &["SELECT", "SHOW", "DESCRIBE", "DESC", "EXPLAIN"];

/// The first significant keyword (after whitespace and comments) must be one
/// of SELECT/SHOW/DESCRIBE/DESC/EXPLAIN. Everything else is refused before a
/// connection is ever borrowed.
pub fn ensure_readonly(sql: &str) -> DiagResult<()> {
    let significant = strip_leading_comments(sql);
    let first = significant
        .split(|c: char| c.is_whitespace() || c == '(')
        .find(|t| !t.is_empty())
        .unwrap_or("")
        .to_uppercase();
    if READONLY_KEYWORDS.contains(&first.as_str()) {
        Ok(())
    } else {
        let head: String = sql.trim().chars().take(80).collect();
        Err(DiagError::UnsafeQuery(head))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_every_readonly_shape() {
        for sql in [
            "SELECT 1",
            "  select * from t",
            "SHOW VARIABLES LIKE 'x'",
            "DESCRIBE mysql.slow_log",
            "desc t",
            "EXPLAIN FORMAT=JSON SELECT * FROM t",
            "-- comment\nSELECT 1",
            "/* leading */ SHOW STATUS",
            "(SELECT 1) UNION (SELECT 2)",
        ] {
            assert!(ensure_readonly(sql).is_ok(), "expected accept for {sql}");
        }
    }

    #[test]
    fn rejects_everything_else() {
        for sql in [
            "DELETE FROM users",
            "INSERT INTO t VALUES (1)",
            "UPDATE t SET a=1",
            "DROP TABLE t",
            "SET GLOBAL slow_query_log = ON",
            "CALL some_proc()",
            "USE mysql",
            "",
            "/* only a comment */",
        ] {
            let err = ensure_readonly(sql).unwrap_err();
            assert_eq!(err.kind(), "unsafe_query", "expected reject for {sql:?}");
        }
    }

    #[test]
    fn comment_hidden_writes_are_rejected() {
        assert!(ensure_readonly("-- SELECT\nDELETE FROM t").is_err());
    }
}
