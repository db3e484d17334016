//! Deterministic intent routing. The same request text always routes the
//! same way; anything without a confident match becomes a clarifying
//! question instead of defaulting to the heaviest workflow.

use crate::agents::{INCIDENT_TRIAGE, INSPECTOR, REPLICATION_HEALTH, RUNNING_QUERY, SLOW_QUERY};
use crate::core::db::validate;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Run one workflow directly.
    Direct(&'static str),
    /// Run triage, then maybe chain one more workflow on its findings.
    TriageThenChain,
    /// No confident match; ask instead of guessing.
    Clarify,
}

const SLOW_QUERY_TRIGGERS: &[&str] = &[
    "slow queries",
    "slow query",
    "slow log",
    "query performance",
    "optimization",
    "optimize",
];

const RUNNING_QUERY_TRIGGERS: &[&str] = &[
    "running queries",
    "running query",
    "active queries",
    "currently",
    "blocking",
    "who's running",
    "whos running",
    "long-running",
];

const REPLICATION_TRIGGERS: &[&str] = &[
    "replication",
    "replica lag",
    "replica",
    "master/slave",
    "master-slave",
];

const INSPECTOR_TRIGGERS: &[&str] = &[
    "execute sql",
    "run sql",
    "information_schema",
    "performance_schema",
    "show variable",
];

const TRIAGE_TRIGGERS: &[&str] = &[
    "health",
    "something is wrong",
    "something's wrong",
    "somethings wrong",
    "incident",
    "triage",
    "why is it slow",
    "why is the database slow",
    "is everything ok",
];

fn matches_any(input: &str, triggers: &[&str]) -> bool {
    triggers.iter().any(|t| input.contains(t))
}

pub fn route(request: &str) -> Route {
    let input = request.trim().to_lowercase();

    // explicit SQL goes straight to the inspector
    if validate::ensure_readonly(request).is_ok() && !request.trim().is_empty() {
        return Route::Direct(INSPECTOR);
    }
    if matches_any(&input, INSPECTOR_TRIGGERS) {
        return Route::Direct(INSPECTOR);
    }
    if matches_any(&input, SLOW_QUERY_TRIGGERS) {
        return Route::Direct(SLOW_QUERY);
    }
    if matches_any(&input, RUNNING_QUERY_TRIGGERS) {
        return Route::Direct(RUNNING_QUERY);
    }
    if matches_any(&input, REPLICATION_TRIGGERS) {
        return Route::Direct(REPLICATION_HEALTH);
    }
    if matches_any(&input, TRIAGE_TRIGGERS) {
        return Route::TriageThenChain;
    }
    Route::Clarify
}

/// Which workflow a triage cause category chains into.
pub fn chain_for_category(category: &str) -> Option<&'static str> {
    match category {
        "query-performance" => Some(SLOW_QUERY),
        "lock-contention" => Some(RUNNING_QUERY),
        "replication" => Some(REPLICATION_HEALTH),
        _ => None,
    }
}

pub const CLARIFYING_QUESTION: &str = "\
I can help with several kinds of database diagnosis, but I'm not sure which \
one you need. I can:

- analyze **slow queries** (historical performance and tuning),
- analyze **running queries** (what is executing or blocking right now),
- check **replication health** (replica lag, broken replication),
- run an **incident triage** (overall health check when something seems wrong),
- **execute a read-only SQL statement** and explain the result.

What would you like to look at?";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_table_routes_each_family() {
        assert_eq!(route("analyze slow queries from the last hour"), Route::Direct(SLOW_QUERY));
        assert_eq!(route("what is currently blocking?"), Route::Direct(RUNNING_QUERY));
        assert_eq!(route("replication is lagging"), Route::Direct(REPLICATION_HEALTH));
        assert_eq!(route("check information_schema.processlist"), Route::Direct(INSPECTOR));
        assert_eq!(route("why is it slow?"), Route::TriageThenChain);
        assert_eq!(route("something's wrong with the database"), Route::TriageThenChain);
    }

    #[test]
    fn explicit_sql_routes_to_the_inspector() {
        assert_eq!(route("SELECT * FROM mysql.slow_log LIMIT 5"), Route::Direct(INSPECTOR));
        assert_eq!(route("SHOW GLOBAL STATUS"), Route::Direct(INSPECTOR));
    }

    #[test]
    fn unmatched_requests_ask_for_clarification() {
        assert_eq!(route("tell me a joke"), Route::Clarify);
        assert_eq!(route(""), Route::Clarify);
    }

    #[test]
    fn routing_is_deterministic() {
        for _ in 0..3 {
            assert_eq!(route("why is it slow?"), Route::TriageThenChain);
        }
    }

    #[test]
    fn chain_map_covers_the_three_categories() {
        assert_eq!(chain_for_category("query-performance"), Some(SLOW_QUERY));
        assert_eq!(chain_for_category("lock-contention"), Some(RUNNING_QUERY));
        assert_eq!(chain_for_category("replication"), Some(REPLICATION_HEALTH));
        assert_eq!(chain_for_category("cosmic-rays"), None);
    }
}
