//! Command-line surface. One subcommand per workflow plus `ask` for the
//! free-form orchestrator entry point.
//!
//! Exit codes: 0 success (including partial-with-budget reports), 2
//! configuration error, 3 unrecoverable backend error.

use std::sync::Arc;

use console::style;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::agents;
use crate::core::agent::WorkflowRunner;
use crate::core::config::AppConfig;
use crate::core::db::DbGateway;
use crate::core::error::DiagError;
use crate::core::llm::openai::OpenAiProvider;
use crate::core::observability::ObservabilitySink;
use crate::core::tools::{self, ToolContext, ToolRegistry};
use crate::orchestrator::{Orchestrator, CHILD_DEADLINE_DEFAULT};

pub const EXIT_OK: i32 = 0;
pub const EXIT_CONFIG: i32 = 2;
pub const EXIT_BACKEND: i32 = 3;

fn print_help() {
    println!("{}", style("dbdoctor - read-only MariaDB diagnostics").bold());
    println!();
    println!("{}", style("Workflows").bold());
    println!("  slow-query          Analyze historical slow queries");
    println!("                        [--hours F] [--max-patterns N] [--slow-log-path P]");
    println!("  running-query       Analyze currently executing queries");
    println!("                        [--min-time-seconds F] [--include-sleeping] [--max-queries N]");
    println!("  incident-triage     Health snapshot and likely-cause triage");
    println!("                        [--error-log-path P] [--service-id S]");
    println!("                        [--max-error-patterns N] [--error-log-lines N]");
    println!("  replication-health  Probe replicas and assess replication");
    println!("                        [--probe-count N]");
    println!("  inspect <SQL>       Execute one read-only statement");
    println!("                        [--max-rows N] [--timeout-seconds N]");
    println!();
    println!("{}", style("Orchestrator").bold());
    println!("  ask <question>      Route a free-form question to workflows");
    println!();
    println!(
        " {} {} <command> [flags]",
        style("Usage:").bold(),
        style("dbdoctor").green()
    );
    println!();
    println!("Connection comes from DB_HOST, DB_PORT, DB_USER, DB_PASSWORD, DB_DATABASE;");
    println!("the reasoning service from OPENAI_API_KEY / OPENAI_MODEL; remote logs and");
    println!("metrics from SKYSQL_API_KEY / SKYSQL_SERVICE_ID (optional).");
}

struct Parsed {
    workflow: Option<&'static str>,
    params: Value,
    free_text: Option<String>,
}

fn take_value(args: &[String], i: &mut usize) -> Option<String> {
    if *i + 1 < args.len() {
        *i += 2;
        Some(args[*i - 1].clone())
    } else {
        *i += 1;
        None
    }
}

fn parse(args: &[String]) -> Result<Parsed, String> {
    let Some(command) = args.first() else {
        return Err(String::new());
    };
    let mut params = serde_json::Map::new();
    let mut positional: Vec<String> = Vec::new();
    let mut i = 1;

    let flag_key = |flag: &str| -> Option<(&'static str, bool)> {
        // (json key, is_flag_without_value)
        match flag {
            "--hours" => Some(("hours", false)),
            "--max-patterns" => Some(("max_patterns", false)),
            "--slow-log-path" => Some(("slow_log_path", false)),
            "--min-time-seconds" => Some(("min_time_seconds", false)),
            "--include-sleeping" => Some(("include_sleeping", true)),
            "--max-queries" => Some(("max_queries", false)),
            "--error-log-path" => Some(("error_log_path", false)),
            "--service-id" => Some(("service_id", false)),
            "--max-error-patterns" => Some(("max_error_patterns", false)),
            "--error-log-lines" => Some(("error_log_lines", false)),
            "--probe-count" => Some(("probe_count", false)),
            "--max-rows" => Some(("max_rows", false)),
            "--timeout-seconds" => Some(("timeout_seconds", false)),
            _ => None,
        }
    };

    while i < args.len() {
        let arg = &args[i];
        if let Some((key, is_flag)) = flag_key(arg) {
            if is_flag {
                params.insert(key.into(), json!(true));
                i += 1;
            } else {
                let value = take_value(args, &mut i)
                    .ok_or_else(|| format!("flag {arg} needs a value"))?;
                let float_keys = ["hours", "min_time_seconds"];
                let parsed: Value = value
                    .parse::<f64>()
                    .ok()
                    .map(|f| {
                        if float_keys.contains(&key) || f.fract() != 0.0 {
                            json!(f)
                        } else {
                            json!(f as i64)
                        }
                    })
                    .unwrap_or(json!(value));
                params.insert(key.into(), parsed);
            }
        } else if arg.starts_with("--") {
            return Err(format!("unknown flag {arg}"));
        } else {
            positional.push(arg.clone());
            i += 1;
        }
    }

    let free = if positional.is_empty() {
        None
    } else {
        Some(positional.join(" "))
    };

    let parsed = match command.as_str() {
        "slow-query" => Parsed {
            workflow: Some(agents::SLOW_QUERY),
            params: Value::Object(params),
            free_text: None,
        },
        "running-query" => Parsed {
            workflow: Some(agents::RUNNING_QUERY),
            params: Value::Object(params),
            free_text: None,
        },
        "incident-triage" => Parsed {
            workflow: Some(agents::INCIDENT_TRIAGE),
            params: Value::Object(params),
            free_text: None,
        },
        "replication-health" => Parsed {
            workflow: Some(agents::REPLICATION_HEALTH),
            params: Value::Object(params),
            free_text: None,
        },
        "inspect" => {
            let sql = free.ok_or_else(|| "inspect needs a SQL statement".to_string())?;
            params.insert("sql".into(), json!(sql));
            Parsed {
                workflow: Some(agents::INSPECTOR),
                params: Value::Object(params),
                free_text: None,
            }
        }
        "ask" => {
            let question = free.ok_or_else(|| "ask needs a question".to_string())?;
            Parsed {
                workflow: None,
                params: Value::Object(params),
                free_text: Some(question),
            }
        }
        other => return Err(format!("unknown command {other}")),
    };
    Ok(parsed)
}

fn build_orchestrator(config: AppConfig) -> Result<Orchestrator, DiagError> {
    let config = Arc::new(config);
    let gateway = Arc::new(DbGateway::connect(config.db.clone()));
    let llm = Arc::new(OpenAiProvider::new(&config.openai)?);
    let sink = Arc::new(ObservabilitySink::new());

    let mut registry = ToolRegistry::new();
    tools::db_tools::register(&mut registry);
    tools::log_tools::register(&mut registry);
    tools::perf_tools::register(&mut registry);
    tools::metrics_tools::register(&mut registry);

    let runner = WorkflowRunner {
        llm,
        tools: Arc::new(registry),
        tool_ctx: Arc::new(ToolContext {
            gateway,
            config: config.clone(),
        }),
        sink: sink.clone(),
    };
    Ok(Orchestrator {
        runner,
        workflows: agents::build_registry(),
        sink,
        child_deadline: CHILD_DEADLINE_DEFAULT,
    })
}

pub async fn run_main() -> i32 {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() || args[0] == "help" || args[0] == "--help" || args[0] == "-h" {
        print_help();
        return EXIT_OK;
    }

    let parsed = match parse(&args) {
        Ok(p) => p,
        Err(msg) => {
            if !msg.is_empty() {
                eprintln!("{} {msg}", style("error:").red().bold());
            }
            print_help();
            return EXIT_CONFIG;
        }
    };

    let config = match AppConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{} {e}", style("configuration error:").red().bold());
            return EXIT_CONFIG;
        }
    };
    let orchestrator = match build_orchestrator(config) {
        Ok(o) => o,
        Err(e) => {
            eprintln!("{} {e}", style("configuration error:").red().bold());
            return EXIT_CONFIG;
        }
    };

    // ctrl-c cancels the in-flight workflow and its current tool call
    let cancel = CancellationToken::new();
    let ctrlc_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n{}", style("cancelling...").yellow());
            ctrlc_cancel.cancel();
        }
    });

    let result = match (&parsed.workflow, &parsed.free_text) {
        (Some(name), _) => orchestrator.run_workflow(name, parsed.params, cancel).await,
        (None, Some(question)) => orchestrator.handle(question, cancel).await,
        _ => unreachable!("parser always yields a workflow or a question"),
    };

    match result {
        Ok(response) => {
            println!("{}", response.markdown);
            EXIT_OK
        }
        Err(e) => {
            eprintln!("{} {e}", style("error:").red().bold());
            match e {
                DiagError::NotConfigured(_) => EXIT_CONFIG,
                _ => EXIT_BACKEND,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn workflow_flags_map_to_params() {
        let p = parse(&argv(&["slow-query", "--hours", "3", "--max-patterns", "5"])).unwrap();
        assert_eq!(p.workflow, Some(agents::SLOW_QUERY));
        assert_eq!(p.params["hours"], json!(3.0));
        assert_eq!(p.params["max_patterns"], json!(5));
    }

    #[test]
    fn boolean_flags_need_no_value() {
        let p = parse(&argv(&["running-query", "--include-sleeping"])).unwrap();
        assert_eq!(p.params["include_sleeping"], json!(true));
    }

    #[test]
    fn inspect_collects_the_sql_positionally() {
        let p = parse(&argv(&["inspect", "SELECT", "1"])).unwrap();
        assert_eq!(p.workflow, Some(agents::INSPECTOR));
        assert_eq!(p.params["sql"], json!("SELECT 1"));
    }

    #[test]
    fn ask_collects_the_question() {
        let p = parse(&argv(&["ask", "why", "is", "it", "slow?"])).unwrap();
        assert!(p.workflow.is_none());
        assert_eq!(p.free_text.as_deref(), Some("why is it slow?"));
    }

    #[test]
    fn unknown_flags_and_commands_error() {
        assert!(parse(&argv(&["slow-query", "--bogus", "1"])).is_err());
        assert!(parse(&argv(&["dance"])).is_err());
        assert!(parse(&argv(&["inspect"])).is_err());
    }
}
