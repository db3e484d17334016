pub mod agent;
pub mod config;
pub mod db;
pub mod error;
pub mod guardrails;
pub mod llm;
pub mod logs;
pub mod observability;
pub mod skysql;
pub mod tools;
