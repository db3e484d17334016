use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `RUST_LOG` wins; default keeps our own
/// crate at info and everything else at warn.
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("dbdoctor=info,sqlx=warn,warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
