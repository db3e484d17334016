use dbdoctor::{cli, logging};

#[tokio::main]
async fn main() {
    logging::init();
    let code = cli::run_main().await;
    std::process::exit(code);
}
