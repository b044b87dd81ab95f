//! Thin binary entrypoint: parse CLI flags, install logging, hand off to
//! `pitrack::run`.

use clap::Parser;

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = pitrack::config::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pitrack=info".into()),
        )
        .init();

    match pitrack::run(cli).await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("fatal: {err:#}");
            std::process::ExitCode::FAILURE
        }
    }
}
