use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use rg_gateway::api;
use rg_gateway::bootstrap::build_state;
use rg_gateway::cli::{config_cmd, load_config, Cli, Command, ConfigCommand};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // Default to serve when no subcommand is given.
        None | Some(Command::Serve) => {
            init_tracing();
            let config = load_config(&cli.config)?;
            run_server(Arc::new(config)).await
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let config = load_config(&cli.config)?;
            if !config_cmd::validate(&config) {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let config = load_config(&cli.config)?;
            config_cmd::show(&config);
            Ok(())
        }
        Some(Command::Version) => {
            println!("rungate {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Structured JSON tracing for the `serve` command.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,rg_gateway=debug,rg_engine=debug")),
        )
        .json()
        .init();
}

async fn run_server(config: Arc<rg_domain::config::Config>) -> anyhow::Result<()> {
    tracing::info!("RunGate starting");

    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            rg_domain::config::ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            rg_domain::config::ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues
        .iter()
        .any(|i| i.severity == rg_domain::config::ConfigSeverity::Error)
    {
        anyhow::bail!("config validation failed");
    }

    let state = build_state(config.clone())?;

    let app = api::router(state.clone())
        .layer(tower_http::timeout::TimeoutLayer::new(
            std::time::Duration::from_secs(config.server.request_timeout_secs.max(1)),
        ))
        .layer(axum::extract::DefaultBodyLimit::max(
            config.server.max_body_bytes,
        ))
        .with_state(state.clone());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "listening");

    state.ready.store(true, Ordering::Release);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("RunGate stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install ctrl-c handler");
        // Without a signal handler the future must still park, otherwise
        // the server would shut down immediately.
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
