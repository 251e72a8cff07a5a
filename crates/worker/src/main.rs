use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use sh_worker::api;
use sh_worker::bootstrap::{build_app_state, start_background};
use sh_worker::cli::{self, Cli, Command, ConfigCommand};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    match args.command {
        // Default to serve when no subcommand is given.
        None | Some(Command::Serve) => {
            init_tracing();
            let (config, source) = cli::load_config()?;
            tracing::info!(source = %source, "configuration loaded");
            run_server(Arc::new(config)).await
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let (config, source) = cli::load_config()?;
            if !cli::validate(&config, &source) {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let (config, _source) = cli::load_config()?;
            cli::show(&config);
            Ok(())
        }
        Some(Command::Version) => {
            println!("stagehand {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Structured JSON tracing for the serve path.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,sh_worker=debug")),
        )
        .json()
        .init();
}

async fn run_server(config: Arc<sh_domain::config::Config>) -> anyhow::Result<()> {
    tracing::info!("stagehand starting");

    let state = build_app_state(config.clone()).await?;

    // ── Background work (feed subscription, resume, pollers) ─────────
    let shutdown = CancellationToken::new();
    start_background(&state, shutdown.clone()).await?;

    // ── Router ───────────────────────────────────────────────────────
    let app = api::router()
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower::limit::ConcurrencyLimitLayer::new(
            config.server.max_concurrent_requests,
        ))
        .with_state(state.clone());

    // ── Bind & serve with graceful shutdown ──────────────────────────
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    tracing::info!(addr = %addr, "stagehand listening");

    let shutdown_signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let ctrl_c = tokio::signal::ctrl_c();
            tokio::select! {
                _ = ctrl_c => {},
                _ = shutdown_signal.cancelled() => {},
            }
        })
        .await
        .context("axum server error")?;

    // ── Drain: stop pollers, close runtimes, save checkpoints ────────
    tracing::info!("shutdown signal received");
    shutdown.cancel();
    state.orchestrator.shutdown().await;
    tracing::info!("stagehand stopped");
    Ok(())
}
