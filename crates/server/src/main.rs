use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use warden_server::config::AppConfig;
use warden_server::state::AppState;

/// Warden LLM policy gateway HTTP server.
#[derive(Parser, Debug)]
#[command(name = "warden-server", about = "Standalone HTTP server for the Warden LLM policy gateway")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "gateway.toml")]
    config: PathBuf,

    /// Override the bind host.
    #[arg(long)]
    host: Option<String>,

    /// Override the bind port.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config)?;

    let telemetry_guard = warden_server::telemetry::init(&config.telemetry);

    let shutdown_timeout_seconds = config.server.shutdown_timeout_seconds;
    let host = cli.host.unwrap_or_else(|| config.server.host.clone());
    let port = cli.port.unwrap_or(config.server.port);

    let state = AppState::build(config).await?;
    let app = warden_server::api::router(state);

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(address = %addr, "warden-server listening");

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    // Leave a short window for in-flight audit writes to land before the
    // process exits; the pipeline itself does not hold a handle we can
    // join on, so this is a fixed grace sleep rather than a real drain.
    tokio::time::sleep(std::time::Duration::from_millis(
        shutdown_timeout_seconds.min(5).saturating_mul(1000),
    ))
    .await;

    info!("warden-server shut down");
    telemetry_guard.shutdown();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("received SIGINT"); }
        () = terminate => { info!("received SIGTERM"); }
    }
}
