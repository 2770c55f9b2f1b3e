mod config;

use clap::{Parser, Subcommand};
use config::{resolve_port, PairgateConfig};
use pairgate_channels::BridgeFactory;
use pairgate_gateway::{AuthConfig, GatewayServer};
use pairgate_session::{CredentialStore, SessionManager};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pairgate", about = "Pairgate: multi-session chat client gateway")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "pairgate.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway
    Serve {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on (overrides PORT and config)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Inspect stored sessions
    Sessions {
        #[command(subcommand)]
        action: SessionsAction,
    },
}

#[derive(Subcommand)]
enum SessionsAction {
    /// List sessions with credentials on disk
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let cli = Cli::parse();
    let config = PairgateConfig::load(&cli.config).await?;

    match cli.command {
        Commands::Serve { host, port } => serve(config, host, port).await,
        Commands::Sessions { action } => match action {
            SessionsAction::List => list_sessions(&config).await,
        },
    }
}

async fn serve(config: PairgateConfig, host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    let host = host.unwrap_or_else(|| config.server.host.clone());
    let port = resolve_port(port, std::env::var("PORT").ok().as_deref(), config.server.port)?;

    let credentials = CredentialStore::new(config.credentials_dir());
    tokio::fs::create_dir_all(credentials.root()).await?;

    info!(bridge = %config.bridge.url, "Using bridge transport");
    let factory = Arc::new(BridgeFactory::new(config.bridge.clone()));
    let manager = Arc::new(SessionManager::new(
        credentials,
        factory,
        config.sessions.session_config(),
    ));

    // Sessions must be back before the first request can reach them.
    let report = manager.restore_sessions().await;
    info!(
        restored = report.restored.len(),
        failed = report.failed.len(),
        "Restored sessions from disk"
    );

    if let Some(ttl) = config.sessions.disconnected_ttl() {
        spawn_pruner(manager.clone(), ttl, config.sessions.prune_interval());
    }

    let auth_config = AuthConfig::new(config.security.api_keys.clone());
    if auth_config.is_enabled() {
        info!(keys = config.security.api_keys.len(), "API key auth enabled");
    }
    let app = GatewayServer::build_with_auth(manager.clone(), auth_config);

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Pairgate gateway listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    manager.shutdown().await;
    info!("Pairgate stopped");
    Ok(())
}

async fn list_sessions(config: &PairgateConfig) -> anyhow::Result<()> {
    let store = CredentialStore::new(config.credentials_dir());
    let scan = store.scan().await?;

    if scan.sessions.is_empty() {
        println!("No stored sessions in {}", store.root().display());
    } else {
        println!("Stored sessions:");
        for id in &scan.sessions {
            println!("  {id}  {}", store.path_for(id).display());
        }
        println!("\nTotal: {} session(s)", scan.sessions.len());
    }
    for (name, reason) in &scan.skipped {
        println!("Skipped {name}: {reason}");
    }
    Ok(())
}

/// Periodically drop sessions that stayed disconnected for longer than `ttl`.
fn spawn_pruner(manager: Arc<SessionManager>, ttl: Duration, every: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let pruned = manager.prune_disconnected(ttl).await;
            for id in pruned {
                info!(session_id = %id, "Pruned disconnected session");
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Cannot listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
