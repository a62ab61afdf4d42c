//! ChatHub Server - realtime chat hub
//!
//! This server handles:
//! - User registration and recovery-code login
//! - Direct and group messaging with delivery and read receipts
//! - Presence, typing, reactions, pins, and blocks
//! - A single JSON state document mirrored to disk

use std::sync::Arc;

use axum::{routing::get, Router};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chathub_server::config::Config;
use chathub_server::handlers;
use chathub_server::store::Store;
use chathub_server::websocket::SessionRegistry;
use chathub_server::AppState;

/// ChatHub Server CLI
#[derive(Parser)]
#[command(name = "chathub-server")]
#[command(about = "Realtime chat hub server")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file path
    #[arg(short, long, default_value = "chathub.toml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered users from the state document
    ListUsers,

    /// Run the server
    Run,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "chathub_server=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let config = Config::load(&cli.config).await?;
    let config = Arc::new(config);

    match cli.command.unwrap_or(Commands::Run) {
        Commands::ListUsers => {
            list_users(&config).await?;
        }
        Commands::Run => {
            run_server(config).await?;
        }
    }

    Ok(())
}

async fn list_users(config: &Config) -> anyhow::Result<()> {
    let store = Store::open(&config.storage.state_path).await?;
    let state = store.lock().await;

    println!("=== Registered Users ===");
    for user in state.users.values() {
        println!(
            "ID: {} | Username: {} | Online: {} | Deleted: {}",
            user.id, user.username, user.is_online, user.is_deleted
        );
    }

    Ok(())
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("Starting ChatHub Server v{}", env!("CARGO_PKG_VERSION"));

    let store = Arc::new(Store::open(&config.storage.state_path).await?);
    let registry = Arc::new(SessionRegistry::new());

    let state = AppState {
        config: config.clone(),
        store,
        registry,
    };

    // Build routes; anything unmatched is a 404
    let app = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/ws", get(handlers::websocket::websocket_handler))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!("Listening on {}", addr);

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
