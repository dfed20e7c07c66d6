//! Warden HTTP server binary.
//!
//! Opens the configured store, runs migrations (Postgres), seeds the base
//! roles and the first administrator, then serves the API until Ctrl-C.

use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing::info;
use warden_api::config::ApiConfig;
use warden_core::auth::password::BcryptHasher;
use warden_core::rbac::bootstrap::{SeedConfig, seed};
use warden_core::store::RoleStore;
use warden_core::store::memory::MemoryStore;
use warden_core::store::postgres::{PostgresStore, migrate};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum StoreKind {
    /// Volatile, process-local. Data is lost on exit.
    Memory,
    Postgres,
}

/// CLI arguments for the server.
#[derive(Parser, Debug)]
#[command(name = "warden_server", about = "Warden user and role administration server")]
struct Args {
    /// Port to listen on on 127.0.0.1. Overrides `BIND_ADDR`.
    #[arg(long)]
    port: Option<u16>,

    /// PostgreSQL connection URL.
    #[arg(
        long,
        env = "DATABASE_URL",
        default_value = "postgres://localhost:5432/warden"
    )]
    database_url: String,

    /// Maximum number of database connections in the pool.
    #[arg(long, default_value_t = 5)]
    max_connections: u32,

    /// Storage backend.
    #[arg(long, value_enum, default_value_t = StoreKind::Postgres)]
    store: StoreKind,

    /// bcrypt work factor for new password hashes.
    #[arg(long, default_value_t = warden_core::auth::password::DEFAULT_BCRYPT_COST)]
    bcrypt_cost: u32,
}

async fn open_store(args: &Args) -> Result<Arc<dyn RoleStore>, Box<dyn std::error::Error>> {
    match args.store {
        StoreKind::Memory => {
            info!("using in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreKind::Postgres => {
            info!(
                max_connections = args.max_connections,
                "configuring connection pool"
            );
            let store = PostgresStore::connect(&args.database_url, args.max_connections).await?;
            info!("running database migrations");
            migrate(store.pool()).await?;
            Ok(Arc::new(store))
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,warden_api=debug,warden_core=debug")
            }),
        )
        .init();

    let args = Args::parse();
    info!(
        version = warden_core::version(),
        store = ?args.store,
        port = ?args.port,
        "starting warden_server"
    );

    let store = open_store(&args).await?;
    let hasher = Arc::new(BcryptHasher::with_cost(args.bcrypt_cost));

    let report = seed(store.as_ref(), hasher.as_ref(), &SeedConfig::from_env()).await?;
    if report.admin_created {
        info!("administrator account created; change its password after first login");
    }

    let mut config = ApiConfig::from_env();
    if let Some(port) = args.port {
        config.bind_addr = format!("127.0.0.1:{port}");
    }

    let state = warden_api::AppState::new(store, hasher, config.clone());
    let app = warden_api::router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %listener.local_addr()?, "REST API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;

    Ok(())
}
