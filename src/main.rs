//! parrot — per-conversation Markov chain engine over a SQLite
//! message store, exposed as a small HTTP service.

use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use parrot::api::{self, AppState};
use parrot::engine::{Engine, EngineConfig};
use parrot::store::SqliteStore;

#[derive(Parser)]
#[command(name = "parrot", version, about = "Markov chain chat mimicry engine")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "4617", env = "PARROT_PORT")]
    port: u16,

    /// SQLite database path
    #[arg(short, long, default_value = "parrot.db", env = "PARROT_DB")]
    db: String,

    /// Markov chain order (prior tokens per state)
    #[arg(long, default_value = "2", env = "PARROT_ORDER",
          value_parser = clap::value_parser!(u8).range(1..=8))]
    order: u8,

    /// Concurrent store loads during warmup and load-all
    #[arg(long, default_value = "8", env = "PARROT_LOAD_CONCURRENCY",
          value_parser = clap::value_parser!(u16).range(1..))]
    load_concurrency: u16,

    /// Skip loading known conversations at startup
    #[arg(long, env = "PARROT_NO_WARMUP")]
    no_warmup: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();

    let store = Arc::new(SqliteStore::open(&args.db).expect("failed to open database"));
    let engine = Arc::new(Engine::new(
        EngineConfig {
            order: args.order as usize,
            load_concurrency: args.load_concurrency as usize,
        },
        store.clone(),
    ));

    // Explicit warmup instead of loading in the background: failures are
    // visible here, and the server starts with its models ready.
    if !args.no_warmup {
        let cancel = CancellationToken::new();
        match engine.load_all(&cancel).await {
            Ok(n) => info!(conversations = n, "warmup complete"),
            Err(e) => error!(error = %e, "warmup finished with errors"),
        }
    }

    let state = AppState {
        engine,
        store,
    };
    let app = api::router(state);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = args.port,
        db = %args.db,
        order = args.order,
        "parrot starting"
    );

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
    info!("shutting down");
}
