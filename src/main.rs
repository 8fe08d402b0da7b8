use std::panic;
use std::sync::Arc;

use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use diagramsync::clock::SystemClock;
use diagramsync::config::Config;
use diagramsync::db::diagrams::DbDiagrams;
use diagramsync::routes::api::create_routes;
use diagramsync::server::persist::{DocumentRepository, MemoryRepository};
use diagramsync::server::room::RoomRegistry;

/// Cadence of the room maintenance pass (presence expiry, persistence
/// flushes, grace-period teardown).
const SWEEP_INTERVAL_MS: u64 = 1_000;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Set panic hook for better error messages
    panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
    }));

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            // Default to info level, but allow debug for our app
            "diagramsync=debug,tower_http=debug,axum::rejection=trace,info".into()
        }))
        .init();

    info!("Starting server...");

    // Load configuration
    let config = Config::load().unwrap_or_else(|e| {
        error!("Failed to load configuration: {}", e);
        warn!("Using default configuration");
        Config::default()
    });

    // Pick the durable-storage backend
    let repository: Arc<dyn DocumentRepository> = match &config.db_url {
        Some(db_url) => match DbDiagrams::new(db_url).await {
            Ok(db) => {
                info!("Database initialized successfully");
                Arc::new(db)
            }
            Err(e) => {
                error!("Failed to initialize database: {}", e);
                warn!("Falling back to in-memory storage - documents will not survive restarts");
                Arc::new(MemoryRepository::new())
            }
        },
        None => {
            warn!("No database URL configured - documents will not survive restarts");
            Arc::new(MemoryRepository::new())
        }
    };

    // Room registry plus its maintenance task
    let registry = Arc::new(RoomRegistry::new(
        &config,
        repository,
        Arc::new(SystemClock),
    ));
    let _sweeper = registry.clone().spawn_sweeper(SWEEP_INTERVAL_MS);

    let app_routes = create_routes(registry).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(config.server_address())
        .await
        .unwrap_or_else(|_| panic!("Failed to bind to {}", config.server_address()));

    info!("Server running on http://{}", config.server_address());
    info!("Collaboration endpoint at ws://{}/ws", config.server_address());

    axum::serve(listener, app_routes)
        .await
        .expect("Server failed to start");
}
