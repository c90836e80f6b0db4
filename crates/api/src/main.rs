//! Course Funnel API Server
//!
//! Serves the Razorpay webhook endpoint, lead capture, checkout order
//! creation, and health checks.

use std::net::SocketAddr;
use std::time::Duration;

use axum::http::{header, Method};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use funnel_api::{routes::create_router, AppState, Config};
use funnel_fulfillment::dedup::SHORT_WINDOW;
use funnel_fulfillment::{FulfillmentConfig, FulfillmentService};
use funnel_shared::{create_pool, run_migrations, DEFAULT_WINDOW};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,funnel_api=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Funnel API Server v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    let fulfillment_config = FulfillmentConfig::from_env()?;
    tracing::info!("Configuration loaded");

    tracing::info!("Connecting to database...");
    let pool = create_pool(&config.database_url).await?;
    tracing::info!("Database connection established");

    tracing::info!("Running database migrations...");
    run_migrations(&pool).await?;
    tracing::info!("Database migrations complete");

    let fulfillment = FulfillmentService::new(&fulfillment_config, pool.clone());
    let state = AppState::new(pool, config.clone(), fulfillment);

    // Periodic in-process cleanup: dedup window and rate-limit buckets.
    // The worker binary handles the durable store; these maps live here.
    let cleanup_state = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(15 * 60));
        interval.tick().await; // Maps are empty at startup
        loop {
            interval.tick().await;
            let evicted = cleanup_state
                .fulfillment
                .webhooks()
                .dedup_window()
                .cleanup()
                .await;
            cleanup_state.rate_limiter.cleanup(DEFAULT_WINDOW).await;
            tracing::info!(
                evicted = evicted,
                window_secs = SHORT_WINDOW.as_secs(),
                "In-memory window cleanup complete"
            );
        }
    });
    tracing::info!("Window cleanup task started");

    // CORS allowlist; defaults cover local development only
    let allowed_origins: Vec<axum::http::HeaderValue> = config
        .allowed_origins
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect();

    tracing::info!(
        allowed_origins = ?allowed_origins,
        "CORS configured with {} allowed origins",
        allowed_origins.len()
    );

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed_origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT, header::ORIGIN]);

    let app = create_router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = config.bind_address.parse()?;
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
