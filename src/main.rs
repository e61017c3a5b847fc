use axum::{Extension, Router};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

mod db;
mod error;
mod geocode_client;
mod handlers;
mod middleware;
mod models;
mod openai_client;
mod repositories;
mod security;
mod utils;

// AppState holds the database pool, the outbound API clients, and the JWT
// service; everything else is constructed per request from the pool.
pub struct AppState {
    pub db_pool: sqlx::PgPool,
    pub openai_client: openai_client::OpenAiClient,
    pub mapbox_client: geocode_client::MapboxClient,
    pub jwt_service: security::JwtService,
}

#[tokio::main]
async fn main() {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    init_logging().expect("Failed to initialize logging");

    // Create the database connection pool (runs migrations on startup)
    let db_pool = db::create_pool()
        .await
        .expect("Failed to create database pool.");

    let openai_client = openai_client::OpenAiClient::from_env();
    if openai_client.is_configured() {
        tracing::info!("OpenAI client configured");
    } else {
        tracing::warn!("OPENAI_API_KEY not found. Chat and document analysis will fail closed.");
    }

    let mapbox_client = geocode_client::MapboxClient::from_env();
    if mapbox_client.is_configured() {
        tracing::info!("Mapbox geocoding client configured");
    } else {
        tracing::warn!("MAPBOX_API_KEY not found. Geocoding requests will be rejected.");
    }

    let jwt_service = security::JwtService::from_env();

    let shared_state = Arc::new(AppState {
        db_pool,
        openai_client,
        mapbox_client,
        jwt_service,
    });

    // Build our application with all routes and shared state
    let app = Router::new()
        .merge(handlers::auth::auth_routes())
        .merge(handlers::chat::chat_routes())
        .merge(handlers::upload::upload_routes())
        .merge(handlers::profile::profile_routes())
        .merge(handlers::dashboard::dashboard_routes())
        .merge(handlers::geocode::geocode_routes())
        .merge(handlers::settings::settings_routes())
        .layer(axum::middleware::from_fn(
            middleware::auth::identity_middleware,
        ))
        .layer(axum::middleware::from_fn(
            middleware::logging::request_logging_middleware,
        ))
        .layer(CorsLayer::permissive())
        .layer(Extension(shared_state));

    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("Failed to bind server address");
    tracing::info!("listening on {}", listener.local_addr().expect("local addr"));
    axum::serve(listener, app)
        .await
        .expect("Server error");
}

// Logging configuration: human-readable in development, JSON when
// LOG_FORMAT=json for log aggregation.
fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            "debug,travel_planner=trace,sqlx=info,reqwest=info,hyper=info,tower=info".to_string()
        } else {
            "info,travel_planner=info,sqlx=warn,reqwest=warn,hyper=warn,tower=warn".to_string()
        }
    });

    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&log_level))?;

    let fmt_layer = if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    tracing::info!("Travel planner starting up...");
    tracing::info!("Version: {}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        "Build mode: {}",
        if cfg!(debug_assertions) {
            "development"
        } else {
            "production"
        }
    );

    let db_configured = std::env::var("DATABASE_URL").is_ok();
    let openai_configured = std::env::var("OPENAI_API_KEY").is_ok();
    let mapbox_configured = std::env::var("MAPBOX_API_KEY").is_ok();
    tracing::info!(
        "Configuration - Database: {}, OpenAI: {}, Mapbox: {}",
        db_configured,
        openai_configured,
        mapbox_configured
    );

    Ok(())
}
