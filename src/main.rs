use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Json, Router};
use clickhouse::Client;
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use brokle_core::config::WideConfig;
use brokle_core::schema;
use brokle_core::store::{ClickHouseStore, ColumnarStore};

/// The binary only demonstrates wiring the CORE against a real
/// `ColumnarStore` — schema migrations plus a liveness probe. Ingestion
/// HTTP/gRPC endpoints and auth middleware are out of scope; a real
/// deployment mounts the CORE's services behind its own transport layer.
#[derive(Clone)]
struct AppState {
    store: Arc<dyn ColumnarStore>,
}

async fn healthz(state: axum::extract::State<AppState>) -> Json<Value> {
    match state.store.health_check().await {
        Ok(elapsed) => Json(json!({ "status": "ok", "latency_ms": elapsed.as_millis() })),
        Err(err) => Json(json!({ "status": "degraded", "error": err.to_string() })),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("brokle_core=debug,tower_http=debug")
        }))
        .init();

    let clickhouse_url =
        std::env::var("CLICKHOUSE_URL").unwrap_or_else(|_| "http://localhost:8123".to_string());
    let clickhouse_db =
        std::env::var("CLICKHOUSE_DATABASE").unwrap_or_else(|_| "observability".to_string());
    let clickhouse_user =
        std::env::var("CLICKHOUSE_USER").unwrap_or_else(|_| "default".to_string());
    let clickhouse_password = std::env::var("CLICKHOUSE_PASSWORD").unwrap_or_default();

    let config_path = std::env::var("BROKLE_CONFIG").unwrap_or_else(|_| "./brokle.toml".to_string());
    let config = WideConfig::load(&config_path)?;

    schema::run(&clickhouse_url, &clickhouse_user, &clickhouse_password, &config).await?;

    let ch = Client::default()
        .with_url(&clickhouse_url)
        .with_database(&clickhouse_db)
        .with_user(&clickhouse_user)
        .with_password(&clickhouse_password);

    let state = AppState {
        store: Arc::new(ClickHouseStore::new(ch)),
    };

    let app = Router::new()
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], 8080));
    tracing::info!("brokle-core listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
