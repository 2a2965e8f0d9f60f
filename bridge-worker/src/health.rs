use axum::{http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde_json::json;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Simple health check endpoint
///
/// Returns 200 OK while the process is up. In the future, this will check:
/// - bus connectivity
/// - LM Studio daemon reachability
///
/// Returns 503 if any critical component is down
async fn health() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "bridge-worker",
        })),
    )
}

/// Start the health check HTTP server
///
/// # Errors
///
/// Returns an error if the server fails to bind to the specified address
pub async fn start_health_server(shutdown_token: CancellationToken) -> anyhow::Result<()> {
    let app = Router::new().route("/health", get(health));

    let addr = SocketAddr::from((
        [0, 0, 0, 0],
        std::env::var("PORT").map_or(Ok(8001), |p| p.parse())?,
    ));
    let listener = TcpListener::bind(addr).await?;
    info!("Health check server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_token.cancelled().await;
        })
        .await?;

    Ok(())
}
