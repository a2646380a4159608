use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use super::api::{
    api_rate_limit, cancel_batch, get_batch, get_sms_logs, get_status, health_check, list_batches,
    not_found, progress_stream, root, send_sms, AppState,
};

/// Build the application router. Every /api route passes the per-client
/// API limiter; the SMS limiter is applied on admission.
pub fn router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/api/health", get(health_check))
        .route("/api/status", get(get_status))
        .route("/api/send-sms", post(send_sms))
        .route("/api/sms-logs", get(get_sms_logs))
        .route("/api/batches", get(list_batches))
        .route("/api/batches/:id", get(get_batch))
        .route("/api/batches/:id/cancel", post(cancel_batch))
        .route("/api/progress", get(progress_stream))
        .route_layer(middleware::from_fn_with_state(state.clone(), api_rate_limit));

    Router::new()
        .route("/", get(root))
        .merge(api_routes)
        .fallback(not_found)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

/// Serve the API until `shutdown_rx` flips to true
pub async fn run_server(
    state: AppState,
    listen: &str,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<(), std::io::Error> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(listen).await?;
    tracing::info!("Web server listening on {}", listen);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = shutdown_rx.wait_for(|&v| v).await;
        tracing::info!("Web server shutting down gracefully");
    })
    .await
}
