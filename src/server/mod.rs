//! HTTP surface: router, middleware and the serve loop

pub mod error;
pub mod handlers;
pub mod state;

pub use error::{AppError, AppResult};
pub use state::AppState;

use crate::config::ServerConfig;
use axum::extract::DefaultBodyLimit;
use axum::http::HeaderName;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Build the application router with every middleware layer
///
/// Shared by the binary and the integration tests so both exercise the same
/// stack.
pub fn router(state: AppState, config: &ServerConfig) -> Router {
    let request_id_header = HeaderName::from_static(REQUEST_ID_HEADER);

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/rembg", post(handlers::remove_background))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(config.max_upload_bytes))
        .layer(middleware::map_response_with_state(
            config.max_upload_bytes,
            error::json_payload_too_large,
        ))
        .layer(CatchPanicLayer::custom(error::panic_response))
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
        .with_state(state)
}

/// Bind `config.bind_addr()` and serve until SIGINT or SIGTERM
///
/// # Errors
/// - The address cannot be bound
/// - The server loop fails
pub async fn serve(state: AppState, config: &ServerConfig) -> std::io::Result<()> {
    let addr = config.bind_addr();
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, max_upload_bytes = config.max_upload_bytes, "Listening");

    axum::serve(listener, router(state, config))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %err, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(err) => {
                tracing::warn!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received SIGINT, shutting down"),
        () = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
