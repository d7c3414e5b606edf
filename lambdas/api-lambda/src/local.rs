//! Plain HTTP listener for running the API outside Lambda.
//!
//! Every request is converted into a Lambda HTTP request and routed through
//! the same handler the Lambda runtime uses.

use crate::http_handler;
use axum::{
    body::{to_bytes, Body as AxumBody},
    extract::{Request as AxumRequest, State},
    http::StatusCode,
    response::{IntoResponse, Response as AxumResponse},
    Router,
};
use lambda_http::{Body, Error, Request, RequestExt};
use movie_master_shared::AppState;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;

const MAX_BODY_BYTES: usize = 1024 * 1024;

pub(crate) async fn serve(state: Arc<AppState>, port: u16) -> Result<(), Error> {
    let app = Router::new().fallback(forward).with_state(state);

    let address = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&address).await?;
    tracing::info!("Movie Master server running on {}", address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shut down");
    Ok(())
}

async fn forward(State(state): State<Arc<AppState>>, request: AxumRequest) -> AxumResponse {
    let (parts, body) = request.into_parts();

    let bytes = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!("Rejected request body: {}", e);
            return (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large").into_response();
        }
    };

    let query: HashMap<String, String> = parts
        .uri
        .query()
        .and_then(|q| serde_urlencoded::from_str(q).ok())
        .unwrap_or_default();

    let body = if bytes.is_empty() {
        Body::Empty
    } else {
        Body::Binary(bytes.to_vec())
    };
    let event = Request::from_parts(parts, body).with_query_string_parameters(query);

    match http_handler::function_handler(event, state).await {
        Ok(response) => {
            let (parts, body) = response.into_parts();
            AxumResponse::from_parts(parts, AxumBody::from(body.to_vec()))
        }
        Err(e) => {
            tracing::error!("Handler failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        tracing::info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                tracing::info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
