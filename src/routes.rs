//! HTTP trigger for statement runs.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::dispatcher::StatementDispatcher;
use crate::error::DispatchError;

/// Shared state for the dispatch routes.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<StatementDispatcher>,
}

/// Build the router: `GET /send-statements` and `GET /health`.
pub fn dispatch_routes(dispatcher: Arc<StatementDispatcher>) -> Router {
    Router::new()
        .route("/send-statements", get(send_statements))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { dispatcher })
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "statement-dispatch"
    }))
}

/// GET /send-statements
///
/// The batch runs on its own task, so a caller that hangs up does not stop
/// it halfway. Per-file failures still yield 200; the counts show them.
/// `Accept: application/json` returns the full run summary instead of text.
async fn send_statements(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let dispatcher = Arc::clone(&state.dispatcher);
    let result = tokio::spawn(async move { dispatcher.run().await }).await;
    let json = wants_json(&headers);

    match result {
        Ok(Ok(summary)) if json => (StatusCode::OK, Json(summary)).into_response(),
        Ok(Ok(summary)) => (
            StatusCode::OK,
            format!("Statements processed. {}", summary.counts()),
        )
            .into_response(),
        Ok(Err(DispatchError::AlreadyRunning)) => {
            let message = "A statement run is already in progress.";
            if json {
                (
                    StatusCode::CONFLICT,
                    Json(serde_json::json!({ "error": message })),
                )
                    .into_response()
            } else {
                (StatusCode::CONFLICT, message).into_response()
            }
        }
        Ok(Err(DispatchError::Aborted { summary, source })) if json => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({
                "error": source.to_string(),
                "summary": summary,
            })),
        )
            .into_response(),
        Ok(Err(DispatchError::Aborted { summary, source })) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Statement run aborted: {source}. {}", summary.counts()),
        )
            .into_response(),
        Err(e) => {
            error!("Statement run task failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Statement run failed: {e}"),
            )
                .into_response()
        }
    }
}

fn wants_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("application/json"))
}
