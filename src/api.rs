//! HTTP API: synchronous classification plus liveness routes.

use std::any::Any;
use std::sync::Arc;

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::classify::ClassificationGateway;
use crate::error::ClassifyError;

/// Returned for every failure that is not the caller's fault.
pub const INTERNAL_ERROR_DETAIL: &str = "An internal error occurred during classification";

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<ClassificationGateway>,
    pub app_name: String,
}

#[derive(Debug, Deserialize)]
pub struct ClassifyRequest {
    pub email_text: String,
}

/// Build the Axum router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/api/v1/classify", post(classify))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CatchPanicLayer::custom(handle_panic))
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

async fn root(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "message": format!("{} is running.", state.app_name) }))
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "healthy" }))
}

/// POST /api/v1/classify
///
/// `{"email_text": "..."}` → `{"sequence", "labels", "scores"}`.
async fn classify(
    State(state): State<AppState>,
    payload: Result<Json<ClassifyRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => return detail(StatusCode::BAD_REQUEST, rejection.body_text()),
    };

    match state.gateway.classify(&request.email_text).await {
        Ok(result) => Json(result).into_response(),
        Err(e @ ClassifyError::EmptyInput) => detail(StatusCode::BAD_REQUEST, e.to_string()),
        Err(e) => {
            error!(backend = %state.gateway.backend_name(), error = %e, "Classification failed");
            detail(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_DETAIL)
        }
    }
}

fn detail(status: StatusCode, detail: impl Into<String>) -> Response {
    (status, Json(json!({ "detail": detail.into() }))).into_response()
}

fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let message = crate::pipeline::orchestrator::panic_message(&*panic);
    error!(panic = %message, "Request handler panicked");
    detail(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_DETAIL)
}
