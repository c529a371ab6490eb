mod pipeline;

use axum::{
    extract::State,
    http::{header, HeaderName, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use propintel_pipeline::{Orchestrator, ScrapeStep};
use propintel_trainer::DefaultTrainer;
use serde::Serialize;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;

use crate::middleware::{
    enforce_rate_limit, request_id, require_bearer_auth, AuthState, RateLimitState, RequestId,
};

pub struct AppState<S> {
    pub pipeline: Orchestrator<S, DefaultTrainer>,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            pipeline: self.pipeline.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub data: T,
    pub meta: ResponseMeta,
}

#[derive(Debug, Serialize)]
pub struct ResponseMeta {
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: ErrorBody,
    pub meta: ResponseMeta,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

/// Liveness plus model freshness. Always `200`: a process that has not
/// published its first generation yet is still healthy.
#[derive(Debug, Serialize, PartialEq, Eq)]
struct HealthData {
    status: &'static str,
    pipeline: String,
    live_generation: Option<String>,
    model_created_at: Option<DateTime<Utc>>,
}

impl ResponseMeta {
    pub(super) fn new(request_id: String) -> Self {
        Self {
            request_id,
            timestamp: Utc::now(),
        }
    }
}

impl ApiError {
    pub fn new(
        request_id: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            error: ErrorBody {
                code: code.into(),
                message: message.into(),
            },
            meta: ResponseMeta::new(request_id.into()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = match self.error.code.as_str() {
            "not_found" => StatusCode::NOT_FOUND,
            "unauthorized" => StatusCode::UNAUTHORIZED,
            "bad_request" | "validation_error" => StatusCode::BAD_REQUEST,
            "conflict" => StatusCode::CONFLICT,
            "rate_limited" => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self)).into_response()
    }
}

/// Run history is capped at 50 entries, so larger limits are clamped.
pub(super) fn normalize_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(20).clamp(1, 50)
}

fn build_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("x-request-id"),
        ])
}

fn protected_router<S: ScrapeStep>(
    auth: AuthState,
    rate_limit: RateLimitState,
) -> Router<AppState<S>> {
    Router::new()
        .route("/api/v1/pipeline/status", get(pipeline::get_status::<S>))
        .route(
            "/api/v1/pipeline/runs",
            get(pipeline::list_runs::<S>).post(pipeline::trigger_run::<S>),
        )
        .route(
            "/api/v1/pipeline/retrain",
            post(pipeline::trigger_retrain::<S>),
        )
        .layer(
            ServiceBuilder::new()
                .layer(axum::middleware::from_fn_with_state(
                    rate_limit,
                    enforce_rate_limit,
                ))
                .layer(axum::middleware::from_fn_with_state(
                    auth,
                    require_bearer_auth,
                )),
        )
}

pub fn build_app<S: ScrapeStep>(
    state: AppState<S>,
    auth: AuthState,
    rate_limit: RateLimitState,
) -> Router {
    let public_routes = Router::new().route("/api/v1/health", get(health::<S>));

    Router::new()
        .merge(public_routes)
        .merge(protected_router(auth, rate_limit))
        .layer(
            ServiceBuilder::new()
                .layer(build_cors())
                .layer(axum::middleware::from_fn(request_id)),
        )
        .with_state(state)
}

async fn health<S: ScrapeStep>(
    State(state): State<AppState<S>>,
    Extension(req_id): Extension<RequestId>,
) -> impl IntoResponse {
    let live = state.pipeline.reloader().current();
    let data = HealthData {
        status: if live.is_some() { "ok" } else { "no_model" },
        pipeline: state.pipeline.state().to_string(),
        live_generation: live.as_ref().map(|g| g.id.clone()),
        model_created_at: live.as_ref().map(|g| g.created_at),
    };

    (
        StatusCode::OK,
        Json(ApiResponse {
            data,
            meta: ResponseMeta::new(req_id.0),
        }),
    )
}

pub fn default_rate_limit_state() -> RateLimitState {
    RateLimitState::new(120, Duration::from_secs(60))
}

#[cfg(test)]
#[path = "api_test.rs"]
mod tests;
