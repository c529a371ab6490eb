use axum::{
    extract::{Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::Utc;
use propintel_pipeline::{JobRunRecord, PipelineStatus, ScrapeStep, TriggerOutcome, TriggerSource};
use serde::Deserialize;

use crate::middleware::RequestId;

use super::{normalize_limit, ApiError, ApiResponse, AppState, ResponseMeta};

#[derive(Debug, Deserialize)]
pub(super) struct RunsQuery {
    pub limit: Option<usize>,
}

pub(super) async fn get_status<S: ScrapeStep>(
    State(state): State<AppState<S>>,
    Extension(req_id): Extension<RequestId>,
) -> Json<ApiResponse<PipelineStatus>> {
    Json(ApiResponse {
        data: state.pipeline.status(Utc::now()).await,
        meta: ResponseMeta::new(req_id.0),
    })
}

pub(super) async fn list_runs<S: ScrapeStep>(
    State(state): State<AppState<S>>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<RunsQuery>,
) -> Json<ApiResponse<Vec<JobRunRecord>>> {
    Json(ApiResponse {
        data: state.pipeline.history(normalize_limit(query.limit)).await,
        meta: ResponseMeta::new(req_id.0),
    })
}

/// Manual refresh. `202` when a run starts, `409` when one is already going.
pub(super) async fn trigger_run<S: ScrapeStep>(
    State(state): State<AppState<S>>,
    Extension(req_id): Extension<RequestId>,
) -> Result<(StatusCode, Json<ApiResponse<TriggerOutcome>>), ApiError> {
    accepted_or_conflict(req_id, state.pipeline.trigger(TriggerSource::Manual))
}

/// Retrain on the listings already on disk, without scraping. Same gate and
/// responses as a manual refresh.
pub(super) async fn trigger_retrain<S: ScrapeStep>(
    State(state): State<AppState<S>>,
    Extension(req_id): Extension<RequestId>,
) -> Result<(StatusCode, Json<ApiResponse<TriggerOutcome>>), ApiError> {
    accepted_or_conflict(req_id, state.pipeline.trigger_retrain(TriggerSource::Manual))
}

fn accepted_or_conflict(
    req_id: RequestId,
    outcome: TriggerOutcome,
) -> Result<(StatusCode, Json<ApiResponse<TriggerOutcome>>), ApiError> {
    match outcome {
        started @ TriggerOutcome::Started { .. } => Ok((
            StatusCode::ACCEPTED,
            Json(ApiResponse {
                data: started,
                meta: ResponseMeta::new(req_id.0),
            }),
        )),
        TriggerOutcome::Skipped {
            state: current,
            run_id,
        } => Err(ApiError::new(
            req_id.0,
            "conflict",
            match run_id {
                Some(id) => format!("run {id} is already in progress ({current})"),
                None => format!("a run is already in progress ({current})"),
            },
        )),
    }
}
