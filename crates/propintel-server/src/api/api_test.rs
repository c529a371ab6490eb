use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use propintel_core::WeeklyTrigger;
use propintel_pipeline::{
    OrchestratorOptions, Reloader, RunHistory, ScrapeError, ScrapeStep, TriggerSource,
};
use propintel_scraper::ScrapeSummary;
use propintel_trainer::{ArtifactStore, TrainerOptions};
use tokio::sync::Notify;
use tower::ServiceExt;
use uuid::Uuid;

use super::*;
use crate::middleware::RateLimitState;

const TOKEN: &str = "test-token";

/// Scrape step that waits for the test to release it and then reports an
/// empty scrape, which fails the run at the scrape step.
struct GatedScrape {
    gate: Arc<Notify>,
}

impl ScrapeStep for GatedScrape {
    async fn scrape(&self, _run_id: Uuid) -> Result<ScrapeSummary, ScrapeError> {
        self.gate.notified().await;
        Ok(ScrapeSummary::default())
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    gate: Arc<Notify>,
    pipeline: Orchestrator<GatedScrape, DefaultTrainer>,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let artifacts = ArtifactStore::new(dir.path().join("models"));
        let gate = Arc::new(Notify::new());
        let pipeline = Orchestrator::new(
            GatedScrape {
                gate: Arc::clone(&gate),
            },
            DefaultTrainer::new(TrainerOptions::default()),
            artifacts.clone(),
            Arc::new(Reloader::new(artifacts, None)),
            OrchestratorOptions {
                data_dir: dir.path().join("raw"),
                min_scrape_records: 1,
                trigger: WeeklyTrigger::parse("SUN", "02:00", "UTC").expect("trigger"),
            },
            RunHistory::new(50),
        );
        Self {
            _dir: dir,
            gate,
            pipeline,
        }
    }

    fn app(&self) -> Router {
        self.app_with_limit(default_rate_limit_state())
    }

    fn app_with_limit(&self, rate_limit: RateLimitState) -> Router {
        let auth = AuthState::from_keys(TOKEN, false).expect("auth");
        build_app(
            AppState {
                pipeline: self.pipeline.clone(),
            },
            auth,
            rate_limit,
        )
    }

    async fn wait_until_idle(&self) {
        for _ in 0..500 {
            if self.pipeline.state().is_idle() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("pipeline never returned to idle");
    }
}

fn authed(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Bearer {TOKEN}"))
        .body(Body::empty())
        .expect("request")
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body bytes");
    serde_json::from_slice(&body).expect("json parse")
}

#[test]
fn normalize_limit_applies_defaults_and_bounds() {
    assert_eq!(normalize_limit(None), 20);
    assert_eq!(normalize_limit(Some(0)), 1);
    assert_eq!(normalize_limit(Some(1_000)), 50);
    assert_eq!(normalize_limit(Some(5)), 5);
}

#[test]
fn api_error_conflict_maps_to_409() {
    let response = ApiError::new("req-1", "conflict", "busy").into_response();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn health_is_public_and_reports_missing_model() {
    let fixture = Fixture::new();
    let response = fixture
        .app()
        .oneshot(
            Request::builder()
                .uri("/api/v1/health")
                .header("x-request-id", "req-health")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("x-request-id").map(|v| v.to_str().ok()),
        Some(Some("req-health"))
    );
    let json = json_body(response).await;
    assert_eq!(json["data"]["status"], "no_model");
    assert_eq!(json["data"]["pipeline"], "idle");
    assert!(json["data"]["live_generation"].is_null());
    assert_eq!(json["meta"]["request_id"], "req-health");
}

#[tokio::test]
async fn pipeline_routes_require_a_bearer_token() {
    let fixture = Fixture::new();
    let response = fixture
        .app()
        .oneshot(
            Request::builder()
                .uri("/api/v1/pipeline/status")
                .header("x-request-id", "req-anon")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let json = json_body(response).await;
    assert_eq!(json["error"]["code"], "unauthorized");
    assert_eq!(json["meta"]["request_id"], "req-anon");
    assert!(json["meta"]["timestamp"].is_string());

    let response = fixture
        .app()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/pipeline/runs")
                .header("authorization", "Bearer wrong")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(fixture.pipeline.state().is_idle());
}

#[tokio::test]
async fn status_reports_state_and_schedule() {
    let fixture = Fixture::new();
    let response = fixture
        .app()
        .oneshot(authed("GET", "/api/v1/pipeline/status"))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["data"]["state"]["state"], "idle");
    assert_eq!(json["data"]["cron_expression"], "0 0 2 * * SUN");
    assert_eq!(json["data"]["trigger_rule"], "Sun 02:00 UTC+00:00");
    assert!(json["data"]["next_fire_at"].is_string());
    assert!(json["data"]["last_run"].is_null());
}

#[tokio::test]
async fn manual_trigger_is_accepted_then_conflicts_while_running() {
    let fixture = Fixture::new();
    let app = fixture.app();

    let first = app
        .clone()
        .oneshot(authed("POST", "/api/v1/pipeline/runs"))
        .await
        .expect("response");
    assert_eq!(first.status(), StatusCode::ACCEPTED);
    let json = json_body(first).await;
    assert_eq!(json["data"]["outcome"], "started");
    let run_id = json["data"]["run_id"].as_str().expect("run id").to_string();

    let second = app
        .oneshot(authed("POST", "/api/v1/pipeline/runs"))
        .await
        .expect("response");
    assert_eq!(second.status(), StatusCode::CONFLICT);
    let json = json_body(second).await;
    assert_eq!(json["error"]["code"], "conflict");
    assert!(json["error"]["message"]
        .as_str()
        .expect("message")
        .contains(&run_id));

    fixture.gate.notify_one();
}

#[tokio::test]
async fn runs_lists_finished_runs_newest_first() {
    let fixture = Fixture::new();
    for _ in 0..2 {
        fixture.gate.notify_one();
        fixture
            .pipeline
            .run(TriggerSource::Manual)
            .await
            .expect("pipeline was idle");
    }

    let response = fixture
        .app()
        .oneshot(authed("GET", "/api/v1/pipeline/runs?limit=1"))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    let runs = json["data"].as_array().expect("data array");
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0]["status"], "failed");
    assert_eq!(runs[0]["failure"]["step"], "scrape");
    assert_eq!(runs[0]["source"], "manual");
}

#[tokio::test]
async fn rate_limited_requests_get_the_error_envelope() {
    let fixture = Fixture::new();
    let app = fixture.app_with_limit(RateLimitState::new(1, Duration::from_secs(60)));

    let first = app
        .clone()
        .oneshot(authed("GET", "/api/v1/pipeline/status"))
        .await
        .expect("response");
    assert_eq!(first.status(), StatusCode::OK);

    let mut second = authed("GET", "/api/v1/pipeline/status");
    second.headers_mut().insert(
        "x-request-id",
        axum::http::HeaderValue::from_static("req-burst"),
    );
    let response = app.oneshot(second).await.expect("response");
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let json = json_body(response).await;
    assert_eq!(json["error"]["code"], "rate_limited");
    assert_eq!(json["meta"]["request_id"], "req-burst");
}

#[tokio::test]
async fn retrain_is_accepted_and_recorded_without_a_scrape() {
    let fixture = Fixture::new();
    let app = fixture.app();

    let response = app
        .clone()
        .oneshot(authed("POST", "/api/v1/pipeline/retrain"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = json_body(response).await;
    assert_eq!(json["data"]["outcome"], "started");
    let run_id = json["data"]["run_id"].as_str().expect("run id").to_string();

    fixture.wait_until_idle().await;

    let response = app
        .oneshot(authed("GET", "/api/v1/pipeline/runs"))
        .await
        .expect("response");
    let json = json_body(response).await;
    let run = &json["data"][0];
    assert_eq!(run["run_id"], run_id.as_str());
    assert_eq!(run["kind"], "retrain");
    assert_eq!(run["steps"][0]["step"], "scrape");
    assert_eq!(run["steps"][0]["status"], "skipped");
    // No listings exist yet, so training has nothing to fit.
    assert_eq!(run["failure"]["step"], "train");
}

#[tokio::test]
async fn retrain_conflicts_with_a_running_refresh() {
    let fixture = Fixture::new();
    let app = fixture.app();

    let refresh = app
        .clone()
        .oneshot(authed("POST", "/api/v1/pipeline/runs"))
        .await
        .expect("response");
    assert_eq!(refresh.status(), StatusCode::ACCEPTED);

    let retrain = app
        .oneshot(authed("POST", "/api/v1/pipeline/retrain"))
        .await
        .expect("response");
    assert_eq!(retrain.status(), StatusCode::CONFLICT);
    let json = json_body(retrain).await;
    assert_eq!(json["error"]["code"], "conflict");

    fixture.gate.notify_one();
    fixture.wait_until_idle().await;
    assert_eq!(fixture.pipeline.history(10).await.len(), 1);
}
