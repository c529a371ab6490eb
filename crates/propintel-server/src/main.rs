mod api;
mod middleware;
mod scheduler;

use std::sync::Arc;

use propintel_pipeline::{
    read_recent_runs, Orchestrator, OrchestratorOptions, Reloader, RunHistory, ScrapeJob,
};
use propintel_scraper::IncrementalStore;
use propintel_trainer::{ArtifactStore, DefaultTrainer, TrainerOptions};
use tracing_subscriber::EnvFilter;

use crate::{
    api::{build_app, default_rate_limit_state, AppState},
    middleware::AuthState,
};

const RUN_LOG_FILE: &str = "runs.jsonl";
const HISTORY_LIMIT: usize = 50;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Arc::new(propintel_core::load_app_config()?);
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let artifacts = ArtifactStore::new(&config.model_dir);
    let initial = match artifacts.load_live() {
        Ok(Some(generation)) => {
            tracing::info!(
                generation = %generation.id,
                created_at = %generation.created_at,
                rows = generation.dataset.len(),
                "startup: loaded live generation"
            );
            Some(Arc::new(generation))
        }
        Ok(None) => {
            tracing::warn!(
                model_dir = %config.model_dir.display(),
                "startup: no live generation yet; the first successful run will publish one"
            );
            None
        }
        Err(e) => {
            tracing::error!(error = %e, "startup: live generation could not be loaded");
            None
        }
    };
    let reloader = Arc::new(Reloader::new(artifacts.clone(), initial));

    let runs_path = config.log_dir.join(RUN_LOG_FILE);
    let mut history = RunHistory::new(HISTORY_LIMIT);
    history.seed(read_recent_runs(&runs_path, HISTORY_LIMIT));
    let history = history.with_log(IncrementalStore::open(&runs_path).await?);

    let trainer = DefaultTrainer::new(TrainerOptions {
        min_rows: config.trainer_min_rows,
        min_location_count: config.trainer_min_location_count,
        min_validation_r2: config.trainer_min_validation_r2,
        ..TrainerOptions::default()
    });
    let pipeline = Orchestrator::new(
        ScrapeJob::from_config(&config)?,
        trainer,
        artifacts,
        reloader,
        OrchestratorOptions {
            data_dir: config.data_dir.clone(),
            min_scrape_records: config.pipeline_min_scrape_records,
            trigger: config.trigger,
        },
        history,
    );

    let _scheduler = scheduler::build_scheduler(pipeline.clone()).await?;

    let auth = AuthState::from_env(matches!(
        config.env,
        propintel_core::Environment::Development
    ))?;
    let app = build_app(AppState { pipeline }, auth, default_rate_limit_state());

    tracing::info!(bind_addr = %config.bind_addr, env = %config.env, "startup: listening");
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl-c");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("received shutdown signal, starting graceful shutdown");
}
