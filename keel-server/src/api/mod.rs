//! API Module
//!
//! HTTP API layer of the server.
//! Each submodule handles endpoints for a specific domain.

pub mod error;
pub mod health;
pub mod pipeline;
pub mod run;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Pipeline endpoints
        .route("/api/pipelines", get(pipeline::list_pipelines))
        .route("/api/pipelines/{name}", get(pipeline::get_pipeline))
        // Run endpoints
        .route("/api/runs", post(run::trigger_run).get(run::list_runs))
        .route("/api/runs/{id}", get(run::get_run))
        .route("/api/runs/{id}/steps", get(run::get_run_steps))
        .route("/api/runs/{id}/logs", get(run::get_run_logs))
        .route("/api/runs/{id}/cancel", post(run::cancel_run))
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use keel_core::domain::{PipelineRun, RunStatus, StepStatus};
    use keel_core::dto::pipeline::PipelineInfo;
    use keel_core::dto::run::{RunSteps, RunSummary};
    use keel_engine::config::EngineConfig;
    use keel_engine::{CredentialResolver, Engine, Notifier, StaticCredentialStore, Toolchain, store};
    use serde_json::{Value, json};
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;
    use uuid::Uuid;

    const DEPLOY: &str = r#"
        return pipeline.define {
            name = "petclinic",
            environments = {
                pipeline.environment("main", { name = "prod", namespace = "prod", manifest = "k8s/prod.yaml" }),
            },
            steps = {
                pipeline.step { name = "Build", uses = "shell", with = { command = "echo built ${branch}" } },
                pipeline.step { name = "Verify", uses = "shell", with = { command = "echo verified" } },
            },
        }
    "#;

    const SLOW: &str = r#"
        return pipeline.define {
            name = "slow",
            fallback = { name = "dev", namespace = "dev", manifest = "k8s/dev.yaml" },
            steps = {
                pipeline.step { name = "Wait", uses = "shell", with = { command = "sleep 30" } },
            },
        }
    "#;

    struct TestServer {
        app: Router,
        state: AppState,
        _dir: tempfile::TempDir,
    }

    async fn server() -> TestServer {
        let dir = tempfile::tempdir().unwrap();
        let pipelines = dir.path().join("pipelines");
        std::fs::create_dir(&pipelines).unwrap();
        write(&pipelines, "petclinic", DEPLOY);
        write(&pipelines, "slow", SLOW);
        write(&pipelines, "broken", "return pipeline.define { name = 'broken', steps = {} }");

        let mut config = EngineConfig::default();
        config.tools.workspace = dir.path().to_path_buf();

        let pool = store::create_pool("sqlite::memory:").await.unwrap();
        store::run_migrations(&pool).await.unwrap();

        let engine = Engine::new(
            config.clone(),
            Toolchain::cli(&config.tools),
            CredentialResolver::new(Arc::new(StaticCredentialStore::new())),
            Notifier::new(&config.notify),
            Some(pool.clone()),
        );

        let state = AppState::new(engine, pool, pipelines);
        TestServer {
            app: create_router(state.clone()),
            state,
            _dir: dir,
        }
    }

    fn write(dir: &Path, name: &str, source: &str) {
        std::fs::write(dir.join(format!("{}.lua", name)), source).unwrap();
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("Content-Type", "application/json")
            .body(match body {
                Some(body) => Body::from(body.to_string()),
                None => Body::empty(),
            })
            .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn trigger(app: &Router, pipeline: &str, branch: &str) -> (StatusCode, Value) {
        send(
            app,
            "POST",
            "/api/runs",
            Some(json!({ "pipeline": pipeline, "branch": branch })),
        )
        .await
    }

    async fn wait_for_terminal(app: &Router, id: Uuid) -> PipelineRun {
        for _ in 0..200 {
            let (status, body) = send(app, "GET", &format!("/api/runs/{}", id), None).await;
            assert_eq!(status, StatusCode::OK);
            let run: PipelineRun = serde_json::from_value(body).unwrap();
            if run.status.is_terminal() {
                return run;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("run {} did not finish", id);
    }

    #[tokio::test]
    async fn test_health() {
        let server = server().await;
        let (status, body) = send(&server.app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["active_runs"], 0);
    }

    #[tokio::test]
    async fn test_list_pipelines_reports_validation() {
        let server = server().await;
        let (status, body) = send(&server.app, "GET", "/api/pipelines", None).await;
        assert_eq!(status, StatusCode::OK);

        let pipelines: Vec<PipelineInfo> = serde_json::from_value(body).unwrap();
        let names: Vec<_> = pipelines.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["broken", "petclinic", "slow"]);
        assert!(pipelines[0].error.is_some());
        assert_eq!(pipelines[1].steps, vec!["Build", "Verify"]);
        assert!(pipelines[1].error.is_none());
    }

    #[tokio::test]
    async fn test_trigger_error_statuses() {
        let server = server().await;

        let (status, body) = trigger(&server.app, "missing", "main").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Pipeline missing not found");

        let (status, _) = trigger(&server.app, "broken", "main").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = trigger(&server.app, "petclinic", "feature/x").await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "No environment matches branch 'feature/x'");

        let (status, _) = send(&server.app, "GET", &format!("/api/runs/{}", Uuid::new_v4()), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_triggered_run_completes() {
        let server = server().await;

        let (status, body) = trigger(&server.app, "petclinic", "main").await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let pending: PipelineRun = serde_json::from_value(body).unwrap();
        assert_eq!(pending.status, RunStatus::Pending);
        assert_eq!(pending.environment, "prod");

        let run = wait_for_terminal(&server.app, pending.id).await;
        assert_eq!(run.status, RunStatus::Succeeded);

        let (_, body) = send(&server.app, "GET", &format!("/api/runs/{}/steps", run.id), None).await;
        let steps: RunSteps = serde_json::from_value(body).unwrap();
        assert_eq!(steps.steps.len(), 2);
        assert_eq!(steps.steps[0].outputs["stdout"], "built main");
        assert!(steps.steps.iter().all(|s| s.status == StepStatus::Succeeded));

        let (_, body) = send(&server.app, "GET", &format!("/api/runs/{}/logs", run.id), None).await;
        assert!(!body.as_array().unwrap().is_empty());

        let (_, body) = send(&server.app, "GET", "/api/runs?pipeline=petclinic", None).await;
        let runs: Vec<RunSummary> = serde_json::from_value(body).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].number, 1);

        let (status, _) = send(&server.app, "POST", &format!("/api/runs/{}/cancel", run.id), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_cancel_aborts_active_run() {
        let server = server().await;

        let (_, body) = trigger(&server.app, "slow", "develop").await;
        let pending: PipelineRun = serde_json::from_value(body).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let (status, _) = send(&server.app, "POST", &format!("/api/runs/{}/cancel", pending.id), None).await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let run = wait_for_terminal(&server.app, pending.id).await;
        assert_eq!(run.status, RunStatus::Aborted);
        assert_eq!(run.steps[0].status, StepStatus::Aborted);
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_aborted_runs_to_finalize() {
        let server = server().await;

        let (_, body) = trigger(&server.app, "slow", "develop").await;
        let pending: PipelineRun = serde_json::from_value(body).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(server.state.cancel_all(), 1);
        assert_eq!(server.state.drain(Duration::from_secs(10)).await, 0);
        assert_eq!(server.state.active_runs(), 0);

        let (status, body) = send(&server.app, "GET", &format!("/api/runs/{}", pending.id), None).await;
        assert_eq!(status, StatusCode::OK);
        let run: PipelineRun = serde_json::from_value(body).unwrap();
        assert_eq!(run.status, RunStatus::Aborted);
        assert!(run.completed_at.is_some());
    }
}
