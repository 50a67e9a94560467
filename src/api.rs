//! Control Plane HTTP surface (spec §6 "any RPC style may be chosen").
//!
//! Route handler style follows `fourthplaces-mntogether`'s
//! `server/routes/health.rs` (`Extension<AppState>` + typed `Json<...>`
//! responses); router/middleware wiring follows `sblanchard-SerialAgent`'s
//! `main.rs` (`CorsLayer`, `TraceLayer`, `axum::serve`).

use std::sync::Arc;

use axum::extract::{Extension, Path, Query};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::control_plane::{ControlPlane, JobView, NewJob, WorkerStatusView};
use crate::error::TriggerError;
use crate::model::{JobExecutionLog, ScheduleType, ScheduledJob};

#[derive(Clone)]
pub struct AppState {
    pub control_plane: Arc<ControlPlane>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/jobs", get(list_jobs).post(create_job))
        .route("/jobs/:id/toggle", post(toggle_job))
        .route("/jobs/:id/run", post(run_job_now))
        .route("/jobs/:id", delete(delete_job))
        .route("/jobs/:id/logs", get(list_logs))
        .route("/workers", get(worker_status))
        .layer(Extension(state))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

impl IntoResponse for TriggerError {
    fn into_response(self) -> Response {
        let status = match &self {
            TriggerError::JobNotFound(_) | TriggerError::DispatchNotFound(_) => StatusCode::NOT_FOUND,
            TriggerError::InvalidInput(_) | TriggerError::Config(_) | TriggerError::ScriptNotFound(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            TriggerError::JobInactive(_) | TriggerError::ClaimConflict(_) => StatusCode::CONFLICT,
            TriggerError::Store(_) | TriggerError::Process(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Deserialize)]
struct ListJobsQuery {
    search: Option<String>,
}

async fn list_jobs(
    Extension(state): Extension<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> Result<Json<Vec<JobView>>, TriggerError> {
    let jobs = state.control_plane.list_jobs(query.search.as_deref()).await?;
    Ok(Json(jobs))
}

#[derive(Deserialize)]
struct CreateJobRequest {
    name: String,
    script_path: String,
    script_args: Option<String>,
    schedule_type: ScheduleType,
    #[serde(default)]
    interval_seconds: i64,
    #[serde(default = "default_schedule_time")]
    schedule_time: String,
    schedule_day: Option<i32>,
}

fn default_schedule_time() -> String {
    "00:00".to_string()
}

async fn create_job(
    Extension(state): Extension<AppState>,
    Json(req): Json<CreateJobRequest>,
) -> Result<Json<ScheduledJob>, TriggerError> {
    let job = state
        .control_plane
        .create_job(NewJob {
            name: req.name,
            script_path: req.script_path,
            script_args: req.script_args,
            schedule_type: req.schedule_type,
            interval_seconds: req.interval_seconds,
            schedule_time: req.schedule_time,
            schedule_day: req.schedule_day,
        })
        .await?;
    Ok(Json(job))
}

async fn toggle_job(
    Extension(state): Extension<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ScheduledJob>, TriggerError> {
    Ok(Json(state.control_plane.toggle_active(id).await?))
}

async fn run_job_now(
    Extension(state): Extension<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, TriggerError> {
    state.control_plane.run_now(id).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn delete_job(
    Extension(state): Extension<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, TriggerError> {
    state.control_plane.delete_job(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct ListLogsQuery {
    #[serde(default = "default_log_limit")]
    limit: i64,
}

fn default_log_limit() -> i64 {
    50
}

async fn list_logs(
    Extension(state): Extension<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<ListLogsQuery>,
) -> Result<Json<Vec<JobExecutionLog>>, TriggerError> {
    Ok(Json(state.control_plane.list_logs(id, query.limit).await?))
}

async fn worker_status(Extension(state): Extension<AppState>) -> Result<Json<WorkerStatusView>, TriggerError> {
    Ok(Json(state.control_plane.worker_status().await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_status_codes_match_taxonomy() {
        assert_eq!(
            TriggerError::JobNotFound(1).into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            TriggerError::InvalidInput("x".into()).into_response().status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            TriggerError::JobInactive(1).into_response().status(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn create_job_request_defaults_schedule_time_and_interval() {
        let req: CreateJobRequest = serde_json::from_str(
            r#"{"name":"n","script_path":"p.py","schedule_type":"manual"}"#,
        )
        .unwrap();
        assert_eq!(req.schedule_time, "00:00");
        assert_eq!(req.interval_seconds, 0);
    }
}
