//! Job management handlers.
//!
//! Submission goes through the coalescer; reads come straight from the
//! registry. A job belonging to another owner is indistinguishable
//! from a missing one, so both answer 404.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;
use validator::Validate;

use genflow_models::{GenerationRequest, Job, JobId, JobKind, JobStatus};

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Body of a job submission.
#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    pub kind: JobKind,
    #[serde(flatten)]
    pub params: GenerationRequest,
}

/// Submission acknowledgement.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitJobResponse {
    pub job_id: String,
    pub status: JobStatus,
    /// True when this call joined existing work instead of creating a
    /// new provider submission
    pub deduplicated: bool,
}

/// `POST /api/jobs` - submit a generation request.
pub async fn submit_job(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<SubmitJobRequest>,
) -> ApiResult<(StatusCode, Json<SubmitJobResponse>)> {
    request
        .params
        .validate()
        .map_err(|e| ApiError::Validation(e.to_string()))?;

    let receipt = state
        .submit
        .submit(&user.owner(), request.kind, &request.params)
        .await?;

    info!(
        job_id = %receipt.job.id,
        kind = %request.kind,
        user_id = %user.user_id,
        deduplicated = receipt.deduplicated,
        "job submission accepted"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitJobResponse {
            job_id: receipt.job.id.to_string(),
            status: receipt.job.status,
            deduplicated: receipt.deduplicated,
        }),
    ))
}

/// `GET /api/jobs/:job_id` - fetch one job record.
pub async fn get_job(
    State(state): State<AppState>,
    user: AuthUser,
    Path(job_id): Path<String>,
) -> ApiResult<Json<Job>> {
    let job = fetch_owned_job(&state, &user, &job_id).await?;
    Ok(Json(job))
}

/// `GET /api/jobs` - list the caller's tracked jobs.
pub async fn list_jobs(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<Vec<Job>>> {
    let jobs = state.registry.list_by_owner(&user.owner()).await;
    Ok(Json(jobs))
}

/// Cancellation acknowledgement.
#[derive(Debug, Serialize)]
pub struct CancelJobResponse {
    /// False when the job had already reached a terminal state
    pub cancelled: bool,
}

/// `POST /api/jobs/:job_id/cancel` - cancel a tracked job.
pub async fn cancel_job(
    State(state): State<AppState>,
    user: AuthUser,
    Path(job_id): Path<String>,
) -> ApiResult<Json<CancelJobResponse>> {
    // Ownership first, so a foreign job cancels nothing and leaks nothing.
    let job = fetch_owned_job(&state, &user, &job_id).await?;

    let cancelled = state.reconciler.cancel(&job.id).await?;
    info!(job_id = %job.id, user_id = %user.user_id, cancelled, "cancel requested");
    Ok(Json(CancelJobResponse { cancelled }))
}

/// Look up a job the caller is allowed to see.
async fn fetch_owned_job(state: &AppState, user: &AuthUser, job_id: &str) -> ApiResult<Job> {
    let id = JobId::from_string(job_id);
    let job = state
        .registry
        .get(&id)
        .await
        .ok_or_else(|| ApiError::not_found(format!("job {job_id}")))?;

    if job.owner != user.owner() && !user.is_admin() {
        return Err(ApiError::not_found(format!("job {job_id}")));
    }
    Ok(job)
}
