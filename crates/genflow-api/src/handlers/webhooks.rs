//! Provider webhook intake.
//!
//! Webhooks and polling converge on the reconciler's single status
//! funnel; a webhook that loses the race against a poll (or a replayed
//! delivery for a settled job) is acknowledged without effect so
//! providers stop retrying.

use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;
use tracing::{debug, warn};

use genflow_models::JobKind;
use genflow_providers::ProviderError;
use genflow_reconciler::ReconcilerError;
use genflow_registry::UpdateOutcome;

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;

/// Webhook acknowledgement.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    /// False when the delivery changed nothing (job already terminal)
    pub applied: bool,
}

/// `POST /webhooks/:kind` - ingest a provider push notification.
pub async fn receive_webhook(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Json(payload): Json<serde_json::Value>,
) -> ApiResult<Json<WebhookResponse>> {
    let kind = JobKind::parse(&kind).ok_or_else(|| {
        metrics::record_webhook_received(&kind, "unknown_kind");
        ApiError::not_found(format!("unknown provider kind {kind}"))
    })?;

    match state.reconciler.apply_webhook(kind, &payload).await {
        Ok(UpdateOutcome::Applied(job)) => {
            debug!(kind = %kind, job_id = %job.id, status = %job.status, "webhook applied");
            metrics::record_webhook_received(kind.as_str(), "applied");
            Ok(Json(WebhookResponse { applied: true }))
        }
        // Idempotent replay or a delivery that lost the race to a poll.
        Ok(UpdateOutcome::IgnoredTerminal) => {
            debug!(kind = %kind, "webhook for settled job ignored");
            metrics::record_webhook_received(kind.as_str(), "ignored_terminal");
            Ok(Json(WebhookResponse { applied: false }))
        }
        Ok(UpdateOutcome::NotFound) | Err(ReconcilerError::JobNotFound(_)) => {
            metrics::record_webhook_received(kind.as_str(), "unknown_job");
            Err(ApiError::not_found("no tracked job for provider reference"))
        }
        Err(ReconcilerError::Provider(ProviderError::InvalidResponse(msg))) => {
            warn!(kind = %kind, "unparsable webhook payload: {msg}");
            metrics::record_webhook_received(kind.as_str(), "unparsable");
            Err(ApiError::bad_request(format!("unparsable payload: {msg}")))
        }
        Err(e) => {
            metrics::record_webhook_received(kind.as_str(), "error");
            Err(e.into())
        }
    }
}
