use axum::{
    Extension, Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use gup_core::InboundEnvelope;
use gup_idhash::IdHashRecord;
use gup_pipeline::DispatchOutcome;
use gup_telemetry::{TelemetryLabels, record_counter};
use tracing::{debug, info, warn};

use crate::AppState;
use crate::error::ApiError;
use crate::reqid::{RequestId, with_request_id};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ingress/gupshup/{channel}", post(receive))
        .route("/idhash/{channel}", post(register_idhash))
        .route("/healthz", get(healthz))
        .layer(middleware::from_fn(with_request_id))
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    StatusCode::NO_CONTENT
}

fn outcome_label(outcome: &DispatchOutcome) -> &'static str {
    match outcome {
        DispatchOutcome::Persisted { .. } => "persisted",
        DispatchOutcome::Duplicate => "duplicate",
        DispatchOutcome::UnknownChannel => "unknown_channel",
        DispatchOutcome::Blocked => "blocked",
        DispatchOutcome::Unhandled { .. } => "unhandled",
        DispatchOutcome::Ack(_) => "ack",
        DispatchOutcome::TemplateStatus => "template_status",
        DispatchOutcome::Ignored => "ignored",
    }
}

/// Gupshup webhook. Silent drops still answer 200 so the provider does not
/// retry; only dispatch failures answer 500.
async fn receive(
    State(state): State<AppState>,
    Path(channel): Path<String>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let envelope: InboundEnvelope = serde_json::from_slice(&body).map_err(|err| {
        warn!(channel = %channel, request_id = %request_id, error = %err, "undecodable webhook body");
        ApiError::BadRequest(format!("body is not a webhook envelope: {err}"))
    })?;

    let outcome = state.dispatcher.dispatch(&channel, &envelope).await?;
    record_counter(
        "ingress_webhooks",
        1,
        &TelemetryLabels::new(channel.as_str()).with("outcome", outcome_label(&outcome)),
    );
    debug!(channel = %channel, request_id = %request_id, ?outcome, "webhook handled");
    Ok(StatusCode::OK)
}

/// Records the provider id of an outbound message so its acks can be
/// reconciled.
async fn register_idhash(
    State(state): State<AppState>,
    Path(channel): Path<String>,
    Json(record): Json<IdHashRecord>,
) -> Result<StatusCode, ApiError> {
    if record.provider_message_id.trim().is_empty() || record.internal_hash.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "providerMessageId and internalHash are required".into(),
        ));
    }
    state.dispatcher.idhash().set_durable(&record).await?;
    info!(
        channel = %channel,
        gs_id = %record.provider_message_id,
        hash = %record.internal_hash,
        "outbound message registered"
    );
    Ok(StatusCode::NO_CONTENT)
}
