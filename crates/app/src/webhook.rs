use std::time::Instant;

use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use metrics::{counter, histogram};
use tracing::{debug, error, info, warn};

use live_notifier_core::envelope::{
    HEADER_MESSAGE_ID, HEADER_MESSAGE_TYPE, HEADER_SIGNATURE, HEADER_TIMESTAMP,
};
use live_notifier_core::{
    EventType, MessageType, NotificationPayload, RevocationPayload, VerificationPayload,
    WebhookEnvelope,
};

use crate::problem::ProblemResponse;
use crate::router::AppState;

pub async fn handle(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, ProblemResponse> {
    let start = Instant::now();
    let body = body.map_err(|err| {
        error!(stage = "ingress", error = %err, "failed to read webhook body");
        ProblemResponse::body_unreadable()
    })?;

    let envelope = WebhookEnvelope::new(
        header_or_empty(&headers, HEADER_MESSAGE_TYPE),
        header_or_empty(&headers, HEADER_MESSAGE_ID),
        header_or_empty(&headers, HEADER_TIMESTAMP),
        header_or_empty(&headers, HEADER_SIGNATURE),
        &body,
    );
    let message_label = envelope.message_type.metric_label();

    let result = route(&state, &envelope);
    histogram!("webhook_ack_latency_seconds", "type" => message_label)
        .record(start.elapsed().as_secs_f64());
    result
}

fn route(state: &AppState, envelope: &WebhookEnvelope<'_>) -> Result<Response, ProblemResponse> {
    if !envelope.is_authentic(state.webhook_secret()) {
        counter!("eventsub_invalid_signature_total").increment(1);
        warn!(
            stage = "ingress",
            message_id = %envelope.message_id,
            "rejecting delivery with invalid signature"
        );
        return Err(ProblemResponse::invalid_signature());
    }

    counter!("eventsub_ingress_total", "type" => envelope.message_type.metric_label()).increment(1);

    match &envelope.message_type {
        MessageType::Verification => handle_verification(envelope),
        MessageType::Notification => handle_notification(state, envelope),
        MessageType::Revocation => Ok(handle_revocation(envelope)),
        MessageType::Unknown(raw) => {
            info!(stage = "ingress", message_id = %envelope.message_id, message_type = %raw, "ignoring unknown message type");
            Ok(StatusCode::NO_CONTENT.into_response())
        }
    }
}

fn handle_verification(envelope: &WebhookEnvelope<'_>) -> Result<Response, ProblemResponse> {
    let payload: VerificationPayload = serde_json::from_slice(envelope.raw_body)
        .map_err(|err| ProblemResponse::malformed_payload("verification", err))?;

    info!(stage = "ingress", message_id = %envelope.message_id, "answering callback verification challenge");
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain")],
        payload.challenge,
    )
        .into_response())
}

fn handle_notification(
    state: &AppState,
    envelope: &WebhookEnvelope<'_>,
) -> Result<Response, ProblemResponse> {
    let payload: NotificationPayload = serde_json::from_slice(envelope.raw_body)
        .map_err(|err| ProblemResponse::malformed_payload("notification", err))?;

    let event_type = payload.event_type();
    let broadcaster_id = payload.event.broadcaster_user_id;
    match event_type {
        EventType::StreamOnline if broadcaster_id.is_empty() => {
            warn!(stage = "ingress", message_id = %envelope.message_id, "stream.online without broadcaster id; skipping");
        }
        EventType::StreamOnline => {
            info!(
                stage = "ingress",
                message_id = %envelope.message_id,
                %broadcaster_id,
                broadcaster_name = %payload.event.broadcaster_user_name,
                started_at = %payload.event.started_at,
                "stream went live"
            );
            let notifier = state.notifier().clone();
            state.tasks().spawn(async move {
                notifier.notify_stream_online(&broadcaster_id).await;
            });
        }
        EventType::StreamOffline => {
            info!(stage = "ingress", message_id = %envelope.message_id, %broadcaster_id, "stream went offline");
        }
        EventType::Other(other) => {
            debug!(stage = "ingress", message_id = %envelope.message_id, event_type = %other, "ignoring notification for unwatched event type");
        }
    }

    Ok(StatusCode::NO_CONTENT.into_response())
}

fn handle_revocation(envelope: &WebhookEnvelope<'_>) -> Response {
    let payload: RevocationPayload =
        serde_json::from_slice(envelope.raw_body).unwrap_or_default();
    warn!(
        stage = "ingress",
        message_id = %envelope.message_id,
        subscription_id = %payload.subscription.id,
        subscription_type = %payload.subscription.kind,
        reason = %payload.subscription.status,
        "subscription revoked"
    );
    StatusCode::NO_CONTENT.into_response()
}

fn header_or_empty<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
}
