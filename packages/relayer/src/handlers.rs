//! HTTP request handlers.

use alloy::primitives::TxHash;
use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::{Extension, Json};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::chain::ForwarderChain;
use crate::error::RelayError;
use crate::metrics::METRICS;
use crate::middleware::RequestId;
use crate::response::{HealthResponse, RelayAccepted, StatusResponse};
use crate::schemas::{RelayBody, RetryBody};
use crate::state::AppState;

const READY_TIMEOUT: Duration = Duration::from_secs(3);

/// Submit a signed forward request. `POST /relay`
pub async fn relay<C: ForwarderChain + ?Sized + 'static>(
    State(state): State<Arc<AppState<C>>>,
    Extension(req_id): Extension<RequestId>,
    headers: HeaderMap,
    body: Result<Json<RelayBody>, JsonRejection>,
) -> Result<(StatusCode, Json<RelayAccepted>), RelayError> {
    state.request_count.fetch_add(1, Ordering::Relaxed);

    let Json(body) = body.map_err(|e| {
        warn!(req_id = %req_id.0, error = %e, "Invalid relay body");
        RelayError::MalformedRequest(e.body_text())
    })?;

    let credential = body.role_token.clone().or_else(|| bearer(&headers));
    info!(
        req_id = %req_id.0,
        from = %body.request.from,
        nonce = %body.request.nonce,
        "Relaying request"
    );

    let handle = state
        .relayer
        .relay(credential.as_deref(), body.request, body.signature)
        .await?;

    info!(req_id = %req_id.0, tx_hash = %handle, "Relay submitted");
    Ok((StatusCode::ACCEPTED, Json(RelayAccepted::new(handle))))
}

/// Relay status. `GET /relay/{handle}`
pub async fn relay_status<C: ForwarderChain + ?Sized + 'static>(
    State(state): State<Arc<AppState<C>>>,
    Path(handle): Path<String>,
) -> Result<Json<StatusResponse>, RelayError> {
    let handle = parse_handle(&handle)?;
    let status = state.relayer.status(handle).await?;
    Ok(Json(StatusResponse { handle, status }))
}

/// Explicit retry of a dropped or reverted relay. `POST /relay/{handle}/retry`
pub async fn retry<C: ForwarderChain + ?Sized + 'static>(
    State(state): State<Arc<AppState<C>>>,
    Extension(req_id): Extension<RequestId>,
    Path(handle): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<RelayAccepted>), RelayError> {
    let handle = parse_handle(&handle)?;
    let body: RetryBody = if body.is_empty() {
        RetryBody::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| RelayError::MalformedRequest(format!("invalid retry body: {e}")))?
    };
    let credential = body.role_token.or_else(|| bearer(&headers));

    let new_handle = state.relayer.retry(credential.as_deref(), handle).await?;
    info!(req_id = %req_id.0, replaces = %handle, tx_hash = %new_handle, "Relay retried");
    Ok((
        StatusCode::ACCEPTED,
        Json(RelayAccepted::retry(new_handle, handle)),
    ))
}

/// Health check with RPC and submission status.
pub async fn health<C: ForwarderChain + ?Sized + 'static>(
    State(state): State<Arc<AppState<C>>>,
) -> impl IntoResponse {
    let rpc_status = state.chain.health().await.unwrap_or("unavailable");
    let submitter = state.submitter();

    Json(HealthResponse {
        status: rpc_status,
        operator: submitter.operator(),
        forwarder: state.forwarder,
        chain_id: state.chain_id,
        uptime_secs: state.start_time.elapsed().as_secs(),
        requests: state.request_count.load(Ordering::Relaxed),
        active_rpc: state.chain.active_endpoint(),
        failovers: state.chain.failover_count(),
        rpc_status,
        operator_next_nonce: submitter.signer().next_nonce(),
        attempts_pending: submitter.pending_count(),
        sends_in_flight: submitter.in_flight_sends(),
    })
}

/// Readiness probe: 200 once the network answers with the configured chain id.
pub async fn ready<C: ForwarderChain + ?Sized + 'static>(
    State(state): State<Arc<AppState<C>>>,
) -> impl IntoResponse {
    match tokio::time::timeout(READY_TIMEOUT, state.chain.chain_id()).await {
        Ok(Ok(id)) if id == state.chain_id => {
            (StatusCode::OK, Json(json!({ "status": "ready" })))
        }
        Ok(Ok(id)) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "wrong_chain", "chainId": id })),
        ),
        _ => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "unavailable" })),
        ),
    }
}

/// Prometheus metrics in text exposition format.
pub async fn metrics<C: ForwarderChain + ?Sized + 'static>(
    State(state): State<Arc<AppState<C>>>,
) -> impl IntoResponse {
    let submitter = state.submitter();
    let body = METRICS.render(submitter.pending_count(), submitter.in_flight_sends());
    (
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4",
        )],
        body,
    )
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|s| s.trim().to_string())
}

fn parse_handle(raw: &str) -> Result<TxHash, RelayError> {
    raw.parse()
        .map_err(|_| RelayError::MalformedRequest(format!("invalid relay handle {raw:?}")))
}
