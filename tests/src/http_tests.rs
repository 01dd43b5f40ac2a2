// =============================================================================
// HTTP Surface Integration Tests
// =============================================================================
// Exercises the axum router end to end against the in-memory forwarder:
// - POST /relay accepts, GET /relay/{handle} reports the outcome
// - Rejections carry errorKind, retryable and details
// - Health, readiness and metrics endpoints
// - Request-id propagation

use crate::utils::{call, get, post_json, setup_relay};
use alloy::primitives::{TxHash, U256};
use alloy::signers::local::PrivateKeySigner;
use anyhow::Result;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use forwarder_relayer::auth::Role;
use serde_json::json;
use std::time::Duration;
use tower::ServiceExt;

// =============================================================================
// Relay
// =============================================================================

#[tokio::test]
async fn test_relay_then_status_then_replay() -> Result<()> {
    let relay = setup_relay(|_| {}).await?;
    let alice = PrivateKeySigner::random();
    let token = relay.credential("alice", alice.address(), Some(Role::User));
    let request = relay.request(alice.address(), 0);
    let signature = relay.sign(&alice, &request)?;
    let body = json!({ "request": request, "signature": signature, "roleToken": token });

    let (status, accepted) = call(relay.router(), post_json("/relay", &body, None)?).await?;
    assert_eq!(status, StatusCode::ACCEPTED, "{accepted}");
    assert_eq!(accepted["accepted"], true);
    let handle = accepted["handle"].as_str().expect("handle").to_string();
    assert!(accepted.get("replaces").is_none());

    let (status, outcome) = call(relay.router(), get(&format!("/relay/{handle}"))?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["handle"], handle.as_str());
    assert_eq!(outcome["status"], "confirmed");
    assert_eq!(outcome["innerResult"]["txHash"], handle.as_str());
    assert!(outcome["innerResult"]["gasUsed"].as_u64().is_some());

    let (status, err) = call(relay.router(), post_json("/relay", &body, None)?).await?;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(err["accepted"], false);
    assert_eq!(err["errorKind"], "NonceMismatch");
    assert_eq!(err["retryable"], true);
    assert_eq!(err["details"]["currentNonce"], "1");
    assert_eq!(err["details"]["providedNonce"], "0");
    Ok(())
}

#[tokio::test]
async fn test_bearer_header_is_accepted() -> Result<()> {
    let relay = setup_relay(|_| {}).await?;
    let alice = PrivateKeySigner::random();
    let token = relay.credential("alice", alice.address(), Some(Role::Admin));
    let request = relay.request(alice.address(), 0);
    let signature = relay.sign(&alice, &request)?;
    let body = json!({ "request": request, "signature": signature });

    let (status, _) = call(relay.router(), post_json("/relay", &body, Some(&token))?).await?;
    assert_eq!(status, StatusCode::ACCEPTED);
    Ok(())
}

#[tokio::test]
async fn test_missing_credential_is_unauthenticated() -> Result<()> {
    let relay = setup_relay(|_| {}).await?;
    let alice = PrivateKeySigner::random();
    let request = relay.request(alice.address(), 0);
    let signature = relay.sign(&alice, &request)?;
    let body = json!({ "request": request, "signature": signature });

    let (status, err) = call(relay.router(), post_json("/relay", &body, None)?).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(err["errorKind"], "Unauthenticated");
    assert_eq!(err["retryable"], false);
    assert_eq!(relay.chain.send_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_role_outside_required_set_is_forbidden() -> Result<()> {
    let relay = setup_relay(|_| {}).await?;
    let alice = PrivateKeySigner::random();
    let token = relay.credential("alice", alice.address(), Some(Role::Operator));
    let request = relay.request(alice.address(), 0);
    let signature = relay.sign(&alice, &request)?;
    let body = json!({ "request": request, "signature": signature, "roleToken": token });

    let (status, err) = call(relay.router(), post_json("/relay", &body, None)?).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(err["errorKind"], "InsufficientRole");
    assert_eq!(err["details"]["actualRole"], "operator");
    assert_eq!(err["details"]["requiredRoles"], json!(["user", "admin"]));
    Ok(())
}

#[tokio::test]
async fn test_credential_without_role_is_role_missing() -> Result<()> {
    let relay = setup_relay(|_| {}).await?;
    let alice = PrivateKeySigner::random();
    let token = relay.credential("alice", alice.address(), None);
    let request = relay.request(alice.address(), 0);
    let signature = relay.sign(&alice, &request)?;
    let body = json!({ "request": request, "signature": signature, "roleToken": token });

    let (status, err) = call(relay.router(), post_json("/relay", &body, None)?).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(err["errorKind"], "RoleMissing");
    Ok(())
}

#[tokio::test]
async fn test_signature_by_someone_else_is_invalid() -> Result<()> {
    let relay = setup_relay(|_| {}).await?;
    let alice = PrivateKeySigner::random();
    let mallory = PrivateKeySigner::random();
    let token = relay.credential("mallory", mallory.address(), Some(Role::User));
    let request = relay.request(alice.address(), 0);
    let signature = relay.sign(&mallory, &request)?;
    let body = json!({ "request": request, "signature": signature, "roleToken": token });

    let (status, err) = call(relay.router(), post_json("/relay", &body, None)?).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["errorKind"], "InvalidSignature");
    assert!(relay.chain.executed().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_gas_over_ceiling_is_policy_violation() -> Result<()> {
    let relay = setup_relay(|_| {}).await?;
    let alice = PrivateKeySigner::random();
    let token = relay.credential("alice", alice.address(), Some(Role::User));
    let mut request = relay.request(alice.address(), 0);
    request.gas = 10_000_000;
    let signature = relay.sign(&alice, &request)?;
    let body = json!({ "request": request, "signature": signature, "roleToken": token });

    let (status, err) = call(relay.router(), post_json("/relay", &body, None)?).await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(err["errorKind"], "GasPolicyViolation");
    assert_eq!(relay.chain.send_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_value_above_ceiling_is_malformed() -> Result<()> {
    let relay = setup_relay(|c| c.max_request_value_wei = 1_000).await?;
    let alice = PrivateKeySigner::random();
    let token = relay.credential("alice", alice.address(), Some(Role::User));
    let mut request = relay.request(alice.address(), 0);
    request.value = U256::from(1_001);
    let signature = relay.sign(&alice, &request)?;
    let body = json!({ "request": request, "signature": signature, "roleToken": token });

    let (status, err) = call(relay.router(), post_json("/relay", &body, None)?).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["errorKind"], "MalformedRequest");
    assert_eq!(relay.chain.send_count(), 0);

    request.value = U256::from(1_000);
    let signature = relay.sign(&alice, &request)?;
    let body = json!({ "request": request, "signature": signature, "roleToken": token });
    let (status, accepted) = call(relay.router(), post_json("/relay", &body, None)?).await?;
    assert_eq!(status, StatusCode::ACCEPTED, "{accepted}");
    Ok(())
}

#[tokio::test]
async fn test_node_refusal_is_not_retryable() -> Result<()> {
    let relay = setup_relay(|_| {}).await?;
    relay.chain.refuse_nonce(0, 1, "insufficient funds for gas * price + value", Duration::ZERO);
    let alice = PrivateKeySigner::random();
    let token = relay.credential("alice", alice.address(), Some(Role::User));
    let request = relay.request(alice.address(), 0);
    let signature = relay.sign(&alice, &request)?;
    let body = json!({ "request": request, "signature": signature, "roleToken": token });

    let (status, err) = call(relay.router(), post_json("/relay", &body, None)?).await?;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(err["errorKind"], "SubmissionRejected");
    assert_eq!(err["retryable"], false);
    assert!(relay.chain.executed().is_empty());

    // The operator nonce was handed back, so the next send uses it.
    let (status, accepted) = call(relay.router(), post_json("/relay", &body, None)?).await?;
    assert_eq!(status, StatusCode::ACCEPTED, "{accepted}");
    assert_eq!(relay.chain.executed().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_nonce_read_failure_is_lookup_failed() -> Result<()> {
    let relay = setup_relay(|_| {}).await?;
    relay.chain.fail_nonce_reads(true);
    let alice = PrivateKeySigner::random();
    let token = relay.credential("alice", alice.address(), Some(Role::User));
    let request = relay.request(alice.address(), 0);
    let signature = relay.sign(&alice, &request)?;
    let body = json!({ "request": request, "signature": signature, "roleToken": token });

    let (status, err) = call(relay.router(), post_json("/relay", &body, None)?).await?;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(err["errorKind"], "NonceLookupFailed");
    assert_eq!(err["retryable"], true);
    assert_eq!(relay.chain.send_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_malformed_body_is_rejected() -> Result<()> {
    let relay = setup_relay(|_| {}).await?;

    let (status, err) = call(
        relay.router(),
        post_json("/relay", &json!({ "request": { "from": "not-an-address" } }), None)?,
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["errorKind"], "MalformedRequest");

    let raw = Request::builder()
        .method("POST")
        .uri("/relay")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))?;
    let (status, err) = call(relay.router(), raw).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["errorKind"], "MalformedRequest");
    Ok(())
}

// =============================================================================
// Status and retry
// =============================================================================

#[tokio::test]
async fn test_unknown_and_invalid_handles() -> Result<()> {
    let relay = setup_relay(|_| {}).await?;

    let unknown = TxHash::repeat_byte(0x42);
    let (status, err) = call(relay.router(), get(&format!("/relay/{unknown}"))?).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(err["errorKind"], "UnknownHandle");

    let (status, err) = call(relay.router(), get("/relay/0x1234")?).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["errorKind"], "MalformedRequest");
    Ok(())
}

#[tokio::test]
async fn test_pending_relay_reports_pending_and_cannot_be_retried() -> Result<()> {
    let relay = setup_relay(|_| {}).await?;
    relay.chain.set_auto_mine(false);
    let alice = PrivateKeySigner::random();
    let token = relay.credential("alice", alice.address(), Some(Role::User));
    let request = relay.request(alice.address(), 0);
    let signature = relay.sign(&alice, &request)?;
    let body = json!({ "request": request, "signature": signature, "roleToken": token });

    let (_, accepted) = call(relay.router(), post_json("/relay", &body, None)?).await?;
    let handle = accepted["handle"].as_str().expect("handle").to_string();

    let (status, outcome) = call(relay.router(), get(&format!("/relay/{handle}"))?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["status"], "pending");

    let (status, err) = call(
        relay.router(),
        post_json(&format!("/relay/{handle}/retry"), &json!({}), Some(&token))?,
    )
    .await?;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(err["errorKind"], "AlreadyRelayed");

    // The same signed request again while the first is in the mempool.
    let (status, err) = call(relay.router(), post_json("/relay", &body, None)?).await?;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(err["errorKind"], "AlreadyRelayed");
    assert_eq!(err["details"]["handle"], handle.as_str());

    relay.chain.mine();
    let (_, outcome) = call(relay.router(), get(&format!("/relay/{handle}"))?).await?;
    assert_eq!(outcome["status"], "confirmed");
    Ok(())
}

#[tokio::test]
async fn test_retry_without_credential_is_unauthenticated() -> Result<()> {
    let relay = setup_relay(|_| {}).await?;
    let handle = TxHash::repeat_byte(0x42);

    let response = relay
        .router()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/relay/{handle}/retry"))
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

// =============================================================================
// Operational endpoints
// =============================================================================

#[tokio::test]
async fn test_health_reports_operator_and_forwarder() -> Result<()> {
    let relay = setup_relay(|_| {}).await?;

    let (status, health) = call(relay.router(), get("/health")?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "ok");
    assert_eq!(health["chainId"], 31337);
    assert_eq!(
        health["operator"],
        json!(relay.state.submitter().operator())
    );
    assert_eq!(health["forwarder"], json!(relay.settings.domain.forwarder));
    assert_eq!(health["operatorNextNonce"], 0);
    assert_eq!(health["attemptsPending"], 0);
    Ok(())
}

#[tokio::test]
async fn test_ready_when_chain_matches() -> Result<()> {
    let relay = setup_relay(|_| {}).await?;
    let (status, body) = call(relay.router(), get("/ready")?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ready");
    Ok(())
}

#[tokio::test]
async fn test_metrics_exposition() -> Result<()> {
    let relay = setup_relay(|_| {}).await?;
    let (status, body) = call(relay.router(), get("/metrics")?).await?;
    assert_eq!(status, StatusCode::OK);
    let text = body.as_str().expect("metrics are plain text");
    assert!(text.contains("relayer_relay_total"));
    assert!(text.contains("relayer_attempts_pending 0"));
    Ok(())
}

#[tokio::test]
async fn test_request_id_is_echoed_or_generated() -> Result<()> {
    let relay = setup_relay(|_| {}).await?;

    let response = relay
        .router()
        .oneshot(
            Request::builder()
                .uri("/health")
                .header("x-request-id", "trace-abc")
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.headers()["x-request-id"], "trace-abc");

    let response = relay.router().oneshot(get("/health")?).await?;
    let generated = response.headers()["x-request-id"].to_str()?;
    assert!(generated.starts_with("rel-"));
    Ok(())
}
