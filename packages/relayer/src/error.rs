//! Error types for the relayer.

use alloy::primitives::{Address, TxHash, U256};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

use crate::auth::Role;

/// Relay error taxonomy. Every rejection surfaced to a caller is one of these.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Credential missing or not parseable.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),
    /// Credential signature or expiry check failed.
    #[error("invalid credential: {0}")]
    InvalidCredential(String),
    #[error("credential carries no role claim")]
    RoleMissing,
    #[error("role {actual} is not one of {required:?}")]
    InsufficientRole { required: Vec<Role>, actual: Role },
    #[error("invalid signature: {0}")]
    InvalidSignature(String),
    /// Claimed nonce is not the one the forwarder expects next. Retryable.
    #[error("nonce mismatch for {from}: provided {provided}, current {current}")]
    NonceMismatch {
        from: Address,
        provided: U256,
        current: U256,
    },
    #[error("nonce lookup failed for {from}: {reason}")]
    NonceLookupFailed { from: Address, reason: String },
    #[error("malformed request: {0}")]
    MalformedRequest(String),
    #[error("gas policy violation: {0}")]
    GasPolicyViolation(String),
    /// The (from, nonce) pair was already submitted or consumed on-chain.
    #[error("request from {from} with nonce {nonce} was already relayed")]
    AlreadyRelayed {
        from: Address,
        nonce: U256,
        handle: Option<TxHash>,
    },
    /// Returned by retry once the attempt reverted and its nonce was consumed.
    /// Status queries report the same outcome as `RelayStatus::Reverted`.
    #[error("forwarder transaction {handle} reverted: {reason}")]
    SubmissionReverted { handle: TxHash, reason: String },
    /// No receipt within the confirmation timeout. The transaction may still land.
    /// Status queries report this as `RelayStatus::Dropped`.
    #[error("transaction {handle} not confirmed in time; it may still confirm")]
    SubmissionDropped { handle: TxHash },
    /// The node answered and refused the operator transaction.
    #[error("submission rejected by node: {0}")]
    SubmissionRejected(String),
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),
    #[error("unknown relay handle {0}")]
    UnknownHandle(TxHash),
    #[error("operator signing failed: {0}")]
    Signing(String),
    #[error("config error: {0}")]
    Config(String),
}

impl RelayError {
    /// Stable error kind reported to callers.
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::Unauthenticated(_) => "Unauthenticated",
            RelayError::InvalidCredential(_) => "InvalidCredential",
            RelayError::RoleMissing => "RoleMissing",
            RelayError::InsufficientRole { .. } => "InsufficientRole",
            RelayError::InvalidSignature(_) => "InvalidSignature",
            RelayError::NonceMismatch { .. } => "NonceMismatch",
            RelayError::NonceLookupFailed { .. } => "NonceLookupFailed",
            RelayError::MalformedRequest(_) => "MalformedRequest",
            RelayError::GasPolicyViolation(_) => "GasPolicyViolation",
            RelayError::AlreadyRelayed { .. } => "AlreadyRelayed",
            RelayError::SubmissionReverted { .. } => "SubmissionReverted",
            RelayError::SubmissionDropped { .. } => "SubmissionDropped",
            RelayError::SubmissionRejected(_) => "SubmissionRejected",
            RelayError::UpstreamUnavailable(_) => "UpstreamUnavailable",
            RelayError::UnknownHandle(_) => "UnknownHandle",
            RelayError::Signing(_) => "SigningFailed",
            RelayError::Config(_) => "Config",
        }
    }

    /// Races and transient upstream failures may be retried (with a fresh nonce
    /// where applicable). Policy and authentication failures may not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RelayError::NonceMismatch { .. }
                | RelayError::NonceLookupFailed { .. }
                | RelayError::AlreadyRelayed { .. }
                | RelayError::SubmissionReverted { .. }
                | RelayError::UpstreamUnavailable(_)
        )
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            RelayError::Unauthenticated(_) | RelayError::InvalidCredential(_) => {
                StatusCode::UNAUTHORIZED
            }
            RelayError::RoleMissing | RelayError::InsufficientRole { .. } => StatusCode::FORBIDDEN,
            RelayError::InvalidSignature(_) | RelayError::MalformedRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            RelayError::NonceMismatch { .. } | RelayError::AlreadyRelayed { .. } => {
                StatusCode::CONFLICT
            }
            RelayError::GasPolicyViolation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            RelayError::NonceLookupFailed { .. } => StatusCode::SERVICE_UNAVAILABLE,
            RelayError::SubmissionReverted { .. }
            | RelayError::SubmissionRejected(_)
            | RelayError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            RelayError::SubmissionDropped { .. } => StatusCode::GATEWAY_TIMEOUT,
            RelayError::UnknownHandle(_) => StatusCode::NOT_FOUND,
            RelayError::Signing(_) | RelayError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Context a client needs to correct its behaviour.
    pub fn details(&self) -> Value {
        match self {
            RelayError::InsufficientRole { required, actual } => json!({
                "requiredRoles": required.iter().map(Role::as_str).collect::<Vec<_>>(),
                "actualRole": actual.as_str(),
            }),
            RelayError::NonceMismatch {
                from,
                provided,
                current,
            } => json!({
                "from": from,
                "providedNonce": provided.to_string(),
                "currentNonce": current.to_string(),
            }),
            RelayError::NonceLookupFailed { from, .. } => json!({ "from": from }),
            RelayError::AlreadyRelayed {
                from,
                nonce,
                handle,
            } => json!({
                "from": from,
                "nonce": nonce.to_string(),
                "handle": handle,
            }),
            RelayError::SubmissionReverted { handle, reason } => json!({
                "handle": handle,
                "reason": reason,
            }),
            RelayError::SubmissionDropped { handle } => json!({
                "handle": handle,
                "mayStillConfirm": true,
            }),
            RelayError::UnknownHandle(handle) => json!({ "handle": handle }),
            _ => Value::Null,
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = json!({
            "accepted": false,
            "errorKind": self.kind(),
            "retryable": self.is_retryable(),
            "message": self.to_string(),
            "details": self.details(),
        });
        (status, Json(body)).into_response()
    }
}

/// Failure talking to the network or the forwarding contract.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChainError {
    /// Node unreachable or the transport failed; safe to fail over.
    #[error("transport error: {0}")]
    Transport(String),
    /// The node answered and refused the request (e.g. "nonce too low").
    #[error("rejected by node: {0}")]
    Rejected(String),
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl ChainError {
    pub fn is_nonce_too_low(&self) -> bool {
        self.rejection_contains("nonce too low")
    }

    /// The node already holds this exact transaction in its pool.
    pub fn is_already_known(&self) -> bool {
        self.rejection_contains("already known")
    }

    /// Error for a failed broadcast. A node refusal is final for this
    /// transaction; anything else leaves the node's answer unknown.
    pub fn into_submission_error(self) -> RelayError {
        match self {
            ChainError::Rejected(reason) => RelayError::SubmissionRejected(reason),
            other => other.into(),
        }
    }

    fn rejection_contains(&self, needle: &str) -> bool {
        match self {
            ChainError::Rejected(msg) => msg.to_ascii_lowercase().contains(needle),
            _ => false,
        }
    }
}

impl From<ChainError> for RelayError {
    fn from(e: ChainError) -> Self {
        RelayError::UpstreamUnavailable(e.to_string())
    }
}
