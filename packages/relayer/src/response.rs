//! Response types for the relay API.

use alloy::primitives::{Address, TxHash};
use serde::Serialize;

use crate::submitter::RelayStatus;

/// `202` body for an accepted relay or retry.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayAccepted {
    pub accepted: bool,
    pub handle: TxHash,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replaces: Option<TxHash>,
}

impl RelayAccepted {
    pub fn new(handle: TxHash) -> Self {
        Self {
            accepted: true,
            handle,
            replaces: None,
        }
    }

    pub fn retry(handle: TxHash, replaces: TxHash) -> Self {
        Self {
            accepted: true,
            handle,
            replaces: Some(replaces),
        }
    }
}

/// `GET /relay/{handle}` body.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub handle: TxHash,
    #[serde(flatten)]
    pub status: RelayStatus,
}

/// Response from the health endpoint.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub operator: Address,
    pub forwarder: Address,
    pub chain_id: u64,
    pub uptime_secs: u64,
    pub requests: u64,
    pub active_rpc: String,
    pub failovers: u64,
    pub rpc_status: &'static str,
    pub operator_next_nonce: u64,
    pub attempts_pending: usize,
    pub sends_in_flight: usize,
}
