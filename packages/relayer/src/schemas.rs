//! Request bodies accepted by the relay API.

use alloy::primitives::Bytes;
use serde::Deserialize;

use crate::forwarder::ForwardRequest;

/// `POST /relay`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayBody {
    pub request: ForwardRequest,
    /// 65-byte EIP-712 signature by `request.from`, hex encoded.
    pub signature: Bytes,
    /// Falls back to `Authorization: Bearer` when absent.
    #[serde(default)]
    pub role_token: Option<String>,
}

/// `POST /relay/{handle}/retry`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryBody {
    #[serde(default)]
    pub role_token: Option<String>,
}
