//! Seam between the relay and the network it submits to.

use alloy::consensus::TxEnvelope;
use alloy::primitives::{Address, TxHash, U256};
use async_trait::async_trait;

use crate::error::ChainError;

/// Current fee-market conditions, wei per gas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeEstimate {
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
}

/// What the network reports for a mined transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainReceipt {
    pub tx_hash: TxHash,
    pub block_number: Option<u64>,
    pub gas_used: u64,
    /// `false` when the forwarder-level transaction itself reverted.
    pub success: bool,
}

/// Network client plus the forwarding contract it exposes.
///
/// The forwarder is the authoritative source of per-sender nonces; every read
/// through this trait is advisory by the time the caller acts on it.
#[async_trait]
pub trait ForwarderChain: Send + Sync {
    async fn chain_id(&self) -> Result<u64, ChainError>;

    /// `forwarder.getNonce(from)`.
    async fn get_nonce(&self, from: Address) -> Result<U256, ChainError>;

    async fn fee_estimate(&self) -> Result<FeeEstimate, ChainError>;

    /// Pending transaction count of the operator account.
    async fn operator_nonce(&self, operator: Address) -> Result<u64, ChainError>;

    /// Broadcast an already signed transaction.
    async fn send_transaction(&self, tx: TxEnvelope) -> Result<TxHash, ChainError>;

    /// `Ok(None)` while the transaction is unknown or unmined.
    async fn receipt(&self, tx_hash: TxHash) -> Result<Option<ChainReceipt>, ChainError>;

    /// `"ok"`, or `"degraded"` when only a backup endpoint answers.
    async fn health(&self) -> Result<&'static str, ChainError> {
        self.chain_id().await.map(|_| "ok")
    }

    fn active_endpoint(&self) -> String {
        "in-memory".into()
    }

    fn failover_count(&self) -> u64 {
        0
    }
}
