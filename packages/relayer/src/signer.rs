//! Operator signing identity.
//!
//! The operator key pays fees for every relayed request. It lives only here;
//! callers get back signed envelopes, never the key. The operator's own
//! transaction nonce is a separate sequence from any user's forwarder nonce.

use alloy::consensus::TxEnvelope;
use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, Bytes, U256};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::RelayError;
use crate::gas::GasQuote;

/// Intrinsic gas of a plain value transfer.
const TRANSFER_GAS: u64 = 21_000;

/// Fee-paying signer with an atomically advanced nonce counter.
pub struct OperatorSigner {
    wallet: EthereumWallet,
    address: Address,
    chain_id: u64,
    /// Next operator nonce to hand out. Never read-modify-written outside atomics.
    next_nonce: AtomicU64,
}

impl OperatorSigner {
    pub fn new(signer: PrivateKeySigner, chain_id: u64, start_nonce: u64) -> Self {
        let address = signer.address();
        Self {
            wallet: EthereumWallet::from(signer),
            address,
            chain_id,
            next_nonce: AtomicU64::new(start_nonce),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn next_nonce(&self) -> u64 {
        self.next_nonce.load(Ordering::SeqCst)
    }

    /// Claim the next operator nonce.
    pub fn reserve_nonce(&self) -> u64 {
        self.next_nonce.fetch_add(1, Ordering::SeqCst)
    }

    /// Hand back a nonce whose transaction never reached the network.
    /// Only succeeds if no later nonce was reserved in the meantime.
    pub fn release_nonce(&self, nonce: u64) -> bool {
        self.next_nonce
            .compare_exchange(nonce + 1, nonce, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Move the counter up to the chain's pending count after "nonce too low".
    pub fn observe_chain_nonce(&self, pending: u64) {
        self.next_nonce.fetch_max(pending, Ordering::SeqCst);
    }

    /// Rewind the counter to the chain's pending count, provided it still reads
    /// `expected`. Used when a skipped nonce left later transactions queued.
    pub fn rewind_nonce(&self, expected: u64, pending: u64) -> bool {
        pending < expected
            && self
                .next_nonce
                .compare_exchange(expected, pending, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
    }

    /// Zero-value transfer to self that occupies `nonce` and nothing else.
    pub async fn sign_gap_filler(
        &self,
        nonce: u64,
        gas: GasQuote,
    ) -> Result<TxEnvelope, RelayError> {
        let gas = GasQuote {
            gas_limit: TRANSFER_GAS,
            ..gas
        };
        self.sign(nonce, self.address, U256::ZERO, Bytes::new(), gas).await
    }

    /// Sign an EIP-1559 transaction from the operator account.
    pub async fn sign(
        &self,
        nonce: u64,
        to: Address,
        value: U256,
        input: Bytes,
        gas: GasQuote,
    ) -> Result<TxEnvelope, RelayError> {
        TransactionRequest::default()
            .with_from(self.address)
            .with_to(to)
            .with_value(value)
            .with_input(input)
            .with_nonce(nonce)
            .with_chain_id(self.chain_id)
            .with_gas_limit(gas.gas_limit)
            .with_max_fee_per_gas(gas.max_fee_per_gas)
            .with_max_priority_fee_per_gas(gas.max_priority_fee_per_gas)
            .build(&self.wallet)
            .await
            .map_err(|e| RelayError::Signing(e.to_string()))
    }
}

impl std::fmt::Debug for OperatorSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OperatorSigner({})", self.address)
    }
}
