//! RPC client with primary → fallback failover and circuit breaker.
//!
//! Wraps two alloy HTTP providers. Transport failures on the primary fail over
//! to the fallback; answers where the node refused the request are returned
//! as-is, since another node would refuse them too.

use alloy::consensus::TxEnvelope;
use alloy::network::ReceiptResponse;
use alloy::primitives::{Address, TxHash, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::transports::{RpcError, TransportErrorKind};
use async_trait::async_trait;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{info, warn};

use crate::chain::{ChainReceipt, FeeEstimate, ForwarderChain};
use crate::error::{ChainError, RelayError};
use crate::forwarder::IForwarder;
use crate::metrics::METRICS;

/// Consecutive failures before the circuit breaker opens.
const CIRCUIT_BREAKER_THRESHOLD: u64 = 5;
/// How long (ms) before a tripped breaker retries the primary.
const CIRCUIT_BREAKER_WINDOW_MS: u64 = 30_000;
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(3);

struct CircuitState {
    failures: u64,
    last_failure_ms: u64,
    open: bool,
}

/// RPC client with primary → fallback failover.
pub struct RpcClient {
    primary: DynProvider,
    fallback: DynProvider,
    primary_url: String,
    fallback_url: String,
    forwarder: Address,
    circuit: Mutex<CircuitState>,
    total_failovers: AtomicU64,
}

impl RpcClient {
    pub fn new(
        primary_url: &str,
        fallback_url: &str,
        forwarder: Address,
    ) -> Result<Self, RelayError> {
        let primary = connect(primary_url)?;
        let fallback = connect(fallback_url)?;
        info!(
            primary = primary_url,
            fallback = fallback_url,
            forwarder = %forwarder,
            "RPC client initialized with failover"
        );
        Ok(Self {
            primary,
            fallback,
            primary_url: primary_url.to_string(),
            fallback_url: fallback_url.to_string(),
            forwarder,
            circuit: Mutex::new(CircuitState {
                failures: 0,
                last_failure_ms: 0,
                open: false,
            }),
            total_failovers: AtomicU64::new(0),
        })
    }

    /// Record a successful primary call; resets the circuit.
    fn record_success(&self) {
        let mut circuit = self.circuit.lock().unwrap_or_else(|p| p.into_inner());
        if circuit.failures > 0 {
            info!(primary = %self.primary_url, "Primary RPC recovered");
            circuit.failures = 0;
            circuit.open = false;
        }
    }

    /// Record a failed primary call; may open the circuit.
    fn record_failure(&self) {
        let mut circuit = self.circuit.lock().unwrap_or_else(|p| p.into_inner());
        circuit.failures += 1;
        circuit.last_failure_ms = now_ms();
        if circuit.failures >= CIRCUIT_BREAKER_THRESHOLD && !circuit.open {
            circuit.open = true;
            self.total_failovers.fetch_add(1, Ordering::Relaxed);
            METRICS.rpc_failovers.fetch_add(1, Ordering::Relaxed);
            warn!(
                failures = circuit.failures,
                fallback = %self.fallback_url,
                "Circuit breaker opened, routing to fallback"
            );
        }
    }

    /// Check if primary circuit is open (should use fallback).
    pub fn is_circuit_open(&self) -> bool {
        let mut circuit = self.circuit.lock().unwrap_or_else(|p| p.into_inner());
        if !circuit.open {
            return false;
        }
        // Half-open: retry primary after window
        if now_ms().saturating_sub(circuit.last_failure_ms) > CIRCUIT_BREAKER_WINDOW_MS {
            circuit.open = false;
            circuit.failures = 0;
            info!(primary = %self.primary_url, "Circuit breaker half-open, retrying primary");
            return false;
        }
        true
    }

    /// Total number of failover events (for health endpoint).
    pub fn failover_count(&self) -> u64 {
        self.total_failovers.load(Ordering::Relaxed)
    }

    /// Which URL is currently active.
    pub fn active_url(&self) -> &str {
        if self.is_circuit_open() {
            &self.fallback_url
        } else {
            &self.primary_url
        }
    }

    /// `"ok"` if the active node answers, `"degraded"` if only the fallback does.
    pub async fn health_check(&self) -> Result<&'static str, ChainError> {
        let primary =
            tokio::time::timeout(HEALTH_CHECK_TIMEOUT, self.primary.get_block_number()).await;
        if matches!(primary, Ok(Ok(_))) {
            return Ok("ok");
        }
        match tokio::time::timeout(HEALTH_CHECK_TIMEOUT, self.fallback.get_block_number()).await {
            Ok(Ok(_)) => Ok("degraded"),
            Ok(Err(e)) => Err(from_rpc(e)),
            Err(_) => Err(ChainError::Timeout(HEALTH_CHECK_TIMEOUT)),
        }
    }

    /// Run `op` against the active provider, failing over once on transport errors.
    async fn call<T, F, Fut>(&self, op: &'static str, f: F) -> Result<T, ChainError>
    where
        F: Fn(DynProvider) -> Fut,
        Fut: Future<Output = Result<T, ChainError>>,
    {
        let on_fallback = self.is_circuit_open();
        let first = if on_fallback {
            self.fallback.clone()
        } else {
            self.primary.clone()
        };

        match f(first).await {
            Ok(value) => {
                if !on_fallback {
                    self.record_success();
                }
                Ok(value)
            }
            Err(e @ ChainError::Rejected(_)) => Err(e),
            Err(e) if on_fallback => {
                METRICS.rpc_errors.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
            Err(e) => {
                METRICS.rpc_errors.fetch_add(1, Ordering::Relaxed);
                self.record_failure();
                warn!(op, error = %e, "Primary RPC failed, trying fallback");
                f(self.fallback.clone()).await.inspect_err(|_| {
                    METRICS.rpc_errors.fetch_add(1, Ordering::Relaxed);
                })
            }
        }
    }
}

#[async_trait]
impl ForwarderChain for RpcClient {
    async fn chain_id(&self) -> Result<u64, ChainError> {
        self.call("chain_id", |p| async move { p.get_chain_id().await.map_err(from_rpc) })
            .await
    }

    async fn get_nonce(&self, from: Address) -> Result<U256, ChainError> {
        let forwarder = self.forwarder;
        self.call("get_nonce", move |p| async move {
            IForwarder::new(forwarder, p)
                .getNonce(from)
                .call()
                .await
                .map_err(from_contract)
        })
        .await
    }

    async fn fee_estimate(&self) -> Result<FeeEstimate, ChainError> {
        self.call("fee_estimate", |p| async move {
            let estimate = p.estimate_eip1559_fees().await.map_err(from_rpc)?;
            Ok(FeeEstimate {
                max_fee_per_gas: estimate.max_fee_per_gas,
                max_priority_fee_per_gas: estimate.max_priority_fee_per_gas,
            })
        })
        .await
    }

    async fn operator_nonce(&self, operator: Address) -> Result<u64, ChainError> {
        self.call("operator_nonce", move |p| async move {
            p.get_transaction_count(operator)
                .pending()
                .await
                .map_err(from_rpc)
        })
        .await
    }

    async fn send_transaction(&self, tx: TxEnvelope) -> Result<TxHash, ChainError> {
        // The same signed bytes are safe to broadcast to both nodes.
        self.call("send_transaction", move |p| {
            let tx = tx.clone();
            async move {
                p.send_tx_envelope(tx)
                    .await
                    .map(|pending| *pending.tx_hash())
                    .map_err(from_rpc)
            }
        })
        .await
    }

    async fn receipt(&self, tx_hash: TxHash) -> Result<Option<ChainReceipt>, ChainError> {
        self.call("receipt", move |p| async move {
            let receipt = p.get_transaction_receipt(tx_hash).await.map_err(from_rpc)?;
            Ok(receipt.map(|r| ChainReceipt {
                tx_hash: r.transaction_hash,
                block_number: r.block_number,
                gas_used: r.gas_used,
                success: r.status(),
            }))
        })
        .await
    }

    async fn health(&self) -> Result<&'static str, ChainError> {
        self.health_check().await
    }

    fn active_endpoint(&self) -> String {
        self.active_url().to_string()
    }

    fn failover_count(&self) -> u64 {
        RpcClient::failover_count(self)
    }
}

fn connect(url: &str) -> Result<DynProvider, RelayError> {
    let url = url
        .parse()
        .map_err(|e| RelayError::Config(format!("invalid RPC url {url:?}: {e}")))?;
    Ok(ProviderBuilder::new().connect_http(url).erased())
}

fn from_rpc(e: RpcError<TransportErrorKind>) -> ChainError {
    match e {
        RpcError::ErrorResp(payload) => ChainError::Rejected(payload.message.to_string()),
        other => ChainError::Transport(other.to_string()),
    }
}

fn from_contract(e: alloy::contract::Error) -> ChainError {
    match e {
        alloy::contract::Error::TransportError(e) => from_rpc(e),
        other => ChainError::Rejected(other.to_string()),
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
