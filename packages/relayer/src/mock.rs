//! In-memory forwarder and network for tests.
//!
//! Behaves like a node fronting a `MinimalForwarder`: it rejects stale
//! operator nonces and holds future ones until the gap fills, and on
//! execution checks the EIP-712 signature and the sender's nonce the way the
//! contract does, reverting the outer transaction when either check fails.
//! Node refusals and duplicate-broadcast replies can be injected per test.

use alloy::consensus::transaction::SignerRecoverable;
use alloy::consensus::{Transaction, TxEnvelope};
use alloy::primitives::{Address, Signature, TxHash, U256};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::chain::{ChainReceipt, FeeEstimate, ForwarderChain};
use crate::error::ChainError;
use crate::forwarder::{decode_execute_calldata, ForwardRequest, ForwarderDomain};

const GWEI: u128 = 1_000_000_000;

#[derive(Default)]
struct MockState {
    user_nonces: HashMap<Address, U256>,
    operator_nonces: HashMap<Address, u64>,
    mempool: Vec<TxEnvelope>,
    /// Future-nonce transactions waiting for the gap to fill.
    queued: HashMap<(Address, u64), TxEnvelope>,
    receipts: HashMap<TxHash, ChainReceipt>,
    executed: Vec<ForwardRequest>,
    block: u64,
}

/// A node refusal for one operator nonce, answered after `delay`.
struct Refusal {
    reason: String,
    delay: Duration,
    remaining: usize,
}

pub struct MockChain {
    domain: ForwarderDomain,
    state: Mutex<MockState>,
    fees: Mutex<FeeEstimate>,
    auto_mine: AtomicBool,
    fail_nonce_reads: AtomicBool,
    fail_sends: AtomicBool,
    refusals: Mutex<HashMap<u64, Refusal>>,
    already_known_replies: AtomicU64,
    read_delay_ms: AtomicU64,
    sends: AtomicU64,
}

impl Default for MockChain {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChain {
    /// Chain 31337 with the forwarder at `0xf0f0…f0`.
    pub fn new() -> Self {
        Self::with_domain(ForwarderDomain {
            name: "MinimalForwarder".into(),
            version: "0.0.1".into(),
            chain_id: 31337,
            forwarder: Address::repeat_byte(0xf0),
        })
    }

    pub fn with_domain(domain: ForwarderDomain) -> Self {
        Self {
            domain,
            state: Mutex::new(MockState::default()),
            fees: Mutex::new(FeeEstimate {
                max_fee_per_gas: 30 * GWEI,
                max_priority_fee_per_gas: GWEI,
            }),
            auto_mine: AtomicBool::new(true),
            fail_nonce_reads: AtomicBool::new(false),
            fail_sends: AtomicBool::new(false),
            refusals: Mutex::new(HashMap::new()),
            already_known_replies: AtomicU64::new(0),
            read_delay_ms: AtomicU64::new(0),
            sends: AtomicU64::new(0),
        }
    }

    pub fn domain(&self) -> &ForwarderDomain {
        &self.domain
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn set_user_nonce(&self, from: Address, nonce: U256) {
        self.state().user_nonces.insert(from, nonce);
    }

    pub fn user_nonce(&self, from: Address) -> U256 {
        self.state().user_nonces.get(&from).copied().unwrap_or_default()
    }

    pub fn set_operator_nonce(&self, operator: Address, nonce: u64) {
        self.state().operator_nonces.insert(operator, nonce);
    }

    pub fn set_fees(&self, fees: FeeEstimate) {
        *self.fees.lock().unwrap_or_else(|p| p.into_inner()) = fees;
    }

    /// When off, accepted transactions wait in the mempool until [`mine`](Self::mine).
    pub fn set_auto_mine(&self, on: bool) {
        self.auto_mine.store(on, Ordering::SeqCst);
    }

    pub fn fail_nonce_reads(&self, fail: bool) {
        self.fail_nonce_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Refuse the next `times` transactions carrying operator nonce `nonce`,
    /// answering after `delay` without taking them into the pool.
    pub fn refuse_nonce(&self, nonce: u64, times: usize, reason: &str, delay: Duration) {
        self.refusals.lock().unwrap_or_else(|p| p.into_inner()).insert(
            nonce,
            Refusal {
                reason: reason.to_string(),
                delay,
                remaining: times,
            },
        );
    }

    /// Take the next `times` transactions into the pool but answer "already
    /// known", as a node does when a broadcast reaches it twice.
    pub fn reply_already_known(&self, times: u64) {
        self.already_known_replies.store(times, Ordering::SeqCst);
    }

    pub fn set_read_delay(&self, delay: Duration) {
        self.read_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Broadcasts the node accepted.
    pub fn send_count(&self) -> u64 {
        self.sends.load(Ordering::SeqCst)
    }

    /// Requests the forwarder executed, in order.
    pub fn executed(&self) -> Vec<ForwardRequest> {
        self.state().executed.clone()
    }

    pub fn mempool_len(&self) -> usize {
        self.state().mempool.len()
    }

    /// Mine everything in the mempool into one block.
    pub fn mine(&self) {
        let mut state = self.state();
        let pending = std::mem::take(&mut state.mempool);
        state.block += 1;
        for tx in pending {
            self.execute(&mut state, &tx);
        }
    }

    /// Forget the mempool, as if the transactions were evicted.
    pub fn evict_mempool(&self) {
        let mut state = self.state();
        state.mempool.clear();
        state.queued.clear();
    }

    fn execute(&self, state: &mut MockState, tx: &TxEnvelope) {
        let success = match decode_execute_calldata(tx.input()) {
            Some((req, sig)) if tx.to() == Some(self.domain.forwarder) => {
                let current = state.user_nonces.get(&req.from).copied().unwrap_or_default();
                let signer_ok = Signature::from_raw(&sig)
                    .ok()
                    .and_then(|s| {
                        s.recover_address_from_prehash(&self.domain.signing_hash(&req))
                            .ok()
                    })
                    == Some(req.from);
                if signer_ok && req.nonce == current {
                    state.user_nonces.insert(req.from, current + U256::from(1));
                    state.executed.push(req);
                    true
                } else {
                    false
                }
            }
            _ => false,
        };

        let tx_hash = *tx.tx_hash();
        state.receipts.insert(
            tx_hash,
            ChainReceipt {
                tx_hash,
                block_number: Some(state.block),
                gas_used: tx.gas_limit() / 2,
                success,
            },
        );
    }

    fn take_refusal(&self, nonce: u64) -> Option<(String, Duration)> {
        let mut refusals = self.refusals.lock().unwrap_or_else(|p| p.into_inner());
        let refusal = refusals.get_mut(&nonce)?;
        refusal.remaining = refusal.remaining.saturating_sub(1);
        let taken = (refusal.reason.clone(), refusal.delay);
        if refusal.remaining == 0 {
            refusals.remove(&nonce);
        }
        Some(taken)
    }

    fn accept(&self, tx: TxEnvelope) -> Result<TxHash, ChainError> {
        let sender = tx
            .recover_signer()
            .map_err(|e| ChainError::Rejected(format!("invalid sender: {e}")))?;

        let mut state = self.state();
        let expected = state.operator_nonces.get(&sender).copied().unwrap_or_default();
        if tx.nonce() < expected {
            return Err(ChainError::Rejected(format!(
                "nonce too low: next nonce {expected}, tx nonce {}",
                tx.nonce()
            )));
        }
        self.sends.fetch_add(1, Ordering::SeqCst);
        let tx_hash = *tx.tx_hash();
        if tx.nonce() > expected {
            state.queued.insert((sender, tx.nonce()), tx);
            return Ok(tx_hash);
        }

        let mut next = Some(tx);
        let mut nonce = expected;
        while let Some(tx) = next {
            nonce += 1;
            state.operator_nonces.insert(sender, nonce);
            if self.auto_mine.load(Ordering::SeqCst) {
                state.block += 1;
                self.execute(&mut state, &tx);
            } else {
                state.mempool.push(tx);
            }
            next = state.queued.remove(&(sender, nonce));
        }
        Ok(tx_hash)
    }

    async fn read_delay(&self) {
        let ms = self.read_delay_ms.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }
}

#[async_trait]
impl ForwarderChain for MockChain {
    async fn chain_id(&self) -> Result<u64, ChainError> {
        Ok(self.domain.chain_id)
    }

    async fn get_nonce(&self, from: Address) -> Result<U256, ChainError> {
        self.read_delay().await;
        if self.fail_nonce_reads.load(Ordering::SeqCst) {
            return Err(ChainError::Transport("connection refused".into()));
        }
        Ok(self.user_nonce(from))
    }

    async fn fee_estimate(&self) -> Result<FeeEstimate, ChainError> {
        Ok(*self.fees.lock().unwrap_or_else(|p| p.into_inner()))
    }

    async fn operator_nonce(&self, operator: Address) -> Result<u64, ChainError> {
        Ok(self
            .state()
            .operator_nonces
            .get(&operator)
            .copied()
            .unwrap_or_default())
    }

    async fn send_transaction(&self, tx: TxEnvelope) -> Result<TxHash, ChainError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(ChainError::Transport("connection reset".into()));
        }
        if let Some((reason, delay)) = self.take_refusal(tx.nonce()) {
            tokio::time::sleep(delay).await;
            return Err(ChainError::Rejected(reason));
        }

        let tx_hash = self.accept(tx)?;
        let duplicate = self
            .already_known_replies
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if duplicate {
            return Err(ChainError::Rejected("already known".into()));
        }
        Ok(tx_hash)
    }

    async fn receipt(&self, tx_hash: TxHash) -> Result<Option<ChainReceipt>, ChainError> {
        self.read_delay().await;
        Ok(self.state().receipts.get(&tx_hash).cloned())
    }
}
