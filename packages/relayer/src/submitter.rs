//! Relay submission and outcome tracking.
//!
//! Each verified request becomes one forwarder `execute` transaction paid for
//! by the operator. Attempts live in memory only; losing them is tolerated
//! because the forwarder nonce, re-read on retry, is what decides whether a
//! request still needs relaying.

use alloy::primitives::{Address, Bytes, TxHash, U256};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::auth::{Identity, Role};
use crate::chain::{ChainReceipt, ForwarderChain};
use crate::error::{ChainError, RelayError};
use crate::forwarder::{execute_calldata, ForwardRequest};
use crate::gas::{GasPolicy, GasQuote};
use crate::metrics::METRICS;
use crate::nonce::NonceLedger;
use crate::signer::OperatorSigner;
use crate::verifier::VerifiedRequest;

/// Mined-transaction facts reported for a confirmed relay. Whether the inner
/// call succeeded is the target contract's business.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InnerResult {
    pub tx_hash: TxHash,
    pub block_number: Option<u64>,
    pub gas_used: u64,
}

impl From<&ChainReceipt> for InnerResult {
    fn from(r: &ChainReceipt) -> Self {
        Self {
            tx_hash: r.tx_hash,
            block_number: r.block_number,
            gas_used: r.gas_used,
        }
    }
}

/// Where a relay attempt stands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum RelayStatus {
    Pending,
    Confirmed { inner_result: InnerResult },
    /// The forwarder-level transaction failed.
    Reverted { reason: String },
    /// Not mined within the confirmation timeout; it may still land.
    Dropped { may_still_confirm: bool },
}

impl RelayStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RelayStatus::Pending)
    }

    fn dropped() -> Self {
        RelayStatus::Dropped {
            may_still_confirm: true,
        }
    }
}

/// One submission of a verified request.
#[derive(Debug, Clone)]
pub struct RelayAttempt {
    pub request: ForwardRequest,
    pub signature: Bytes,
    pub requester: String,
    pub role: Role,
    pub operator_nonce: u64,
    pub submitted_at: Instant,
    pub status: RelayStatus,
    /// Handle of the attempt this one re-submitted, if any.
    pub replaces: Option<TxHash>,
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    Submitting,
    Submitted(TxHash),
}

impl Slot {
    fn handle(&self) -> Option<TxHash> {
        match self {
            Slot::Submitting => None,
            Slot::Submitted(h) => Some(*h),
        }
    }
}

/// Timeouts and ceilings the submitter applies.
#[derive(Debug, Clone)]
pub struct SubmitterSettings {
    pub forwarder: Address,
    pub gas: GasPolicy,
    pub nonce_lookup_timeout: Duration,
    pub status_poll_timeout: Duration,
    pub confirmation_timeout: Duration,
    pub attempt_retention: Duration,
}

/// Decrements the in-flight counter on drop.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct Submitter<C: ?Sized> {
    chain: Arc<C>,
    signer: OperatorSigner,
    ledger: NonceLedger<C>,
    settings: SubmitterSettings,
    attempts: DashMap<TxHash, RelayAttempt>,
    /// (from, nonce) → submission, so one signed request is sent at most once.
    by_request: DashMap<(Address, U256), Slot>,
    in_flight: AtomicUsize,
}

impl<C: ForwarderChain + ?Sized> Submitter<C> {
    pub fn new(chain: Arc<C>, signer: OperatorSigner, settings: SubmitterSettings) -> Self {
        Self {
            ledger: NonceLedger::new(Arc::clone(&chain), settings.nonce_lookup_timeout),
            chain,
            signer,
            settings,
            attempts: DashMap::new(),
            by_request: DashMap::new(),
            in_flight: AtomicUsize::new(0),
        }
    }

    pub fn operator(&self) -> Address {
        self.signer.address()
    }

    pub fn signer(&self) -> &OperatorSigner {
        &self.signer
    }

    /// Sends currently between nonce reservation and node acknowledgement.
    pub fn in_flight_sends(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn pending_count(&self) -> usize {
        self.attempts
            .iter()
            .filter(|a| a.status == RelayStatus::Pending)
            .count()
    }

    pub fn attempt(&self, handle: &TxHash) -> Option<RelayAttempt> {
        self.attempts.get(handle).map(|a| a.clone())
    }

    /// Submit a verified request. The returned handle is the transaction hash.
    #[instrument(skip_all, err, fields(from = %verified.from(), nonce = %verified.request().nonce))]
    pub async fn submit(
        &self,
        verified: &VerifiedRequest,
        requester: &Identity,
    ) -> Result<TxHash, RelayError> {
        let request = verified.request();
        let key = (request.from, request.nonce);

        match self.by_request.entry(key) {
            Entry::Occupied(slot) => {
                return Err(RelayError::AlreadyRelayed {
                    from: request.from,
                    nonce: request.nonce,
                    handle: slot.get().handle(),
                });
            }
            Entry::Vacant(slot) => {
                slot.insert(Slot::Submitting);
            }
        }

        match self.send(request, verified.signature()).await {
            Ok((handle, operator_nonce)) => {
                self.record(handle, operator_nonce, request, verified.signature(), requester, None);
                self.by_request.insert(key, Slot::Submitted(handle));
                info!(
                    tx_hash = %handle,
                    operator_nonce,
                    requester = %requester.id,
                    "Relay submitted"
                );
                Ok(handle)
            }
            Err(e) => {
                self.by_request.remove(&key);
                Err(e)
            }
        }
    }

    /// Current status of `handle`, refreshed from the chain when not terminal.
    #[instrument(skip(self), err)]
    pub async fn poll_status(&self, handle: TxHash) -> Result<RelayStatus, RelayError> {
        let snapshot = self
            .attempts
            .get(&handle)
            .map(|a| (a.request.clone(), a.submitted_at, a.status.clone()));
        let Some((request, submitted_at, status)) = snapshot else {
            return self.status_from_chain(handle).await;
        };

        if !matches!(status, RelayStatus::Pending | RelayStatus::Dropped { .. }) {
            return Ok(status);
        }

        let receipt = match self.fetch_receipt(handle).await {
            Ok(r) => r,
            Err(e) => {
                debug!(tx_hash = %handle, error = %e, "Receipt lookup failed");
                None
            }
        };

        let next = match receipt {
            Some(r) => self.outcome(&r, &request).await,
            None if status == RelayStatus::Pending
                && submitted_at.elapsed() >= self.settings.confirmation_timeout =>
            {
                warn!(
                    tx_hash = %handle,
                    from = %request.from,
                    nonce = %request.nonce,
                    "Relay not confirmed within timeout; it may still confirm"
                );
                METRICS.dropped.fetch_add(1, Ordering::Relaxed);
                RelayStatus::dropped()
            }
            None => status.clone(),
        };

        if next != status {
            if let Some(mut attempt) = self.attempts.get_mut(&handle) {
                attempt.status = next.clone();
            }
        }
        Ok(next)
    }

    /// Resubmit a dropped or reverted attempt after re-reading the forwarder nonce.
    /// A reverted attempt whose nonce has since been consumed is settled.
    #[instrument(skip(self, requester), err)]
    pub async fn retry(&self, handle: TxHash, requester: &Identity) -> Result<TxHash, RelayError> {
        let attempt = self
            .attempt(&handle)
            .ok_or(RelayError::UnknownHandle(handle))?;
        let request = attempt.request.clone();

        let status = self.poll_status(handle).await?;
        if matches!(status, RelayStatus::Pending | RelayStatus::Confirmed { .. }) {
            return Err(RelayError::AlreadyRelayed {
                from: request.from,
                nonce: request.nonce,
                handle: Some(handle),
            });
        }

        let current = self.ledger.current_nonce(request.from).await?;
        if let RelayStatus::Reverted { reason } = status {
            if current > request.nonce {
                return Err(RelayError::SubmissionReverted { handle, reason });
            }
        }
        if current != request.nonce {
            return Err(RelayError::NonceMismatch {
                from: request.from,
                provided: request.nonce,
                current,
            });
        }

        let key = (request.from, request.nonce);
        match self.by_request.entry(key) {
            Entry::Occupied(mut slot) => match *slot.get() {
                Slot::Submitted(h) if h == handle => {
                    slot.insert(Slot::Submitting);
                }
                other => {
                    return Err(RelayError::AlreadyRelayed {
                        from: request.from,
                        nonce: request.nonce,
                        handle: other.handle(),
                    });
                }
            },
            Entry::Vacant(slot) => {
                slot.insert(Slot::Submitting);
            }
        }

        match self.send(&request, &attempt.signature).await {
            Ok((new_handle, operator_nonce)) => {
                self.record(
                    new_handle,
                    operator_nonce,
                    &request,
                    &attempt.signature,
                    requester,
                    Some(handle),
                );
                self.by_request.insert(key, Slot::Submitted(new_handle));
                info!(
                    tx_hash = %new_handle,
                    replaces = %handle,
                    operator_nonce,
                    "Relay resubmitted"
                );
                Ok(new_handle)
            }
            Err(e) => {
                self.by_request.insert(key, Slot::Submitted(handle));
                Err(e)
            }
        }
    }

    /// Refresh pending attempts, prune old terminal ones, then reconcile the
    /// operator nonce.
    pub async fn sweep(&self) {
        let pending: Vec<TxHash> = self
            .attempts
            .iter()
            .filter(|a| a.status == RelayStatus::Pending)
            .map(|a| *a.key())
            .collect();
        for handle in pending {
            let _ = self.poll_status(handle).await;
        }

        let retention = self.settings.attempt_retention;
        let expired: Vec<(TxHash, (Address, U256))> = self
            .attempts
            .iter()
            .filter(|a| a.status.is_terminal() && a.submitted_at.elapsed() >= retention)
            .map(|a| (*a.key(), (a.request.from, a.request.nonce)))
            .collect();
        for (handle, key) in expired {
            self.attempts.remove(&handle);
            self.by_request
                .remove_if(&key, |_, slot| slot.handle() == Some(handle));
        }

        if let Err(e) = self.reconcile_operator_nonce().await {
            debug!(error = %e, "Operator nonce reconciliation skipped");
        }
    }

    /// Sweep every `interval` until cancelled.
    pub async fn run_sweeper(self: Arc<Self>, interval: Duration, cancel: CancellationToken)
    where
        C: 'static,
    {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Attempt sweeper stopped");
                    return;
                }
                _ = ticker.tick() => self.sweep().await,
            }
        }
    }

    /// Wait for in-flight sends to finish, up to `timeout`. Returns whether they did.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.in_flight_sends() > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        true
    }

    async fn send(
        &self,
        request: &ForwardRequest,
        signature: &Bytes,
    ) -> Result<(TxHash, u64), RelayError> {
        let _guard = InFlight::enter(&self.in_flight);

        let fees = self.chain.fee_estimate().await?;
        let quote = self.settings.gas.quote(request.gas, fees).inspect_err(|_| {
            METRICS.gas_policy_violations.fetch_add(1, Ordering::Relaxed);
        })?;
        let calldata = execute_calldata(request, signature);

        self.broadcast(request.value, calldata, quote).await
    }

    /// Sign and send with a freshly reserved operator nonce. A "nonce too low"
    /// means the node never took the transaction, so one resync and resend is safe.
    async fn broadcast(
        &self,
        value: U256,
        calldata: Bytes,
        quote: GasQuote,
    ) -> Result<(TxHash, u64), RelayError> {
        let mut resynced = false;
        loop {
            let nonce = self.signer.reserve_nonce();
            let tx = match self
                .signer
                .sign(nonce, self.settings.forwarder, value, calldata.clone(), quote)
                .await
            {
                Ok(tx) => tx,
                Err(e) => {
                    self.settle_unsent_nonce(nonce, quote).await;
                    return Err(e);
                }
            };
            let tx_hash = *tx.tx_hash();

            match self.chain.send_transaction(tx).await {
                Ok(hash) => return Ok((hash, nonce)),
                Err(e) if e.is_already_known() => {
                    debug!(%tx_hash, operator_nonce = nonce, "Node already holds transaction");
                    return Ok((tx_hash, nonce));
                }
                Err(e) if e.is_nonce_too_low() && !resynced => {
                    warn!(operator_nonce = nonce, error = %e, "Operator nonce stale, resyncing");
                    resynced = true;
                    self.resync_operator_nonce().await?;
                }
                Err(e @ ChainError::Rejected(_)) => {
                    warn!(operator_nonce = nonce, error = %e, "Node refused operator transaction");
                    // A nonce the chain already passed leaves no gap.
                    if !e.is_nonce_too_low() {
                        self.settle_unsent_nonce(nonce, quote).await;
                    }
                    return Err(e.into_submission_error());
                }
                Err(e) => {
                    self.signer.release_nonce(nonce);
                    if matches!(e, ChainError::Transport(_)) {
                        // Unknown whether the node saw it; trust the chain's count.
                        let _ = self.resync_operator_nonce().await;
                    }
                    return Err(e.into_submission_error());
                }
            }
        }
    }

    /// Give back a reserved nonce whose transaction never reached the node.
    /// Once later nonces are out, fill it instead so they are not held behind it.
    async fn settle_unsent_nonce(&self, nonce: u64, quote: GasQuote) {
        if self.signer.release_nonce(nonce) {
            return;
        }
        let filled = match self.signer.sign_gap_filler(nonce, quote).await {
            Ok(tx) => match self.chain.send_transaction(tx).await {
                Err(e) if !e.is_already_known() => Err(RelayError::from(e)),
                _ => Ok(()),
            },
            Err(e) => Err(e),
        };
        match filled {
            Ok(()) => {
                METRICS.operator_nonce_gaps_filled.fetch_add(1, Ordering::Relaxed);
                warn!(operator_nonce = nonce, "Filled operator nonce gap with self-transfer");
            }
            Err(e) => {
                warn!(operator_nonce = nonce, error = %e, "Operator nonce gap left unfilled");
            }
        }
    }

    /// Line the operator counter up with the chain's pending count while
    /// nothing is in flight. Ahead of the chain means a skipped nonce is
    /// holding later transactions back, so the counter is rewound onto it.
    pub async fn reconcile_operator_nonce(&self) -> Result<bool, RelayError> {
        let expected = self.signer.next_nonce();
        if self.in_flight_sends() > 0 {
            return Ok(false);
        }
        let pending = self.chain.operator_nonce(self.signer.address()).await?;
        if pending > expected {
            self.signer.observe_chain_nonce(pending);
            return Ok(true);
        }
        if self.in_flight_sends() > 0 || !self.signer.rewind_nonce(expected, pending) {
            return Ok(false);
        }
        METRICS.operator_nonce_rewinds.fetch_add(1, Ordering::Relaxed);
        warn!(next = expected, pending, "Operator nonce rewound to chain pending count");
        Ok(true)
    }

    async fn resync_operator_nonce(&self) -> Result<(), RelayError> {
        let pending = self.chain.operator_nonce(self.signer.address()).await?;
        self.signer.observe_chain_nonce(pending);
        METRICS.operator_nonce_resyncs.fetch_add(1, Ordering::Relaxed);
        debug!(pending, next = self.signer.next_nonce(), "Operator nonce resynced");
        Ok(())
    }

    fn record(
        &self,
        handle: TxHash,
        operator_nonce: u64,
        request: &ForwardRequest,
        signature: &Bytes,
        requester: &Identity,
        replaces: Option<TxHash>,
    ) {
        self.attempts.insert(
            handle,
            RelayAttempt {
                request: request.clone(),
                signature: signature.clone(),
                requester: requester.id.clone(),
                role: requester.role.clone(),
                operator_nonce,
                submitted_at: Instant::now(),
                status: RelayStatus::Pending,
                replaces,
            },
        );
    }

    async fn fetch_receipt(&self, handle: TxHash) -> Result<Option<ChainReceipt>, ChainError> {
        tokio::time::timeout(self.settings.status_poll_timeout, self.chain.receipt(handle))
            .await
            .unwrap_or(Err(ChainError::Timeout(self.settings.status_poll_timeout)))
    }

    async fn outcome(&self, receipt: &ChainReceipt, request: &ForwardRequest) -> RelayStatus {
        if receipt.success {
            METRICS.confirmed.fetch_add(1, Ordering::Relaxed);
            info!(tx_hash = %receipt.tx_hash, block = ?receipt.block_number, "Relay confirmed");
            return RelayStatus::Confirmed {
                inner_result: receipt.into(),
            };
        }

        METRICS.reverted.fetch_add(1, Ordering::Relaxed);
        let reason = self.revert_reason(request).await;
        warn!(tx_hash = %receipt.tx_hash, %reason, "Forwarder transaction reverted");
        RelayStatus::Reverted { reason }
    }

    /// Receipts carry no revert data; the nonce tells us whether we lost a race.
    async fn revert_reason(&self, request: &ForwardRequest) -> String {
        match self.ledger.current_nonce(request.from).await {
            Ok(current) if current > request.nonce => format!(
                "nonce {} for {} was consumed by another transaction (current nonce {current})",
                request.nonce, request.from
            ),
            _ => "forwarder transaction reverted".to_string(),
        }
    }

    async fn status_from_chain(&self, handle: TxHash) -> Result<RelayStatus, RelayError> {
        match self.fetch_receipt(handle).await? {
            Some(r) if r.success => Ok(RelayStatus::Confirmed {
                inner_result: (&r).into(),
            }),
            Some(_) => Ok(RelayStatus::Reverted {
                reason: "forwarder transaction reverted".into(),
            }),
            None => Err(RelayError::UnknownHandle(handle)),
        }
    }
}
