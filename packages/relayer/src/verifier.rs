//! Request verification: field limits, signer recovery, nonce pre-check.
//!
//! Verification never mutates chain state. Passing it only means the request
//! was plausible when read; the forwarder's own check at execution time is
//! what actually settles replay.

use alloy::primitives::{Address, Bytes, Signature, B256, U256};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::chain::ForwarderChain;
use crate::error::RelayError;
use crate::forwarder::{ForwardRequest, ForwarderDomain};
use crate::gas::GasPolicy;
use crate::metrics::METRICS;
use crate::nonce::NonceLedger;

/// Static limits on request fields.
#[derive(Debug, Clone)]
pub struct RequestLimits {
    pub max_calldata_bytes: usize,
    pub allow_zero_target: bool,
    /// Ceiling on `value`, which the operator pays.
    pub max_value: U256,
    /// Contracts requests may target. Empty allows any.
    pub allowed_targets: Vec<Address>,
}

/// A request whose signature and nonce were checked. Only the verifier builds these.
#[derive(Debug, Clone)]
pub struct VerifiedRequest {
    request: ForwardRequest,
    signature: Bytes,
    signing_hash: B256,
}

impl VerifiedRequest {
    pub fn request(&self) -> &ForwardRequest {
        &self.request
    }

    pub fn signature(&self) -> &Bytes {
        &self.signature
    }

    pub fn signing_hash(&self) -> B256 {
        self.signing_hash
    }

    pub fn from(&self) -> Address {
        self.request.from
    }
}

pub struct Verifier<C: ?Sized> {
    domain: ForwarderDomain,
    gas: GasPolicy,
    limits: RequestLimits,
    ledger: NonceLedger<C>,
}

impl<C: ForwarderChain + ?Sized> Verifier<C> {
    pub fn new(
        domain: ForwarderDomain,
        gas: GasPolicy,
        limits: RequestLimits,
        chain: Arc<C>,
        nonce_timeout: std::time::Duration,
    ) -> Self {
        Self {
            domain,
            gas,
            limits,
            ledger: NonceLedger::new(chain, nonce_timeout),
        }
    }

    pub fn domain(&self) -> &ForwarderDomain {
        &self.domain
    }

    pub fn ledger(&self) -> &NonceLedger<C> {
        &self.ledger
    }

    /// Check `request` against `signature` and the forwarder's current nonce.
    ///
    /// Field checks and recovery run before any I/O so junk never costs an
    /// RPC round trip.
    #[instrument(skip_all, err, fields(from = %request.from, nonce = %request.nonce))]
    pub async fn verify(
        &self,
        request: ForwardRequest,
        signature: Bytes,
    ) -> Result<VerifiedRequest, RelayError> {
        self.check_fields(&request)?;

        let signing_hash = self.domain.signing_hash(&request);
        let recovered = recover_signer(signing_hash, &signature)?;
        if recovered != request.from {
            return Err(RelayError::InvalidSignature(format!(
                "signature recovers to {recovered}, not {}",
                request.from
            )));
        }

        let current = self.ledger.current_nonce(request.from).await?;
        if request.nonce != current {
            return Err(RelayError::NonceMismatch {
                from: request.from,
                provided: request.nonce,
                current,
            });
        }

        debug!("Request verified");
        Ok(VerifiedRequest {
            request,
            signature,
            signing_hash,
        })
    }

    fn check_fields(&self, request: &ForwardRequest) -> Result<(), RelayError> {
        if request.from == Address::ZERO {
            return Err(RelayError::MalformedRequest("from is the zero address".into()));
        }
        if request.to == Address::ZERO && !self.limits.allow_zero_target {
            return Err(RelayError::MalformedRequest("to is the zero address".into()));
        }
        if !self.limits.allowed_targets.is_empty()
            && !self.limits.allowed_targets.contains(&request.to)
        {
            return Err(RelayError::MalformedRequest(format!(
                "target {} is not an allowed contract",
                request.to
            )));
        }
        if request.gas == 0 {
            return Err(RelayError::MalformedRequest("gas must be non-zero".into()));
        }
        if request.value > self.limits.max_value {
            return Err(RelayError::MalformedRequest(format!(
                "value {} exceeds limit {}",
                request.value, self.limits.max_value
            )));
        }
        if request.data.len() > self.limits.max_calldata_bytes {
            return Err(RelayError::MalformedRequest(format!(
                "data is {} bytes, limit is {}",
                request.data.len(),
                self.limits.max_calldata_bytes
            )));
        }
        self.gas.check_declared_gas(request.gas).inspect_err(|_| {
            METRICS.gas_policy_violations.fetch_add(1, Ordering::Relaxed);
        })?;
        Ok(())
    }
}

fn recover_signer(hash: B256, signature: &[u8]) -> Result<Address, RelayError> {
    let sig = Signature::from_raw(signature)
        .map_err(|e| RelayError::InvalidSignature(format!("unparseable signature: {e}")))?;
    sig.recover_address_from_prehash(&hash)
        .map_err(|e| RelayError::InvalidSignature(format!("recovery failed: {e}")))
}
