//! Relay pipeline: authenticate → verify → submit.

use alloy::primitives::{Bytes, TxHash};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};

use crate::auth::{Authenticator, RequiredRoles};
use crate::chain::ForwarderChain;
use crate::error::RelayError;
use crate::forwarder::ForwardRequest;
use crate::metrics::METRICS;
use crate::submitter::{RelayStatus, Submitter};
use crate::verifier::Verifier;

pub struct Relayer<C: ?Sized> {
    authenticator: Authenticator,
    required_roles: RequiredRoles,
    verifier: Verifier<C>,
    submitter: Arc<Submitter<C>>,
}

impl<C: ForwarderChain + ?Sized> Relayer<C> {
    pub fn new(
        authenticator: Authenticator,
        required_roles: RequiredRoles,
        verifier: Verifier<C>,
        submitter: Arc<Submitter<C>>,
    ) -> Self {
        Self {
            authenticator,
            required_roles,
            verifier,
            submitter,
        }
    }

    pub fn submitter(&self) -> &Arc<Submitter<C>> {
        &self.submitter
    }

    pub fn verifier(&self) -> &Verifier<C> {
        &self.verifier
    }

    /// Relay one signed request on behalf of the credential holder.
    #[instrument(skip_all, err, fields(from = %request.from, nonce = %request.nonce))]
    pub async fn relay(
        &self,
        credential: Option<&str>,
        request: ForwardRequest,
        signature: Bytes,
    ) -> Result<TxHash, RelayError> {
        let start = Instant::now();
        METRICS.relay_total.fetch_add(1, Ordering::Relaxed);

        let result = self.relay_inner(credential, request, signature).await;

        METRICS.record_relay_duration(start);
        match &result {
            Ok(handle) => {
                METRICS.relay_accepted.fetch_add(1, Ordering::Relaxed);
                info!(tx_hash = %handle, "Relay accepted");
            }
            Err(e) => {
                METRICS.relay_rejected.fetch_add(1, Ordering::Relaxed);
                if matches!(e, RelayError::NonceMismatch { .. }) {
                    METRICS.nonce_mismatches.fetch_add(1, Ordering::Relaxed);
                }
                if e.is_retryable() {
                    info!(kind = e.kind(), "Relay rejected (retryable)");
                } else {
                    warn!(kind = e.kind(), "Relay rejected");
                }
            }
        }
        result
    }

    async fn relay_inner(
        &self,
        credential: Option<&str>,
        request: ForwardRequest,
        signature: Bytes,
    ) -> Result<TxHash, RelayError> {
        let identity = self
            .authenticator
            .authenticate(credential, &self.required_roles)?;
        let verified = self.verifier.verify(request, signature).await?;
        self.submitter.submit(&verified, &identity).await
    }

    pub async fn status(&self, handle: TxHash) -> Result<RelayStatus, RelayError> {
        self.submitter.poll_status(handle).await
    }

    /// Explicit retry of a dropped or reverted relay.
    pub async fn retry(
        &self,
        credential: Option<&str>,
        handle: TxHash,
    ) -> Result<TxHash, RelayError> {
        let identity = self
            .authenticator
            .authenticate(credential, &self.required_roles)?;
        self.submitter.retry(handle, &identity).await
    }
}
