//! Reads of the forwarder's per-sender nonce.
//!
//! The value is advisory: another submission can consume it between the read
//! and the relay's own send. The forwarder remains the only authority.

use alloy::primitives::{Address, U256};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::chain::ForwarderChain;
use crate::error::{ChainError, RelayError};

pub struct NonceLedger<C: ?Sized> {
    chain: Arc<C>,
    timeout: Duration,
}

impl<C: ForwarderChain + ?Sized> NonceLedger<C> {
    pub fn new(chain: Arc<C>, timeout: Duration) -> Self {
        Self { chain, timeout }
    }

    /// The nonce the forwarder expects next from `address`.
    ///
    /// Never cached and never guessed; any failure or timeout surfaces as
    /// `NonceLookupFailed`.
    pub async fn current_nonce(&self, address: Address) -> Result<U256, RelayError> {
        let read = tokio::time::timeout(self.timeout, self.chain.get_nonce(address))
            .await
            .unwrap_or(Err(ChainError::Timeout(self.timeout)));

        match read {
            Ok(nonce) => {
                debug!(from = %address, %nonce, "Forwarder nonce read");
                Ok(nonce)
            }
            Err(e) => Err(RelayError::NonceLookupFailed {
                from: address,
                reason: e.to_string(),
            }),
        }
    }
}
