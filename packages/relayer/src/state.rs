//! Application state shared across handlers.

use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use std::path::Path;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::auth::Authenticator;
use crate::chain::ForwarderChain;
use crate::config::RelaySettings;
use crate::error::RelayError;
use crate::key_store::{parse_hex_key, KeyStore};
use crate::relay::Relayer;
use crate::rpc::RpcClient;
use crate::signer::OperatorSigner;
use crate::submitter::{Submitter, SubmitterSettings};
use crate::verifier::Verifier;

/// Shared application state.
pub struct AppState<C: ?Sized> {
    pub relayer: Relayer<C>,
    pub chain: Arc<C>,
    pub chain_id: u64,
    pub forwarder: Address,
    pub start_time: Instant,
    pub request_count: AtomicU64,
}

impl<C: ForwarderChain + ?Sized> AppState<C> {
    /// Wire the relay pipeline over `chain` with an already-synced operator signer.
    pub fn new(settings: &RelaySettings, chain: Arc<C>, signer: OperatorSigner) -> Self {
        let verifier = Verifier::new(
            settings.domain.clone(),
            settings.gas,
            settings.limits.clone(),
            Arc::clone(&chain),
            settings.nonce_lookup_timeout,
        );
        let submitter = Arc::new(Submitter::new(
            Arc::clone(&chain),
            signer,
            SubmitterSettings {
                forwarder: settings.domain.forwarder,
                gas: settings.gas,
                nonce_lookup_timeout: settings.nonce_lookup_timeout,
                status_poll_timeout: settings.status_poll_timeout,
                confirmation_timeout: settings.confirmation_timeout,
                attempt_retention: settings.attempt_retention,
            },
        ));
        let relayer = Relayer::new(
            Authenticator::new(settings.credential_issuer, settings.credential_leeway),
            settings.required_roles.clone(),
            verifier,
            submitter,
        );

        Self {
            relayer,
            chain,
            chain_id: settings.domain.chain_id,
            forwarder: settings.domain.forwarder,
            start_time: Instant::now(),
            request_count: AtomicU64::new(0),
        }
    }

    pub fn submitter(&self) -> &Arc<Submitter<C>> {
        self.relayer.submitter()
    }

    /// Confirm the network is the one the forwarder domain was configured for
    /// and build an operator signer starting at the chain's pending count.
    pub async fn sync_operator(
        settings: &RelaySettings,
        chain: &C,
        key: PrivateKeySigner,
    ) -> Result<OperatorSigner, RelayError> {
        let network_chain_id = chain.chain_id().await?;
        if network_chain_id != settings.domain.chain_id {
            return Err(RelayError::Config(format!(
                "network chain id {network_chain_id} does not match configured chain_id {}",
                settings.domain.chain_id
            )));
        }
        let start_nonce = chain.operator_nonce(key.address()).await?;
        info!(operator = %key.address(), start_nonce, "Operator nonce synced");
        Ok(OperatorSigner::new(key, network_chain_id, start_nonce))
    }
}

impl AppState<RpcClient> {
    /// Production wiring: RPC client, operator key, chain checks.
    pub async fn connect(settings: &RelaySettings) -> Result<Self, RelayError> {
        let key = load_operator_key(settings)?;
        info!(operator = %key.address(), "Loaded operator key");

        let rpc = Arc::new(RpcClient::new(
            &settings.relay_endpoint,
            &settings.fallback_rpc_url,
            settings.domain.forwarder,
        )?);
        let signer = Self::sync_operator(settings, &rpc, key).await?;
        Ok(Self::new(settings, rpc, signer))
    }
}

/// `RELAYER_OPERATOR_KEY` first, then the configured key file
/// (decrypted with `RELAYER_KEYSTORE_KEY` when set).
pub fn load_operator_key(settings: &RelaySettings) -> Result<PrivateKeySigner, RelayError> {
    if let Ok(hex_key) = std::env::var("RELAYER_OPERATOR_KEY") {
        if !hex_key.trim().is_empty() {
            return parse_hex_key(&hex_key);
        }
    }

    let path = settings.operator_key_path.clone().ok_or_else(|| {
        RelayError::Config(
            "no operator key: set RELAYER_OPERATOR_KEY or operator_key_path".into(),
        )
    })?;
    let store = match std::env::var("RELAYER_KEYSTORE_KEY") {
        Ok(key_b64) if !key_b64.trim().is_empty() => {
            KeyStore::new_encrypted(path.clone(), key_b64.trim())?
        }
        _ => KeyStore::new_plaintext(path.clone()),
    };
    load_or_generate(&store, &path, settings.generate_operator_key)
}

fn load_or_generate(
    store: &KeyStore,
    path: &Path,
    generate: bool,
) -> Result<PrivateKeySigner, RelayError> {
    if path.exists() || !generate {
        return store.load();
    }
    let key = PrivateKeySigner::random();
    store.save(&key)?;
    warn!(
        operator = %key.address(),
        path = %path.display(),
        "Generated a new operator key; fund it before relaying"
    );
    Ok(key)
}
