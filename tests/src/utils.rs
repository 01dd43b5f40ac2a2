//! Shared fixtures: a relay wired to the in-memory forwarder.

use alloy::primitives::{address, Address, Bytes, U256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;
use anyhow::Result;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use forwarder_relayer::auth::{issue_credential, Claims, Role};
use forwarder_relayer::forwarder::ForwardRequest;
use forwarder_relayer::mock::MockChain;
use forwarder_relayer::signer::OperatorSigner;
use forwarder_relayer::{create_router, AppState, Config, RelaySettings};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

pub const REGISTRY: Address = address!("0xe7f1725E7734CE288F8367e1Bb143E90bb3F0512");

pub struct TestRelay {
    pub chain: Arc<MockChain>,
    pub state: Arc<AppState<MockChain>>,
    pub issuer: PrivateKeySigner,
    pub settings: RelaySettings,
}

pub fn settings(configure: impl FnOnce(&mut Config)) -> Result<RelaySettings> {
    let chain = MockChain::new();
    let mut cfg = Config {
        forwarder_address: Some(chain.domain().forwarder),
        target_registry_address: Some(REGISTRY),
        chain_id: Some(chain.domain().chain_id),
        relay_endpoint: Some("http://127.0.0.1:8545".into()),
        required_role_for_relay: Some("user,admin".into()),
        credential_issuer: Some(Address::ZERO),
        ..Config::default()
    };
    configure(&mut cfg);
    Ok(cfg.validate()?)
}

pub async fn setup_relay(configure: impl FnOnce(&mut Config)) -> Result<TestRelay> {
    let issuer = PrivateKeySigner::random();
    let settings = settings(|cfg| {
        cfg.credential_issuer = Some(issuer.address());
        configure(cfg);
    })?;
    TestRelay::start(issuer, settings).await
}

impl TestRelay {
    /// Fresh in-memory chain and operator for already-validated settings.
    pub async fn start(issuer: PrivateKeySigner, settings: RelaySettings) -> Result<Self> {
        let chain = Arc::new(MockChain::with_domain(settings.domain.clone()));
        let signer: OperatorSigner =
            AppState::sync_operator(&settings, chain.as_ref(), PrivateKeySigner::random()).await?;
        let state = Arc::new(AppState::new(&settings, Arc::clone(&chain), signer));
        Ok(Self {
            chain,
            state,
            issuer,
            settings,
        })
    }

    pub fn router(&self) -> Router {
        create_router(Arc::clone(&self.state))
    }

    pub fn credential(&self, subject: &str, address: Address, role: Option<Role>) -> String {
        issue_credential(
            &self.issuer,
            &Claims {
                sub: subject.into(),
                address,
                role: role.map(|r| r.as_str().to_string()),
                exp: now_secs() + 600,
            },
        )
    }

    /// Alice's canonical request: `{to: Registry, value: 0, gas: 100000, data: 0xabc123}`.
    pub fn request(&self, from: Address, nonce: u64) -> ForwardRequest {
        ForwardRequest {
            from,
            to: REGISTRY,
            value: U256::ZERO,
            gas: 100_000,
            nonce: U256::from(nonce),
            data: Bytes::from_static(&[0xab, 0xc1, 0x23]),
        }
    }

    pub fn sign(&self, key: &PrivateKeySigner, request: &ForwardRequest) -> Result<Bytes> {
        let hash = self.settings.domain.signing_hash(request);
        Ok(Bytes::from(key.sign_hash_sync(&hash)?.as_bytes().to_vec()))
    }
}

pub fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Send one request through the router and decode the JSON response.
pub async fn call(app: Router, request: Request<Body>) -> Result<(StatusCode, Value)> {
    let response = app.oneshot(request).await?;
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    Ok((status, body))
}

pub fn post_json(uri: &str, body: &Value, bearer: Option<&str>) -> Result<Request<Body>> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = bearer {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    Ok(builder.body(Body::from(serde_json::to_vec(body)?))?)
}

pub fn get(uri: &str) -> Result<Request<Body>> {
    Ok(Request::builder().uri(uri).body(Body::empty())?)
}
