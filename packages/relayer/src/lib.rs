//! # Forwarder Relayer
//!
//! Gasless meta-transaction relay for EIP-712 trusted forwarders. A caller
//! presents a role credential and a `ForwardRequest` signed by its sender; the
//! relay checks the credential, the signature and the forwarder nonce, then
//! submits `forwarder.execute(request, signature)` from its own funded
//! operator account and tracks the outcome.
//!
//! ## Quick Start
//! ```bash
//! RELAYER_FORWARDER_ADDRESS=0x… RELAYER_TARGET_REGISTRY_ADDRESS=0x… \
//! RELAYER_CHAIN_ID=31337 RELAYER_RELAY_ENDPOINT=http://127.0.0.1:8545 \
//! RELAYER_REQUIRED_ROLE_FOR_RELAY=user RELAYER_CREDENTIAL_ISSUER=0x… \
//! RELAYER_OPERATOR_KEY=0x… cargo run --bin relayer
//! ```
//!
//! ## Endpoints
//! - `POST /relay` - Relay a signed forward request
//! - `GET /relay/{handle}` - Relay status (`pending`, `confirmed`, `reverted`, `dropped`)
//! - `POST /relay/{handle}/retry` - Resubmit a dropped or reverted relay
//! - `GET /health`, `GET /ready`, `GET /metrics`

pub mod auth;
pub mod chain;
pub mod config;
mod error;
pub mod forwarder;
pub mod gas;
mod handlers;
pub mod key_store;
pub mod metrics;
mod middleware;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod nonce;
pub mod relay;
mod response;
mod router;
pub mod rpc;
mod schemas;
pub mod signer;
mod state;
pub mod submitter;
pub mod verifier;

pub use config::{Config, RelaySettings};
pub use error::{ChainError, RelayError};
pub use router::create as create_router;
pub use state::{load_operator_key, AppState};
