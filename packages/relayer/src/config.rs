//! Relayer configuration.
//!
//! Loaded from an optional `relayer.{toml,json,yaml}` file, then `RELAYER_*`
//! environment variables. The raw [`Config`] is checked once at startup by
//! [`Config::validate`]; nothing downstream sees an unvalidated value.

use alloy::primitives::{Address, U256};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::auth::RequiredRoles;
use crate::error::RelayError;
use crate::forwarder::ForwarderDomain;
use crate::gas::GasPolicy;
use crate::verifier::RequestLimits;

/// Raw configuration as deserialized from file and environment.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub forwarder_address: Option<Address>,
    pub target_registry_address: Option<Address>,
    pub chain_id: Option<u64>,
    pub relay_endpoint: Option<String>,
    pub required_role_for_relay: Option<String>,
    pub credential_issuer: Option<Address>,

    #[serde(default)]
    pub fallback_rpc_url: Option<String>,

    #[serde(default)]
    pub operator_key_path: Option<String>,

    /// Create and save a fresh operator key when `operator_key_path` does not exist yet.
    #[serde(default)]
    pub generate_operator_key: bool,

    #[serde(default = "defaults::bind_address")]
    pub bind_address: String,

    #[serde(default = "defaults::gas_limit")]
    pub gas_limit: u64,

    /// Wei.
    #[serde(default = "defaults::max_fee_per_gas")]
    pub max_fee_per_gas: u64,

    /// Wei.
    #[serde(default = "defaults::max_priority_fee_per_gas")]
    pub max_priority_fee_per_gas: u64,

    #[serde(default = "defaults::forwarder_gas_overhead")]
    pub forwarder_gas_overhead: u64,

    #[serde(default = "defaults::forwarder_domain_name")]
    pub forwarder_domain_name: String,

    #[serde(default = "defaults::forwarder_domain_version")]
    pub forwarder_domain_version: String,

    #[serde(default = "defaults::max_calldata_bytes")]
    pub max_calldata_bytes: usize,

    #[serde(default)]
    pub allow_zero_target: bool,

    /// Most wei a request may forward from the operator's balance.
    #[serde(default)]
    pub max_request_value_wei: u64,

    /// Only relay calls to `target_registry_address`.
    #[serde(default = "defaults::restrict_targets")]
    pub restrict_targets: bool,

    #[serde(default = "defaults::nonce_lookup_timeout_ms")]
    pub nonce_lookup_timeout_ms: u64,

    #[serde(default = "defaults::status_poll_timeout_ms")]
    pub status_poll_timeout_ms: u64,

    #[serde(default = "defaults::confirmation_timeout_secs")]
    pub confirmation_timeout_secs: u64,

    #[serde(default = "defaults::credential_leeway_secs")]
    pub credential_leeway_secs: u64,

    #[serde(default = "defaults::attempt_retention_secs")]
    pub attempt_retention_secs: u64,

    #[serde(default = "defaults::sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            forwarder_address: None,
            target_registry_address: None,
            chain_id: None,
            relay_endpoint: None,
            required_role_for_relay: None,
            credential_issuer: None,
            fallback_rpc_url: None,
            operator_key_path: None,
            generate_operator_key: false,
            bind_address: defaults::bind_address(),
            gas_limit: defaults::gas_limit(),
            max_fee_per_gas: defaults::max_fee_per_gas(),
            max_priority_fee_per_gas: defaults::max_priority_fee_per_gas(),
            forwarder_gas_overhead: defaults::forwarder_gas_overhead(),
            forwarder_domain_name: defaults::forwarder_domain_name(),
            forwarder_domain_version: defaults::forwarder_domain_version(),
            max_calldata_bytes: defaults::max_calldata_bytes(),
            allow_zero_target: false,
            max_request_value_wei: 0,
            restrict_targets: defaults::restrict_targets(),
            nonce_lookup_timeout_ms: defaults::nonce_lookup_timeout_ms(),
            status_poll_timeout_ms: defaults::status_poll_timeout_ms(),
            confirmation_timeout_secs: defaults::confirmation_timeout_secs(),
            credential_leeway_secs: defaults::credential_leeway_secs(),
            attempt_retention_secs: defaults::attempt_retention_secs(),
            sweep_interval_secs: defaults::sweep_interval_secs(),
        }
    }
}

/// Validated settings the service runs with.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub bind_address: String,
    pub relay_endpoint: String,
    pub fallback_rpc_url: String,
    pub domain: ForwarderDomain,
    pub target_registry: Address,
    pub required_roles: RequiredRoles,
    pub credential_issuer: Address,
    pub credential_leeway: Duration,
    pub gas: GasPolicy,
    pub limits: RequestLimits,
    pub nonce_lookup_timeout: Duration,
    pub status_poll_timeout: Duration,
    pub confirmation_timeout: Duration,
    pub attempt_retention: Duration,
    pub sweep_interval: Duration,
    pub operator_key_path: Option<PathBuf>,
    pub generate_operator_key: bool,
}

impl Config {
    /// Read `relayer.*` (optional) and `RELAYER_*` environment variables.
    pub fn load() -> Result<Self, RelayError> {
        config::Config::builder()
            .add_source(config::File::with_name("relayer").required(false))
            .add_source(config::Environment::with_prefix("RELAYER"))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| RelayError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<RelaySettings, RelayError> {
        let forwarder = required(self.forwarder_address, "forwarder_address")?;
        let target_registry = required(self.target_registry_address, "target_registry_address")?;
        let chain_id = required(self.chain_id, "chain_id")?;
        let relay_endpoint = required(self.relay_endpoint.clone(), "relay_endpoint")?;
        let roles = required(self.required_role_for_relay.clone(), "required_role_for_relay")?;
        let credential_issuer = required(self.credential_issuer, "credential_issuer")?;

        if forwarder == Address::ZERO {
            return Err(invalid("forwarder_address", "must not be the zero address"));
        }
        if target_registry == Address::ZERO {
            return Err(invalid("target_registry_address", "must not be the zero address"));
        }
        if credential_issuer == Address::ZERO {
            return Err(invalid("credential_issuer", "must not be the zero address"));
        }
        if chain_id == 0 {
            return Err(invalid("chain_id", "must be non-zero"));
        }
        check_url(&relay_endpoint, "relay_endpoint")?;
        let fallback_rpc_url = match &self.fallback_rpc_url {
            Some(url) if !url.trim().is_empty() => {
                check_url(url, "fallback_rpc_url")?;
                url.clone()
            }
            _ => relay_endpoint.clone(),
        };

        let required_roles = RequiredRoles::parse(&roles)
            .map_err(|e| invalid("required_role_for_relay", &e.to_string()))?;

        if self.gas_limit == 0 {
            return Err(invalid("gas_limit", "must be non-zero"));
        }
        if self.forwarder_gas_overhead >= self.gas_limit {
            return Err(invalid(
                "forwarder_gas_overhead",
                "must be below gas_limit",
            ));
        }
        if self.max_fee_per_gas == 0 {
            return Err(invalid("max_fee_per_gas", "must be non-zero"));
        }
        if self.max_priority_fee_per_gas > self.max_fee_per_gas {
            return Err(invalid(
                "max_priority_fee_per_gas",
                "must not exceed max_fee_per_gas",
            ));
        }
        if self.max_calldata_bytes == 0 {
            return Err(invalid("max_calldata_bytes", "must be non-zero"));
        }
        for (name, value) in [
            ("nonce_lookup_timeout_ms", self.nonce_lookup_timeout_ms),
            ("status_poll_timeout_ms", self.status_poll_timeout_ms),
            ("confirmation_timeout_secs", self.confirmation_timeout_secs),
            ("attempt_retention_secs", self.attempt_retention_secs),
            ("sweep_interval_secs", self.sweep_interval_secs),
        ] {
            if value == 0 {
                return Err(invalid(name, "must be greater than zero"));
            }
        }

        Ok(RelaySettings {
            bind_address: self.bind_address.clone(),
            relay_endpoint,
            fallback_rpc_url,
            domain: ForwarderDomain {
                name: self.forwarder_domain_name.clone(),
                version: self.forwarder_domain_version.clone(),
                chain_id,
                forwarder,
            },
            target_registry,
            required_roles,
            credential_issuer,
            credential_leeway: Duration::from_secs(self.credential_leeway_secs),
            gas: GasPolicy {
                gas_limit: self.gas_limit,
                max_fee_per_gas: u128::from(self.max_fee_per_gas),
                max_priority_fee_per_gas: u128::from(self.max_priority_fee_per_gas),
                forwarder_overhead: self.forwarder_gas_overhead,
            },
            limits: RequestLimits {
                max_calldata_bytes: self.max_calldata_bytes,
                allow_zero_target: self.allow_zero_target,
                max_value: U256::from(self.max_request_value_wei),
                allowed_targets: if self.restrict_targets {
                    vec![target_registry]
                } else {
                    vec![]
                },
            },
            nonce_lookup_timeout: Duration::from_millis(self.nonce_lookup_timeout_ms),
            status_poll_timeout: Duration::from_millis(self.status_poll_timeout_ms),
            confirmation_timeout: Duration::from_secs(self.confirmation_timeout_secs),
            attempt_retention: Duration::from_secs(self.attempt_retention_secs),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
            operator_key_path: self
                .operator_key_path
                .as_deref()
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from),
            generate_operator_key: self.generate_operator_key,
        })
    }
}

fn required<T>(value: Option<T>, name: &str) -> Result<T, RelayError> {
    value.ok_or_else(|| RelayError::Config(format!("missing required setting `{name}`")))
}

fn invalid(name: &str, why: &str) -> RelayError {
    RelayError::Config(format!("invalid setting `{name}`: {why}"))
}

fn check_url(url: &str, name: &str) -> Result<(), RelayError> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(invalid(name, "must be an http(s) URL"))
    }
}

mod defaults {
    pub fn bind_address() -> String {
        "0.0.0.0:3040".into()
    }

    pub fn gas_limit() -> u64 {
        500_000
    }

    pub fn max_fee_per_gas() -> u64 {
        100_000_000_000
    }

    pub fn max_priority_fee_per_gas() -> u64 {
        2_000_000_000
    }

    pub fn forwarder_gas_overhead() -> u64 {
        50_000
    }

    pub fn forwarder_domain_name() -> String {
        "MinimalForwarder".into()
    }

    pub fn forwarder_domain_version() -> String {
        "0.0.1".into()
    }

    pub fn max_calldata_bytes() -> usize {
        32 * 1024
    }

    pub fn restrict_targets() -> bool {
        true
    }

    pub fn nonce_lookup_timeout_ms() -> u64 {
        3_000
    }

    pub fn status_poll_timeout_ms() -> u64 {
        3_000
    }

    pub fn confirmation_timeout_secs() -> u64 {
        180
    }

    pub fn credential_leeway_secs() -> u64 {
        30
    }

    pub fn attempt_retention_secs() -> u64 {
        3_600
    }

    pub fn sweep_interval_secs() -> u64 {
        5
    }
}
