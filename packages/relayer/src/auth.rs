//! Role authentication for bearer credentials.
//!
//! A credential is `base64url(claims) "." base64url(signature)` where the
//! signature is an EIP-191 personal-message signature by the configured issuer
//! over the raw claims bytes. The relay only verifies credentials; it never
//! issues or stores them.

use alloy::primitives::{Address, Signature};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::RelayError;

/// Authorization role carried by a credential.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Role {
    User,
    Operator,
    Admin,
    /// A label this build does not know. Never satisfies a requirement.
    Unknown(String),
}

impl Role {
    pub fn as_str(&self) -> &str {
        match self {
            Role::User => "user",
            Role::Operator => "operator",
            Role::Admin => "admin",
            Role::Unknown(label) => label,
        }
    }
}

impl FromStr for Role {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "user" => Role::User,
            "operator" => Role::Operator,
            "admin" => Role::Admin,
            _ => Role::Unknown(s.trim().to_string()),
        })
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Non-empty set of known roles accepted by an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequiredRoles(BTreeSet<Role>);

impl RequiredRoles {
    pub fn new(roles: impl IntoIterator<Item = Role>) -> Result<Self, RelayError> {
        let roles: BTreeSet<Role> = roles.into_iter().collect();
        if roles.is_empty() {
            return Err(RelayError::Config("required role set is empty".into()));
        }
        if let Some(Role::Unknown(label)) = roles.iter().find(|r| matches!(r, Role::Unknown(_))) {
            return Err(RelayError::Config(format!("unknown role {label:?}")));
        }
        Ok(Self(roles))
    }

    /// Parse a comma-separated role list, e.g. `"user,admin"`.
    pub fn parse(list: &str) -> Result<Self, RelayError> {
        Self::new(
            list.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| Role::from_str(s).unwrap_or_else(|never| match never {})),
        )
    }

    pub fn contains(&self, role: &Role) -> bool {
        self.0.contains(role)
    }

    pub fn to_vec(&self) -> Vec<Role> {
        self.0.iter().cloned().collect()
    }
}

/// Authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: String,
    pub address: Address,
    pub role: Role,
}

/// Signed claims inside a credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub address: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Expiry, unix seconds.
    pub exp: u64,
}

/// Verifies credentials issued by a single trusted issuer.
#[derive(Debug, Clone)]
pub struct Authenticator {
    issuer: Address,
    leeway: Duration,
}

impl Authenticator {
    pub fn new(issuer: Address, leeway: Duration) -> Self {
        Self { issuer, leeway }
    }

    pub fn authenticate(
        &self,
        credential: Option<&str>,
        required: &RequiredRoles,
    ) -> Result<Identity, RelayError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        self.authenticate_at(credential, required, now)
    }

    pub fn authenticate_at(
        &self,
        credential: Option<&str>,
        required: &RequiredRoles,
        now_secs: u64,
    ) -> Result<Identity, RelayError> {
        let credential = credential
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| RelayError::Unauthenticated("missing credential".into()))?;

        let (claims_b64, sig_b64) = credential
            .split_once('.')
            .ok_or_else(|| RelayError::Unauthenticated("malformed credential".into()))?;
        let claims_bytes = URL_SAFE_NO_PAD
            .decode(claims_b64)
            .map_err(|_| RelayError::Unauthenticated("malformed credential claims".into()))?;
        let sig_bytes = URL_SAFE_NO_PAD
            .decode(sig_b64)
            .map_err(|_| RelayError::Unauthenticated("malformed credential signature".into()))?;
        let signature = Signature::try_from(sig_bytes.as_slice())
            .map_err(|_| RelayError::Unauthenticated("malformed credential signature".into()))?;
        let claims: Claims = serde_json::from_slice(&claims_bytes)
            .map_err(|_| RelayError::Unauthenticated("malformed credential claims".into()))?;

        let signer = signature
            .recover_address_from_msg(&claims_bytes)
            .map_err(|_| RelayError::InvalidCredential("signature recovery failed".into()))?;
        if signer != self.issuer {
            return Err(RelayError::InvalidCredential(
                "credential not signed by trusted issuer".into(),
            ));
        }
        if claims.exp.saturating_add(self.leeway.as_secs()) < now_secs {
            return Err(RelayError::InvalidCredential("credential expired".into()));
        }

        let role = claims
            .role
            .as_deref()
            .filter(|r| !r.trim().is_empty())
            .map(|r| Role::from_str(r).unwrap_or_else(|never| match never {}))
            .ok_or(RelayError::RoleMissing)?;

        if !required.contains(&role) {
            return Err(RelayError::InsufficientRole {
                required: required.to_vec(),
                actual: role,
            });
        }

        Ok(Identity {
            id: claims.sub,
            address: claims.address,
            role,
        })
    }
}

/// Mint a credential the way the external issuer does. Test tooling only.
#[cfg(any(test, feature = "test-util"))]
pub fn issue_credential(
    issuer: &alloy::signers::local::PrivateKeySigner,
    claims: &Claims,
) -> String {
    use alloy::signers::SignerSync;

    let claims_bytes = serde_json::to_vec(claims).unwrap_or_default();
    let signature = issuer
        .sign_message_sync(&claims_bytes)
        .map(|s| s.as_bytes().to_vec())
        .unwrap_or_default();
    format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(claims_bytes),
        URL_SAFE_NO_PAD.encode(signature)
    )
}
