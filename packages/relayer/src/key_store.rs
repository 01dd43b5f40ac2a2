//! Operator key loading: hex from the environment, or a key file that is
//! AES-256-GCM encrypted in production and plaintext for dev.

use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use std::path::PathBuf;
use tracing::info;

use crate::error::RelayError;

/// On-disk operator key file.
pub struct KeyStore {
    path: PathBuf,
    encryption_key: Option<[u8; 32]>,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct StoredKey {
    address: Address,
    secret_key: String,
}

impl KeyStore {
    pub fn new_plaintext(path: PathBuf) -> Self {
        Self {
            path,
            encryption_key: None,
        }
    }

    pub fn new_encrypted(path: PathBuf, key_b64: &str) -> Result<Self, RelayError> {
        let key_bytes = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, key_b64)
            .map_err(|e| RelayError::Config(format!("Invalid keystore key base64: {e}")))?;

        let key: [u8; 32] = key_bytes.as_slice().try_into().map_err(|_| {
            RelayError::Config(format!(
                "Keystore key must be 32 bytes, got {}",
                key_bytes.len()
            ))
        })?;

        Ok(Self {
            path,
            encryption_key: Some(key),
        })
    }

    pub fn save(&self, signer: &PrivateKeySigner) -> Result<(), RelayError> {
        let stored = StoredKey {
            address: signer.address(),
            secret_key: hex::encode(signer.to_bytes()),
        };

        let json = serde_json::to_vec_pretty(&stored)
            .map_err(|e| RelayError::Config(format!("Failed to serialize operator key: {e}")))?;

        let data = match &self.encryption_key {
            Some(key) => encrypt_aes256gcm(key, &json)?,
            None => json,
        };

        // tmp + rename so a crash never leaves a torn key file
        let tmp = self.path.with_extension("tmp");
        if let Some(parent) = tmp.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                RelayError::Config(format!("Failed to create key store directory: {e}"))
            })?;
        }
        std::fs::write(&tmp, &data)
            .map_err(|e| RelayError::Config(format!("Failed to write key store: {e}")))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| RelayError::Config(format!("Failed to rename key store: {e}")))?;

        info!(path = %self.path.display(), operator = %stored.address, "Operator key saved");
        Ok(())
    }

    pub fn load(&self) -> Result<PrivateKeySigner, RelayError> {
        let data = std::fs::read(&self.path).map_err(|e| {
            RelayError::Config(format!(
                "Failed to read operator key {}: {e}",
                self.path.display()
            ))
        })?;

        let json = match &self.encryption_key {
            Some(key) => decrypt_aes256gcm(key, &data)?,
            None => data,
        };

        let stored: StoredKey = serde_json::from_slice(&json)
            .map_err(|e| RelayError::Config(format!("Failed to parse operator key file: {e}")))?;

        let signer = parse_hex_key(&stored.secret_key)?;
        if signer.address() != stored.address {
            return Err(RelayError::Config(format!(
                "Operator key file address {} does not match its secret key ({})",
                stored.address,
                signer.address()
            )));
        }

        info!(path = %self.path.display(), operator = %stored.address, "Operator key loaded");
        Ok(signer)
    }
}

/// Parse a 32-byte secp256k1 secret, with or without `0x`.
pub fn parse_hex_key(hex_key: &str) -> Result<PrivateKeySigner, RelayError> {
    let trimmed = hex_key.trim();
    let raw = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    let bytes = hex::decode(raw)
        .map_err(|e| RelayError::Config(format!("Invalid operator key hex: {e}")))?;
    PrivateKeySigner::from_slice(&bytes)
        .map_err(|e| RelayError::Config(format!("Invalid operator key: {e}")))
}

fn encrypt_aes256gcm(key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>, RelayError> {
    use aes_gcm::aead::{Aead, KeyInit};
    use aes_gcm::{Aes256Gcm, Nonce};
    use rand::RngCore;

    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| RelayError::Config(format!("AES init failed: {e}")))?;

    let mut nonce_bytes = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| RelayError::Config(format!("Encryption failed: {e}")))?;

    // nonce || ciphertext
    let mut result = Vec::with_capacity(12 + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

fn decrypt_aes256gcm(key: &[u8; 32], data: &[u8]) -> Result<Vec<u8>, RelayError> {
    use aes_gcm::aead::{Aead, KeyInit};
    use aes_gcm::{Aes256Gcm, Nonce};

    if data.len() < 12 {
        return Err(RelayError::Config(
            "Encrypted key file too short (missing nonce)".into(),
        ));
    }

    let (nonce_bytes, ciphertext) = data.split_at(12);
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| RelayError::Config(format!("AES init failed: {e}")))?;

    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|e| RelayError::Config(format!("Decryption failed (wrong key?): {e}")))
}
