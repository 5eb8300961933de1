//! Passphrase-based encryption of secret maps
//!
//! A vault file is a JSON document:
//!
//! ```json
//! {"kdf": "argon2id", "params": {...}, "salt": "...", "nonce": "...", "ciphertext": "..."}
//! ```
//!
//! The key is derived from the passphrase with Argon2id over a fresh random
//! salt, and the payload (a JSON object of dotted secret name to value) is
//! sealed with AES-256-GCM under a fresh random nonce on every write.

use std::collections::BTreeMap;
use std::path::Path;

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm,
};
use argon2::{Algorithm, Argon2, Params, Version};
use base64::{engine::general_purpose, Engine as _};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{SecretsError, SecretsResult};

/// Name recorded in the `kdf` field of vault files
pub const KDF_NAME: &str = "argon2id";

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;

/// Argon2id cost parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB
    pub memory_kib: u32,
    /// Number of passes
    pub iterations: u32,
    /// Degree of parallelism
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 65536,
            iterations: 3,
            parallelism: 4,
        }
    }
}

impl KdfParams {
    /// Minimal cost parameters, only suitable for tests
    pub fn light() -> Self {
        Self {
            memory_kib: 64,
            iterations: 1,
            parallelism: 1,
        }
    }
}

/// On-disk vault representation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultFile {
    /// Key derivation function name
    pub kdf: String,
    /// Key derivation cost used for this file
    #[serde(default)]
    pub params: KdfParams,
    /// Base64-encoded salt
    pub salt: String,
    /// Base64-encoded nonce
    pub nonce: String,
    /// Base64-encoded AES-GCM ciphertext
    pub ciphertext: String,
}

impl VaultFile {
    /// Read and parse a vault file
    pub fn load(path: &Path) -> SecretsResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| SecretsError::io(path, e))?;
        serde_json::from_str(&raw).map_err(|e| SecretsError::malformed(path, e.to_string()))
    }

    /// Write the vault file atomically
    pub fn save(&self, path: &Path) -> SecretsResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        sigil_common::write_atomic(path, json.as_bytes()).map_err(|e| SecretsError::io(path, e))
    }
}

/// Seals and opens secret maps with a passphrase
pub struct Vault {
    passphrase: String,
    params: KdfParams,
}

impl Vault {
    /// Create a vault cipher for the given passphrase
    pub fn new(passphrase: impl Into<String>, params: KdfParams) -> Self {
        Self {
            passphrase: passphrase.into(),
            params,
        }
    }

    /// Encrypt a secret map into a fresh vault file
    pub fn seal(&self, entries: &BTreeMap<String, String>) -> SecretsResult<VaultFile> {
        let salt = generate_salt();
        let nonce = generate_nonce();
        let key = derive_key(&self.passphrase, &salt, &self.params)?;

        let payload = serde_json::to_vec(entries)?;
        let cipher = Aes256Gcm::new(&key.into());
        let ciphertext = cipher
            .encrypt(aes_gcm::Nonce::from_slice(&nonce), payload.as_ref())
            .map_err(|e| SecretsError::Encryption {
                message: e.to_string(),
            })?;

        Ok(VaultFile {
            kdf: KDF_NAME.to_string(),
            params: self.params,
            salt: general_purpose::STANDARD.encode(salt),
            nonce: general_purpose::STANDARD.encode(nonce),
            ciphertext: general_purpose::STANDARD.encode(ciphertext),
        })
    }

    /// Decrypt a vault file into its secret map
    ///
    /// `origin` is only used to label errors.
    pub fn open(&self, file: &VaultFile, origin: &Path) -> SecretsResult<BTreeMap<String, String>> {
        if file.kdf != KDF_NAME {
            return Err(SecretsError::malformed(
                origin,
                format!("unsupported kdf '{}'", file.kdf),
            ));
        }

        let decode = |field: &str, value: &str| {
            general_purpose::STANDARD
                .decode(value)
                .map_err(|e| SecretsError::malformed(origin, format!("{}: {}", field, e)))
        };
        let salt = decode("salt", &file.salt)?;
        let nonce = decode("nonce", &file.nonce)?;
        let ciphertext = decode("ciphertext", &file.ciphertext)?;

        if nonce.len() != NONCE_LEN {
            return Err(SecretsError::malformed(
                origin,
                format!("nonce must be {} bytes, got {}", NONCE_LEN, nonce.len()),
            ));
        }

        let key = derive_key(&self.passphrase, &salt, &file.params)?;
        let cipher = Aes256Gcm::new(&key.into());
        let plaintext = cipher
            .decrypt(aes_gcm::Nonce::from_slice(&nonce), ciphertext.as_ref())
            .map_err(|e| SecretsError::Decryption {
                message: e.to_string(),
            })?;

        let text = String::from_utf8(plaintext)?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Derive a 32-byte key from a passphrase using Argon2id
fn derive_key(passphrase: &str, salt: &[u8], params: &KdfParams) -> SecretsResult<[u8; 32]> {
    let params = Params::new(
        params.memory_kib,
        params.iterations,
        params.parallelism,
        Some(32),
    )
    .map_err(|e| SecretsError::KeyDerivation {
        message: e.to_string(),
    })?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = [0u8; 32];
    argon2
        .hash_password_into(passphrase.as_bytes(), salt, &mut key)
        .map_err(|e| SecretsError::KeyDerivation {
            message: e.to_string(),
        })?;

    Ok(key)
}

fn generate_salt() -> [u8; SALT_LEN] {
    let mut bytes = [0u8; SALT_LEN];
    rand::thread_rng().fill(&mut bytes);
    bytes
}

fn generate_nonce() -> [u8; NONCE_LEN] {
    let mut bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill(&mut bytes);
    bytes
}
