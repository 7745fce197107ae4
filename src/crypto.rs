//! Crypto utilities — SHA-256 key hashing and AES-256-GCM secret encryption.
//!
//! Stored secrets (`Connection.api_key`, `VirtualKey.key`) are encrypted with
//! a key derived from `ENCRYPTION_KEY`. The derivation is intentionally weak:
//! if the configured key is shorter than 32 bytes it is right-padded with a
//! fixed literal rather than run through a KDF. This is a known, documented
//! weakness carried forward from the source design (see DESIGN.md) rather
//! than a bug — operators are expected to supply a full 32-byte key.

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const FIXED_PAD: &str = "llm-proxy-secret-encryption-key-32b";

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("ciphertext is not valid base64")]
    InvalidBase64,
    #[error("ciphertext too short")]
    TooShort,
    #[error("decryption failed — wrong key or corrupted data")]
    AuthFailed,
}

/// SHA-256 of the UTF-8 bytes of `s`, lowercase hex. Deterministic.
pub fn hash_key(s: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    hex::encode(hasher.finalize())
}

/// Derive the effective 32-byte key from the configured `ENCRYPTION_KEY`.
///
/// Short keys are right-padded with a fixed literal; long keys are
/// truncated. Neither case is a secure KDF — see module docs.
fn derive_key(configured: &str) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    let bytes = configured.as_bytes();
    if bytes.len() >= KEY_LEN {
        key.copy_from_slice(&bytes[..KEY_LEN]);
    } else {
        key[..bytes.len()].copy_from_slice(bytes);
        let pad = FIXED_PAD.as_bytes();
        let remaining = KEY_LEN - bytes.len();
        key[bytes.len()..].copy_from_slice(&pad[..remaining.min(pad.len())]);
    }
    key
}

/// Encrypt `plaintext` under `encryption_key`, returning `base64(nonce || ciphertext)`.
/// Empty input returns empty output verbatim.
pub fn encrypt(plaintext: &[u8], encryption_key: &str) -> String {
    if plaintext.is_empty() {
        return String::new();
    }
    let key = derive_key(encryption_key);
    let cipher = Aes256Gcm::new_from_slice(&key).expect("key is exactly 32 bytes");

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .expect("AES-GCM encryption failed");

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    STANDARD.encode(out)
}

/// Inverse of [`encrypt`]. Empty input returns empty output verbatim.
pub fn decrypt(ciphertext_b64: &str, encryption_key: &str) -> Result<Vec<u8>, CryptoError> {
    if ciphertext_b64.is_empty() {
        return Ok(Vec::new());
    }
    let data = STANDARD
        .decode(ciphertext_b64)
        .map_err(|_| CryptoError::InvalidBase64)?;
    if data.len() < NONCE_LEN + 16 {
        return Err(CryptoError::TooShort);
    }

    let nonce = Nonce::from_slice(&data[..NONCE_LEN]);
    let ct = &data[NONCE_LEN..];

    let key = derive_key(encryption_key);
    let cipher = Aes256Gcm::new_from_slice(&key).expect("key is exactly 32 bytes");

    cipher
        .decrypt(nonce, ct)
        .map_err(|_| CryptoError::AuthFailed)
}
