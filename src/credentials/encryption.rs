//! AES-256-GCM encryption for stored secrets with a password-derived key.
//!
//! Each call derives a fresh key with PBKDF2-HMAC-SHA256 over a random salt,
//! then encrypts under a random 16-byte IV. The blob layout is
//! `salt(64) || iv(16) || ciphertext || tag(16)`, base64-encoded.

use aes_gcm::{
    aead::{consts::U16, Aead, KeyInit},
    aes::Aes256,
    AesGcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use pbkdf2::pbkdf2_hmac;
use rand::{rngs::OsRng, RngCore};
use sha2::Sha256;
use thiserror::Error;

/// AES-256-GCM with a 128-bit IV.
type Aes256Gcm16 = AesGcm<Aes256, U16>;

/// Size of the derived key in bytes (256 bits)
const KEY_SIZE: usize = 32;

/// Size of the PBKDF2 salt in bytes
const SALT_SIZE: usize = 64;

/// Size of the initialization vector in bytes
const IV_SIZE: usize = 16;

/// Size of the GCM authentication tag in bytes
const TAG_SIZE: usize = 16;

/// PBKDF2 iteration count
const PBKDF2_ITERATIONS: u32 = 100_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CipherError {
    #[error("master key must not be empty")]
    InvalidKey,
    #[error("encryption failed")]
    Encryption,
    /// Bad base64, truncated blob, wrong key or failed tag check.
    #[error("decryption failed")]
    Decryption,
}

fn derive_key(master_key: &str, salt: &[u8]) -> [u8; KEY_SIZE] {
    let mut key = [0u8; KEY_SIZE];
    pbkdf2_hmac::<Sha256>(master_key.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key);
    key
}

/// Encrypts plaintext into a self-contained base64 blob.
///
/// # Arguments
/// * `plaintext` - Secret to protect (e.g., an OAuth refresh token)
/// * `master_key` - Process-wide master password
///
/// # Security
/// - Salt and IV are drawn from the OS RNG on every call, so encrypting the
///   same plaintext twice never yields the same blob
/// - Authenticated encryption (tampering detected on decrypt)
pub fn encrypt(plaintext: &str, master_key: &str) -> Result<String, CipherError> {
    if master_key.is_empty() {
        return Err(CipherError::InvalidKey);
    }

    let mut salt = [0u8; SALT_SIZE];
    OsRng.fill_bytes(&mut salt);
    let mut iv = [0u8; IV_SIZE];
    OsRng.fill_bytes(&mut iv);

    let key = derive_key(master_key, &salt);
    let cipher = Aes256Gcm16::new_from_slice(&key).map_err(|_| CipherError::Encryption)?;

    let ciphertext = cipher
        .encrypt(Nonce::<U16>::from_slice(&iv), plaintext.as_bytes())
        .map_err(|_| CipherError::Encryption)?;

    let mut blob = Vec::with_capacity(SALT_SIZE + IV_SIZE + ciphertext.len());
    blob.extend_from_slice(&salt);
    blob.extend_from_slice(&iv);
    blob.extend_from_slice(&ciphertext);

    Ok(BASE64.encode(blob))
}

/// Decrypts a blob produced by [`encrypt`].
///
/// Fails closed: any malformed input, wrong key or modified byte yields
/// [`CipherError::Decryption`] and no plaintext.
pub fn decrypt(blob: &str, master_key: &str) -> Result<String, CipherError> {
    if master_key.is_empty() {
        return Err(CipherError::InvalidKey);
    }

    let bytes = BASE64.decode(blob).map_err(|_| CipherError::Decryption)?;
    if bytes.len() < SALT_SIZE + IV_SIZE + TAG_SIZE {
        return Err(CipherError::Decryption);
    }

    let (salt, rest) = bytes.split_at(SALT_SIZE);
    let (iv, ciphertext) = rest.split_at(IV_SIZE);

    let key = derive_key(master_key, salt);
    let cipher = Aes256Gcm16::new_from_slice(&key).map_err(|_| CipherError::Decryption)?;

    let plaintext = cipher
        .decrypt(Nonce::<U16>::from_slice(iv), ciphertext)
        .map_err(|_| CipherError::Decryption)?;

    String::from_utf8(plaintext).map_err(|_| CipherError::Decryption)
}
