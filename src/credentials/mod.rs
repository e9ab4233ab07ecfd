//! Encryption of long-lived credentials at rest.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       CredentialCipher                   │
//! │  - Holds the process-wide master key     │
//! │  - encrypt / decrypt opaque secrets      │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//!    (encrypt)            (decrypt)
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       Encryption Module                  │
//! │  - PBKDF2-HMAC-SHA256 (100k iterations)  │
//! │  - AES-256-GCM, 16-byte IV               │
//! │  - Fresh salt + IV per call              │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use geosource::credentials::CredentialCipher;
//!
//! # fn main() -> Result<(), geosource::credentials::CipherError> {
//! let cipher = CredentialCipher::new(std::env::var("GEOSOURCE_ENCRYPTION_KEY").unwrap_or_default())?;
//! let blob = cipher.encrypt("1//0refresh-token")?;
//! assert_eq!(cipher.decrypt(&blob)?, "1//0refresh-token");
//! # Ok(())
//! # }
//! ```
//!
//! # Security
//!
//! - The master key is configuration only; it is never persisted next to
//!   the blobs it protects
//! - Blobs carry their own salt and IV, so they are opaque single strings
//! - Tampering or a wrong key fails closed with [`CipherError::Decryption`]

mod encryption;

pub use encryption::{decrypt, encrypt, CipherError};

/// Encrypts and decrypts secrets under one master key.
#[derive(Clone)]
pub struct CredentialCipher {
    master_key: String,
}

impl CredentialCipher {
    /// Creates a cipher. Fails with [`CipherError::InvalidKey`] on an empty key.
    pub fn new(master_key: impl Into<String>) -> Result<Self, CipherError> {
        let master_key = master_key.into();
        if master_key.is_empty() {
            return Err(CipherError::InvalidKey);
        }
        Ok(Self { master_key })
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, CipherError> {
        encryption::encrypt(plaintext, &self.master_key)
    }

    pub fn decrypt(&self, blob: &str) -> Result<String, CipherError> {
        encryption::decrypt(blob, &self.master_key)
    }
}

impl std::fmt::Debug for CredentialCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialCipher")
            .field("master_key", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cipher_roundtrip() {
        let cipher = CredentialCipher::new("master").unwrap();
        let blob = cipher.encrypt("token").unwrap();
        assert_eq!(cipher.decrypt(&blob).unwrap(), "token");
    }

    #[test]
    fn test_empty_key_rejected() {
        assert_eq!(CredentialCipher::new("").unwrap_err(), CipherError::InvalidKey);
    }

    #[test]
    fn test_debug_redacts_key() {
        let cipher = CredentialCipher::new("super-secret-master").unwrap();
        let rendered = format!("{:?}", cipher);
        assert!(!rendered.contains("super-secret-master"));
    }
}
