// Error types for the persistence layer.
//
// `StoreError` is the only error a session ever sees; key-store and cipher
// failures are folded into it by `CipherStore`.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("No record file at {}", .0.display())]
    NotFound(PathBuf),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Record file is malformed: {0}")]
    MalformedData(String),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

#[derive(Debug, Error)]
pub enum KeyStoreError {
    #[error("Keyring error: {0}")]
    Keyring(String),

    #[error("No key material for identity '{0}'")]
    MissingIdentity(String),

    #[error("Passphrase prompt failed: {0}")]
    Prompt(String),
}

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid Argon2 params: {0}")]
    Params(String),

    #[error("Key derivation failed: {0}")]
    Derivation(String),

    #[error("Invalid base64 field: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("Cipher operation failed")]
    Cipher,
}
