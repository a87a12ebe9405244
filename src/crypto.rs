use argon2::{Algorithm, Argon2, Params, Version};
use base64::Engine;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::models::{KdfSpec, SealedBlob};

pub const KEY_LEN: usize = 32;
pub const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    pub m_cost: u32,
    pub t_cost: u32,
    pub p_cost: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            m_cost: 19 * 1024,
            t_cost: 2,
            p_cost: 1,
        }
    }
}

impl From<KdfParams> for KdfSpec {
    fn from(p: KdfParams) -> Self {
        KdfSpec {
            m_cost: p.m_cost,
            t_cost: p.t_cost,
            p_cost: p.p_cost,
        }
    }
}

impl From<KdfSpec> for KdfParams {
    fn from(s: KdfSpec) -> Self {
        KdfParams {
            m_cost: s.m_cost,
            t_cost: s.t_cost,
            p_cost: s.p_cost,
        }
    }
}

pub fn random_bytes<const N: usize>() -> Zeroizing<[u8; N]> {
    let mut bytes = Zeroizing::new([0u8; N]);
    OsRng.fill_bytes(&mut *bytes);
    bytes
}

/// Derives the key-encryption key for an identity secret with Argon2id.
pub fn derive_key(
    secret: &[u8],
    salt: &[u8],
    params: KdfParams,
) -> Result<Zeroizing<[u8; KEY_LEN]>, CryptoError> {
    let params = Params::new(params.m_cost, params.t_cost, params.p_cost, Some(KEY_LEN))
        .map_err(|e| CryptoError::Params(e.to_string()))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    argon2
        .hash_password_into(secret, salt, &mut *key)
        .map_err(|e| CryptoError::Derivation(e.to_string()))?;
    Ok(key)
}

pub fn seal(key: &[u8; KEY_LEN], plaintext: &[u8]) -> Result<SealedBlob, CryptoError> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|_| CryptoError::Cipher)?;

    Ok(SealedBlob {
        nonce: encode(&nonce_bytes),
        data: encode(&ciphertext),
    })
}

pub fn open(key: &[u8; KEY_LEN], blob: &SealedBlob) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let nonce_bytes = decode(&blob.nonce)?;
    let ciphertext = decode(&blob.data)?;
    if nonce_bytes.len() != NONCE_LEN {
        return Err(CryptoError::Cipher);
    }

    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    cipher
        .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
        .map(Zeroizing::new)
        .map_err(|_| CryptoError::Cipher)
}

pub fn encode(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

pub fn decode(text: &str) -> Result<Vec<u8>, CryptoError> {
    Ok(base64::engine::general_purpose::STANDARD.decode(text)?)
}

#[cfg(test)]
pub(crate) const TEST_KDF: KdfParams = KdfParams {
    m_cost: 1024,
    t_cost: 1,
    p_cost: 1,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_then_open_with_same_key() {
        let key = random_bytes::<KEY_LEN>();
        let blob = seal(&key, b"hello").unwrap();
        assert_eq!(open(&key, &blob).unwrap().as_slice(), b"hello");
    }

    #[test]
    fn open_with_wrong_key_fails() {
        let key = random_bytes::<KEY_LEN>();
        let other = random_bytes::<KEY_LEN>();
        let blob = seal(&key, b"hello").unwrap();
        assert!(matches!(open(&other, &blob), Err(CryptoError::Cipher)));
    }

    #[test]
    fn tampered_ciphertext_is_rejected() {
        let key = random_bytes::<KEY_LEN>();
        let mut blob = seal(&key, b"hello").unwrap();
        let mut raw = decode(&blob.data).unwrap();
        raw[0] ^= 0xff;
        blob.data = encode(&raw);
        assert!(open(&key, &blob).is_err());
    }

    #[test]
    fn short_nonce_is_rejected_without_panicking() {
        let key = random_bytes::<KEY_LEN>();
        let mut blob = seal(&key, b"hello").unwrap();
        blob.nonce = encode(&[1, 2, 3]);
        assert!(matches!(open(&key, &blob), Err(CryptoError::Cipher)));
    }

    #[test]
    fn derivation_is_deterministic_per_salt() {
        let a = derive_key(b"secret", b"0123456789abcdef", TEST_KDF).unwrap();
        let b = derive_key(b"secret", b"0123456789abcdef", TEST_KDF).unwrap();
        let c = derive_key(b"secret", b"fedcba9876543210", TEST_KDF).unwrap();
        assert_eq!(*a, *b);
        assert_ne!(*a, *c);
    }
}
