// Key material for encryption identities.
//
// The record file is never encrypted with a secret directly: `CipherStore`
// stretches whatever a `KeyStore` hands back through Argon2id. Backends only
// answer "what is the secret for this identity".

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Mutex;

use zeroize::Zeroizing;

use crate::crypto::{decode, encode, random_bytes, KEY_LEN};
use crate::error::KeyStoreError;

const KEYRING_SERVICE: &str = "pwdmgr";

pub trait KeyStore {
    /// Secret bytes for `identity`. Implementations must not log them.
    fn secret(&self, identity: &str) -> Result<Zeroizing<Vec<u8>>, KeyStoreError>;
}

impl<K: KeyStore + ?Sized> KeyStore for Box<K> {
    fn secret(&self, identity: &str) -> Result<Zeroizing<Vec<u8>>, KeyStoreError> {
        (**self).secret(identity)
    }
}

/// Random per-identity secrets kept in the platform keyring.
pub struct KeyringKeyStore {
    service: String,
}

impl KeyringKeyStore {
    pub fn new() -> Self {
        Self {
            service: KEYRING_SERVICE.to_string(),
        }
    }

    pub fn with_service(service: &str) -> Self {
        Self {
            service: service.to_string(),
        }
    }

    fn entry(&self, identity: &str) -> Result<keyring::Entry, KeyStoreError> {
        keyring::Entry::new(&self.service, identity)
            .map_err(|e| KeyStoreError::Keyring(format!("failed to open keyring entry: {e}")))
    }

    pub fn has_secret(&self, identity: &str) -> Result<bool, KeyStoreError> {
        match self.entry(identity)?.get_password() {
            Ok(_) => Ok(true),
            Err(keyring::Error::NoEntry) => Ok(false),
            Err(e) => Err(KeyStoreError::Keyring(format!("keyring read error: {e}"))),
        }
    }

    /// Generates and stores a secret for `identity` unless one exists.
    /// Returns `true` when a new secret was created.
    pub fn provision(&self, identity: &str) -> Result<bool, KeyStoreError> {
        if self.has_secret(identity)? {
            tracing::debug!(identity, "keyring secret already present");
            return Ok(false);
        }
        let secret = random_bytes::<KEY_LEN>();
        let encoded = Zeroizing::new(encode(&*secret));
        self.entry(identity)?
            .set_password(&encoded)
            .map_err(|e| KeyStoreError::Keyring(format!("keyring write error: {e}")))?;
        tracing::info!(identity, "stored new secret in platform keyring");
        Ok(true)
    }

    pub fn remove(&self, identity: &str) -> Result<(), KeyStoreError> {
        match self.entry(identity)?.delete_password() {
            Ok(()) => {
                tracing::warn!(identity, "keyring secret deleted; files encrypted for it are unreadable");
                Ok(())
            }
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(KeyStoreError::Keyring(format!("keyring delete error: {e}"))),
        }
    }
}

impl Default for KeyringKeyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyStore for KeyringKeyStore {
    fn secret(&self, identity: &str) -> Result<Zeroizing<Vec<u8>>, KeyStoreError> {
        match self.entry(identity)?.get_password() {
            Ok(stored) => {
                let stored = Zeroizing::new(stored);
                let bytes = decode(&stored).map_err(|e| {
                    KeyStoreError::Keyring(format!("stored secret is not valid base64: {e}"))
                })?;
                Ok(Zeroizing::new(bytes))
            }
            Err(keyring::Error::NoEntry) => Err(KeyStoreError::MissingIdentity(identity.to_string())),
            Err(e) => Err(KeyStoreError::Keyring(format!("keyring read error: {e}"))),
        }
    }
}

type Prompt = Box<dyn Fn(&str) -> std::io::Result<String>>;

/// Asks for a passphrase on the terminal the first time a secret is needed
/// and reuses it for the rest of the process.
pub struct PassphraseKeyStore {
    prompt: Prompt,
    confirm: bool,
    cached: RefCell<Option<Zeroizing<String>>>,
}

impl PassphraseKeyStore {
    pub fn new() -> Self {
        Self::with_prompt(Box::new(|text: &str| rpassword::prompt_password(text)))
    }

    /// For a passphrase that is being set: it must be typed twice.
    pub fn confirming() -> Self {
        Self {
            confirm: true,
            ..Self::new()
        }
    }

    pub fn with_prompt(prompt: Prompt) -> Self {
        Self {
            prompt,
            confirm: false,
            cached: RefCell::new(None),
        }
    }

    pub fn require_confirmation(mut self) -> Self {
        self.confirm = true;
        self
    }

    pub fn confirms(&self) -> bool {
        self.confirm
    }

    fn ask(&self, text: &str) -> Result<Zeroizing<String>, KeyStoreError> {
        (self.prompt)(text)
            .map(Zeroizing::new)
            .map_err(|e| KeyStoreError::Prompt(e.to_string()))
    }
}

impl Default for PassphraseKeyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyStore for PassphraseKeyStore {
    fn secret(&self, identity: &str) -> Result<Zeroizing<Vec<u8>>, KeyStoreError> {
        let mut cached = self.cached.borrow_mut();
        if cached.is_none() {
            let entered = self.ask(&format!("Passphrase for {identity}: "))?;
            if entered.is_empty() {
                return Err(KeyStoreError::Prompt("empty passphrase".to_string()));
            }
            if self.confirm {
                let again = self.ask(&format!("Confirm passphrase for {identity}: "))?;
                if *again != *entered {
                    return Err(KeyStoreError::Prompt("passphrases do not match".to_string()));
                }
            }
            *cached = Some(entered);
        }
        let passphrase = cached
            .as_ref()
            .ok_or_else(|| KeyStoreError::Prompt("no passphrase".to_string()))?;
        Ok(Zeroizing::new(passphrase.as_bytes().to_vec()))
    }
}

/// Secrets held in process memory. Used by tests and by callers that manage
/// key material themselves.
#[derive(Default)]
pub struct MemoryKeyStore {
    secrets: Mutex<HashMap<String, Zeroizing<Vec<u8>>>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(identity: &str, secret: &[u8]) -> Self {
        let store = Self::new();
        store.insert(identity, secret);
        store
    }

    pub fn insert(&self, identity: &str, secret: &[u8]) {
        let mut guard = self.secrets.lock().unwrap_or_else(|e| e.into_inner());
        guard.insert(identity.to_string(), Zeroizing::new(secret.to_vec()));
    }

    pub fn remove(&self, identity: &str) {
        let mut guard = self.secrets.lock().unwrap_or_else(|e| e.into_inner());
        guard.remove(identity);
    }
}

impl KeyStore for MemoryKeyStore {
    fn secret(&self, identity: &str) -> Result<Zeroizing<Vec<u8>>, KeyStoreError> {
        let guard = self.secrets.lock().unwrap_or_else(|e| e.into_inner());
        guard
            .get(identity)
            .cloned()
            .ok_or_else(|| KeyStoreError::MissingIdentity(identity.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_returns_inserted_secret() {
        let store = MemoryKeyStore::with_secret("me@example.com", b"hunter2");
        assert_eq!(store.secret("me@example.com").unwrap().as_slice(), b"hunter2");
    }

    #[test]
    fn memory_store_unknown_identity_is_missing() {
        let store = MemoryKeyStore::new();
        assert!(matches!(
            store.secret("nobody"),
            Err(KeyStoreError::MissingIdentity(id)) if id == "nobody"
        ));
    }

    #[test]
    fn memory_store_remove_forgets_secret() {
        let store = MemoryKeyStore::with_secret("a", b"s");
        store.remove("a");
        assert!(store.secret("a").is_err());
    }

    fn scripted(answers: &[&str]) -> Prompt {
        let answers: Vec<String> = answers.iter().map(|a| a.to_string()).collect();
        let next = std::cell::Cell::new(0);
        Box::new(move |_: &str| {
            let i = next.get();
            next.set(i + 1);
            answers
                .get(i)
                .cloned()
                .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "no input"))
        })
    }

    #[test]
    fn passphrase_is_asked_once_and_cached() {
        let store = PassphraseKeyStore::with_prompt(scripted(&["pw"]));
        assert_eq!(store.secret("a").unwrap().as_slice(), b"pw");
        assert_eq!(store.secret("a").unwrap().as_slice(), b"pw");
    }

    #[test]
    fn new_passphrase_must_be_confirmed() {
        let store = PassphraseKeyStore::with_prompt(scripted(&["pw", "pw"])).require_confirmation();
        assert_eq!(store.secret("a").unwrap().as_slice(), b"pw");
    }

    #[test]
    fn mismatched_confirmation_is_rejected_and_nothing_cached() {
        let store =
            PassphraseKeyStore::with_prompt(scripted(&["pw", "typo", "pw", "pw"])).require_confirmation();
        assert!(matches!(store.secret("a"), Err(KeyStoreError::Prompt(_))));
        assert_eq!(store.secret("a").unwrap().as_slice(), b"pw");
    }

    #[test]
    fn empty_passphrase_is_rejected() {
        let store = PassphraseKeyStore::with_prompt(scripted(&[""]));
        assert!(matches!(store.secret("a"), Err(KeyStoreError::Prompt(_))));
    }

    #[test]
    fn boxed_store_delegates() {
        let store: Box<dyn KeyStore> = Box::new(MemoryKeyStore::with_secret("a", b"s"));
        assert_eq!(store.secret("a").unwrap().as_slice(), b"s");
    }
}
