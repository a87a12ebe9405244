use std::path::PathBuf;

use chrono::Local;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// Attribute names of a [`Record`], in column order.
pub const ATTRIBUTES: [&str; 8] = [
    "label",
    "username",
    "password",
    "email",
    "url",
    "notes",
    "tags",
    "last_changed",
];

/// A single credential. Equality is by value over all eight attributes.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq, Hash, Zeroize)]
pub struct Record {
    pub label: String,
    pub username: String,
    pub password: String,
    pub email: String,
    pub url: String,
    pub notes: String,
    pub tags: String,
    pub last_changed: String,
}

impl Record {
    pub fn labelled(label: &str) -> Self {
        Self {
            label: label.to_string(),
            ..Self::default()
        }
    }

    pub fn get(&self, attribute: &str) -> Option<&str> {
        let value = match attribute {
            "label" => &self.label,
            "username" => &self.username,
            "password" => &self.password,
            "email" => &self.email,
            "url" => &self.url,
            "notes" => &self.notes,
            "tags" => &self.tags,
            "last_changed" => &self.last_changed,
            _ => return None,
        };
        Some(value.as_str())
    }

    /// Sets an attribute by name. Returns `false` for an unknown name.
    pub fn set(&mut self, attribute: &str, value: &str) -> bool {
        let slot = match attribute {
            "label" => &mut self.label,
            "username" => &mut self.username,
            "password" => &mut self.password,
            "email" => &mut self.email,
            "url" => &mut self.url,
            "notes" => &mut self.notes,
            "tags" => &mut self.tags,
            "last_changed" => &mut self.last_changed,
            _ => return false,
        };
        slot.zeroize();
        slot.push_str(value);
        true
    }

    /// Attribute values in [`ATTRIBUTES`] order.
    pub fn values(&self) -> [&str; 8] {
        [
            self.label.as_str(),
            self.username.as_str(),
            self.password.as_str(),
            self.email.as_str(),
            self.url.as_str(),
            self.notes.as_str(),
            self.tags.as_str(),
            self.last_changed.as_str(),
        ]
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> + '_ {
        self.tags.split(',').map(str::trim).filter(|t| !t.is_empty())
    }

    pub fn touch(&mut self) {
        self.last_changed = Local::now().format("%Y-%m-%d").to_string();
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum KeySource {
    #[default]
    Keyring,
    Passphrase,
}

/// Which identity encrypts the record file, and where the file lives.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Configuration {
    pub identity: String,
    pub path: PathBuf,
    #[serde(default)]
    pub key_source: KeySource,
}

impl Configuration {
    pub fn new(identity: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            identity: identity.into(),
            path: path.into(),
            key_source: KeySource::default(),
        }
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// Nonce and ciphertext of one AEAD-sealed payload, base64 encoded.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SealedBlob {
    pub nonce: String,
    pub data: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
pub struct KdfSpec {
    pub m_cost: u32,
    pub t_cost: u32,
    pub p_cost: u32,
}

/// On-disk layout of the encrypted record file.
#[derive(Serialize, Deserialize, Debug)]
pub struct CipherFile {
    pub version: u8,
    pub identity: String,
    pub kdf: KdfSpec,
    pub kdf_salt: String,
    pub wrapped_key: SealedBlob,
    pub records: SealedBlob,
}
