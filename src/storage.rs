use std::fs;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use tempfile::NamedTempFile;
use zeroize::Zeroizing;

use crate::crypto::{self, KdfParams, KEY_LEN, SALT_LEN};
use crate::error::{CryptoError, StoreError};
use crate::keystore::KeyStore;
use crate::models::{CipherFile, Configuration, Record};

const FORMAT_VERSION: u8 = 1;
const BACKUP_EXT: &str = "bak";

/// Encrypted-at-rest record file, bound to a key store.
pub struct CipherStore<K: KeyStore> {
    keys: K,
    kdf: KdfParams,
}

impl<K: KeyStore> CipherStore<K> {
    pub fn new(keys: K) -> Self {
        Self {
            keys,
            kdf: KdfParams::default(),
        }
    }

    pub fn with_kdf_params(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }

    pub fn keys(&self) -> &K {
        &self.keys
    }

    pub fn load(&self, config: &Configuration) -> Result<Vec<Record>, StoreError> {
        let raw = match fs::read(&config.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(config.path.clone()));
            }
            Err(e) => return Err(StoreError::Io(e)),
        };
        let file: CipherFile = serde_json::from_slice(&raw)
            .map_err(|e| StoreError::DecryptionFailed(format!("unreadable envelope: {e}")))?;
        if file.version != FORMAT_VERSION {
            return Err(StoreError::DecryptionFailed(format!(
                "unsupported file format version: {}",
                file.version
            )));
        }
        if file.identity != config.identity {
            return Err(StoreError::DecryptionFailed(format!(
                "file is encrypted for '{}', not '{}'",
                file.identity, config.identity
            )));
        }

        let secret = self
            .keys
            .secret(&config.identity)
            .map_err(|e| StoreError::DecryptionFailed(e.to_string()))?;
        let salt = crypto::decode(&file.kdf_salt).map_err(decryption_failed)?;
        let kek = crypto::derive_key(&secret, &salt, file.kdf.into()).map_err(decryption_failed)?;
        let dek = crypto::open(&kek, &file.wrapped_key).map_err(decryption_failed)?;
        let dek: Zeroizing<[u8; KEY_LEN]> = Zeroizing::new(
            dek.as_slice()
                .try_into()
                .map_err(|_| StoreError::DecryptionFailed("wrapped key has invalid length".to_string()))?,
        );
        let plaintext = crypto::open(&dek, &file.records).map_err(decryption_failed)?;

        let records: Vec<Record> = serde_json::from_slice(&plaintext)
            .map_err(|e| StoreError::MalformedData(e.to_string()))?;
        tracing::debug!(path = %config.path.display(), count = records.len(), "loaded record file");
        Ok(records)
    }

    /// Like [`load`](Self::load), but a missing file is an empty list.
    pub fn load_or_empty(&self, config: &Configuration) -> Result<Vec<Record>, StoreError> {
        match self.load(config) {
            Err(StoreError::NotFound(path)) => {
                tracing::info!(path = %path.display(), "no record file yet, starting empty");
                Ok(Vec::new())
            }
            other => other,
        }
    }

    pub fn save(&self, config: &Configuration, records: &[Record]) -> Result<(), StoreError> {
        self.stage(config, records)?.finish()
    }

    /// Encrypts `records`, backs up the current file and writes the new
    /// content next to it. Nothing replaces `config.path` until
    /// [`PendingWrite::finish`] is called.
    pub fn stage(&self, config: &Configuration, records: &[Record]) -> Result<PendingWrite, StoreError> {
        let sealed = self.seal(config, records)?;

        let parent = parent_dir(&config.path)?;
        if !parent.exists() {
            fs::create_dir_all(&parent)?;
            restrict_dir(&parent)?;
        }

        let backup = if config.path.exists() {
            let stamp = Utc::now().format("%Y%m%dT%H%M%S").to_string();
            let backup = create_backup(&config.path, &stamp)?;
            tracing::debug!(backup = %backup.display(), "backed up record file");
            Some(backup)
        } else {
            None
        };

        let mut temp = NamedTempFile::new_in(&parent)?;
        temp.write_all(sealed.as_bytes())?;
        temp.flush()?;
        temp.as_file().sync_all()?;
        restrict_file(temp.path())?;

        Ok(PendingWrite {
            target: config.path.clone(),
            backup,
            temp,
            count: records.len(),
        })
    }

    fn seal(&self, config: &Configuration, records: &[Record]) -> Result<String, StoreError> {
        let plaintext = Zeroizing::new(
            serde_json::to_vec(records).map_err(|e| StoreError::EncryptionFailed(e.to_string()))?,
        );
        let secret = self
            .keys
            .secret(&config.identity)
            .map_err(|e| StoreError::EncryptionFailed(e.to_string()))?;

        let salt = crypto::random_bytes::<SALT_LEN>();
        let kek = crypto::derive_key(&secret, &*salt, self.kdf).map_err(encryption_failed)?;
        let dek = crypto::random_bytes::<KEY_LEN>();
        let wrapped_key = crypto::seal(&kek, &*dek).map_err(encryption_failed)?;
        let sealed_records = crypto::seal(&dek, &plaintext).map_err(encryption_failed)?;

        let file = CipherFile {
            version: FORMAT_VERSION,
            identity: config.identity.clone(),
            kdf: self.kdf.into(),
            kdf_salt: crypto::encode(&*salt),
            wrapped_key,
            records: sealed_records,
        };
        serde_json::to_string_pretty(&file).map_err(|e| StoreError::EncryptionFailed(e.to_string()))
    }

    /// Backups of `config.path`, oldest first.
    pub fn backups(&self, config: &Configuration) -> Result<Vec<PathBuf>, StoreError> {
        list_backups(&config.path)
    }
}

/// A fully written replacement that has not yet been moved into place.
/// Dropping it removes the temporary file and leaves the target untouched.
#[derive(Debug)]
pub struct PendingWrite {
    target: PathBuf,
    backup: Option<PathBuf>,
    temp: NamedTempFile,
    count: usize,
}

impl PendingWrite {
    pub fn backup_path(&self) -> Option<&Path> {
        self.backup.as_deref()
    }

    pub fn temp_path(&self) -> &Path {
        self.temp.path()
    }

    pub fn finish(self) -> Result<(), StoreError> {
        self.temp.persist(&self.target).map_err(|e| StoreError::Io(e.error))?;
        tracing::info!(path = %self.target.display(), count = self.count, "saved record file");
        Ok(())
    }
}

fn decryption_failed(e: CryptoError) -> StoreError {
    StoreError::DecryptionFailed(e.to_string())
}

fn encryption_failed(e: CryptoError) -> StoreError {
    StoreError::EncryptionFailed(e.to_string())
}

fn parent_dir(path: &Path) -> Result<PathBuf, StoreError> {
    match path.parent() {
        Some(p) if p.as_os_str().is_empty() => Ok(PathBuf::from(".")),
        Some(p) => Ok(p.to_path_buf()),
        None => Err(StoreError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid record file path: {}", path.display()),
        ))),
    }
}

fn file_name(path: &Path) -> Result<String, StoreError> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| {
            StoreError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("record file path has no file name: {}", path.display()),
            ))
        })
}

/// Copies `path` to `<name>.<stamp>.bak`, appending `-N` until a name can be
/// created. Existing backups are never opened for writing.
fn create_backup(path: &Path, stamp: &str) -> Result<PathBuf, StoreError> {
    let parent = parent_dir(path)?;
    let name = file_name(path)?;
    let mut source = File::open(path)?;
    let mut n = 0u32;
    loop {
        let candidate = if n == 0 {
            parent.join(format!("{name}.{stamp}.{BACKUP_EXT}"))
        } else {
            parent.join(format!("{name}.{stamp}-{n}.{BACKUP_EXT}"))
        };
        match OpenOptions::new().write(true).create_new(true).open(&candidate) {
            Ok(mut backup) => {
                restrict_file(&candidate)?;
                io::copy(&mut source, &mut backup)?;
                backup.sync_all()?;
                return Ok(candidate);
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => n += 1,
            Err(e) => return Err(StoreError::Io(e)),
        }
    }
}

fn list_backups(path: &Path) -> Result<Vec<PathBuf>, StoreError> {
    let parent = parent_dir(path)?;
    if !parent.exists() {
        return Ok(Vec::new());
    }
    let prefix = format!("{}.", file_name(path)?);
    let suffix = format!(".{BACKUP_EXT}");
    let mut found = Vec::new();
    for entry in fs::read_dir(&parent)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(&prefix) && name.ends_with(&suffix) {
            found.push(entry.path());
        }
    }
    found.sort_by_key(|p| backup_order_key(p, prefix.len(), suffix.len()));
    Ok(found)
}

// Timestamp then collision counter, so "-10" sorts after "-9".
fn backup_order_key(path: &Path, prefix_len: usize, suffix_len: usize) -> (String, u32) {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let middle = name
        .get(prefix_len..name.len().saturating_sub(suffix_len))
        .unwrap_or_default();
    match middle.split_once('-') {
        Some((stamp, n)) => (stamp.to_string(), n.parse().unwrap_or(0)),
        None => (middle.to_string(), 0),
    }
}

pub(crate) fn restrict_file(path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if path.exists() {
            fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
        }
    }
    Ok(())
}

pub(crate) fn restrict_dir(path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if path.exists() {
            fs::set_permissions(path, fs::Permissions::from_mode(0o700))?;
        }
    }
    Ok(())
}
