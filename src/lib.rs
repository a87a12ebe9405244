// pwdmgr: encrypted credential file with change tracking.
//
// `CipherStore` loads and saves the record file, `ChangeTracker` holds one
// editing session, and `commit` decides whether a session reaches disk.

pub mod app;
pub mod commit;
pub mod config;
pub mod crypto;
pub mod error;
pub mod generator;
pub mod keystore;
pub mod models;
pub mod storage;
pub mod tracker;

pub use commit::{commit, CommitOutcome};
pub use error::{KeyStoreError, StoreError};
pub use keystore::{KeyStore, KeyringKeyStore, MemoryKeyStore, PassphraseKeyStore};
pub use models::{Configuration, KeySource, Record, ATTRIBUTES};
pub use storage::{CipherStore, PendingWrite};
pub use tracker::{ChangeSummary, ChangeTracker, EntryId, Status, WorkingEntry};
