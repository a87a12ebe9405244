use crate::error::StoreError;
use crate::keystore::KeyStore;
use crate::models::Configuration;
use crate::storage::CipherStore;
use crate::tracker::ChangeTracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The working set matched the baseline; nothing was written.
    NoOp,
    Committed,
}

/// Persists the tracker's committed list if it differs from the baseline.
///
/// Store errors are returned as-is. The tracker is only read, so a caller can
/// retry or discard after a failure.
pub fn commit<K: KeyStore>(
    store: &CipherStore<K>,
    config: &Configuration,
    tracker: &ChangeTracker,
) -> Result<CommitOutcome, StoreError> {
    if !tracker.has_changes() {
        tracing::debug!("no changes to commit");
        return Ok(CommitOutcome::NoOp);
    }

    let records = tracker.committed_list();
    let summary = tracker.summary();
    tracing::info!(
        new = summary.new,
        modified = summary.modified,
        deleted = summary.deleted,
        "committing changes"
    );
    match store.save(config, &records) {
        Ok(()) => Ok(CommitOutcome::Committed),
        Err(e) => {
            tracing::warn!(error = %e, "commit failed; previous file left in place");
            Err(e)
        }
    }
}
