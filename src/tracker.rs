use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use zeroize::Zeroize;

use crate::models::Record;

static NEXT_TRACKER: AtomicU64 = AtomicU64::new(1);

/// Handle to an entry of a [`ChangeTracker`]'s working set. Stays valid for
/// the tracker's lifetime since entries are never removed, and is only
/// accepted by the tracker that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryId {
    tracker: u64,
    index: usize,
}

impl EntryId {
    /// Position in working-set order.
    pub fn index(self) -> usize {
        self.index
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Unchanged,
    New,
    Modified,
    Deleted,
}

impl Status {
    /// Single-character tag for listings.
    pub fn marker(self) -> char {
        match self {
            Status::Unchanged => ' ',
            Status::New => '+',
            Status::Modified => '~',
            Status::Deleted => '-',
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkingEntry {
    record: Record,
    slot: Option<usize>,
    deleted: bool,
}

impl WorkingEntry {
    pub fn record(&self) -> &Record {
        &self.record
    }

    /// Position of the baseline record this entry started from, `None` for
    /// entries created in this session.
    pub fn slot(&self) -> Option<usize> {
        self.slot
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeSummary {
    pub unchanged: usize,
    pub new: usize,
    pub modified: usize,
    pub deleted: usize,
}

impl ChangeSummary {
    pub fn is_clean(&self) -> bool {
        self.new == 0 && self.modified == 0 && self.deleted == 0
    }
}

/// Session state: the records as loaded, plus the working set the caller
/// edits. The baseline is never touched after construction; status is always
/// derived by comparing the two.
#[derive(Debug)]
pub struct ChangeTracker {
    token: u64,
    baseline: Vec<Record>,
    working: Vec<WorkingEntry>,
}

impl ChangeTracker {
    pub fn open(baseline: Vec<Record>) -> Self {
        let working = baseline
            .iter()
            .enumerate()
            .map(|(i, record)| WorkingEntry {
                record: record.clone(),
                slot: Some(i),
                deleted: false,
            })
            .collect();
        Self {
            token: NEXT_TRACKER.fetch_add(1, Ordering::Relaxed),
            baseline,
            working,
        }
    }

    fn issue(&self, index: usize) -> EntryId {
        EntryId {
            tracker: self.token,
            index,
        }
    }

    /// Working-set index for `id`, if this tracker issued it.
    fn resolve(&self, id: EntryId) -> Option<usize> {
        (id.tracker == self.token && id.index < self.working.len()).then_some(id.index)
    }

    pub fn baseline(&self) -> &[Record] {
        &self.baseline
    }

    pub fn len(&self) -> usize {
        self.working.len()
    }

    pub fn is_empty(&self) -> bool {
        self.working.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = (EntryId, &WorkingEntry)> + '_ {
        self.working.iter().enumerate().map(|(i, e)| (self.issue(i), e))
    }

    pub fn get(&self, id: EntryId) -> Option<&WorkingEntry> {
        self.working.get(self.resolve(id)?)
    }

    /// Id of the entry at `position` in working-set order.
    pub fn id_at(&self, position: usize) -> Option<EntryId> {
        (position < self.working.len()).then(|| self.issue(position))
    }

    pub fn add(&mut self, record: Record) -> EntryId {
        self.working.push(WorkingEntry {
            record,
            slot: None,
            deleted: false,
        });
        self.issue(self.working.len() - 1)
    }

    /// Replaces the entry's values, returning the previous ones.
    pub fn edit(&mut self, id: EntryId, record: Record) -> Option<Record> {
        let index = self.resolve(id)?;
        let entry = &mut self.working[index];
        Some(std::mem::replace(&mut entry.record, record))
    }

    /// Edits the entry's values in place.
    pub fn update<F>(&mut self, id: EntryId, f: F) -> Option<&Record>
    where
        F: FnOnce(&mut Record),
    {
        let index = self.resolve(id)?;
        let entry = &mut self.working[index];
        f(&mut entry.record);
        Some(&entry.record)
    }

    /// Flips the delete mark; returns the new mark.
    pub fn toggle_delete(&mut self, id: EntryId) -> Option<bool> {
        let index = self.resolve(id)?;
        let entry = &mut self.working[index];
        entry.deleted = !entry.deleted;
        Some(entry.deleted)
    }

    pub fn status(&self, id: EntryId) -> Option<Status> {
        self.get(id).map(|e| self.classify(e))
    }

    fn classify(&self, entry: &WorkingEntry) -> Status {
        if entry.deleted {
            return Status::Deleted;
        }
        match entry.slot {
            None => Status::New,
            Some(slot) if self.baseline[slot] == entry.record => Status::Unchanged,
            Some(_) => Status::Modified,
        }
    }

    fn live_records(&self) -> impl Iterator<Item = &Record> + '_ {
        self.working.iter().filter(|e| !e.deleted).map(|e| &e.record)
    }

    /// Records to persist: every entry not marked deleted, in working order.
    pub fn committed_list(&self) -> Vec<Record> {
        self.live_records().cloned().collect()
    }

    pub fn has_changes(&self) -> bool {
        !self.live_records().eq(self.baseline.iter())
    }

    pub fn summary(&self) -> ChangeSummary {
        let mut summary = ChangeSummary::default();
        for entry in &self.working {
            match self.classify(entry) {
                Status::Unchanged => summary.unchanged += 1,
                Status::New => summary.new += 1,
                Status::Modified => summary.modified += 1,
                Status::Deleted => summary.deleted += 1,
            }
        }
        summary
    }

    /// Entries with an attribute containing `query` (case-insensitive).
    /// With `modified_only`, unchanged entries are left out.
    pub fn filter(&self, query: &str, modified_only: bool) -> Vec<EntryId> {
        let needle = query.to_lowercase();
        self.entries()
            .filter(|(_, e)| !modified_only || self.classify(e) != Status::Unchanged)
            .filter(|(_, e)| {
                e.record
                    .values()
                    .iter()
                    .any(|v| v.to_lowercase().contains(&needle))
            })
            .map(|(id, _)| id)
            .collect()
    }

    /// Number of working entries carrying each tag.
    pub fn tag_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for entry in &self.working {
            for tag in entry.record.tags() {
                *counts.entry(tag.to_string()).or_insert(0) += 1;
            }
        }
        counts
    }
}

impl Drop for ChangeTracker {
    fn drop(&mut self) {
        for record in &mut self.baseline {
            record.zeroize();
        }
        for entry in &mut self.working {
            entry.record.zeroize();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(label: &str) -> Record {
        Record {
            label: label.to_string(),
            username: format!("{label}-user"),
            password: "secret".to_string(),
            ..Record::default()
        }
    }

    fn with_label(record: &Record, label: &str) -> Record {
        Record {
            label: label.to_string(),
            ..record.clone()
        }
    }

    fn tracker_ab() -> ChangeTracker {
        ChangeTracker::open(vec![rec("a"), rec("b")])
    }

    #[test]
    fn fresh_session_is_clean() {
        let t = tracker_ab();
        assert!(!t.has_changes());
        assert_eq!(t.committed_list(), vec![rec("a"), rec("b")]);
        for (id, entry) in t.entries() {
            assert_eq!(t.status(id), Some(Status::Unchanged));
            assert_eq!(entry.slot(), Some(id.index()));
        }
    }

    #[test]
    fn empty_baseline_has_no_changes_until_mutated() {
        let mut t = ChangeTracker::open(Vec::new());
        assert!(t.is_empty());
        assert!(!t.has_changes());
        let id = t.add(rec("x"));
        assert!(t.has_changes());
        assert_eq!(t.status(id), Some(Status::New));
    }

    #[test]
    fn edit_marks_modified_and_revert_restores_unchanged() {
        let mut t = tracker_ab();
        let a = t.id_at(0).unwrap();
        let original = t.get(a).unwrap().record().clone();

        let previous = t.edit(a, with_label(&original, "a2")).unwrap();
        assert_eq!(previous, original);
        assert_eq!(t.status(a), Some(Status::Modified));
        assert!(t.has_changes());

        t.edit(a, original);
        assert_eq!(t.status(a), Some(Status::Unchanged));
        assert!(!t.has_changes());
        assert_eq!(t.baseline(), &[rec("a"), rec("b")]);
    }

    #[test]
    fn update_edits_in_place() {
        let mut t = tracker_ab();
        let b = t.id_at(1).unwrap();
        let updated = t.update(b, |r| r.notes = "rotated".to_string()).unwrap();
        assert_eq!(updated.notes, "rotated");
        assert_eq!(t.status(b), Some(Status::Modified));
        assert_eq!(t.get(b).unwrap().slot(), Some(1));
    }

    #[test]
    fn toggle_delete_is_reversible() {
        let mut t = tracker_ab();
        let b = t.id_at(1).unwrap();
        assert_eq!(t.toggle_delete(b), Some(true));
        assert_eq!(t.status(b), Some(Status::Deleted));
        assert_eq!(t.committed_list(), vec![rec("a")]);
        assert!(t.has_changes());

        assert_eq!(t.toggle_delete(b), Some(false));
        assert_eq!(t.status(b), Some(Status::Unchanged));
        assert!(!t.has_changes());
    }

    #[test]
    fn deleted_wins_over_modified() {
        let mut t = tracker_ab();
        let a = t.id_at(0).unwrap();
        t.update(a, |r| r.label = "changed".to_string());
        t.toggle_delete(a);
        assert_eq!(t.status(a), Some(Status::Deleted));
        assert_eq!(t.committed_list(), vec![rec("b")]);
    }

    #[test]
    fn new_then_deleted_never_reaches_commit() {
        let mut t = tracker_ab();
        let c = t.add(rec("c"));
        t.toggle_delete(c);
        assert_eq!(t.status(c), Some(Status::Deleted));
        assert_eq!(t.committed_list(), vec![rec("a"), rec("b")]);
        assert!(!t.has_changes());
    }

    #[test]
    fn delete_and_re_add_same_value_in_place_is_no_change() {
        // Structural comparison: the committed list equals the baseline even
        // though the entries backing it differ.
        let mut t = ChangeTracker::open(vec![rec("a")]);
        let a = t.id_at(0).unwrap();
        t.toggle_delete(a);
        let again = t.add(rec("a"));
        assert_eq!(t.status(again), Some(Status::New));
        assert!(!t.has_changes());
    }

    #[test]
    fn reorder_by_delete_and_add_is_a_change() {
        let mut t = tracker_ab();
        let a = t.id_at(0).unwrap();
        t.toggle_delete(a);
        t.add(rec("a"));
        assert_eq!(t.committed_list(), vec![rec("b"), rec("a")]);
        assert!(t.has_changes());
    }

    #[test]
    fn scenario_edit_add_delete() {
        let mut t = tracker_ab();
        let a = t.id_at(0).unwrap();
        let b = t.id_at(1).unwrap();
        t.update(a, |r| r.label = "a2".to_string());
        let c = t.add(rec("c"));
        t.toggle_delete(b);

        assert_eq!(t.committed_list(), vec![with_label(&rec("a"), "a2"), rec("c")]);
        assert!(t.has_changes());
        assert_eq!(
            t.summary(),
            ChangeSummary {
                unchanged: 0,
                new: 1,
                modified: 1,
                deleted: 1
            }
        );
        assert_eq!(t.status(c), Some(Status::New));
        assert_eq!(t.get(c).unwrap().slot(), None);
    }

    #[test]
    fn unknown_id_is_rejected() {
        let mut other = ChangeTracker::open(vec![rec("a"), rec("b"), rec("c")]);
        let foreign = other.add(rec("d"));
        let mut t = tracker_ab();
        assert_eq!(t.status(foreign), None);
        assert_eq!(t.toggle_delete(foreign), None);
        assert!(t.edit(foreign, rec("x")).is_none());
        assert!(t.id_at(2).is_none());
        assert!(!t.has_changes());
    }

    #[test]
    fn in_range_id_from_another_tracker_is_rejected() {
        let other = ChangeTracker::open(vec![rec("x")]);
        let foreign = other.id_at(0).unwrap();
        let mut t = tracker_ab();

        assert!(t.get(foreign).is_none());
        assert_eq!(t.status(foreign), None);
        assert_eq!(t.toggle_delete(foreign), None);
        assert!(t.edit(foreign, rec("y")).is_none());
        assert!(t.update(foreign, |r| r.label = "z".to_string()).is_none());

        assert_eq!(t.committed_list(), vec![rec("a"), rec("b")]);
        assert!(!t.has_changes());
        assert_ne!(foreign, t.id_at(0).unwrap());
    }

    #[test]
    fn filter_matches_any_attribute_case_insensitively() {
        let mut t = tracker_ab();
        let b = t.id_at(1).unwrap();
        t.update(b, |r| r.url = "https://Example.org".to_string());
        assert_eq!(t.filter("EXAMPLE", false), vec![b]);
        assert_eq!(t.filter("user", false).len(), 2);
        assert_eq!(t.filter("", false).len(), 2);
    }

    #[test]
    fn filter_modified_only_hides_unchanged() {
        let mut t = tracker_ab();
        let a = t.id_at(0).unwrap();
        t.toggle_delete(a);
        let c = t.add(rec("c"));
        assert_eq!(t.filter("", true), vec![a, c]);
    }

    #[test]
    fn marker_projects_status() {
        let markers: String = [Status::Unchanged, Status::New, Status::Modified, Status::Deleted]
            .iter()
            .map(|s| s.marker())
            .collect();
        assert_eq!(markers, " +~-");
    }

    #[test]
    fn tag_counts_over_working_set() {
        let mut t = tracker_ab();
        let a = t.id_at(0).unwrap();
        t.update(a, |r| r.tags = "work, mail".to_string());
        t.add(Record {
            tags: "mail".to_string(),
            ..rec("c")
        });
        let counts = t.tag_counts();
        assert_eq!(counts.get("mail"), Some(&2));
        assert_eq!(counts.get("work"), Some(&1));
        assert_eq!(counts.len(), 2);
    }
}
