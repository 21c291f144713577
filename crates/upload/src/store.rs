//! Ordered collection of tracked files.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::types::{FileRecord, Uid, UploadStatus};

/// Issues uids as `<creation timestamp in ms> + <counter>`.
///
/// The timestamp is taken once, so ids stay distinct and increasing no
/// matter how fast they are requested.
#[derive(Debug)]
pub struct UidGenerator {
    base: u64,
    counter: AtomicU64,
}

impl Default for UidGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl UidGenerator {
    pub fn new() -> Self {
        let base = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self::with_base(base)
    }

    /// Starts issuing ids right after `base`.
    pub fn with_base(base: u64) -> Self {
        Self {
            base,
            counter: AtomicU64::new(0),
        }
    }

    pub fn next_id(&self) -> Uid {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        self.base.wrapping_add(n)
    }
}

/// Insertion-ordered file records.
///
/// Mutations on unknown uids are no-ops: a record may be removed while its
/// transfer is still reporting.
#[derive(Debug, Default)]
pub struct FileStore {
    records: Vec<FileRecord>,
    ids: UidGenerator,
}

impl FileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ids(ids: UidGenerator) -> Self {
        Self {
            records: Vec::new(),
            ids,
        }
    }

    /// Returns a uid not used by any record in the store.
    pub fn create_id(&self) -> Uid {
        loop {
            let uid = self.ids.next_id();
            if !self.contains(uid) {
                return uid;
            }
        }
    }

    pub fn add(&mut self, record: FileRecord) {
        self.records.push(record);
    }

    pub fn remove(&mut self, uid: Uid) -> Option<FileRecord> {
        let index = self.records.iter().position(|r| r.uid == uid)?;
        Some(self.records.remove(index))
    }

    /// Applies `f` to the record with `uid`. Returns `false` if there is none.
    pub fn update(&mut self, uid: Uid, f: impl FnOnce(&mut FileRecord)) -> bool {
        match self.records.iter_mut().find(|r| r.uid == uid) {
            Some(record) => {
                f(record);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, uid: Uid) -> Option<&FileRecord> {
        self.records.iter().find(|r| r.uid == uid)
    }

    pub fn contains(&self, uid: Uid) -> bool {
        self.get(uid).is_some()
    }

    pub fn records(&self) -> &[FileRecord] {
        &self.records
    }

    pub fn snapshot(&self) -> Vec<FileRecord> {
        self.records.clone()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Sum of the sizes of all tracked records.
    pub fn total_size(&self) -> u64 {
        self.records.iter().map(|r| r.size).sum()
    }

    /// Uids of the records currently in `status`, in store order.
    pub fn uids_with_status(&self, status: UploadStatus) -> Vec<Uid> {
        self.records
            .iter()
            .filter(|r| r.status == status)
            .map(|r| r.uid)
            .collect()
    }

    /// Drops every record for which `keep` returns `false` and returns them.
    pub fn retain(&mut self, mut keep: impl FnMut(&FileRecord) -> bool) -> Vec<FileRecord> {
        let (kept, dropped): (Vec<_>, Vec<_>) = std::mem::take(&mut self.records)
            .into_iter()
            .partition(|r| keep(r));
        self.records = kept;
        dropped
    }

    /// Replaces the whole list, returning the previous records.
    pub fn replace_all(&mut self, records: Vec<FileRecord>) -> Vec<FileRecord> {
        std::mem::replace(&mut self.records, records)
    }
}
