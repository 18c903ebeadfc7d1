//! Copy-on-write overlay over a [`KvStore`].
//!
//! A [`Snapshot`] reads through to its base and buffers every write. The
//! base is borrowed immutably, so nothing can reach it until the caller
//! explicitly applies the [`WriteSet`] returned by [`Snapshot::commit`].
//! Dropping the snapshot (or calling [`Snapshot::discard`]) throws the writes away.

use std::collections::BTreeMap;

use crate::kv::KvStore;

/// Buffered writes. `None` marks a deletion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteSet {
    writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl WriteSet {
    #[must_use]
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Write every buffered change into `target`, in key order.
    pub fn apply_to(self, target: &mut dyn KvStore) {
        for (key, value) in self.writes {
            match value {
                Some(v) => target.set(key, v),
                None => target.delete(&key),
            }
        }
    }
}

pub struct Snapshot<'a> {
    base: &'a dyn KvStore,
    pending: WriteSet,
}

impl<'a> Snapshot<'a> {
    #[must_use]
    pub fn new(base: &'a dyn KvStore) -> Self {
        Self {
            base,
            pending: WriteSet::default(),
        }
    }

    /// Number of buffered writes.
    #[must_use]
    pub fn pending_writes(&self) -> usize {
        self.pending.len()
    }

    /// Hand back the buffered writes for the caller to apply.
    #[must_use]
    pub fn commit(self) -> WriteSet {
        self.pending
    }

    /// Drop every buffered write.
    pub fn discard(self) {
        tracing::debug!(writes = self.pending.len(), "Discarding snapshot");
    }
}

impl KvStore for Snapshot<'_> {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        match self.pending.writes.get(key) {
            Some(value) => value.clone(),
            None => self.base.get(key),
        }
    }

    fn set(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.pending.writes.insert(key, Some(value));
    }

    fn delete(&mut self, key: &[u8]) {
        self.pending.writes.insert(key.to_vec(), None);
    }

    fn prefix_iter(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> =
            self.base.prefix_iter(prefix).into_iter().collect();
        for (key, value) in self
            .pending
            .writes
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
        {
            match value {
                Some(v) => {
                    merged.insert(key.clone(), v.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        merged.into_iter().collect()
    }
}
