//! Published-item write cache.
//!
//! Holds the add queue, delete queue, and pending-item index behind a single
//! mutex; the critical sections are pure in-memory work, storage I/O happens
//! only after a slice has been taken out. The cluster-shared read cache is
//! not part of this structure: it is populated before queue mutation so
//! readers observe unflushed writes.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use plume_types::{ItemKey, NodeUid, PublishedItem};
use tracing::trace;

/// A published item bundled with its write-attempt count.
///
/// Records are immutable: a failed write produces a new record with the
/// attempt incremented, so a concurrently arriving duplicate publish never
/// races a shared counter.
#[derive(Debug, Clone)]
pub struct RetryRecord {
    /// The item awaiting persistence.
    pub item: PublishedItem,
    /// Number of failed individual write attempts so far.
    pub attempt: u32,
}

impl RetryRecord {
    /// Wrap a freshly published item.
    pub fn new(item: PublishedItem) -> Self {
        Self { item, attempt: 0 }
    }

    /// The record produced by one more failed write attempt.
    pub fn next_attempt(self) -> Self {
        Self {
            item: self.item,
            attempt: self.attempt + 1,
        }
    }

    /// Whether this record has never failed a write.
    pub fn is_first_attempt(&self) -> bool {
        self.attempt == 0
    }
}

#[derive(Default)]
struct Inner {
    /// Items queued for insertion, flush order front-to-back.
    to_add: VecDeque<RetryRecord>,
    /// Items queued for deletion.
    to_delete: VecDeque<PublishedItem>,
    /// Key → queued record, for the item currently queued or in flight.
    pending: HashMap<ItemKey, RetryRecord>,
}

/// The two queue slices taken out of the cache for one flush scope.
#[derive(Debug, Default)]
pub struct TakenSlices {
    /// Records to insert, in queue order.
    pub adds: Vec<RetryRecord>,
    /// Items to delete, in queue order.
    pub deletes: Vec<PublishedItem>,
}

impl TakenSlices {
    /// Whether there is nothing to write.
    pub fn is_empty(&self) -> bool {
        self.adds.is_empty() && self.deletes.is_empty()
    }
}

/// Add/delete queues plus pending index, mutated atomically.
#[derive(Default)]
pub struct ItemWriteCache {
    inner: Mutex<Inner>,
}

impl ItemWriteCache {
    /// Create an empty write cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a record for insertion, superseding any queued record with the
    /// same item key (last-writer-wins). First-attempt records go to the
    /// back of the queue; resubmitted retries go to the front so they are
    /// written in the next cycle.
    ///
    /// Returns the pending-item count after the insert, for the caller's
    /// flush-threshold check.
    pub fn push(&self, record: RetryRecord) -> usize {
        let key = record.item.key();
        let mut inner = self.inner.lock().expect("write cache lock poisoned");
        if inner.pending.remove(&key).is_some() {
            trace!(%key, "superseding queued item");
            inner.to_add.retain(|r| r.item.key() != key);
        }
        if record.is_first_attempt() {
            inner.to_add.push_back(record.clone());
        } else {
            inner.to_add.push_front(record.clone());
        }
        inner.pending.insert(key, record);
        inner.pending.len()
    }

    /// Queue an item for deletion, dropping any queued insert for the same
    /// key so a flush cannot resurrect the removed item.
    pub fn push_delete(&self, item: PublishedItem) {
        let key = item.key();
        let mut inner = self.inner.lock().expect("write cache lock poisoned");
        if inner.pending.remove(&key).is_some() {
            inner.to_add.retain(|r| r.item.key() != key);
        }
        inner.to_delete.push_back(item);
    }

    /// Atomically take every queued add and delete, clearing the pending
    /// index.
    pub fn take_all(&self) -> TakenSlices {
        let mut inner = self.inner.lock().expect("write cache lock poisoned");
        inner.pending.clear();
        TakenSlices {
            adds: std::mem::take(&mut inner.to_add).into(),
            deletes: std::mem::take(&mut inner.to_delete).into(),
        }
    }

    /// Atomically take the adds and deletes of one node; everything else
    /// remains queued.
    pub fn take_for_node(&self, uid: &NodeUid) -> TakenSlices {
        let mut inner = self.inner.lock().expect("write cache lock poisoned");

        let (adds, keep_adds): (Vec<_>, Vec<_>) = inner
            .to_add
            .drain(..)
            .partition(|r| &r.item.node == uid);
        inner.to_add = keep_adds.into();

        let (deletes, keep_deletes): (Vec<_>, Vec<_>) = inner
            .to_delete
            .drain(..)
            .partition(|i| &i.node == uid);
        inner.to_delete = keep_deletes.into();

        inner.pending.retain(|key, _| &key.node != uid);

        TakenSlices { adds, deletes }
    }

    /// Drop every queued add, delete, and pending entry for a node being
    /// purged. Nothing is written for them.
    pub fn purge_node(&self, uid: &NodeUid) {
        let mut inner = self.inner.lock().expect("write cache lock poisoned");
        inner.to_add.retain(|r| &r.item.node != uid);
        inner.to_delete.retain(|i| &i.node != uid);
        inner.pending.retain(|key, _| &key.node != uid);
    }

    /// Number of distinct items currently pending.
    pub fn pending_len(&self) -> usize {
        self.inner
            .lock()
            .expect("write cache lock poisoned")
            .pending
            .len()
    }

    /// Whether both queues are empty.
    pub fn is_empty(&self) -> bool {
        let inner = self.inner.lock().expect("write cache lock poisoned");
        inner.to_add.is_empty() && inner.to_delete.is_empty()
    }
}
