//! # Document Store
//!
//! The storage seam of the write path.
//!
//! A transaction function never writes. It reads from one [`Snapshot`] and
//! returns a [`WriteSet`]; the dispatcher hands that write-set to
//! [`DocumentStore::commit`], which applies it atomically or not at all.
//!
//! ## Backends
//!
//! - [`MemoryStore`]: copy-on-write state behind an `Arc` (tests, demos)
//! - [`RedbStore`]: redb database, snapshots are MVCC read transactions

mod memory;
mod redb_store;

pub use memory::MemoryStore;
pub use redb_store::RedbStore;

use crate::types::instance::{DocId, Document};
use crate::types::{Guid, MetarepoError, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// HISTORY
// =============================================================================

/// One committed version of a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Commit sequence that wrote this version.
    pub sequence: u64,
    /// Transaction time of the commit.
    pub tx_time: Timestamp,
    /// Valid time the version was recorded at.
    pub valid_time: Timestamp,
    pub document: Document,
}

/// Lazy cursor over a document's history, newest first.
///
/// Borrows the snapshot it was opened from, so it is released with it. To
/// start over, open a new cursor.
pub struct History<'a> {
    inner: Box<dyn Iterator<Item = Result<HistoryEntry, MetarepoError>> + 'a>,
}

impl<'a> History<'a> {
    pub fn new(inner: impl Iterator<Item = Result<HistoryEntry, MetarepoError>> + 'a) -> Self {
        Self {
            inner: Box::new(inner),
        }
    }
}

impl Iterator for History<'_> {
    type Item = Result<HistoryEntry, MetarepoError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

impl fmt::Debug for History<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("History").finish_non_exhaustive()
    }
}

// =============================================================================
// QUERIES
// =============================================================================

/// Document selection supported by every store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentQuery {
    /// Relationships with `entity` at either end.
    RelationshipsFor { entity: Guid, include_deleted: bool },
}

impl DocumentQuery {
    /// Whether a stored document is selected by this query.
    #[must_use]
    pub fn matches(&self, document: &Document) -> bool {
        match self {
            Self::RelationshipsFor {
                entity,
                include_deleted,
            } => match document {
                Document::Relationship(r) => {
                    r.references(entity) && (*include_deleted || !r.header.is_deleted())
                }
                Document::Entity(_) | Document::Proxy(_) => false,
            },
        }
    }
}

// =============================================================================
// WRITE SETS
// =============================================================================

/// A single pending write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    /// Store a new version of a document and append it to its history.
    Put {
        document: Document,
        valid_time: Timestamp,
    },
    /// Remove a document and its entire history.
    Evict { id: DocId },
}

impl WriteOp {
    #[must_use]
    pub fn id(&self) -> DocId {
        match self {
            Self::Put { document, .. } => document.id(),
            Self::Evict { id } => id.clone(),
        }
    }
}

/// The complete, inspectable output of one transaction.
///
/// At most one operation per document: a later write to the same id replaces
/// the earlier one, keeping its position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteSet {
    tx_time: Timestamp,
    ops: Vec<WriteOp>,
}

impl WriteSet {
    #[must_use]
    pub fn new(tx_time: Timestamp) -> Self {
        Self {
            tx_time,
            ops: Vec::new(),
        }
    }

    pub fn put(&mut self, document: Document, valid_time: Timestamp) {
        self.push(WriteOp::Put {
            document,
            valid_time,
        });
    }

    pub fn evict(&mut self, id: DocId) {
        self.push(WriteOp::Evict { id });
    }

    fn push(&mut self, op: WriteOp) {
        let id = op.id();
        match self.ops.iter_mut().find(|existing| existing.id() == id) {
            Some(existing) => *existing = op,
            None => self.ops.push(op),
        }
    }

    /// The pending operation for `id`, if any.
    #[must_use]
    pub fn pending(&self, id: &DocId) -> Option<&WriteOp> {
        self.ops.iter().find(|op| op.id() == *id)
    }

    #[must_use]
    pub fn tx_time(&self) -> Timestamp {
        self.tx_time
    }

    #[must_use]
    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    #[must_use]
    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Result of a successful commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    /// Store sequence after the commit.
    pub sequence: u64,
    pub tx_time: Timestamp,
    pub puts: usize,
    pub evictions: usize,
}

// =============================================================================
// TRAITS
// =============================================================================

/// One immutable, point-in-time view of the store.
pub trait Snapshot {
    /// Commit sequence this snapshot observes.
    fn sequence(&self) -> u64;

    /// Current version of a document.
    fn get(&self, id: &DocId) -> Result<Option<Document>, MetarepoError>;

    /// Ids of the current documents selected by `query`, in key order.
    fn query(&self, query: &DocumentQuery) -> Result<Vec<DocId>, MetarepoError>;

    /// Open a lazy history cursor, newest version first.
    fn history(&self, id: &DocId) -> Result<History<'_>, MetarepoError>;

    /// Valid time of the newest recorded version.
    fn latest_valid_time(&self, id: &DocId) -> Result<Option<Timestamp>, MetarepoError> {
        let newest = self.history(id)?.next().transpose()?;
        Ok(newest.map(|entry| entry.valid_time))
    }
}

/// A document store with snapshot reads and atomic multi-document commits.
///
/// Commits are serialized by `&mut self`: there is one writer at a time.
pub trait DocumentStore {
    /// Open a snapshot of the latest committed state.
    fn snapshot(&self) -> Result<Box<dyn Snapshot + '_>, MetarepoError>;

    /// Apply every operation of `writes` atomically.
    fn commit(&mut self, writes: WriteSet) -> Result<CommitInfo, MetarepoError>;

    /// Sequence of the latest commit (0 for an empty store).
    fn sequence(&self) -> Result<u64, MetarepoError>;
}

/// Build the commit summary of a write-set.
pub(crate) fn commit_info(sequence: u64, writes: &WriteSet) -> CommitInfo {
    let evictions = writes
        .ops()
        .iter()
        .filter(|op| matches!(op, WriteOp::Evict { .. }))
        .count();
    CommitInfo {
        sequence,
        tx_time: writes.tx_time(),
        puts: writes.len().saturating_sub(evictions),
        evictions,
    }
}

// =============================================================================
// TESTS
// =============================================================================
