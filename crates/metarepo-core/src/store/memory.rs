//! # In-memory Document Store
//!
//! Copy-on-write state behind an `Arc`. A snapshot holds a clone of the
//! `Arc`; a commit clones the state only while snapshots are outstanding.

use super::{
    CommitInfo, DocumentQuery, DocumentStore, History, HistoryEntry, Snapshot, WriteOp, WriteSet,
    commit_info,
};
use crate::types::MetarepoError;
use crate::types::instance::{DocId, Document};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
struct MemoryState {
    documents: BTreeMap<DocId, Document>,
    /// Oldest first.
    history: BTreeMap<DocId, Vec<HistoryEntry>>,
    sequence: u64,
}

/// Volatile document store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<MemoryState>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of current documents.
    #[must_use]
    pub fn document_count(&self) -> usize {
        self.state.documents.len()
    }
}

struct MemorySnapshot {
    state: Arc<MemoryState>,
}

impl Snapshot for MemorySnapshot {
    fn sequence(&self) -> u64 {
        self.state.sequence
    }

    fn get(&self, id: &DocId) -> Result<Option<Document>, MetarepoError> {
        Ok(self.state.documents.get(id).cloned())
    }

    fn query(&self, query: &DocumentQuery) -> Result<Vec<DocId>, MetarepoError> {
        Ok(self
            .state
            .documents
            .iter()
            .filter(|(_, doc)| query.matches(doc))
            .map(|(id, _)| id.clone())
            .collect())
    }

    fn history(&self, id: &DocId) -> Result<History<'_>, MetarepoError> {
        let versions = self
            .state
            .history
            .get(id)
            .map(Vec::as_slice)
            .unwrap_or_default();
        Ok(History::new(versions.iter().rev().cloned().map(Ok)))
    }
}

impl DocumentStore for MemoryStore {
    fn snapshot(&self) -> Result<Box<dyn Snapshot + '_>, MetarepoError> {
        Ok(Box::new(MemorySnapshot {
            state: Arc::clone(&self.state),
        }))
    }

    fn commit(&mut self, writes: WriteSet) -> Result<CommitInfo, MetarepoError> {
        let state = Arc::make_mut(&mut self.state);
        let sequence = state.sequence.saturating_add(1);
        let info = commit_info(sequence, &writes);
        let tx_time = writes.tx_time();

        for op in writes.into_ops() {
            match op {
                WriteOp::Put {
                    document,
                    valid_time,
                } => {
                    let id = document.id();
                    state
                        .history
                        .entry(id.clone())
                        .or_default()
                        .push(HistoryEntry {
                            sequence,
                            tx_time,
                            valid_time,
                            document: document.clone(),
                        });
                    state.documents.insert(id, document);
                }
                WriteOp::Evict { id } => {
                    state.documents.remove(&id);
                    state.history.remove(&id);
                }
            }
        }

        state.sequence = sequence;
        Ok(info)
    }

    fn sequence(&self) -> Result<u64, MetarepoError> {
        Ok(self.state.sequence)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::fixtures;
    use crate::types::{Guid, Timestamp};

    #[test]
    fn snapshot_is_isolated_from_later_commits() {
        let mut store = MemoryStore::new();
        let entity = fixtures::asset("e1", "mc-local");
        let id = DocId::entity(&entity.header.guid);

        let mut writes = WriteSet::new(Timestamp(1));
        writes.put(Document::Entity(entity.clone()), Timestamp(1));
        store.commit(writes).expect("commit");

        let before = MemorySnapshot {
            state: Arc::clone(&store.state),
        };

        let mut writes = WriteSet::new(Timestamp(2));
        writes.evict(id.clone());
        store.commit(writes).expect("commit");

        assert!(before.get(&id).expect("get").is_some());
        assert_eq!(before.sequence(), 1);

        let after = store.snapshot().expect("snapshot");
        assert!(after.get(&id).expect("get").is_none());
        assert_eq!(after.history(&id).expect("history").count(), 0);
    }

    #[test]
    fn history_is_newest_first() {
        let mut store = MemoryStore::new();
        let mut entity = fixtures::asset("e1", "mc-local");
        for version in 1..=3 {
            entity.header.maintenance.version = version;
            let mut writes = WriteSet::new(Timestamp(version as i64));
            writes.put(Document::Entity(entity.clone()), Timestamp(version as i64));
            store.commit(writes).expect("commit");
        }

        let snapshot = store.snapshot().expect("snapshot");
        let id = DocId::entity(&Guid::from("e1"));
        let versions: Vec<u64> = snapshot
            .history(&id)
            .expect("history")
            .map(|entry| entry.expect("entry").document.header().version())
            .collect();
        assert_eq!(versions, vec![3, 2, 1]);
        assert_eq!(
            snapshot.latest_valid_time(&id).expect("valid time"),
            Some(Timestamp(3))
        );
    }
}
