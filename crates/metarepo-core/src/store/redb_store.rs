//! # redb-backed Document Store
//!
//! A disk-backed document store using the redb embedded database.
//!
//! - Snapshots are redb read transactions (MVCC: readers never block the writer)
//! - A commit is one redb write transaction (ACID, crash safe)
//! - Documents and history entries are postcard-encoded
//!
//! ## Layout
//!
//! | table       | key                    | value                     |
//! |-------------|------------------------|---------------------------|
//! | `documents` | doc id                 | current `Document`        |
//! | `history`   | (doc id, commit seq)   | `StoredVersion`           |
//! | `metadata`  | `sequence`, `format`   | u64                       |

use super::{
    CommitInfo, DocumentQuery, DocumentStore, History, HistoryEntry, Snapshot, WriteOp, WriteSet,
    commit_info,
};
use crate::primitives::{FORMAT_VERSION, RELATIONSHIP_DOC_PREFIX, RELATIONSHIP_DOC_RANGE_END};
use crate::types::instance::{DocId, Document};
use crate::types::{MetarepoError, Timestamp};
use redb::{
    Database, ReadOnlyTable, ReadTransaction, ReadableDatabase, ReadableTable, TableDefinition,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Table for current documents: doc id -> serialized Document
const DOCUMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("documents");

/// Table for history: (doc id, commit sequence) -> serialized StoredVersion.
/// The sequence in the key keeps each document's versions contiguous and ordered.
const HISTORY: TableDefinition<(&str, u64), &[u8]> = TableDefinition::new("history");

/// Table for metadata: key string -> value u64
const METADATA: TableDefinition<&str, u64> = TableDefinition::new("metadata");

const SEQUENCE_KEY: &str = "sequence";
const FORMAT_KEY: &str = "format_version";

/// History value; the commit sequence lives in the key.
#[derive(Serialize, Deserialize)]
struct StoredVersion {
    tx_time: Timestamp,
    valid_time: Timestamp,
    document: Document,
}

/// A disk-backed document store using redb.
pub struct RedbStore {
    db: Database,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore").finish_non_exhaustive()
    }
}

impl RedbStore {
    /// Open or create a document database at the given path.
    ///
    /// Fails with `Storage` if the file was written with a different
    /// document format version.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, MetarepoError> {
        let db =
            Database::create(path.as_ref()).map_err(|e| MetarepoError::Storage(e.to_string()))?;

        let write_txn = db
            .begin_write()
            .map_err(|e| MetarepoError::Storage(e.to_string()))?;
        {
            let _ = write_txn
                .open_table(DOCUMENTS)
                .map_err(|e| MetarepoError::Storage(e.to_string()))?;
            let _ = write_txn
                .open_table(HISTORY)
                .map_err(|e| MetarepoError::Storage(e.to_string()))?;
            let mut meta = write_txn
                .open_table(METADATA)
                .map_err(|e| MetarepoError::Storage(e.to_string()))?;

            let stored_format = meta
                .get(FORMAT_KEY)
                .map_err(|e| MetarepoError::Storage(e.to_string()))?
                .map(|v| v.value());
            match stored_format {
                Some(format) if format != FORMAT_VERSION => {
                    return Err(MetarepoError::Storage(format!(
                        "unsupported document format version {} (expected {})",
                        format, FORMAT_VERSION
                    )));
                }
                Some(_) => {}
                None => {
                    meta.insert(FORMAT_KEY, FORMAT_VERSION)
                        .map_err(|e| MetarepoError::Storage(e.to_string()))?;
                }
            }
        }
        write_txn
            .commit()
            .map_err(|e| MetarepoError::Storage(e.to_string()))?;

        Ok(Self { db })
    }
}

fn read_sequence(txn: &ReadTransaction) -> Result<u64, MetarepoError> {
    let meta = txn
        .open_table(METADATA)
        .map_err(|e| MetarepoError::Storage(e.to_string()))?;
    Ok(meta
        .get(SEQUENCE_KEY)
        .map_err(|e| MetarepoError::Storage(e.to_string()))?
        .map(|v| v.value())
        .unwrap_or(0))
}

fn decode_document(id: &str, bytes: &[u8]) -> Result<Document, MetarepoError> {
    postcard::from_bytes(bytes).map_err(|e| MetarepoError::CorruptDocument {
        id: id.to_string(),
        reason: e.to_string(),
    })
}

// =============================================================================
// SNAPSHOT
// =============================================================================

struct RedbSnapshot {
    txn: ReadTransaction,
    sequence: u64,
}

impl Snapshot for RedbSnapshot {
    fn sequence(&self) -> u64 {
        self.sequence
    }

    fn get(&self, id: &DocId) -> Result<Option<Document>, MetarepoError> {
        let table = self
            .txn
            .open_table(DOCUMENTS)
            .map_err(|e| MetarepoError::Storage(e.to_string()))?;
        let found = table
            .get(id.as_str())
            .map_err(|e| MetarepoError::Storage(e.to_string()))?;
        found
            .map(|bytes| decode_document(id.as_str(), bytes.value()))
            .transpose()
    }

    fn query(&self, query: &DocumentQuery) -> Result<Vec<DocId>, MetarepoError> {
        let table = self
            .txn
            .open_table(DOCUMENTS)
            .map_err(|e| MetarepoError::Storage(e.to_string()))?;

        let mut ids = Vec::new();
        match query {
            DocumentQuery::RelationshipsFor { .. } => {
                for entry in table
                    .range(RELATIONSHIP_DOC_PREFIX..RELATIONSHIP_DOC_RANGE_END)
                    .map_err(|e| MetarepoError::Storage(e.to_string()))?
                {
                    let (key, value) = entry.map_err(|e| MetarepoError::Storage(e.to_string()))?;
                    let document = decode_document(key.value(), value.value())?;
                    if query.matches(&document) {
                        ids.push(DocId::parse(key.value())?);
                    }
                }
            }
        }
        Ok(ids)
    }

    fn history(&self, id: &DocId) -> Result<History<'_>, MetarepoError> {
        let table = self
            .txn
            .open_table(HISTORY)
            .map_err(|e| MetarepoError::Storage(e.to_string()))?;
        Ok(History::new(HistoryCursor {
            table,
            id: id.as_str().to_string(),
            upper: u64::MAX,
            done: false,
        }))
    }
}

/// Backward cursor: each step seeks the newest entry below the last one seen.
struct HistoryCursor {
    table: ReadOnlyTable<(&'static str, u64), &'static [u8]>,
    id: String,
    /// Exclusive upper bound on the next sequence to return.
    upper: u64,
    done: bool,
}

impl HistoryCursor {
    fn step(&mut self) -> Result<Option<HistoryEntry>, MetarepoError> {
        let mut range = self
            .table
            .range((self.id.as_str(), 0u64)..(self.id.as_str(), self.upper))
            .map_err(|e| MetarepoError::Storage(e.to_string()))?;
        let Some(entry) = range.next_back() else {
            return Ok(None);
        };
        let (key, value) = entry.map_err(|e| MetarepoError::Storage(e.to_string()))?;
        let (_, sequence) = key.value();
        let stored: StoredVersion =
            postcard::from_bytes(value.value()).map_err(|e| MetarepoError::CorruptDocument {
                id: self.id.clone(),
                reason: e.to_string(),
            })?;

        self.upper = sequence;
        Ok(Some(HistoryEntry {
            sequence,
            tx_time: stored.tx_time,
            valid_time: stored.valid_time,
            document: stored.document,
        }))
    }
}

impl Iterator for HistoryCursor {
    type Item = Result<HistoryEntry, MetarepoError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.step() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

// =============================================================================
// STORE
// =============================================================================

impl DocumentStore for RedbStore {
    fn snapshot(&self) -> Result<Box<dyn Snapshot + '_>, MetarepoError> {
        let txn = self
            .db
            .begin_read()
            .map_err(|e| MetarepoError::Storage(e.to_string()))?;
        let sequence = read_sequence(&txn)?;
        Ok(Box::new(RedbSnapshot { txn, sequence }))
    }

    fn commit(&mut self, writes: WriteSet) -> Result<CommitInfo, MetarepoError> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| MetarepoError::Storage(e.to_string()))?;

        let info = {
            let mut documents = write_txn
                .open_table(DOCUMENTS)
                .map_err(|e| MetarepoError::Storage(e.to_string()))?;
            let mut history = write_txn
                .open_table(HISTORY)
                .map_err(|e| MetarepoError::Storage(e.to_string()))?;
            let mut meta = write_txn
                .open_table(METADATA)
                .map_err(|e| MetarepoError::Storage(e.to_string()))?;

            let current = meta
                .get(SEQUENCE_KEY)
                .map_err(|e| MetarepoError::Storage(e.to_string()))?
                .map(|v| v.value())
                .unwrap_or(0);
            let sequence = current.saturating_add(1);
            let info = commit_info(sequence, &writes);
            let tx_time = writes.tx_time();

            for op in writes.into_ops() {
                match op {
                    WriteOp::Put {
                        document,
                        valid_time,
                    } => {
                        let id = document.id();
                        let doc_bytes = postcard::to_allocvec(&document)
                            .map_err(|e| MetarepoError::Serialization(e.to_string()))?;
                        let version_bytes = postcard::to_allocvec(&StoredVersion {
                            tx_time,
                            valid_time,
                            document,
                        })
                        .map_err(|e| MetarepoError::Serialization(e.to_string()))?;

                        documents
                            .insert(id.as_str(), doc_bytes.as_slice())
                            .map_err(|e| MetarepoError::Storage(e.to_string()))?;
                        history
                            .insert((id.as_str(), sequence), version_bytes.as_slice())
                            .map_err(|e| MetarepoError::Storage(e.to_string()))?;
                    }
                    WriteOp::Evict { id } => {
                        documents
                            .remove(id.as_str())
                            .map_err(|e| MetarepoError::Storage(e.to_string()))?;

                        let mut sequences = Vec::new();
                        for entry in history
                            .range((id.as_str(), 0u64)..=(id.as_str(), u64::MAX))
                            .map_err(|e| MetarepoError::Storage(e.to_string()))?
                        {
                            let (key, _) =
                                entry.map_err(|e| MetarepoError::Storage(e.to_string()))?;
                            sequences.push(key.value().1);
                        }
                        for seq in sequences {
                            history
                                .remove((id.as_str(), seq))
                                .map_err(|e| MetarepoError::Storage(e.to_string()))?;
                        }
                    }
                }
            }

            meta.insert(SEQUENCE_KEY, sequence)
                .map_err(|e| MetarepoError::Storage(e.to_string()))?;
            info
        };

        write_txn
            .commit()
            .map_err(|e| MetarepoError::Storage(e.to_string()))?;
        Ok(info)
    }

    fn sequence(&self) -> Result<u64, MetarepoError> {
        let txn = self
            .db
            .begin_read()
            .map_err(|e| MetarepoError::Storage(e.to_string()))?;
        read_sequence(&txn)
    }
}
