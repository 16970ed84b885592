//! # redb-backed Journal
//!
//! A durable log of tenant records and committed mutation batches, stored
//! in a redb embedded database:
//! - ACID transactions: a batch is either fully journaled or not at all
//! - Crash safety (copy-on-write B-trees)
//! - Zero configuration
//!
//! ## Layout
//!
//! | Table | Key | Value |
//! |---|---|---|
//! | `tenants` | tenant id | tenant record (JSON) |
//! | `batches` | `(tenant id, first seq)` | committed batch (JSON) |
//! | `meta` | key | u64 |
//!
//! The engine replays `batches` in key order on open. Because ids are
//! derived from `(tenant, seq)`, replay reproduces them exactly.

use crate::graph::Mutation;
use crate::primitives::JOURNAL_FORMAT_VERSION;
use crate::tenant::Tenant;
use crate::types::{Seq, StrataError, TenantId};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Tenant records: id -> JSON.
const TENANTS: TableDefinition<&str, &str> = TableDefinition::new("tenants");

/// Committed batches: (tenant id, first seq) -> JSON.
const BATCHES: TableDefinition<(&str, u64), &str> = TableDefinition::new("batches");

/// Journal metadata: key -> value.
const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

const FORMAT_KEY: &str = "format_version";

fn storage_err(e: impl std::fmt::Display) -> StrataError {
    StrataError::Storage(e.to_string())
}

/// One committed batch: mutations applied at `first_seq`, `first_seq + 1`, ...
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalBatch {
    pub first_seq: Seq,
    pub mutations: Vec<Mutation>,
}

/// Everything the journal holds for one tenant.
#[derive(Debug, Clone, PartialEq)]
pub struct TenantLog {
    pub tenant: Tenant,
    /// Batches ordered by `first_seq`.
    pub batches: Vec<JournalBatch>,
}

/// The durable journal.
pub struct Journal {
    db: Database,
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal").finish_non_exhaustive()
    }
}

impl Journal {
    /// Open or create a journal at the given path.
    ///
    /// # Errors
    /// `Storage` if the file cannot be opened or was written by an
    /// incompatible format version.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StrataError> {
        let db = Database::create(path.as_ref()).map_err(storage_err)?;

        let write_txn = db.begin_write().map_err(storage_err)?;
        {
            let _ = write_txn.open_table(TENANTS).map_err(storage_err)?;
            let _ = write_txn.open_table(BATCHES).map_err(storage_err)?;
            let mut meta = write_txn.open_table(META).map_err(storage_err)?;

            let stored = meta
                .get(FORMAT_KEY)
                .map_err(storage_err)?
                .map(|v| v.value());
            match stored {
                None => {
                    meta.insert(FORMAT_KEY, u64::from(JOURNAL_FORMAT_VERSION))
                        .map_err(storage_err)?;
                }
                Some(v) if v == u64::from(JOURNAL_FORMAT_VERSION) => {}
                Some(v) => {
                    return Err(StrataError::Storage(format!(
                        "journal format version {} is not supported (expected {})",
                        v, JOURNAL_FORMAT_VERSION
                    )));
                }
            }
        }
        write_txn.commit().map_err(storage_err)?;

        Ok(Self { db })
    }

    /// Insert or replace a tenant record.
    pub fn put_tenant(&self, tenant: &Tenant) -> Result<(), StrataError> {
        let json = serde_json::to_string(tenant)?;
        let write_txn = self.db.begin_write().map_err(storage_err)?;
        {
            let mut table = write_txn.open_table(TENANTS).map_err(storage_err)?;
            table
                .insert(tenant.id.as_str(), json.as_str())
                .map_err(storage_err)?;
        }
        write_txn.commit().map_err(storage_err)
    }

    /// Append a committed batch for a tenant.
    pub fn append(&self, tenant: &TenantId, batch: &JournalBatch) -> Result<(), StrataError> {
        let json = serde_json::to_string(batch)?;
        let write_txn = self.db.begin_write().map_err(storage_err)?;
        {
            let mut table = write_txn.open_table(BATCHES).map_err(storage_err)?;
            table
                .insert((tenant.as_str(), batch.first_seq.value()), json.as_str())
                .map_err(storage_err)?;
        }
        write_txn.commit().map_err(storage_err)
    }

    /// Remove a tenant record and all of its batches in one transaction.
    pub fn remove_tenant(&self, tenant: &TenantId) -> Result<(), StrataError> {
        let id = tenant.as_str();
        let write_txn = self.db.begin_write().map_err(storage_err)?;
        {
            let mut batches = write_txn.open_table(BATCHES).map_err(storage_err)?;
            let mut seqs = Vec::new();
            for entry in batches
                .range((id, 0u64)..=(id, u64::MAX))
                .map_err(storage_err)?
            {
                let (key, _) = entry.map_err(storage_err)?;
                seqs.push(key.value().1);
            }
            for seq in seqs {
                batches.remove((id, seq)).map_err(storage_err)?;
            }

            let mut tenants = write_txn.open_table(TENANTS).map_err(storage_err)?;
            tenants.remove(id).map_err(storage_err)?;
        }
        write_txn.commit().map_err(storage_err)
    }

    /// Load every tenant and its batches, ordered by tenant id.
    pub fn load(&self) -> Result<Vec<TenantLog>, StrataError> {
        let read_txn = self.db.begin_read().map_err(storage_err)?;
        let tenants = read_txn.open_table(TENANTS).map_err(storage_err)?;
        let batches = read_txn.open_table(BATCHES).map_err(storage_err)?;

        let mut logs = Vec::new();
        for entry in tenants.iter().map_err(storage_err)? {
            let (key, value) = entry.map_err(storage_err)?;
            let tenant: Tenant = serde_json::from_str(value.value())?;
            let id = key.value();

            let mut tenant_batches = Vec::new();
            for batch in batches
                .range((id, 0u64)..=(id, u64::MAX))
                .map_err(storage_err)?
            {
                let (_, value) = batch.map_err(storage_err)?;
                tenant_batches.push(serde_json::from_str::<JournalBatch>(value.value())?);
            }

            logs.push(TenantLog {
                tenant,
                batches: tenant_batches,
            });
        }
        Ok(logs)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::tenant::NewTenant;
    use crate::types::Node;
    use chrono::Utc;
    use tempfile::tempdir;

    fn tenant(id: &str) -> Tenant {
        NewTenant::new(TenantId::parse(id).expect("id")).into_tenant(Utc::now())
    }

    fn batch(first: u64, label: &str) -> JournalBatch {
        JournalBatch {
            first_seq: Seq(first),
            mutations: vec![Mutation::UpsertNode {
                node: Node::new(label),
            }],
        }
    }

    #[test]
    fn round_trips_tenants_and_batches() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("journal.redb");

        {
            let journal = Journal::open(&path).expect("open");
            let t = tenant("t1");
            journal.put_tenant(&t).expect("tenant");
            journal.append(&t.id, &batch(2, "B")).expect("append");
            journal.append(&t.id, &batch(1, "A")).expect("append");
        }

        let journal = Journal::open(&path).expect("reopen");
        let logs = journal.load().expect("load");
        assert_eq!(logs.len(), 1);
        let seqs: Vec<Seq> = logs[0].batches.iter().map(|b| b.first_seq).collect();
        assert_eq!(seqs, vec![Seq(1), Seq(2)]);
    }

    #[test]
    fn remove_tenant_leaves_neighbours() {
        let dir = tempdir().expect("tempdir");
        let journal = Journal::open(dir.path().join("j.redb")).expect("open");

        // "t1" and "t10" share a prefix; only exact ids may be removed.
        for id in ["t1", "t10"] {
            let t = tenant(id);
            journal.put_tenant(&t).expect("tenant");
            journal.append(&t.id, &batch(1, "N")).expect("append");
        }

        journal
            .remove_tenant(&TenantId::parse("t1").expect("id"))
            .expect("remove");
        let logs = journal.load().expect("load");
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].tenant.id.as_str(), "t10");
        assert_eq!(logs[0].batches.len(), 1);
    }
}
