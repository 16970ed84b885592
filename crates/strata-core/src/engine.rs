//! # Engine
//!
//! The tenant-scoped entry point of the core.
//!
//! `Engine` composes the registry, the ingestor, the query executor and the
//! optional journal. All write paths funnel through one commit routine:
//!
//! 1. Look up the partition and enter its write section (bounded wait).
//! 2. Refuse if the tenant is read-only.
//! 3. Apply the batch to a copy of the published snapshot.
//! 4. Journal the batch.
//! 5. Publish the copy.
//!
//! A failure at any step leaves the published snapshot and the journal
//! untouched.

use crate::export::{TenantExport, export_tenant};
use crate::graph::{
    EdgeVersion, EdgeView, GraphStats, Mutation, NodeVersion, NodeView, Outcome, TenantGraph,
};
use crate::ingestor::{IngestDocument, Ingestor};
use crate::query::{Deadline, Query, QueryExecutor, QueryResult};
use crate::storage::{Journal, JournalBatch};
use crate::temporal::TxView;
use crate::tenant::{NewTenant, Partition, Tenant, TenantPatch, TenantRegistry};
use crate::types::{EdgeId, Node, NodeId, StrataError, TenantId, TimeEdge};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Runtime limits of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Budget for queries that do not name one.
    pub query_timeout: Duration,
    /// Ceiling on any query budget.
    pub max_query_timeout: Duration,
    /// Longest wait for a tenant's write section.
    pub write_lock_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            query_timeout: Duration::from_millis(5_000),
            max_query_timeout: Duration::from_millis(30_000),
            write_lock_timeout: Duration::from_millis(2_000),
        }
    }
}

/// Result of a node upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeWrite {
    pub id: NodeId,
    pub created: bool,
}

/// Result of an edge upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeWrite {
    pub id: EdgeId,
    pub created: bool,
}

// =============================================================================
// ENGINE
// =============================================================================

/// Multi-tenant bitemporal graph engine.
#[derive(Debug)]
pub struct Engine {
    registry: TenantRegistry,
    journal: Option<Journal>,
    config: EngineConfig,
}

impl Engine {
    /// An engine with no durability.
    #[must_use]
    pub fn in_memory(config: EngineConfig) -> Self {
        Self {
            registry: TenantRegistry::new(),
            journal: None,
            config,
        }
    }

    /// Open a journaled engine, replaying everything the journal holds.
    ///
    /// # Errors
    /// `Storage` if the journal cannot be read or its batches do not replay
    /// in an unbroken sequence.
    pub fn open(path: impl AsRef<Path>, config: EngineConfig) -> Result<Self, StrataError> {
        let journal = Journal::open(path.as_ref())?;
        let registry = TenantRegistry::new();

        for log in journal.load()? {
            let tenant_id = log.tenant.id.clone();
            let mut graph = TenantGraph::new(tenant_id.clone());
            for batch in &log.batches {
                let expected = graph.head().next();
                if batch.first_seq != expected {
                    return Err(StrataError::Storage(format!(
                        "journal gap in tenant {}: expected seq {}, found {}",
                        tenant_id, expected, batch.first_seq
                    )));
                }
                let (next, _) = Ingestor::apply_batch(&graph, &batch.mutations).map_err(|e| {
                    StrataError::Storage(format!(
                        "replay of tenant {} failed at seq {}: {}",
                        tenant_id, batch.first_seq, e
                    ))
                })?;
                graph = next;
            }
            info!(
                tenant = %tenant_id,
                head = %graph.head(),
                batches = log.batches.len(),
                "tenant restored from journal"
            );
            registry.restore(Partition::new(log.tenant, graph));
        }

        Ok(Self {
            registry,
            journal: Some(journal),
            config,
        })
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn is_durable(&self) -> bool {
        self.journal.is_some()
    }

    // =========================================================================
    // TENANTS
    // =========================================================================

    pub fn create_tenant(&self, new: NewTenant) -> Result<Tenant, StrataError> {
        let tenant = new.into_tenant(Utc::now());
        let partition = self.registry.create(tenant, |t| match &self.journal {
            Some(journal) => journal.put_tenant(t),
            None => Ok(()),
        })?;
        let tenant = partition.tenant();
        info!(tenant = %tenant.id, model = %tenant.isolation_model, "tenant created");
        Ok(tenant)
    }

    pub fn get_tenant(&self, id: &TenantId) -> Result<Tenant, StrataError> {
        Ok(self.registry.get(id)?.tenant())
    }

    /// All tenants, ordered by id.
    #[must_use]
    pub fn list_tenants(&self) -> Vec<Tenant> {
        self.registry.list()
    }

    pub fn update_tenant(&self, id: &TenantId, patch: TenantPatch) -> Result<Tenant, StrataError> {
        let partition = self.registry.get(id)?;
        let _guard = partition.lock_write(self.config.write_lock_timeout)?;

        let mut tenant = partition.tenant();
        patch.apply_to(&mut tenant, Utc::now())?;
        if let Some(journal) = &self.journal {
            journal.put_tenant(&tenant)?;
        }
        partition.set_tenant(tenant.clone());
        info!(tenant = %id, status = %tenant.status, "tenant updated");
        Ok(tenant)
    }

    /// Delete a tenant.
    ///
    /// Refuses with `Conflict` while the tenant owns live nodes or edges,
    /// unless `cascade` is set. Writers waiting on the tenant observe
    /// `NotFound` once this returns, and the id is free for reuse.
    pub fn delete_tenant(&self, id: &TenantId, cascade: bool) -> Result<(), StrataError> {
        let partition = self.registry.get(id)?;
        let _guard = partition.lock_write(self.config.write_lock_timeout)?;

        let snapshot = partition.snapshot();
        if !cascade && !snapshot.is_live_empty() {
            let stats = snapshot.stats();
            return Err(StrataError::Conflict(format!(
                "tenant {} still owns {} node(s) and {} edge(s); pass cascade=true to delete anyway",
                id, stats.live_nodes, stats.live_edges
            )));
        }

        if let Some(journal) = &self.journal {
            journal.remove_tenant(id)?;
        }
        partition.retire();
        self.registry.remove(id, &partition);
        info!(tenant = %id, cascade, head = %snapshot.head(), "tenant deleted");
        Ok(())
    }

    // =========================================================================
    // WRITES
    // =========================================================================

    /// Commit a batch of mutations as one unit.
    pub fn apply(
        &self,
        tenant: &TenantId,
        mutations: &[Mutation],
    ) -> Result<Vec<Outcome>, StrataError> {
        self.commit(tenant, |_| Ok(mutations.to_vec()))
    }

    /// Load an ingest document as one batch.
    pub fn ingest(
        &self,
        tenant: &TenantId,
        doc: &IngestDocument,
    ) -> Result<Vec<Outcome>, StrataError> {
        self.commit(tenant, |snapshot| Ingestor::plan_document(snapshot, doc))
    }

    pub fn upsert_node(&self, tenant: &TenantId, node: Node) -> Result<NodeWrite, StrataError> {
        let mut writes = self.batch_upsert_nodes(tenant, vec![node])?;
        writes
            .pop()
            .ok_or_else(|| StrataError::Storage("upsert produced no outcome".into()))
    }

    pub fn upsert_edge(&self, tenant: &TenantId, edge: TimeEdge) -> Result<EdgeWrite, StrataError> {
        let mut writes = self.batch_upsert_edges(tenant, vec![edge])?;
        writes
            .pop()
            .ok_or_else(|| StrataError::Storage("upsert produced no outcome".into()))
    }

    /// Upsert nodes all-or-nothing.
    pub fn batch_upsert_nodes(
        &self,
        tenant: &TenantId,
        nodes: Vec<Node>,
    ) -> Result<Vec<NodeWrite>, StrataError> {
        let mutations: Vec<Mutation> = nodes
            .into_iter()
            .map(|node| Mutation::UpsertNode { node })
            .collect();
        let outcomes = self.apply(tenant, &mutations)?;
        Ok(outcomes
            .into_iter()
            .filter_map(|o| match o {
                Outcome::NodeUpserted { id, created } => Some(NodeWrite { id, created }),
                _ => None,
            })
            .collect())
    }

    /// Upsert edges all-or-nothing.
    pub fn batch_upsert_edges(
        &self,
        tenant: &TenantId,
        edges: Vec<TimeEdge>,
    ) -> Result<Vec<EdgeWrite>, StrataError> {
        let mutations: Vec<Mutation> = edges
            .into_iter()
            .map(|edge| Mutation::UpsertEdge { edge })
            .collect();
        let outcomes = self.apply(tenant, &mutations)?;
        Ok(outcomes
            .into_iter()
            .filter_map(|o| match o {
                Outcome::EdgeUpserted { id, created } => Some(EdgeWrite { id, created }),
                _ => None,
            })
            .collect())
    }

    /// Delete a node. Returns the edges closed by a cascade.
    pub fn delete_node(
        &self,
        tenant: &TenantId,
        id: NodeId,
        cascade: bool,
    ) -> Result<Vec<EdgeId>, StrataError> {
        let outcomes = self.apply(tenant, &[Mutation::DeleteNode { id, cascade }])?;
        Ok(outcomes
            .into_iter()
            .find_map(|o| match o {
                Outcome::NodeDeleted { closed_edges, .. } => Some(closed_edges),
                _ => None,
            })
            .unwrap_or_default())
    }

    pub fn delete_edge(&self, tenant: &TenantId, id: EdgeId) -> Result<(), StrataError> {
        self.apply(tenant, &[Mutation::DeleteEdge { id }])?;
        Ok(())
    }

    fn commit<F>(&self, tenant: &TenantId, plan: F) -> Result<Vec<Outcome>, StrataError>
    where
        F: FnOnce(&TenantGraph) -> Result<Vec<Mutation>, StrataError>,
    {
        let partition = self.registry.get(tenant)?;
        let _guard = partition.lock_write(self.config.write_lock_timeout)?;

        let record = partition.tenant();
        if !record.is_writable() {
            return Err(StrataError::Conflict(format!(
                "tenant {} is {} and read-only",
                tenant, record.status
            )));
        }

        let snapshot = partition.snapshot();
        let mutations = plan(snapshot.as_ref())?;
        let (next, outcomes) =
            Ingestor::apply_batch(&snapshot, &mutations).inspect_err(|e| {
                debug!(tenant = %tenant, error = %e, "batch rejected");
            })?;
        if outcomes.is_empty() {
            return Ok(outcomes);
        }

        if let Some(journal) = &self.journal {
            let batch = JournalBatch {
                first_seq: snapshot.head().next(),
                mutations,
            };
            journal.append(tenant, &batch).inspect_err(|e| {
                warn!(tenant = %tenant, error = %e, "journal append failed, batch rolled back");
            })?;
        }

        let head = next.head();
        partition.publish(next);
        debug!(tenant = %tenant, head = %head, items = outcomes.len(), "batch committed");
        Ok(outcomes)
    }

    // =========================================================================
    // READS
    // =========================================================================

    /// The published snapshot of a tenant.
    pub fn snapshot(&self, tenant: &TenantId) -> Result<Arc<TenantGraph>, StrataError> {
        Ok(self.registry.get(tenant)?.snapshot())
    }

    pub fn get_node(&self, tenant: &TenantId, id: NodeId) -> Result<NodeView, StrataError> {
        self.snapshot(tenant)?
            .node_at(id, TxView::Current)
            .ok_or_else(|| StrataError::NotFound(format!("node {} in tenant {}", id, tenant)))
    }

    pub fn get_edge(&self, tenant: &TenantId, id: EdgeId) -> Result<EdgeView, StrataError> {
        self.snapshot(tenant)?
            .edge_at(id, TxView::Current)
            .ok_or_else(|| StrataError::NotFound(format!("edge {} in tenant {}", id, tenant)))
    }

    /// Every recorded version of a node, including after deletion.
    pub fn node_history(
        &self,
        tenant: &TenantId,
        id: NodeId,
    ) -> Result<Vec<NodeVersion>, StrataError> {
        self.snapshot(tenant)?
            .node_history(id)
            .ok_or_else(|| StrataError::NotFound(format!("node {} in tenant {}", id, tenant)))
    }

    pub fn edge_history(
        &self,
        tenant: &TenantId,
        id: EdgeId,
    ) -> Result<Vec<EdgeVersion>, StrataError> {
        self.snapshot(tenant)?
            .edge_history(id)
            .ok_or_else(|| StrataError::NotFound(format!("edge {} in tenant {}", id, tenant)))
    }

    /// Run a query against the current snapshot.
    ///
    /// The budget is the query's `timeout_ms` (or the engine default),
    /// capped at `max_query_timeout`.
    pub fn execute(&self, tenant: &TenantId, query: &Query) -> Result<QueryResult, StrataError> {
        let snapshot = self.snapshot(tenant)?;
        let budget = query
            .timeout_ms
            .map_or(self.config.query_timeout, Duration::from_millis)
            .min(self.config.max_query_timeout);
        QueryExecutor::new(&snapshot, Deadline::after(budget)).execute(&query.query_type)
    }

    pub fn stats(&self, tenant: &TenantId) -> Result<GraphStats, StrataError> {
        Ok(self.snapshot(tenant)?.stats())
    }

    /// Dump a tenant, optionally narrowing edges to those valid at `as_of`.
    pub fn export(
        &self,
        tenant: &TenantId,
        as_of: Option<DateTime<Utc>>,
    ) -> Result<TenantExport, StrataError> {
        let partition = self.registry.get(tenant)?;
        let snapshot = partition.snapshot();
        Ok(export_tenant(partition.tenant(), &snapshot, as_of))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::tenant::TenantStatus;
    use crate::types::Seq;
    use chrono::TimeZone;

    fn id(s: &str) -> TenantId {
        TenantId::parse(s).expect("tenant id")
    }

    fn engine_with(tenants: &[&str]) -> Engine {
        let engine = Engine::in_memory(EngineConfig::default());
        for t in tenants {
            engine.create_tenant(NewTenant::new(id(t))).expect("create");
        }
        engine
    }

    fn day(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).single().expect("date")
    }

    #[test]
    fn alias_upsert_is_idempotent() {
        let engine = engine_with(&["t1"]);
        let t1 = id("t1");
        let first = engine
            .upsert_node(&t1, Node::new("Person").with_alias("alice").with_prop("v", 1))
            .expect("first");
        let second = engine
            .upsert_node(&t1, Node::new("Person").with_alias("alice").with_prop("v", 2))
            .expect("second");

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.id, second.id);
        assert_eq!(engine.stats(&t1).expect("stats").live_nodes, 1);
        let node = engine.get_node(&t1, first.id).expect("node");
        assert_eq!(node.node.props["v"], crate::PropValue::Int(2));
    }

    #[test]
    fn cross_tenant_edge_is_not_found() {
        let engine = engine_with(&["t1", "t2"]);
        let a = engine.upsert_node(&id("t1"), Node::new("A")).expect("a").id;
        let b = engine.upsert_node(&id("t2"), Node::new("B")).expect("b").id;

        let err = engine
            .upsert_edge(&id("t1"), TimeEdge::new(a, b, "knows", day(2024, 1, 1)))
            .expect_err("cross tenant");
        assert!(matches!(err, StrataError::NotFound(_)));
    }

    #[test]
    fn failed_batch_commits_nothing() {
        let engine = engine_with(&["t1"]);
        let t1 = id("t1");
        let nodes = (0..5)
            .map(|i| Node::new(if i == 2 { "" } else { "N" }))
            .collect();

        let err = engine.batch_upsert_nodes(&t1, nodes).expect_err("invalid item");
        assert!(err.to_string().contains("item 2"));
        let stats = engine.stats(&t1).expect("stats");
        assert_eq!(stats.live_nodes, 0);
        assert_eq!(stats.head, Seq::ZERO);
    }

    #[test]
    fn tenant_delete_refuses_when_populated() {
        let engine = engine_with(&["t1"]);
        let t1 = id("t1");
        engine.upsert_node(&t1, Node::new("N")).expect("node");

        let err = engine.delete_tenant(&t1, false).expect_err("populated");
        assert!(matches!(err, StrataError::Conflict(_)));

        engine.delete_tenant(&t1, true).expect("cascade");
        assert!(matches!(
            engine.get_tenant(&t1),
            Err(StrataError::NotFound(_))
        ));
    }

    #[test]
    fn tenant_id_is_reusable_after_delete() {
        let engine = engine_with(&["t1"]);
        let t1 = id("t1");
        engine.delete_tenant(&t1, false).expect("empty delete");
        engine
            .create_tenant(NewTenant::new(t1.clone()))
            .expect("recreate");
        assert_eq!(engine.stats(&t1).expect("stats").head, Seq::ZERO);
    }

    #[test]
    fn suspended_tenant_is_read_only() {
        let engine = engine_with(&["t1"]);
        let t1 = id("t1");
        let node = engine.upsert_node(&t1, Node::new("N")).expect("node");
        engine
            .update_tenant(
                &t1,
                TenantPatch {
                    status: Some(TenantStatus::Suspended),
                    ..TenantPatch::default()
                },
            )
            .expect("suspend");

        let err = engine.upsert_node(&t1, Node::new("N")).expect_err("read only");
        assert!(matches!(err, StrataError::Conflict(_)));
        assert!(engine.get_node(&t1, node.id).is_ok());
    }

    #[test]
    fn history_survives_delete() {
        let engine = engine_with(&["t1"]);
        let t1 = id("t1");
        let node = engine.upsert_node(&t1, Node::new("N")).expect("node");
        engine.delete_node(&t1, node.id, false).expect("delete");

        assert!(matches!(
            engine.get_node(&t1, node.id),
            Err(StrataError::NotFound(_))
        ));
        let history = engine.node_history(&t1, node.id).expect("history");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].tx.to, Some(Seq(2)));
    }

    #[test]
    fn query_timeout_is_capped() {
        let config = EngineConfig {
            max_query_timeout: Duration::ZERO,
            ..EngineConfig::default()
        };
        let engine = Engine::in_memory(config);
        engine.create_tenant(NewTenant::new(id("t1"))).expect("create");
        let t1 = id("t1");
        engine.upsert_node(&t1, Node::new("N").with_alias("n")).expect("node");

        let query = Query::traverse(vec![crate::query::NodeRef::Alias("n".into())], 1)
            .with_timeout(60_000);
        let err = engine.execute(&t1, &query).expect_err("capped budget");
        assert!(matches!(err, StrataError::Timeout(_)));
    }
}
