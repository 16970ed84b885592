//! # Temporal Graph Store
//!
//! Append-only, bitemporal storage of nodes and edges for one tenant
//! partition.
//!
//! `TenantGraph` is built on persistent `im` maps: cloning it is O(1) and
//! the clone shares structure with the original. Writers mutate a clone and
//! publish it as the next snapshot; readers keep whatever snapshot they
//! already hold.
//!
//! ## Versioning
//!
//! A node or edge is a vector of versions, oldest first. Every version
//! carries a `TxRange`; at most the last version is open (current).
//! Updates and deletes never rewrite a version: they close its `tx.to`
//! and, for updates, append a new one.

use crate::temporal::{TxRange, TxView};
use crate::types::{EdgeId, Node, NodeId, Seq, StrataError, TenantId, TimeEdge};
use chrono::{DateTime, Utc};
use im::{OrdMap, OrdSet, Vector};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// MUTATIONS
// =============================================================================

/// A single graph write.
///
/// Mutations are what the journal records; replaying them in order against
/// an empty graph rebuilds the same state with the same ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Mutation {
    UpsertNode {
        node: Node,
    },
    UpsertEdge {
        edge: TimeEdge,
    },
    DeleteNode {
        id: NodeId,
        #[serde(default)]
        cascade: bool,
    },
    DeleteEdge {
        id: EdgeId,
    },
}

/// What a committed mutation did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    NodeUpserted { id: NodeId, created: bool },
    EdgeUpserted { id: EdgeId, created: bool },
    NodeDeleted { id: NodeId, closed_edges: Vec<EdgeId> },
    EdgeDeleted { id: EdgeId },
}

// =============================================================================
// VERSIONS & VIEWS
// =============================================================================

/// One recorded version of a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeVersion {
    pub node: Node,
    pub tx: TxRange,
}

/// One recorded version of an edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeVersion {
    pub edge: TimeEdge,
    pub tx: TxRange,
}

/// A node as seen through a transaction-time view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeView {
    pub id: NodeId,
    #[serde(flatten)]
    pub node: Node,
    /// Sequence number that created the node.
    pub created_seq: Seq,
    /// Sequence number that recorded the visible version.
    pub version_seq: Seq,
}

/// An edge as seen through a transaction-time view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeView {
    pub id: EdgeId,
    #[serde(flatten)]
    pub edge: TimeEdge,
    pub created_seq: Seq,
    pub version_seq: Seq,
}

/// Counts for one tenant partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStats {
    pub tenant: TenantId,
    pub head: Seq,
    pub live_nodes: usize,
    pub live_edges: usize,
    pub node_versions: usize,
    pub edge_versions: usize,
    /// Live node count per label.
    pub labels: BTreeMap<String, usize>,
    /// Live edge count per kind.
    pub kinds: BTreeMap<String, usize>,
}

/// Edge identity: a repeat upsert with the same key updates the same edge.
type EdgeKey = (NodeId, NodeId, String, DateTime<Utc>);

fn edge_key(edge: &TimeEdge) -> EdgeKey {
    (
        edge.from_node_id,
        edge.to_node_id,
        edge.kind.clone(),
        edge.valid_from,
    )
}

trait Versioned: Clone {
    fn tx(&self) -> &TxRange;
}

impl Versioned for NodeVersion {
    fn tx(&self) -> &TxRange {
        &self.tx
    }
}

impl Versioned for EdgeVersion {
    fn tx(&self) -> &TxRange {
        &self.tx
    }
}

/// The version visible under `view`. Only the last version can be current.
fn visible<T: Versioned>(versions: &Vector<T>, view: TxView) -> Option<&T> {
    match view {
        TxView::Current => versions.back().filter(|v| v.tx().is_current()),
        TxView::AsOf(_) => versions.iter().rev().find(|v| view.sees(v.tx())),
    }
}

// =============================================================================
// TENANT GRAPH
// =============================================================================

/// The full bitemporal graph of one tenant.
#[derive(Debug, Clone)]
pub struct TenantGraph {
    tenant: TenantId,

    /// Last applied sequence number.
    head: Seq,

    /// Node versions, oldest first.
    nodes: OrdMap<NodeId, Vector<NodeVersion>>,

    /// Edge versions, oldest first.
    edges: OrdMap<EdgeId, Vector<EdgeVersion>>,

    /// Alias -> live node.
    alias_index: OrdMap<String, NodeId>,

    /// Edge identity -> live edge.
    edge_key_index: OrdMap<EdgeKey, EdgeId>,

    /// Every edge ever recorded, by endpoint. Entries are never removed so
    /// that as-of traversals can still reach closed edges.
    out_edges: OrdMap<NodeId, OrdSet<EdgeId>>,
    in_edges: OrdMap<NodeId, OrdSet<EdgeId>>,
}

impl TenantGraph {
    /// Create an empty graph for a tenant.
    #[must_use]
    pub fn new(tenant: TenantId) -> Self {
        Self {
            tenant,
            head: Seq::ZERO,
            nodes: OrdMap::new(),
            edges: OrdMap::new(),
            alias_index: OrdMap::new(),
            edge_key_index: OrdMap::new(),
            out_edges: OrdMap::new(),
            in_edges: OrdMap::new(),
        }
    }

    #[must_use]
    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    #[must_use]
    pub fn head(&self) -> Seq {
        self.head
    }

    /// Whether the tenant owns no live nodes and no live edges.
    #[must_use]
    pub fn is_live_empty(&self) -> bool {
        self.alias_index.is_empty()
            && self.edge_key_index.is_empty()
            && self
                .nodes
                .values()
                .all(|v| v.back().is_none_or(|last| !last.tx.is_current()))
    }

    /// Validate a transaction-time view against the head.
    pub fn check_view(&self, view: TxView) -> Result<(), StrataError> {
        match view {
            TxView::AsOf(seq) if seq > self.head => Err(StrataError::BadRequest(format!(
                "as_of_seq {} is beyond tenant head {}",
                seq, self.head
            ))),
            _ => Ok(()),
        }
    }

    // -------------------------------------------------------------------------
    // WRITES
    // -------------------------------------------------------------------------

    /// Apply one mutation at the next sequence number.
    ///
    /// On error the graph may be partially modified; callers apply against
    /// a clone and discard it on failure.
    pub fn apply(&mut self, mutation: &Mutation) -> Result<Outcome, StrataError> {
        let seq = self.head.next();
        let outcome = match mutation {
            Mutation::UpsertNode { node } => self.upsert_node(node, seq),
            Mutation::UpsertEdge { edge } => self.upsert_edge(edge, seq)?,
            Mutation::DeleteNode { id, cascade } => self.delete_node(*id, *cascade, seq)?,
            Mutation::DeleteEdge { id } => self.delete_edge(*id, seq)?,
        };
        self.head = seq;
        Ok(outcome)
    }

    fn upsert_node(&mut self, node: &Node, seq: Seq) -> Outcome {
        let existing = node
            .id_alias
            .as_ref()
            .and_then(|alias| self.alias_index.get(alias).copied());

        let version = NodeVersion {
            node: node.clone(),
            tx: TxRange::open(seq),
        };

        match existing {
            Some(id) => {
                if let Some(versions) = self.nodes.get_mut(&id) {
                    if let Some(last) = versions.back_mut() {
                        last.tx.to = Some(seq);
                    }
                    versions.push_back(version);
                }
                Outcome::NodeUpserted { id, created: false }
            }
            None => {
                let id = NodeId::derive(&self.tenant, seq);
                if let Some(alias) = &node.id_alias {
                    self.alias_index.insert(alias.clone(), id);
                }
                self.nodes.insert(id, Vector::unit(version));
                Outcome::NodeUpserted { id, created: true }
            }
        }
    }

    fn upsert_edge(&mut self, edge: &TimeEdge, seq: Seq) -> Result<Outcome, StrataError> {
        for endpoint in [edge.from_node_id, edge.to_node_id] {
            if !self.is_node_live(endpoint) {
                return Err(StrataError::NotFound(format!(
                    "node {} in tenant {}",
                    endpoint, self.tenant
                )));
            }
        }

        let key = edge_key(edge);
        let version = EdgeVersion {
            edge: edge.clone(),
            tx: TxRange::open(seq),
        };

        if let Some(id) = self.edge_key_index.get(&key).copied() {
            if let Some(versions) = self.edges.get_mut(&id) {
                if let Some(last) = versions.back_mut() {
                    last.tx.to = Some(seq);
                }
                versions.push_back(version);
            }
            return Ok(Outcome::EdgeUpserted { id, created: false });
        }

        let id = EdgeId::derive(&self.tenant, seq);
        self.edges.insert(id, Vector::unit(version));
        self.edge_key_index.insert(key, id);
        Self::index_endpoint(&mut self.out_edges, edge.from_node_id, id);
        Self::index_endpoint(&mut self.in_edges, edge.to_node_id, id);
        Ok(Outcome::EdgeUpserted { id, created: true })
    }

    fn index_endpoint(index: &mut OrdMap<NodeId, OrdSet<EdgeId>>, node: NodeId, edge: EdgeId) {
        let mut set = index.get(&node).cloned().unwrap_or_default();
        set.insert(edge);
        index.insert(node, set);
    }

    fn delete_node(&mut self, id: NodeId, cascade: bool, seq: Seq) -> Result<Outcome, StrataError> {
        if !self.is_node_live(id) {
            return Err(StrataError::NotFound(format!(
                "node {} in tenant {}",
                id, self.tenant
            )));
        }

        let touching = self.live_edges_touching(id);
        if !touching.is_empty() && !cascade {
            return Err(StrataError::Conflict(format!(
                "node {} still has {} live edge(s); delete them first or pass cascade=true",
                id,
                touching.len()
            )));
        }

        for edge_id in &touching {
            self.close_edge(*edge_id, seq);
        }

        if let Some(versions) = self.nodes.get_mut(&id)
            && let Some(last) = versions.back_mut()
        {
            last.tx.to = Some(seq);
            if let Some(alias) = &last.node.id_alias {
                self.alias_index.remove(alias);
            }
        }

        Ok(Outcome::NodeDeleted {
            id,
            closed_edges: touching,
        })
    }

    fn delete_edge(&mut self, id: EdgeId, seq: Seq) -> Result<Outcome, StrataError> {
        if self.edge_at(id, TxView::Current).is_none() {
            return Err(StrataError::NotFound(format!(
                "edge {} in tenant {}",
                id, self.tenant
            )));
        }
        self.close_edge(id, seq);
        Ok(Outcome::EdgeDeleted { id })
    }

    fn close_edge(&mut self, id: EdgeId, seq: Seq) {
        if let Some(versions) = self.edges.get_mut(&id)
            && let Some(last) = versions.back_mut()
            && last.tx.is_current()
        {
            last.tx.to = Some(seq);
            self.edge_key_index.remove(&edge_key(&last.edge));
        }
    }

    /// Live edges with `node` as either endpoint, sorted by id.
    fn live_edges_touching(&self, node: NodeId) -> Vec<EdgeId> {
        let mut ids: OrdSet<EdgeId> = OrdSet::new();
        for index in [&self.out_edges, &self.in_edges] {
            if let Some(set) = index.get(&node) {
                for id in set {
                    if self.edge_at(*id, TxView::Current).is_some() {
                        ids.insert(*id);
                    }
                }
            }
        }
        ids.into_iter().collect()
    }

    // -------------------------------------------------------------------------
    // READS
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn is_node_live(&self, id: NodeId) -> bool {
        self.node_at(id, TxView::Current).is_some()
    }

    /// The node as seen through `view`, if it existed then.
    #[must_use]
    pub fn node_at(&self, id: NodeId, view: TxView) -> Option<NodeView> {
        let versions = self.nodes.get(&id)?;
        let version = visible(versions, view)?;
        let created_seq = versions.front().map_or(version.tx.from, |v| v.tx.from);
        Some(NodeView {
            id,
            node: version.node.clone(),
            created_seq,
            version_seq: version.tx.from,
        })
    }

    /// The edge as seen through `view`, if it existed then.
    #[must_use]
    pub fn edge_at(&self, id: EdgeId, view: TxView) -> Option<EdgeView> {
        let versions = self.edges.get(&id)?;
        let version = visible(versions, view)?;
        let created_seq = versions.front().map_or(version.tx.from, |v| v.tx.from);
        Some(EdgeView {
            id,
            edge: version.edge.clone(),
            created_seq,
            version_seq: version.tx.from,
        })
    }

    /// Resolve an alias to the node that carried it under `view`.
    #[must_use]
    pub fn resolve_alias(&self, alias: &str, view: TxView) -> Option<NodeId> {
        match view {
            TxView::Current => self.alias_index.get(alias).copied(),
            TxView::AsOf(_) => self.nodes.iter().find_map(|(id, versions)| {
                visible(versions, view)
                    .filter(|v| v.node.id_alias.as_deref() == Some(alias))
                    .map(|_| *id)
            }),
        }
    }

    /// All nodes visible under `view`, ordered by id.
    pub fn nodes_at(&self, view: TxView) -> impl Iterator<Item = NodeView> + '_ {
        self.nodes.keys().filter_map(move |id| self.node_at(*id, view))
    }

    /// All edges visible under `view`, ordered by id.
    pub fn edges_at(&self, view: TxView) -> impl Iterator<Item = EdgeView> + '_ {
        self.edges.keys().filter_map(move |id| self.edge_at(*id, view))
    }

    /// Ids of every edge ever leaving `node`.
    pub fn out_edge_ids(&self, node: NodeId) -> impl Iterator<Item = EdgeId> + '_ {
        self.out_edges
            .get(&node)
            .into_iter()
            .flat_map(|set| set.iter().copied())
    }

    /// Ids of every edge ever entering `node`.
    pub fn in_edge_ids(&self, node: NodeId) -> impl Iterator<Item = EdgeId> + '_ {
        self.in_edges
            .get(&node)
            .into_iter()
            .flat_map(|set| set.iter().copied())
    }

    /// Every recorded version of a node, oldest first.
    #[must_use]
    pub fn node_history(&self, id: NodeId) -> Option<Vec<NodeVersion>> {
        self.nodes.get(&id).map(|v| v.iter().cloned().collect())
    }

    /// Every recorded version of an edge, oldest first.
    #[must_use]
    pub fn edge_history(&self, id: EdgeId) -> Option<Vec<EdgeVersion>> {
        self.edges.get(&id).map(|v| v.iter().cloned().collect())
    }

    #[must_use]
    pub fn stats(&self) -> GraphStats {
        let mut labels = BTreeMap::new();
        let mut kinds = BTreeMap::new();
        let mut live_nodes = 0;
        let mut live_edges = 0;

        for node in self.nodes_at(TxView::Current) {
            live_nodes += 1;
            *labels.entry(node.node.label).or_insert(0) += 1;
        }
        for edge in self.edges_at(TxView::Current) {
            live_edges += 1;
            *kinds.entry(edge.edge.kind).or_insert(0) += 1;
        }

        GraphStats {
            tenant: self.tenant.clone(),
            head: self.head,
            live_nodes,
            live_edges,
            node_versions: self.nodes.values().map(Vector::len).sum(),
            edge_versions: self.edges.values().map(Vector::len).sum(),
            labels,
            kinds,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn tenant() -> TenantId {
        TenantId::parse("t1").expect("tenant")
    }

    fn day(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).single().expect("date")
    }

    fn upsert(graph: &mut TenantGraph, node: Node) -> NodeId {
        match graph.apply(&Mutation::UpsertNode { node }).expect("upsert") {
            Outcome::NodeUpserted { id, .. } => id,
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    fn link(graph: &mut TenantGraph, from: NodeId, to: NodeId, kind: &str) -> EdgeId {
        let edge = TimeEdge::new(from, to, kind, day(2024, 1, 1));
        match graph.apply(&Mutation::UpsertEdge { edge }).expect("edge") {
            Outcome::EdgeUpserted { id, .. } => id,
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn alias_upsert_updates_in_place() {
        let mut g = TenantGraph::new(tenant());
        let a = upsert(&mut g, Node::new("Person").with_alias("alice").with_prop("age", 30));
        let b = upsert(&mut g, Node::new("Person").with_alias("alice").with_prop("age", 31));

        assert_eq!(a, b);
        assert_eq!(g.head(), Seq(2));
        let view = g.node_at(a, TxView::Current).expect("live");
        assert_eq!(view.node.props["age"], crate::types::PropValue::Int(31));
        assert_eq!(view.created_seq, Seq(1));
        assert_eq!(view.version_seq, Seq(2));
        assert_eq!(g.node_history(a).expect("history").len(), 2);

        let before = g.node_at(a, TxView::AsOf(Seq(1))).expect("as of 1");
        assert_eq!(before.node.props["age"], crate::types::PropValue::Int(30));
    }

    #[test]
    fn nodes_without_alias_are_always_new() {
        let mut g = TenantGraph::new(tenant());
        let a = upsert(&mut g, Node::new("Doc"));
        let b = upsert(&mut g, Node::new("Doc"));
        assert_ne!(a, b);
    }

    #[test]
    fn edge_requires_live_endpoints() {
        let mut g = TenantGraph::new(tenant());
        let a = upsert(&mut g, Node::new("Person"));
        let stranger = NodeId::derive(&TenantId::parse("t2").expect("t2"), Seq(1));

        let edge = TimeEdge::new(a, stranger, "knows", day(2024, 1, 1));
        let err = g.apply(&Mutation::UpsertEdge { edge }).expect_err("dangling");
        assert!(matches!(err, StrataError::NotFound(_)));
    }

    #[test]
    fn repeat_edge_key_keeps_id() {
        let mut g = TenantGraph::new(tenant());
        let a = upsert(&mut g, Node::new("Person"));
        let b = upsert(&mut g, Node::new("Person"));
        let e1 = link(&mut g, a, b, "knows");
        let e2 = link(&mut g, a, b, "knows");
        let e3 = link(&mut g, a, b, "likes");

        assert_eq!(e1, e2);
        assert_ne!(e1, e3);
        assert_eq!(g.edge_history(e1).expect("history").len(), 2);
        assert_eq!(g.stats().live_edges, 2);
    }

    #[test]
    fn delete_node_refuses_with_live_edges() {
        let mut g = TenantGraph::new(tenant());
        let a = upsert(&mut g, Node::new("Person"));
        let b = upsert(&mut g, Node::new("Person"));
        let e = link(&mut g, a, b, "knows");

        let err = g
            .apply(&Mutation::DeleteNode {
                id: b,
                cascade: false,
            })
            .expect_err("refused");
        assert!(matches!(err, StrataError::Conflict(_)));

        let outcome = g
            .apply(&Mutation::DeleteNode {
                id: b,
                cascade: true,
            })
            .expect("cascade");
        assert_eq!(
            outcome,
            Outcome::NodeDeleted {
                id: b,
                closed_edges: vec![e]
            }
        );
        assert!(!g.is_node_live(b));
        assert!(g.edge_at(e, TxView::Current).is_none());
        assert!(g.edge_at(e, TxView::AsOf(Seq(3))).is_some());
    }

    #[test]
    fn deleted_alias_is_reusable() {
        let mut g = TenantGraph::new(tenant());
        let a = upsert(&mut g, Node::new("Person").with_alias("alice"));
        g.apply(&Mutation::DeleteNode {
            id: a,
            cascade: false,
        })
        .expect("delete");
        let a2 = upsert(&mut g, Node::new("Person").with_alias("alice"));

        assert_ne!(a, a2);
        assert_eq!(g.resolve_alias("alice", TxView::Current), Some(a2));
        assert_eq!(g.resolve_alias("alice", TxView::AsOf(Seq(1))), Some(a));
        assert_eq!(g.resolve_alias("alice", TxView::AsOf(Seq(2))), None);
    }

    #[test]
    fn delete_missing_is_not_found() {
        let mut g = TenantGraph::new(tenant());
        let ghost = NodeId::derive(&tenant(), Seq(99));
        let err = g
            .apply(&Mutation::DeleteNode {
                id: ghost,
                cascade: true,
            })
            .expect_err("missing");
        assert!(matches!(err, StrataError::NotFound(_)));
        assert_eq!(g.head(), Seq::ZERO);
    }

    #[test]
    fn clone_is_an_independent_snapshot() {
        let mut g = TenantGraph::new(tenant());
        upsert(&mut g, Node::new("Person"));
        let snapshot = g.clone();
        upsert(&mut g, Node::new("Person"));

        assert_eq!(snapshot.stats().live_nodes, 1);
        assert_eq!(g.stats().live_nodes, 2);
    }

    #[test]
    fn view_beyond_head_is_rejected() {
        let g = TenantGraph::new(tenant());
        assert!(g.check_view(TxView::AsOf(Seq(1))).is_err());
        assert!(g.check_view(TxView::AsOf(Seq::ZERO)).is_ok());
    }

    #[test]
    fn mutation_json_shape() {
        let json = serde_json::json!({
            "op": "upsert_node",
            "node": {"id_alias": "a", "label": "Person", "props": {"x": 1}}
        });
        let m: Mutation = serde_json::from_value(json).expect("mutation");
        assert!(matches!(m, Mutation::UpsertNode { ref node } if node.label == "Person"));
    }
}
