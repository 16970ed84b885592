//! # Tenant Export Module
//!
//! Full, deterministic dump of one tenant partition.
//!
//! An export reads one snapshot: live nodes, and live edges optionally
//! narrowed to those valid at an instant. Nodes are ordered by id and edges
//! by `(from, to, kind, valid_from, id)`, so two exports of the same
//! snapshot are byte-identical once serialized.

use crate::graph::{EdgeView, NodeView, TenantGraph};
use crate::temporal::TxView;
use crate::tenant::Tenant;
use crate::types::Seq;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// EXPORT FORMAT
// =============================================================================

/// A tenant dump.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantExport {
    pub tenant: Tenant,
    /// Head sequence of the exported snapshot.
    pub head: Seq,
    /// Valid-time instant the edges were narrowed to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub as_of: Option<DateTime<Utc>>,
    pub nodes: Vec<NodeView>,
    pub edges: Vec<EdgeView>,
    pub exported_at: DateTime<Utc>,
}

/// Dump `graph` for `tenant`.
///
/// With `as_of`, only edges whose valid interval contains that instant are
/// included; nodes are always the live set.
#[must_use]
pub fn export_tenant(
    tenant: Tenant,
    graph: &TenantGraph,
    as_of: Option<DateTime<Utc>>,
) -> TenantExport {
    let nodes: Vec<NodeView> = graph.nodes_at(TxView::Current).collect();
    let mut edges: Vec<EdgeView> = graph
        .edges_at(TxView::Current)
        .filter(|e| as_of.is_none_or(|t| e.edge.interval().contains(t)))
        .collect();
    edges.sort_by(|a, b| {
        (
            a.edge.from_node_id,
            a.edge.to_node_id,
            &a.edge.kind,
            a.edge.valid_from,
            a.id,
        )
            .cmp(&(
                b.edge.from_node_id,
                b.edge.to_node_id,
                &b.edge.kind,
                b.edge.valid_from,
                b.id,
            ))
    });

    TenantExport {
        tenant,
        head: graph.head(),
        as_of,
        nodes,
        edges,
        exported_at: Utc::now(),
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::graph::{Mutation, Outcome};
    use crate::tenant::NewTenant;
    use crate::types::{Node, NodeId, TenantId, TimeEdge};
    use chrono::TimeZone;

    fn day(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).single().expect("date")
    }

    fn add(g: &mut TenantGraph, label: &str) -> NodeId {
        match g
            .apply(&Mutation::UpsertNode {
                node: Node::new(label),
            })
            .expect("node")
        {
            Outcome::NodeUpserted { id, .. } => id,
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn as_of_narrows_edges_only() {
        let id = TenantId::parse("t1").expect("id");
        let tenant = NewTenant::new(id.clone()).into_tenant(Utc::now());
        let mut g = TenantGraph::new(id);
        let a = add(&mut g, "A");
        let b = add(&mut g, "B");
        g.apply(&Mutation::UpsertEdge {
            edge: TimeEdge::new(a, b, "old", day(2020, 1, 1)).with_valid_to(day(2021, 1, 1)),
        })
        .expect("edge");
        g.apply(&Mutation::UpsertEdge {
            edge: TimeEdge::new(a, b, "new", day(2024, 1, 1)),
        })
        .expect("edge");

        let full = export_tenant(tenant.clone(), &g, None);
        assert_eq!(full.nodes.len(), 2);
        assert_eq!(full.edges.len(), 2);
        assert_eq!(full.head, Seq(4));

        let narrowed = export_tenant(tenant, &g, Some(day(2024, 6, 1)));
        assert_eq!(narrowed.nodes.len(), 2);
        assert_eq!(narrowed.edges.len(), 1);
        assert_eq!(narrowed.edges[0].edge.kind, "new");
    }
}
