//! # Property-Based Tests
//!
//! Determinism, idempotence and atomicity invariants of the engine,
//! checked with proptest.

#![allow(clippy::unwrap_used, clippy::panic)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::collection::vec;
use proptest::prelude::*;
use strata_core::{
    Engine, EngineConfig, Mutation, NewTenant, Node, NodeId, NodeRef, PropValue, Query, QueryType, Seq,
    TenantGraph, TenantId, TimeEdge, TimeFilter,
};

fn tenant(id: &str) -> TenantId {
    TenantId::parse(id).expect("tenant id")
}

fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .expect("date")
}

const KINDS: [&str; 3] = ["knows", "likes", "works_with"];

/// Insert `n` aliased nodes, then edges in the given order.
fn build(n: usize, edges: &[(usize, usize, usize, i64)]) -> (Engine, Vec<NodeId>) {
    let engine = Engine::in_memory(EngineConfig::default());
    let t = tenant("prop");
    engine.create_tenant(NewTenant::new(t.clone())).expect("tenant");

    let nodes: Vec<Node> = (0..n)
        .map(|i| Node::new("N").with_alias(format!("n{}", i)))
        .collect();
    let ids: Vec<NodeId> = engine
        .batch_upsert_nodes(&t, nodes)
        .expect("nodes")
        .into_iter()
        .map(|w| w.id)
        .collect();

    let edges: Vec<TimeEdge> = edges
        .iter()
        .map(|&(from, to, kind, offset)| {
            TimeEdge::new(
                ids[from % n],
                ids[to % n],
                KINDS[kind % KINDS.len()],
                epoch() + Duration::days(offset),
            )
        })
        .collect();
    engine.batch_upsert_edges(&t, edges).expect("edges");
    (engine, ids)
}

fn edge_strategy() -> impl Strategy<Value = Vec<(usize, usize, usize, i64)>> {
    vec((0usize..6, 0usize..6, 0usize..3, 0i64..365), 1..40)
}

// =============================================================================
// PROPERTY TESTS
// =============================================================================

proptest! {
    /// Same sequence of mutations produces identical ids in two engines.
    #[test]
    fn determinism_identical_input_produces_identical_ids(edges in edge_strategy()) {
        let (e1, ids1) = build(6, &edges);
        let (e2, ids2) = build(6, &edges);
        prop_assert_eq!(&ids1, &ids2);

        let t = tenant("prop");
        let q = Query::find_edges(Vec::new(), None);
        let r1 = e1.execute(&t, &q).expect("query");
        let r2 = e2.execute(&t, &q).expect("query");
        prop_assert_eq!(r1.edges, r2.edges);
    }

    /// Traversal answers at a fixed instant do not depend on edge insertion order.
    #[test]
    fn traversal_ignores_edge_insertion_order(
        (edges, shuffled) in edge_strategy().prop_flat_map(|e| {
            let s = Just(e.clone()).prop_shuffle();
            (Just(e), s)
        }),
        at in 0i64..365,
    ) {
        let (e1, ids1) = build(6, &edges);
        let (e2, ids2) = build(6, &shuffled);
        prop_assert_eq!(&ids1, &ids2);

        let query = Query::new(QueryType::Traverse {
            start: vec![NodeRef::Alias("n0".into())],
            kinds: Vec::new(),
            direction: strata_core::Direction::Both,
            max_depth: 3,
            time: Some(TimeFilter::AsOf(epoch() + Duration::days(at))),
            as_of_seq: None,
            limit: None,
        });
        let t = tenant("prop");
        let r1 = e1.execute(&t, &query).expect("query");
        let r2 = e2.execute(&t, &query).expect("query");

        let project = |r: &strata_core::QueryResult| -> Vec<(NodeId, NodeId, String, DateTime<Utc>)> {
            r.edges
                .iter()
                .map(|e| (e.edge.from_node_id, e.edge.to_node_id, e.edge.kind.clone(), e.edge.valid_from))
                .collect()
        };
        let n1: Vec<NodeId> = r1.nodes.iter().map(|n| n.id).collect();
        let n2: Vec<NodeId> = r2.nodes.iter().map(|n| n.id).collect();
        prop_assert_eq!(n1, n2);
        prop_assert_eq!(project(&r1), project(&r2));
    }

    /// Upserting the same alias repeatedly yields one node holding the last props.
    #[test]
    fn alias_upsert_is_idempotent(values in vec(any::<i64>(), 1..20)) {
        let engine = Engine::in_memory(EngineConfig::default());
        let t = tenant("prop");
        engine.create_tenant(NewTenant::new(t.clone())).expect("tenant");

        let mut id = None;
        for v in &values {
            let w = engine
                .upsert_node(&t, Node::new("Counter").with_alias("c").with_prop("v", *v))
                .expect("upsert");
            prop_assert!(id.is_none_or(|prev| prev == w.id));
            id = Some(w.id);
        }

        let stats = engine.stats(&t).expect("stats");
        prop_assert_eq!(stats.live_nodes, 1);
        prop_assert_eq!(stats.head, Seq(values.len() as u64));
        let node = engine.get_node(&t, id.expect("id")).expect("node");
        let last = *values.last().expect("non-empty");
        prop_assert_eq!(&node.node.props["v"], &PropValue::Int(last));
    }

    /// A batch with one invalid item leaves the graph untouched.
    #[test]
    fn invalid_item_rolls_back_batch(len in 1usize..30, bad in any::<prop::sample::Index>()) {
        let bad = bad.index(len);
        let mutations: Vec<Mutation> = (0..len)
            .map(|i| Mutation::UpsertNode {
                node: Node::new(if i == bad { "" } else { "N" }),
            })
            .collect();
        let graph = TenantGraph::new(tenant("prop"));
        let err = strata_core::Ingestor::apply_batch(&graph, &mutations).expect_err("invalid");
        let prefix = format!("item {}:", bad);
        prop_assert!(err.to_string().contains(&prefix));
        prop_assert_eq!(graph.head(), Seq::ZERO);
    }

    /// Writes to one tenant never change another tenant's answers.
    #[test]
    fn tenants_are_isolated(edges in edge_strategy()) {
        let (engine, _) = build(6, &edges);
        let other = tenant("other");
        engine.create_tenant(NewTenant::new(other.clone())).expect("tenant");
        engine.upsert_node(&other, Node::new("N").with_alias("n0")).expect("node");

        let q = Query::find_edges(Vec::new(), None);
        let before = engine.execute(&tenant("prop"), &q).expect("query");
        engine
            .upsert_node(&other, Node::new("N").with_alias("n1"))
            .expect("node");
        let after = engine.execute(&tenant("prop"), &q).expect("query");
        prop_assert_eq!(before, after);
        prop_assert_eq!(engine.execute(&other, &q).expect("query").edges.len(), 0);
    }
}

// =============================================================================
// JOURNAL REPLAY
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Reopening a journal reproduces the exact same graph.
    #[test]
    fn journal_replay_reproduces_state(edges in edge_strategy()) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("strata.redb");
        let t = tenant("prop");
        let q = Query::find_edges(Vec::new(), None);

        let before = {
            let engine = Engine::open(&path, EngineConfig::default()).expect("open");
            engine.create_tenant(NewTenant::new(t.clone())).expect("tenant");
            let nodes: Vec<Node> = (0..6).map(|i| Node::new("N").with_alias(format!("n{}", i))).collect();
            let ids: Vec<NodeId> = engine
                .batch_upsert_nodes(&t, nodes)
                .expect("nodes")
                .into_iter()
                .map(|w| w.id)
                .collect();
            for &(from, to, kind, offset) in &edges {
                engine
                    .upsert_edge(&t, TimeEdge::new(ids[from], ids[to], KINDS[kind], epoch() + Duration::days(offset)))
                    .expect("edge");
            }
            (engine.stats(&t).expect("stats"), engine.execute(&t, &q).expect("query"))
        };

        let reopened = Engine::open(&path, EngineConfig::default()).expect("reopen");
        prop_assert_eq!(reopened.stats(&t).expect("stats"), before.0);
        prop_assert_eq!(reopened.execute(&t, &q).expect("query"), before.1);
    }
}
