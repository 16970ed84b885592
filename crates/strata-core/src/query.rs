//! # Query Module
//!
//! Structured graph queries and their executor.
//!
//! - Queries are JSON documents tagged by `type`
//! - Execution reads one immutable `TenantGraph` snapshot
//! - Results are sorted before limits apply, so a fixed snapshot and time
//!   filter always produce the same answer

use crate::graph::{EdgeView, NodeView, TenantGraph};
use crate::primitives::{MAX_QUERY_RESULTS, MAX_QUERY_START_NODES, MAX_TRAVERSAL_DEPTH};
use crate::temporal::{TimeFilter, TxView};
use crate::types::{EdgeId, NodeId, Props, Seq, StrataError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

// =============================================================================
// QUERY TYPES
// =============================================================================

/// Reference to a node by id or by alias.
///
/// ```json
/// {"id": "1b4e28ba-2fa1-11d2-883f-0016d3cca427"}
/// {"alias": "alice"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRef {
    Id(NodeId),
    Alias(String),
}

/// Which edges a traversal follows from each node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Outgoing,
    Incoming,
    Both,
}

fn default_depth() -> usize {
    1
}

/// Query operation types supported by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueryType {
    /// Breadth-first expansion from one or more start nodes.
    Traverse {
        start: Vec<NodeRef>,
        /// Edge kinds to follow; empty follows all.
        #[serde(default)]
        kinds: Vec<String>,
        #[serde(default)]
        direction: Direction,
        #[serde(default = "default_depth")]
        max_depth: usize,
        #[serde(default)]
        time: Option<TimeFilter>,
        #[serde(default)]
        as_of_seq: Option<Seq>,
        #[serde(default)]
        limit: Option<usize>,
    },

    /// Nodes matching labels and property equality.
    FindNodes {
        #[serde(default)]
        labels: Vec<String>,
        #[serde(default)]
        props: Props,
        #[serde(default)]
        as_of_seq: Option<Seq>,
        #[serde(default)]
        limit: Option<usize>,
    },

    /// Edges matching endpoints, kinds and a time filter.
    FindEdges {
        #[serde(default)]
        from: Option<NodeRef>,
        #[serde(default)]
        to: Option<NodeRef>,
        #[serde(default)]
        kinds: Vec<String>,
        #[serde(default)]
        time: Option<TimeFilter>,
        #[serde(default)]
        as_of_seq: Option<Seq>,
        #[serde(default)]
        limit: Option<usize>,
    },
}

impl QueryType {
    fn as_of_seq(&self) -> Option<Seq> {
        match self {
            Self::Traverse { as_of_seq, .. }
            | Self::FindNodes { as_of_seq, .. }
            | Self::FindEdges { as_of_seq, .. } => *as_of_seq,
        }
    }

    fn limit(&self) -> Option<usize> {
        match self {
            Self::Traverse { limit, .. }
            | Self::FindNodes { limit, .. }
            | Self::FindEdges { limit, .. } => *limit,
        }
    }

    /// Check the query shape against the engine limits.
    pub fn validate(&self) -> Result<(), StrataError> {
        if let Some(limit) = self.limit()
            && limit > MAX_QUERY_RESULTS
        {
            return Err(StrataError::BadRequest(format!(
                "limit {} exceeds the maximum of {}",
                limit, MAX_QUERY_RESULTS
            )));
        }
        match self {
            Self::Traverse {
                start,
                max_depth,
                time,
                ..
            } => {
                if start.is_empty() {
                    return Err(StrataError::BadRequest(
                        "traverse requires at least one start node".into(),
                    ));
                }
                if start.len() > MAX_QUERY_START_NODES {
                    return Err(StrataError::BadRequest(format!(
                        "traverse accepts at most {} start nodes",
                        MAX_QUERY_START_NODES
                    )));
                }
                if *max_depth > MAX_TRAVERSAL_DEPTH {
                    return Err(StrataError::BadRequest(format!(
                        "max_depth {} exceeds the maximum of {}",
                        max_depth, MAX_TRAVERSAL_DEPTH
                    )));
                }
                time.as_ref().map_or(Ok(()), TimeFilter::validate)
            }
            Self::FindNodes { .. } => Ok(()),
            Self::FindEdges { time, .. } => time.as_ref().map_or(Ok(()), TimeFilter::validate),
        }
    }
}

/// A structured query with optional timeout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    #[serde(flatten)]
    pub query_type: QueryType,
    /// Optional timeout in milliseconds, capped by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl Query {
    /// Create a new query with no timeout.
    #[must_use]
    pub fn new(query_type: QueryType) -> Self {
        Self {
            query_type,
            timeout_ms: None,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Outgoing traversal helper over all kinds at the current head.
    #[must_use]
    pub fn traverse(start: Vec<NodeRef>, max_depth: usize) -> Self {
        Self::new(QueryType::Traverse {
            start,
            kinds: Vec::new(),
            direction: Direction::Outgoing,
            max_depth,
            time: None,
            as_of_seq: None,
            limit: None,
        })
    }

    /// Label lookup helper.
    #[must_use]
    pub fn find_nodes(labels: Vec<String>) -> Self {
        Self::new(QueryType::FindNodes {
            labels,
            props: Props::new(),
            as_of_seq: None,
            limit: None,
        })
    }

    /// Edge-kind lookup helper.
    #[must_use]
    pub fn find_edges(kinds: Vec<String>, time: Option<TimeFilter>) -> Self {
        Self::new(QueryType::FindEdges {
            from: None,
            to: None,
            kinds,
            time,
            as_of_seq: None,
            limit: None,
        })
    }
}

/// The answer to a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Nodes ordered by id.
    pub nodes: Vec<NodeView>,
    /// Edges ordered by `(from, to, kind, valid_from, id)`.
    pub edges: Vec<EdgeView>,
    /// Whether `limit` cut either list.
    pub truncated: bool,
    /// Transaction-time sequence the result reflects.
    pub as_of_seq: Seq,
}

// =============================================================================
// DEADLINE
// =============================================================================

/// Wall-clock budget for one query.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    #[must_use]
    pub fn none() -> Self {
        Self { at: None }
    }

    #[must_use]
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now().checked_add(budget),
        }
    }

    pub fn check(&self) -> Result<(), StrataError> {
        match self.at {
            Some(at) if Instant::now() >= at => {
                Err(StrataError::Timeout("query deadline exceeded".into()))
            }
            _ => Ok(()),
        }
    }
}

// =============================================================================
// EXECUTOR
// =============================================================================

/// How often the flat scans look at the clock.
const DEADLINE_STRIDE: usize = 256;

/// Evaluates queries against one snapshot.
pub struct QueryExecutor<'a> {
    graph: &'a TenantGraph,
    deadline: Deadline,
}

impl<'a> QueryExecutor<'a> {
    #[must_use]
    pub fn new(graph: &'a TenantGraph, deadline: Deadline) -> Self {
        Self { graph, deadline }
    }

    /// Execute a query.
    ///
    /// # Errors
    /// - `BadRequest` on malformed shape or `as_of_seq` beyond the head
    /// - `Timeout` when the deadline passes mid-execution
    pub fn execute(&self, query: &QueryType) -> Result<QueryResult, StrataError> {
        query.validate()?;
        let view = TxView::from_option(query.as_of_seq());
        self.graph.check_view(view)?;

        let (nodes, edges) = match query {
            QueryType::Traverse {
                start,
                kinds,
                direction,
                max_depth,
                time,
                ..
            } => self.traverse(start, kinds, *direction, *max_depth, time.as_ref(), view)?,
            QueryType::FindNodes { labels, props, .. } => {
                (self.find_nodes(labels, props, view)?, Vec::new())
            }
            QueryType::FindEdges {
                from,
                to,
                kinds,
                time,
                ..
            } => (
                Vec::new(),
                self.find_edges(from.as_ref(), to.as_ref(), kinds, time.as_ref(), view)?,
            ),
        };

        let as_of_seq = match view {
            TxView::Current => self.graph.head(),
            TxView::AsOf(seq) => seq,
        };
        Ok(finish(nodes, edges, query.limit(), as_of_seq))
    }

    fn resolve(&self, node: &NodeRef, view: TxView) -> Option<NodeId> {
        match node {
            NodeRef::Id(id) => self.graph.node_at(*id, view).map(|_| *id),
            NodeRef::Alias(alias) => self.graph.resolve_alias(alias, view),
        }
    }

    fn edge_matches(edge: &EdgeView, kinds: &[String], time: Option<&TimeFilter>) -> bool {
        (kinds.is_empty() || kinds.iter().any(|k| *k == edge.edge.kind))
            && time.is_none_or(|t| t.matches(&edge.edge.interval()))
    }

    fn traverse(
        &self,
        start: &[NodeRef],
        kinds: &[String],
        direction: Direction,
        max_depth: usize,
        time: Option<&TimeFilter>,
        view: TxView,
    ) -> Result<(Vec<NodeView>, Vec<EdgeView>), StrataError> {
        let mut visited: BTreeSet<NodeId> =
            start.iter().filter_map(|r| self.resolve(r, view)).collect();
        let mut frontier: Vec<NodeId> = visited.iter().copied().collect();
        let mut edges: BTreeMap<EdgeId, EdgeView> = BTreeMap::new();

        for _ in 0..max_depth {
            if frontier.is_empty() {
                break;
            }
            let mut next = BTreeSet::new();
            for node in &frontier {
                self.deadline.check()?;

                let outgoing = matches!(direction, Direction::Outgoing | Direction::Both)
                    .then(|| self.graph.out_edge_ids(*node))
                    .into_iter()
                    .flatten();
                let incoming = matches!(direction, Direction::Incoming | Direction::Both)
                    .then(|| self.graph.in_edge_ids(*node))
                    .into_iter()
                    .flatten();

                for edge_id in outgoing.chain(incoming) {
                    let Some(edge) = self.graph.edge_at(edge_id, view) else {
                        continue;
                    };
                    if !Self::edge_matches(&edge, kinds, time) {
                        continue;
                    }
                    let neighbor = if edge.edge.from_node_id == *node {
                        edge.edge.to_node_id
                    } else {
                        edge.edge.from_node_id
                    };
                    if !visited.contains(&neighbor) {
                        next.insert(neighbor);
                    }
                    edges.entry(edge_id).or_insert(edge);
                }
            }
            visited.extend(next.iter().copied());
            frontier = next.into_iter().collect();
        }

        let nodes = visited
            .into_iter()
            .filter_map(|id| self.graph.node_at(id, view))
            .collect();
        Ok((nodes, edges.into_values().collect()))
    }

    fn find_nodes(
        &self,
        labels: &[String],
        props: &Props,
        view: TxView,
    ) -> Result<Vec<NodeView>, StrataError> {
        let mut found = Vec::new();
        for (i, node) in self.graph.nodes_at(view).enumerate() {
            if i % DEADLINE_STRIDE == 0 {
                self.deadline.check()?;
            }
            let label_ok = labels.is_empty() || labels.iter().any(|l| *l == node.node.label);
            let props_ok = props
                .iter()
                .all(|(k, v)| node.node.props.get(k) == Some(v));
            if label_ok && props_ok {
                found.push(node);
            }
        }
        Ok(found)
    }

    fn find_edges(
        &self,
        from: Option<&NodeRef>,
        to: Option<&NodeRef>,
        kinds: &[String],
        time: Option<&TimeFilter>,
        view: TxView,
    ) -> Result<Vec<EdgeView>, StrataError> {
        let from = match from {
            Some(r) => match self.resolve(r, view) {
                Some(id) => Some(id),
                None => return Ok(Vec::new()),
            },
            None => None,
        };
        let to = match to {
            Some(r) => match self.resolve(r, view) {
                Some(id) => Some(id),
                None => return Ok(Vec::new()),
            },
            None => None,
        };

        let mut found = Vec::new();
        for (i, edge) in self.graph.edges_at(view).enumerate() {
            if i % DEADLINE_STRIDE == 0 {
                self.deadline.check()?;
            }
            let ends_ok = from.is_none_or(|id| edge.edge.from_node_id == id)
                && to.is_none_or(|id| edge.edge.to_node_id == id);
            if ends_ok && Self::edge_matches(&edge, kinds, time) {
                found.push(edge);
            }
        }
        Ok(found)
    }
}

/// Sort, then cut to `limit`.
fn finish(
    mut nodes: Vec<NodeView>,
    mut edges: Vec<EdgeView>,
    limit: Option<usize>,
    as_of_seq: Seq,
) -> QueryResult {
    nodes.sort_by_key(|n| n.id);
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

    let cap = limit.unwrap_or(MAX_QUERY_RESULTS);
    let truncated = nodes.len() > cap || edges.len() > cap;
    nodes.truncate(cap);
    edges.truncate(cap);

    QueryResult {
        nodes,
        edges,
        truncated,
        as_of_seq,
    }
}

// =============================================================================
// TESTS
// =============================================================================
