//! # Ingestor Module
//!
//! Mutation validation and all-or-nothing batch application.
//!
//! - Validate nodes, edges and property bags before touching the graph
//! - Apply a batch against a copy of the snapshot, never the published one
//! - Report the index of the first failing item
//! - No schema inference or enrichment

use crate::graph::{Mutation, Outcome, TenantGraph};
use crate::primitives::{
    MAX_ALIAS_LENGTH, MAX_BATCH_SIZE, MAX_LABEL_LENGTH, MAX_PROP_DEPTH, MAX_PROP_KEY_LENGTH,
};
use crate::temporal::{TxView, ValidInterval};
use crate::types::{Node, NodeId, PropValue, Props, StrataError, TimeEdge};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The Ingestor validates writes and applies them as one unit.
pub struct Ingestor;

impl Ingestor {
    /// Validate a node.
    ///
    /// A node is valid if:
    /// - Label is non-empty and within length limits
    /// - Alias, when present, is non-empty and within length limits
    /// - Props pass `validate_props`
    pub fn validate_node(node: &Node) -> Result<(), StrataError> {
        Self::validate_tag("label", &node.label)?;
        if let Some(alias) = &node.id_alias {
            if alias.is_empty() {
                return Err(StrataError::BadRequest("id_alias must not be empty".into()));
            }
            if alias.len() > MAX_ALIAS_LENGTH {
                return Err(StrataError::BadRequest(format!(
                    "id_alias exceeds {} bytes",
                    MAX_ALIAS_LENGTH
                )));
            }
        }
        Self::validate_props(&node.props)
    }

    /// Validate an edge's kind, valid-time interval and props.
    ///
    /// Endpoint existence is checked by the graph, not here.
    pub fn validate_edge(edge: &TimeEdge) -> Result<(), StrataError> {
        Self::validate_tag("kind", &edge.kind)?;
        ValidInterval::new(edge.valid_from, edge.valid_to)?;
        Self::validate_props(&edge.props)
    }

    /// Validate a property bag: non-empty bounded keys, finite floats,
    /// bounded nesting.
    pub fn validate_props(props: &Props) -> Result<(), StrataError> {
        for (key, value) in props {
            Self::validate_key(key)?;
            Self::validate_value(key, value, 1)?;
        }
        Ok(())
    }

    fn validate_tag(what: &str, tag: &str) -> Result<(), StrataError> {
        if tag.is_empty() {
            return Err(StrataError::BadRequest(format!("{} must not be empty", what)));
        }
        if tag.len() > MAX_LABEL_LENGTH {
            return Err(StrataError::BadRequest(format!(
                "{} exceeds {} bytes",
                what, MAX_LABEL_LENGTH
            )));
        }
        Ok(())
    }

    fn validate_key(key: &str) -> Result<(), StrataError> {
        if key.is_empty() {
            return Err(StrataError::BadRequest("property key must not be empty".into()));
        }
        if key.len() > MAX_PROP_KEY_LENGTH {
            return Err(StrataError::BadRequest(format!(
                "property key exceeds {} bytes",
                MAX_PROP_KEY_LENGTH
            )));
        }
        Ok(())
    }

    fn validate_value(path: &str, value: &PropValue, depth: usize) -> Result<(), StrataError> {
        if depth > MAX_PROP_DEPTH {
            return Err(StrataError::BadRequest(format!(
                "property '{}' nests deeper than {}",
                path, MAX_PROP_DEPTH
            )));
        }
        match value {
            PropValue::Float(f) if !f.is_finite() => Err(StrataError::BadRequest(format!(
                "property '{}' is not a finite number",
                path
            ))),
            PropValue::List(items) => items
                .iter()
                .try_for_each(|item| Self::validate_value(path, item, depth + 1)),
            PropValue::Map(map) => map.iter().try_for_each(|(key, item)| {
                Self::validate_key(key)?;
                Self::validate_value(path, item, depth + 1)
            }),
            _ => Ok(()),
        }
    }

    /// Validate a mutation's payload without consulting the graph.
    pub fn validate_mutation(mutation: &Mutation) -> Result<(), StrataError> {
        match mutation {
            Mutation::UpsertNode { node } => Self::validate_node(node),
            Mutation::UpsertEdge { edge } => Self::validate_edge(edge),
            Mutation::DeleteNode { .. } | Mutation::DeleteEdge { .. } => Ok(()),
        }
    }

    /// Apply a batch to a copy of `snapshot`.
    ///
    /// Returns the next snapshot and one outcome per mutation. Any failing
    /// item fails the whole batch with an error naming its index; `snapshot`
    /// itself is never modified.
    ///
    /// # Errors
    /// - `BadRequest` if the batch exceeds `MAX_BATCH_SIZE` or an item is malformed
    /// - `NotFound` / `Conflict` from the graph, prefixed with the item index
    pub fn apply_batch(
        snapshot: &TenantGraph,
        mutations: &[Mutation],
    ) -> Result<(TenantGraph, Vec<Outcome>), StrataError> {
        if mutations.len() > MAX_BATCH_SIZE {
            return Err(StrataError::BadRequest(format!(
                "batch of {} items exceeds the limit of {}",
                mutations.len(),
                MAX_BATCH_SIZE
            )));
        }

        for (index, mutation) in mutations.iter().enumerate() {
            Self::validate_mutation(mutation).map_err(|e| e.at_index(index))?;
        }

        let mut next = snapshot.clone();
        let mut outcomes = Vec::with_capacity(mutations.len());
        for (index, mutation) in mutations.iter().enumerate() {
            let outcome = next.apply(mutation).map_err(|e| e.at_index(index))?;
            outcomes.push(outcome);
        }

        Ok((next, outcomes))
    }

    /// Turn an ingest document into one batch of mutations.
    ///
    /// Nodes come first; edge aliases are resolved against the snapshot as
    /// it would look after those nodes are applied, so a document may link
    /// nodes it creates itself.
    pub fn plan_document(
        snapshot: &TenantGraph,
        doc: &IngestDocument,
    ) -> Result<Vec<Mutation>, StrataError> {
        let total = doc.nodes.len() + doc.edges.len();
        if total > MAX_BATCH_SIZE {
            return Err(StrataError::BadRequest(format!(
                "document of {} items exceeds the limit of {}",
                total, MAX_BATCH_SIZE
            )));
        }

        let mut mutations: Vec<Mutation> = doc
            .nodes
            .iter()
            .cloned()
            .map(|node| Mutation::UpsertNode { node })
            .collect();
        let (staged, _) = Self::apply_batch(snapshot, &mutations)?;

        let offset = mutations.len();
        for (i, edge) in doc.edges.iter().enumerate() {
            let edge = edge.resolve(&staged).map_err(|e| e.at_index(offset + i))?;
            mutations.push(Mutation::UpsertEdge { edge });
        }
        Ok(mutations)
    }
}

// =============================================================================
// INGEST DOCUMENTS
// =============================================================================

/// An edge whose endpoints may be given by id or by alias.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestEdge {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_node_id: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_alias: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_node_id: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_alias: Option<String>,
    pub kind: String,
    pub valid_from: DateTime<Utc>,
    #[serde(default)]
    pub valid_to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub props: Props,
}

impl IngestEdge {
    fn endpoint(
        graph: &TenantGraph,
        side: &str,
        id: Option<NodeId>,
        alias: Option<&str>,
    ) -> Result<NodeId, StrataError> {
        match (id, alias) {
            (Some(id), None) => Ok(id),
            (None, Some(alias)) => graph
                .resolve_alias(alias, TxView::Current)
                .ok_or_else(|| StrataError::NotFound(format!("node alias '{}'", alias))),
            _ => Err(StrataError::BadRequest(format!(
                "edge needs exactly one of {side}_node_id or {side}_alias"
            ))),
        }
    }

    /// Resolve aliases to ids against `graph`.
    pub fn resolve(&self, graph: &TenantGraph) -> Result<TimeEdge, StrataError> {
        let from = Self::endpoint(graph, "from", self.from_node_id, self.from_alias.as_deref())?;
        let to = Self::endpoint(graph, "to", self.to_node_id, self.to_alias.as_deref())?;
        Ok(TimeEdge {
            from_node_id: from,
            to_node_id: to,
            kind: self.kind.clone(),
            valid_from: self.valid_from,
            valid_to: self.valid_to,
            props: self.props.clone(),
        })
    }
}

/// A bulk load file: `{"nodes": [...], "edges": [...]}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestDocument {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<IngestEdge>,
}

impl IngestDocument {
    /// Total number of items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len() + self.edges.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }

    /// Split into documents of at most `size` items: all nodes first, then
    /// all edges, so edge aliases resolve against nodes committed earlier.
    ///
    /// A `size` of zero is treated as one.
    #[must_use]
    pub fn into_chunks(self, size: usize) -> Vec<IngestDocument> {
        let size = size.max(1);
        let node_chunks = self.nodes.chunks(size).map(|nodes| IngestDocument {
            nodes: nodes.to_vec(),
            edges: Vec::new(),
        });
        let edge_chunks = self.edges.chunks(size).map(|edges| IngestDocument {
            nodes: Vec::new(),
            edges: edges.to_vec(),
        });
        node_chunks.chain(edge_chunks).collect()
    }
}

// =============================================================================
// TESTS
// =============================================================================
