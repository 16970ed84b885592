//! # Core Type Definitions
//!
//! This module contains the core types for the Strata graph engine:
//! - Identifiers (`TenantId`, `NodeId`, `EdgeId`, `Seq`)
//! - Property bags (`PropValue`, `Props`)
//! - Graph entities (`Node`, `TimeEdge`)
//! - Error types (`StrataError`)
//!
//! ## Determinism Guarantees
//!
//! - Node and edge ids are UUIDv5 values derived from `(tenant, sequence)`,
//!   so replaying a tenant's history reproduces the same ids.
//! - Property bags are `BTreeMap`s, so serialization order is stable.

use crate::primitives::{ID_NAMESPACE, MAX_TENANT_ID_LENGTH};
use crate::temporal::ValidInterval;
use chrono::{DateTime, Utc};
use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Identifier of a tenant partition.
///
/// Tenant ids travel as URL path segments, so they are restricted to
/// `[A-Za-z0-9_-]` and at most `MAX_TENANT_ID_LENGTH` bytes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

impl TenantId {
    /// Parse and validate a tenant id.
    pub fn parse(raw: impl Into<String>) -> Result<Self, StrataError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(StrataError::BadRequest("tenant id must not be empty".into()));
        }
        if raw.len() > MAX_TENANT_ID_LENGTH {
            return Err(StrataError::BadRequest(format!(
                "tenant id exceeds {} bytes",
                MAX_TENANT_ID_LENGTH
            )));
        }
        if !raw
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
        {
            return Err(StrataError::BadRequest(format!(
                "tenant id '{}' contains characters outside [A-Za-z0-9_-]",
                raw
            )));
        }
        Ok(Self(raw))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TenantId {
    type Error = StrataError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<TenantId> for String {
    fn from(id: TenantId) -> Self {
        id.0
    }
}

/// Per-tenant transaction sequence number.
///
/// Every committed mutation gets the next sequence number of its tenant.
/// `Seq(0)` is the head of an empty partition.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Seq(pub u64);

impl Seq {
    pub const ZERO: Self = Self(0);

    /// The following sequence number, saturating at `u64::MAX`.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Seq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// System-assigned node identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub Uuid);

impl NodeId {
    /// Derive the id of the node created by `seq` in `tenant`.
    #[must_use]
    pub fn derive(tenant: &TenantId, seq: Seq) -> Self {
        Self(derive_uuid(tenant, "node", seq))
    }
}

/// System-assigned edge identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EdgeId(pub Uuid);

impl EdgeId {
    /// Derive the id of the edge created by `seq` in `tenant`.
    #[must_use]
    pub fn derive(tenant: &TenantId, seq: Seq) -> Self {
        Self(derive_uuid(tenant, "edge", seq))
    }
}

fn derive_uuid(tenant: &TenantId, kind: &str, seq: Seq) -> Uuid {
    let name = format!("{}:{}:{}", tenant, kind, seq);
    Uuid::new_v5(&ID_NAMESPACE, name.as_bytes())
}

macro_rules! uuid_id_impls {
    ($ty:ident, $what:literal) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $ty {
            type Err = StrataError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|e| StrataError::BadRequest(format!("invalid {} '{}': {}", $what, s, e)))
            }
        }
    };
}

uuid_id_impls!(NodeId, "node id");
uuid_id_impls!(EdgeId, "edge id");

// =============================================================================
// PROPERTY BAGS
// =============================================================================

/// A dynamically-shaped property value.
///
/// Serialized as plain JSON (`null`, `true`, `42`, `1.5`, `"x"`, `[..]`, `{..}`).
/// Non-finite floats have no JSON form and are rejected by the ingestor.
/// Integers above `i64::MAX` are rejected on input rather than widened to a
/// float, so every stored value reads back with the type it was written as.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PropValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<PropValue>),
    Map(BTreeMap<String, PropValue>),
}

/// A property bag keyed by property name.
pub type Props = BTreeMap<String, PropValue>;

impl<'de> Deserialize<'de> for PropValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(PropValueVisitor)
    }
}

struct PropValueVisitor;

impl<'de> Visitor<'de> for PropValueVisitor {
    type Value = PropValue;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a property value")
    }

    fn visit_unit<E: de::Error>(self) -> Result<PropValue, E> {
        Ok(PropValue::Null)
    }

    fn visit_none<E: de::Error>(self) -> Result<PropValue, E> {
        Ok(PropValue::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<PropValue, D::Error> {
        PropValue::deserialize(deserializer)
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<PropValue, E> {
        Ok(PropValue::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<PropValue, E> {
        Ok(PropValue::Int(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<PropValue, E> {
        i64::try_from(v).map(PropValue::Int).map_err(|_| {
            E::custom(format!(
                "integer {} is out of range for a property (max {})",
                v,
                i64::MAX
            ))
        })
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<PropValue, E> {
        Ok(PropValue::Float(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<PropValue, E> {
        Ok(PropValue::String(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<PropValue, E> {
        Ok(PropValue::String(v))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<PropValue, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0).min(1024));
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(PropValue::List(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<PropValue, A::Error> {
        let mut props = Props::new();
        while let Some((key, value)) = map.next_entry::<String, PropValue>()? {
            props.insert(key, value);
        }
        Ok(PropValue::Map(props))
    }
}

impl From<bool> for PropValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for PropValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for PropValue {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for PropValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for PropValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for PropValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Vec<PropValue>> for PropValue {
    fn from(v: Vec<PropValue>) -> Self {
        Self::List(v)
    }
}

impl From<Props> for PropValue {
    fn from(v: Props) -> Self {
        Self::Map(v)
    }
}

// =============================================================================
// NODE
// =============================================================================

/// A node (entity) as written by callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Caller-supplied idempotency key, unique among live nodes of a tenant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_alias: Option<String>,
    /// Type tag, e.g. "Person".
    pub label: String,
    #[serde(default)]
    pub props: Props,
}

impl Node {
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            id_alias: None,
            label: label.into(),
            props: Props::new(),
        }
    }

    #[must_use]
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.id_alias = Some(alias.into());
        self
    }

    #[must_use]
    pub fn with_prop(mut self, key: impl Into<String>, value: impl Into<PropValue>) -> Self {
        self.props.insert(key.into(), value.into());
        self
    }
}

// =============================================================================
// TIME EDGE
// =============================================================================

/// A directed relation between two nodes, valid over `[valid_from, valid_to)`.
///
/// `valid_to = None` means the relation is still true.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeEdge {
    pub from_node_id: NodeId,
    pub to_node_id: NodeId,
    /// Relation type, e.g. "knows".
    pub kind: String,
    pub valid_from: DateTime<Utc>,
    #[serde(default)]
    pub valid_to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub props: Props,
}

impl TimeEdge {
    #[must_use]
    pub fn new(
        from_node_id: NodeId,
        to_node_id: NodeId,
        kind: impl Into<String>,
        valid_from: DateTime<Utc>,
    ) -> Self {
        Self {
            from_node_id,
            to_node_id,
            kind: kind.into(),
            valid_from,
            valid_to: None,
            props: Props::new(),
        }
    }

    #[must_use]
    pub fn with_valid_to(mut self, valid_to: DateTime<Utc>) -> Self {
        self.valid_to = Some(valid_to);
        self
    }

    #[must_use]
    pub fn with_prop(mut self, key: impl Into<String>, value: impl Into<PropValue>) -> Self {
        self.props.insert(key.into(), value.into());
        self
    }

    /// The valid-time interval of this edge.
    #[must_use]
    pub fn interval(&self) -> ValidInterval {
        ValidInterval {
            from: self.valid_from,
            to: self.valid_to,
        }
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in the Strata engine.
///
/// `NotFound`, `Conflict` and `BadRequest` are deterministic: retrying the
/// same request yields the same error. `Unavailable` and `Timeout` are safe
/// to retry with backoff.
#[derive(Debug, Error)]
pub enum StrataError {
    /// The tenant, node or edge does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Duplicate id, unsafe delete, or a write against a read-only tenant.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Malformed request body, query, or identifier.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// A dependency is down.
    #[error("Unavailable: {0}")]
    Unavailable(String),

    /// A deadline expired before the work completed.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The journal could not be read or written.
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StrataError {
    /// Whether a caller may retry the request unchanged.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout(_))
    }

    /// Prefix the message with a batch position, keeping the variant.
    #[must_use]
    pub fn at_index(self, index: usize) -> Self {
        match self {
            Self::NotFound(m) => Self::NotFound(format!("item {}: {}", index, m)),
            Self::Conflict(m) => Self::Conflict(format!("item {}: {}", index, m)),
            Self::BadRequest(m) => Self::BadRequest(format!("item {}: {}", index, m)),
            other => other,
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

    #[test]
    fn tenant_id_rejects_path_characters() {
        assert!(TenantId::parse("t1").is_ok());
        assert!(TenantId::parse("acme_prod-2").is_ok());
        assert!(TenantId::parse("").is_err());
        assert!(TenantId::parse("a/b").is_err());
        assert!(TenantId::parse("a b").is_err());
        assert!(TenantId::parse("x".repeat(MAX_TENANT_ID_LENGTH + 1)).is_err());
    }

    #[test]
    fn tenant_id_deserialization_validates() {
        let ok: Result<TenantId, _> = serde_json::from_str("\"t1\"");
        assert!(ok.is_ok());
        let bad: Result<TenantId, _> = serde_json::from_str("\"../etc\"");
        assert!(bad.is_err());
    }

    #[test]
    fn derived_ids_are_stable_and_distinct() {
        let t1 = TenantId::parse("t1").expect("tenant");
        let t2 = TenantId::parse("t2").expect("tenant");

        assert_eq!(NodeId::derive(&t1, Seq(1)), NodeId::derive(&t1, Seq(1)));
        assert_ne!(NodeId::derive(&t1, Seq(1)), NodeId::derive(&t1, Seq(2)));
        assert_ne!(NodeId::derive(&t1, Seq(1)), NodeId::derive(&t2, Seq(1)));
        assert_ne!(NodeId::derive(&t1, Seq(1)).0, EdgeId::derive(&t1, Seq(1)).0);
    }

    #[test]
    fn seq_next_saturates() {
        assert_eq!(Seq::ZERO.next(), Seq(1));
        assert_eq!(Seq(u64::MAX).next(), Seq(u64::MAX));
    }

    #[test]
    fn prop_value_serializes_as_plain_json() {
        let node = Node::new("Person")
            .with_alias("alice")
            .with_prop("age", 30)
            .with_prop("score", 1.5)
            .with_prop("tags", vec![PropValue::from("a"), PropValue::Null]);

        let json = serde_json::to_value(&node).expect("serialize");
        assert_eq!(json["props"]["age"], serde_json::json!(30));
        assert_eq!(json["props"]["score"], serde_json::json!(1.5));
        assert_eq!(json["props"]["tags"], serde_json::json!(["a", null]));

        let back: Node = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, node);
    }

    #[test]
    fn prop_value_keeps_integer_type() {
        let max: Node =
            serde_json::from_str(r#"{"label":"N","props":{"n":9223372036854775807,"neg":-3}}"#)
                .expect("i64 range");
        assert_eq!(max.props["n"], PropValue::Int(i64::MAX));
        assert_eq!(max.props["neg"], PropValue::Int(-3));

        let err = serde_json::from_str::<Node>(r#"{"label":"N","props":{"n":18446744073709551615}}"#)
            .expect_err("above i64::MAX");
        assert!(err.to_string().contains("out of range"), "{}", err);

        let nested = serde_json::from_str::<Node>(r#"{"label":"N","props":{"m":{"k":[9223372036854775808]}}}"#);
        assert!(nested.is_err());
    }

    #[test]
    fn node_id_parse_rejects_garbage() {
        assert!("not-a-uuid".parse::<NodeId>().is_err());
        let id = NodeId(Uuid::nil());
        assert_eq!(id.to_string().parse::<NodeId>().expect("parse"), id);
    }

    #[test]
    fn retryable_errors() {
        assert!(StrataError::Timeout("q".into()).is_retryable());
        assert!(StrataError::Unavailable("db".into()).is_retryable());
        assert!(!StrataError::Conflict("dup".into()).is_retryable());
        assert!(!StrataError::NotFound("n".into()).is_retryable());
    }

    #[test]
    fn at_index_keeps_variant() {
        let err = StrataError::NotFound("node x".into()).at_index(2);
        assert!(matches!(err, StrataError::NotFound(ref m) if m == "item 2: node x"));
    }
}
