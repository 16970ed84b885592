//! # strata-core
//!
//! The multi-tenant, bitemporal graph engine for Strata.
//!
//! This crate records nodes and time-bounded edges per tenant, keeps every
//! version of every fact, and answers traversals "as of" a valid-time
//! instant and a transaction sequence number.
//!
//! ## Architectural Constraints
//!
//! - Has NO async, NO network dependencies (pure Rust)
//! - Deterministic: node and edge ids derive from `(tenant, seq)`; query
//!   results are sorted before limits apply
//! - One writer per tenant; readers work on immutable snapshots and never
//!   wait for writers
//! - No cross-tenant lock on any data path

// =============================================================================
// MODULES
// =============================================================================

pub mod engine;
pub mod export;
pub mod formats;
pub mod graph;
pub mod ingestor;
pub mod primitives;
pub mod query;
pub mod storage;
pub mod temporal;
pub mod tenant;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{EdgeId, Node, NodeId, PropValue, Props, Seq, StrataError, TenantId, TimeEdge};

// =============================================================================
// RE-EXPORTS: Engine
// =============================================================================

pub use engine::{EdgeWrite, Engine, EngineConfig, NodeWrite};
pub use export::{TenantExport, export_tenant};
pub use formats::{CsvMapping, CsvTarget, ExportFormat, read_csv_document};
pub use graph::{
    EdgeVersion, EdgeView, GraphStats, Mutation, NodeVersion, NodeView, Outcome, TenantGraph,
};
pub use ingestor::{IngestDocument, IngestEdge, Ingestor};
pub use query::{Deadline, Direction, NodeRef, Query, QueryExecutor, QueryResult, QueryType};
pub use storage::{Journal, JournalBatch};
pub use temporal::{TimeFilter, TxRange, TxView, ValidInterval};
pub use tenant::{IsolationModel, NewTenant, Tenant, TenantPatch, TenantStatus};
