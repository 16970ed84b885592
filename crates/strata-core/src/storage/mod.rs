//! # Storage
//!
//! Durable journal of tenant records and committed batches.

mod redb_journal;

pub use redb_journal::{Journal, JournalBatch, TenantLog};
