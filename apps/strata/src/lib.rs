//! # Strata
//!
//! HTTP server, CLI and configuration for the Strata bitemporal knowledge
//! graph. The engine itself lives in `strata-core`; this crate adds the
//! async/network surface around it.

pub mod api;
pub mod cli;
pub mod config;
