//! # strata-bridge
//!
//! A stateless HTTP front for the Strata core. It validates request shapes
//! with the strata-core types, forwards valid requests verbatim, relays the
//! core's answers untouched, and turns transport failures into `503`.

pub mod client;
pub mod config;
pub mod relay;

pub use client::{ClientError, CoreClient, CoreResponse};
pub use config::BridgeConfig;
pub use relay::{BridgeHealth, BridgeState, create_router, run_bridge};
