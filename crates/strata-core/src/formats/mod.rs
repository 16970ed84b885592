//! # Formats Module
//!
//! Text formats at the edge of the engine.
//!
//! - [`render`]: tenant exports as JSON, JSON Lines, GraphML, Cypher or CSV
//! - [`tabular`]: CSV rows mapped into an [`IngestDocument`](crate::IngestDocument)
//!
//! File I/O stays in the app layer; everything here works on strings and
//! readers.

pub mod render;
pub mod tabular;

pub use render::ExportFormat;
pub use tabular::{CsvMapping, CsvTarget, read_csv_document};
