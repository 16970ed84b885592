//! # Strata CLI Module
//!
//! This module implements the CLI interface for Strata.
//!
//! ## Available Commands
//!
//! - `server` - Start the HTTP server
//! - `tenant` - Create, list, describe, update or delete tenants
//! - `ingest` - Load a `{nodes, edges}` document or a CSV file into a tenant
//! - `query` - Execute a query file against a tenant
//! - `export` - Dump a tenant as JSON, JSON Lines, GraphML, Cypher or CSV
//! - `stats` - Show counts and the head sequence of a tenant
//! - `health` - Ask a running server whether it is up
//!
//! Every command except `server` and `health` operates directly on the
//! journal file named by `--data` (or `STRATA_DATA`, or the config file).

mod commands;

use crate::config::ServerConfig;
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use strata_core::{CsvMapping, CsvTarget, StrataError, TenantStatus};

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Strata - multi-tenant bitemporal knowledge graph
#[derive(Parser, Debug)]
#[command(name = "strata")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to a TOML config file (default: ./strata.toml if present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to the journal file (overrides config and STRATA_DATA)
    #[arg(short = 'D', long, global = true)]
    pub data: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start HTTP server
    Server {
        /// Host to bind to
        #[arg(short = 'H', long)]
        host: Option<String>,

        /// Port to bind to
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Tenant management
    Tenant {
        #[command(subcommand)]
        command: TenantCommand,
    },

    /// Load a `{"nodes": [...], "edges": [...]}` document or a CSV file as one batch
    Ingest {
        #[arg(short, long)]
        tenant: String,

        /// Path to the JSON document or CSV file
        #[arg(short, long)]
        file: PathBuf,

        #[command(flatten)]
        options: IngestArgs,
    },

    /// Execute a JSON query file
    Query {
        #[arg(short, long)]
        tenant: String,

        /// Path to the JSON query
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Export a tenant
    Export {
        #[arg(short, long)]
        tenant: String,

        /// Keep only edges valid at this RFC 3339 instant
        #[arg(long)]
        as_of: Option<DateTime<Utc>>,

        /// Export format: json, jsonl, graphml, cypher, csv
        #[arg(long, default_value = "json")]
        format: String,

        /// Output file path (stdout if absent)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show graph statistics of a tenant
    Stats {
        #[arg(short, long)]
        tenant: String,
    },

    /// Check that a running server answers
    Health {
        /// Server base URL (default: built from the configured host and port)
        #[arg(long)]
        url: Option<String>,
    },
}

/// Options of `ingest`.
#[derive(Args, Debug, Default, Clone)]
pub struct IngestArgs {
    /// Input format: json or csv (default: from the file extension)
    #[arg(long)]
    pub format: Option<String>,

    /// Commit in batches of at most this many items instead of one batch
    #[arg(long)]
    pub batch_size: Option<usize>,

    #[command(flatten)]
    pub csv: CsvArgs,
}

impl IngestArgs {
    /// Whether the input is CSV, from `--format` or the file extension.
    pub fn is_csv(&self, file: &Path) -> Result<bool, StrataError> {
        match self.format.as_deref().map(str::to_ascii_lowercase).as_deref() {
            Some("csv") => Ok(true),
            Some("json") => Ok(false),
            Some(other) => Err(StrataError::BadRequest(format!(
                "Unknown format: {}. Use: json, csv",
                other
            ))),
            None => Ok(file
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"))),
        }
    }
}

/// Column mapping for CSV input.
#[derive(Args, Debug, Default, Clone)]
#[command(next_help_heading = "CSV options")]
pub struct CsvArgs {
    /// What each row is: node or edge
    #[arg(long)]
    pub data_type: Option<String>,

    /// Field delimiter (default: ',')
    #[arg(long)]
    pub delimiter: Option<char>,

    /// The file has no header row; columns are given by index
    #[arg(long)]
    pub no_header: bool,

    /// Column holding the node alias
    #[arg(long)]
    pub id_col: Option<String>,

    /// Column holding the node label
    #[arg(long)]
    pub label_col: Option<String>,

    /// Label for rows without one
    #[arg(long)]
    pub label: Option<String>,

    /// Comma-separated property columns (default: every unmapped column)
    #[arg(long, value_delimiter = ',')]
    pub props_cols: Vec<String>,

    /// Column holding the source node alias
    #[arg(long)]
    pub from_col: Option<String>,

    /// Column holding the target node alias
    #[arg(long)]
    pub to_col: Option<String>,

    /// Edge kind for every row
    #[arg(long)]
    pub kind: Option<String>,

    /// Column holding the edge kind
    #[arg(long)]
    pub kind_col: Option<String>,

    /// Column holding valid_from (default: now)
    #[arg(long)]
    pub valid_from_col: Option<String>,

    /// Column holding valid_to
    #[arg(long)]
    pub valid_to_col: Option<String>,

    /// chrono format for timestamps that are not RFC 3339, e.g. %Y-%m-%d
    #[arg(long)]
    pub date_format: Option<String>,
}

impl CsvArgs {
    /// Build the engine-side mapping.
    pub fn mapping(&self) -> Result<CsvMapping, StrataError> {
        let target = match &self.data_type {
            Some(t) => t.parse::<CsvTarget>()?,
            None => CsvTarget::Nodes,
        };
        let delimiter = match self.delimiter {
            None => b',',
            Some(c) => u8::try_from(c).map_err(|_| {
                StrataError::BadRequest(format!("delimiter '{}' is not a single-byte character", c))
            })?,
        };
        Ok(CsvMapping {
            target,
            delimiter,
            has_header: !self.no_header,
            id_col: self.id_col.clone(),
            label_col: self.label_col.clone(),
            default_label: self.label.clone(),
            props_cols: self.props_cols.clone(),
            from_col: self.from_col.clone(),
            to_col: self.to_col.clone(),
            kind: self.kind.clone(),
            kind_col: self.kind_col.clone(),
            valid_from_col: self.valid_from_col.clone(),
            valid_to_col: self.valid_to_col.clone(),
            date_format: self.date_format.clone(),
        })
    }
}

/// Tenant subcommands.
#[derive(Subcommand, Debug)]
pub enum TenantCommand {
    /// Create a tenant
    Create {
        id: String,

        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        description: Option<String>,

        /// property (default), database or label
        #[arg(long)]
        isolation_model: Option<String>,
    },

    /// List tenants ordered by id
    List,

    /// Show one tenant
    Describe { id: String },

    /// Change name, description or status
    Update {
        id: String,

        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        description: Option<String>,

        #[arg(long, value_enum)]
        status: Option<StatusArg>,
    },

    /// Delete a tenant
    Delete {
        id: String,

        /// Also drop the tenant's nodes and edges
        #[arg(long)]
        cascade: bool,
    },
}

/// Statuses a tenant may be moved to by hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StatusArg {
    Active,
    Suspended,
}

impl From<StatusArg> for TenantStatus {
    fn from(arg: StatusArg) -> Self {
        match arg {
            StatusArg::Active => TenantStatus::Active,
            StatusArg::Suspended => TenantStatus::Suspended,
        }
    }
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli) -> Result<(), StrataError> {
    let mut config = ServerConfig::load(cli.config.as_deref())?;
    if let Some(data) = cli.data {
        config.data = Some(data);
    }
    let json_mode = cli.json_mode;

    match cli.command {
        Commands::Server { host, port } => {
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }
            cmd_server(config).await
        }
        Commands::Tenant { command } => cmd_tenant(&config, json_mode, command),
        Commands::Ingest {
            tenant,
            file,
            options,
        } => cmd_ingest(&config, json_mode, &tenant, &file, &options),
        Commands::Query { tenant, file } => cmd_query(&config, json_mode, &tenant, &file),
        Commands::Export {
            tenant,
            as_of,
            format,
            output,
        } => cmd_export(&config, &tenant, as_of, &format, output.as_deref()),
        Commands::Stats { tenant } => cmd_stats(&config, json_mode, &tenant),
        Commands::Health { url } => cmd_health(&config, json_mode, url.as_deref()).await,
    }
}
