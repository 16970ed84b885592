//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.

use super::{IngestArgs, TenantCommand};
use crate::api;
use crate::config::ServerConfig;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use strata_core::{
    Engine, ExportFormat, IngestDocument, IsolationModel, NewTenant, Outcome, Query, StrataError,
    Tenant, TenantId, TenantPatch, read_csv_document,
};

// =============================================================================
// FILE SIZE LIMITS
// =============================================================================

/// Maximum size of an ingest document or query file (100 MB).
const MAX_INPUT_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Validate and canonicalize an input path, then check its size.
fn validate_input_file(path: &Path) -> Result<PathBuf, StrataError> {
    let canonical = path.canonicalize().map_err(|e| {
        StrataError::BadRequest(format!("Invalid file path '{}': {}", path.display(), e))
    })?;

    if !canonical.is_file() {
        return Err(StrataError::BadRequest(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }

    let metadata = std::fs::metadata(&canonical)
        .map_err(|e| StrataError::Storage(format!("Cannot read file metadata: {}", e)))?;
    if metadata.len() > MAX_INPUT_FILE_SIZE {
        return Err(StrataError::BadRequest(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            MAX_INPUT_FILE_SIZE
        )));
    }
    Ok(canonical)
}

/// For output files, the parent directory must exist.
fn validate_output_path(path: &Path) -> Result<PathBuf, StrataError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let canonical_parent = parent.canonicalize().map_err(|e| {
        StrataError::BadRequest(format!(
            "Invalid output directory '{}': {}",
            parent.display(),
            e
        ))
    })?;

    let filename = path
        .file_name()
        .ok_or_else(|| StrataError::BadRequest("Output path has no filename".to_string()))?;

    Ok(canonical_parent.join(filename))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, StrataError> {
    let path = validate_input_file(path)?;
    let text = std::fs::read_to_string(&path)
        .map_err(|e| StrataError::Storage(format!("Cannot read '{}': {}", path.display(), e)))?;
    serde_json::from_str(&text)
        .map_err(|e| StrataError::BadRequest(format!("Invalid JSON in '{}': {}", path.display(), e)))
}

fn print_json<T: Serialize>(value: &T) -> Result<(), StrataError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// =============================================================================
// ENGINE ACCESS
// =============================================================================

/// Open the journal named by the config.
///
/// CLI commands only make sense against durable state.
pub fn open_engine(config: &ServerConfig) -> Result<Engine, StrataError> {
    let path = config.data.as_ref().ok_or_else(|| {
        StrataError::BadRequest(
            "No journal configured: pass --data, set STRATA_DATA, or set `data` in the config"
                .to_string(),
        )
    })?;
    Engine::open(path, config.engine_config())
}

// =============================================================================
// SERVER COMMAND
// =============================================================================

/// Start the HTTP server.
pub async fn cmd_server(config: ServerConfig) -> Result<(), StrataError> {
    let engine = match &config.data {
        Some(path) => {
            tracing::info!("Opening journal {}", path.display());
            Engine::open(path, config.engine_config())?
        }
        None => {
            tracing::warn!("No journal configured, running in memory: data is lost on exit");
            Engine::in_memory(config.engine_config())
        }
    };

    tracing::info!(
        tenants = engine.list_tenants().len(),
        durable = engine.is_durable(),
        query_timeout_ms = config.query_timeout_ms,
        write_lock_timeout_ms = config.write_lock_timeout_ms,
        "Engine ready"
    );

    api::run_server(&config, engine).await
}

// =============================================================================
// TENANT COMMANDS
// =============================================================================

pub fn cmd_tenant(
    config: &ServerConfig,
    json_mode: bool,
    command: TenantCommand,
) -> Result<(), StrataError> {
    let engine = open_engine(config)?;

    match command {
        TenantCommand::Create {
            id,
            name,
            description,
            isolation_model,
        } => {
            let mut new = NewTenant::new(TenantId::parse(id)?);
            new.name = name;
            new.description = description;
            if let Some(model) = isolation_model {
                new.isolation_model = model.parse::<IsolationModel>()?;
            }
            let tenant = engine.create_tenant(new)?;
            report_tenant(&tenant, json_mode, "Created")
        }
        TenantCommand::List => {
            let tenants = engine.list_tenants();
            if json_mode {
                return print_json(&tenants);
            }
            if tenants.is_empty() {
                println!("No tenants.");
                return Ok(());
            }
            println!("{:<32} {:<10} {:<10} NAME", "ID", "STATUS", "MODEL");
            for t in &tenants {
                println!(
                    "{:<32} {:<10} {:<10} {}",
                    t.id.to_string(),
                    t.status.to_string(),
                    t.isolation_model.to_string(),
                    t.name.as_deref().unwrap_or("-")
                );
            }
            Ok(())
        }
        TenantCommand::Describe { id } => {
            let tenant = engine.get_tenant(&TenantId::parse(id)?)?;
            report_tenant(&tenant, json_mode, "Tenant")
        }
        TenantCommand::Update {
            id,
            name,
            description,
            status,
        } => {
            let patch = TenantPatch {
                name,
                description,
                status: status.map(Into::into),
                ..TenantPatch::default()
            };
            let tenant = engine.update_tenant(&TenantId::parse(id)?, patch)?;
            report_tenant(&tenant, json_mode, "Updated")
        }
        TenantCommand::Delete { id, cascade } => {
            let id = TenantId::parse(id)?;
            engine.delete_tenant(&id, cascade)?;
            if json_mode {
                print_json(&api::DeleteResponse::new(&id))
            } else {
                println!("Deleted tenant {}", id);
                Ok(())
            }
        }
    }
}

fn report_tenant(tenant: &Tenant, json_mode: bool, verb: &str) -> Result<(), StrataError> {
    if json_mode {
        return print_json(tenant);
    }
    println!("{} {}", verb, tenant.id);
    println!("  Name:        {}", tenant.name.as_deref().unwrap_or("-"));
    println!("  Description: {}", tenant.description.as_deref().unwrap_or("-"));
    println!("  Model:       {}", tenant.isolation_model);
    println!("  Status:      {}", tenant.status);
    println!("  Created:     {}", tenant.created_at.to_rfc3339());
    println!("  Updated:     {}", tenant.updated_at.to_rfc3339());
    Ok(())
}

// =============================================================================
// INGEST COMMAND
// =============================================================================

/// Counts of an ingest run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    pub batches: usize,
    pub nodes_created: usize,
    pub nodes_updated: usize,
    pub edges_created: usize,
    pub edges_updated: usize,
}

impl IngestSummary {
    #[must_use]
    pub fn from_outcomes(outcomes: &[Outcome]) -> Self {
        let mut summary = Self::default();
        for outcome in outcomes {
            match outcome {
                Outcome::NodeUpserted { created: true, .. } => summary.nodes_created += 1,
                Outcome::NodeUpserted { created: false, .. } => summary.nodes_updated += 1,
                Outcome::EdgeUpserted { created: true, .. } => summary.edges_created += 1,
                Outcome::EdgeUpserted { created: false, .. } => summary.edges_updated += 1,
                Outcome::NodeDeleted { .. } | Outcome::EdgeDeleted { .. } => {}
            }
        }
        summary
    }

    fn add(&mut self, other: Self) {
        self.batches += other.batches;
        self.nodes_created += other.nodes_created;
        self.nodes_updated += other.nodes_updated;
        self.edges_created += other.edges_created;
        self.edges_updated += other.edges_updated;
    }
}

/// Read a CSV file through the column mapping of `options`.
fn read_csv(path: &Path, options: &IngestArgs) -> Result<IngestDocument, StrataError> {
    let mapping = options.csv.mapping()?;
    let path = validate_input_file(path)?;
    let file = std::fs::File::open(&path)
        .map_err(|e| StrataError::Storage(format!("Cannot read '{}': {}", path.display(), e)))?;
    read_csv_document(file, &mapping, Utc::now()).map_err(|e| match e {
        StrataError::BadRequest(m) => StrataError::BadRequest(format!("{}: {}", path.display(), m)),
        other => other,
    })
}

/// Load a JSON document or CSV file into a tenant.
///
/// Without `--batch-size` the whole file is one all-or-nothing batch. With
/// it, each chunk commits on its own and a failing chunk stops the run.
pub fn cmd_ingest(
    config: &ServerConfig,
    json_mode: bool,
    tenant: &str,
    file: &Path,
    options: &IngestArgs,
) -> Result<(), StrataError> {
    let tenant = TenantId::parse(tenant)?;
    let doc: IngestDocument = if options.is_csv(file)? {
        read_csv(file, options)?
    } else {
        read_json(file)?
    };
    let batches = match options.batch_size {
        Some(0) => {
            return Err(StrataError::BadRequest(
                "batch size must be at least 1".to_string(),
            ));
        }
        Some(size) => doc.into_chunks(size),
        None => vec![doc],
    };
    let engine = open_engine(config)?;

    let mut summary = IngestSummary::default();
    for (i, batch) in batches.iter().enumerate() {
        let outcomes = engine.ingest(&tenant, batch).inspect_err(|e| {
            if i > 0 {
                tracing::warn!(
                    tenant = %tenant,
                    committed_batches = i,
                    "Ingest stopped at batch {}: {}",
                    i + 1,
                    e
                );
            }
        })?;
        let mut counts = IngestSummary::from_outcomes(&outcomes);
        counts.batches = 1;
        summary.add(counts);
        tracing::info!(tenant = %tenant, batch = i + 1, items = outcomes.len(), "Ingest committed");
    }

    if json_mode {
        return print_json(&summary);
    }
    println!("Ingested into {} ({} batches)", tenant, summary.batches);
    println!("  Nodes: {} created, {} updated", summary.nodes_created, summary.nodes_updated);
    println!("  Edges: {} created, {} updated", summary.edges_created, summary.edges_updated);
    Ok(())
}

// =============================================================================
// QUERY COMMAND
// =============================================================================

/// Execute a query file. The file holds a bare query or `{"query": ...}`.
pub fn cmd_query(
    config: &ServerConfig,
    json_mode: bool,
    tenant: &str,
    file: &Path,
) -> Result<(), StrataError> {
    let tenant = TenantId::parse(tenant)?;
    let value: serde_json::Value = read_json(file)?;
    let query: Query = match value.get("query") {
        Some(inner) if value.get("type").is_none() => serde_json::from_value(inner.clone()),
        _ => serde_json::from_value(value),
    }
    .map_err(|e| StrataError::BadRequest(format!("Invalid query: {}", e)))?;

    let engine = open_engine(config)?;
    let result = engine.execute(&tenant, &query)?;

    if json_mode {
        return print_json(&result);
    }
    println!(
        "{} nodes, {} edges (as of seq {}){}",
        result.nodes.len(),
        result.edges.len(),
        result.as_of_seq,
        if result.truncated { ", truncated" } else { "" }
    );
    for node in &result.nodes {
        println!(
            "  node {} [{}] {}",
            node.id,
            node.node.label,
            node.node.id_alias.as_deref().unwrap_or("")
        );
    }
    for edge in &result.edges {
        println!(
            "  edge {} -[{}]-> {} from {}",
            edge.edge.from_node_id,
            edge.edge.kind,
            edge.edge.to_node_id,
            edge.edge.valid_from.to_rfc3339()
        );
    }
    Ok(())
}

// =============================================================================
// EXPORT COMMAND
// =============================================================================

/// Export a tenant to a file or stdout in `format`.
pub fn cmd_export(
    config: &ServerConfig,
    tenant: &str,
    as_of: Option<DateTime<Utc>>,
    format: &str,
    output: Option<&Path>,
) -> Result<(), StrataError> {
    let format: ExportFormat = format.parse()?;
    let tenant = TenantId::parse(tenant)?;
    let engine = open_engine(config)?;
    let export = engine.export(&tenant, as_of)?;
    let text = format.render(&export)?;

    match output {
        Some(path) => {
            let path = validate_output_path(path)?;
            std::fs::write(&path, text).map_err(|e| {
                StrataError::Storage(format!("Cannot write '{}': {}", path.display(), e))
            })?;
            tracing::info!(
                nodes = export.nodes.len(),
                edges = export.edges.len(),
                format = %format,
                "Exported {} to {}",
                tenant,
                path.display()
            );
        }
        None => print!("{}", text),
    }
    Ok(())
}

// =============================================================================
// STATS COMMAND
// =============================================================================

pub fn cmd_stats(config: &ServerConfig, json_mode: bool, tenant: &str) -> Result<(), StrataError> {
    let tenant = TenantId::parse(tenant)?;
    let engine = open_engine(config)?;
    let stats = engine.stats(&tenant)?;

    if json_mode {
        return print_json(&stats);
    }
    println!("Strata Graph Stats");
    println!("==================");
    println!("Tenant:        {}", stats.tenant);
    println!("Head seq:      {}", stats.head);
    println!("Live nodes:    {}", stats.live_nodes);
    println!("Live edges:    {}", stats.live_edges);
    println!("Node versions: {}", stats.node_versions);
    println!("Edge versions: {}", stats.edge_versions);
    Ok(())
}

// =============================================================================
// HEALTH COMMAND
// =============================================================================

/// How long `health` waits for an answer.
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Base URL of the configured server. A wildcard bind address is reached
/// through loopback.
fn server_url(config: &ServerConfig) -> String {
    let host = match config.host.as_str() {
        "0.0.0.0" | "::" | "[::]" => "127.0.0.1",
        host => host,
    };
    format!("http://{}:{}", host, config.port)
}

/// GET `/health` of a running server and report it.
pub async fn cmd_health(
    config: &ServerConfig,
    json_mode: bool,
    url: Option<&str>,
) -> Result<(), StrataError> {
    let base = url.map_or_else(|| server_url(config), |u| u.trim_end_matches('/').to_string());
    let health = fetch_health(&base).await?;

    if json_mode {
        return print_json(&health);
    }
    println!("Strata at {} is {}", base, health.status);
    println!("  Version:   {}", health.version);
    println!("  Timestamp: {}", health.timestamp.to_rfc3339());
    Ok(())
}

async fn fetch_health(base: &str) -> Result<api::HealthResponse, StrataError> {
    let client = reqwest::Client::builder()
        .timeout(HEALTH_TIMEOUT)
        .build()
        .map_err(|e| StrataError::Unavailable(format!("HTTP client: {}", e)))?;
    let url = format!("{}/health", base);
    tracing::debug!("Checking {}", url);

    let response = client.get(&url).send().await.map_err(|e| {
        if e.is_timeout() {
            StrataError::Timeout(format!("{} did not answer within {:?}", url, HEALTH_TIMEOUT))
        } else {
            StrataError::Unavailable(format!("Cannot connect to Strata at {}: {}", base, e))
        }
    })?;
    let status = response.status();
    if !status.is_success() {
        return Err(StrataError::Unavailable(format!(
            "{} answered {}",
            url, status
        )));
    }
    response
        .json()
        .await
        .map_err(|e| StrataError::Unavailable(format!("Unexpected health response: {}", e)))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use strata_core::TenantStatus;

    fn config_in(dir: &Path) -> ServerConfig {
        ServerConfig {
            data: Some(dir.join("strata.redb")),
            ..ServerConfig::default()
        }
    }

    #[test]
    fn test_commands_require_journal() {
        let err = open_engine(&ServerConfig::default()).expect_err("no data");
        assert!(matches!(err, StrataError::BadRequest(_)));
    }

    #[test]
    fn test_tenant_ingest_roundtrip_through_journal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = config_in(dir.path());

        cmd_tenant(
            &config,
            true,
            TenantCommand::Create {
                id: "acme".into(),
                name: Some("Acme".into()),
                description: None,
                isolation_model: Some("label".into()),
            },
        )
        .expect("create");

        let doc = dir.path().join("doc.json");
        std::fs::write(
            &doc,
            r#"{
                "nodes": [
                    {"id_alias": "alice", "label": "Person"},
                    {"id_alias": "bob", "label": "Person"}
                ],
                "edges": [
                    {"from_alias": "alice", "to_alias": "bob", "kind": "knows",
                     "valid_from": "2024-01-01T00:00:00Z"}
                ]
            }"#,
        )
        .expect("write doc");
        cmd_ingest(&config, true, "acme", &doc, &IngestArgs::default()).expect("ingest");

        cmd_tenant(
            &config,
            true,
            TenantCommand::Update {
                id: "acme".into(),
                name: None,
                description: None,
                status: Some(super::super::StatusArg::Suspended),
            },
        )
        .expect("suspend");

        // Everything above must have reached the journal.
        let engine = open_engine(&config).expect("reopen");
        let tenant = engine.get_tenant(&TenantId::parse("acme").expect("id")).expect("tenant");
        assert_eq!(tenant.isolation_model, IsolationModel::Label);
        assert_eq!(tenant.status, TenantStatus::Suspended);
        let stats = engine.stats(&tenant.id).expect("stats");
        assert_eq!(stats.live_nodes, 2);
        assert_eq!(stats.live_edges, 1);
    }

    #[test]
    fn test_ingest_with_unknown_alias_commits_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = config_in(dir.path());
        open_engine(&config)
            .expect("open")
            .create_tenant(NewTenant::new(TenantId::parse("t1").expect("id")))
            .expect("tenant");

        let doc = dir.path().join("doc.json");
        std::fs::write(
            &doc,
            r#"{"nodes": [{"id_alias": "a", "label": "N"}],
                "edges": [{"from_alias": "a", "to_alias": "ghost", "kind": "k",
                           "valid_from": "2024-01-01T00:00:00Z"}]}"#,
        )
        .expect("write doc");

        let err = cmd_ingest(&config, true, "t1", &doc, &IngestArgs::default())
            .expect_err("unknown alias");
        assert!(matches!(err, StrataError::NotFound(_)));
        let engine = open_engine(&config).expect("reopen");
        let stats = engine.stats(&TenantId::parse("t1").expect("id")).expect("stats");
        assert_eq!(stats.live_nodes, 0);
    }

    #[test]
    fn test_export_writes_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = config_in(dir.path());
        {
            let engine = open_engine(&config).expect("open");
            let t = TenantId::parse("t1").expect("id");
            engine.create_tenant(NewTenant::new(t.clone())).expect("tenant");
            engine
                .upsert_node(&t, strata_core::Node::new("N").with_alias("n"))
                .expect("node");
        }

        let out = dir.path().join("dump.json");
        cmd_export(&config, "t1", None, "json", Some(&out)).expect("export");
        let dump: strata_core::TenantExport =
            serde_json::from_str(&std::fs::read_to_string(&out).expect("read")).expect("parse");
        assert_eq!(dump.nodes.len(), 1);
        assert_eq!(dump.head.value(), 1);
    }

    #[test]
    fn test_missing_input_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = validate_input_file(&dir.path().join("nope.json")).expect_err("missing");
        assert!(matches!(err, StrataError::BadRequest(_)));
    }

    fn tenant_in(config: &ServerConfig, id: &str) -> TenantId {
        let id = TenantId::parse(id).expect("id");
        open_engine(config)
            .expect("open")
            .create_tenant(NewTenant::new(id.clone()))
            .expect("tenant");
        id
    }

    fn csv_edges(kind: &str) -> IngestArgs {
        IngestArgs {
            csv: super::super::CsvArgs {
                data_type: Some("edge".into()),
                from_col: Some("src".into()),
                to_col: Some("dst".into()),
                kind: Some(kind.into()),
                valid_from_col: Some("since".into()),
                date_format: Some("%Y-%m-%d".into()),
                ..Default::default()
            },
            ..IngestArgs::default()
        }
    }

    #[test]
    fn test_csv_nodes_then_edges() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = config_in(dir.path());
        let t = tenant_in(&config, "t1");

        let people = dir.path().join("people.csv");
        std::fs::write(&people, "name,role,age\nalice,Person,30\nbob,Person,41\n")
            .expect("write");
        let nodes = IngestArgs {
            csv: super::super::CsvArgs {
                id_col: Some("name".into()),
                label_col: Some("role".into()),
                ..Default::default()
            },
            ..IngestArgs::default()
        };
        cmd_ingest(&config, true, "t1", &people, &nodes).expect("nodes");

        let knows = dir.path().join("knows.csv");
        std::fs::write(&knows, "src,dst,since\nalice,bob,2024-01-01\n").expect("write");
        cmd_ingest(&config, true, "t1", &knows, &csv_edges("knows")).expect("edges");

        let engine = open_engine(&config).expect("reopen");
        let stats = engine.stats(&t).expect("stats");
        assert_eq!(stats.live_nodes, 2);
        assert_eq!(stats.live_edges, 1);
        let export = engine.export(&t, None).expect("export");
        assert_eq!(
            export.edges[0].edge.valid_from.to_rfc3339(),
            "2024-01-01T00:00:00+00:00"
        );
        let alice = export
            .nodes
            .iter()
            .find(|n| n.node.id_alias.as_deref() == Some("alice"))
            .expect("alice");
        assert_eq!(alice.node.props.get("age"), Some(&strata_core::PropValue::Int(30)));
    }

    #[test]
    fn test_csv_bad_row_commits_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = config_in(dir.path());
        let t = tenant_in(&config, "t1");
        {
            let engine = open_engine(&config).expect("open");
            for alias in ["a", "b"] {
                engine
                    .upsert_node(&t, strata_core::Node::new("N").with_alias(alias))
                    .expect("node");
            }
        }

        let file = dir.path().join("rels.csv");
        std::fs::write(&file, "src,dst,since\na,b,2024-01-01\nb,a,someday\n").expect("write");
        let err = cmd_ingest(&config, true, "t1", &file, &csv_edges("k")).expect_err("bad date");
        assert!(err.to_string().contains("line 3"), "{}", err);

        let stats = open_engine(&config).expect("reopen").stats(&t).expect("stats");
        assert_eq!(stats.live_edges, 0);
    }

    #[test]
    fn test_batch_size_commits_in_chunks() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = config_in(dir.path());
        let t = tenant_in(&config, "t1");

        let file = dir.path().join("nodes.csv");
        let mut text = String::from("name\n");
        for i in 0..5 {
            text.push_str(&format!("n{}\n", i));
        }
        std::fs::write(&file, text).expect("write");
        let options = IngestArgs {
            batch_size: Some(2),
            csv: super::super::CsvArgs {
                id_col: Some("name".into()),
                ..Default::default()
            },
            ..IngestArgs::default()
        };
        cmd_ingest(&config, true, "t1", &file, &options).expect("ingest");

        let stats = open_engine(&config).expect("reopen").stats(&t).expect("stats");
        assert_eq!(stats.live_nodes, 5);

        let zero = IngestArgs {
            batch_size: Some(0),
            ..options
        };
        assert!(cmd_ingest(&config, true, "t1", &file, &zero).is_err());
    }

    #[test]
    fn test_export_formats() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = config_in(dir.path());
        let t = tenant_in(&config, "t1");
        open_engine(&config)
            .expect("open")
            .upsert_node(&t, strata_core::Node::new("Person").with_alias("n"))
            .expect("node");

        let graphml = dir.path().join("dump.graphml");
        cmd_export(&config, "t1", None, "graphml", Some(&graphml)).expect("graphml");
        let text = std::fs::read_to_string(&graphml).expect("read");
        assert!(text.contains("<graphml"));
        assert!(text.contains(r#"<data key="alias">n</data>"#));

        let jsonl = dir.path().join("dump.jsonl");
        cmd_export(&config, "t1", None, "jsonl", Some(&jsonl)).expect("jsonl");
        assert_eq!(std::fs::read_to_string(&jsonl).expect("read").lines().count(), 2);

        let err = cmd_export(&config, "t1", None, "yaml", Some(&jsonl)).expect_err("format");
        assert!(err.to_string().contains("Unknown format"));
    }

    #[test]
    fn test_server_url_uses_loopback_for_wildcard() {
        let config = ServerConfig {
            host: "0.0.0.0".into(),
            port: 4100,
            ..ServerConfig::default()
        };
        assert_eq!(server_url(&config), "http://127.0.0.1:4100");
    }

    #[tokio::test]
    async fn test_health_against_running_server() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let config = ServerConfig::default();
        let router = api::create_router(
            api::AppState::new(Engine::in_memory(config.engine_config())),
            &config,
        );
        tokio::spawn(async move {
            axum::serve(listener, router).await.expect("serve");
        });

        let base = format!("http://{}", addr);
        let health = fetch_health(&base).await.expect("health");
        assert_eq!(health.status, "ok");
        cmd_health(&config, true, Some(&format!("{}/", base)))
            .await
            .expect("health command");
    }

    #[tokio::test]
    async fn test_health_when_nothing_listens() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let err = fetch_health(&format!("http://{}", addr)).await.expect_err("down");
        assert!(matches!(err, StrataError::Unavailable(_)));
        assert!(err.is_retryable());
    }
}
