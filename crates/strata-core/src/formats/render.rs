//! # Export Rendering
//!
//! Renders a [`TenantExport`] in one of five text formats:
//!
//! - `json`: the export itself, pretty-printed
//! - `jsonl`: one metadata line, then one line per node, then one per edge
//! - `graphml`: directed GraphML with label, kind and valid-time keys
//! - `cypher`: `CREATE` statements for nodes, `MATCH .. CREATE` for edges
//! - `csv`: a `# Nodes` section and a `# Edges` section
//!
//! Output order follows the export, so rendering the same snapshot twice
//! gives the same text (apart from `exported_at`).

use crate::export::TenantExport;
use crate::graph::{EdgeView, NodeView};
use crate::types::{PropValue, Props, StrataError};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::fmt;

// =============================================================================
// FORMAT SELECTION
// =============================================================================

/// Text formats an export can be rendered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    #[default]
    Json,
    Jsonl,
    Graphml,
    Cypher,
    Csv,
}

impl ExportFormat {
    /// Render `export` in this format.
    pub fn render(self, export: &TenantExport) -> Result<String, StrataError> {
        match self {
            Self::Json => Ok(serde_json::to_string_pretty(export)?),
            Self::Jsonl => render_jsonl(export),
            Self::Graphml => Ok(render_graphml(export)),
            Self::Cypher => Ok(render_cypher(export)),
            Self::Csv => render_csv(export),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Json => "json",
            Self::Jsonl => "jsonl",
            Self::Graphml => "graphml",
            Self::Cypher => "cypher",
            Self::Csv => "csv",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "jsonl" | "ndjson" => Ok(Self::Jsonl),
            "graphml" => Ok(Self::Graphml),
            "cypher" => Ok(Self::Cypher),
            "csv" => Ok(Self::Csv),
            _ => Err(StrataError::BadRequest(format!(
                "Unknown format: {}. Use: json, jsonl, graphml, cypher, csv",
                s
            ))),
        }
    }
}

fn timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

// =============================================================================
// JSON LINES
// =============================================================================

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Line<'a> {
    Meta {
        tenant: &'a str,
        head: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        as_of: Option<DateTime<Utc>>,
        exported_at: DateTime<Utc>,
        node_count: usize,
        edge_count: usize,
    },
    Node(&'a NodeView),
    Edge(&'a EdgeView),
}

fn render_jsonl(export: &TenantExport) -> Result<String, StrataError> {
    let meta = Line::Meta {
        tenant: export.tenant.id.as_str(),
        head: export.head.value(),
        as_of: export.as_of,
        exported_at: export.exported_at,
        node_count: export.nodes.len(),
        edge_count: export.edges.len(),
    };
    let lines = std::iter::once(meta)
        .chain(export.nodes.iter().map(Line::Node))
        .chain(export.edges.iter().map(Line::Edge));

    let mut out = String::new();
    for line in lines {
        out.push_str(&serde_json::to_string(&line)?);
        out.push('\n');
    }
    Ok(out)
}

// =============================================================================
// GRAPHML
// =============================================================================

fn escape_xml(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

fn props_json(props: &Props) -> Option<String> {
    if props.is_empty() {
        return None;
    }
    serde_json::to_string(props).ok()
}

fn graphml_data(out: &mut String, key: &str, value: &str) {
    out.push_str(&format!(
        "      <data key=\"{}\">{}</data>\n",
        key,
        escape_xml(value)
    ));
}

fn render_graphml(export: &TenantExport) -> String {
    let mut out = String::from(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<graphml xmlns="http://graphml.graphdrawing.org/xmlns">
  <key id="label" for="node" attr.name="label" attr.type="string"/>
  <key id="alias" for="node" attr.name="id_alias" attr.type="string"/>
  <key id="node_props" for="node" attr.name="props" attr.type="string"/>
  <key id="kind" for="edge" attr.name="kind" attr.type="string"/>
  <key id="valid_from" for="edge" attr.name="valid_from" attr.type="string"/>
  <key id="valid_to" for="edge" attr.name="valid_to" attr.type="string"/>
  <key id="edge_props" for="edge" attr.name="props" attr.type="string"/>
"#,
    );
    out.push_str(&format!(
        "  <graph id=\"{}\" edgedefault=\"directed\">\n",
        escape_xml(export.tenant.id.as_str())
    ));

    for view in &export.nodes {
        out.push_str(&format!("    <node id=\"{}\">\n", view.id));
        graphml_data(&mut out, "label", &view.node.label);
        if let Some(alias) = &view.node.id_alias {
            graphml_data(&mut out, "alias", alias);
        }
        if let Some(props) = props_json(&view.node.props) {
            graphml_data(&mut out, "node_props", &props);
        }
        out.push_str("    </node>\n");
    }

    for view in &export.edges {
        let edge = &view.edge;
        out.push_str(&format!(
            "    <edge id=\"{}\" source=\"{}\" target=\"{}\">\n",
            view.id, edge.from_node_id, edge.to_node_id
        ));
        graphml_data(&mut out, "kind", &edge.kind);
        graphml_data(&mut out, "valid_from", &timestamp(edge.valid_from));
        if let Some(to) = edge.valid_to {
            graphml_data(&mut out, "valid_to", &timestamp(to));
        }
        if let Some(props) = props_json(&edge.props) {
            graphml_data(&mut out, "edge_props", &props);
        }
        out.push_str("    </edge>\n");
    }

    out.push_str("  </graph>\n</graphml>\n");
    out
}

// =============================================================================
// CYPHER
// =============================================================================

/// Backtick-quote anything that is not a plain identifier.
fn cypher_name(name: &str) -> String {
    let plain = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if plain {
        name.to_string()
    } else {
        format!("`{}`", name.replace('`', "``"))
    }
}

fn cypher_string(s: &str) -> String {
    format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'"))
}

fn cypher_value(value: &PropValue) -> String {
    match value {
        PropValue::Null => "null".to_string(),
        PropValue::Bool(b) => b.to_string(),
        PropValue::Int(i) => i.to_string(),
        PropValue::Float(f) => format!("{:?}", f),
        PropValue::String(s) => cypher_string(s),
        PropValue::List(items) => {
            let items: Vec<String> = items.iter().map(cypher_value).collect();
            format!("[{}]", items.join(", "))
        }
        PropValue::Map(map) => cypher_map(
            map.iter()
                .map(|(k, v)| (k.clone(), cypher_value(v)))
                .collect(),
        ),
    }
}

fn cypher_map(entries: Vec<(String, String)>) -> String {
    let entries: Vec<String> = entries
        .into_iter()
        .map(|(k, v)| format!("{}: {}", cypher_name(&k), v))
        .collect();
    format!("{{{}}}", entries.join(", "))
}

/// System entries first; a property with the same key is dropped.
fn with_props(mut system: Vec<(String, String)>, props: &Props) -> Vec<(String, String)> {
    for (key, value) in props {
        if !system.iter().any(|(k, _)| k == key) {
            system.push((key.clone(), cypher_value(value)));
        }
    }
    system
}

fn render_cypher(export: &TenantExport) -> String {
    let mut out = format!(
        "// Strata export of tenant {} at seq {}\n// Exported at {}\n\n",
        export.tenant.id,
        export.head,
        timestamp(export.exported_at)
    );

    for view in &export.nodes {
        let mut system = vec![("_id".to_string(), cypher_string(&view.id.to_string()))];
        if let Some(alias) = &view.node.id_alias {
            system.push(("_alias".to_string(), cypher_string(alias)));
        }
        out.push_str(&format!(
            "CREATE (:{} {});\n",
            cypher_name(&view.node.label),
            cypher_map(with_props(system, &view.node.props))
        ));
    }

    if !export.edges.is_empty() {
        out.push('\n');
    }
    for view in &export.edges {
        let edge = &view.edge;
        let mut system = vec![
            ("_id".to_string(), cypher_string(&view.id.to_string())),
            (
                "valid_from".to_string(),
                format!("datetime({})", cypher_string(&timestamp(edge.valid_from))),
            ),
        ];
        if let Some(to) = edge.valid_to {
            system.push((
                "valid_to".to_string(),
                format!("datetime({})", cypher_string(&timestamp(to))),
            ));
        }
        out.push_str(&format!(
            "MATCH (a {{_id: {}}}), (b {{_id: {}}}) CREATE (a)-[:{} {}]->(b);\n",
            cypher_string(&edge.from_node_id.to_string()),
            cypher_string(&edge.to_node_id.to_string()),
            cypher_name(&edge.kind),
            cypher_map(with_props(system, &edge.props))
        ));
    }
    out
}

// =============================================================================
// CSV
// =============================================================================

fn csv_section<I>(header: &[&str], rows: I) -> Result<String, StrataError>
where
    I: IntoIterator<Item = Vec<String>>,
{
    let mut writer = csv::Writer::from_writer(Vec::new());
    let write_err = |e: csv::Error| StrataError::Storage(format!("CSV write failed: {}", e));
    writer.write_record(header).map_err(write_err)?;
    for row in rows {
        writer.write_record(&row).map_err(write_err)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| StrataError::Storage(format!("CSV write failed: {}", e)))?;
    String::from_utf8(bytes)
        .map_err(|e| StrataError::Storage(format!("CSV output is not UTF-8: {}", e)))
}

fn render_csv(export: &TenantExport) -> Result<String, StrataError> {
    let nodes = csv_section(
        &["id", "id_alias", "label", "props", "created_seq", "version_seq"],
        export.nodes.iter().map(|view| {
            vec![
                view.id.to_string(),
                view.node.id_alias.clone().unwrap_or_default(),
                view.node.label.clone(),
                props_json(&view.node.props).unwrap_or_default(),
                view.created_seq.to_string(),
                view.version_seq.to_string(),
            ]
        }),
    )?;
    let edges = csv_section(
        &[
            "id",
            "from_node_id",
            "to_node_id",
            "kind",
            "valid_from",
            "valid_to",
            "props",
            "created_seq",
            "version_seq",
        ],
        export.edges.iter().map(|view| {
            let edge = &view.edge;
            vec![
                view.id.to_string(),
                edge.from_node_id.to_string(),
                edge.to_node_id.to_string(),
                edge.kind.clone(),
                timestamp(edge.valid_from),
                edge.valid_to.map(timestamp).unwrap_or_default(),
                props_json(&edge.props).unwrap_or_default(),
                view.created_seq.to_string(),
                view.version_seq.to_string(),
            ]
        }),
    )?;
    Ok(format!("# Nodes\n{}\n# Edges\n{}", nodes, edges))
}

// =============================================================================
// TESTS
// =============================================================================
