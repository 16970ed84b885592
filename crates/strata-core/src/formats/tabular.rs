//! # CSV Ingest Mapping
//!
//! Turns CSV rows into an [`IngestDocument`]. Each row becomes one node or
//! one edge, depending on [`CsvTarget`]. Columns are addressed by header
//! name, or by zero-based index when the file has no header row.
//!
//! The result goes through the same all-or-nothing batch path as a JSON
//! document; a row that cannot be mapped fails the whole file with its
//! line number.

use crate::ingestor::{IngestDocument, IngestEdge};
use crate::types::{Node, PropValue, Props, StrataError};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use std::io::Read;

/// Label given to node rows when neither a label column nor a default label
/// supplies one.
pub const FALLBACK_LABEL: &str = "Node";

// =============================================================================
// MAPPING
// =============================================================================

/// What each CSV row describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CsvTarget {
    #[default]
    Nodes,
    Edges,
}

impl std::str::FromStr for CsvTarget {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "node" | "nodes" => Ok(Self::Nodes),
            "edge" | "edges" | "relationship" | "relationships" => Ok(Self::Edges),
            _ => Err(StrataError::BadRequest(format!(
                "unknown CSV data type '{}', use node or edge",
                s
            ))),
        }
    }
}

/// How CSV columns map onto nodes or edges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvMapping {
    pub target: CsvTarget,
    pub delimiter: u8,
    pub has_header: bool,
    /// Node rows: column holding the `id_alias`.
    pub id_col: Option<String>,
    /// Node rows: column holding the label.
    pub label_col: Option<String>,
    /// Node rows: label used when the label column is absent or empty.
    pub default_label: Option<String>,
    /// Columns copied into `props`. Empty means every non-mapped column.
    pub props_cols: Vec<String>,
    /// Edge rows: column holding the source node alias.
    pub from_col: Option<String>,
    /// Edge rows: column holding the target node alias.
    pub to_col: Option<String>,
    /// Edge rows: one kind for every row. Takes precedence over `kind_col`.
    pub kind: Option<String>,
    /// Edge rows: column holding the kind.
    pub kind_col: Option<String>,
    /// Edge rows: column holding `valid_from`. Absent means "now".
    pub valid_from_col: Option<String>,
    /// Edge rows: column holding `valid_to`. Empty cells mean open-ended.
    pub valid_to_col: Option<String>,
    /// chrono format tried after RFC 3339, e.g. `%Y-%m-%d`.
    pub date_format: Option<String>,
}

impl Default for CsvMapping {
    fn default() -> Self {
        Self {
            target: CsvTarget::Nodes,
            delimiter: b',',
            has_header: true,
            id_col: None,
            label_col: None,
            default_label: None,
            props_cols: Vec::new(),
            from_col: None,
            to_col: None,
            kind: None,
            kind_col: None,
            valid_from_col: None,
            valid_to_col: None,
            date_format: None,
        }
    }
}

impl CsvMapping {
    /// Node mapping with default settings.
    #[must_use]
    pub fn nodes() -> Self {
        Self::default()
    }

    /// Edge mapping between two alias columns.
    #[must_use]
    pub fn edges(from_col: impl Into<String>, to_col: impl Into<String>) -> Self {
        Self {
            target: CsvTarget::Edges,
            from_col: Some(from_col.into()),
            to_col: Some(to_col.into()),
            ..Self::default()
        }
    }
}

// =============================================================================
// COLUMN RESOLUTION
// =============================================================================

/// Configured columns resolved to indices against the header row.
#[derive(Debug, Default)]
struct Columns {
    id: Option<usize>,
    label: Option<usize>,
    from: Option<usize>,
    to: Option<usize>,
    kind: Option<usize>,
    valid_from: Option<usize>,
    valid_to: Option<usize>,
    props: Vec<usize>,
}

fn column_index(headers: &[String], name: &str) -> Result<usize, StrataError> {
    headers
        .iter()
        .position(|h| h == name)
        .or_else(|| name.parse::<usize>().ok().filter(|&i| i < headers.len()))
        .ok_or_else(|| StrataError::BadRequest(format!("unknown CSV column '{}'", name)))
}

fn resolve(headers: &[String], name: Option<&String>) -> Result<Option<usize>, StrataError> {
    name.map(|n| column_index(headers, n)).transpose()
}

impl Columns {
    fn new(headers: &[String], mapping: &CsvMapping) -> Result<Self, StrataError> {
        let mut cols = Self {
            id: resolve(headers, mapping.id_col.as_ref())?,
            label: resolve(headers, mapping.label_col.as_ref())?,
            ..Self::default()
        };

        if mapping.target == CsvTarget::Edges {
            cols.from = Some(column_index(headers, required(&mapping.from_col, "from")?)?);
            cols.to = Some(column_index(headers, required(&mapping.to_col, "to")?)?);
            if mapping.kind.is_none() {
                let name = mapping.kind_col.as_ref().ok_or_else(|| {
                    StrataError::BadRequest("edge rows need a kind or a kind column".into())
                })?;
                cols.kind = Some(column_index(headers, name)?);
            }
            cols.valid_from = resolve(headers, mapping.valid_from_col.as_ref())?;
            cols.valid_to = resolve(headers, mapping.valid_to_col.as_ref())?;
        }

        cols.props = if mapping.props_cols.is_empty() {
            let mapped = cols.mapped();
            (0..headers.len()).filter(|i| !mapped.contains(i)).collect()
        } else {
            mapping
                .props_cols
                .iter()
                .map(|name| column_index(headers, name))
                .collect::<Result<_, _>>()?
        };
        Ok(cols)
    }

    fn mapped(&self) -> Vec<usize> {
        [
            self.id,
            self.label,
            self.from,
            self.to,
            self.kind,
            self.valid_from,
            self.valid_to,
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

fn required<'a>(col: &'a Option<String>, side: &str) -> Result<&'a String, StrataError> {
    col.as_ref()
        .ok_or_else(|| StrataError::BadRequest(format!("edge rows need a {} column", side)))
}

// =============================================================================
// CELL PARSING
// =============================================================================

/// A cell, or `None` when the column is unmapped, missing or empty.
fn cell(record: &csv::StringRecord, index: Option<usize>) -> Option<&str> {
    index
        .and_then(|i| record.get(i))
        .filter(|value| !value.is_empty())
}

/// Integers, finite floats and booleans keep their type; anything else is
/// a string.
fn parse_value(raw: &str) -> PropValue {
    if let Ok(i) = raw.parse::<i64>() {
        return PropValue::Int(i);
    }
    match raw.parse::<f64>() {
        Ok(f) if f.is_finite() => return PropValue::Float(f),
        _ => {}
    }
    match raw.to_ascii_lowercase().as_str() {
        "true" | "yes" => PropValue::Bool(true),
        "false" | "no" => PropValue::Bool(false),
        _ => PropValue::String(raw.to_string()),
    }
}

/// RFC 3339 first, then `format` as a date-time, then as a bare date.
fn parse_timestamp(raw: &str, format: Option<&str>) -> Result<DateTime<Utc>, StrataError> {
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Ok(t.with_timezone(&Utc));
    }
    if let Some(format) = format {
        if let Ok(t) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(t.and_utc());
        }
        if let Ok(d) = NaiveDate::parse_from_str(raw, format) {
            return Ok(d.and_time(NaiveTime::MIN).and_utc());
        }
    }
    Err(StrataError::BadRequest(format!("invalid timestamp '{}'", raw)))
}

fn row_props(record: &csv::StringRecord, headers: &[String], cols: &Columns) -> Props {
    cols.props
        .iter()
        .filter_map(|&i| cell(record, Some(i)).map(|v| (headers[i].clone(), parse_value(v))))
        .collect()
}

fn node_row(
    record: &csv::StringRecord,
    headers: &[String],
    cols: &Columns,
    mapping: &CsvMapping,
) -> Node {
    let label = cell(record, cols.label)
        .map(str::to_string)
        .or_else(|| mapping.default_label.clone())
        .unwrap_or_else(|| FALLBACK_LABEL.to_string());
    Node {
        id_alias: cell(record, cols.id).map(str::to_string),
        label,
        props: row_props(record, headers, cols),
    }
}

fn edge_row(
    record: &csv::StringRecord,
    headers: &[String],
    cols: &Columns,
    mapping: &CsvMapping,
    now: DateTime<Utc>,
) -> Result<IngestEdge, StrataError> {
    let missing = |what: &str| StrataError::BadRequest(format!("missing {} value", what));
    let format = mapping.date_format.as_deref();

    let kind = match &mapping.kind {
        Some(kind) => kind.clone(),
        None => cell(record, cols.kind).ok_or_else(|| missing("kind"))?.to_string(),
    };
    let valid_from = match cols.valid_from {
        Some(i) => {
            let raw = cell(record, Some(i)).ok_or_else(|| missing("valid_from"))?;
            parse_timestamp(raw, format)?
        }
        None => now,
    };
    let valid_to = cell(record, cols.valid_to)
        .map(|raw| parse_timestamp(raw, format))
        .transpose()?;

    Ok(IngestEdge {
        from_node_id: None,
        from_alias: Some(cell(record, cols.from).ok_or_else(|| missing("from"))?.to_string()),
        to_node_id: None,
        to_alias: Some(cell(record, cols.to).ok_or_else(|| missing("to"))?.to_string()),
        kind,
        valid_from,
        valid_to,
        props: row_props(record, headers, cols),
    })
}

// =============================================================================
// READER
// =============================================================================

/// Read every row of `input` into one ingest document.
///
/// Edge rows refer to nodes by alias. `now` stands in for `valid_from` when
/// no column supplies it.
///
/// # Errors
/// - `BadRequest` for an unknown column, a malformed row or an unparseable
///   timestamp, naming the offending line
pub fn read_csv_document<R: Read>(
    input: R,
    mapping: &CsvMapping,
    now: DateTime<Utc>,
) -> Result<IngestDocument, StrataError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(mapping.delimiter)
        .has_headers(mapping.has_header)
        .trim(csv::Trim::All)
        .from_reader(input);

    let first = reader
        .headers()
        .map_err(|e| StrataError::BadRequest(format!("cannot read CSV header: {}", e)))?;
    let headers: Vec<String> = if mapping.has_header {
        first.iter().map(str::to_string).collect()
    } else {
        (0..first.len()).map(|i| i.to_string()).collect()
    };
    let cols = Columns::new(&headers, mapping)?;

    let mut doc = IngestDocument::default();
    for (row, result) in reader.records().enumerate() {
        let record = result.map_err(|e| StrataError::BadRequest(format!("CSV: {}", e)))?;
        let line = record.position().map_or(row as u64 + 1, |p| p.line());
        let at_line = |e: StrataError| match e {
            StrataError::BadRequest(m) => StrataError::BadRequest(format!("line {}: {}", line, m)),
            other => other,
        };

        match mapping.target {
            CsvTarget::Nodes => doc.nodes.push(node_row(&record, &headers, &cols, mapping)),
            CsvTarget::Edges => doc
                .edges
                .push(edge_row(&record, &headers, &cols, mapping, now).map_err(at_line)?),
        }
    }
    tracing::debug!(
        nodes = doc.nodes.len(),
        edges = doc.edges.len(),
        "CSV mapped to ingest document"
    );
    Ok(doc)
}

// =============================================================================
// TESTS
// =============================================================================
