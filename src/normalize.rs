// Shape normalization: turn the endpoint-specific JSON of an aggregated
// result into flat rows for CSV, or into rule bodies for exports.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::warn;

use crate::paginate::AggregatedResult;
use crate::query::Query;

/// Message shown when a query has no tabular form.
pub const UNSUPPORTED_CSV: &str = "CSV output is not currently supported for this query response";

/// Extension given to exported rule files.
pub const RULE_EXTENSION: &str = "yara";

/// How a query's records are rendered outside of JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// Flattened into CSV rows.
    Table(Layout),
    /// Rule export: identifier plus raw rule body, written verbatim.
    Rules,
}

impl Shape {
    /// Shape for `query`, or `None` when only JSON output makes sense.
    pub fn for_query(query: &Query) -> Option<Shape> {
        match query {
            Query::FreeTextSearch(_) => Some(Shape::Table(Layout::SearchIndicators)),
            Query::PulseById(_) => Some(Shape::Table(Layout::PulseIndicators)),
            Query::Export(_) => Some(Shape::Rules),
            Query::IndicatorLookup { .. } | Query::CveLookup(_) => None,
        }
    }
}

/// Where the rows of a tabular result come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// Pulse search hits: rows come from each hit's `indicators` array.
    SearchIndicators,
    /// Pulse indicator list: each record is a row, nested keys joined with `_`.
    PulseIndicators,
}

impl Layout {
    fn separator(self) -> &'static str {
        match self {
            Layout::SearchIndicators => ".",
            Layout::PulseIndicators => "_",
        }
    }
}

/// One flattened row: `(column, value)` pairs in first-seen key order.
pub type Row = Vec<(String, String)>;

/// Rows plus the union of their columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl Table {
    pub fn from_rows(rows: Vec<Row>) -> Self {
        let mut seen = HashSet::new();
        let mut columns = Vec::new();
        for (key, _) in rows.iter().flatten() {
            if seen.insert(key.as_str()) {
                columns.push(key.clone());
            }
        }
        Table { columns, rows }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Columns of this table that `header` has no place for.
    pub fn columns_outside<'a>(&'a self, header: &[String]) -> Vec<&'a str> {
        self.columns
            .iter()
            .filter(|col| !header.contains(col))
            .map(String::as_str)
            .collect()
    }

    /// Values of `row` laid out against `columns`; missing cells are empty.
    pub fn project<'a>(row: &'a Row, columns: &[String]) -> Vec<&'a str> {
        columns
            .iter()
            .map(|col| {
                row.iter()
                    .find(|(key, _)| key == col)
                    .map_or("", |(_, value)| value.as_str())
            })
            .collect()
    }
}

/// Typed view of a pulse search hit.
#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(default)]
    indicators: Vec<Value>,
}

/// Typed view of an exported rule.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Rule {
    #[serde(default)]
    pub id: Value,
    #[serde(default)]
    pub content: String,
}

impl Rule {
    /// Identifier as printed, without JSON quoting for strings.
    pub fn id_text(&self) -> String {
        match &self.id {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }

    /// `<rule name>.yara`, falling back to the identifier when the body
    /// has no rule declaration.
    pub fn file_name(&self) -> Option<String> {
        let stem = rule_name(&self.content)
            .map(str::to_string)
            .or_else(|| {
                let id: String = self
                    .id_text()
                    .chars()
                    .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
                    .collect();
                (!id.is_empty()).then_some(id)
            })?;
        Some(format!("{stem}.{RULE_EXTENSION}"))
    }
}

/// Name following the first `rule` keyword of a YARA body.
pub fn rule_name(body: &str) -> Option<&str> {
    static RULE_DECL: OnceLock<Regex> = OnceLock::new();
    let re = RULE_DECL.get_or_init(|| {
        Regex::new(r"(?m)^\s*(?:(?:private|global)\s+)*rule\s+([A-Za-z0-9_]+)").expect("valid rule regex")
    });
    re.captures(body).and_then(|c| c.get(1)).map(|m| m.as_str())
}

/// Flatten `result` into rows according to `layout`.
pub fn to_table(layout: Layout, result: &AggregatedResult) -> Table {
    let sep = layout.separator();
    let rows = match layout {
        Layout::SearchIndicators => result
            .records
            .iter()
            .filter_map(|record| match SearchHit::deserialize(record) {
                Ok(hit) => Some(hit.indicators),
                Err(err) => {
                    warn!("search result without an indicator list: {err}");
                    None
                }
            })
            .flatten()
            .map(|indicator| flatten(&indicator, sep))
            .collect(),
        Layout::PulseIndicators => result.records.iter().map(|record| flatten(record, sep)).collect(),
    };
    Table::from_rows(rows)
}

/// Exported rules in `result`; records without the rule fields are skipped.
pub fn to_rules(result: &AggregatedResult) -> Vec<Rule> {
    result
        .records
        .iter()
        .filter_map(|record| match Rule::deserialize(record) {
            Ok(rule) => Some(rule),
            Err(err) => {
                warn!("skipping malformed rule record: {err}");
                None
            }
        })
        .collect()
}

/// Flatten nested objects into one row, joining key paths with `sep`.
/// Arrays stay whole and are rendered as compact JSON.
pub fn flatten(value: &Value, sep: &str) -> Row {
    let mut row = Row::new();
    match value {
        Value::Object(map) => flatten_into(map, "", sep, &mut row),
        other => row.push(("value".to_string(), cell(other))),
    }
    row
}

fn flatten_into(map: &Map<String, Value>, prefix: &str, sep: &str, out: &mut Row) {
    for (key, value) in map {
        let name = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}{sep}{key}")
        };
        match value {
            Value::Object(inner) => flatten_into(inner, &name, sep, out),
            other => out.push((name, cell(other))),
        }
    }
}

fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}
