//! Maps tabular query results onto entity records.
//!
//! Columns are matched to declared fields case-insensitively; unknown columns
//! are skipped. Cell values go through [`coerce_cell`], so a malformed cell
//! degrades to its raw text instead of failing the row.

use std::collections::HashMap;
use std::io::Read;

use serde_json::Value;

use crate::error::BeaconError;

/// Header plus data rows, all cells as text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowSet {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RowSet {
    /// Reads delimited text whose first record is the header.
    pub fn from_csv<R: Read>(reader: R) -> Result<Self, BeaconError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);
        let header = reader
            .headers()
            .map_err(|err| BeaconError::ResultRead(err.to_string()))?
            .iter()
            .map(str::to_string)
            .collect();
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|err| BeaconError::ResultRead(err.to_string()))?;
            rows.push(record.iter().map(str::to_string).collect());
        }
        Ok(Self { header, rows })
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First cell of the first data row; used for `COUNT(...)` results.
    pub fn scalar(&self) -> Option<&str> {
        self.rows.first().and_then(|row| row.first()).map(String::as_str)
    }

    pub fn column(&self, name: &str) -> Option<usize> {
        self.header
            .iter()
            .position(|column| column.eq_ignore_ascii_case(name))
    }
}

/// A declared, settable field of an entity schema.
pub struct Field<T> {
    pub name: &'static str,
    pub set: fn(&mut T, Value),
}

pub trait Hydrate: Default + 'static {
    const FIELDS: &'static [Field<Self>];
}

/// Best-effort JSON decoding of a single cell: numbers, booleans, objects and
/// arrays decode to their JSON values, anything else stays the raw string.
pub fn coerce_cell(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Reads a coerced cell back as text; non-string JSON is re-encoded.
pub fn text(value: Value) -> String {
    match value {
        Value::String(value) => value,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Reads a coerced cell as a list of strings.
pub fn text_list(value: Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.into_iter().map(text).collect(),
        Value::Null => Vec::new(),
        Value::String(raw) if raw.is_empty() => Vec::new(),
        other => parse_bracketed_list(&text(other)),
    }
}

/// Parses the engine's text rendering of an aggregated array column,
/// `[a, b, c]`. This is not JSON: elements are unquoted.
pub fn parse_bracketed_list(raw: &str) -> Vec<String> {
    let inner = raw.trim().trim_start_matches('[').trim_end_matches(']');
    if inner.trim().is_empty() {
        return Vec::new();
    }
    inner.split(", ").map(|item| item.trim().to_string()).collect()
}

struct ColumnMap(Vec<Option<usize>>);

impl ColumnMap {
    fn new<T: Hydrate>(header: &[String]) -> Self {
        let fields: HashMap<String, usize> = T::FIELDS
            .iter()
            .enumerate()
            .map(|(index, field)| (field.name.to_lowercase(), index))
            .collect();
        Self(
            header
                .iter()
                .map(|column| fields.get(&column.to_lowercase()).copied())
                .collect(),
        )
    }
}

fn hydrate_row<T: Hydrate>(columns: &[Option<usize>], row: &[String]) -> T {
    let mut record = T::default();
    for (field, cell) in columns.iter().zip(row) {
        if let Some(index) = field {
            (T::FIELDS[*index].set)(&mut record, coerce_cell(cell));
        }
    }
    record
}

/// One record per data row, always: rows with no matching column yield a
/// default record so existence and count logic sees the true row count.
pub fn hydrate<T: Hydrate>(rows: &RowSet) -> Vec<T> {
    let columns = ColumnMap::new::<T>(&rows.header);
    rows.rows
        .iter()
        .map(|row| hydrate_row(&columns.0, row))
        .collect()
}

/// Like [`hydrate`], but the named aggregate column is pulled out of every row
/// as a bracketed list instead of being mapped onto a field.
pub fn hydrate_with_list<T: Hydrate>(rows: &RowSet, list_column: &str) -> Vec<(T, Vec<String>)> {
    let mut columns = ColumnMap::new::<T>(&rows.header).0;
    let list_index = rows.column(list_column);
    if let Some(index) = list_index {
        columns[index] = None;
    }
    rows.rows
        .iter()
        .map(|row| {
            let list = list_index
                .and_then(|index| row.get(index))
                .map(|raw| parse_bracketed_list(raw))
                .unwrap_or_default();
            (hydrate_row(&columns, row), list)
        })
        .collect()
}
