//! XLSX persistence for the accumulated dataset.
//!
//! Records are flattened before writing: nested objects become dotted column
//! names (`lokasi.nama`), arrays are stored as their JSON text. Columns are the
//! union of every record's keys in first-seen order. The file is always
//! rewritten in full.

use crate::model::Record;
use anyhow::{Context, Result};
use calamine::{open_workbook_auto, Data, Reader};
use rust_xlsxwriter::Workbook;
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;

const SHEET_NAME: &str = "Sheet1";

/// Largest integer an XLSX double holds exactly.
const MAX_EXACT_INT: f64 = 9_007_199_254_740_992.0;

/// Flatten nested objects into dotted keys, preserving field order.
pub fn flatten_record(record: &Record) -> Vec<(String, Value)> {
    let mut out = Vec::with_capacity(record.len());
    flatten_into(None, record, &mut out);
    out
}

fn flatten_into(prefix: Option<&str>, obj: &Record, out: &mut Vec<(String, Value)>) {
    for (key, value) in obj {
        let name = match prefix {
            Some(p) => format!("{p}.{key}"),
            None => key.clone(),
        };
        match value {
            Value::Object(inner) if !inner.is_empty() => {
                flatten_into(Some(name.as_str()), inner, out)
            }
            other => out.push((name, other.clone())),
        }
    }
}

/// Union of flattened column names across rows, first-seen order.
pub fn columns(rows: &[Vec<(String, Value)>]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut cols = Vec::new();
    for row in rows {
        for (name, _) in row {
            if seen.insert(name.as_str()) {
                cols.push(name.clone());
            }
        }
    }
    cols
}

/// Overwrite `path` with one header row plus one row per record.
pub fn save_dataset(path: &Path, records: &[Record]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create output directory {}", parent.display()))?;
        }
    }

    let rows: Vec<Vec<(String, Value)>> = records.iter().map(flatten_record).collect();
    let cols = columns(&rows);

    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name(SHEET_NAME)?;

    let mut col_index = std::collections::HashMap::with_capacity(cols.len());
    for (i, name) in cols.iter().enumerate() {
        let col = u16::try_from(i).context("too many columns for a worksheet")?;
        sheet
            .write_string(0, col, name.as_str())
            .with_context(|| format!("write header {name}"))?;
        col_index.insert(name.as_str(), col);
    }

    for (i, row) in rows.iter().enumerate() {
        let r = u32::try_from(i + 1).context("too many rows for a worksheet")?;
        for (name, value) in row {
            // Every name is in `cols` by construction.
            let Some(&c) = col_index.get(name.as_str()) else {
                continue;
            };
            match value {
                Value::Null => {}
                Value::Bool(b) => {
                    sheet.write_boolean(r, c, *b)?;
                }
                Value::Number(n) => match n.as_f64() {
                    Some(f) => {
                        sheet.write_number(r, c, f)?;
                    }
                    None => {
                        sheet.write_string(r, c, n.to_string())?;
                    }
                },
                Value::String(s) => {
                    sheet
                        .write_string(r, c, s.as_str())
                        .with_context(|| format!("write cell {name} in row {r}"))?;
                }
                Value::Array(_) | Value::Object(_) => {
                    sheet.write_string(r, c, value.to_string())?;
                }
            }
        }
    }

    workbook
        .save(path)
        .with_context(|| format!("save spreadsheet {}", path.display()))
}

/// Read the first sheet back into flat records keyed by the header row.
/// Empty cells are left out of the record.
pub fn load_dataset(path: &Path) -> Result<Vec<Record>> {
    let mut workbook = open_workbook_auto(path)
        .with_context(|| format!("open spreadsheet {}", path.display()))?;
    let range = workbook
        .worksheet_range_at(0)
        .context("spreadsheet has no worksheets")?
        .with_context(|| format!("read first worksheet of {}", path.display()))?;

    let mut rows = range.rows();
    let Some(header) = rows.next() else {
        return Ok(Vec::new());
    };
    let names: Vec<Option<String>> = header
        .iter()
        .map(|cell| match cell_to_value(cell) {
            Some(Value::String(s)) => Some(s),
            Some(other) => Some(other.to_string()),
            None => None,
        })
        .collect();

    let mut records = Vec::new();
    for row in rows {
        let mut record = Record::new();
        for (cell, name) in row.iter().zip(&names) {
            let Some(name) = name else { continue };
            if let Some(value) = cell_to_value(cell) {
                record.insert(name.clone(), value);
            }
        }
        records.push(record);
    }
    Ok(records)
}

fn cell_to_value(cell: &Data) -> Option<Value> {
    match cell {
        Data::Empty => None,
        Data::String(s) if s.is_empty() => None,
        Data::String(s) => Some(Value::String(s.clone())),
        Data::Int(i) => Some(Value::from(*i)),
        Data::Float(f) => float_to_value(*f),
        Data::Bool(b) => Some(Value::Bool(*b)),
        Data::DateTime(dt) => float_to_value(dt.as_f64()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => Some(Value::String(s.clone())),
        Data::Error(e) => Some(Value::String(e.to_string())),
    }
}

fn float_to_value(f: f64) -> Option<Value> {
    if f.fract() == 0.0 && f.abs() < MAX_EXACT_INT {
        Some(Value::from(f as i64))
    } else {
        serde_json::Number::from_f64(f).map(Value::Number)
    }
}
