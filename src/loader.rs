use crate::error::{DashboardError, Result};
use crate::resolver::prepare_headers;
use crate::types::{Cell, Notice, Table};
use crate::util::parse_f64_safe;
use calamine::{open_workbook_auto, Data, Reader};
use csv::ReaderBuilder;
use log::{debug, info, warn};
use std::path::Path;

#[derive(Debug, Clone, PartialEq)]
pub struct LoadReport {
    pub total_rows: usize,
    pub kept_rows: usize,
    pub dropped_columns: usize,
}

/// Decode the first worksheet (or a CSV file) into a cleaned [`Table`].
///
/// Headers are prepared (placeholders, canonical names, de-duplication),
/// then fully empty rows and fully empty columns are dropped.
pub fn load_table(path: impl AsRef<Path>) -> Result<(Table, LoadReport)> {
    let path = path.as_ref();
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase());

    let (raw_headers, rows) = match extension.as_deref() {
        Some("csv") => read_csv(path)?,
        Some("xlsx") | Some("xls") | Some("xlsm") | Some("xlsb") | Some("ods") => read_workbook(path)?,
        Some(ext) => return Err(DashboardError::UnsupportedFormat(ext.to_string())),
        None => {
            return Err(DashboardError::UnsupportedFormat(format!(
                "{} has no extension",
                path.display()
            )))
        }
    };
    if raw_headers.is_empty() {
        return Err(DashboardError::EmptySheet(path.display().to_string()));
    }

    let columns = prepare_headers(&raw_headers);
    let total_rows = rows.len();
    let (table, dropped_columns) = clean_table(Table::new(columns, rows));
    let report = LoadReport {
        total_rows,
        kept_rows: table.len(),
        dropped_columns,
    };
    info!(
        "loaded {}: {} rows ({} kept), {} columns ({} empty dropped)",
        path.display(),
        total_rows,
        report.kept_rows,
        table.columns.len(),
        dropped_columns
    );
    Ok((table, report))
}

/// Load several files in order, turning failures into notices so the
/// remaining files still make it into the analysis set. Each loaded table
/// is paired with its index in `paths`.
pub fn load_many<P: AsRef<Path>>(paths: &[P]) -> (Vec<(usize, Table)>, Vec<Notice>) {
    let mut loaded = Vec::new();
    let mut notices = Vec::new();
    for (idx, p) in paths.iter().enumerate() {
        let p = p.as_ref();
        match load_table(p) {
            Ok((table, _)) => loaded.push((idx, table)),
            Err(e) => {
                warn!("skipping {}: {}", p.display(), e);
                notices.push(Notice::LoadFailed {
                    file: p.display().to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }
    (loaded, notices)
}

/// Default period label for an uploaded file: its name up to the first dot.
pub fn default_label(path: impl AsRef<Path>) -> String {
    let name = path
        .as_ref()
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    name.split('.').next().unwrap_or(name).trim().to_string()
}

fn read_csv(path: &Path) -> Result<(Vec<Option<String>>, Vec<Vec<Cell>>)> {
    let mut rdr = ReaderBuilder::new()
        .flexible(true)
        .has_headers(false)
        .from_path(path)?;
    let mut records = rdr.records();

    let headers: Vec<Option<String>> = match records.next() {
        Some(first) => first?
            .iter()
            .enumerate()
            .map(|(idx, h)| {
                // Excel's "CSV UTF-8" export starts with a byte-order mark.
                let h = if idx == 0 { h.trim_start_matches('\u{feff}') } else { h };
                Some(h.to_string())
            })
            .collect(),
        None => Vec::new(),
    };

    let mut rows = Vec::new();
    let mut parse_errors = 0usize;
    for result in records {
        let record = match result {
            Ok(r) => r,
            Err(_) => {
                parse_errors += 1;
                continue;
            }
        };
        rows.push(record.iter().map(text_cell).collect());
    }
    if parse_errors > 0 {
        warn!("{}: {} unreadable CSV records skipped", path.display(), parse_errors);
    }
    Ok((headers, rows))
}

/// Text that prints back unchanged as a number becomes `Cell::Number`.
/// Anything else (`007`, `1,200`, `1.50`) keeps its original spelling and is
/// still coerced on demand by `Cell::as_f64`.
fn text_cell(s: &str) -> Cell {
    let s = s.trim();
    if s.is_empty() {
        return Cell::Empty;
    }
    match parse_f64_safe(Some(s)).map(Cell::Number) {
        Some(n) if n.to_string() == s => n,
        _ => Cell::Text(s.to_string()),
    }
}

fn read_workbook(path: &Path) -> Result<(Vec<Option<String>>, Vec<Vec<Cell>>)> {
    let mut workbook = open_workbook_auto(path)?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| DashboardError::EmptySheet(path.display().to_string()))??;
    debug!("{}: first sheet is {}x{}", path.display(), range.height(), range.width());

    let mut rows_iter = range.rows();
    let headers: Vec<Option<String>> = match rows_iter.next() {
        Some(first) => first
            .iter()
            .map(|c| match c {
                Data::Empty => None,
                other => Some(other.to_string()),
            })
            .collect(),
        None => Vec::new(),
    };
    let rows = rows_iter
        .map(|row| row.iter().map(workbook_cell).collect())
        .collect();
    Ok((headers, rows))
}

fn workbook_cell(data: &Data) -> Cell {
    match data {
        Data::Empty => Cell::Empty,
        Data::Int(i) => Cell::Number(*i as f64),
        Data::Float(f) => Cell::Number(*f),
        Data::Error(_) => Cell::Empty,
        Data::String(s) => text_cell(s),
        other => Cell::Text(other.to_string()),
    }
}

/// Drop rows with no values and columns with no values. Returns the cleaned
/// table and the number of columns removed.
pub fn clean_table(table: Table) -> (Table, usize) {
    let rows: Vec<Vec<Cell>> = table
        .rows
        .into_iter()
        .filter(|r| r.iter().any(|c| !c.is_empty()))
        .collect();
    let keep: Vec<bool> = (0..table.columns.len())
        .map(|idx| rows.iter().any(|r| r.get(idx).is_some_and(|c| !c.is_empty())))
        .collect();
    let dropped = keep.iter().filter(|k| !**k).count();

    let columns = table
        .columns
        .into_iter()
        .zip(&keep)
        .filter(|(_, k)| **k)
        .map(|(c, _)| c)
        .collect();
    let rows = rows
        .into_iter()
        .map(|r| {
            r.into_iter()
                .zip(&keep)
                .filter(|(_, k)| **k)
                .map(|(c, _)| c)
                .collect()
        })
        .collect();
    (Table::new(columns, rows), dropped)
}
