use crate::error::Result;
use crate::types::Table;
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use tabled::{builder::Builder, settings::Style, Table as TextTable, Tabled};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Encode a table as UTF-8 CSV with a byte-order mark so spreadsheet apps
/// pick the right encoding for Hebrew text.
pub fn table_to_csv_bytes(table: &Table) -> Result<Vec<u8>> {
    let mut buf = UTF8_BOM.to_vec();
    {
        let mut wtr = csv::Writer::from_writer(&mut buf);
        wtr.write_record(&table.columns)?;
        for row in &table.rows {
            wtr.write_record(row.iter().map(|c| c.to_string()))?;
        }
        wtr.flush()?;
    }
    Ok(buf)
}

pub fn write_table_csv(path: impl AsRef<Path>, table: &Table) -> Result<()> {
    let bytes = table_to_csv_bytes(table)?;
    let mut f = std::fs::File::create(path)?;
    f.write_all(&bytes)?;
    Ok(())
}

pub fn write_csv<T: Serialize>(path: impl AsRef<Path>, rows: &[T]) -> Result<()> {
    let mut f = std::fs::File::create(path)?;
    f.write_all(UTF8_BOM)?;
    let mut wtr = csv::Writer::from_writer(f);
    for r in rows {
        wtr.serialize(r)?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_json<T: Serialize>(path: impl AsRef<Path>, value: &T) -> Result<()> {
    let s = serde_json::to_string_pretty(value)?;
    std::fs::write(path, s)?;
    Ok(())
}

pub fn preview_section<T>(title: &str, note: Option<&str>, rows: &[T], max_rows: usize)
where
    T: Tabled + Clone,
{
    println!("{}", title);
    if let Some(n) = note {
        println!("({})", n);
    }
    println!();
    preview_table_rows(rows, max_rows);
}

pub fn preview_table_rows<T>(rows: &[T], max_rows: usize)
where
    T: Tabled + Clone,
{
    let slice: Vec<T> = rows.iter().take(max_rows).cloned().collect();
    if slice.is_empty() {
        println!("(no rows)\n");
        return;
    }
    let table_str = TextTable::new(slice).with(Style::markdown()).to_string();
    println!("{}\n", table_str);
}

/// Preview the first rows of a dynamic table (columns known only at runtime).
pub fn preview_detail(table: &Table, max_rows: usize) {
    if table.is_empty() {
        println!("(no rows)\n");
        return;
    }
    let mut builder = Builder::default();
    builder.push_record(table.columns.iter().cloned());
    for row in table.rows.iter().take(max_rows) {
        builder.push_record(row.iter().map(|c| c.to_string()));
    }
    let table_str = builder.build().with(Style::markdown()).to_string();
    println!("{}", table_str);
    if table.len() > max_rows {
        println!("({} more rows)", table.len() - max_rows);
    }
    println!();
}
