//! Multi-file period comparison: label parsing, merging snapshots into one
//! table and per-period trends.

use crate::error::{DashboardError, Result};
use crate::reports::{aggregate, kpis};
use crate::resolver::ensure_unique_columns;
use crate::types::{Cell, ColumnMapping, PeriodSummaryRow, PeriodTrendRow, Role, Table};
use crate::util::{parse_date_safe, parse_i32_safe, safe_div};
use chrono::Datelike;
use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;

pub const PERIOD_COLUMN: &str = "Period";

static QUARTER_FIRST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bQ\s*([1-4])\s*[-/_' ]?\s*(\d{4}|\d{2})\b").unwrap());
static YEAR_FIRST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(\d{4})\s*[-/_ ]?\s*Q\s*([1-4])\b").unwrap());
static DIGIT_Q: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b([1-4])\s*Q\s*[-/_' ]?\s*(\d{4}|\d{2})\b").unwrap());
static HEBREW_QUARTER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"רבעון\s*([1-4])\D{0,3}?(\d{4}|\d{2})\b").unwrap());

/// A label attached to every row of one uploaded file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodLabel {
    pub label: String,
    /// `(year, quarter)` when the label looks like a quarter.
    pub key: Option<(i32, u32)>,
}

impl PeriodLabel {
    pub fn new(label: &str) -> Self {
        let label = label.trim().to_string();
        let key = parse_quarter(&label);
        PeriodLabel { label, key }
    }
}

fn expand_year(digits: &str) -> Option<i32> {
    let y = parse_i32_safe(Some(digits))?;
    Some(if digits.len() == 2 { 2000 + y } else { y })
}

/// Extract `(year, quarter)` from labels such as `Q1 2024`, `Q1-24`,
/// `2024Q1`, `1Q24`, `funds_Q1_2024`, `רבעון 1 2024` or a quarter-end date.
pub fn parse_quarter(label: &str) -> Option<(i32, u32)> {
    let label = label.trim();
    if let Some(date) = parse_date_safe(Some(label)) {
        return Some((date.year(), (date.month() - 1) / 3 + 1));
    }
    // File stems separate tokens with `_`, which `\b` treats as a word char.
    let spaced = label.replace('_', " ");
    let label = spaced.as_str();
    if let Some(k) = quarter_then_year(&QUARTER_FIRST, label) {
        return Some(k);
    }
    if let Some(c) = YEAR_FIRST.captures(label) {
        let q = c[2].parse::<u32>().ok()?;
        return Some((expand_year(&c[1])?, q));
    }
    quarter_then_year(&DIGIT_Q, label).or_else(|| quarter_then_year(&HEBREW_QUARTER, label))
}

fn quarter_then_year(re: &Regex, label: &str) -> Option<(i32, u32)> {
    let c = re.captures(label)?;
    let q = c[1].parse::<u32>().ok()?;
    Some((expand_year(&c[2])?, q))
}

/// Distinct labels in first-seen order, sorted chronologically only when
/// every one of them parses as a quarter.
pub fn order_periods(labels: &[PeriodLabel]) -> Vec<String> {
    let mut distinct: Vec<&PeriodLabel> = Vec::new();
    for l in labels {
        if !distinct.iter().any(|d| d.label == l.label) {
            distinct.push(l);
        }
    }
    if distinct.iter().all(|l| l.key.is_some()) {
        distinct.sort_by_key(|l| l.key);
    } else {
        debug!("unparseable period labels, keeping upload order");
    }
    distinct.into_iter().map(|l| l.label.clone()).collect()
}

/// Snapshots stacked into one table with a period column.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedPeriods {
    pub table: Table,
    pub period_column: String,
    pub order: Vec<String>,
    pub dropped_columns: Vec<String>,
}

/// Tag each table's rows with its label and stack them, keeping only the
/// columns every table shares (in the first table's column order).
pub fn merge_periods(tables: &[Table], labels: &[String]) -> Result<MergedPeriods> {
    if tables.len() != labels.len() {
        return Err(DashboardError::LabelMismatch {
            tables: tables.len(),
            labels: labels.len(),
        });
    }
    if tables.len() < 2 {
        return Err(DashboardError::NotEnoughPeriods(tables.len()));
    }

    let first = &tables[0];
    let (shared, mut dropped): (Vec<String>, Vec<String>) = first
        .columns
        .iter()
        .cloned()
        .partition(|c| tables[1..].iter().all(|t| t.column_index(c).is_some()));
    for t in &tables[1..] {
        for c in &t.columns {
            if !shared.contains(c) && !dropped.contains(c) {
                dropped.push(c.clone());
            }
        }
    }
    if !dropped.is_empty() {
        debug!("columns not shared by every period dropped: {:?}", dropped);
    }

    let mut columns = shared.clone();
    columns.push(PERIOD_COLUMN.to_string());
    let columns = ensure_unique_columns(&columns);
    let period_column = columns.last().cloned().unwrap_or_else(|| PERIOD_COLUMN.to_string());

    let tagged: Vec<PeriodLabel> = labels.iter().map(|l| PeriodLabel::new(l)).collect();
    let mut rows = Vec::new();
    for (table, label) in tables.iter().zip(&tagged) {
        let idx: Vec<usize> = shared.iter().filter_map(|c| table.column_index(c)).collect();
        for row in &table.rows {
            let mut out: Vec<Cell> = idx
                .iter()
                .map(|&i| row.get(i).cloned().unwrap_or(Cell::Empty))
                .collect();
            out.push(Cell::Text(label.label.clone()));
            rows.push(out);
        }
    }

    Ok(MergedPeriods {
        table: Table::new(columns, rows),
        period_column,
        order: order_periods(&tagged),
        dropped_columns: dropped,
    })
}

impl MergedPeriods {
    /// Rows belonging to one period.
    pub fn period_rows(&self, period: &str) -> Table {
        match self.table.column_index(&self.period_column) {
            Some(idx) => self
                .table
                .select_rows(|r| r.get(idx).and_then(Cell::category).as_deref() == Some(period)),
            None => self.table.select_rows(|_| false),
        }
    }
}

/// NAV summed per `(period, category)`, periods in merge order and
/// categories by NAV descending within each period.
pub fn period_trend(merged: &MergedPeriods, mapping: &ColumnMapping, role: Role) -> Vec<PeriodTrendRow> {
    let mut out = Vec::new();
    for period in &merged.order {
        let agg = aggregate(&merged.period_rows(period), mapping, role);
        out.extend(agg.rows.into_iter().map(|r| PeriodTrendRow {
            period: period.clone(),
            category: r.category,
            nav: r.nav,
        }));
    }
    out
}

/// Per-period totals with the percent change from the previous period.
pub fn period_summary(merged: &MergedPeriods, mapping: &ColumnMapping) -> Vec<PeriodSummaryRow> {
    let mut out: Vec<PeriodSummaryRow> = Vec::new();
    for period in &merged.order {
        let k = kpis(&merged.period_rows(period), mapping);
        let change_pct = match out.last() {
            Some(prev) => safe_div(k.total_nav - prev.total_nav, prev.total_nav) * 100.0,
            None => 0.0,
        };
        out.push(PeriodSummaryRow {
            period: period.clone(),
            total_nav: k.total_nav,
            investments: k.investments,
            change_pct,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(columns: &[&str], rows: Vec<Vec<Cell>>) -> Table {
        Table::new(columns.iter().map(|c| c.to_string()).collect(), rows)
    }

    fn text(s: &str) -> Cell {
        Cell::Text(s.to_string())
    }

    fn labels(ls: &[&str]) -> Vec<String> {
        ls.iter().map(|l| l.to_string()).collect()
    }

    #[test]
    fn test_parse_quarter_variants() {
        assert_eq!(parse_quarter("Q1 2024"), Some((2024, 1)));
        assert_eq!(parse_quarter("q3-23"), Some((2023, 3)));
        assert_eq!(parse_quarter("2024Q2"), Some((2024, 2)));
        assert_eq!(parse_quarter("1Q24"), Some((2024, 1)));
        assert_eq!(parse_quarter("רבעון 4 2022"), Some((2022, 4)));
        assert_eq!(parse_quarter("2024-09-30"), Some((2024, 3)));
        assert_eq!(parse_quarter("annual report"), None);
        assert_eq!(parse_quarter("funds_Q1_2024"), Some((2024, 1)));
        assert_eq!(parse_quarter("portfolio_2024_Q1"), Some((2024, 1)));
        assert_eq!(parse_quarter("holdings_1Q23"), Some((2023, 1)));
    }

    #[test]
    fn test_chronological_order() {
        let tables = vec![
            snapshot(&["NAV"], vec![vec![Cell::Number(1.0)]]),
            snapshot(&["NAV"], vec![vec![Cell::Number(2.0)]]),
            snapshot(&["NAV"], vec![vec![Cell::Number(3.0)]]),
        ];
        let merged = merge_periods(&tables, &labels(&["Q2 2024", "Q1 2024", "Q3 2023"])).unwrap();
        assert_eq!(merged.order, vec!["Q3 2023", "Q1 2024", "Q2 2024"]);
        // rows stay in upload order
        assert_eq!(merged.table.rows[0][1], text("Q2 2024"));
    }

    #[test]
    fn test_mixed_labels_keep_upload_order() {
        let tables = vec![snapshot(&["NAV"], vec![]), snapshot(&["NAV"], vec![])];
        let merged = merge_periods(&tables, &labels(&["Q2 2024", "latest"])).unwrap();
        assert_eq!(merged.order, vec!["Q2 2024", "latest"]);
    }

    #[test]
    fn test_merge_keeps_shared_columns_only() {
        let a = snapshot(
            &["Fund", "NAV (ILS)", "Geography", "Notes"],
            vec![vec![text("A"), Cell::Number(10.0), text("US"), text("x")]],
        );
        let b = snapshot(
            &["Geography", "NAV (ILS)", "Fund", "Manager"],
            vec![vec![text("IL"), Cell::Number(20.0), text("B"), text("m")]],
        );
        let merged = merge_periods(&[a, b], &labels(&["Q1 2024", "Q2 2024"])).unwrap();
        assert_eq!(merged.table.columns, vec!["Fund", "NAV (ILS)", "Geography", "Period"]);
        assert_eq!(merged.dropped_columns, vec!["Notes", "Manager"]);
        assert_eq!(
            merged.table.rows[1],
            vec![text("B"), Cell::Number(20.0), text("IL"), text("Q2 2024")]
        );
    }

    #[test]
    fn test_file_stem_labels_sort_chronologically() {
        let tables: Vec<Table> = (0..3).map(|_| snapshot(&["NAV"], vec![])).collect();
        let merged = merge_periods(
            &tables,
            &labels(&["funds_Q2_2024", "funds_Q1_2024", "funds_Q3_2023"]),
        )
        .unwrap();
        assert_eq!(merged.order, vec!["funds_Q3_2023", "funds_Q1_2024", "funds_Q2_2024"]);
    }

    #[test]
    fn test_dropped_columns_listed_once() {
        let a = snapshot(&["NAV"], vec![]);
        let b = snapshot(&["NAV", "X", "Notes"], vec![]);
        let c = snapshot(&["NAV", "Notes", "X"], vec![]);
        let merged = merge_periods(&[a, b, c], &labels(&["Q1 2024", "Q2 2024", "Q3 2024"])).unwrap();
        assert_eq!(merged.table.columns, vec!["NAV", "Period"]);
        assert_eq!(merged.dropped_columns, vec!["X", "Notes"]);
    }

    #[test]
    fn test_existing_period_column_is_not_clobbered() {
        let a = snapshot(&["Period", "NAV"], vec![]);
        let b = snapshot(&["Period", "NAV"], vec![]);
        let merged = merge_periods(&[a, b], &labels(&["Q1 2024", "Q2 2024"])).unwrap();
        assert_eq!(merged.period_column, "Period_1");
    }

    #[test]
    fn test_merge_rejects_bad_inputs() {
        let one = vec![snapshot(&["NAV"], vec![])];
        assert!(matches!(
            merge_periods(&one, &labels(&["Q1 2024"])),
            Err(DashboardError::NotEnoughPeriods(1))
        ));
        let two = vec![snapshot(&["NAV"], vec![]), snapshot(&["NAV"], vec![])];
        assert!(matches!(
            merge_periods(&two, &labels(&["Q1 2024"])),
            Err(DashboardError::LabelMismatch { tables: 2, labels: 1 })
        ));
    }

    #[test]
    fn test_trend_and_summary() {
        let cols = ["NAV (ILS)", "Geography"];
        let q1 = snapshot(
            &cols,
            vec![
                vec![Cell::Number(100.0), text("US")],
                vec![Cell::Number(50.0), text("Israel")],
            ],
        );
        let q2 = snapshot(
            &cols,
            vec![
                vec![Cell::Number(120.0), text("US")],
                vec![Cell::Number(180.0), text("Israel")],
            ],
        );
        let merged = merge_periods(&[q2, q1], &labels(&["Q2 2024", "Q1 2024"])).unwrap();
        let mut mapping = ColumnMapping::default();
        mapping.set(Role::Nav, "NAV (ILS)");
        mapping.set(Role::Geography, "Geography");

        let trend = period_trend(&merged, &mapping, Role::Geography);
        let flat: Vec<(&str, &str, f64)> = trend
            .iter()
            .map(|r| (r.period.as_str(), r.category.as_str(), r.nav))
            .collect();
        assert_eq!(
            flat,
            vec![
                ("Q1 2024", "US", 100.0),
                ("Q1 2024", "Israel", 50.0),
                ("Q2 2024", "Israel", 180.0),
                ("Q2 2024", "US", 120.0),
            ]
        );

        let summary = period_summary(&merged, &mapping);
        assert_eq!(summary[0].total_nav, 150.0);
        assert_eq!(summary[0].change_pct, 0.0);
        assert_eq!(summary[1].total_nav, 300.0);
        assert!((summary[1].change_pct - 100.0).abs() < 1e-9);
    }
}
