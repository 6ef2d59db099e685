use crate::error::DashboardError;
use crate::util::parse_f64_safe;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tabled::Tabled;

/// One spreadsheet cell after decoding.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Number(f64),
    Text(String),
}

impl Cell {
    /// Numeric coercion shared by the resolver and the aggregation engine.
    /// Anything that cannot be read as a finite number is treated as missing.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Empty => None,
            Cell::Number(n) if n.is_finite() => Some(*n),
            Cell::Number(_) => None,
            Cell::Text(s) => parse_f64_safe(Some(s)),
        }
    }

    /// Trimmed category text, `None` for blank cells.
    pub fn category(&self) -> Option<String> {
        let s = self.to_string();
        let s = s.trim();
        if s.is_empty() {
            None
        } else {
            Some(s.to_string())
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Number(_) => false,
            Cell::Text(s) => s.trim().is_empty(),
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Empty => Ok(()),
            // Integral values (years, whole amounts) print without a trailing `.0`.
            Cell::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{:.0}", n),
            Cell::Number(n) => write!(f, "{}", n),
            Cell::Text(s) => write!(f, "{}", s),
        }
    }
}

static EMPTY_CELL: Cell = Cell::Empty;

/// An uploaded sheet: ordered, uniquely named columns and rows of equal width.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Cell>>) -> Self {
        let width = columns.len();
        let rows = rows
            .into_iter()
            .map(|mut r| {
                r.resize(width, Cell::Empty);
                r
            })
            .collect();
        Table { columns, rows }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Iterate over one column's cells.
    pub fn column_cells(&self, idx: usize) -> impl Iterator<Item = &Cell> + '_ {
        self.rows.iter().map(move |r| r.get(idx).unwrap_or(&EMPTY_CELL))
    }

    /// Keep only the rows for which `keep` returns true.
    pub fn select_rows<F>(&self, mut keep: F) -> Table
    where
        F: FnMut(&[Cell]) -> bool,
    {
        Table {
            columns: self.columns.clone(),
            rows: self.rows.iter().filter(|r| keep(r.as_slice())).cloned().collect(),
        }
    }
}

/// Logical field of an investment record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    FundName,
    Nav,
    Geography,
    Strategy,
    Characteristic,
    Currency,
    Year,
    Manager,
}

impl Role {
    pub const ALL: [Role; 8] = [
        Role::FundName,
        Role::Nav,
        Role::Geography,
        Role::Strategy,
        Role::Characteristic,
        Role::Currency,
        Role::Year,
        Role::Manager,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::FundName => "fund_name",
            Role::Nav => "nav",
            Role::Geography => "geography",
            Role::Strategy => "strategy",
            Role::Characteristic => "characteristic",
            Role::Currency => "currency",
            Role::Year => "year",
            Role::Manager => "manager",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Role::FundName => "Investment Name",
            Role::Nav => "NAV (ILS)",
            Role::Geography => "Geography",
            Role::Strategy => "Strategy",
            Role::Characteristic => "Main Characteristic",
            Role::Currency => "Currency",
            Role::Year => "Year",
            Role::Manager => "Manager",
        }
    }

    pub fn is_required(&self) -> bool {
        matches!(self, Role::Nav | Role::Geography | Role::Strategy)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = DashboardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_lowercase().replace(['-', ' '], "_");
        Role::ALL
            .iter()
            .copied()
            .find(|r| r.as_str() == key)
            .ok_or_else(|| DashboardError::UnknownRole(s.to_string()))
    }
}

/// Role to physical column name. Each role points at most at one column.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ColumnMapping(BTreeMap<Role, String>);

impl ColumnMapping {
    pub fn get(&self, role: Role) -> Option<&str> {
        self.0.get(&role).map(String::as_str)
    }

    pub fn set(&mut self, role: Role, column: impl Into<String>) {
        self.0.insert(role, column.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = (Role, &str)> + '_ {
        self.0.iter().map(|(r, c)| (*r, c.as_str()))
    }

    /// Resolve a role to its column index in `table`.
    pub fn index_in(&self, table: &Table, role: Role) -> Option<usize> {
        self.get(role).and_then(|c| table.column_index(c))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregationRow {
    pub category: String,
    pub nav: f64,
    pub count: usize,
    pub average: f64,
    pub percent: f64,
}

/// Per-category breakdown for one role, sorted by NAV descending.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Aggregation {
    pub role: Role,
    pub column: Option<String>,
    pub rows: Vec<AggregationRow>,
    pub grand_total: f64,
}

#[derive(Debug, Clone, Tabled)]
pub struct AggregationDisplayRow {
    #[tabled(rename = "Category")]
    pub category: String,
    #[tabled(rename = "NAV")]
    pub nav: String,
    #[tabled(rename = "Investments")]
    pub count: String,
    #[tabled(rename = "AvgNAV")]
    pub average: String,
    #[tabled(rename = "Share%")]
    pub percent: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Kpis {
    pub total_nav: f64,
    pub investments: usize,
    pub average_nav: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Tabled)]
pub struct PeriodTrendRow {
    #[serde(rename = "Period")]
    #[tabled(rename = "Period")]
    pub period: String,
    #[serde(rename = "Category")]
    #[tabled(rename = "Category")]
    pub category: String,
    #[serde(rename = "NAV")]
    #[tabled(rename = "NAV")]
    pub nav: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Tabled)]
pub struct PeriodSummaryRow {
    #[serde(rename = "Period")]
    #[tabled(rename = "Period")]
    pub period: String,
    #[serde(rename = "TotalNAV")]
    #[tabled(rename = "TotalNAV")]
    pub total_nav: f64,
    #[serde(rename = "Investments")]
    #[tabled(rename = "Investments")]
    pub investments: usize,
    #[serde(rename = "ChangePct")]
    #[tabled(rename = "ChangePct")]
    pub change_pct: f64,
}

#[derive(Debug, Serialize)]
pub struct SummaryStats {
    pub source: String,
    pub mapping: ColumnMapping,
    pub kpis: Kpis,
    pub concentration: BTreeMap<Role, f64>,
    pub breakdowns: Vec<Aggregation>,
}

/// Recoverable condition surfaced to the user instead of aborting.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    LoadFailed { file: String, reason: String },
    MappingAmbiguous { role: Role, chosen: Option<String> },
    EmptyFilterResult,
    ComparisonSkipped { valid_tables: usize },
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::LoadFailed { file, reason } => {
                write!(f, "Could not load {}: {}", file, reason)
            }
            Notice::MappingAmbiguous { role, chosen: Some(col) } => write!(
                f,
                "No confident match for {}; guessed '{}' (override with --map {}=COLUMN)",
                role, col, role
            ),
            Notice::MappingAmbiguous { role, chosen: None } => write!(
                f,
                "No column found for {} (set one with --map {}=COLUMN)",
                role, role
            ),
            Notice::EmptyFilterResult => {
                write!(f, "Filters matched no rows; showing the unfiltered table")
            }
            Notice::ComparisonSkipped { valid_tables } => write!(
                f,
                "Period comparison needs at least two loadable files, got {}",
                valid_tables
            ),
        }
    }
}
