use thiserror::Error;

#[derive(Error, Debug)]
pub enum DashboardError {
    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("Worksheet in {0} has no header row")]
    EmptySheet(String),

    #[error("Column '{0}' does not exist in the table")]
    UnknownColumn(String),

    #[error("Unknown role '{0}'")]
    UnknownRole(String),

    #[error("Got {labels} period labels for {tables} tables")]
    LabelMismatch { tables: usize, labels: usize },

    #[error("Period comparison needs at least two tables, got {0}")]
    NotEnoughPeriods(usize),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Spreadsheet error: {0}")]
    Excel(#[from] calamine::Error),
}

pub type Result<T> = std::result::Result<T, DashboardError>;
