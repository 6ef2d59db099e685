//! Portfolio breakdowns for investment-fund spreadsheet exports.
//!
//! The pipeline is a chain of pure functions invoked fresh for every run:
//! [`loader::load_table`] → [`resolver::Resolver::resolve`] →
//! [`reports::apply_filters`] → [`reports::aggregate`]. Multi-file period
//! comparison goes through [`periods::merge_periods`].

pub mod error;
pub mod loader;
pub mod output;
pub mod periods;
pub mod reports;
pub mod resolver;
pub mod types;
pub mod util;

pub use error::{DashboardError, Result};
pub use resolver::{Resolution, Resolver, ResolverConfig};
pub use types::{Aggregation, AggregationRow, Cell, ColumnMapping, Kpis, Notice, Role, Table};
