use crate::types::{
    Aggregation, AggregationDisplayRow, AggregationRow, Cell, ColumnMapping, Kpis, Notice, Role,
    SummaryStats, Table,
};
use crate::util::{format_int, format_number, safe_div};
use log::{debug, warn};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Filter option meaning "no constraint on this role".
pub const ALL: &str = "All";

pub const DOMESTIC: &str = "Israel";
pub const INTERNATIONAL: &str = "International";

/// Per-role multi-select state.
pub type Selections = BTreeMap<Role, Vec<String>>;

fn is_unconstrained(selected: &[String]) -> bool {
    selected.is_empty() || selected.iter().any(|s| s.trim() == ALL)
}

/// Keep rows whose value for every constrained role is one of the selected
/// values. AND across roles, OR within a role. The input is never mutated.
pub fn filter(table: &Table, mapping: &ColumnMapping, selections: &Selections) -> Table {
    let mut active: Vec<(usize, Vec<&str>)> = Vec::new();
    for (role, selected) in selections {
        if is_unconstrained(selected) {
            continue;
        }
        match mapping.index_in(table, *role) {
            Some(idx) => active.push((idx, selected.iter().map(|s| s.trim()).collect())),
            None => warn!("ignoring filter on unmapped role {}", role),
        }
    }
    if active.is_empty() {
        return table.clone();
    }
    table.select_rows(|row| {
        active.iter().all(|(idx, wanted)| {
            row.get(*idx)
                .and_then(Cell::category)
                .is_some_and(|v| wanted.contains(&v.as_str()))
        })
    })
}

/// [`filter`], falling back to the unfiltered table when the selection
/// excludes every row.
pub fn apply_filters(
    table: &Table,
    mapping: &ColumnMapping,
    selections: &Selections,
) -> (Table, Option<Notice>) {
    let filtered = filter(table, mapping, selections);
    if filtered.is_empty() && !table.is_empty() {
        warn!("filters matched none of {} rows; using the unfiltered table", table.len());
        return (table.clone(), Some(Notice::EmptyFilterResult));
    }
    (filtered, None)
}

/// `"All"` followed by every distinct non-blank value of `column`, sorted.
pub fn filter_options(table: &Table, column: &str) -> Vec<String> {
    let mut options = vec![ALL.to_string()];
    if let Some(idx) = table.column_index(column) {
        let distinct: BTreeSet<String> = table.column_cells(idx).filter_map(Cell::category).collect();
        options.extend(distinct);
    }
    options
}

/// Sum NAV per key. Rows with a non-numeric NAV count nowhere; rows with a
/// valid NAV but no key only contribute to the grand total.
fn bucket_rows<F>(table: &Table, nav_idx: usize, key: F) -> (Vec<AggregationRow>, f64)
where
    F: Fn(&[Cell]) -> Option<String>,
{
    let mut order: Vec<String> = Vec::new();
    let mut acc: HashMap<String, (f64, usize)> = HashMap::new();
    let mut grand_total = 0.0;
    for row in &table.rows {
        let Some(nav) = row.get(nav_idx).and_then(Cell::as_f64) else {
            continue;
        };
        grand_total += nav;
        let Some(k) = key(row) else { continue };
        let e = acc.entry(k.clone()).or_insert_with(|| {
            order.push(k);
            (0.0, 0)
        });
        e.0 += nav;
        e.1 += 1;
    }

    let mut rows: Vec<AggregationRow> = order
        .into_iter()
        .map(|category| {
            let (nav, count) = acc[&category];
            AggregationRow {
                category,
                nav,
                count,
                average: safe_div(nav, count as f64),
                percent: safe_div(nav, grand_total) * 100.0,
            }
        })
        .collect();
    // Stable sort keeps first-seen order among equal sums.
    rows.sort_by(|a, b| b.nav.partial_cmp(&a.nav).unwrap_or(Ordering::Equal));
    (rows, grand_total)
}

fn empty_aggregation(role: Role, column: Option<String>) -> Aggregation {
    Aggregation {
        role,
        column,
        rows: Vec::new(),
        grand_total: 0.0,
    }
}

/// Group rows by the column mapped to `role` and sum NAV per category.
pub fn aggregate(table: &Table, mapping: &ColumnMapping, role: Role) -> Aggregation {
    let column = mapping.get(role).map(str::to_string);
    let (Some(nav_idx), Some(cat_idx)) = (mapping.index_in(table, Role::Nav), mapping.index_in(table, role))
    else {
        debug!("aggregate by {}: role or nav unmapped", role);
        return empty_aggregation(role, column);
    };
    let (rows, grand_total) = bucket_rows(table, nav_idx, |row| row.get(cat_idx).and_then(Cell::category));
    Aggregation {
        role,
        column,
        rows,
        grand_total,
    }
}

/// Split NAV into domestic vs international exposure by geography.
pub fn domestic_split(table: &Table, mapping: &ColumnMapping, aliases: &[String]) -> Aggregation {
    let column = mapping.get(Role::Geography).map(str::to_string);
    let (Some(nav_idx), Some(geo_idx)) = (
        mapping.index_in(table, Role::Nav),
        mapping.index_in(table, Role::Geography),
    ) else {
        return empty_aggregation(Role::Geography, column);
    };
    let aliases: Vec<String> = aliases.iter().map(|a| a.trim().to_lowercase()).collect();
    let (rows, grand_total) = bucket_rows(table, nav_idx, |row| {
        let geo = row
            .get(geo_idx)
            .map(|c| c.to_string().trim().to_lowercase())
            .unwrap_or_default();
        let bucket = if aliases.contains(&geo) { DOMESTIC } else { INTERNATIONAL };
        Some(bucket.to_string())
    });
    Aggregation {
        role: Role::Geography,
        column,
        rows,
        grand_total,
    }
}

impl Aggregation {
    /// Grand-total line over the categorized rows.
    pub fn totals(&self) -> AggregationRow {
        let nav: f64 = self.rows.iter().map(|r| r.nav).sum();
        let count: usize = self.rows.iter().map(|r| r.count).sum();
        AggregationRow {
            category: "Total".to_string(),
            nav,
            count,
            average: safe_div(nav, count as f64),
            percent: safe_div(nav, self.grand_total) * 100.0,
        }
    }

    pub fn display_rows(&self) -> Vec<AggregationDisplayRow> {
        self.rows
            .iter()
            .map(|r| AggregationDisplayRow {
                category: r.category.clone(),
                nav: format_number(r.nav, 2),
                count: format_int(r.count),
                average: format_number(r.average, 2),
                percent: format_number(r.percent, 2),
            })
            .collect()
    }
}

/// Herfindahl-Hirschman index of the category shares, 0..=10000.
pub fn concentration_index(aggregation: &Aggregation) -> f64 {
    let total: f64 = aggregation.rows.iter().map(|r| r.nav).sum();
    if total == 0.0 {
        return 0.0;
    }
    let hhi: f64 = aggregation
        .rows
        .iter()
        .map(|r| {
            let share = r.nav / total;
            share * share
        })
        .sum::<f64>()
        * 10_000.0;
    if hhi.is_finite() {
        hhi
    } else {
        0.0
    }
}

pub fn kpis(table: &Table, mapping: &ColumnMapping) -> Kpis {
    let Some(nav_idx) = mapping.index_in(table, Role::Nav) else {
        return Kpis {
            total_nav: 0.0,
            investments: 0,
            average_nav: 0.0,
        };
    };
    let values: Vec<f64> = table.column_cells(nav_idx).filter_map(Cell::as_f64).collect();
    let total_nav: f64 = values.iter().sum();
    Kpis {
        total_nav,
        investments: values.len(),
        average_nav: safe_div(total_nav, values.len() as f64),
    }
}

/// Breakdowns for every mapped categorical role, in dashboard tab order.
pub fn breakdowns(table: &Table, mapping: &ColumnMapping) -> Vec<Aggregation> {
    [Role::Geography, Role::Strategy, Role::Characteristic, Role::Currency, Role::Manager]
        .into_iter()
        .filter(|r| mapping.get(*r).is_some())
        .map(|r| aggregate(table, mapping, r))
        .collect()
}

pub fn generate_summary(source: &str, table: &Table, mapping: &ColumnMapping) -> SummaryStats {
    let breakdowns = breakdowns(table, mapping);
    let concentration = breakdowns
        .iter()
        .map(|a| (a.role, concentration_index(a)))
        .collect();
    SummaryStats {
        source: source.to_string(),
        mapping: mapping.clone(),
        kpis: kpis(table, mapping),
        concentration,
        breakdowns,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Cell {
        Cell::Text(s.to_string())
    }

    fn portfolio() -> (Table, ColumnMapping) {
        let table = Table::new(
            vec!["Fund".into(), "NAV".into(), "Geo".into(), "Strategy".into()],
            vec![
                vec![text("A"), Cell::Number(100.0), text("Israel"), text("PE")],
                vec![text("B"), Cell::Number(300.0), text("US"), text("VC")],
                vec![text("C"), text("n/a"), text("US"), text("PE")],
                vec![text("D"), Cell::Number(200.0), text("UK"), text("PE")],
            ],
        );
        let mut mapping = ColumnMapping::default();
        mapping.set(Role::FundName, "Fund");
        mapping.set(Role::Nav, "NAV");
        mapping.set(Role::Geography, "Geo");
        mapping.set(Role::Strategy, "Strategy");
        (table, mapping)
    }

    #[test]
    fn test_aggregate_two_funds_by_geography() {
        let table = Table::new(
            vec!["fund".into(), "nav".into(), "geo".into()],
            vec![
                vec![text("A"), Cell::Number(100.0), text("Israel")],
                vec![text("B"), Cell::Number(300.0), text("US")],
            ],
        );
        let mut mapping = ColumnMapping::default();
        mapping.set(Role::Nav, "nav");
        mapping.set(Role::Geography, "geo");

        let agg = aggregate(&table, &mapping, Role::Geography);
        assert_eq!(
            agg.rows,
            vec![
                AggregationRow {
                    category: "US".into(),
                    nav: 300.0,
                    count: 1,
                    average: 300.0,
                    percent: 75.0
                },
                AggregationRow {
                    category: "Israel".into(),
                    nav: 100.0,
                    count: 1,
                    average: 100.0,
                    percent: 25.0
                },
            ]
        );
    }

    #[test]
    fn test_invalid_nav_excluded_from_sum_and_count() {
        let (table, mapping) = portfolio();
        let agg = aggregate(&table, &mapping, Role::Geography);
        let us = agg.rows.iter().find(|r| r.category == "US").unwrap();
        assert_eq!(us.count, 1);
        assert_eq!(us.nav, 300.0);

        let k = kpis(&table, &mapping);
        assert_eq!(k.total_nav, 600.0);
        assert_eq!(k.investments, 3);
        assert_eq!(k.average_nav, 200.0);
    }

    #[test]
    fn test_percentages_sum_to_one_hundred() {
        let (table, mapping) = portfolio();
        for role in [Role::Geography, Role::Strategy] {
            let agg = aggregate(&table, &mapping, role);
            let total: f64 = agg.rows.iter().map(|r| r.percent).sum();
            assert!((total - 100.0).abs() < 1e-6, "{} sums to {}", role, total);
        }
    }

    #[test]
    fn test_missing_category_rows_are_dropped_from_buckets() {
        let (mut table, mapping) = portfolio();
        table.rows.push(vec![text("E"), Cell::Number(400.0), Cell::Empty, text("PE")]);
        let agg = aggregate(&table, &mapping, Role::Geography);
        assert_eq!(agg.grand_total, 1000.0);
        assert_eq!(agg.rows.iter().map(|r| r.count).sum::<usize>(), 3);
        let total: f64 = agg.rows.iter().map(|r| r.percent).sum();
        assert!((total - 60.0).abs() < 1e-6);
    }

    #[test]
    fn test_empty_table_is_safe() {
        let (table, mapping) = portfolio();
        let empty = table.select_rows(|_| false);
        let agg = aggregate(&empty, &mapping, Role::Geography);
        assert!(agg.rows.is_empty());
        let totals = agg.totals();
        assert_eq!((totals.nav, totals.count, totals.average, totals.percent), (0.0, 0, 0.0, 0.0));
        assert_eq!(concentration_index(&agg), 0.0);
        let k = kpis(&empty, &mapping);
        assert_eq!((k.total_nav, k.investments, k.average_nav), (0.0, 0, 0.0));
    }

    #[test]
    fn test_filter_all_returns_identical_table() {
        let (table, mapping) = portfolio();
        let mut selections = Selections::new();
        for role in [Role::Geography, Role::Strategy, Role::Characteristic] {
            selections.insert(role, vec![ALL.to_string()]);
        }
        assert_eq!(filter(&table, &mapping, &selections), table);
    }

    #[test]
    fn test_filter_and_across_roles_or_within() {
        let (table, mapping) = portfolio();
        let mut selections = Selections::new();
        selections.insert(Role::Geography, vec!["US".into(), "UK".into()]);
        selections.insert(Role::Strategy, vec!["PE".into()]);
        let out = filter(&table, &mapping, &selections);
        let funds: Vec<String> = out.rows.iter().map(|r| r[0].to_string()).collect();
        assert_eq!(funds, vec!["C", "D"]);
        // input untouched
        assert_eq!(table.len(), 4);
    }

    #[test]
    fn test_apply_filters_falls_back_when_nothing_matches() {
        let (table, mapping) = portfolio();
        let mut selections = Selections::new();
        selections.insert(Role::Geography, vec!["Japan".into()]);
        let (out, notice) = apply_filters(&table, &mapping, &selections);
        assert_eq!(out, table);
        assert_eq!(notice, Some(Notice::EmptyFilterResult));
    }

    #[test]
    fn test_filter_options_start_with_all() {
        let (table, _) = portfolio();
        assert_eq!(filter_options(&table, "Geo"), vec!["All", "Israel", "UK", "US"]);
        assert_eq!(filter_options(&table, "Nope"), vec!["All"]);
    }

    #[test]
    fn test_concentration_index_bounds() {
        let (table, mapping) = portfolio();
        let single = table.select_rows(|r| r[2] == text("US"));
        assert_eq!(concentration_index(&aggregate(&single, &mapping, Role::Geography)), 10_000.0);

        let two = Table::new(
            table.columns.clone(),
            vec![
                vec![text("A"), Cell::Number(50.0), text("US"), text("PE")],
                vec![text("B"), Cell::Number(50.0), text("UK"), text("PE")],
            ],
        );
        let hhi = concentration_index(&aggregate(&two, &mapping, Role::Geography));
        assert!((hhi - 5000.0).abs() < 1e-9);
    }

    #[test]
    fn test_domestic_split() {
        let (table, mapping) = portfolio();
        let aliases = vec!["israel".to_string(), "il".to_string()];
        let agg = domestic_split(&table, &mapping, &aliases);
        assert_eq!(agg.rows[0].category, INTERNATIONAL);
        assert_eq!(agg.rows[0].nav, 500.0);
        assert_eq!(agg.rows[1].category, DOMESTIC);
        assert_eq!(agg.rows[1].nav, 100.0);
    }

    #[test]
    fn test_summary_covers_mapped_roles() {
        let (table, mapping) = portfolio();
        let summary = generate_summary("book.xlsx", &table, &mapping);
        let roles: Vec<Role> = summary.breakdowns.iter().map(|a| a.role).collect();
        assert_eq!(roles, vec![Role::Geography, Role::Strategy]);
        assert!(summary.concentration.contains_key(&Role::Strategy));
        let json = serde_json::to_string(&summary).unwrap();
        assert!(json.contains("\"geography\""));
    }
}
