use fund_dashboard::loader::{default_label, load_many, load_table};
use fund_dashboard::output::table_to_csv_bytes;
use fund_dashboard::periods::{merge_periods, period_trend};
use fund_dashboard::reports::{aggregate, apply_filters, concentration_index, kpis, Selections};
use fund_dashboard::{Notice, Resolver, Role};
use std::io::Write;

fn write_csv(dir: &tempfile::TempDir, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    let mut f = std::fs::File::create(&path).unwrap();
    f.write_all(contents.as_bytes()).unwrap();
    path
}

#[test]
fn test_hebrew_export_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_csv(
        &dir,
        "holdings.csv",
        "שם קרן השקעה,\"שווי הוגן (באלפי ש\"\"ח)\",מדינה לפי חשיפה כלכלית,אסטרטגיה,מאפיין עיקרי\n\
         Alpha,100,ישראל,PE,Buyout\n\
         Beta,300,US,VC,Growth\n\
         Gamma,bad,US,PE,Growth\n",
    );
    let (table, _) = load_table(&path).unwrap();
    let resolution = Resolver::default().resolve(&table);
    assert!(resolution.notices.is_empty());
    let mapping = &resolution.mapping;
    assert_eq!(mapping.get(Role::Nav), Some("NAV (ILS)"));

    let agg = aggregate(&table, mapping, Role::Geography);
    let rows: Vec<(&str, f64, usize, f64, f64)> = agg
        .rows
        .iter()
        .map(|r| (r.category.as_str(), r.nav, r.count, r.average, r.percent))
        .collect();
    assert_eq!(rows, vec![("US", 300.0, 1, 300.0, 75.0), ("ישראל", 100.0, 1, 100.0, 25.0)]);
    assert!((concentration_index(&agg) - 6250.0).abs() < 1e-9);

    let mut selections = Selections::new();
    selections.insert(Role::Strategy, vec!["PE".to_string()]);
    let (filtered, notice) = apply_filters(&table, mapping, &selections);
    assert!(notice.is_none());
    assert_eq!(filtered.len(), 2);
    assert_eq!(kpis(&filtered, mapping).total_nav, 100.0);

    let csv = table_to_csv_bytes(&filtered).unwrap();
    let text = String::from_utf8(csv[3..].to_vec()).unwrap();
    assert!(text.starts_with("Investment Name,NAV (ILS),Geography,Strategy,Main Characteristic\n"));
}

#[test]
fn test_quarterly_comparison_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let q2 = write_csv(&dir, "Q2 2024.csv", "NAV (ILS),Geography,Notes\n200,US,a\n50,Israel,b\n");
    let q1 = write_csv(&dir, "Q1 2024.csv", "NAV (ILS),Geography\n100,US\n");
    let broken = dir.path().join("missing.xlsx");

    let paths = [q2.clone(), broken, q1.clone()];
    let (loaded, notices) = load_many(&paths);
    assert_eq!(notices.len(), 1);
    assert!(matches!(notices[0], Notice::LoadFailed { .. }));
    assert_eq!(loaded.iter().map(|(idx, _)| *idx).collect::<Vec<_>>(), vec![0, 2]);

    let (labels, tables): (Vec<String>, Vec<_>) = loaded
        .into_iter()
        .map(|(idx, t)| (default_label(&paths[idx]), t))
        .unzip();
    assert_eq!(labels, vec!["Q2 2024", "Q1 2024"]);
    let merged = merge_periods(&tables, &labels).unwrap();
    assert_eq!(merged.order, vec!["Q1 2024", "Q2 2024"]);
    assert_eq!(merged.table.columns, vec!["NAV (ILS)", "Geography", "Period"]);

    let mapping = Resolver::default().resolve(&merged.table).mapping;
    let trend = period_trend(&merged, &mapping, Role::Geography);
    assert_eq!(trend.len(), 3);
    assert_eq!(trend[0].period, "Q1 2024");
    assert_eq!(trend[0].nav, 100.0);
    assert_eq!(trend[1].category, "US");
    assert_eq!(trend[1].nav, 200.0);
}
