// Entry point and high-level CLI flow.
//
// - `dashboard` loads one export, resolves its columns, applies the
//   filters and prints KPIs plus one breakdown per categorical role.
// - `compare` loads several period snapshots, merges them and prints
//   the per-period trends.
use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use fund_dashboard::loader::{default_label, load_many, load_table};
use fund_dashboard::output;
use fund_dashboard::periods::{merge_periods, period_summary, period_trend};
use fund_dashboard::reports::{self, Selections};
use fund_dashboard::util::{format_compact, format_int, format_number};
use fund_dashboard::{Notice, Resolution, Resolver, ResolverConfig, Role, Table};
use log::{info, LevelFilter};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "fund-dashboard",
    version,
    about = "Portfolio breakdowns for investment-fund spreadsheet exports",
    after_help = r#"
EXAMPLES:
  fund-dashboard dashboard holdings.xlsx --geography Israel --geography US
  fund-dashboard dashboard holdings.xlsx --map nav="Fair value" --export filtered.csv
  fund-dashboard compare q1.xlsx q2.xlsx --label "Q1 2024" --label "Q2 2024"
"#
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log resolver and loader decisions
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Analyse a single portfolio export
    Dashboard(DashboardArgs),
    /// Compare two or more period snapshots
    Compare(CompareArgs),
}

#[derive(Args, Debug)]
struct MappingArgs {
    /// Force a role onto a column, e.g. `--map geography=Country`
    #[arg(long = "map", value_name = "ROLE=COLUMN", value_parser = parse_override)]
    overrides: Vec<(Role, String)>,

    /// JSON file with resolver settings (preferred names, keywords, thresholds)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct DashboardArgs {
    file: PathBuf,

    #[arg(long)]
    geography: Vec<String>,

    #[arg(long)]
    strategy: Vec<String>,

    #[arg(long)]
    characteristic: Vec<String>,

    #[command(flatten)]
    mapping: MappingArgs,

    /// Write the filtered table as CSV
    #[arg(long)]
    export: Option<PathBuf>,

    /// Write KPIs and breakdowns as JSON
    #[arg(long)]
    summary: Option<PathBuf>,

    /// Rows shown per preview table
    #[arg(long, default_value_t = 10)]
    rows: usize,
}

#[derive(Args, Debug)]
struct CompareArgs {
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Period label per file, in file order; defaults to the file name
    #[arg(long = "label")]
    labels: Vec<String>,

    #[command(flatten)]
    mapping: MappingArgs,

    /// Write the merged table as CSV
    #[arg(long)]
    export: Option<PathBuf>,

    /// Write per-period totals as CSV
    #[arg(long)]
    summary: Option<PathBuf>,
}

fn parse_override(s: &str) -> Result<(Role, String), String> {
    let (role, column) = s
        .split_once('=')
        .ok_or_else(|| format!("expected ROLE=COLUMN, got '{}'", s))?;
    let role = role.parse::<Role>().map_err(|e| e.to_string())?;
    Ok((role, column.trim().to_string()))
}

fn configure_logging(verbose: bool) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    if verbose {
        builder.filter_level(LevelFilter::Debug);
    }
    builder.init();
}

fn print_notice(notice: &Notice) {
    println!("Warning: {}", notice);
}

fn resolver_for(args: &MappingArgs) -> anyhow::Result<Resolver> {
    let config = match &args.config {
        Some(path) => ResolverConfig::from_json_file(path)
            .with_context(|| format!("reading resolver config {}", path.display()))?,
        None => ResolverConfig::default(),
    };
    Ok(Resolver::new(config))
}

/// Resolve, apply manual overrides and report what was picked.
fn resolve_columns(resolver: &Resolver, table: &Table, args: &MappingArgs) -> anyhow::Result<Resolution> {
    let mut resolution = resolver.resolve(table);
    for (role, column) in &args.overrides {
        resolution
            .override_role(*role, column)
            .with_context(|| format!("--map {}={}", role, column))?;
    }
    println!("Column mapping:");
    for (role, column) in resolution.mapping.iter() {
        println!("  {:<15} -> {}", role.label(), column);
    }
    println!();
    for n in &resolution.notices {
        print_notice(n);
        println!("  Available columns: {}", resolution.column_choices().join(", "));
    }
    Ok(resolution)
}

fn handle_dashboard(args: &DashboardArgs) -> anyhow::Result<()> {
    let resolver = resolver_for(&args.mapping)?;
    let (table, load_report) = match load_table(&args.file) {
        Ok(loaded) => loaded,
        Err(e) => {
            print_notice(&Notice::LoadFailed {
                file: args.file.display().to_string(),
                reason: e.to_string(),
            });
            return Ok(());
        }
    };
    println!(
        "Processing {}... ({} rows loaded, {} kept, {} empty columns dropped)\n",
        args.file.display(),
        format_int(load_report.total_rows),
        format_int(load_report.kept_rows),
        load_report.dropped_columns
    );

    let resolution = resolve_columns(&resolver, &table, &args.mapping)?;
    let mapping = &resolution.mapping;

    let mut selections = Selections::new();
    selections.insert(Role::Geography, args.geography.clone());
    selections.insert(Role::Strategy, args.strategy.clone());
    selections.insert(Role::Characteristic, args.characteristic.clone());
    let (filtered, notice) = reports::apply_filters(&table, mapping, &selections);
    if let Some(n) = notice {
        print_notice(&n);
    }
    for role in [Role::Geography, Role::Strategy, Role::Characteristic] {
        if let Some(col) = mapping.get(role) {
            info!("{} options: {:?}", role, reports::filter_options(&table, col));
        }
    }

    let k = reports::kpis(&filtered, mapping);
    println!("Total NAV:               {} ILS", format_compact(k.total_nav));
    println!("Total Investments:       {}", format_int(k.investments));
    println!("Average Investment Size: {} ILS\n", format_compact(k.average_nav));

    for agg in reports::breakdowns(&filtered, mapping) {
        let title = format!("NAV Distribution by {}", agg.role.label());
        let note = format!(
            "HHI {}",
            format_number(reports::concentration_index(&agg), 0)
        );
        output::preview_section(&title, Some(&note), &agg.display_rows(), args.rows);
    }

    let split = reports::domestic_split(&table, mapping, &resolver.config().domestic_aliases);
    output::preview_section(
        "Israel vs International Exposure",
        Some("all rows, before filters"),
        &split.display_rows(),
        args.rows,
    );

    println!("Detailed Investment Data");
    output::preview_detail(&filtered, args.rows);

    if let Some(path) = &args.export {
        output::write_table_csv(path, &filtered)
            .with_context(|| format!("writing {}", path.display()))?;
        println!("(Filtered table exported to {})", path.display());
    }
    if let Some(path) = &args.summary {
        let summary = reports::generate_summary(&args.file.display().to_string(), &filtered, mapping);
        output::write_json(path, &summary).with_context(|| format!("writing {}", path.display()))?;
        println!("(Summary written to {})", path.display());
    }
    Ok(())
}

fn handle_compare(args: &CompareArgs) -> anyhow::Result<()> {
    let resolver = resolver_for(&args.mapping)?;
    if args.labels.len() > args.files.len() {
        println!(
            "Warning: {} labels given for {} files; extra labels ignored",
            args.labels.len(),
            args.files.len()
        );
    }

    let (loaded, notices) = load_many(&args.files);
    for n in &notices {
        print_notice(n);
    }
    let (labels, tables): (Vec<String>, Vec<Table>) = loaded
        .into_iter()
        .map(|(idx, table)| {
            let label = args
                .labels
                .get(idx)
                .cloned()
                .unwrap_or_else(|| default_label(&args.files[idx]));
            (label, table)
        })
        .unzip();
    if tables.len() < 2 {
        print_notice(&Notice::ComparisonSkipped {
            valid_tables: tables.len(),
        });
        return Ok(());
    }

    let merged = merge_periods(&tables, &labels)?;
    println!(
        "Merged {} periods ({} rows): {}\n",
        merged.order.len(),
        format_int(merged.table.len()),
        merged.order.join(" -> ")
    );
    let resolution = resolve_columns(&resolver, &merged.table, &args.mapping)?;
    let mapping = &resolution.mapping;

    let totals = period_summary(&merged, mapping);
    output::preview_section("Portfolio Totals by Period", None, &totals, totals.len());
    for role in [Role::Geography, Role::Strategy] {
        if mapping.get(role).is_none() {
            continue;
        }
        let trend = period_trend(&merged, mapping, role);
        let title = format!("Exposure Change by {}", role.label());
        output::preview_section(&title, None, &trend, trend.len());
    }

    if let Some(path) = &args.export {
        output::write_table_csv(path, &merged.table)
            .with_context(|| format!("writing {}", path.display()))?;
        println!("(Combined table exported to {})", path.display());
    }
    if let Some(path) = &args.summary {
        output::write_csv(path, &totals).with_context(|| format!("writing {}", path.display()))?;
        println!("(Period totals exported to {})", path.display());
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    configure_logging(cli.verbose);
    match &cli.command {
        Command::Dashboard(args) => handle_dashboard(args),
        Command::Compare(args) => handle_compare(args),
    }
}
