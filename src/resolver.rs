//! Column resolution: maps inconsistently named spreadsheet headers (English
//! or Hebrew, any casing) onto the logical roles the dashboard aggregates on.
//!
//! Resolution runs in passes so that a strong match for one role is never
//! stolen by a weak match for another:
//!
//! 1. configured preferred names, then the role's synonym set (exact,
//!    case-insensitive);
//! 2. keyword fragments (substring), first column in column order wins;
//! 3. for NAV only, the numeric column with the largest mean above the money
//!    threshold;
//! 4. required roles still unmapped get the first unclaimed column and a
//!    [`Notice::MappingAmbiguous`] so the caller can offer an override.

use crate::error::{DashboardError, Result};
use crate::types::{Cell, ColumnMapping, Notice, Role, Table};
use crate::util::normalize_header;
use log::{debug, warn};
use once_cell::sync::Lazy;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

/// Raw header variants renamed to a canonical display name at load time.
static CANONICAL_HEADERS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("investment name", "Investment Name"),
        ("שם קרן השקעה", "Investment Name"),
        ("geography", "Geography"),
        ("מדינה לפי חשיפה כלכלית", "Geography"),
        ("strategy", "Strategy"),
        ("אסטרטגיה", "Strategy"),
        ("nav (ils)", "NAV (ILS)"),
        ("שווי הוגן (באלפי ש\"ח)", "NAV (ILS)"),
        ("שווי הוגן (באלפי ש''ח)", "NAV (ILS)"),
        ("nav (במטבע הדיווח של קרן ההשקעה)", "NAV (OC)"),
        ("מאפיין עיקרי", "Main Characteristic"),
        ("characteristic", "Main Characteristic"),
        ("feature", "Main Characteristic"),
    ])
});

/// Order in which roles compete for columns in the keyword pass. The most
/// generic fragments ("name") go last.
const KEYWORD_PASS_ORDER: [Role; 8] = [
    Role::Nav,
    Role::Geography,
    Role::Strategy,
    Role::Characteristic,
    Role::Currency,
    Role::Year,
    Role::Manager,
    Role::FundName,
];

/// Declarative matching rule for one role.
#[derive(Debug, Clone)]
pub struct RoleRule {
    pub role: Role,
    pub synonyms: Vec<String>,
    pub keywords: Vec<String>,
    pub numeric: bool,
}

impl RoleRule {
    fn new(role: Role, synonyms: &[&str], keywords: &[&str], numeric: bool) -> Self {
        RoleRule {
            role,
            synonyms: synonyms.iter().map(|s| normalize_header(s)).collect(),
            keywords: keywords.iter().map(|s| normalize_header(s)).collect(),
            numeric,
        }
    }
}

pub fn default_rules() -> Vec<RoleRule> {
    vec![
        RoleRule::new(
            Role::FundName,
            &["investment name", "fund name", "שם קרן השקעה", "שם הקרן"],
            &["investment name", "fund", "שם קרן", "name", "שם"],
            false,
        ),
        RoleRule::new(
            Role::Nav,
            &[
                "nav (ils)",
                "nav",
                "net asset value",
                "שווי הוגן (באלפי ש\"ח)",
                "שווי הוגן (באלפי ש''ח)",
            ],
            &["nav", "net asset", "fair value", "שווי", "value", "amount", "סכום"],
            true,
        ),
        RoleRule::new(
            Role::Geography,
            &["geography", "מדינה לפי חשיפה כלכלית", "country"],
            &["geograph", "country", "region", "מדינה", "אזור"],
            false,
        ),
        RoleRule::new(
            Role::Strategy,
            &["strategy", "אסטרטגיה"],
            &["strateg", "אסטרטג", "asset class"],
            false,
        ),
        RoleRule::new(
            Role::Characteristic,
            &["main characteristic", "מאפיין עיקרי", "characteristic", "feature"],
            &["characteristic", "feature", "מאפיין"],
            false,
        ),
        RoleRule::new(Role::Currency, &["currency", "מטבע"], &["currency", "ccy", "מטבע"], false),
        RoleRule::new(
            Role::Year,
            &["year", "vintage year", "שנה"],
            &["year", "vintage", "שנת", "שנה"],
            false,
        ),
        RoleRule::new(
            Role::Manager,
            &["manager", "fund manager", "מנהל"],
            &["manager", "general partner", "מנהל"],
            false,
        ),
    ]
}

fn default_money_threshold() -> f64 {
    1000.0
}

fn default_numeric_min_ratio() -> f64 {
    0.5
}

fn default_domestic_aliases() -> Vec<String> {
    vec!["israel".to_string(), "ישראל".to_string(), "il".to_string()]
}

/// User-tunable resolver settings, loadable from a JSON file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Exact header names tried before the built-in synonyms.
    pub preferred: BTreeMap<Role, Vec<String>>,
    /// Extra keyword fragments appended to the built-in ones.
    pub extra_keywords: BTreeMap<Role, Vec<String>>,
    /// Mean value a numeric column must exceed to be guessed as NAV.
    #[serde(default = "default_money_threshold")]
    pub money_threshold: f64,
    /// Share of non-empty cells that must coerce to numbers for a NAV column.
    #[serde(default = "default_numeric_min_ratio")]
    pub numeric_min_ratio: f64,
    /// Geography values counted as domestic in the domestic/international split.
    #[serde(default = "default_domestic_aliases")]
    pub domestic_aliases: Vec<String>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        ResolverConfig {
            preferred: BTreeMap::new(),
            extra_keywords: BTreeMap::new(),
            money_threshold: default_money_threshold(),
            numeric_min_ratio: default_numeric_min_ratio(),
            domestic_aliases: default_domestic_aliases(),
        }
    }
}

impl ResolverConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Trim headers, name blank ones, rename known variants to their canonical
/// display names and make every name unique.
pub fn prepare_headers(raw: &[Option<String>]) -> Vec<String> {
    let named: Vec<String> = raw
        .iter()
        .enumerate()
        .map(|(idx, h)| {
            let trimmed = h.as_deref().map(str::trim).unwrap_or("");
            if trimmed.is_empty() {
                format!("Unnamed: {}", idx)
            } else {
                canonical_header(trimmed)
            }
        })
        .collect();
    ensure_unique_columns(&named)
}

pub fn canonical_header(header: &str) -> String {
    CANONICAL_HEADERS
        .get(normalize_header(header).as_str())
        .map(|s| s.to_string())
        .unwrap_or_else(|| header.trim().to_string())
}

/// Suffix repeated names (compared case-insensitively) with `_1`, `_2`, ...
/// so every physical column is independently addressable.
pub fn ensure_unique_columns(columns: &[String]) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut taken: HashSet<String> = columns.iter().map(|c| normalize_header(c)).collect();
    let mut out = Vec::with_capacity(columns.len());
    for col in columns {
        let key = normalize_header(col);
        match seen.get_mut(&key) {
            None => {
                seen.insert(key, 0);
                out.push(col.clone());
            }
            Some(count) => {
                let candidate = loop {
                    *count += 1;
                    let candidate = format!("{}_{}", col, count);
                    if !taken.contains(&normalize_header(&candidate)) {
                        break candidate;
                    }
                };
                taken.insert(normalize_header(&candidate));
                out.push(candidate);
            }
        }
    }
    out
}

#[derive(Debug, Clone, Copy)]
struct NumericProfile {
    non_empty: usize,
    coerced: usize,
    mean: f64,
}

fn numeric_profile<'a>(cells: impl Iterator<Item = &'a Cell>) -> NumericProfile {
    let (mut non_empty, mut coerced, mut sum) = (0usize, 0usize, 0.0f64);
    for cell in cells {
        if cell.is_empty() {
            continue;
        }
        non_empty += 1;
        if let Some(v) = cell.as_f64() {
            coerced += 1;
            sum += v;
        }
    }
    let mean = if coerced == 0 { 0.0 } else { sum / coerced as f64 };
    NumericProfile { non_empty, coerced, mean }
}

/// Outcome of resolving one table: the mapping, the notices it raised and the
/// full column list offered to override selectors.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub mapping: ColumnMapping,
    pub notices: Vec<Notice>,
    columns: Vec<String>,
}

impl Resolution {
    pub fn column_choices(&self) -> &[String] {
        &self.columns
    }

    /// Point `role` at `column`, whatever the resolver guessed. The column
    /// name is matched exactly first, then case-insensitively.
    pub fn override_role(&mut self, role: Role, column: &str) -> Result<()> {
        let actual = self
            .columns
            .iter()
            .find(|c| c.as_str() == column)
            .or_else(|| {
                let wanted = normalize_header(column);
                self.columns.iter().find(|c| normalize_header(c) == wanted)
            })
            .cloned()
            .ok_or_else(|| DashboardError::UnknownColumn(column.to_string()))?;
        debug!("override {} -> '{}'", role, actual);
        self.mapping.set(role, actual);
        self.notices
            .retain(|n| !matches!(n, Notice::MappingAmbiguous { role: r, .. } if *r == role));
        Ok(())
    }

    pub fn is_ambiguous(&self, role: Role) -> bool {
        self.notices
            .iter()
            .any(|n| matches!(n, Notice::MappingAmbiguous { role: r, .. } if *r == role))
    }
}

pub struct Resolver {
    rules: Vec<RoleRule>,
    config: ResolverConfig,
}

impl Default for Resolver {
    fn default() -> Self {
        Resolver::new(ResolverConfig::default())
    }
}

impl Resolver {
    pub fn new(config: ResolverConfig) -> Self {
        let mut rules = default_rules();
        for rule in &mut rules {
            if let Some(extra) = config.extra_keywords.get(&rule.role) {
                rule.keywords.extend(extra.iter().map(|k| normalize_header(k)));
            }
        }
        Resolver { rules, config }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    fn rule(&self, role: Role) -> Option<&RoleRule> {
        self.rules.iter().find(|r| r.role == role)
    }

    /// Resolve from headers alone; NAV numeric checks see no data.
    pub fn resolve_headers(&self, headers: &[String]) -> Resolution {
        self.resolve(&Table::new(headers.to_vec(), Vec::new()))
    }

    pub fn resolve(&self, table: &Table) -> Resolution {
        let normalized: Vec<String> = table.columns.iter().map(|c| normalize_header(c)).collect();
        let profiles: Vec<NumericProfile> = (0..table.columns.len())
            .map(|idx| numeric_profile(table.column_cells(idx)))
            .collect();
        let mut claimed: Vec<bool> = vec![false; table.columns.len()];
        let mut mapping = ColumnMapping::default();

        let numeric_ok = |idx: usize, allow_blank: bool| -> bool {
            let p = profiles[idx];
            if p.non_empty == 0 {
                return allow_blank;
            }
            p.coerced as f64 / p.non_empty as f64 >= self.config.numeric_min_ratio
        };

        // Pass 1: preferred names, then synonyms.
        for role in Role::ALL {
            let Some(rule) = self.rule(role) else { continue };
            let preferred: Vec<String> = self
                .config
                .preferred
                .get(&role)
                .map(|names| names.iter().map(|n| normalize_header(n)).collect())
                .unwrap_or_default();
            let found = preferred.iter().chain(rule.synonyms.iter()).find_map(|want| {
                (0..normalized.len()).find(|&idx| {
                    !claimed[idx] && &normalized[idx] == want && (!rule.numeric || numeric_ok(idx, true))
                })
            });
            if let Some(idx) = found {
                debug!("{} -> '{}' (exact)", role, table.columns[idx]);
                claimed[idx] = true;
                mapping.set(role, table.columns[idx].clone());
            }
        }

        // Pass 2: keyword fragments, first column wins.
        for role in KEYWORD_PASS_ORDER {
            if mapping.get(role).is_some() {
                continue;
            }
            let Some(rule) = self.rule(role) else { continue };
            let found = (0..normalized.len()).find(|&idx| {
                !claimed[idx]
                    && rule.keywords.iter().any(|k| normalized[idx].contains(k.as_str()))
                    && (!rule.numeric || numeric_ok(idx, false))
            });
            if let Some(idx) = found {
                debug!("{} -> '{}' (keyword)", role, table.columns[idx]);
                claimed[idx] = true;
                mapping.set(role, table.columns[idx].clone());
            }
        }

        // Pass 3: NAV falls back to the largest-mean money-looking column.
        if mapping.get(Role::Nav).is_none() {
            let mut best: Option<(usize, f64)> = None;
            for idx in 0..table.columns.len() {
                let p = profiles[idx];
                if claimed[idx] || p.coerced == 0 || !numeric_ok(idx, false) {
                    continue;
                }
                if p.mean <= self.config.money_threshold {
                    continue;
                }
                if best.map_or(true, |(_, m)| p.mean > m) {
                    best = Some((idx, p.mean));
                }
            }
            if let Some((idx, mean)) = best {
                debug!("nav -> '{}' (largest numeric mean {:.2})", table.columns[idx], mean);
                claimed[idx] = true;
                mapping.set(Role::Nav, table.columns[idx].clone());
            }
        }

        // Pass 4: required roles get a best-effort guess.
        let mut notices = Vec::new();
        for role in Role::ALL.into_iter().filter(Role::is_required) {
            if mapping.get(role).is_some() {
                continue;
            }
            let guess = claimed
                .iter()
                .position(|c| !c)
                .or(if table.columns.is_empty() { None } else { Some(0) });
            let chosen = guess.map(|idx| {
                claimed[idx] = true;
                table.columns[idx].clone()
            });
            if let Some(col) = &chosen {
                mapping.set(role, col.clone());
            }
            warn!("no confident column for {}; guessed {:?}", role, chosen);
            notices.push(Notice::MappingAmbiguous { role, chosen });
        }

        Resolution {
            mapping,
            notices,
            columns: table.columns.clone(),
        }
    }
}
