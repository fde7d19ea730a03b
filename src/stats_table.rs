//! Per-season team statistics joined from the ratings tables.
//!
//! Two scraped tables feed each season: a "miscellaneous rates" table
//! (shooting splits, assist and block/steal rates) and a "four factors"
//! table (tempo, adjusted efficiencies, eFG/TO/OR/FT rates). Both are
//! sequences of string-valued records keyed by `team`.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use tracing::{debug, warn};

pub type RawStatRecord = Map<String, Value>;

pub const TEAM_KEY: &str = "team";
pub const CONFERENCE_KEY: &str = "conf";

/// Columns dropped after the join: uninformative or redundant with another column.
pub const IGNORED_COLUMNS: &[&str] = &[
    "conf",
    "Stl_pct",
    "Blk_pct",
    "2P_pct",
    "eFG_pct_off",
    "eFG_pct_def",
    "FTRate_off",
    "2P_Dist",
];

#[derive(Debug, Clone, PartialEq)]
pub struct TeamSeasonStats {
    pub team: String,
    pub season: i32,
    pub conference: Option<String>,
    /// `None` marks a value that failed numeric coercion.
    pub stats: BTreeMap<String, Option<f64>>,
}

impl TeamSeasonStats {
    pub fn value(&self, column: &str) -> Option<f64> {
        self.stats.get(column).copied().flatten()
    }

    pub fn is_complete(&self) -> bool {
        self.stats.values().all(|v| v.is_some())
    }
}

#[derive(Debug, Clone, Default)]
pub struct StatsTable {
    pub season: i32,
    columns: BTreeSet<String>,
    teams: HashMap<String, TeamSeasonStats>,
}

impl StatsTable {
    pub fn get(&self, team: &str) -> Option<&TeamSeasonStats> {
        self.teams.get(team)
    }

    pub fn contains(&self, team: &str) -> bool {
        self.teams.contains_key(team)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.teams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.teams.is_empty()
    }

    pub fn team_names(&self) -> impl Iterator<Item = &str> {
        self.teams.keys().map(String::as_str)
    }
}

/// Inner-joins the two season tables on team name.
///
/// Teams missing from either table are left out. Every non-identifier column
/// is coerced to a number; failures become `None`, never zero.
pub fn build_stats_table(
    season: i32,
    misc: &[RawStatRecord],
    four_factors: &[RawStatRecord],
) -> StatsTable {
    let ff_by_team = index_by_team(season, "four factors", four_factors);

    let mut columns = BTreeSet::new();
    let mut teams = HashMap::new();
    let mut unmatched = 0usize;

    for record in misc {
        let Some(team) = team_name(record) else {
            continue;
        };
        if teams.contains_key(team) {
            warn!(season, team, "duplicate team in misc table; keeping first row");
            continue;
        }
        let Some(ff) = ff_by_team.get(team) else {
            unmatched += 1;
            continue;
        };

        let mut conference = None;
        let mut stats = BTreeMap::new();
        for (key, value) in record.iter().chain(ff.iter()) {
            if key == TEAM_KEY {
                continue;
            }
            if key == CONFERENCE_KEY {
                conference = value.as_str().map(|s| s.trim().to_string());
                continue;
            }
            if IGNORED_COLUMNS.contains(&key.as_str()) {
                continue;
            }
            stats.insert(key.clone(), coerce_numeric(value));
        }

        columns.extend(stats.keys().cloned());
        teams.insert(
            team.to_string(),
            TeamSeasonStats {
                team: team.to_string(),
                season,
                conference,
                stats,
            },
        );
    }

    debug!(
        season,
        joined = teams.len(),
        misc_only = unmatched,
        "built stats table"
    );

    StatsTable {
        season,
        columns,
        teams,
    }
}

/// Loads one raw stats table (a JSON array of records).
pub fn load_stat_records(path: &Path) -> Result<Vec<RawStatRecord>> {
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    parse_stat_records(&raw).with_context(|| format!("parse {}", path.display()))
}

pub fn parse_stat_records(raw: &str) -> Result<Vec<RawStatRecord>> {
    let value: Value = serde_json::from_str(raw).context("stats table is not valid json")?;
    let Value::Array(items) = value else {
        return Ok(Vec::new());
    };
    Ok(items
        .into_iter()
        .filter_map(|item| match item {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .collect())
}

pub fn coerce_numeric(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

fn team_name(record: &RawStatRecord) -> Option<&str> {
    record
        .get(TEAM_KEY)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn index_by_team<'a>(
    season: i32,
    label: &str,
    records: &'a [RawStatRecord],
) -> HashMap<&'a str, &'a RawStatRecord> {
    let mut out = HashMap::with_capacity(records.len());
    for record in records {
        let Some(team) = team_name(record) else {
            continue;
        };
        if out.contains_key(team) {
            warn!(season, team, table = label, "duplicate team; keeping first row");
            continue;
        }
        out.insert(team, record);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> RawStatRecord {
        match value {
            Value::Object(map) => map,
            _ => panic!("record must be an object"),
        }
    }

    #[test]
    fn inner_join_drops_one_sided_teams() {
        let misc = vec![
            record(json!({"team": "Duke", "3P_pct": "38.1", "Blk_pct": "12.0"})),
            record(json!({"team": "Kansas", "3P_pct": "35.0"})),
        ];
        let ff = vec![
            record(json!({"team": "Duke", "conf": "ACC", "adjOE": "120.5", "FTRate_off": "33"})),
            record(json!({"team": "Gonzaga", "conf": "WCC", "adjOE": "119.0"})),
        ];

        let table = build_stats_table(2019, &misc, &ff);
        assert_eq!(table.len(), 1);
        let duke = table.get("Duke").expect("duke joined");
        assert_eq!(duke.conference.as_deref(), Some("ACC"));
        assert_eq!(duke.value("adjOE"), Some(120.5));
        assert_eq!(duke.value("3P_pct"), Some(38.1));
        assert!(!duke.stats.contains_key("Blk_pct"));
        assert!(!duke.stats.contains_key("FTRate_off"));
        assert!(!duke.stats.contains_key("conf"));
        assert!(!table.contains("Kansas"));
        assert!(!table.contains("Gonzaga"));
    }

    #[test]
    fn unparseable_values_become_missing() {
        let misc = vec![record(json!({"team": "Duke", "3P_pct": "n/a", "A_pct": 55.2}))];
        let ff = vec![record(json!({"team": "Duke", "adjDE": ""}))];
        let table = build_stats_table(2019, &misc, &ff);
        let duke = table.get("Duke").expect("duke joined");
        assert_eq!(duke.stats.get("3P_pct"), Some(&None));
        assert_eq!(duke.stats.get("adjDE"), Some(&None));
        assert_eq!(duke.value("A_pct"), Some(55.2));
        assert!(!duke.is_complete());
    }

    #[test]
    fn non_array_payload_is_empty() {
        assert!(parse_stat_records("null").expect("null parses").is_empty());
    }
}
