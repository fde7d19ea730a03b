//! Matchup-level feature rows for upset-eligible games.
//!
//! Every stat is oriented lower seed minus higher seed, so a positive
//! `delta_adjOE` means the underdog has the better offense.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::debug;

use crate::config::PipelineConfig;
use crate::matchup::Matchup;
use crate::stats_table::StatsTable;

/// Columns kept as separate `_hi`/`_lo` values instead of a delta.
pub const NO_DELTA_COLUMNS: &[&str] = &["3PA_pct", "3P_pct"];
pub const SEED_DIFF: &str = "seed_diff";
pub const DELTA_PREFIX: &str = "delta_";

/// Which matchups the model is trained on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EligibilityFilter {
    /// Strict lower bound on `lower_seed - higher_seed`.
    pub gap_above: u8,
    /// Round-of ordinal at or above which games qualify.
    pub min_round: u32,
}

impl EligibilityFilter {
    pub fn from_config(cfg: &PipelineConfig) -> Self {
        Self {
            gap_above: cfg.eligible_gap_above,
            min_round: cfg.eligible_min_round,
        }
    }

    pub fn admits(&self, m: &Matchup) -> bool {
        m.seed_gap() > self.gap_above && m.round >= self.min_round
    }
}

impl Default for EligibilityFilter {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureRow {
    pub hi_team: String,
    pub lo_team: String,
    pub year: i32,
    pub hi_seed: u8,
    pub lo_seed: u8,
    /// 1 when the lower seed won.
    pub upset: u8,
    /// Model inputs keyed by column name; `seed_diff` included.
    pub features: BTreeMap<String, f64>,
}

impl FeatureRow {
    pub fn value(&self, column: &str) -> Option<f64> {
        self.features.get(column).copied()
    }

    pub fn seed_diff(&self) -> u8 {
        self.lo_seed.saturating_sub(self.hi_seed)
    }

    pub fn is_upset(&self) -> bool {
        self.upset == 1
    }

    pub fn is_finite(&self) -> bool {
        self.features.values().all(|v| v.is_finite())
    }
}

/// Builds one row per eligible, played matchup whose teams both have complete stats.
///
/// Rows are never imputed: a team absent from `table`, or with any missing stat,
/// drops the game.
pub fn build_feature_rows(
    table: &StatsTable,
    matchups: &[Matchup],
    filter: EligibilityFilter,
) -> Vec<FeatureRow> {
    let mut rows = Vec::new();
    let mut missing_team = 0usize;
    let mut incomplete = 0usize;
    let mut unplayed = 0usize;

    for m in matchups.iter().filter(|m| filter.admits(m)) {
        if m.winning_team.is_none() {
            unplayed += 1;
            continue;
        }
        let (Some(hi), Some(lo)) = (
            table.get(&m.higher_seed_team),
            table.get(&m.lower_seed_team),
        ) else {
            missing_team += 1;
            continue;
        };

        let mut features = BTreeMap::new();
        let mut complete = true;
        for (column, hi_value) in &hi.stats {
            let Some(lo_value) = lo.stats.get(column) else {
                continue;
            };
            let (Some(hi_value), Some(lo_value)) = (*hi_value, *lo_value) else {
                complete = false;
                break;
            };
            if NO_DELTA_COLUMNS.contains(&column.as_str()) {
                features.insert(format!("{column}_hi"), hi_value);
                features.insert(format!("{column}_lo"), lo_value);
            } else {
                features.insert(format!("{DELTA_PREFIX}{column}"), lo_value - hi_value);
            }
        }
        if !complete {
            incomplete += 1;
            continue;
        }

        features.insert(SEED_DIFF.to_string(), f64::from(m.seed_gap()));
        rows.push(FeatureRow {
            hi_team: m.higher_seed_team.clone(),
            lo_team: m.lower_seed_team.clone(),
            year: m.year,
            hi_seed: m.higher_seed,
            lo_seed: m.lower_seed,
            upset: u8::from(m.lower_seed_won()),
            features,
        });
    }

    debug!(
        season = table.season,
        rows = rows.len(),
        missing_team,
        incomplete,
        unplayed,
        "built feature rows"
    );
    rows
}

/// Union of feature columns across rows, sorted.
pub fn feature_columns(rows: &[FeatureRow]) -> BTreeSet<String> {
    rows.iter()
        .flat_map(|r| r.features.keys().cloned())
        .collect()
}

/// Writes rows as CSV: metadata columns, label, then every feature column (blank if absent).
pub fn write_feature_csv(path: &Path, rows: &[FeatureRow]) -> Result<()> {
    let file = File::create(path).with_context(|| format!("create {}", path.display()))?;
    let mut writer = csv::Writer::from_writer(file);
    let columns = feature_columns(rows);

    let mut header = vec!["hiTeam", "loTeam", "year", "hiSeed", "loSeed", "upset"];
    header.extend(columns.iter().map(String::as_str));
    writer.write_record(&header).context("write feature header")?;

    for row in rows {
        let mut record = vec![
            row.hi_team.clone(),
            row.lo_team.clone(),
            row.year.to_string(),
            row.hi_seed.to_string(),
            row.lo_seed.to_string(),
            row.upset.to_string(),
        ];
        record.extend(
            columns
                .iter()
                .map(|c| row.value(c).map(|v| v.to_string()).unwrap_or_default()),
        );
        writer.write_record(&record).context("write feature row")?;
    }
    writer.flush().context("flush feature csv")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matchup::Participant;
    use crate::stats_table::{RawStatRecord, build_stats_table};
    use serde_json::json;

    fn records(values: Vec<serde_json::Value>) -> Vec<RawStatRecord> {
        values
            .into_iter()
            .filter_map(|v| v.as_object().cloned())
            .collect()
    }

    fn table() -> StatsTable {
        let misc = records(vec![
            json!({"team": "Kentucky", "3P_pct": "36.0", "3PA_pct": "30.0", "A_pct": "50.0"}),
            json!({"team": "Saint Peter's", "3P_pct": "33.0", "3PA_pct": "38.0", "A_pct": "55.0"}),
            json!({"team": "Murray St.", "3P_pct": "", "3PA_pct": "35.0", "A_pct": "52.0"}),
        ]);
        let ff = records(vec![
            json!({"team": "Kentucky", "adjOE": "121.0", "adjDE": "92.0"}),
            json!({"team": "Saint Peter's", "adjOE": "101.5", "adjDE": "95.0"}),
            json!({"team": "Murray St.", "adjOE": "110.0", "adjDE": "96.0"}),
        ]);
        build_stats_table(2022, &misc, &ff)
    }

    fn game(hi: (&str, u8, u32), lo: (&str, u8, u32), round: u32) -> Matchup {
        Matchup::from_participants(
            2022,
            round,
            Participant {
                team: hi.0.to_string(),
                seed: hi.1,
                score: Some(hi.2),
            },
            Participant {
                team: lo.0.to_string(),
                seed: lo.1,
                score: Some(lo.2),
            },
        )
        .expect("distinct seeds")
    }

    #[test]
    fn deltas_are_lower_minus_higher() {
        let games = vec![game(("Kentucky", 2, 79), ("Saint Peter's", 15, 85), 64)];
        let rows = build_feature_rows(&table(), &games, EligibilityFilter::default());
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.value("delta_adjOE"), Some(101.5 - 121.0));
        assert_eq!(row.value("delta_adjDE"), Some(95.0 - 92.0));
        assert_eq!(row.value("delta_A_pct"), Some(5.0));
        assert_eq!(row.value("3P_pct_hi"), Some(36.0));
        assert_eq!(row.value("3P_pct_lo"), Some(33.0));
        assert_eq!(row.value("3PA_pct_lo"), Some(38.0));
        assert_eq!(row.value("delta_3P_pct"), None);
        assert_eq!(row.value(SEED_DIFF), Some(13.0));
        assert_eq!(row.upset, 1);
        assert_eq!(row.hi_team, "Kentucky");
    }

    #[test]
    fn eligibility_is_gap_above_four_and_round_of_32_or_earlier() {
        let filter = EligibilityFilter::default();
        let games = vec![
            game(("Kentucky", 2, 79), ("Saint Peter's", 15, 85), 8),
            game(("Kentucky", 2, 79), ("Saint Peter's", 15, 85), 32),
            game(("Kentucky", 5, 79), ("Saint Peter's", 9, 85), 64),
            game(("Kentucky", 4, 79), ("Saint Peter's", 9, 85), 16),
        ];
        let admitted: Vec<_> = games.iter().map(|g| filter.admits(g)).collect();
        assert_eq!(admitted, vec![false, true, false, true]);
    }

    #[test]
    fn missing_team_or_stat_drops_row() {
        let games = vec![
            game(("Kentucky", 2, 79), ("Nowhere St.", 15, 60), 64),
            game(("Kentucky", 2, 79), ("Murray St.", 10, 60), 64),
        ];
        let rows = build_feature_rows(&table(), &games, EligibilityFilter::default());
        assert!(rows.is_empty());
    }

    #[test]
    fn higher_seed_win_is_labelled_zero() {
        let games = vec![game(("Kentucky", 2, 90), ("Saint Peter's", 15, 60), 64)];
        let rows = build_feature_rows(&table(), &games, EligibilityFilter::default());
        assert_eq!(rows[0].upset, 0);
        assert!(rows[0].is_finite());
    }
}
