//! Adapter for the flat per-round tournament export.
//!
//! Each game occupies two consecutive rows, one per participant, carrying
//! `YEAR`, `TEAM`, `SEED`, `SCORE` (blank when unplayed) and `CURRENT ROUND`.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{info, warn};

use crate::matchup::{DataNotice, Normalized, Participant};
use crate::registry::TeamRegistry;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FlatRow {
    #[serde(rename = "YEAR")]
    pub year: String,
    #[serde(rename = "TEAM")]
    pub team: String,
    #[serde(rename = "SEED")]
    pub seed: String,
    #[serde(rename = "SCORE", default)]
    pub score: String,
    #[serde(rename = "CURRENT ROUND")]
    pub current_round: String,
}

pub fn load_flat_export(path: &Path) -> Result<Vec<FlatRow>> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    read_flat_rows(file).with_context(|| format!("read flat export {}", path.display()))
}

/// Reads rows, dropping any the CSV layer cannot decode. Pairing recovers downstream.
pub fn read_flat_rows<R: Read>(rdr: R) -> Result<Vec<FlatRow>> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(rdr);
    let mut rows = Vec::new();
    for result in reader.deserialize::<FlatRow>() {
        match result {
            Ok(row) => rows.push(row),
            Err(err) => warn!("skipping malformed flat export row: {err}"),
        }
    }
    Ok(rows)
}

/// Pairs consecutive rows into canonical matchups.
///
/// A pair whose years disagree advances by one row so a single missing row
/// costs at most one game. Seasons without a single recorded score are skipped.
pub fn normalize_flat_rows(rows: &[FlatRow], registry: &TeamRegistry) -> Normalized {
    let mut out = Normalized::default();
    let unplayed = unplayed_seasons(rows);
    for (year, count) in &unplayed {
        info!(year, rows = count, "skipping season with no recorded scores");
        out.report.notices.push(DataNotice::UnplayedSeasonSkipped {
            year: *year,
            rows: *count,
        });
    }

    let mut i = 0usize;
    while i + 1 < rows.len() {
        let (row1, row2) = (&rows[i], &rows[i + 1]);

        let Some(year) = parse_year(&row1.year) else {
            out.report.notices.push(DataNotice::MalformedRow {
                row: i,
                reason: format!("unreadable YEAR `{}`", row1.year),
            });
            i += 1;
            continue;
        };

        let next_year = parse_year(&row2.year);
        if unplayed.contains_key(&year) {
            i += if next_year == Some(year) { 2 } else { 1 };
            continue;
        }

        if next_year != Some(year) {
            let next_year = next_year.unwrap_or_default();
            warn!(row = i, year, next_year, "flat export pair out of sync; advancing one row");
            out.report.notices.push(DataNotice::Resynced {
                row: i,
                year,
                next_year,
            });
            i += 1;
            continue;
        }

        let parsed = parse_side(row1)
            .and_then(|a| parse_side(row2).map(|b| (a, b)))
            .and_then(|sides| parse_round(&row1.current_round).map(|round| (sides, round)));
        let ((a, b), round) = match parsed {
            Ok(v) => v,
            Err(reason) => {
                out.report
                    .notices
                    .push(DataNotice::MalformedRow { row: i, reason });
                i += 2;
                continue;
            }
        };

        for team in [&a.team, &b.team] {
            if !registry.contains(team) {
                out.report.mismatched_names.insert(team.clone());
            }
        }

        out.push_game(year, round, a, b);
        i += 2;
    }

    if let Some(last) = rows.get(i)
        && i + 1 == rows.len()
        && parse_year(&last.year).is_none_or(|year| !unplayed.contains_key(&year))
    {
        out.report.notices.push(DataNotice::UnpairedRow { row: i });
    }

    out
}

fn unplayed_seasons(rows: &[FlatRow]) -> BTreeMap<i32, usize> {
    let mut counts: BTreeMap<i32, usize> = BTreeMap::new();
    let mut scored: BTreeSet<i32> = BTreeSet::new();
    for row in rows {
        let Some(year) = parse_year(&row.year) else {
            continue;
        };
        *counts.entry(year).or_default() += 1;
        if parse_score(&row.score).is_some() {
            scored.insert(year);
        }
    }
    counts.retain(|year, _| !scored.contains(year));
    counts
}

fn parse_side(row: &FlatRow) -> Result<Participant, String> {
    let team = row.team.trim();
    if team.is_empty() {
        return Err("blank TEAM".to_string());
    }
    let seed = row
        .seed
        .trim()
        .parse::<u8>()
        .ok()
        .filter(|s| (1..=16).contains(s))
        .ok_or_else(|| format!("unreadable SEED `{}` for {team}", row.seed))?;
    Ok(Participant {
        team: team.to_string(),
        seed,
        score: parse_score(&row.score),
    })
}

fn parse_round(raw: &str) -> Result<u32, String> {
    raw.trim()
        .parse::<u32>()
        .ok()
        .filter(|r| crate::config::is_round_ordinal(*r))
        .ok_or_else(|| format!("unreadable CURRENT ROUND `{raw}`"))
}

fn parse_year(raw: &str) -> Option<i32> {
    raw.trim().parse::<i32>().ok()
}

/// Blank means not yet played; it is never read as zero.
fn parse_score(raw: &str) -> Option<u32> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<u32>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(year: &str, team: &str, seed: &str, score: &str, round: &str) -> FlatRow {
        FlatRow {
            year: year.to_string(),
            team: team.to_string(),
            seed: seed.to_string(),
            score: score.to_string(),
            current_round: round.to_string(),
        }
    }

    fn registry() -> TeamRegistry {
        TeamRegistry::from_names(["Virginia", "Gardner Webb", "Purdue", "Fairleigh Dickinson"])
    }

    #[test]
    fn pairs_rows_and_orients_by_seed() {
        let rows = vec![
            row("2019", "Gardner Webb", "16", "56", "64"),
            row("2019", "Virginia", "1", "71", "64"),
        ];
        let out = normalize_flat_rows(&rows, &registry());
        let games = &out.seasons[&2019];
        assert_eq!(games.len(), 1);
        assert_eq!(games[0].higher_seed_team, "Virginia");
        assert_eq!(games[0].lower_seed_team, "Gardner Webb");
        assert_eq!(games[0].winning_team.as_deref(), Some("Virginia"));
        assert!(out.report.mismatched_names.is_empty());
    }

    #[test]
    fn year_drift_advances_one_row() {
        let rows = vec![
            row("2018", "Orphan", "5", "70", "64"),
            row("2019", "Virginia", "1", "71", "64"),
            row("2019", "Gardner Webb", "16", "56", "64"),
        ];
        let out = normalize_flat_rows(&rows, &registry());
        assert_eq!(out.seasons.get(&2018), None);
        assert_eq!(out.seasons[&2019].len(), 1);
        assert!(matches!(
            out.report.notices[0],
            DataNotice::Resynced {
                row: 0,
                year: 2018,
                next_year: 2019
            }
        ));
    }

    #[test]
    fn unscored_season_is_skipped_whole() {
        let rows = vec![
            row("2023", "Purdue", "1", "58", "64"),
            row("2023", "Fairleigh Dickinson", "16", "63", "64"),
            row("2025", "Virginia", "1", "", "64"),
            row("2025", "Gardner Webb", "16", "", "64"),
        ];
        let out = normalize_flat_rows(&rows, &registry());
        assert_eq!(out.seasons.len(), 1);
        assert!(out.seasons[&2023][0].lower_seed_won());
        assert!(out.report.notices.contains(&DataNotice::UnplayedSeasonSkipped {
            year: 2025,
            rows: 2
        }));
    }

    #[test]
    fn odd_unplayed_rows_leave_next_season_intact() {
        let rows = vec![
            row("2025", "Virginia", "1", "", "64"),
            row("2025", "Gardner Webb", "16", "", "64"),
            row("2025", "Purdue", "2", "", "64"),
            row("2024", "Purdue", "2", "70", "64"),
            row("2024", "Fairleigh Dickinson", "15", "60", "64"),
        ];
        let out = normalize_flat_rows(&rows, &registry());
        let games = &out.seasons[&2024];
        assert_eq!(games.len(), 1);
        assert_eq!(games[0].higher_seed_team, "Purdue");
        assert_eq!(games[0].lower_seed_team, "Fairleigh Dickinson");
        assert_eq!(
            out.report.notices,
            vec![DataNotice::UnplayedSeasonSkipped {
                year: 2025,
                rows: 3
            }]
        );
    }

    #[test]
    fn lone_trailing_unplayed_row_is_not_unpaired() {
        let rows = vec![
            row("2024", "Purdue", "2", "70", "64"),
            row("2024", "Fairleigh Dickinson", "15", "60", "64"),
            row("2025", "Virginia", "1", "", "64"),
        ];
        let out = normalize_flat_rows(&rows, &registry());
        assert_eq!(out.seasons[&2024].len(), 1);
        assert_eq!(
            out.report.notices,
            vec![DataNotice::UnplayedSeasonSkipped {
                year: 2025,
                rows: 1
            }]
        );
    }

    #[test]
    fn equal_seeds_are_reported_and_skipped() {
        let rows = vec![
            row("2019", "Purdue", "8", "70", "64"),
            row("2019", "Virginia", "8", "65", "64"),
            row("2019", "Gardner Webb", "16", "56", "64"),
            row("2019", "Fairleigh Dickinson", "1", "71", "64"),
        ];
        let out = normalize_flat_rows(&rows, &registry());
        let games = &out.seasons[&2019];
        assert_eq!(games.len(), 1);
        assert_eq!(games[0].higher_seed_team, "Fairleigh Dickinson");
        assert!(matches!(
            &out.report.notices[..],
            [DataNotice::SeedTie { year: 2019, round: 64, seed: 8, .. }]
        ));
    }

    #[test]
    fn partially_played_game_keeps_missing_score() {
        let rows = vec![
            row("2024", "Purdue", "1", "", "32"),
            row("2024", "Virginia", "9", "60", "32"),
            row("2024", "Gardner Webb", "16", "50", "64"),
            row("2024", "Fairleigh Dickinson", "1", "80", "64"),
        ];
        let out = normalize_flat_rows(&rows, &registry());
        let first = &out.seasons[&2024][0];
        assert_eq!(first.higher_seed_score, None);
        assert_eq!(first.lower_seed_score, Some(60));
        assert_eq!(first.winning_team, None);
    }

    #[test]
    fn unknown_team_is_reported_not_fatal() {
        let rows = vec![
            row("2019", "Virginia", "1", "71", "64"),
            row("2019", "Gardner-Webb", "16", "56", "64"),
        ];
        let out = normalize_flat_rows(&rows, &registry());
        assert_eq!(out.seasons[&2019].len(), 1);
        assert_eq!(
            out.report.mismatched_names.iter().collect::<Vec<_>>(),
            vec!["Gardner-Webb"]
        );
    }

    #[test]
    fn trailing_row_is_flagged() {
        let rows = vec![
            row("2019", "Virginia", "1", "71", "64"),
            row("2019", "Gardner Webb", "16", "56", "64"),
            row("2019", "Purdue", "3", "70", "64"),
        ];
        let out = normalize_flat_rows(&rows, &registry());
        assert_eq!(out.seasons[&2019].len(), 1);
        assert_eq!(out.report.notices, vec![DataNotice::UnpairedRow { row: 2 }]);
    }

    #[test]
    fn reads_csv_with_blank_scores() {
        let raw = "YEAR,TEAM,SEED,SCORE,CURRENT ROUND\n2025,Duke,1,,64\n2025,Mount St. Mary's,16,,64\n";
        let rows = read_flat_rows(raw.as_bytes()).expect("csv parses");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].team, "Mount St. Mary's");
        assert!(rows[0].score.is_empty());
    }
}
