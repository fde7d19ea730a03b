//! Adapter for the nested bracket export used by seasons that predate the flat export.
//!
//! Shape: `{ "regions": [ region, .. ] }`, a region is a list of rounds, a round
//! a list of games, and a game a two-element list of entrants.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::matchup::{Normalized, Participant};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BracketSeason {
    pub regions: Vec<Vec<Vec<Vec<BracketEntrant>>>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BracketEntrant {
    pub seed: u8,
    pub score: u32,
    pub team: String,
    pub round_of: u32,
}

impl From<&BracketEntrant> for Participant {
    fn from(e: &BracketEntrant) -> Self {
        Participant {
            team: e.team.trim().to_string(),
            seed: e.seed,
            score: Some(e.score),
        }
    }
}

pub fn load_bracket_season(path: &Path) -> Result<BracketSeason> {
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse bracket tree {}", path.display()))
}

/// Flattens one season's bracket into canonical matchups.
///
/// Games in rounds below `regional_min_round` (the final four and title game
/// with the default of 8) are left out.
pub fn normalize_bracket_season(
    year: i32,
    bracket: &BracketSeason,
    regional_min_round: u32,
) -> Normalized {
    let mut out = Normalized::default();
    let mut dropped_late = 0usize;

    for (region_idx, region) in bracket.regions.iter().enumerate() {
        for round in region {
            for game in round {
                let [first, second] = game.as_slice() else {
                    warn!(year, region = region_idx, entrants = game.len(), "game without two entrants");
                    continue;
                };
                if first.round_of < regional_min_round {
                    dropped_late += 1;
                    continue;
                }
                out.push_game(year, first.round_of, first.into(), second.into());
            }
        }
    }

    debug!(
        year,
        games = out.matchup_count(),
        dropped_late,
        "flattened bracket tree"
    );
    // Keep an empty season visible so callers can tell "no games" from "not loaded".
    out.seasons.entry(year).or_default();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matchup::DataNotice;

    const SAMPLE: &str = r#"{
        "regions": [
            [
                [
                    [{"seed": 13, "score": 68, "team": "Valparaiso", "round_of": 64},
                     {"seed": 4, "score": 62, "team": "Ole Miss", "round_of": 64}],
                    [{"seed": 1, "score": 80, "team": "Kentucky", "round_of": 64},
                     {"seed": 16, "score": 51, "team": "South Carolina St.", "round_of": 64}]
                ],
                [
                    [{"seed": 1, "score": 72, "team": "Kentucky", "round_of": 8},
                     {"seed": 3, "score": 70, "team": "Duke", "round_of": 8}]
                ],
                [
                    [{"seed": 1, "score": 86, "team": "Kentucky", "round_of": 4},
                     {"seed": 3, "score": 85, "team": "Stanford", "round_of": 4}]
                ]
            ]
        ]
    }"#;

    #[test]
    fn flattens_regions_and_drops_final_four() {
        let bracket: BracketSeason = serde_json::from_str(SAMPLE).expect("sample parses");
        let out = normalize_bracket_season(1998, &bracket, 8);
        let games = &out.seasons[&1998];
        assert_eq!(games.len(), 3);
        assert!(games.iter().all(|g| g.round >= 8));

        let upset = &games[0];
        assert_eq!(upset.higher_seed_team, "Ole Miss");
        assert_eq!(upset.lower_seed_team, "Valparaiso");
        assert_eq!(upset.winning_team.as_deref(), Some("Valparaiso"));
        assert_eq!(upset.round, 64);
    }

    #[test]
    fn seed_tie_is_surfaced_not_guessed() {
        let raw = r#"{"regions": [[[[
            {"seed": 1, "score": 70, "team": "A", "round_of": 16},
            {"seed": 1, "score": 60, "team": "B", "round_of": 16}
        ]]]]}"#;
        let bracket: BracketSeason = serde_json::from_str(raw).expect("parses");
        let out = normalize_bracket_season(2003, &bracket, 8);
        assert!(out.seasons[&2003].is_empty());
        assert!(matches!(
            out.report.notices.as_slice(),
            [DataNotice::SeedTie { seed: 1, .. }]
        ));
    }

    #[test]
    fn malformed_game_is_skipped() {
        let raw = r#"{"regions": [[[[
            {"seed": 2, "score": 70, "team": "A", "round_of": 64}
        ]]]]}"#;
        let bracket: BracketSeason = serde_json::from_str(raw).expect("parses");
        let out = normalize_bracket_season(2003, &bracket, 8);
        assert_eq!(out.matchup_count(), 0);
    }
}
