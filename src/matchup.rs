use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// One tournament game, oriented so `higher_seed < lower_seed`.
///
/// `round` is a round-of ordinal: 64 for the first round down to 2 for the final.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Matchup {
    pub year: i32,
    pub round: u32,
    pub higher_seed: u8,
    pub higher_seed_team: String,
    pub lower_seed: u8,
    pub lower_seed_team: String,
    pub higher_seed_score: Option<u32>,
    pub lower_seed_score: Option<u32>,
    pub winning_team: Option<String>,
}

/// One side of a game as it appears in a raw source row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub team: String,
    pub seed: u8,
    pub score: Option<u32>,
}

/// Both sides carry the same seed; no tie-break is defined for orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedTie;

impl Matchup {
    /// Orients two participants by seed number and derives the winner from scores.
    ///
    /// Returns `Err(SeedTie)` for equal seeds. A tied score, or any
    /// missing score, leaves `winning_team` empty.
    pub fn from_participants(
        year: i32,
        round: u32,
        a: Participant,
        b: Participant,
    ) -> Result<Self, SeedTie> {
        if a.seed == b.seed {
            return Err(SeedTie);
        }
        let winning_team = match (a.score, b.score) {
            (Some(sa), Some(sb)) if sa > sb => Some(a.team.clone()),
            (Some(sa), Some(sb)) if sb > sa => Some(b.team.clone()),
            _ => None,
        };
        let (hi, lo) = if a.seed < b.seed { (a, b) } else { (b, a) };
        Ok(Self {
            year,
            round,
            higher_seed: hi.seed,
            higher_seed_team: hi.team,
            lower_seed: lo.seed,
            lower_seed_team: lo.team,
            higher_seed_score: hi.score,
            lower_seed_score: lo.score,
            winning_team,
        })
    }

    pub fn seed_gap(&self) -> u8 {
        self.lower_seed.saturating_sub(self.higher_seed)
    }

    pub fn has_both_scores(&self) -> bool {
        self.higher_seed_score.is_some() && self.lower_seed_score.is_some()
    }

    pub fn is_tied_score(&self) -> bool {
        matches!(
            (self.higher_seed_score, self.lower_seed_score),
            (Some(h), Some(l)) if h == l
        )
    }

    pub fn lower_seed_won(&self) -> bool {
        self.winning_team.as_deref() == Some(self.lower_seed_team.as_str())
    }

    pub fn higher_seed_won(&self) -> bool {
        self.winning_team.as_deref() == Some(self.higher_seed_team.as_str())
    }
}

/// Data-quality events raised while normalizing. None of these stop a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataNotice {
    /// Flat rows at `row` and `row + 1` disagreed on season; advanced one row.
    Resynced { row: usize, year: i32, next_year: i32 },
    /// Every row of this season lacks a score (tournament not yet played).
    UnplayedSeasonSkipped { year: i32, rows: usize },
    /// A row could not be read (bad year, seed or round).
    MalformedRow { row: usize, reason: String },
    SeedTie {
        year: i32,
        round: u32,
        seed: u8,
        teams: [String; 2],
    },
    ScoreTie {
        year: i32,
        round: u32,
        teams: [String; 2],
    },
    /// Trailing row with no partner.
    UnpairedRow { row: usize },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct NormalizeReport {
    pub mismatched_names: BTreeSet<String>,
    pub notices: Vec<DataNotice>,
}

impl DataNotice {
    pub fn year(&self) -> Option<i32> {
        match self {
            DataNotice::Resynced { year, .. }
            | DataNotice::UnplayedSeasonSkipped { year, .. }
            | DataNotice::SeedTie { year, .. }
            | DataNotice::ScoreTie { year, .. } => Some(*year),
            DataNotice::MalformedRow { .. } | DataNotice::UnpairedRow { .. } => None,
        }
    }
}

impl NormalizeReport {
    pub fn merge(&mut self, other: NormalizeReport) {
        self.mismatched_names.extend(other.mismatched_names);
        self.notices.extend(other.notices);
    }

    /// The part of the report that concerns one season's games.
    pub fn for_season(&self, year: i32, games: &[Matchup]) -> NormalizeReport {
        let teams: BTreeSet<&str> = games
            .iter()
            .flat_map(|m| [m.higher_seed_team.as_str(), m.lower_seed_team.as_str()])
            .collect();
        NormalizeReport {
            mismatched_names: self
                .mismatched_names
                .iter()
                .filter(|n| teams.contains(n.as_str()))
                .cloned()
                .collect(),
            notices: self
                .notices
                .iter()
                .filter(|n| n.year() == Some(year))
                .cloned()
                .collect(),
        }
    }
}

/// Matchups grouped by season, each season in source order.
pub type SeasonMatchups = BTreeMap<i32, Vec<Matchup>>;

/// Adapter output: canonical matchups plus what was flagged along the way.
#[derive(Debug, Clone, Default)]
pub struct Normalized {
    pub seasons: SeasonMatchups,
    pub report: NormalizeReport,
}

impl Normalized {
    /// Orients one raw game and appends it to its season, flagging seed and score ties.
    pub fn push_game(&mut self, year: i32, round: u32, a: Participant, b: Participant) {
        let teams = [a.team.clone(), b.team.clone()];
        let seed = a.seed;
        match Matchup::from_participants(year, round, a, b) {
            Ok(m) => {
                if m.is_tied_score() {
                    warn!(year, round, "tied score; leaving winner empty");
                    self.report
                        .notices
                        .push(DataNotice::ScoreTie { year, round, teams });
                }
                self.seasons.entry(year).or_default().push(m);
            }
            Err(SeedTie) => {
                warn!(year, round, seed, "equal seeds cannot be oriented; skipping game");
                self.report.notices.push(DataNotice::SeedTie {
                    year,
                    round,
                    seed,
                    teams,
                });
            }
        }
    }

    pub fn matchup_count(&self) -> usize {
        self.seasons.values().map(Vec::len).sum()
    }
}

pub fn load_matchups(path: &Path) -> Result<Vec<Matchup>> {
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse matchups {}", path.display()))
}

pub fn save_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    let raw = serde_json::to_string_pretty(value).context("serialize json")?;
    fs::write(path, raw).with_context(|| format!("write {}", path.display()))
}
