//! Season-level orchestration over injected input locations.
//!
//! Each step returns a fresh collection; multi-season data is concatenated
//! here by the caller, never accumulated inside a stage.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::baseline::{EvaluationReport, SeedBaselineTable, evaluate};
use crate::bracket_tree::{load_bracket_season, normalize_bracket_season};
use crate::config::PipelineConfig;
use crate::features::{EligibilityFilter, FeatureRow, build_feature_rows};
use crate::flat_export::{load_flat_export, normalize_flat_rows};
use crate::matchup::{Matchup, Normalized, load_matchups};
use crate::registry::TeamRegistry;
use crate::stats_table::{StatsTable, build_stats_table, load_stat_records};
use crate::trainer::{TrainedModel, train};

/// Where each named per-season input and output lives under one data root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataLayout {
    pub root: PathBuf,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn misc(&self, year: i32) -> PathBuf {
        self.root.join("misc").join(format!("{year}.json"))
    }

    pub fn four_factors(&self, year: i32) -> PathBuf {
        self.root.join("fourFactors").join(format!("{year}.json"))
    }

    pub fn matchups(&self, year: i32) -> PathBuf {
        self.root.join("matchups").join(format!("{year}.json"))
    }

    pub fn upsets(&self, year: i32) -> PathBuf {
        self.root.join("upsets").join(format!("{year}.json"))
    }

    pub fn bracket(&self, year: i32) -> PathBuf {
        self.root.join("bracketData").join(format!("{year}.json"))
    }

    pub fn flat_export(&self) -> PathBuf {
        self.root.join("TournamentMatchups.csv")
    }

    pub fn team_names(&self) -> PathBuf {
        self.root.join("teamNames.json")
    }

    pub fn mismatched_names(&self) -> PathBuf {
        self.root.join("mismatchedNames.json")
    }

    pub fn notices(&self) -> PathBuf {
        self.root.join("normalizeNotices.json")
    }

    pub fn store(&self) -> PathBuf {
        self.root.join("matchups.sqlite")
    }
}

/// Seasons in `first..=last` that are not excluded by configuration.
pub fn season_range(first: i32, last: i32, cfg: &PipelineConfig) -> Vec<i32> {
    (first..=last).filter(|y| !cfg.is_excluded_season(*y)).collect()
}

pub fn load_stats_table(layout: &DataLayout, year: i32) -> Result<StatsTable> {
    let misc = load_stat_records(&layout.misc(year))?;
    let ff = load_stat_records(&layout.four_factors(year))?;
    Ok(build_stats_table(year, &misc, &ff))
}

/// Registry of every team named in the four-factors tables of `years`.
pub fn registry_from_layout(layout: &DataLayout, years: &[i32]) -> Result<TeamRegistry> {
    let mut tables = Vec::new();
    for &year in years {
        let path = layout.four_factors(year);
        if !path.exists() {
            continue;
        }
        tables.push(load_stat_records(&path)?);
    }
    Ok(TeamRegistry::from_stat_tables(tables.iter().map(Vec::as_slice)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchupSource {
    Flat,
    Bracket,
}

impl MatchupSource {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchupSource::Flat => "flat",
            MatchupSource::Bracket => "bracket",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NormalizedRun {
    pub normalized: Normalized,
    pub sources: BTreeMap<i32, MatchupSource>,
}

/// Runs both adapters and merges their seasons.
///
/// Bracket seasons missing on disk are skipped. A season produced by both
/// adapters keeps the flat export's games.
pub fn normalize_all(
    layout: &DataLayout,
    bracket_years: &[i32],
    registry: &TeamRegistry,
    cfg: &PipelineConfig,
) -> Result<NormalizedRun> {
    let mut run = NormalizedRun::default();

    let flat_path = layout.flat_export();
    if flat_path.exists() {
        let rows = load_flat_export(&flat_path)?;
        let flat = normalize_flat_rows(&rows, registry);
        for (year, games) in flat.seasons {
            if cfg.is_excluded_season(year) {
                continue;
            }
            run.sources.insert(year, MatchupSource::Flat);
            run.normalized.seasons.insert(year, games);
        }
        run.normalized.report.merge(flat.report);
    } else {
        warn!(path = %flat_path.display(), "flat export not found");
    }

    for &year in bracket_years {
        if cfg.is_excluded_season(year) {
            continue;
        }
        let path = layout.bracket(year);
        if !path.exists() {
            warn!(year, path = %path.display(), "bracket season not found; skipping");
            continue;
        }
        if run.normalized.seasons.contains_key(&year) {
            warn!(year, "season already normalized from flat export; ignoring bracket tree");
            continue;
        }
        let bracket = load_bracket_season(&path)?;
        let season = normalize_bracket_season(year, &bracket, cfg.regional_min_round);
        for (year, games) in season.seasons {
            run.sources.insert(year, MatchupSource::Bracket);
            run.normalized.seasons.insert(year, games);
        }
        run.normalized.report.merge(season.report);
    }

    let out = &run.normalized;
    info!(
        seasons = out.seasons.len(),
        matchups = out.matchup_count(),
        mismatched = out.report.mismatched_names.len(),
        notices = out.report.notices.len(),
        "normalized matchups"
    );
    Ok(run)
}

/// Feature rows for one season, or `None` when one of its inputs is absent.
pub fn season_feature_rows(
    layout: &DataLayout,
    year: i32,
    filter: EligibilityFilter,
) -> Result<Option<Vec<FeatureRow>>> {
    let inputs = [layout.misc(year), layout.four_factors(year), layout.matchups(year)];
    if let Some(missing) = inputs.iter().find(|p| !p.exists()) {
        warn!(year, path = %missing.display(), "season input missing; skipping season");
        return Ok(None);
    }
    let table = load_stats_table(layout, year)?;
    let matchups = load_matchups(&layout.matchups(year))?;
    Ok(Some(build_feature_rows(&table, &matchups, filter)))
}

pub fn collect_feature_rows(
    layout: &DataLayout,
    years: &[i32],
    cfg: &PipelineConfig,
) -> Result<Vec<FeatureRow>> {
    let filter = EligibilityFilter::from_config(cfg);
    let mut all = Vec::new();
    for &year in years {
        if cfg.is_excluded_season(year) {
            continue;
        }
        if let Some(rows) = season_feature_rows(layout, year, filter)
            .with_context(|| format!("build features for {year}"))?
        {
            info!(year, rows = rows.len(), "season feature rows");
            all.extend(rows);
        }
    }
    Ok(all)
}

/// Every stored matchup of `years`, for seasons whose JSON exists.
pub fn collect_matchups(layout: &DataLayout, years: &[i32]) -> Result<Vec<Matchup>> {
    let mut all = Vec::new();
    for &year in years {
        let path = layout.matchups(year);
        if path.exists() {
            all.extend(load_matchups(&path)?);
        }
    }
    Ok(all)
}

pub fn run_backtest(
    rows: &[FeatureRow],
    cfg: &PipelineConfig,
    baseline: &SeedBaselineTable,
) -> Result<(TrainedModel, EvaluationReport)> {
    let model = train(rows, cfg).context("train calibrated forest")?;
    let report = evaluate(&model.score_test(), baseline);
    Ok((model, report))
}
