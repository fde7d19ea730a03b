use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use bracket_upsets::config::PipelineConfig;
use bracket_upsets::matchup::save_json;
use bracket_upsets::matchup_store;
use bracket_upsets::pipeline::{DataLayout, normalize_all, registry_from_layout, season_range};
use bracket_upsets::registry::TeamRegistry;
use bracket_upsets::upsets::extract_upsets;

/// Normalize the flat export and bracket trees into per-season matchup files
#[derive(Parser, Debug, Clone)]
#[command(name = "normalize_matchups", version, about)]
struct Args {
    /// Root directory holding raw inputs and normalized outputs
    #[arg(long, env = "UPSET_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    /// Optional JSON pipeline config
    #[arg(long, env = "UPSET_CONFIG")]
    config: Option<PathBuf>,

    /// First season read from the bracket-tree export
    #[arg(long, default_value = "1997")]
    bracket_first: i32,

    /// Last season read from the bracket-tree export
    #[arg(long, default_value = "2007")]
    bracket_last: i32,

    /// Seasons scanned when rebuilding the team registry from four-factors tables
    #[arg(long, default_value = "2008")]
    stats_first: i32,

    #[arg(long, default_value = "2025")]
    stats_last: i32,

    /// Rebuild teamNames.json even when it exists
    #[arg(long)]
    rebuild_registry: bool,

    /// Skip writing the SQLite matchup store
    #[arg(long)]
    no_store: bool,
}

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let cfg = PipelineConfig::resolve(args.config.as_deref())?;
    let layout = DataLayout::new(&args.data_dir);

    let registry = if layout.team_names().exists() && !args.rebuild_registry {
        TeamRegistry::load(&layout.team_names())?
    } else {
        let years = season_range(args.stats_first, args.stats_last, &cfg);
        let registry = registry_from_layout(&layout, &years)?;
        save_json(&layout.team_names(), &registry.names())?;
        info!(teams = registry.len(), "wrote team registry");
        registry
    };

    let bracket_years = season_range(args.bracket_first, args.bracket_last, &cfg);
    let run = normalize_all(&layout, &bracket_years, &registry, &cfg)?;
    let normalized = &run.normalized;

    let mut conn = if args.no_store {
        None
    } else {
        Some(matchup_store::open_db(&layout.store())?)
    };

    println!("Normalized matchups");
    println!("Data: {}", layout.root.display());
    for (year, games) in &normalized.seasons {
        save_json(&layout.matchups(*year), games)?;
        let upsets = extract_upsets(games, cfg.upset_min_gap);
        if !upsets.is_empty() {
            save_json(&layout.upsets(*year), &upsets)?;
        }
        let source = run.sources.get(year).map(|s| s.as_str()).unwrap_or("unknown");
        if let Some(conn) = conn.as_mut() {
            let season_report = normalized.report.for_season(*year, games);
            let stored =
                matchup_store::store_season(conn, source, *year, games, &season_report)?;
            if stored.duplicates > 0 {
                println!("{year}: {} duplicate matchups collapsed in store", stored.duplicates);
            }
        }
        println!(
            "{year} [{source}]: {} matchups, {} upsets (gap >= {})",
            games.len(),
            upsets.len(),
            cfg.upset_min_gap
        );
    }

    let mismatched: Vec<&String> = normalized.report.mismatched_names.iter().collect();
    save_json(&layout.mismatched_names(), &mismatched)?;
    save_json(&layout.notices(), &normalized.report.notices)?;

    println!();
    println!("Found {} mismatched team names:", mismatched.len());
    for name in &mismatched {
        println!("  - {name}");
    }
    println!("Data notices: {}", normalized.report.notices.len());
    for notice in normalized.report.notices.iter().take(12) {
        println!("   - {notice:?}");
    }

    Ok(())
}
