use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, ValueEnum};

use bracket_upsets::baseline::{
    EvaluationReport, ResultRow, SEED_BASELINE, empirical_seed_upset_rates, summarize,
};
use bracket_upsets::config::PipelineConfig;
use bracket_upsets::export::{write_evaluation_workbook, write_results_csv};
use bracket_upsets::features::write_feature_csv;
use bracket_upsets::pipeline::{
    DataLayout, collect_feature_rows, collect_matchups, run_backtest, season_range,
};
use bracket_upsets::trainer::FeatureSelection;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Selection {
    All,
    NoSeedDiff,
    EfficiencyOnly,
}

/// Train the calibrated upset model on past seasons and score it against the seed baseline
#[derive(Parser, Debug, Clone)]
#[command(name = "upset_backtest", version, about)]
struct Args {
    #[arg(long, env = "UPSET_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    #[arg(long, env = "UPSET_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, default_value = "2008")]
    first_year: i32,

    #[arg(long, default_value = "2024")]
    last_year: i32,

    /// Override the configured feature selection with a preset
    #[arg(long, value_enum)]
    selection: Option<Selection>,

    /// Rows shown in the top-predictions table
    #[arg(long, default_value = "20")]
    top: usize,

    /// Also print top picks, actual upsets and mean probabilities
    #[arg(long)]
    summary: bool,

    /// Print realized upset rates per seed gap next to the baseline table
    #[arg(long)]
    empirical: bool,

    #[arg(long)]
    features_csv: Option<PathBuf>,

    #[arg(long)]
    results_csv: Option<PathBuf>,

    #[arg(long)]
    xlsx: Option<PathBuf>,
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
    let mut cfg = PipelineConfig::resolve(args.config.as_deref())?;
    if let Some(selection) = args.selection {
        cfg.feature_selection = match selection {
            Selection::All => FeatureSelection::All,
            Selection::NoSeedDiff => FeatureSelection::without_seed_diff(),
            Selection::EfficiencyOnly => FeatureSelection::efficiency_only(),
        };
    }
    let layout = DataLayout::new(&args.data_dir);
    let years = season_range(args.first_year, args.last_year, &cfg);

    if args.empirical {
        print_empirical(&layout, &years)?;
    }

    let rows = collect_feature_rows(&layout, &years, &cfg)?;
    if let Some(path) = &args.features_csv {
        write_feature_csv(path, &rows)?;
        println!("Features: {} rows -> {}", rows.len(), path.display());
    }

    let (model, report) = run_backtest(&rows, &cfg, &SEED_BASELINE)?;

    println!(
        "Trained on {} rows from {:?}; {} held-out rows from {}+",
        model.train_rows(),
        model.train_years(),
        report.results.len(),
        cfg.test_from_year
    );
    println!("Seed: {}  trees: {}  folds: {}", cfg.forest.seed, cfg.forest.n_trees, cfg.calibration_folds);
    println!();
    println!("Brier score: {:.4}", report.brier);
    if let Some(baseline) = report.baseline_brier {
        println!("Seed baseline Brier: {baseline:.4}");
    }
    println!(
        "Log loss: {:.4}  accuracy: {:.3}  ECE: {:.4}",
        report.metrics.log_loss, report.metrics.accuracy, report.ece
    );

    println!();
    println!("Top features:");
    for (name, weight) in model.feature_importances().iter().take(10) {
        println!("  {name:<16} {weight:.3}");
    }

    print_efficacy(&report);
    if args.summary {
        print_summary(&report.results, args.top);
    }

    println!();
    println!("Calibration (held-out):");
    for bin in report.calibration.iter().filter(|b| b.count > 0) {
        println!(
            "  [{:.1}, {:.1}) n={:<4} pred={:.3} actual={:.3}",
            bin.bucket_start, bin.bucket_end, bin.count, bin.avg_pred, bin.actual_rate
        );
    }

    if let Some(path) = &args.results_csv {
        write_results_csv(path, &report.results)?;
        println!("Results: {}", path.display());
    }
    if let Some(path) = &args.xlsx {
        let export = write_evaluation_workbook(path, &report)?;
        println!(
            "Workbook: {} ({} results, {} buckets)",
            path.display(),
            export.results,
            export.efficacy_buckets
        );
    }

    Ok(())
}

fn print_efficacy(report: &EvaluationReport) {
    println!();
    println!("=== Model Efficacy Analysis ===");
    println!("Comparing model predictions to baseline seed differential probabilities");
    println!();
    for bucket in &report.efficacy {
        println!(
            "Seed Diff {} (baseline: {:.3})",
            bucket.seed_diff, bucket.baseline_prob
        );
        for (label, part) in [
            ("Model > Baseline", bucket.model_higher),
            ("Model < Baseline", bucket.model_lower),
        ] {
            match part.rate() {
                Some(rate) => println!(
                    "  {label}: {}/{} upsets ({rate:.3})",
                    part.upsets, part.total
                ),
                None => println!("  {label}: 0/0 upsets (N/A)"),
            }
        }
        println!();
    }
}

fn print_summary(results: &[ResultRow], top: usize) {
    let summary = summarize(results, top);
    println!();
    println!("=== Top {top} Upset Predictions ===");
    for row in &summary.top {
        print_row(row);
    }
    println!();
    println!("=== Actual Upsets (sorted by model confidence) ===");
    for row in &summary.actual_upsets {
        print_row(row);
    }
    println!();
    println!("=== Model captured {} upsets in test set ===", summary.actual_upsets.len());
    let fmt = |v: Option<f64>| v.map(|v| format!("{v:.3}")).unwrap_or_else(|| "n/a".to_string());
    println!(
        "Average upset probability for actual upsets: {}",
        fmt(summary.mean_prob_upsets)
    );
    println!(
        "Average upset probability for non-upsets: {}",
        fmt(summary.mean_prob_non_upsets)
    );
}

fn print_row(row: &ResultRow) {
    println!(
        "  {} ({}) vs {} ({}) {}  p={:.3}  seed_prob={}  upset={}",
        row.higher_seed_team,
        row.hi_seed,
        row.lower_seed_team,
        row.lo_seed,
        row.year,
        row.upset_prob,
        row.seed_prob
            .map(|p| format!("{p:.3}"))
            .unwrap_or_else(|| "n/a".to_string()),
        u8::from(row.actual_upset)
    );
}

fn print_empirical(layout: &DataLayout, years: &[i32]) -> Result<()> {
    let matchups = collect_matchups(layout, years)?;
    println!("Empirical upset rate by seed gap ({} games):", matchups.len());
    for rate in empirical_seed_upset_rates(&matchups) {
        let baseline = SEED_BASELINE
            .get(rate.seed_gap)
            .map(|p| format!("{p:.3}"))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  gap {:>2}: {:>3}/{:<3} = {:.3}  baseline {baseline}",
            rate.seed_gap, rate.upsets, rate.games, rate.rate
        );
    }
    println!();
    Ok(())
}
