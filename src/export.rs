use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use rust_xlsxwriter::{Workbook, Worksheet};

use crate::baseline::{EfficacyBucket, EvaluationReport, ResultRow};
use crate::calibration::CalibrationBin;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportReport {
    pub results: usize,
    pub efficacy_buckets: usize,
}

pub fn write_results_csv(path: &Path, rows: &[ResultRow]) -> Result<()> {
    let file = File::create(path).with_context(|| format!("create {}", path.display()))?;
    let mut writer = csv::Writer::from_writer(file);
    for row in rows {
        writer.serialize(row).context("write result row")?;
    }
    writer.flush().context("flush results csv")?;
    Ok(())
}

/// Writes the results, efficacy and calibration tables as sheets of one workbook.
pub fn write_evaluation_workbook(path: &Path, report: &EvaluationReport) -> Result<ExportReport> {
    let mut results_rows = vec![header(&[
        "higher_seed",
        "lower_seed",
        "year",
        "hi seed",
        "lo seed",
        "actual_upset",
        "upset_prob",
        "seed_diff",
        "seed_prob",
    ])];
    results_rows.extend(report.results.iter().map(result_row));

    let mut efficacy_rows = vec![header(&[
        "seed_diff",
        "baseline",
        "model_higher_upsets",
        "model_higher_total",
        "model_higher_rate",
        "model_lower_upsets",
        "model_lower_total",
        "model_lower_rate",
        "model_equal",
    ])];
    efficacy_rows.extend(report.efficacy.iter().map(efficacy_row));

    let mut calibration_rows = vec![header(&[
        "bucket_start",
        "bucket_end",
        "count",
        "avg_pred",
        "actual_rate",
    ])];
    calibration_rows.extend(report.calibration.iter().map(calibration_row));

    let mut workbook = Workbook::new();
    {
        let sheet = workbook.add_worksheet();
        sheet.set_name("Results")?;
        write_rows(sheet, &results_rows)?;
    }
    {
        let sheet = workbook.add_worksheet();
        sheet.set_name("Efficacy")?;
        write_rows(sheet, &efficacy_rows)?;
    }
    {
        let sheet = workbook.add_worksheet();
        sheet.set_name("Calibration")?;
        write_rows(sheet, &calibration_rows)?;
    }

    workbook
        .save(path)
        .with_context(|| format!("failed writing workbook to {}", path.display()))?;

    Ok(ExportReport {
        results: report.results.len(),
        efficacy_buckets: report.efficacy.len(),
    })
}

fn header(cols: &[&str]) -> Vec<String> {
    cols.iter().map(|c| c.to_string()).collect()
}

fn result_row(row: &ResultRow) -> Vec<String> {
    vec![
        row.higher_seed_team.clone(),
        row.lower_seed_team.clone(),
        row.year.to_string(),
        row.hi_seed.to_string(),
        row.lo_seed.to_string(),
        u8::from(row.actual_upset).to_string(),
        format!("{:.4}", row.upset_prob),
        row.seed_diff.to_string(),
        opt_to_string(row.seed_prob),
    ]
}

fn efficacy_row(bucket: &EfficacyBucket) -> Vec<String> {
    vec![
        bucket.seed_diff.to_string(),
        format!("{:.3}", bucket.baseline_prob),
        bucket.model_higher.upsets.to_string(),
        bucket.model_higher.total.to_string(),
        opt_to_string(bucket.model_higher.rate().map(|r| format!("{r:.3}"))),
        bucket.model_lower.upsets.to_string(),
        bucket.model_lower.total.to_string(),
        opt_to_string(bucket.model_lower.rate().map(|r| format!("{r:.3}"))),
        bucket.model_equal.to_string(),
    ]
}

fn calibration_row(bin: &CalibrationBin) -> Vec<String> {
    vec![
        format!("{:.2}", bin.bucket_start),
        format!("{:.2}", bin.bucket_end),
        bin.count.to_string(),
        format!("{:.4}", bin.avg_pred),
        format!("{:.4}", bin.actual_rate),
    ]
}

fn opt_to_string<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn write_rows(worksheet: &mut Worksheet, rows: &[Vec<String>]) -> Result<()> {
    for (row_idx, row) in rows.iter().enumerate() {
        for (col_idx, value) in row.iter().enumerate() {
            worksheet
                .write_string(row_idx as u32, col_idx as u16, value)
                .with_context(|| format!("write cell ({row_idx},{col_idx})"))?;
        }
    }
    Ok(())
}
