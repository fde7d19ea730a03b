use thiserror::Error;

/// Configuration and split errors that invalidate an evaluation run.
///
/// Data-quality problems never surface here; they are collected as
/// [`crate::matchup::DataNotice`] values instead.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    #[error(
        "upset threshold gap >= {upset_min_gap} disagrees with eligibility threshold gap > {eligible_gap_above}"
    )]
    ThresholdMismatch {
        upset_min_gap: u8,
        eligible_gap_above: u8,
    },

    #[error("invalid round ordinal configuration: {0}")]
    RoundOrdinalMismatch(String),

    #[error("season {year} would enter training but the test partition starts at {test_from_year}")]
    TemporalLeak { year: i32, test_from_year: i32 },

    #[error("training partition unusable: {0}")]
    EmptyPartition(String),

    #[error("feature matrix shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("invalid forest parameters: {0}")]
    InvalidForestParams(String),

    #[error("feature selection names unknown column `{0}`")]
    UnknownFeatureColumn(String),
}
