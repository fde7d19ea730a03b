pub mod baseline;
pub mod bracket_tree;
pub mod calibration;
pub mod config;
pub mod error;
pub mod export;
pub mod features;
pub mod flat_export;
pub mod forest;
pub mod matchup;
pub mod matchup_store;
pub mod pipeline;
pub mod registry;
pub mod stats_table;
pub mod trainer;
pub mod upsets;
