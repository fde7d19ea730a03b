use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::stats_table::{RawStatRecord, TEAM_KEY};

/// Canonical team spellings, used to flag naming drift in matchup sources.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeamRegistry {
    names: BTreeSet<String>,
}

impl TeamRegistry {
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Distinct team names across any number of season tables.
    pub fn from_stat_tables<'a>(tables: impl IntoIterator<Item = &'a [RawStatRecord]>) -> Self {
        let mut names = BTreeSet::new();
        for table in tables {
            for record in table {
                if let Some(team) = record.get(TEAM_KEY).and_then(|v| v.as_str()) {
                    let team = team.trim();
                    if !team.is_empty() {
                        names.insert(team.to_string());
                    }
                }
            }
        }
        Self { names }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let names: Vec<String> = serde_json::from_str(&raw)
            .with_context(|| format!("parse team registry {}", path.display()))?;
        Ok(Self::from_names(names))
    }

    pub fn contains(&self, team: &str) -> bool {
        self.names.contains(team)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Sorted names, the shape the registry file is written in.
    pub fn names(&self) -> Vec<&str> {
        self.names.iter().map(String::as_str).collect()
    }
}
