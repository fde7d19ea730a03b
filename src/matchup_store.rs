use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{Connection, params};
use tracing::warn;

use crate::matchup::{Matchup, NormalizeReport};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSummary {
    pub run_id: i64,
    pub year: i32,
    /// Distinct stored games; repeats of a (round, higher, lower) key collapse.
    pub matchups_upserted: usize,
    pub duplicates: usize,
    pub notices: usize,
    pub mismatched_names: usize,
}

pub fn open_db(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let conn =
        Connection::open(path).with_context(|| format!("open sqlite db {}", path.display()))?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS matchups (
            year INTEGER NOT NULL,
            round INTEGER NOT NULL,
            higher_seed INTEGER NOT NULL,
            higher_seed_team TEXT NOT NULL,
            lower_seed INTEGER NOT NULL,
            lower_seed_team TEXT NOT NULL,
            higher_seed_score INTEGER NULL,
            lower_seed_score INTEGER NULL,
            winning_team TEXT NULL,
            source TEXT NOT NULL,
            seq INTEGER NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (year, round, higher_seed_team, lower_seed_team)
        );
        CREATE INDEX IF NOT EXISTS idx_matchups_year ON matchups(year);

        CREATE TABLE IF NOT EXISTS normalize_runs (
            run_id INTEGER PRIMARY KEY AUTOINCREMENT,
            started_at TEXT NOT NULL,
            finished_at TEXT NULL,
            year INTEGER NOT NULL,
            source TEXT NOT NULL,
            matchups_upserted INTEGER NOT NULL,
            notices INTEGER NOT NULL,
            mismatched_json TEXT NOT NULL
        );
        "#,
    )
    .context("create sqlite schema")?;
    Ok(())
}

/// Replaces one season's stored matchups and records the run.
///
/// `source` names the adapter that produced the rows (e.g. `flat` or `bracket`).
/// A game repeated within the season overwrites the earlier copy and is counted
/// in `duplicates`.
pub fn store_season(
    conn: &mut Connection,
    source: &str,
    year: i32,
    matchups: &[Matchup],
    report: &NormalizeReport,
) -> Result<StoreSummary> {
    let started_at = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO normalize_runs(started_at, finished_at, year, source, matchups_upserted, notices, mismatched_json)
         VALUES (?1, NULL, ?2, ?3, 0, 0, '[]')",
        params![started_at, year, source],
    )
    .context("insert normalize run")?;
    let run_id = conn.last_insert_rowid();

    let tx = conn.transaction().context("begin store transaction")?;
    tx.execute("DELETE FROM matchups WHERE year = ?1", params![year])
        .context("clear season matchups")?;
    let mut keys: BTreeSet<(u32, &str, &str)> = BTreeSet::new();
    let mut duplicates = 0usize;
    for (seq, m) in matchups.iter().enumerate() {
        let key = (m.round, m.higher_seed_team.as_str(), m.lower_seed_team.as_str());
        if !keys.insert(key) {
            duplicates += 1;
            warn!(
                year,
                round = m.round,
                higher = %m.higher_seed_team,
                lower = %m.lower_seed_team,
                "duplicate matchup replaces earlier row"
            );
        }
        upsert_matchup(&tx, source, seq, m)?;
    }
    tx.commit().context("commit store transaction")?;
    let upserted = keys.len();

    let mismatched_json = serde_json::to_string(&report.mismatched_names)
        .context("encode mismatched names")?;
    conn.execute(
        "UPDATE normalize_runs
         SET finished_at = ?1, matchups_upserted = ?2, notices = ?3, mismatched_json = ?4
         WHERE run_id = ?5",
        params![
            Utc::now().to_rfc3339(),
            upserted as i64,
            report.notices.len() as i64,
            mismatched_json,
            run_id
        ],
    )
    .context("update normalize run")?;

    Ok(StoreSummary {
        run_id,
        year,
        matchups_upserted: upserted,
        duplicates,
        notices: report.notices.len(),
        mismatched_names: report.mismatched_names.len(),
    })
}

fn upsert_matchup(tx: &rusqlite::Transaction<'_>, source: &str, seq: usize, m: &Matchup) -> Result<()> {
    tx.execute(
        r#"
        INSERT INTO matchups (
            year, round, higher_seed, higher_seed_team, lower_seed, lower_seed_team,
            higher_seed_score, lower_seed_score, winning_team, source, seq, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
        ON CONFLICT(year, round, higher_seed_team, lower_seed_team) DO UPDATE SET
            higher_seed = excluded.higher_seed,
            lower_seed = excluded.lower_seed,
            higher_seed_score = excluded.higher_seed_score,
            lower_seed_score = excluded.lower_seed_score,
            winning_team = excluded.winning_team,
            source = excluded.source,
            seq = excluded.seq,
            updated_at = excluded.updated_at
        "#,
        params![
            m.year,
            m.round,
            m.higher_seed,
            m.higher_seed_team,
            m.lower_seed,
            m.lower_seed_team,
            m.higher_seed_score,
            m.lower_seed_score,
            m.winning_team,
            source,
            seq as i64,
            Utc::now().to_rfc3339(),
        ],
    )
    .context("upsert matchup")?;
    Ok(())
}

/// Stored matchups of one season in their original order.
pub fn load_season(conn: &Connection, year: i32) -> Result<Vec<Matchup>> {
    let mut stmt = conn
        .prepare(
            r#"
            SELECT
                year, round, higher_seed, higher_seed_team, lower_seed, lower_seed_team,
                higher_seed_score, lower_seed_score, winning_team
            FROM matchups
            WHERE year = ?1
            ORDER BY seq ASC
            "#,
        )
        .context("prepare load season query")?;

    let rows = stmt
        .query_map(params![year], |row| {
            Ok(Matchup {
                year: row.get(0)?,
                round: row.get(1)?,
                higher_seed: row.get(2)?,
                higher_seed_team: row.get(3)?,
                lower_seed: row.get(4)?,
                lower_seed_team: row.get(5)?,
                higher_seed_score: row.get(6)?,
                lower_seed_score: row.get(7)?,
                winning_team: row.get(8)?,
            })
        })
        .context("query load season")?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row.context("decode matchup row")?);
    }
    Ok(out)
}

pub fn stored_seasons(conn: &Connection) -> Result<Vec<i32>> {
    let mut stmt = conn
        .prepare("SELECT DISTINCT year FROM matchups ORDER BY year ASC")
        .context("prepare seasons query")?;
    let rows = stmt
        .query_map([], |row| row.get::<_, i32>(0))
        .context("query seasons")?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row.context("decode season")?);
    }
    Ok(out)
}
