use std::path::PathBuf;

use bracket_upsets::config::PipelineConfig;
use bracket_upsets::features::{EligibilityFilter, SEED_DIFF, build_feature_rows};
use bracket_upsets::matchup::{Matchup, Participant, load_matchups};
use bracket_upsets::pipeline::{DataLayout, collect_feature_rows, load_stats_table};

fn fixture_layout() -> DataLayout {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests");
    path.push("fixtures");
    path.push("data");
    DataLayout::new(path)
}

fn side(team: &str, seed: u8, score: u32) -> Participant {
    Participant {
        team: team.to_string(),
        seed,
        score: Some(score),
    }
}

#[test]
fn stats_table_is_an_inner_join_without_ignored_columns() {
    let table = load_stats_table(&fixture_layout(), 2019).expect("stats fixtures");
    assert_eq!(table.len(), 7);
    assert!(!table.contains("Purdue"));
    assert!(!table.contains("Iona"));

    let columns: Vec<&str> = table.columns().collect();
    for dropped in ["Blk_pct", "Stl_pct", "2P_pct", "eFG_pct_off", "conf"] {
        assert!(!columns.contains(&dropped), "{dropped} should be dropped");
    }
    assert!(columns.contains(&"adjOE"));
    assert!(columns.contains(&"TO_pct_off"));

    let marquette = table.get("Marquette").expect("joined");
    assert_eq!(marquette.value("A_pct"), None);
    assert!(!marquette.is_complete());
    assert_eq!(
        table.get("Virginia").and_then(|t| t.conference.as_deref()),
        Some("ACC")
    );
}

#[test]
fn season_rows_from_fixture_files() {
    let layout = fixture_layout();
    let rows = collect_feature_rows(&layout, &[2019, 2020], &PipelineConfig::default())
        .expect("features");
    let pairs: Vec<(&str, &str)> = rows
        .iter()
        .map(|r| (r.hi_team.as_str(), r.lo_team.as_str()))
        .collect();
    assert_eq!(
        pairs,
        vec![
            ("Virginia", "Gardner Webb"),
            ("Wisconsin", "Oregon"),
            ("Florida St.", "Murray St."),
            ("Virginia", "Oregon"),
        ]
    );

    let oregon = &rows[1];
    assert_eq!(oregon.upset, 1);
    assert_eq!(oregon.value("delta_adjOE"), Some(109.0 - 110.9));
    assert_eq!(oregon.value("delta_adjDE"), Some(91.9 - 91.7));
    assert_eq!(oregon.value("3PA_pct_hi"), Some(37.0));
    assert_eq!(oregon.value("3PA_pct_lo"), Some(33.1));
    assert_eq!(oregon.value(SEED_DIFF), Some(7.0));
    assert!(rows.iter().all(|r| r.features.len() == oregon.features.len()));
}

#[test]
fn round_cutoff_excludes_regional_final() {
    let layout = fixture_layout();
    let table = load_stats_table(&layout, 2019).expect("stats");
    let filter = EligibilityFilter::from_config(&PipelineConfig::default());

    let elite_eight =
        Matchup::from_participants(2019, 8, side("Virginia", 1, 60), side("Oregon", 16, 70))
            .expect("distinct seeds");
    assert!(build_feature_rows(&table, &[elite_eight], filter).is_empty());

    let second_round =
        Matchup::from_participants(2019, 32, side("Virginia", 1, 60), side("Oregon", 16, 70))
            .expect("distinct seeds");
    let rows = build_feature_rows(&table, &[second_round], filter);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].upset, 1);
}

#[test]
fn rows_only_reference_teams_in_the_stats_table() {
    let layout = fixture_layout();
    let table = load_stats_table(&layout, 2019).expect("stats");
    let matchups = load_matchups(&layout.matchups(2019)).expect("matchups");
    let rows = build_feature_rows(&table, &matchups, EligibilityFilter::default());
    for row in &rows {
        let hi = table.get(&row.hi_team).expect("hi team in table");
        let lo = table.get(&row.lo_team).expect("lo team in table");
        for column in table.columns() {
            if let Some(delta) = row.value(&format!("delta_{column}")) {
                let expected = lo.value(column).unwrap_or(f64::NAN)
                    - hi.value(column).unwrap_or(f64::NAN);
                assert_eq!(delta, expected);
            }
        }
    }
}
