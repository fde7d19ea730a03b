use bracket_upsets::calibration::{IsotonicCalibrator, stratified_folds};
use bracket_upsets::matchup::{Matchup, Participant};
use bracket_upsets::upsets::extract_upsets;
use proptest::prelude::*;

fn participant(team: &str, seed: u8, score: Option<u32>) -> Participant {
    Participant {
        team: team.to_string(),
        seed,
        score,
    }
}

prop_compose! {
    fn arb_matchup()(
        seed_a in 1u8..=16,
        seed_b in 1u8..=16,
        score_a in proptest::option::of(40u32..110),
        score_b in proptest::option::of(40u32..110),
        round in prop::sample::select(vec![64u32, 32, 16, 8]),
    ) -> Option<Matchup> {
        Matchup::from_participants(
            2019,
            round,
            participant("A", seed_a, score_a),
            participant("B", seed_b, score_b),
        )
        .ok()
    }
}

proptest! {
    #[test]
    fn orientation_and_winner_follow_seeds_and_scores(
        seed_a in 1u8..=16,
        seed_b in 1u8..=16,
        score_a in 40u32..110,
        score_b in 40u32..110,
    ) {
        let game = Matchup::from_participants(
            2019,
            64,
            participant("A", seed_a, Some(score_a)),
            participant("B", seed_b, Some(score_b)),
        );
        match game {
            Err(_) => prop_assert_eq!(seed_a, seed_b),
            Ok(m) => {
                prop_assert!(m.higher_seed < m.lower_seed);
                prop_assert_eq!(m.higher_seed, seed_a.min(seed_b));
                let expected = if score_a > score_b {
                    Some("A")
                } else if score_b > score_a {
                    Some("B")
                } else {
                    None
                };
                prop_assert_eq!(m.winning_team.as_deref(), expected);
            }
        }
    }

    #[test]
    fn upsets_are_lower_seed_wins_with_wide_gaps(
        games in prop::collection::vec(arb_matchup(), 0..40),
        min_gap in 1u8..10,
    ) {
        let games: Vec<Matchup> = games.into_iter().flatten().collect();
        let upsets = extract_upsets(&games, min_gap);
        let expected = games
            .iter()
            .filter(|m| m.lower_seed_won() && m.seed_gap() >= min_gap)
            .count();
        prop_assert_eq!(upsets.len(), expected);
        for u in &upsets {
            prop_assert!(u.winning_seed > u.losing_seed);
            prop_assert!(u.winning_seed - u.losing_seed >= min_gap);
        }
    }

    #[test]
    fn isotonic_map_is_monotone_and_bounded(
        samples in prop::collection::vec((0.0f64..1.0, any::<bool>()), 1..80),
        points in prop::collection::vec(-0.5f64..1.5, 2..20),
    ) {
        let (scores, outcomes): (Vec<f64>, Vec<bool>) = samples.into_iter().unzip();
        let calibrator = IsotonicCalibrator::fit(&scores, &outcomes);
        let mut points = points;
        points.sort_by(f64::total_cmp);
        let mapped: Vec<f64> = points.iter().map(|p| calibrator.predict(*p)).collect();
        for pair in mapped.windows(2) {
            prop_assert!(pair[0] <= pair[1] + 1e-12);
        }
        prop_assert!(mapped.iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn folds_preserve_class_counts(
        labels in prop::collection::vec(0u8..=1, 10..120),
        k in 2usize..6,
        seed in any::<u64>(),
    ) {
        let folds = stratified_folds(&labels, k, seed);
        prop_assert_eq!(folds.len(), labels.len());
        prop_assert!(folds.iter().all(|f| *f < k));
        for class in [0u8, 1u8] {
            let total = labels.iter().filter(|l| **l == class).count();
            let mut per_fold = vec![0usize; k];
            for (label, fold) in labels.iter().zip(&folds) {
                if *label == class {
                    per_fold[*fold] += 1;
                }
            }
            let lo = per_fold.iter().copied().min().unwrap_or(0);
            let hi = per_fold.iter().copied().max().unwrap_or(0);
            prop_assert!(hi - lo <= 1, "class {} spread {:?} of {}", class, per_fold, total);
        }
    }
}
