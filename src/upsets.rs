use serde::{Deserialize, Serialize};

use crate::matchup::Matchup;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsetSummary {
    pub winning_team: String,
    pub winning_seed: u8,
    pub losing_team: String,
    pub losing_seed: u8,
    pub winning_score: Option<u32>,
    pub losing_score: Option<u32>,
    pub round: u32,
}

impl UpsetSummary {
    fn from_matchup(m: &Matchup) -> Self {
        Self {
            winning_team: m.lower_seed_team.clone(),
            winning_seed: m.lower_seed,
            losing_team: m.higher_seed_team.clone(),
            losing_seed: m.higher_seed,
            winning_score: m.lower_seed_score,
            losing_score: m.higher_seed_score,
            round: m.round,
        }
    }
}

pub fn is_upset(m: &Matchup, min_gap: u8) -> bool {
    m.lower_seed_won() && m.seed_gap() >= min_gap
}

/// Games the lower seed won by a seed gap of at least `min_gap`, in source order.
pub fn extract_upsets(matchups: &[Matchup], min_gap: u8) -> Vec<UpsetSummary> {
    matchups
        .iter()
        .filter(|m| is_upset(m, min_gap))
        .map(UpsetSummary::from_matchup)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matchup::Participant;

    fn game(hi: (&str, u8, u32), lo: (&str, u8, u32), round: u32) -> Matchup {
        Matchup::from_participants(
            2021,
            round,
            Participant {
                team: hi.0.to_string(),
                seed: hi.1,
                score: Some(hi.2),
            },
            Participant {
                team: lo.0.to_string(),
                seed: lo.1,
                score: Some(lo.2),
            },
        )
        .expect("distinct seeds")
    }

    #[test]
    fn threshold_is_inclusive() {
        let games = vec![
            game(("Ohio St.", 2, 72), ("Oral Roberts", 15, 75), 64),
            game(("Tennessee", 5, 56), ("Oregon St.", 12, 70), 64),
            game(("Texas Tech", 6, 65), ("Utah St.", 11, 53), 64),
            game(("Villanova", 5, 73), ("Baylor", 10, 70), 64),
            game(("Oklahoma St.", 4, 70), ("Oregon St.", 12, 80), 32),
            game(("Clemson", 7, 54), ("Rutgers", 10, 60), 64),
            game(("Iowa", 2, 80), ("Oregon", 7, 95), 32),
        ];
        let upsets = extract_upsets(&games, 5);
        let winners: Vec<_> = upsets.iter().map(|u| u.winning_team.as_str()).collect();
        assert_eq!(winners, vec!["Oral Roberts", "Oregon St.", "Oregon St.", "Oregon"]);
        assert_eq!(upsets[0].winning_seed, 15);
        assert_eq!(upsets[0].losing_team, "Ohio St.");
        assert_eq!(upsets[0].winning_score, Some(75));
        assert_eq!(upsets[2].round, 32);
    }

    #[test]
    fn unplayed_games_are_never_upsets() {
        let mut m = game(("A", 1, 70), ("B", 16, 80), 64);
        m.winning_team = None;
        assert!(extract_upsets(&[m], 5).is_empty());
    }
}
