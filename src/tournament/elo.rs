//! Elo rating math.

use crate::types::Verdict;

/// Default K-factor.
pub const DEFAULT_K_FACTOR: f64 = 32.0;

/// Probability that a player rated `rating` beats one rated `opponent`.
pub fn expected_score(rating: f64, opponent: f64) -> f64 {
    1.0 / (1.0 + 10f64.powf((opponent - rating) / 400.0))
}

/// New `(winner, loser)` ratings after a decisive match.
pub fn decisive(winner: f64, loser: f64, k: f64) -> (f64, f64) {
    let expected_winner = expected_score(winner, loser);
    let expected_loser = expected_score(loser, winner);
    (
        winner + k * (1.0 - expected_winner),
        loser + k * (0.0 - expected_loser),
    )
}

/// New `(a, b)` ratings for a verdict. A tie leaves both unchanged.
pub fn rate(a: f64, b: f64, verdict: Verdict, k: f64) -> (f64, f64) {
    match verdict {
        Verdict::A => decisive(a, b, k),
        Verdict::B => {
            let (new_b, new_a) = decisive(b, a, k);
            (new_a, new_b)
        }
        Verdict::Tie => (a, b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_even_match() {
        let (a, b) = rate(1200.0, 1200.0, Verdict::A, 32.0);
        assert_eq!(a, 1216.0);
        assert_eq!(b, 1184.0);
    }

    #[rstest]
    #[case(1200.0, 1200.0, Verdict::A)]
    #[case(1500.0, 1100.0, Verdict::B)]
    #[case(900.0, 1700.0, Verdict::A)]
    #[case(1312.5, 1287.25, Verdict::B)]
    fn test_zero_sum(#[case] a: f64, #[case] b: f64, #[case] verdict: Verdict) {
        let (na, nb) = rate(a, b, verdict, DEFAULT_K_FACTOR);
        assert!(((na - a) + (nb - b)).abs() < 1e-9);
    }

    #[test]
    fn test_tie_changes_nothing() {
        assert_eq!(rate(1400.0, 1100.0, Verdict::Tie, 32.0), (1400.0, 1100.0));
    }

    #[test]
    fn test_upset_moves_more_than_expected_win() {
        let (underdog, _) = decisive(1000.0, 1400.0, 32.0);
        let (favorite, _) = decisive(1400.0, 1000.0, 32.0);
        assert!(underdog - 1000.0 > favorite - 1400.0);
    }
}
