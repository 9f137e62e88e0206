//! Stage and tier rotation applied when a room returns to the lobby, and
//! the vote threshold for returning early.

use rand::Rng;
use raceway_protocol::{AllowedTiers, StageRotationMode, TierRotationMode};

/// Picks the stage for the next race.
///
/// `Random` never repeats `current` unless there is only one stage.
pub fn next_stage<R: Rng + ?Sized>(
    mode: StageRotationMode,
    current: u32,
    stage_count: u32,
    rng: &mut R,
) -> u32 {
    match mode {
        StageRotationMode::None => current,
        _ if stage_count == 0 => current,
        StageRotationMode::Sequenced => (current + 1) % stage_count,
        StageRotationMode::Random => {
            if stage_count == 1 {
                return 0;
            }
            // Draw from the other N-1 stages, skipping over `current`.
            let pick = rng.random_range(0..stage_count - 1);
            if pick >= current { pick + 1 } else { pick }
        }
    }
}

/// Picks the tier filter for the next race.
pub fn next_tiers<R: Rng + ?Sized>(
    mode: TierRotationMode,
    current: AllowedTiers,
    rng: &mut R,
) -> AllowedTiers {
    match mode {
        TierRotationMode::None => current,
        TierRotationMode::Cycle => match current {
            AllowedTiers::NormalOnly => AllowedTiers::OddOnly,
            AllowedTiers::OddOnly => AllowedTiers::HyperspeedOnly,
            _ => AllowedTiers::NormalOnly,
        },
        TierRotationMode::Random => match rng.random_range(0..3) {
            0 => AllowedTiers::NormalOnly,
            1 => AllowedTiers::OddOnly,
            _ => AllowedTiers::HyperspeedOnly,
        },
        // 10 : 3 : 1
        TierRotationMode::WeightedRandom => match rng.random_range(0..14) {
            0..10 => AllowedTiers::NormalOnly,
            10..13 => AllowedTiers::OddOnly,
            _ => AllowedTiers::HyperspeedOnly,
        },
    }
}

/// Votes needed to return to the lobby: `ceil(clients * ratio)`.
pub fn votes_required(clients: usize, ratio: f64) -> usize {
    // Nudge down so 5 * 0.6 = 3.0000000000000004 still needs 3.
    (clients as f64 * ratio - 1e-9).ceil().max(0.0) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_sequenced_wraps() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(next_stage(StageRotationMode::Sequenced, 2, 5, &mut rng), 3);
        assert_eq!(next_stage(StageRotationMode::Sequenced, 4, 5, &mut rng), 0);
        assert_eq!(next_stage(StageRotationMode::None, 4, 5, &mut rng), 4);
    }

    #[test]
    fn test_random_never_repeats_and_covers_the_rest() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut seen = [false; 5];
        let mut current = 0;
        for _ in 0..500 {
            let next = next_stage(StageRotationMode::Random, current, 5, &mut rng);
            assert_ne!(next, current);
            assert!(next < 5);
            seen[next as usize] = true;
            current = next;
        }
        assert!(seen.iter().all(|s| *s));
        assert_eq!(next_stage(StageRotationMode::Random, 0, 1, &mut rng), 0);
    }

    #[test]
    fn test_tier_cycle() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut tiers = AllowedTiers::All;
        let mut order = Vec::new();
        for _ in 0..4 {
            tiers = next_tiers(TierRotationMode::Cycle, tiers, &mut rng);
            order.push(tiers);
        }
        assert_eq!(
            order,
            vec![
                AllowedTiers::NormalOnly,
                AllowedTiers::OddOnly,
                AllowedTiers::HyperspeedOnly,
                AllowedTiers::NormalOnly,
            ]
        );
    }

    #[test]
    fn test_weighted_random_favours_normal() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut normal = 0;
        let mut hyper = 0;
        for _ in 0..2800 {
            match next_tiers(TierRotationMode::WeightedRandom, AllowedTiers::All, &mut rng) {
                AllowedTiers::NormalOnly => normal += 1,
                AllowedTiers::HyperspeedOnly => hyper += 1,
                _ => {}
            }
        }
        assert!(normal > 1800 && normal < 2200, "normal = {normal}");
        assert!(hyper > 120 && hyper < 290, "hyper = {hyper}");
    }

    #[test]
    fn test_votes_required() {
        assert_eq!(votes_required(5, 0.6), 3);
        assert_eq!(votes_required(5, 1.0), 5);
        assert_eq!(votes_required(4, 0.5), 2);
        assert_eq!(votes_required(3, 0.5), 2);
        assert_eq!(votes_required(3, 0.0), 0);
    }
}
