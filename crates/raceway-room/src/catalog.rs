//! The fixed character roster and its tiers.

use raceway_protocol::{AllowedTiers, CharacterId, Tier};

/// Tier of every character, indexed by [`CharacterId`].
const TIERS: [Tier; 16] = [
    Tier::Normal,     // 0
    Tier::Normal,     // 1
    Tier::Normal,     // 2
    Tier::Normal,     // 3
    Tier::Normal,     // 4
    Tier::Normal,     // 5
    Tier::Normal,     // 6
    Tier::Odd,        // 7
    Tier::Odd,        // 8
    Tier::Odd,        // 9
    Tier::Normal,     // 10
    Tier::Normal,     // 11
    Tier::Normal,     // 12
    Tier::Hyperspeed, // 13
    Tier::Odd,        // 14
    Tier::Odd,        // 15
];

pub const CHARACTER_COUNT: usize = TIERS.len();

pub fn tier_of(character: CharacterId) -> Option<Tier> {
    TIERS.get(character as usize).copied()
}

/// Unknown characters are never allowed.
pub fn is_allowed(character: CharacterId, allowed: AllowedTiers) -> bool {
    tier_of(character).is_some_and(|tier| allowed.allows(tier))
}

/// Lowest-numbered character the filter accepts.
pub fn first_allowed(allowed: AllowedTiers) -> Option<CharacterId> {
    (0..CHARACTER_COUNT as CharacterId).find(|&c| is_allowed(c, allowed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_filter_has_a_character() {
        for filter in AllowedTiers::ALL {
            assert!(first_allowed(*filter).is_some(), "{filter}");
        }
        assert_eq!(first_allowed(AllowedTiers::HyperspeedOnly), Some(13));
        assert_eq!(first_allowed(AllowedTiers::OddOnly), Some(7));
    }

    #[test]
    fn test_unknown_character_is_rejected() {
        assert!(!is_allowed(16, AllowedTiers::All));
        assert!(is_allowed(13, AllowedTiers::All));
        assert!(!is_allowed(13, AllowedTiers::NoHyperspeed));
    }
}
