use std::collections::HashMap;

use crate::utils::squash_whitespace;

pub const DEFAULT_RANK: u32 = 99;

const DEFAULT_RANKS: &[(&str, u32)] = &[
    ("SOUTH LA", 1),
    ("CHESTERFIELD SQUARE", 1),
    ("EAST VALLEY", 2),
    ("WEST VALLEY", 3),
    ("NORTH CENTRAL", 4),
    ("WEST LA", 5),
    ("WEST LOS ANGELES", 5),
    ("HARBOR", 6),
    ("SAN PEDRO", 6),
    ("BALDWIN PARK", 7),
    ("DOWNEY", 8),
    ("CARSON", 9),
    ("CARSON-GARDENA", 9),
    ("LANCASTER", 10),
    ("PALMDALE", 11),
    ("AGOURA", 12),
    ("CASTAIC", 13),
];

pub fn default_table() -> HashMap<String, u32> {
    DEFAULT_RANKS
        .iter()
        .map(|(name, rank)| (name.to_string(), *rank))
        .collect()
}

/// Shelter name → display priority. Lower ranks sort first.
#[derive(Debug, Clone, Default)]
pub struct ShelterRanks {
    ranks: HashMap<String, u32>,
}

impl ShelterRanks {
    pub fn new(table: &HashMap<String, u32>) -> Self {
        Self {
            ranks: table.iter().map(|(k, v)| (key(k), *v)).collect(),
        }
    }

    pub fn rank_of(&self, shelter: &str) -> u32 {
        self.ranks.get(&key(shelter)).copied().unwrap_or(DEFAULT_RANK)
    }
}

fn key(name: &str) -> String {
    squash_whitespace(name).to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranks() -> ShelterRanks {
        ShelterRanks::new(&default_table())
    }

    #[test]
    fn lookup_ignores_case_and_spacing() {
        let r = ranks();
        assert_eq!(r.rank_of("SOUTH LA"), 1);
        assert_eq!(r.rank_of("south la"), 1);
        assert_eq!(r.rank_of("  South   LA "), 1);
    }

    #[test]
    fn spellings_share_a_rank() {
        let r = ranks();
        assert_eq!(r.rank_of("Harbor"), r.rank_of("San Pedro"));
        assert_eq!(r.rank_of("West LA"), r.rank_of("West Los Angeles"));
    }

    #[test]
    fn unknown_shelter_gets_default() {
        assert_eq!(ranks().rank_of("Somewhere Else"), DEFAULT_RANK);
        assert_eq!(ranks().rank_of(""), DEFAULT_RANK);
    }
}
