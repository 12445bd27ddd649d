use serde::{Deserialize, Serialize};
use strum_macros::{Display, FromRepr};

/// Community approval state of a beatmap, as carried by the beatmap
/// catalog. Codes match the catalog's `approved` column.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, FromRepr,
)]
#[repr(i16)]
#[serde(rename_all = "snake_case")]
pub enum RankedStatus {
    Graveyard = -2,
    Wip = -1,
    Pending = 0,
    Ranked = 1,
    Approved = 2,
    Qualified = 3,
    Loved = 4,
}

impl RankedStatus {
    /// Only these states let scores on the beatmap count toward ranked
    /// score. Qualified maps are explicitly excluded until they rank.
    pub fn awards_ranked_score(self) -> bool {
        matches!(
            self,
            RankedStatus::Ranked | RankedStatus::Approved | RankedStatus::Loved
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(RankedStatus::Graveyard, false)]
    #[case(RankedStatus::Wip, false)]
    #[case(RankedStatus::Pending, false)]
    #[case(RankedStatus::Qualified, false)]
    #[case(RankedStatus::Ranked, true)]
    #[case(RankedStatus::Approved, true)]
    #[case(RankedStatus::Loved, true)]
    fn ranked_score_eligibility(#[case] status: RankedStatus, #[case] expected: bool) {
        assert_eq!(status.awards_ranked_score(), expected);
    }

    #[test]
    fn status_codes_round_trip() {
        assert_eq!(RankedStatus::from_repr(-2), Some(RankedStatus::Graveyard));
        assert_eq!(RankedStatus::from_repr(1), Some(RankedStatus::Ranked));
        assert_eq!(RankedStatus::from_repr(4), Some(RankedStatus::Loved));
        assert_eq!(RankedStatus::from_repr(9), None);
    }
}
