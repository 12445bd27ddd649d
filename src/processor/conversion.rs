use std::collections::HashMap;

use super::errors::ProcessError;
use crate::scores::ScoreSubmission;

/// Well-known ruleset ids, matching the submission pipeline's encoding.
pub mod ruleset {
    pub const OSU: u16 = 0;
    pub const TAIKO: u16 = 1;
    pub const CATCH: u16 = 2;
    pub const MANIA: u16 = 3;
}

/// A pure standardised-to-classic conversion for one ruleset.
///
/// Must be deterministic: identical submissions always yield the same
/// value, since reverts recompute it to undo earlier contributions.
pub type ClassicConverter = fn(&ScoreSubmission) -> u64;

const MAX_STANDARDISED_SCORE: f64 = 1_000_000.0;

// The per-ruleset constants are historical artifacts of the legacy
// scoring curves. The values aren't meant to be human-explainable; the
// canary tests below pin them down.

fn osu_classic(score: &ScoreSubmission) -> u64 {
    let objects = score.statistics.object_count() as f64;
    let scaled =
        (objects * objects * 32.57 + 100_000.0) * score.total_score as f64 / MAX_STANDARDISED_SCORE;
    scaled.round_ties_even() as u64
}

fn taiko_classic(score: &ScoreSubmission) -> u64 {
    let objects = score.statistics.object_count() as f64;
    let scaled =
        (objects * 1_109.0 + 100_000.0) * score.total_score as f64 / MAX_STANDARDISED_SCORE;
    scaled.round_ties_even() as u64
}

fn catch_classic(score: &ScoreSubmission) -> u64 {
    let objects = score.statistics.object_count() as f64;
    let fraction = score.total_score as f64 / MAX_STANDARDISED_SCORE;
    let scaled = (fraction * objects).powi(2) * 21.62 + score.total_score as f64 / 10.0;
    scaled.round_ties_even() as u64
}

fn mania_classic(score: &ScoreSubmission) -> u64 {
    u64::from(score.total_score)
}

/// Lookup table of classic converters keyed by ruleset id.
pub struct ConverterRegistry {
    converters: HashMap<u16, ClassicConverter>,
}

impl Default for ConverterRegistry {
    fn default() -> Self {
        let mut registry = Self {
            converters: HashMap::new(),
        };
        registry.register(ruleset::OSU, osu_classic);
        registry.register(ruleset::TAIKO, taiko_classic);
        registry.register(ruleset::CATCH, catch_classic);
        registry.register(ruleset::MANIA, mania_classic);
        registry
    }
}

impl ConverterRegistry {
    /// A registry with no converters at all. Useful for tests; production
    /// code wants `ConverterRegistry::default()`.
    pub fn empty() -> Self {
        Self {
            converters: HashMap::new(),
        }
    }

    pub fn register(&mut self, ruleset_id: u16, converter: ClassicConverter) {
        self.converters.insert(ruleset_id, converter);
    }

    pub fn convert(&self, score: &ScoreSubmission) -> Result<u64, ProcessError> {
        let converter =
            self.converters
                .get(&score.ruleset_id)
                .ok_or(ProcessError::UnsupportedRuleset {
                    ruleset_id: score.ruleset_id,
                })?;
        Ok(converter(score))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scores::{HitResult, HitStatistics};
    use chrono::Utc;
    use rstest::rstest;

    fn submission(ruleset_id: u16, total_score: u32, statistics: HitStatistics) -> ScoreSubmission {
        ScoreSubmission {
            score_id: 1,
            user_id: 2,
            beatmap_id: 100,
            ruleset_id,
            passed: true,
            ranked: true,
            statistics,
            accuracy: 1.0,
            max_combo: 5,
            total_score,
            created_at: Utc::now(),
        }
    }

    fn reference_statistics() -> HitStatistics {
        [(HitResult::Great, 5)].into_iter().collect()
    }

    // Canary values: if these ever change, either the conversion curve
    // moved on purpose (update the expectations) or the wrong ruleset's
    // converter was picked up (a bug).
    #[rstest]
    #[case(ruleset::OSU, 10081)]
    #[case(ruleset::TAIKO, 10554)]
    #[case(ruleset::CATCH, 10005)]
    #[case(ruleset::MANIA, 100_000)]
    fn reference_submission_converts_to_classic(#[case] ruleset_id: u16, #[case] expected: u64) {
        let registry = ConverterRegistry::default();
        let score = submission(ruleset_id, 100_000, reference_statistics());
        assert_eq!(registry.convert(&score).unwrap(), expected);
    }

    #[test]
    fn reduced_submission_converts_to_classic() {
        let registry = ConverterRegistry::default();
        let statistics: HitStatistics =
            [(HitResult::Perfect, 0), (HitResult::Ok, 5)].into_iter().collect();
        let score = submission(ruleset::OSU, 50_000, statistics);
        assert_eq!(registry.convert(&score).unwrap(), 5041);
    }

    #[test]
    fn conversion_is_deterministic() {
        let registry = ConverterRegistry::default();
        let score = submission(ruleset::OSU, 100_000, reference_statistics());

        let first = registry.convert(&score).unwrap();
        for _ in 0..10 {
            assert_eq!(registry.convert(&score).unwrap(), first);
        }
    }

    #[test]
    fn unknown_ruleset_is_rejected() {
        let registry = ConverterRegistry::default();
        let score = submission(99, 100_000, reference_statistics());

        let result = registry.convert(&score);
        assert!(matches!(
            result,
            Err(ProcessError::UnsupportedRuleset { ruleset_id: 99 })
        ));
    }

    #[test]
    fn custom_converter_can_be_registered() {
        let mut registry = ConverterRegistry::empty();
        registry.register(7, |score| u64::from(score.total_score) * 2);

        let score = submission(7, 100, reference_statistics());
        assert_eq!(registry.convert(&score).unwrap(), 200);
    }
}
