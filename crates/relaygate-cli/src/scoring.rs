//! Weighted aggregate scoring used by the `pipeline` command.

use std::collections::BTreeMap;

use relaygate_core::scoring::hard_stages_passed;
use relaygate_core::{AggregateScore, ScoringPolicy, StageName, StageResult, StageToggles, StageWeights};

/// Weighted mean of the enabled stages' scores.
///
/// An enabled stage that never executed (because an earlier gate stopped the
/// run) contributes zero. Disabled stages are left out entirely. The run
/// passes when the mean reaches `pass_score` and every enabled hard stage
/// passed.
#[derive(Debug, Clone, Copy, Default)]
pub struct WeightedScorer;

impl ScoringPolicy for WeightedScorer {
    fn score(
        &self,
        stages: &BTreeMap<StageName, StageResult>,
        toggles: &StageToggles,
        weights: &StageWeights,
        pass_score: u8,
    ) -> AggregateScore {
        let mut weighted = 0u64;
        let mut total_weight = 0u64;

        for (name, result) in stages.iter().filter(|(name, _)| toggles.is_enabled(**name)) {
            let weight = u64::from(weights.weight(*name));
            total_weight += weight;
            if result.executed {
                weighted += weight * u64::from(result.score);
            }
        }

        let score = if total_weight == 0 {
            100
        } else {
            (weighted / total_weight).min(100) as u8
        };

        AggregateScore {
            score,
            passed: score >= pass_score && hard_stages_passed(stages, toggles),
        }
    }
}
