//! Aggregate scoring seam.
//!
//! The pipeline assembles per-stage results and hands them to a
//! [`ScoringPolicy`] for the final number and pass decision. Implementations
//! must exclude disabled stages and must fail the run when any enabled hard
//! stage (compile or tests) failed.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::{StageToggles, StageWeights};
use crate::domain::{StageName, StageResult};

/// Aggregate 0-100 score and pass decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateScore {
    pub score: u8,
    pub passed: bool,
}

pub trait ScoringPolicy: Send + Sync {
    fn score(
        &self,
        stages: &BTreeMap<StageName, StageResult>,
        toggles: &StageToggles,
        weights: &StageWeights,
        pass_score: u8,
    ) -> AggregateScore;
}

/// True when every enabled hard stage present in `stages` passed.
pub fn hard_stages_passed(
    stages: &BTreeMap<StageName, StageResult>,
    toggles: &StageToggles,
) -> bool {
    stages
        .iter()
        .filter(|(name, _)| name.is_hard() && toggles.is_enabled(**name))
        .all(|(_, r)| r.passed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hard_stages_ignore_disabled() {
        let mut stages = BTreeMap::new();
        stages.insert(StageName::Compile, StageResult::pass(100));
        stages.insert(StageName::Tests, StageResult::fail(0, vec!["boom".into()]));

        let mut toggles = StageToggles::default();
        assert!(!hard_stages_passed(&stages, &toggles));

        toggles.tests = false;
        assert!(hard_stages_passed(&stages, &toggles));
    }

    #[test]
    fn test_review_failures_are_not_hard() {
        let mut stages = BTreeMap::new();
        stages.insert(StageName::Simplicity, StageResult::fail(10, vec![]));
        assert!(hard_stages_passed(&stages, &StageToggles::default()));
    }
}
