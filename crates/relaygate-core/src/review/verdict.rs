use serde::{Deserialize, Serialize};

use crate::error::ReviewError;

/// A reviewer's answer: `{score, issues[], suggestions[]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewVerdict {
    /// Clamped to 0-100 by [`parse_verdict`].
    pub score: f64,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

impl ReviewVerdict {
    pub fn score_u8(&self) -> u8 {
        self.score.round().clamp(0.0, 100.0) as u8
    }
}

/// Parse a reviewer response.
///
/// Accepts a bare JSON object, or one embedded in prose or a fenced block.
pub fn parse_verdict(response: &str) -> std::result::Result<ReviewVerdict, ReviewError> {
    let trimmed = response.trim();
    let verdict = serde_json::from_str::<ReviewVerdict>(trimmed).or_else(|first| {
        match (trimmed.find('{'), trimmed.rfind('}')) {
            (Some(start), Some(end)) if start < end => {
                serde_json::from_str::<ReviewVerdict>(&trimmed[start..=end])
                    .map_err(|e| ReviewError::Unparseable(e.to_string()))
            }
            _ => Err(ReviewError::Unparseable(first.to_string())),
        }
    })?;

    if !verdict.score.is_finite() {
        return Err(ReviewError::Unparseable("score is not a finite number".to_string()));
    }

    Ok(ReviewVerdict {
        score: verdict.score.clamp(0.0, 100.0),
        ..verdict
    })
}
