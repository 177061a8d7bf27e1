use serde::{Deserialize, Serialize};

/// Cosine-similarity cutoffs for the vector concept matcher (spec.md §4.D).
/// `merge >= suggest` is enforced by `AppConfig::from_env` — a misconfigured
/// pair would make every ambiguous match collapse into an automatic merge.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MatchThresholds {
    pub merge: f32,
    pub suggest: f32,
}

impl Default for MatchThresholds {
    fn default() -> Self {
        Self {
            merge: 0.85,
            suggest: 0.60,
        }
    }
}

impl MatchThresholds {
    pub fn from_env() -> Self {
        let merge = std::env::var("MATCH_MERGE_THRESHOLD")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0.85);
        let suggest = std::env::var("MATCH_SUGGEST_THRESHOLD")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0.60);
        let thresholds = Self { merge, suggest };
        thresholds.validate();
        thresholds
    }

    fn validate(&self) {
        if self.merge < self.suggest {
            tracing::warn!(
                merge = self.merge,
                suggest = self.suggest,
                "MATCH_MERGE_THRESHOLD below MATCH_SUGGEST_THRESHOLD, ambiguous matches will never occur"
            );
        }
    }
}
