use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::insights::EvaluationInsights;

/// Policy deciding whether validated proposals land without a human.
///
/// Open only on strong, confident evidence of regression: a recent score
/// below `max_score` with confidence above `min_confidence`, and
/// self-modification enabled.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AutoApplyGate {
    pub max_score: f64,
    pub min_confidence: f64,
    pub enabled: bool,
}

impl AutoApplyGate {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_score: config.policy.auto_apply_max_score,
            min_confidence: config.policy.auto_apply_min_confidence,
            enabled: config.pipeline.enable_self_modification,
        }
    }

    pub fn allows(&self, insights: &EvaluationInsights) -> bool {
        self.enabled
            && insights.recent_average_score < self.max_score
            && insights.confidence_level > self.min_confidence
    }

    /// Why the gate is closed, for reports.
    pub fn closed_reason(&self, insights: &EvaluationInsights) -> Option<String> {
        if !self.enabled {
            return Some("self-modification disabled".to_string());
        }
        if insights.recent_average_score >= self.max_score {
            return Some(format!(
                "recent score {:.2} is not below {:.2}",
                insights.recent_average_score, self.max_score
            ));
        }
        if insights.confidence_level <= self.min_confidence {
            return Some(format!(
                "confidence {:.2} is not above {:.2}",
                insights.confidence_level, self.min_confidence
            ));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_requires_confident_regression() {
        let gate = AutoApplyGate::from_config(&Config::default());
        assert!(gate.allows(&EvaluationInsights::new(0.55, 0.85)));
        assert!(!gate.allows(&EvaluationInsights::new(0.55, 0.5)));
        assert!(!gate.allows(&EvaluationInsights::new(0.6, 0.9)));
        assert!(!gate.allows(&EvaluationInsights::new(0.5, 0.8)));
    }

    #[test]
    fn test_disabled_gate_never_opens() {
        let mut config = Config::default();
        config.pipeline.enable_self_modification = false;
        let gate = AutoApplyGate::from_config(&config);
        let insights = EvaluationInsights::new(0.1, 0.99);
        assert!(!gate.allows(&insights));
        assert_eq!(
            gate.closed_reason(&insights).as_deref(),
            Some("self-modification disabled")
        );
    }

    #[test]
    fn test_closed_reason_matches_allows() {
        let gate = AutoApplyGate::from_config(&Config::default());
        for (score, conf) in [(0.55, 0.85), (0.55, 0.5), (0.9, 0.9)] {
            let insights = EvaluationInsights::new(score, conf);
            assert_eq!(gate.allows(&insights), gate.closed_reason(&insights).is_none());
        }
    }
}
