//! Signals fed into a cycle from outside the pipeline: evaluation results
//! of the agent's recent work and suggestions from its knowledge base.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

fn default_score() -> f64 {
    0.5
}

fn default_trend() -> String {
    "stable".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationInsights {
    #[serde(default = "default_score")]
    pub recent_average_score: f64,
    #[serde(default = "default_score")]
    pub confidence_level: f64,
    #[serde(default = "default_trend")]
    pub score_trend: String,
    #[serde(default)]
    pub common_weaknesses: Vec<String>,
}

impl Default for EvaluationInsights {
    fn default() -> Self {
        Self {
            recent_average_score: default_score(),
            confidence_level: default_score(),
            score_trend: default_trend(),
            common_weaknesses: Vec::new(),
        }
    }
}

impl EvaluationInsights {
    pub fn new(recent_average_score: f64, confidence_level: f64) -> Self {
        Self {
            recent_average_score,
            confidence_level,
            ..Self::default()
        }
    }

    pub fn with_weaknesses(mut self, weaknesses: &[&str]) -> Self {
        self.common_weaknesses = weaknesses.iter().map(|w| w.to_string()).collect();
        self
    }

    /// Improvement areas named by the recorded weaknesses, first match
    /// per weakness, in order.
    pub fn improvement_areas(&self) -> Vec<String> {
        let mut areas = Vec::new();
        for weakness in &self.common_weaknesses {
            let w = weakness.to_lowercase();
            let area = if w.contains("accuracy") {
                "response_accuracy"
            } else if w.contains("completeness") {
                "response_completeness"
            } else if w.contains("clarity") {
                "response_clarity"
            } else if w.contains("efficiency") {
                "processing_efficiency"
            } else {
                continue;
            };
            if !areas.iter().any(|a| a == area) {
                areas.push(area.to_string());
            }
        }
        areas
    }
}

/// A knowledge-base suggestion about the agent's own code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeSuggestion {
    pub message: String,
    #[serde(default = "default_score")]
    pub priority: f64,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub file_path: Option<PathBuf>,
}

impl KnowledgeSuggestion {
    pub fn new(message: &str, priority: f64) -> Self {
        Self {
            message: message.to_string(),
            priority,
            category: None,
            tags: Vec::new(),
            file_path: None,
        }
    }

    pub fn with_category(mut self, category: &str) -> Self {
        self.category = Some(category.to_string());
        self
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    /// Category and tags, lowercased, for keyword matching.
    pub fn keywords(&self) -> Vec<String> {
        self.category
            .iter()
            .chain(self.tags.iter())
            .map(|s| s.to_lowercase())
            .collect()
    }
}
