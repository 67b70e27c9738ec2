//! Opportunity derivation, improvement potential and recommendations.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use super::metrics::{CodebaseSnapshot, FunctionMetrics, FunctionRef, ModuleMetrics};
use crate::config::AnalysisConfig;
use crate::insights::{EvaluationInsights, KnowledgeSuggestion};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpportunityKind {
    ComplexityReduction,
    PerformanceImprovement,
    ErrorHandling,
    KnowledgeBased,
}

impl OpportunityKind {
    pub const ALL: [OpportunityKind; 4] = [
        OpportunityKind::ComplexityReduction,
        OpportunityKind::PerformanceImprovement,
        OpportunityKind::ErrorHandling,
        OpportunityKind::KnowledgeBased,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OpportunityKind::ComplexityReduction => "complexity_reduction",
            OpportunityKind::PerformanceImprovement => "performance_improvement",
            OpportunityKind::ErrorHandling => "error_handling",
            OpportunityKind::KnowledgeBased => "knowledge_based",
        }
    }
}

impl fmt::Display for OpportunityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OpportunityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OpportunityKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown opportunity kind: {}", s))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImprovementOpportunity {
    pub kind: OpportunityKind,
    pub priority: f64,
    pub description: String,
    pub suggested_action: String,
    /// Functions the change should focus on, most important first
    pub targets: Vec<FunctionRef>,
    /// Every function the finding applies to
    #[serde(default)]
    pub affected: Vec<FunctionRef>,
    pub module: Option<PathBuf>,
    #[serde(default)]
    pub improvement_areas: Vec<String>,
    pub category: Option<String>,
}

impl ImprovementOpportunity {
    fn new(kind: OpportunityKind, priority: f64, description: String, suggested_action: &str) -> Self {
        Self {
            kind,
            priority,
            description,
            suggested_action: suggested_action.to_string(),
            targets: Vec::new(),
            affected: Vec::new(),
            module: None,
            improvement_areas: Vec::new(),
            category: None,
        }
    }

    /// File a proposal for this opportunity would rewrite.
    pub fn target_file(&self) -> Option<&Path> {
        self.module
            .as_deref()
            .or_else(|| self.targets.first().map(|t| t.module.as_path()))
    }
}

/// First element with the strictly greatest key.
fn first_max_by<'a, T, K, F>(items: impl Iterator<Item = &'a T>, key: F) -> Option<&'a T>
where
    T: 'a,
    K: PartialOrd,
    F: Fn(&T) -> K,
{
    let mut best: Option<(&T, K)> = None;
    for item in items {
        let k = key(item);
        match &best {
            Some((_, bk)) if !(k > *bk) => {}
            _ => best = Some((item, k)),
        }
    }
    best.map(|(item, _)| item)
}

fn highest_complexity(snapshot: &CodebaseSnapshot) -> Option<FunctionRef> {
    first_max_by(
        snapshot.functions().collect::<Vec<_>>().iter(),
        |(_, f): &(&ModuleMetrics, &FunctionMetrics)| f.complexity,
    )
    .map(|(m, f)| FunctionRef::new(&m.path, f))
}

fn most_loops(snapshot: &CodebaseSnapshot) -> Option<FunctionRef> {
    let all: Vec<_> = snapshot.functions().collect();
    first_max_by(all.iter(), |(_, f)| f.loop_count)
        .filter(|(_, f)| f.loop_count > 0)
        .map(|(m, f)| FunctionRef::new(&m.path, f))
        .or_else(|| highest_complexity(snapshot))
}

fn weakest_error_coverage(snapshot: &CodebaseSnapshot, min_functions: usize) -> Option<&ModuleMetrics> {
    let candidates = snapshot
        .modules
        .iter()
        .filter(|m| m.functions.len() > min_functions);
    // lowest coverage wins, so maximise the negation
    first_max_by(candidates, |m| -m.error_handling_coverage())
}

fn knowledge_target(snapshot: &CodebaseSnapshot, suggestion: &KnowledgeSuggestion) -> Option<PathBuf> {
    if let Some(module) = suggestion
        .file_path
        .as_deref()
        .and_then(|p| snapshot.module(p))
    {
        return Some(module.path.clone());
    }

    let keywords = suggestion.keywords();
    let mentions = |needle: &str| keywords.iter().any(|k| k.contains(needle));
    let with_functions = || snapshot.modules.iter().filter(|m| !m.functions.is_empty());

    let module = if mentions("doc") {
        first_max_by(with_functions(), |m| m.undocumented_functions())
    } else if mentions("error") {
        weakest_error_coverage(snapshot, 0)
    } else if mentions("type") {
        first_max_by(with_functions(), |m| m.functions_without_type_hints())
    } else if mentions("log") {
        with_functions().find(|m| !m.uses_logging())
    } else {
        first_max_by(with_functions(), |m| m.complexity_score)
    };
    module.map(|m| m.path.clone())
}

/// Derive ranked opportunities from a snapshot and the external signals.
pub fn identify(
    config: &AnalysisConfig,
    snapshot: &CodebaseSnapshot,
    insights: &EvaluationInsights,
    suggestions: &[KnowledgeSuggestion],
) -> Vec<ImprovementOpportunity> {
    let metrics = &snapshot.metrics;
    let mut opportunities = Vec::new();

    if metrics.average_complexity > config.mean_complexity_trigger {
        if let Some(top) = highest_complexity(snapshot) {
            let mut opp = ImprovementOpportunity::new(
                OpportunityKind::ComplexityReduction,
                config.complexity_priority,
                format!(
                    "High average function complexity ({:.1}); most complex is {} ({})",
                    metrics.average_complexity,
                    top.display_name(),
                    top.complexity
                ),
                "Refactor complex functions into smaller, more manageable pieces",
            );
            opp.module = Some(top.module.clone());
            opp.affected = metrics.high_complexity_functions.clone();
            opp.targets = vec![top];
            opportunities.push(opp);
        }
    }

    if insights.recent_average_score < config.performance_score_trigger {
        let mut opp = ImprovementOpportunity::new(
            OpportunityKind::PerformanceImprovement,
            config.performance_priority,
            format!(
                "Low evaluation scores ({:.2}) indicate performance issues",
                insights.recent_average_score
            ),
            "Optimize response generation and evaluation processes",
        );
        opp.improvement_areas = insights.improvement_areas();
        if let Some(target) = most_loops(snapshot) {
            opp.module = Some(target.module.clone());
            opp.targets = vec![target];
        }
        opportunities.push(opp);
    }

    if metrics.total_functions > 0 {
        let total_sites: u32 = snapshot.modules.iter().map(|m| m.error_handling).sum();
        let ratio = total_sites as f64 / metrics.total_functions as f64;
        if ratio < config.error_handling_ratio_trigger {
            let mut opp = ImprovementOpportunity::new(
                OpportunityKind::ErrorHandling,
                config.error_handling_priority,
                format!(
                    "Insufficient error handling coverage ({} sites across {} functions)",
                    total_sites, metrics.total_functions
                ),
                "Add comprehensive error handling to critical functions",
            );
            if let Some(module) = weakest_error_coverage(snapshot, 2) {
                opp.module = Some(module.path.clone());
                opp.affected = module
                    .functions
                    .iter()
                    .filter(|f| f.error_handling_sites == 0)
                    .map(|f| FunctionRef::new(&module.path, f))
                    .collect();
            }
            opportunities.push(opp);
        }
    }

    for suggestion in suggestions {
        if suggestion.priority > config.knowledge_priority_trigger {
            let mut opp = ImprovementOpportunity::new(
                OpportunityKind::KnowledgeBased,
                suggestion.priority,
                suggestion.message.clone(),
                "Implement knowledge-based improvements",
            );
            opp.category = suggestion.category.clone();
            opp.module = knowledge_target(snapshot, suggestion);
            opportunities.push(opp);
        }
    }

    opportunities.sort_by(|a, b| b.priority.total_cmp(&a.priority));
    opportunities
}

pub fn improvement_potential(
    config: &AnalysisConfig,
    opportunities: &[ImprovementOpportunity],
    insights: &EvaluationInsights,
) -> f64 {
    if opportunities.is_empty() {
        return config.minimum_potential;
    }
    let mean_priority =
        opportunities.iter().map(|o| o.priority).sum::<f64>() / opportunities.len() as f64;
    let gap = (1.0 - insights.recent_average_score).max(0.0);
    (config.potential_opportunity_weight * mean_priority + config.potential_gap_weight * gap)
        .clamp(0.0, 1.0)
}

/// At most five recommendations, one per kind (knowledge suggestions
/// individually), in ranking order.
pub fn recommendations(opportunities: &[ImprovementOpportunity]) -> Vec<String> {
    if opportunities.is_empty() {
        return vec!["No specific improvements identified at this time.".to_string()];
    }

    let mut seen = Vec::new();
    let mut out = Vec::new();
    for opp in opportunities {
        match opp.kind {
            OpportunityKind::KnowledgeBased => {
                out.push(format!("{}: {}", opp.suggested_action, opp.description));
            }
            kind if seen.contains(&kind) => {}
            OpportunityKind::ComplexityReduction => {
                seen.push(opp.kind);
                out.push(format!(
                    "Refactor {} high-complexity functions to improve maintainability",
                    opp.affected.len().max(1)
                ));
            }
            OpportunityKind::PerformanceImprovement => {
                seen.push(opp.kind);
                out.push(
                    "Optimize response generation pipeline for better evaluation scores".to_string(),
                );
            }
            OpportunityKind::ErrorHandling => {
                seen.push(opp.kind);
                out.push("Enhance error handling coverage across the codebase".to_string());
            }
        }
    }
    out.truncate(5);
    out
}
