//! Views derived from ledger records. All of them are pure functions of
//! the record list and the policy, so a reloaded ledger reproduces them.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use super::record::{ImprovementRecord, RecordStatus};
use crate::analysis::OpportunityKind;
use crate::config::PolicyConfig;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeStats {
    pub total: usize,
    pub success: usize,
}

impl TypeStats {
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.success as f64 / self.total as f64
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerStatistics {
    pub total_improvements: usize,
    pub successful_improvements: usize,
    pub failed_improvements: usize,
    pub success_rate: f64,
    pub by_type: BTreeMap<OpportunityKind, TypeStats>,
    pub by_status: BTreeMap<RecordStatus, usize>,
    pub average_priority: f64,
    pub most_common_type: Option<OpportunityKind>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorityRange {
    pub min: f64,
    pub max: f64,
    pub average: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LearningInsights {
    pub success_rate_by_type: BTreeMap<OpportunityKind, f64>,
    /// Kinds with a success rate of at least 0.7, best first, at most 3
    pub recommended_improvement_types: Vec<OpportunityKind>,
    pub frequently_modified_files: Vec<(PathBuf, usize)>,
    pub common_failure_reasons: Vec<(String, usize)>,
    pub optimal_priority_range: Option<PriorityRange>,
}

/// Adaptive acceptance thresholds for the next cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerRecommendations {
    pub base_threshold: f64,
    #[serde(default)]
    pub type_multipliers: BTreeMap<OpportunityKind, f64>,
    #[serde(default)]
    pub recommended_actions: Vec<String>,
}

impl Default for TriggerRecommendations {
    fn default() -> Self {
        Self {
            base_threshold: PolicyConfig::default().base_threshold,
            type_multipliers: BTreeMap::new(),
            recommended_actions: Vec::new(),
        }
    }
}

impl TriggerRecommendations {
    /// Priority an opportunity of `kind` must reach, capped at 1.
    pub fn threshold_for(&self, kind: OpportunityKind) -> f64 {
        let multiplier = self.type_multipliers.get(&kind).copied().unwrap_or(1.0);
        (self.base_threshold * multiplier).min(1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Degrading,
    Stable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceTrends {
    /// Keyed by `YYYY-MM-DD`
    pub daily_improvement_counts: BTreeMap<String, usize>,
    pub success_rates_by_date: BTreeMap<String, f64>,
    pub trend: Trend,
}

pub fn statistics(records: &[ImprovementRecord]) -> LedgerStatistics {
    let total = records.len();
    if total == 0 {
        return LedgerStatistics::default();
    }

    let mut by_type: BTreeMap<OpportunityKind, TypeStats> = BTreeMap::new();
    let mut by_status: BTreeMap<RecordStatus, usize> = BTreeMap::new();
    for record in records {
        let entry = by_type.entry(record.improvement_type).or_default();
        entry.total += 1;
        if record.is_success() {
            entry.success += 1;
        }
        *by_status.entry(record.status).or_default() += 1;
    }

    let successful = records.iter().filter(|r| r.is_success()).count();
    let failed = records
        .iter()
        .filter(|r| r.status == RecordStatus::Failed)
        .count();

    // Ties go to the kind declared first
    let most_common_type = by_type
        .iter()
        .fold(None::<(OpportunityKind, usize)>, |best, (kind, stats)| match best {
            Some((_, n)) if n >= stats.total => best,
            _ => Some((*kind, stats.total)),
        })
        .map(|(kind, _)| kind);

    LedgerStatistics {
        total_improvements: total,
        successful_improvements: successful,
        failed_improvements: failed,
        success_rate: successful as f64 / total as f64,
        by_type,
        by_status,
        average_priority: records.iter().map(|r| r.priority).sum::<f64>() / total as f64,
        most_common_type,
    }
}

fn top_counts<K: Ord>(counts: HashMap<K, usize>, limit: usize) -> Vec<(K, usize)> {
    let mut ranked: Vec<(K, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(limit);
    ranked
}

pub fn learning_insights(records: &[ImprovementRecord], policy: &PolicyConfig) -> LearningInsights {
    let stats = statistics(records);

    let success_rate_by_type: BTreeMap<OpportunityKind, f64> = stats
        .by_type
        .iter()
        .filter(|(_, s)| s.total > 0)
        .map(|(kind, s)| (*kind, s.success_rate()))
        .collect();

    let mut recommended: Vec<(OpportunityKind, f64)> = success_rate_by_type
        .iter()
        .filter(|(_, rate)| **rate >= 0.7)
        .map(|(kind, rate)| (*kind, *rate))
        .collect();
    recommended.sort_by(|a, b| b.1.total_cmp(&a.1));

    let mut file_counts: HashMap<PathBuf, usize> = HashMap::new();
    let mut failure_counts: HashMap<String, usize> = HashMap::new();
    for record in records {
        *file_counts.entry(record.file_path.clone()).or_default() += 1;
        if let Some(reason) = record.failure_reason() {
            *failure_counts.entry(reason).or_default() += 1;
        }
    }

    let optimal_priority_range = if records.len() > policy.min_records_for_priority_range {
        let priorities: Vec<f64> = records
            .iter()
            .filter(|r| r.is_success())
            .map(|r| r.priority)
            .collect();
        (!priorities.is_empty()).then(|| PriorityRange {
            min: priorities.iter().copied().fold(f64::INFINITY, f64::min),
            max: priorities.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            average: priorities.iter().sum::<f64>() / priorities.len() as f64,
        })
    } else {
        None
    };

    LearningInsights {
        success_rate_by_type,
        recommended_improvement_types: recommended.into_iter().take(3).map(|(k, _)| k).collect(),
        frequently_modified_files: top_counts(file_counts, 5),
        common_failure_reasons: top_counts(failure_counts, 5),
        optimal_priority_range,
    }
}

pub fn trigger_recommendations(
    records: &[ImprovementRecord],
    policy: &PolicyConfig,
) -> TriggerRecommendations {
    let mut recs = TriggerRecommendations {
        base_threshold: policy.base_threshold,
        ..TriggerRecommendations::default()
    };
    if records.is_empty() {
        return recs;
    }

    let stats = statistics(records);
    if stats.success_rate < policy.low_success_rate {
        recs.base_threshold = policy.conservative_threshold;
        recs.recommended_actions
            .push("Increase threshold to reduce failed improvements".to_string());
    } else if stats.success_rate > policy.high_success_rate {
        recs.base_threshold = policy.permissive_threshold;
        recs.recommended_actions
            .push("Lower threshold to enable more improvements".to_string());
    }

    for (kind, type_stats) in &stats.by_type {
        let rate = type_stats.success_rate();
        if rate < policy.low_success_rate {
            recs.type_multipliers.insert(*kind, policy.tighten_factor);
            recs.recommended_actions
                .push(format!("Increase threshold for {} improvements", kind));
        } else if rate > policy.high_success_rate {
            recs.type_multipliers.insert(*kind, policy.loosen_factor);
            recs.recommended_actions
                .push(format!("Lower threshold for {} improvements", kind));
        }
    }

    recs
}

pub fn performance_trends(records: &[ImprovementRecord]) -> PerformanceTrends {
    let mut by_date: BTreeMap<String, (usize, usize)> = BTreeMap::new();
    for record in records {
        let entry = by_date
            .entry(record.timestamp.date_naive().to_string())
            .or_default();
        entry.0 += 1;
        if record.is_success() {
            entry.1 += 1;
        }
    }

    let daily_improvement_counts = by_date
        .iter()
        .map(|(date, (total, _))| (date.clone(), *total))
        .collect();
    let success_rates_by_date: BTreeMap<String, f64> = by_date
        .iter()
        .map(|(date, (total, ok))| (date.clone(), *ok as f64 / *total as f64))
        .collect();

    let mut trend = Trend::Stable;
    if success_rates_by_date.len() >= 3 {
        let recent: Vec<f64> = success_rates_by_date.values().rev().take(3).copied().collect();
        if recent.iter().all(|r| *r > 0.6) {
            trend = Trend::Improving;
        } else if recent.iter().any(|r| *r < 0.4) {
            trend = Trend::Degrading;
        }
    }

    PerformanceTrends {
        daily_improvement_counts,
        success_rates_by_date,
        trend,
    }
}
