use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use crate::analysis::OpportunityKind;
use crate::generation::ModificationProposal;

/// Outcome state of a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Pending,
    Approved,
    Applied,
    Completed,
    Failed,
    RolledBack,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Pending => "pending",
            RecordStatus::Approved => "approved",
            RecordStatus::Applied => "applied",
            RecordStatus::Completed => "completed",
            RecordStatus::Failed => "failed",
            RecordStatus::RolledBack => "rolled_back",
        }
    }

    /// Forward-only, except that landed changes can still be rolled back.
    pub fn can_transition_to(&self, to: RecordStatus) -> bool {
        use RecordStatus::*;
        matches!(
            (self, to),
            (Pending, Approved)
                | (Pending, Applied)
                | (Pending, Failed)
                | (Approved, Applied)
                | (Approved, Failed)
                | (Applied, Completed)
                | (Applied, RolledBack)
        )
    }

    pub fn has_landed(&self) -> bool {
        matches!(self, RecordStatus::Applied | RecordStatus::Completed)
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackVerdict {
    Merged,
    Rejected,
}

impl std::str::FromStr for FeedbackVerdict {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "merged" | "merge" | "accepted" => Ok(FeedbackVerdict::Merged),
            "rejected" | "reject" | "closed" => Ok(FeedbackVerdict::Rejected),
            other => Err(format!("unknown feedback verdict: {}", other)),
        }
    }
}

/// Post-hoc human review of a landed change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub verdict: FeedbackVerdict,
    /// 1-5 when given
    pub rating: Option<u8>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    pub from: RecordStatus,
    pub to: RecordStatus,
    pub at: DateTime<Utc>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// One ledger entry. Identity and content fields never change after
/// creation; only status, feedback and the audit fields are updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImprovementRecord {
    pub improvement_id: String,
    pub improvement_type: OpportunityKind,
    pub file_path: PathBuf,
    #[serde(alias = "original_code_hash")]
    pub original_hash: String,
    #[serde(alias = "modified_code_hash")]
    pub modified_hash: String,
    pub rationale: String,
    pub priority: f64,
    pub status: RecordStatus,
    #[serde(default)]
    pub validation_result: serde_json::Value,
    #[serde(default)]
    pub performance_metrics: BTreeMap<String, f64>,
    #[serde(default)]
    pub impact_metrics: BTreeMap<String, f64>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub applied_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub rollback_count: u32,
    #[serde(default)]
    pub review_notes: Option<String>,
    #[serde(default)]
    pub backup_path: Option<PathBuf>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub feedback: Option<Feedback>,
    #[serde(default)]
    pub status_history: Vec<StatusChange>,
}

impl ImprovementRecord {
    /// Pending record for a proposal, carrying its validation verdict.
    pub fn from_proposal(proposal: &ModificationProposal) -> Self {
        let validation_result = proposal
            .validation
            .as_ref()
            .and_then(|v| serde_json::to_value(v).ok())
            .unwrap_or(serde_json::Value::Null);

        let mut impact_metrics = BTreeMap::new();
        impact_metrics.insert("estimated_impact".to_string(), proposal.estimated_impact);
        if let Some(v) = &proposal.validation {
            impact_metrics.insert("safety_score".to_string(), v.safety_score);
            impact_metrics.insert("performance_impact".to_string(), v.performance_impact);
        }

        Self {
            improvement_id: proposal.id.clone(),
            improvement_type: proposal.kind,
            file_path: proposal.file_path.clone(),
            original_hash: proposal.original_hash.clone(),
            modified_hash: proposal.modified_hash(),
            rationale: proposal.rationale.clone(),
            priority: proposal.priority,
            status: RecordStatus::Pending,
            validation_result,
            performance_metrics: BTreeMap::new(),
            impact_metrics,
            timestamp: Utc::now(),
            applied_at: None,
            rollback_count: 0,
            review_notes: None,
            backup_path: proposal.backup_path.clone(),
            branch: None,
            feedback: None,
            status_history: Vec::new(),
        }
    }

    /// Applied or completed, and not turned down by a reviewer.
    pub fn is_success(&self) -> bool {
        self.status.has_landed()
            && !matches!(
                self.feedback,
                Some(Feedback {
                    verdict: FeedbackVerdict::Rejected,
                    ..
                })
            )
    }

    /// Why the record failed, if it did.
    pub fn failure_reason(&self) -> Option<String> {
        if !matches!(self.status, RecordStatus::Failed | RecordStatus::RolledBack) {
            return None;
        }
        self.status_history
            .iter()
            .rev()
            .find(|c| c.to == self.status)
            .and_then(|c| c.reason.clone())
            .or_else(|| {
                self.validation_result
                    .get("error")
                    .and_then(|e| e.as_str())
                    .map(str::to_string)
            })
            .or_else(|| Some("Unknown error".to_string()))
    }

    pub(crate) fn change_status(&mut self, to: RecordStatus, reason: Option<&str>) -> bool {
        if !self.status.can_transition_to(to) {
            return false;
        }
        self.status_history.push(StatusChange {
            from: self.status,
            to,
            at: Utc::now(),
            reason: reason.map(str::to_string),
        });
        match to {
            RecordStatus::Applied => self.applied_at = Some(Utc::now()),
            RecordStatus::RolledBack => self.rollback_count += 1,
            _ => {}
        }
        self.status = to;
        true
    }
}
