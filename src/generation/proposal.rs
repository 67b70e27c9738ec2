use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::analysis::{content_hash, OpportunityKind};
use crate::errors::ApplyError;
use crate::observability::telemetry::record_state_transition;
use crate::validation::ValidationResult;

/// Lifecycle of a proposal.
///
/// ```text
/// proposed -> approved | rejected
/// approved -> applied | rejected
/// applied  -> completed | rolled_back
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Proposed,
    Approved,
    Rejected,
    Applied,
    Completed,
    RolledBack,
}

impl ProposalStatus {
    pub const ALL: [ProposalStatus; 6] = [
        ProposalStatus::Proposed,
        ProposalStatus::Approved,
        ProposalStatus::Rejected,
        ProposalStatus::Applied,
        ProposalStatus::Completed,
        ProposalStatus::RolledBack,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProposalStatus::Proposed => "proposed",
            ProposalStatus::Approved => "approved",
            ProposalStatus::Rejected => "rejected",
            ProposalStatus::Applied => "applied",
            ProposalStatus::Completed => "completed",
            ProposalStatus::RolledBack => "rolled_back",
        }
    }

    pub fn can_transition_to(&self, to: ProposalStatus) -> bool {
        use ProposalStatus::*;
        matches!(
            (self, to),
            (Proposed, Approved)
                | (Proposed, Rejected)
                | (Approved, Applied)
                | (Approved, Rejected)
                | (Applied, Completed)
                | (Applied, RolledBack)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProposalStatus::Rejected | ProposalStatus::Completed | ProposalStatus::RolledBack
        )
    }
}

impl fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusTransition {
    pub from: ProposalStatus,
    pub to: ProposalStatus,
    pub at: DateTime<Utc>,
    pub reason: Option<String>,
}

/// A concrete rewrite of one file, pending validation and application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModificationProposal {
    pub id: String,
    /// Path relative to the snapshot root
    pub file_path: PathBuf,
    /// Exact content read during analysis
    pub original_code: String,
    pub original_hash: String,
    pub modified_code: String,
    pub kind: OpportunityKind,
    pub rationale: String,
    pub priority: f64,
    /// Negative values mean an expected improvement
    pub estimated_impact: f64,
    pub status: ProposalStatus,
    pub validation: Option<ValidationResult>,
    pub transitions: Vec<StatusTransition>,
    pub backup_path: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
}

impl ModificationProposal {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: String,
        file_path: PathBuf,
        original_code: String,
        modified_code: String,
        kind: OpportunityKind,
        rationale: String,
        priority: f64,
        estimated_impact: f64,
    ) -> Self {
        Self {
            id,
            file_path,
            original_hash: content_hash(&original_code),
            original_code,
            modified_code,
            kind,
            rationale,
            priority,
            estimated_impact,
            status: ProposalStatus::Proposed,
            validation: None,
            transitions: Vec::new(),
            backup_path: None,
            created_at: Utc::now(),
        }
    }

    pub fn modified_hash(&self) -> String {
        content_hash(&self.modified_code)
    }

    /// Move to `to`, appending a timestamped audit entry. Invalid edges are
    /// rejected and leave the proposal untouched.
    pub fn transition(&mut self, to: ProposalStatus, reason: Option<&str>) -> Result<(), ApplyError> {
        if !self.status.can_transition_to(to) {
            return Err(ApplyError::InvalidStateTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        record_state_transition(&self.id, self.status.as_str(), to.as_str());
        self.transitions.push(StatusTransition {
            from: self.status,
            to,
            at: Utc::now(),
            reason: reason.map(str::to_string),
        });
        self.status = to;
        Ok(())
    }

    /// Statuses visited so far, starting with `proposed`.
    pub fn status_trail(&self) -> Vec<ProposalStatus> {
        let mut trail = vec![ProposalStatus::Proposed];
        trail.extend(self.transitions.iter().map(|t| t.to));
        trail
    }

    pub fn safety_score(&self) -> f64 {
        self.validation.as_ref().map(|v| v.safety_score).unwrap_or(0.0)
    }

    pub fn is_validated(&self) -> bool {
        self.validation.as_ref().map(|v| v.is_valid).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proposal() -> ModificationProposal {
        ModificationProposal::new(
            "mod_1".to_string(),
            PathBuf::from("src/lib.rs"),
            "fn a() {}\n".to_string(),
            "fn a() { }\n".to_string(),
            OpportunityKind::ComplexityReduction,
            "simplify".to_string(),
            0.8,
            -0.2,
        )
    }

    #[test]
    fn test_new_proposal_hashes_original() {
        let p = proposal();
        assert_eq!(p.status, ProposalStatus::Proposed);
        assert_eq!(p.original_hash, content_hash("fn a() {}\n"));
        assert_ne!(p.modified_hash(), p.original_hash);
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut p = proposal();
        p.transition(ProposalStatus::Approved, None).unwrap();
        p.transition(ProposalStatus::Applied, Some("auto")).unwrap();
        p.transition(ProposalStatus::RolledBack, Some("verification failed"))
            .unwrap();
        assert_eq!(
            p.status_trail(),
            vec![
                ProposalStatus::Proposed,
                ProposalStatus::Approved,
                ProposalStatus::Applied,
                ProposalStatus::RolledBack
            ]
        );
        assert_eq!(p.transitions[1].reason.as_deref(), Some("auto"));
        assert!(p.status.is_terminal());
    }

    #[test]
    fn test_invalid_transitions_are_rejected() {
        let mut p = proposal();
        let err = p.transition(ProposalStatus::Applied, None).unwrap_err();
        assert!(matches!(err, ApplyError::InvalidStateTransition { .. }));
        assert_eq!(p.status, ProposalStatus::Proposed);
        assert!(p.transitions.is_empty());

        p.transition(ProposalStatus::Rejected, None).unwrap();
        assert!(p.transition(ProposalStatus::Approved, None).is_err());
    }

    #[test]
    fn test_transition_table_is_forward_only() {
        use ProposalStatus::*;
        for from in ProposalStatus::ALL {
            for to in ProposalStatus::ALL {
                if from.is_terminal() {
                    assert!(!from.can_transition_to(to), "{} -> {}", from, to);
                }
                if to == Proposed {
                    assert!(!from.can_transition_to(to));
                }
            }
        }
        assert!(Applied.can_transition_to(RolledBack));
    }

    #[test]
    fn test_status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&ProposalStatus::RolledBack).unwrap(),
            "\"rolled_back\""
        );
    }
}
