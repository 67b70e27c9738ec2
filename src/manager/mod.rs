//! Applies validated proposals under the auto-apply policy.
//!
//! Every write to a target file is preceded by a timestamped backup of the
//! content it replaces. A proposal is only written when the file still
//! hashes to the content it was generated from.

pub mod backup;
pub mod gate;
pub mod verify;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::analysis::{content_hash, CodebaseSnapshot, ImprovementOpportunity, OpportunityKind};
use crate::config::Config;
use crate::errors::{ApplyError, CycleError, EvolveError, LedgerError};
use crate::generation::{
    CodeGenerator, DiscardedGeneration, ModificationProposal, ProposalGenerator, ProposalStatus,
};
use crate::insights::EvaluationInsights;
use crate::ledger::{ImprovementLedger, ImprovementRecord, Outcome, RecordStatus, TriggerRecommendations};
use crate::validation::CodeValidator;

pub use backup::{backup_name, BackupStore};
pub use gate::AutoApplyGate;
pub use verify::{run_check, CheckResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ApplyOutcome {
    Applied { backup: PathBuf },
    /// Written, failed post-write verification, and restored
    RolledBack { reason: String },
}

/// What one cycle did.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub improvement_potential: f64,
    pub opportunities: usize,
    pub generated: Vec<String>,
    pub discarded: Vec<DiscardedGeneration>,
    pub rejected: Vec<String>,
    pub applied: Vec<String>,
    pub rolled_back: Vec<String>,
    /// Proposal id and error for apply attempts that did not write
    pub failed: Vec<(String, String)>,
    /// Approved proposals waiting for a human
    pub pending_review: Vec<String>,
    pub gate_open: bool,
    pub gate_reason: Option<String>,
    /// Set when the cycle stopped before generation
    pub skipped: Option<String>,
    pub recommendations: Vec<String>,
    pub next_thresholds: Option<TriggerRecommendations>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalSummary {
    pub id: String,
    pub file_path: PathBuf,
    pub kind: OpportunityKind,
    pub status: ProposalStatus,
    pub priority: f64,
    pub safety_score: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl From<&ModificationProposal> for ProposalSummary {
    fn from(p: &ModificationProposal) -> Self {
        Self {
            id: p.id.clone(),
            file_path: p.file_path.clone(),
            kind: p.kind,
            status: p.status,
            priority: p.priority,
            safety_score: p.validation.as_ref().map(|v| v.safety_score),
            created_at: p.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModificationHistory {
    pub total_proposals: usize,
    pub applied: usize,
    pub proposals_by_status: BTreeMap<ProposalStatus, usize>,
    /// Last five applied
    pub recent_applied: Vec<ProposalSummary>,
    /// Last ten of any status
    pub recent_proposals: Vec<ProposalSummary>,
}

pub struct ModificationManager {
    generator: ProposalGenerator,
    validator: CodeValidator,
    gate: AutoApplyGate,
    backups: BackupStore,
    root: PathBuf,
    max_applies: usize,
    require_validation: bool,
    post_apply_check: Vec<String>,
    post_apply_timeout: Duration,
    proposals: Vec<ModificationProposal>,
}

impl ModificationManager {
    pub fn new(config: &Config, generator: Arc<dyn CodeGenerator>) -> Result<Self, EvolveError> {
        Ok(Self {
            generator: ProposalGenerator::new(generator, config),
            validator: CodeValidator::new(&config.validation)?,
            gate: AutoApplyGate::from_config(config),
            backups: BackupStore::new(&config.pipeline.backup_directory),
            root: config.pipeline.source_root.clone(),
            max_applies: config.pipeline.max_modification_attempts,
            require_validation: config.pipeline.require_validation,
            post_apply_check: config.pipeline.post_apply_check.clone(),
            post_apply_timeout: Duration::from_secs(config.pipeline.post_apply_timeout_secs),
            proposals: Vec::new(),
        })
    }

    pub fn with_generation_timeout(mut self, timeout: Duration) -> Self {
        self.generator = self.generator.with_timeout(timeout);
        self
    }

    pub fn gate(&self) -> &AutoApplyGate {
        &self.gate
    }

    pub fn validator(&self) -> &CodeValidator {
        &self.validator
    }

    pub fn backups(&self) -> &BackupStore {
        &self.backups
    }

    pub fn proposals(&self) -> &[ModificationProposal] {
        &self.proposals
    }

    pub fn proposal(&self, id: &str) -> Option<&ModificationProposal> {
        self.proposals.iter().find(|p| p.id == id)
    }

    /// Approved proposals the gate held back.
    pub fn pending_review(&self) -> Vec<&ModificationProposal> {
        self.proposals
            .iter()
            .filter(|p| p.status == ProposalStatus::Approved)
            .collect()
    }

    fn index_of(&self, id: &str) -> Result<usize, ApplyError> {
        self.proposals
            .iter()
            .position(|p| p.id == id)
            .ok_or_else(|| ApplyError::NotFound(id.to_string()))
    }

    /// Generate, validate and (when the gate allows) apply proposals for
    /// the given opportunities.
    pub async fn consider_modifications(
        &mut self,
        snapshot: &CodebaseSnapshot,
        opportunities: &[ImprovementOpportunity],
        insights: &EvaluationInsights,
        thresholds: &TriggerRecommendations,
        ledger: &mut ImprovementLedger,
        stop: &AtomicBool,
    ) -> Result<CycleReport, EvolveError> {
        self.root = snapshot.root.clone();
        let mut report = CycleReport::default();

        let outcome = self
            .generator
            .generate_proposals(snapshot, opportunities, thresholds, stop)
            .await?;
        report.discarded = outcome.discarded;

        let mut approved = Vec::new();
        for mut proposal in outcome.proposals {
            if stop.load(Ordering::SeqCst) {
                return Err(CycleError::Cancelled.into());
            }
            report.generated.push(proposal.id.clone());

            let result = self.validator.validate(
                &proposal.original_code,
                &proposal.modified_code,
                Some(proposal.kind),
            );
            let verdict = if result.is_valid {
                None
            } else {
                Some(result.primary_error().map(str::to_string).unwrap_or_else(|| {
                    format!(
                        "Safety score {:.2} below {:.2}",
                        result.safety_score,
                        self.validator.config().min_safety_score
                    )
                }))
            };
            proposal.validation = Some(result);

            match verdict {
                None => {
                    proposal.transition(ProposalStatus::Approved, Some("passed validation"))?;
                    self.proposals.push(proposal);
                    approved.push(self.proposals.len() - 1);
                }
                Some(reason) => {
                    info!("Proposal {} rejected: {}", proposal.id, reason);
                    proposal.transition(ProposalStatus::Rejected, Some(&reason))?;
                    report.rejected.push(proposal.id.clone());
                    self.proposals.push(proposal);
                    self.record_failure(self.proposals.len() - 1, ledger, &reason)
                        .await?;
                }
            }
        }

        approved.sort_by(|a, b| {
            let (pa, pb) = (&self.proposals[*a], &self.proposals[*b]);
            pb.priority
                .total_cmp(&pa.priority)
                .then_with(|| pb.safety_score().total_cmp(&pa.safety_score()))
        });

        report.gate_open = self.gate.allows(insights);
        report.gate_reason = self.gate.closed_reason(insights);
        let to_apply = if report.gate_open {
            approved.len().min(self.max_applies)
        } else {
            info!(
                "Auto-apply gate closed ({}); {} proposals left for review",
                report.gate_reason.as_deref().unwrap_or("unknown"),
                approved.len()
            );
            0
        };

        for (n, idx) in approved.into_iter().enumerate() {
            let id = self.proposals[idx].id.clone();
            if n >= to_apply {
                report.pending_review.push(id);
                continue;
            }
            if stop.load(Ordering::SeqCst) {
                return Err(CycleError::Cancelled.into());
            }
            match self.land(idx, ledger, "auto-applied").await {
                Ok(ApplyOutcome::Applied { .. }) => report.applied.push(id),
                Ok(ApplyOutcome::RolledBack { .. }) => report.rolled_back.push(id),
                Err(EvolveError::Apply(e)) => {
                    warn!("Applying {} failed: {}", id, e);
                    report.failed.push((id, e.to_string()));
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            "Considered {} proposals: {} applied, {} rolled back, {} rejected, {} pending review",
            report.generated.len(),
            report.applied.len(),
            report.rolled_back.len(),
            report.rejected.len(),
            report.pending_review.len()
        );
        Ok(report)
    }

    /// Apply a proposal a human approved. Validation is still required.
    pub async fn approve_and_apply(
        &mut self,
        id: &str,
        ledger: &mut ImprovementLedger,
    ) -> Result<ApplyOutcome, EvolveError> {
        let idx = self.index_of(id)?;
        let proposal = &mut self.proposals[idx];
        if proposal.status == ProposalStatus::Proposed {
            if !proposal.is_validated() {
                return Err(ApplyError::NotValidated { id: id.to_string() }.into());
            }
            proposal.transition(ProposalStatus::Approved, Some("approved by reviewer"))?;
        }
        self.land(idx, ledger, "approved by reviewer").await
    }

    pub async fn reject(
        &mut self,
        id: &str,
        reason: &str,
        ledger: &mut ImprovementLedger,
    ) -> Result<(), EvolveError> {
        let idx = self.index_of(id)?;
        self.proposals[idx].transition(ProposalStatus::Rejected, Some(reason))?;
        self.record_failure(idx, ledger, &format!("Rejected by reviewer: {}", reason))
            .await
    }

    /// Restore the pre-change content of an applied proposal. Works from
    /// the in-memory proposal, or from the ledger record's backup after a
    /// restart.
    pub async fn rollback_modification(
        &mut self,
        id: &str,
        ledger: &mut ImprovementLedger,
    ) -> Result<(), EvolveError> {
        if let Some(idx) = self.proposals.iter().position(|p| p.id == id) {
            let proposal = &self.proposals[idx];
            if proposal.status != ProposalStatus::Applied {
                return Err(ApplyError::InvalidStateTransition {
                    from: proposal.status.to_string(),
                    to: ProposalStatus::RolledBack.to_string(),
                }
                .into());
            }
            let rel = proposal.file_path.clone();
            let original = proposal.original_code.clone();
            self.restore_file(&rel, &original).await?;
            self.proposals[idx].transition(ProposalStatus::RolledBack, Some("manual rollback"))?;
        } else {
            let record = ledger
                .get(id)
                .ok_or_else(|| ApplyError::NotFound(id.to_string()))?;
            if record.status != RecordStatus::Applied {
                return Err(ApplyError::InvalidStateTransition {
                    from: record.status.to_string(),
                    to: RecordStatus::RolledBack.to_string(),
                }
                .into());
            }
            let rel = record.file_path.clone();
            let expected_hash = record.original_hash.clone();
            let backup = record.backup_path.clone().ok_or_else(|| ApplyError::Backup {
                path: rel.clone(),
                message: "no backup recorded for this improvement".to_string(),
            })?;
            let original = self.backups.read(&backup).await?;
            if content_hash(&original) != expected_hash {
                return Err(ApplyError::Backup {
                    path: backup.clone(),
                    message: "backup content does not match the recorded original".to_string(),
                }
                .into());
            }
            self.restore_file(&rel, &original).await?;
        }

        match ledger
            .record_outcome(id, RecordStatus::RolledBack, Outcome::reason("manual rollback"))
            .await
        {
            Ok(()) => {}
            Err(LedgerError::NotFound(_)) => warn!("No ledger record for rolled back {}", id),
            Err(e) => return Err(e.into()),
        }
        info!("Rolled back modification {}", id);
        Ok(())
    }

    /// Unified diff of a proposal against the content it was generated from.
    pub fn generate_diff_report(&self, id: &str) -> Result<String, ApplyError> {
        let proposal = self
            .proposal(id)
            .ok_or_else(|| ApplyError::NotFound(id.to_string()))?;
        Ok(unified_diff(
            &proposal.file_path,
            &proposal.original_code,
            &proposal.modified_code,
        ))
    }

    pub fn modification_history(&self) -> ModificationHistory {
        let mut by_status = BTreeMap::new();
        for p in &self.proposals {
            *by_status.entry(p.status).or_insert(0) += 1;
        }
        let applied: Vec<&ModificationProposal> = self
            .proposals
            .iter()
            .filter(|p| matches!(p.status, ProposalStatus::Applied | ProposalStatus::Completed))
            .collect();

        ModificationHistory {
            total_proposals: self.proposals.len(),
            applied: applied.len(),
            proposals_by_status: by_status,
            recent_applied: applied
                .iter()
                .skip(applied.len().saturating_sub(5))
                .map(|p| ProposalSummary::from(*p))
                .collect(),
            recent_proposals: self
                .proposals
                .iter()
                .skip(self.proposals.len().saturating_sub(10))
                .map(ProposalSummary::from)
                .collect(),
        }
    }

    /// Apply, and turn a failure before any write into a rejected proposal
    /// with a `failed` ledger record.
    async fn land(
        &mut self,
        idx: usize,
        ledger: &mut ImprovementLedger,
        reason: &str,
    ) -> Result<ApplyOutcome, EvolveError> {
        match self.apply_at(idx, ledger, reason).await {
            Err(EvolveError::Apply(e)) if self.proposals[idx].status == ProposalStatus::Approved => {
                let message = e.to_string();
                self.proposals[idx].transition(ProposalStatus::Rejected, Some(&message))?;
                self.record_failure(idx, ledger, &message).await?;
                Err(e.into())
            }
            other => other,
        }
    }

    async fn apply_at(
        &mut self,
        idx: usize,
        ledger: &mut ImprovementLedger,
        reason: &str,
    ) -> Result<ApplyOutcome, EvolveError> {
        let proposal = &self.proposals[idx];
        if proposal.status != ProposalStatus::Approved {
            return Err(ApplyError::InvalidStateTransition {
                from: proposal.status.to_string(),
                to: ProposalStatus::Applied.to_string(),
            }
            .into());
        }
        if !proposal.is_validated()
            || proposal.safety_score() < self.validator.config().min_safety_score
        {
            return Err(ApplyError::NotValidated {
                id: proposal.id.clone(),
            }
            .into());
        }

        let id = proposal.id.clone();
        let rel = proposal.file_path.clone();
        let kind = proposal.kind;
        let original = proposal.original_code.clone();
        let modified = proposal.modified_code.clone();
        let original_hash = proposal.original_hash.clone();
        let target = self.root.join(&rel);

        let current = tokio::fs::read_to_string(&target)
            .await
            .map_err(|e| ApplyError::Write {
                path: rel.clone(),
                message: e.to_string(),
            })?;
        if content_hash(&current) != original_hash {
            return Err(ApplyError::StaleBase {
                path: rel.clone(),
            }
            .into());
        }

        let backup = self.backups.create(&rel, &current).await?;
        if let Err(e) = tokio::fs::write(&target, &modified).await {
            if let Err(restore) = tokio::fs::write(&target, &current).await {
                error!(
                    "CRITICAL: failed to restore {} after a failed write: {}",
                    target.display(),
                    restore
                );
            }
            return Err(ApplyError::Write {
                path: rel.clone(),
                message: e.to_string(),
            }
            .into());
        }

        {
            let proposal = &mut self.proposals[idx];
            proposal.backup_path = Some(backup.clone());
            proposal.transition(ProposalStatus::Applied, Some(reason))?;
        }
        let failure = self.verify_written(&target, &original, &modified, kind).await;

        let proposal = &self.proposals[idx];
        let mut outcome = Outcome {
            validation_result: proposal
                .validation
                .as_ref()
                .and_then(|v| serde_json::to_value(v).ok()),
            backup_path: Some(backup.clone()),
            ..Outcome::default()
        };
        if let Some(v) = &proposal.validation {
            outcome
                .performance_metrics
                .insert("performance_impact".to_string(), v.performance_impact);
        }
        let recorded = match ledger.add(ImprovementRecord::from_proposal(proposal)).await {
            Ok(()) => ledger.record_outcome(&id, RecordStatus::Applied, outcome).await,
            Err(e) => Err(e),
        };

        // An applied change the ledger cannot track is undone like a failed one.
        let failure = match (failure, &recorded) {
            (Some(failure), _) => failure,
            (None, Err(e)) => format!("Ledger update failed: {}", e),
            (None, Ok(())) => {
                info!("Applied modification {} to {}", id, rel.display());
                return Ok(ApplyOutcome::Applied { backup });
            }
        };

        warn!("Rolling back modification {}: {}", id, failure);
        self.restore_file(&rel, &original).await?;
        self.proposals[idx].transition(ProposalStatus::RolledBack, Some(&failure))?;
        recorded?;
        ledger
            .record_outcome(&id, RecordStatus::RolledBack, Outcome::reason(failure.clone()))
            .await?;
        Ok(ApplyOutcome::RolledBack { reason: failure })
    }

    /// Post-write checks; `Some(reason)` means the write must be undone.
    async fn verify_written(
        &self,
        target: &Path,
        original: &str,
        modified: &str,
        kind: OpportunityKind,
    ) -> Option<String> {
        if !self.require_validation {
            return None;
        }
        let on_disk = match tokio::fs::read_to_string(target).await {
            Ok(s) => s,
            Err(e) => return Some(format!("Failed to read back written file: {}", e)),
        };
        if on_disk != modified {
            return Some("File content on disk differs from the proposal".to_string());
        }
        let result = self.validator.validate(original, &on_disk, Some(kind));
        if !result.is_valid {
            return Some(format!(
                "Re-validation failed: {}",
                result.primary_error().unwrap_or("safety score below threshold")
            ));
        }
        if !self.post_apply_check.is_empty() {
            match run_check(&self.post_apply_check, &self.root, self.post_apply_timeout).await {
                Ok(check) if check.success => {}
                Ok(check) => return Some(format!("Post-apply check failed: {}", check.summary(5))),
                Err(e) => return Some(format!("Post-apply check could not run: {}", e)),
            }
        }
        None
    }

    /// Back up the current content of `rel`, then write `content` to it.
    async fn restore_file(&self, rel: &Path, content: &str) -> Result<PathBuf, ApplyError> {
        let target = self.root.join(rel);
        let failed = |message: String| {
            error!("CRITICAL: rollback of {} failed: {}", target.display(), message);
            ApplyError::RollbackFailed {
                path: rel.to_path_buf(),
                message,
            }
        };
        let current = tokio::fs::read_to_string(&target)
            .await
            .map_err(|e| failed(format!("cannot read current content: {}", e)))?;
        let backup = self
            .backups
            .create(rel, &current)
            .await
            .map_err(|e| failed(e.to_string()))?;
        tokio::fs::write(&target, content)
            .await
            .map_err(|e| failed(e.to_string()))?;
        Ok(backup)
    }

    async fn record_failure(
        &self,
        idx: usize,
        ledger: &mut ImprovementLedger,
        reason: &str,
    ) -> Result<(), EvolveError> {
        let proposal = &self.proposals[idx];
        ledger.add(ImprovementRecord::from_proposal(proposal)).await?;
        ledger
            .record_outcome(&proposal.id, RecordStatus::Failed, Outcome::reason(reason))
            .await?;
        Ok(())
    }
}

pub fn unified_diff(path: &Path, original: &str, modified: &str) -> String {
    let name = path.display().to_string();
    similar::TextDiff::from_lines(original, modified)
        .unified_diff()
        .context_radius(3)
        .header(
            &format!("{} (original)", name),
            &format!("{} (modified)", name),
        )
        .to_string()
}
