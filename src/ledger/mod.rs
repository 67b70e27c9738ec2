//! Append-only history of proposal outcomes.
//!
//! Every applied or failed proposal gets exactly one record. Records are
//! never removed (except by an explicit `reset`); only their status,
//! feedback and audit fields change. The derived views in [`stats`] feed
//! the adaptive thresholds of the next cycle.

pub mod record;
pub mod stats;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::analysis::OpportunityKind;
use crate::config::PolicyConfig;
use crate::errors::LedgerError;

pub use record::{Feedback, FeedbackVerdict, ImprovementRecord, RecordStatus, StatusChange};
pub use stats::{
    LearningInsights, LedgerStatistics, PerformanceTrends, PriorityRange, TriggerRecommendations,
    Trend, TypeStats,
};

/// On-disk form of the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerDocument {
    #[serde(default)]
    pub improvements: Vec<ImprovementRecord>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

/// Full export: records plus every derived view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerExport {
    pub statistics: LedgerStatistics,
    pub learning_insights: LearningInsights,
    pub trigger_recommendations: TriggerRecommendations,
    pub performance_trends: PerformanceTrends,
    pub improvements: Vec<ImprovementRecord>,
    pub exported_at: DateTime<Utc>,
}

/// Extra data attached when an outcome is recorded.
#[derive(Debug, Clone, Default)]
pub struct Outcome {
    pub reason: Option<String>,
    pub validation_result: Option<serde_json::Value>,
    pub performance_metrics: BTreeMap<String, f64>,
    pub backup_path: Option<PathBuf>,
}

impl Outcome {
    pub fn reason(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::default()
        }
    }
}

pub struct ImprovementLedger {
    records: Vec<ImprovementRecord>,
    storage_path: Option<PathBuf>,
    policy: PolicyConfig,
    last_save_error: Option<String>,
}

impl ImprovementLedger {
    /// Empty ledger. With a storage path, every mutation is written through.
    pub fn new(storage_path: Option<PathBuf>, policy: &PolicyConfig) -> Self {
        Self {
            records: Vec::new(),
            storage_path,
            policy: policy.clone(),
            last_save_error: None,
        }
    }

    /// Load from `storage_path`. A missing file yields an empty ledger; an
    /// unreadable or malformed one is an error so history is never
    /// silently replaced.
    pub async fn open(
        storage_path: Option<PathBuf>,
        policy: &PolicyConfig,
    ) -> Result<Self, LedgerError> {
        let mut ledger = Self::new(storage_path, policy);
        let Some(path) = ledger.storage_path.clone() else {
            return Ok(ledger);
        };
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(ledger);
        }

        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| LedgerError::Storage {
                path: path.clone(),
                message: e.to_string(),
            })?;
        let document: LedgerDocument = serde_json::from_str(&content)
            .map_err(|e| LedgerError::Corrupted(format!("{}: {}", path.display(), e)))?;
        ledger.records = document.improvements;
        info!(
            "Loaded {} improvements from {}",
            ledger.records.len(),
            path.display()
        );
        Ok(ledger)
    }

    pub fn storage_path(&self) -> Option<&Path> {
        self.storage_path.as_deref()
    }

    pub fn policy(&self) -> &PolicyConfig {
        &self.policy
    }

    /// Message of the most recent failed save, cleared by the next success.
    pub fn last_save_error(&self) -> Option<&str> {
        self.last_save_error.as_deref()
    }

    pub fn records(&self) -> &[ImprovementRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, improvement_id: &str) -> Option<&ImprovementRecord> {
        self.records
            .iter()
            .find(|r| r.improvement_id == improvement_id)
    }

    pub fn by_type(&self, kind: OpportunityKind) -> Vec<&ImprovementRecord> {
        self.records
            .iter()
            .filter(|r| r.improvement_type == kind)
            .collect()
    }

    pub fn by_file(&self, file_path: &Path) -> Vec<&ImprovementRecord> {
        self.records
            .iter()
            .filter(|r| r.file_path == file_path)
            .collect()
    }

    pub fn by_status(&self, status: RecordStatus) -> Vec<&ImprovementRecord> {
        self.records.iter().filter(|r| r.status == status).collect()
    }

    pub async fn add(&mut self, record: ImprovementRecord) -> Result<(), LedgerError> {
        if self.get(&record.improvement_id).is_some() {
            return Err(LedgerError::Duplicate(record.improvement_id));
        }
        info!(
            "Added improvement {}: {} on {}",
            record.improvement_id,
            record.improvement_type,
            record.file_path.display()
        );
        self.records.push(record);
        self.persist().await;
        Ok(())
    }

    /// Move a record to `status`, attaching outcome data. Transitions that
    /// go backwards (other than a rollback of a landed change) are refused.
    pub async fn record_outcome(
        &mut self,
        improvement_id: &str,
        status: RecordStatus,
        outcome: Outcome,
    ) -> Result<(), LedgerError> {
        let record = self
            .records
            .iter_mut()
            .find(|r| r.improvement_id == improvement_id)
            .ok_or_else(|| LedgerError::NotFound(improvement_id.to_string()))?;

        let from = record.status;
        if !record.change_status(status, outcome.reason.as_deref()) {
            return Err(LedgerError::InvalidTransition {
                from: from.to_string(),
                to: status.to_string(),
            });
        }
        if let Some(validation) = outcome.validation_result {
            record.validation_result = validation;
        }
        if status == RecordStatus::Failed {
            if let (Some(reason), Some(map)) =
                (&outcome.reason, record.validation_result.as_object_mut())
            {
                map.insert("error".to_string(), serde_json::Value::String(reason.clone()));
            }
        }
        record.performance_metrics.extend(outcome.performance_metrics);
        if outcome.backup_path.is_some() {
            record.backup_path = outcome.backup_path;
        }

        info!("Recorded outcome for improvement {}: {}", improvement_id, status);
        self.persist().await;
        Ok(())
    }

    /// Attach review feedback, looked up by improvement id or branch name.
    /// A merge completes an applied record; a rejection is kept and makes
    /// the record count as unsuccessful. Returns the improvement id.
    pub async fn record_feedback(
        &mut self,
        key: &str,
        verdict: FeedbackVerdict,
        rating: Option<u8>,
        notes: Option<&str>,
    ) -> Result<String, LedgerError> {
        let record = self
            .records
            .iter_mut()
            .find(|r| r.improvement_id == key || r.branch.as_deref() == Some(key))
            .ok_or_else(|| LedgerError::NotFound(key.to_string()))?;

        record.feedback = Some(Feedback {
            verdict,
            rating: rating.map(|r| r.clamp(1, 5)),
            recorded_at: Utc::now(),
        });
        if let Some(notes) = notes {
            record.review_notes = Some(notes.to_string());
        }
        if verdict == FeedbackVerdict::Merged && record.status == RecordStatus::Applied {
            record.change_status(RecordStatus::Completed, Some("merged"));
        }

        let id = record.improvement_id.clone();
        info!("Recorded {:?} feedback for improvement {}", verdict, id);
        self.persist().await;
        Ok(id)
    }

    pub async fn set_branch(&mut self, improvement_id: &str, branch: &str) -> Result<(), LedgerError> {
        let record = self
            .records
            .iter_mut()
            .find(|r| r.improvement_id == improvement_id)
            .ok_or_else(|| LedgerError::NotFound(improvement_id.to_string()))?;
        record.branch = Some(branch.to_string());
        self.persist().await;
        Ok(())
    }

    pub async fn reset(&mut self) {
        self.records.clear();
        self.persist().await;
        info!("Improvement history reset");
    }

    pub fn statistics(&self) -> LedgerStatistics {
        stats::statistics(&self.records)
    }

    pub fn learning_insights(&self) -> LearningInsights {
        stats::learning_insights(&self.records, &self.policy)
    }

    pub fn trigger_recommendations(&self) -> TriggerRecommendations {
        stats::trigger_recommendations(&self.records, &self.policy)
    }

    pub fn performance_trends(&self) -> PerformanceTrends {
        stats::performance_trends(&self.records)
    }

    pub fn to_document(&self) -> LedgerDocument {
        LedgerDocument {
            improvements: self.records.clone(),
            last_updated: Some(Utc::now()),
        }
    }

    pub fn export(&self) -> LedgerExport {
        LedgerExport {
            statistics: self.statistics(),
            learning_insights: self.learning_insights(),
            trigger_recommendations: self.trigger_recommendations(),
            performance_trends: self.performance_trends(),
            improvements: self.records.clone(),
            exported_at: Utc::now(),
        }
    }

    /// Write records and every derived view. The file can be opened again
    /// as a ledger.
    pub async fn export_to_json(&self, path: &Path) -> Result<(), LedgerError> {
        write_json(path, &self.export()).await?;
        info!("Exported {} improvements to {}", self.records.len(), path.display());
        Ok(())
    }

    /// Write the ledger document to its storage path, if any.
    pub async fn save(&self) -> Result<(), LedgerError> {
        match &self.storage_path {
            Some(path) => write_json(path, &self.to_document()).await,
            None => Ok(()),
        }
    }

    /// Save, logging instead of failing. Memory stays authoritative.
    async fn persist(&mut self) {
        match self.save().await {
            Ok(()) => self.last_save_error = None,
            Err(e) => {
                error!("Failed to save improvement history: {}", e);
                self.last_save_error = Some(e.to_string());
            }
        }
    }
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), LedgerError> {
    let storage_err = |message: String| LedgerError::Storage {
        path: path.to_path_buf(),
        message,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| storage_err(e.to_string()))?;
    }
    let content = serde_json::to_string_pretty(value).map_err(|e| storage_err(e.to_string()))?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, content)
        .await
        .map_err(|e| storage_err(e.to_string()))?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        warn!("Atomic rename failed for {}: {}", path.display(), e);
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(storage_err(e.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::ModificationProposal;
    use tempfile::TempDir;

    fn proposal(id: &str, kind: OpportunityKind) -> ModificationProposal {
        ModificationProposal::new(
            id.to_string(),
            PathBuf::from("src/a.rs"),
            "fn a() {}\n".to_string(),
            "fn a() { }\n".to_string(),
            kind,
            "tidy".to_string(),
            0.8,
            -0.1,
        )
    }

    fn record(id: &str) -> ImprovementRecord {
        ImprovementRecord::from_proposal(&proposal(id, OpportunityKind::ComplexityReduction))
    }

    #[tokio::test]
    async fn test_add_rejects_duplicates() {
        let mut ledger = ImprovementLedger::new(None, &PolicyConfig::default());
        ledger.add(record("a")).await.unwrap();
        let err = ledger.add(record("a")).await.unwrap_err();
        assert!(matches!(err, LedgerError::Duplicate(_)));
        assert_eq!(ledger.len(), 1);
    }

    #[tokio::test]
    async fn test_outcome_transitions_are_validated() {
        let mut ledger = ImprovementLedger::new(None, &PolicyConfig::default());
        ledger.add(record("a")).await.unwrap();
        ledger
            .record_outcome("a", RecordStatus::Applied, Outcome::default())
            .await
            .unwrap();
        let err = ledger
            .record_outcome("a", RecordStatus::Pending, Outcome::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidTransition { .. }));
        assert!(matches!(
            ledger
                .record_outcome("missing", RecordStatus::Applied, Outcome::default())
                .await,
            Err(LedgerError::NotFound(_))
        ));
        assert_eq!(ledger.get("a").unwrap().status, RecordStatus::Applied);
    }

    #[tokio::test]
    async fn test_failed_outcome_keeps_reason() {
        let mut ledger = ImprovementLedger::new(None, &PolicyConfig::default());
        ledger.add(record("a")).await.unwrap();
        ledger
            .record_outcome("a", RecordStatus::Failed, Outcome::reason("unsafe"))
            .await
            .unwrap();
        let r = ledger.get("a").unwrap();
        assert_eq!(r.failure_reason().as_deref(), Some("unsafe"));
        assert_eq!(ledger.by_status(RecordStatus::Failed).len(), 1);
    }

    #[tokio::test]
    async fn test_feedback_by_branch() {
        let mut ledger = ImprovementLedger::new(None, &PolicyConfig::default());
        ledger.add(record("a")).await.unwrap();
        ledger
            .record_outcome("a", RecordStatus::Applied, Outcome::default())
            .await
            .unwrap();
        ledger.set_branch("a", "evolvr/a").await.unwrap();

        let id = ledger
            .record_feedback("evolvr/a", FeedbackVerdict::Merged, Some(9), Some("nice"))
            .await
            .unwrap();
        assert_eq!(id, "a");
        let r = ledger.get("a").unwrap();
        assert_eq!(r.status, RecordStatus::Completed);
        assert_eq!(r.feedback.as_ref().unwrap().rating, Some(5));
        assert_eq!(r.review_notes.as_deref(), Some("nice"));
    }

    #[tokio::test]
    async fn test_rejected_feedback_lowers_success_rate() {
        let mut ledger = ImprovementLedger::new(None, &PolicyConfig::default());
        ledger.add(record("a")).await.unwrap();
        ledger
            .record_outcome("a", RecordStatus::Applied, Outcome::default())
            .await
            .unwrap();
        assert_eq!(ledger.statistics().success_rate, 1.0);
        ledger
            .record_feedback("a", FeedbackVerdict::Rejected, None, None)
            .await
            .unwrap();
        assert_eq!(ledger.get("a").unwrap().status, RecordStatus::Applied);
        assert_eq!(ledger.statistics().success_rate, 0.0);
    }

    #[tokio::test]
    async fn test_save_and_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data").join("history.json");
        let mut ledger = ImprovementLedger::new(Some(path.clone()), &PolicyConfig::default());
        ledger.add(record("a")).await.unwrap();
        ledger
            .record_outcome("a", RecordStatus::Failed, Outcome::reason("syntax"))
            .await
            .unwrap();
        assert!(ledger.last_save_error().is_none());

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(raw["improvements"].is_array());
        assert!(raw["last_updated"].is_string());

        let reopened = ImprovementLedger::open(Some(path), &PolicyConfig::default())
            .await
            .unwrap();
        assert_eq!(reopened.records(), ledger.records());
    }

    #[tokio::test]
    async fn test_corrupted_document_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.json");
        std::fs::write(&path, "{not json").unwrap();
        let result = ImprovementLedger::open(Some(path), &PolicyConfig::default()).await;
        assert!(matches!(result, Err(LedgerError::Corrupted(_))));
    }

    #[tokio::test]
    async fn test_save_failure_keeps_memory() {
        let dir = TempDir::new().unwrap();
        // A directory where the file should be makes every write fail
        let path = dir.path().join("history.json");
        std::fs::create_dir_all(path.with_extension("json.tmp")).unwrap();
        let mut ledger = ImprovementLedger::new(Some(path), &PolicyConfig::default());
        ledger.add(record("a")).await.unwrap();
        assert_eq!(ledger.len(), 1);
        assert!(ledger.last_save_error().is_some());
    }

    #[tokio::test]
    async fn test_reset_clears_records() {
        let mut ledger = ImprovementLedger::new(None, &PolicyConfig::default());
        ledger.add(record("a")).await.unwrap();
        ledger.reset().await;
        assert!(ledger.is_empty());
    }
}
