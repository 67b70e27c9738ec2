//! Ledger persistence and the adaptive thresholds derived from it.

use evolvr::analysis::OpportunityKind;
use evolvr::config::PolicyConfig;
use evolvr::errors::LedgerError;
use evolvr::generation::ModificationProposal;
use evolvr::ledger::{
    FeedbackVerdict, ImprovementLedger, ImprovementRecord, LedgerDocument, Outcome, RecordStatus,
};
use std::path::PathBuf;
use tempfile::TempDir;

fn record(id: &str, kind: OpportunityKind, file: &str, priority: f64) -> ImprovementRecord {
    let proposal = ModificationProposal::new(
        id.to_string(),
        PathBuf::from(file),
        "fn a() {}\n".to_string(),
        "/// A.\nfn a() {}\n".to_string(),
        kind,
        "test".to_string(),
        priority,
        -0.1,
    );
    ImprovementRecord::from_proposal(&proposal)
}

async fn add_with_status(
    ledger: &mut ImprovementLedger,
    id: &str,
    kind: OpportunityKind,
    status: RecordStatus,
) {
    ledger.add(record(id, kind, "lib.rs", 0.8)).await.unwrap();
    let outcome = match status {
        RecordStatus::Failed => Outcome::reason("Post-apply check failed"),
        _ => Outcome::default(),
    };
    ledger.record_outcome(id, status, outcome).await.unwrap();
}

#[tokio::test]
async fn test_repeated_failures_tighten_the_kind() {
    let policy = PolicyConfig::default();
    let mut ledger = ImprovementLedger::new(None, &policy);
    for i in 0..5 {
        add_with_status(
            &mut ledger,
            &format!("perf_{}", i),
            OpportunityKind::PerformanceImprovement,
            RecordStatus::Failed,
        )
        .await;
    }

    let rec = ledger.trigger_recommendations();
    assert_eq!(
        rec.type_multipliers.get(&OpportunityKind::PerformanceImprovement),
        Some(&1.2)
    );
    assert!((rec.base_threshold - 0.6).abs() < 1e-9);
    assert!((rec.threshold_for(OpportunityKind::PerformanceImprovement) - 0.72).abs() < 1e-9);
    assert!(rec.threshold_for(OpportunityKind::ErrorHandling) < 0.72);
}

#[tokio::test]
async fn test_export_reimports_with_identical_statistics() {
    let dir = TempDir::new().unwrap();
    let policy = PolicyConfig::default();
    let mut ledger = ImprovementLedger::new(Some(dir.path().join("ledger.json")), &policy);

    add_with_status(&mut ledger, "a", OpportunityKind::ErrorHandling, RecordStatus::Applied).await;
    add_with_status(&mut ledger, "b", OpportunityKind::ErrorHandling, RecordStatus::Failed).await;
    add_with_status(&mut ledger, "c", OpportunityKind::KnowledgeBased, RecordStatus::Applied).await;
    ledger
        .record_feedback("c", FeedbackVerdict::Rejected, Some(2), None)
        .await
        .unwrap();

    let export_path = dir.path().join("export/ledger_export.json");
    ledger.export_to_json(&export_path).await.unwrap();

    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&export_path).unwrap()).unwrap();
    for key in [
        "statistics",
        "learning_insights",
        "trigger_recommendations",
        "performance_trends",
        "improvements",
    ] {
        assert!(raw.get(key).is_some(), "missing {}", key);
    }

    let reimported = ImprovementLedger::open(Some(export_path), &policy).await.unwrap();
    assert_eq!(reimported.len(), 3);
    assert_eq!(reimported.statistics(), ledger.statistics());
    assert_eq!(reimported.trigger_recommendations(), ledger.trigger_recommendations());
    assert_eq!(reimported.statistics().successful_improvements, 1);
}

#[tokio::test]
async fn test_document_round_trip_keeps_history() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ledger.json");
    let policy = PolicyConfig::default();
    let mut ledger = ImprovementLedger::new(Some(path.clone()), &policy);
    add_with_status(&mut ledger, "a", OpportunityKind::ComplexityReduction, RecordStatus::Applied).await;
    ledger
        .record_outcome("a", RecordStatus::RolledBack, Outcome::reason("regressed"))
        .await
        .unwrap();

    let document: LedgerDocument =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert!(document.last_updated.is_some());
    let record = &document.improvements[0];
    assert_eq!(record.status, RecordStatus::RolledBack);
    assert_eq!(record.rollback_count, 1);
    assert_eq!(record.status_history.len(), 2);
    assert_eq!(record.failure_reason().as_deref(), Some("regressed"));
}

#[tokio::test]
async fn test_corrupted_document_is_not_replaced() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ledger.json");
    std::fs::write(&path, "{ not json").unwrap();

    let result = ImprovementLedger::open(Some(path.clone()), &PolicyConfig::default()).await;
    assert!(matches!(result, Err(LedgerError::Corrupted(_))));
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "{ not json");
}

#[tokio::test]
async fn test_transitions_are_checked() {
    let mut ledger = ImprovementLedger::new(None, &PolicyConfig::default());
    add_with_status(&mut ledger, "a", OpportunityKind::ErrorHandling, RecordStatus::Failed).await;
    let err = ledger
        .record_outcome("a", RecordStatus::Applied, Outcome::default())
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidTransition { .. }));
    assert!(matches!(
        ledger
            .record_outcome("missing", RecordStatus::Applied, Outcome::default())
            .await,
        Err(LedgerError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_merged_improvement_cannot_be_rolled_back() {
    let mut ledger = ImprovementLedger::new(None, &PolicyConfig::default());
    add_with_status(&mut ledger, "p", OpportunityKind::ErrorHandling, RecordStatus::Applied).await;
    ledger
        .record_feedback("p", FeedbackVerdict::Merged, Some(5), None)
        .await
        .unwrap();
    assert_eq!(ledger.get("p").unwrap().status, RecordStatus::Completed);

    let err = ledger
        .record_outcome("p", RecordStatus::RolledBack, Outcome::reason("late rollback"))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidTransition { .. }));
    let record = ledger.get("p").unwrap();
    assert_eq!(record.status, RecordStatus::Completed);
    assert_eq!(record.rollback_count, 0);
}
