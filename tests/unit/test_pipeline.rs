//! End-to-end cycles through `SelfModificationEngine`.

use evolvr::analysis::{CodeAnalyzer, OpportunityKind};
use evolvr::config::Config;
use evolvr::engine::SelfModificationEngine;
use evolvr::insights::{EvaluationInsights, KnowledgeSuggestion};
use evolvr::ledger::{FeedbackVerdict, ImprovementLedger, RecordStatus};
use evolvr::manager::AutoApplyGate;
use evolvr::testing::ScriptedCodeGenerator;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

const ORIGINAL: &str = "pub fn total(values: &[u32]) -> u32 {\n    let mut sum = 0;\n    for v in values {\n        sum += v;\n    }\n    sum\n}\n";
const IMPROVED: &str = "/// Sum of all values.\npub fn total(values: &[u32]) -> u32 {\n    values.iter().sum()\n}\n";

struct Workspace {
    dir: TempDir,
    root: PathBuf,
}

impl Workspace {
    fn new(files: &[(&str, &str)]) -> Self {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("src");
        for (name, content) in files {
            let path = root.join(name);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, content).unwrap();
        }
        Self { dir, root }
    }

    fn config(&self) -> Config {
        let mut config = Config::default();
        config.pipeline.source_root = self.root.clone();
        config.pipeline.backup_directory = self.dir.path().join("backups");
        config.pipeline.ledger_path = Some(self.dir.path().join("data/ledger.json"));
        config
    }

    fn read(&self, name: &str) -> String {
        std::fs::read_to_string(self.root.join(name)).unwrap()
    }
}

async fn engine(config: Config, script: ScriptedCodeGenerator) -> SelfModificationEngine {
    SelfModificationEngine::open(config, Arc::new(script))
        .await
        .unwrap()
}

fn fn_with_ifs(name: &str, n: usize) -> String {
    let body: String = (0..n).map(|i| format!("    if x == {} {{}}\n", i)).collect();
    format!("fn {}(x: u32) {{\n{}}}\n", name, body)
}

#[test]
fn test_complexity_opportunity_targets_most_complex_function() {
    let source = format!("{}{}", fn_with_ifs("tangled", 14), fn_with_ifs("moderate", 8));
    let ws = Workspace::new(&[("core.rs", &source)]);
    let analyzer = CodeAnalyzer::new(&ws.config());
    let analysis = analyzer
        .analyze(&ws.root, &EvaluationInsights::new(0.9, 0.9), &[])
        .unwrap();

    assert!((analysis.snapshot.metrics.average_complexity - 12.0).abs() < 1e-9);
    let opp = analysis
        .opportunities
        .iter()
        .find(|o| o.kind == OpportunityKind::ComplexityReduction)
        .unwrap();
    assert!((opp.priority - 0.8).abs() < f64::EPSILON);
    assert_eq!(opp.targets[0].name, "tangled");
    assert_eq!(opp.targets[0].complexity, 15);
    assert_eq!(opp.target_file(), Some(Path::new("core.rs")));
}

#[test]
fn test_gate_depends_on_confidence() {
    let gate = AutoApplyGate::from_config(&Config::default());
    assert!(gate.allows(&EvaluationInsights::new(0.55, 0.85)));
    assert!(!gate.allows(&EvaluationInsights::new(0.55, 0.5)));
}

#[tokio::test]
async fn test_unchanged_generation_creates_no_record() {
    let ws = Workspace::new(&[("lib.rs", ORIGINAL)]);
    let script = ScriptedCodeGenerator::new().respond("lib.rs", ORIGINAL);
    let engine = engine(ws.config(), script).await;

    let report = engine
        .run_cycle(&EvaluationInsights::new(0.55, 0.85), &[])
        .await
        .unwrap();

    assert!(report.skipped.is_none());
    assert!(report.generated.is_empty());
    assert_eq!(report.discarded.len(), 1);
    assert!(report.discarded[0].reason.contains("unchanged"));
    assert_eq!(engine.statistics().await.total_improvements, 0);
    assert_eq!(ws.read("lib.rs"), ORIGINAL);
}

#[tokio::test]
async fn test_cycle_applies_and_feedback_completes() {
    let ws = Workspace::new(&[("lib.rs", ORIGINAL)]);
    let script = ScriptedCodeGenerator::new().respond("lib.rs", IMPROVED);
    let config = ws.config();
    let ledger_path = config.pipeline.ledger_path.clone().unwrap();
    let engine = engine(config.clone(), script).await;

    let report = engine
        .run_cycle(&EvaluationInsights::new(0.55, 0.85), &[])
        .await
        .unwrap();
    assert!(report.gate_open);
    assert_eq!(report.applied.len(), 1);
    assert_eq!(ws.read("lib.rs"), IMPROVED);
    assert!(report.next_thresholds.is_some());

    let id = report.applied[0].clone();
    let resolved = engine
        .record_feedback(&id, FeedbackVerdict::Merged, Some(5), Some("looks good"))
        .await
        .unwrap();
    assert_eq!(resolved, id);

    let stats = engine.statistics().await;
    assert_eq!(stats.total_improvements, 1);
    assert_eq!(stats.successful_improvements, 1);
    assert_eq!(stats.most_common_type, Some(OpportunityKind::PerformanceImprovement));

    // A fresh process sees the same ledger
    let reopened = ImprovementLedger::open(Some(ledger_path), &config.policy)
        .await
        .unwrap();
    let record = reopened.get(&id).unwrap();
    assert_eq!(record.status, RecordStatus::Completed);
    assert_eq!(record.feedback.as_ref().unwrap().rating, Some(5));
}

#[tokio::test]
async fn test_rollback_after_restart_restores_original() {
    let ws = Workspace::new(&[("lib.rs", ORIGINAL)]);
    let config = ws.config();

    let id = {
        let script = ScriptedCodeGenerator::new().respond("lib.rs", IMPROVED);
        let engine = engine(config.clone(), script).await;
        let report = engine
            .run_cycle(&EvaluationInsights::new(0.55, 0.85), &[])
            .await
            .unwrap();
        report.applied[0].clone()
    };
    assert_eq!(ws.read("lib.rs"), IMPROVED);

    let engine = engine(config, ScriptedCodeGenerator::new()).await;
    engine.rollback(&id).await.unwrap();
    assert_eq!(ws.read("lib.rs"), ORIGINAL);

    let stats = engine.statistics().await;
    assert_eq!(stats.successful_improvements, 0);
    assert_eq!(stats.by_status.get(&RecordStatus::RolledBack), Some(&1));
}

#[tokio::test]
async fn test_unsafe_generation_is_rejected_and_recorded() {
    let ws = Workspace::new(&[("lib.rs", ORIGINAL)]);
    let script = ScriptedCodeGenerator::new().respond(
        "lib.rs",
        "pub fn total(values: &[u32]) -> u32 {\n    std::process::Command::new(\"sh\").status().ok();\n    values.iter().sum()\n}\n",
    );
    let engine = engine(ws.config(), script).await;

    let report = engine
        .run_cycle(&EvaluationInsights::new(0.55, 0.85), &[])
        .await
        .unwrap();
    assert_eq!(report.rejected.len(), 1);
    assert!(report.applied.is_empty());
    assert_eq!(ws.read("lib.rs"), ORIGINAL);

    let insights = engine.learning_insights().await;
    assert_eq!(insights.common_failure_reasons.len(), 1);
}

#[tokio::test]
async fn test_knowledge_suggestion_drives_a_reviewed_change() {
    let ws = Workspace::new(&[("lib.rs", ORIGINAL), ("util.rs", "pub fn one() -> u32 {\n    1\n}\n")]);
    let script = ScriptedCodeGenerator::new()
        .respond("util.rs", "/// Always one.\npub fn one() -> u32 {\n    1\n}\n");
    let engine = engine(ws.config(), script).await;
    let suggestions =
        vec![KnowledgeSuggestion::new("Document the helpers", 0.95).with_file("util.rs")];

    // Score above the performance trigger, so only the suggestion targets a file
    let report = engine
        .run_cycle(&EvaluationInsights::new(0.75, 0.4), &suggestions)
        .await
        .unwrap();
    assert!(!report.gate_open);
    assert_eq!(report.pending_review.len(), 1);
    assert_eq!(engine.pending_review().await, report.pending_review);

    let id = report.pending_review[0].clone();
    let diff = engine.diff(&id).await.unwrap();
    assert!(diff.contains("+/// Always one."));

    engine.apply_reviewed(&id).await.unwrap();
    assert!(ws.read("util.rs").starts_with("/// Always one."));
    assert!(engine.pending_review().await.is_empty());
    assert_eq!(engine.history().await.applied, 1);
}
