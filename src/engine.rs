//! Periodic self-modification cycle.
//!
//! Only one cycle runs at a time: proposals capture file content by value
//! at analysis time, and a second concurrent cycle could write the same
//! file underneath them. The cycle lock is taken with `try_lock`, so a
//! concurrent attempt fails fast instead of queueing.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, Instrument};

use crate::analysis::CodeAnalyzer;
use crate::config::Config;
use crate::errors::{CycleError, EvolveError, Result};
use crate::generation::CodeGenerator;
use crate::insights::{EvaluationInsights, KnowledgeSuggestion};
use crate::ledger::{
    FeedbackVerdict, ImprovementLedger, LearningInsights, LedgerStatistics, PerformanceTrends,
    TriggerRecommendations,
};
use crate::manager::{ApplyOutcome, CycleReport, ModificationHistory, ModificationManager};
use crate::observability::telemetry::{enter_cycle, track_stage};

struct EngineState {
    manager: ModificationManager,
    ledger: ImprovementLedger,
}

pub struct SelfModificationEngine {
    config: Config,
    analyzer: CodeAnalyzer,
    state: Mutex<EngineState>,
    interactions: AtomicU64,
    cycles: AtomicU64,
    stop: AtomicBool,
}

impl SelfModificationEngine {
    pub fn new(
        config: Config,
        generator: Arc<dyn CodeGenerator>,
        ledger: ImprovementLedger,
    ) -> Result<Self> {
        config.validate()?;
        let manager = ModificationManager::new(&config, generator)?;
        Ok(Self {
            analyzer: CodeAnalyzer::new(&config),
            state: Mutex::new(EngineState { manager, ledger }),
            config,
            interactions: AtomicU64::new(0),
            cycles: AtomicU64::new(0),
            stop: AtomicBool::new(false),
        })
    }

    /// Build an engine with the ledger loaded from the configured path.
    pub async fn open(config: Config, generator: Arc<dyn CodeGenerator>) -> Result<Self> {
        let ledger =
            ImprovementLedger::open(config.pipeline.ledger_path.clone(), &config.policy).await?;
        Self::new(config, generator, ledger)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn interactions(&self) -> u64 {
        self.interactions.load(Ordering::SeqCst)
    }

    pub fn cycles_run(&self) -> u64 {
        self.cycles.load(Ordering::SeqCst)
    }

    /// Count one interaction. Returns true when a cycle is due.
    pub fn record_interaction(&self) -> bool {
        let n = self.interactions.fetch_add(1, Ordering::SeqCst) + 1;
        n % self.config.pipeline.cycle_every_interactions.max(1) == 0
    }

    /// Ask a running cycle to stop before its next proposal.
    pub fn request_stop(&self) {
        info!("Stop requested for the self-modification cycle");
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Count an interaction and run a cycle if one is due.
    pub async fn on_interaction(
        &self,
        insights: &EvaluationInsights,
        suggestions: &[KnowledgeSuggestion],
    ) -> Result<Option<CycleReport>> {
        if !self.record_interaction() {
            return Ok(None);
        }
        self.run_cycle(insights, suggestions).await.map(Some)
    }

    pub async fn run_cycle(
        &self,
        insights: &EvaluationInsights,
        suggestions: &[KnowledgeSuggestion],
    ) -> Result<CycleReport> {
        if !self.config.pipeline.enable_self_modification {
            return Err(CycleError::Disabled.into());
        }
        let mut guard = self
            .state
            .try_lock()
            .map_err(|_| EvolveError::from(CycleError::AlreadyRunning))?;
        self.stop.store(false, Ordering::SeqCst);

        let cycle = self.cycles.fetch_add(1, Ordering::SeqCst) + 1;
        let span = enter_cycle(cycle);
        let state = &mut *guard;
        let report = self
            .cycle(cycle, state, insights, suggestions)
            .instrument(span.clone())
            .await?;

        span.record("proposals", report.generated.len() as u64);
        span.record("applied", report.applied.len() as u64);
        Ok(report)
    }

    async fn cycle(
        &self,
        cycle: u64,
        state: &mut EngineState,
        insights: &EvaluationInsights,
        suggestions: &[KnowledgeSuggestion],
    ) -> Result<CycleReport> {
        let root = self.config.pipeline.source_root.as_path();
        info!("Beginning self-modification cycle {} on {}", cycle, root.display());

        let analysis = track_stage("analyze", || async move {
            self.analyzer.analyze(root, insights, suggestions)
        })
        .await?;

        let thresholds = state.ledger.trigger_recommendations();
        let potential = analysis.improvement_potential;

        let mut report = if potential < thresholds.base_threshold {
            info!(
                "Improvement potential {:.2} below threshold {:.2}; skipping generation",
                potential, thresholds.base_threshold
            );
            CycleReport {
                skipped: Some(format!(
                    "improvement potential {:.2} below threshold {:.2}",
                    potential, thresholds.base_threshold
                )),
                ..CycleReport::default()
            }
        } else {
            let EngineState { manager, ledger } = &mut *state;
            let (snapshot, opportunities) = (&analysis.snapshot, &analysis.opportunities);
            let (thresholds, stop) = (&thresholds, &self.stop);
            track_stage("consider", || async move {
                manager
                    .consider_modifications(snapshot, opportunities, insights, thresholds, ledger, stop)
                    .await
            })
            .await?
        };

        report.cycle = cycle;
        report.improvement_potential = potential;
        report.opportunities = analysis.opportunities.len();
        report.recommendations = analysis.recommendations;
        report.next_thresholds = Some(state.ledger.trigger_recommendations());

        info!(
            "Cycle {} finished: {} applied, {} pending review",
            cycle,
            report.applied.len(),
            report.pending_review.len()
        );
        Ok(report)
    }

    pub async fn rollback(&self, id: &str) -> Result<()> {
        let mut guard = self.state.lock().await;
        let EngineState { manager, ledger } = &mut *guard;
        manager.rollback_modification(id, ledger).await
    }

    pub async fn apply_reviewed(&self, id: &str) -> Result<ApplyOutcome> {
        let mut guard = self.state.lock().await;
        let EngineState { manager, ledger } = &mut *guard;
        manager.approve_and_apply(id, ledger).await
    }

    pub async fn reject_reviewed(&self, id: &str, reason: &str) -> Result<()> {
        let mut guard = self.state.lock().await;
        let EngineState { manager, ledger } = &mut *guard;
        manager.reject(id, reason, ledger).await
    }

    pub async fn record_feedback(
        &self,
        key: &str,
        verdict: FeedbackVerdict,
        rating: Option<u8>,
        notes: Option<&str>,
    ) -> Result<String> {
        let mut guard = self.state.lock().await;
        Ok(guard.ledger.record_feedback(key, verdict, rating, notes).await?)
    }

    pub async fn diff(&self, id: &str) -> Result<String> {
        Ok(self.state.lock().await.manager.generate_diff_report(id)?)
    }

    pub async fn history(&self) -> ModificationHistory {
        self.state.lock().await.manager.modification_history()
    }

    pub async fn pending_review(&self) -> Vec<String> {
        self.state
            .lock()
            .await
            .manager
            .pending_review()
            .iter()
            .map(|p| p.id.clone())
            .collect()
    }

    pub async fn statistics(&self) -> LedgerStatistics {
        self.state.lock().await.ledger.statistics()
    }

    pub async fn learning_insights(&self) -> LearningInsights {
        self.state.lock().await.ledger.learning_insights()
    }

    pub async fn performance_trends(&self) -> PerformanceTrends {
        self.state.lock().await.ledger.performance_trends()
    }

    pub async fn trigger_recommendations(&self) -> TriggerRecommendations {
        self.state.lock().await.ledger.trigger_recommendations()
    }

    pub async fn export(&self, path: &Path) -> Result<()> {
        Ok(self.state.lock().await.ledger.export_to_json(path).await?)
    }
}
