//! Proposal generation.
//!
//! Qualifying opportunities are turned into concrete file rewrites by an
//! external [`CodeGenerator`]. Its output is untrusted text: it is cleaned
//! up here and always goes through the validator before any write.

pub mod http;
pub mod proposal;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::analysis::{CodebaseSnapshot, ImprovementOpportunity, OpportunityKind};
use crate::config::Config;
use crate::errors::{CycleError, GenerationError};
use crate::ledger::TriggerRecommendations;
use crate::observability::telemetry::{preview, redact_secrets};

pub use http::HttpCodeGenerator;
pub use proposal::{ModificationProposal, ProposalStatus, StatusTransition};

/// Input handed to the code-generation collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub original_code: String,
    pub instruction: String,
    pub context: String,
    /// Display path of the file being rewritten
    pub target: String,
}

/// Text-in/text-out code generation. Implementations may be remote and
/// slow; callers bound every call with a timeout.
#[async_trait]
pub trait CodeGenerator: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<String>;
}

/// A generation attempt that produced no proposal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscardedGeneration {
    pub file_path: PathBuf,
    pub kind: OpportunityKind,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct GenerationOutcome {
    pub proposals: Vec<ModificationProposal>,
    pub discarded: Vec<DiscardedGeneration>,
}

const PRESERVE_CONSTRAINT: &str = "Preserve every public signature and the observable behavior. \
Return the complete file as Rust source only, without explanations.";

/// Instruction text for one opportunity.
pub fn build_instruction(opportunity: &ImprovementOpportunity) -> String {
    let target = opportunity
        .targets
        .first()
        .map(|t| format!("`{}`", t.display_name()))
        .unwrap_or_else(|| "the functions in this file".to_string());

    let task = match opportunity.kind {
        OpportunityKind::ComplexityReduction => format!(
            "Reduce the cyclomatic complexity of {} by extracting helper functions and \
             flattening nested conditionals.",
            target
        ),
        OpportunityKind::PerformanceImprovement => {
            let areas = if opportunity.improvement_areas.is_empty() {
                "general efficiency".to_string()
            } else {
                opportunity.improvement_areas.join(", ")
            };
            format!(
                "Improve the runtime efficiency of {}: avoid repeated work and needless \
                 allocation inside loops. Focus areas: {}.",
                target, areas
            )
        }
        OpportunityKind::ErrorHandling => "Add explicit error handling to the functions in this \
             file that lack it: return `Result`, propagate failures with `?` and attach context."
            .to_string(),
        OpportunityKind::KnowledgeBased => {
            format!("Apply this suggestion: {}", opportunity.description)
        }
    };

    format!("{}\n{}", task, PRESERVE_CONSTRAINT)
}

fn build_context(opportunity: &ImprovementOpportunity) -> String {
    let mut context = format!(
        "Opportunity: {} (priority {:.2})\n{}",
        opportunity.kind, opportunity.priority, opportunity.description
    );
    if !opportunity.affected.is_empty() {
        let names: Vec<String> = opportunity
            .affected
            .iter()
            .map(|f| format!("{} (complexity {})", f.display_name(), f.complexity))
            .collect();
        context.push_str(&format!("\nAffected functions: {}", names.join(", ")));
    }
    if let Some(category) = &opportunity.category {
        context.push_str(&format!("\nCategory: {}", category));
    }
    context
}

/// Expected impact by kind; negative means an improvement is expected.
pub fn expected_impact(kind: OpportunityKind) -> f64 {
    match kind {
        OpportunityKind::ComplexityReduction => -0.2,
        OpportunityKind::PerformanceImprovement => -0.3,
        OpportunityKind::ErrorHandling => 0.1,
        OpportunityKind::KnowledgeBased => -0.1,
    }
}

/// Remove one surrounding markdown code fence, if present.
pub fn strip_code_fences(response: &str) -> &str {
    let trimmed = response.trim();
    if !trimmed.starts_with("```") {
        return trimmed;
    }
    let body = match trimmed.find('\n') {
        Some(idx) => &trimmed[idx + 1..],
        None => return "",
    };
    let body = body.trim_end();
    body.strip_suffix("```").unwrap_or(body).trim_end()
}

/// Clean a collaborator response against the original file content.
pub fn normalize_response(response: &str, original: &str) -> Result<String, GenerationError> {
    let code = strip_code_fences(response);
    if code.trim().is_empty() {
        return Err(GenerationError::EmptyResponse);
    }
    let mut code = code.to_string();
    if original.ends_with('\n') && !code.ends_with('\n') {
        code.push('\n');
    }
    if code == original {
        return Err(GenerationError::Unchanged);
    }
    Ok(code)
}

/// `mod_<YYYYmmdd_HHMMSS>_<path hash % 10000>_<seq>`
pub fn proposal_id(at: DateTime<Utc>, file_path: &Path, seq: usize) -> String {
    let digest = Sha256::digest(file_path.to_string_lossy().as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    let path_hash = u64::from_be_bytes(prefix) % 10_000;
    format!("mod_{}_{}_{}", at.format("%Y%m%d_%H%M%S"), path_hash, seq)
}

pub struct ProposalGenerator {
    generator: Arc<dyn CodeGenerator>,
    timeout: Duration,
    min_priority: f64,
    max_proposals: usize,
}

impl ProposalGenerator {
    pub fn new(generator: Arc<dyn CodeGenerator>, config: &Config) -> Self {
        Self {
            generator,
            timeout: Duration::from_secs(config.pipeline.generation_timeout_secs),
            min_priority: config.policy.min_generation_priority,
            max_proposals: config.pipeline.max_proposals_per_cycle,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Opportunities that will be sent to the collaborator: above the
    /// priority floor and the adaptive threshold for their kind, one per
    /// target file, at most `max_proposals`.
    pub fn select<'a>(
        &self,
        opportunities: &'a [ImprovementOpportunity],
        thresholds: &TriggerRecommendations,
    ) -> Vec<(&'a ImprovementOpportunity, &'a Path)> {
        let mut files = HashSet::new();
        let mut selected = Vec::new();
        for opp in opportunities {
            if selected.len() >= self.max_proposals {
                break;
            }
            let threshold = thresholds.threshold_for(opp.kind);
            if opp.priority <= self.min_priority || opp.priority < threshold {
                debug!(
                    "Skipping {} opportunity: priority {:.2}, threshold {:.2}",
                    opp.kind, opp.priority, threshold
                );
                continue;
            }
            let Some(file) = opp.target_file() else {
                debug!("{}", GenerationError::NoTarget { kind: opp.kind.to_string() });
                continue;
            };
            if files.insert(file.to_path_buf()) {
                selected.push((opp, file));
            }
        }
        selected
    }

    pub async fn generate_proposals(
        &self,
        snapshot: &CodebaseSnapshot,
        opportunities: &[ImprovementOpportunity],
        thresholds: &TriggerRecommendations,
        stop: &AtomicBool,
    ) -> Result<GenerationOutcome, CycleError> {
        let mut outcome = GenerationOutcome::default();
        let started = Utc::now();

        for (seq, (opp, file)) in self.select(opportunities, thresholds).into_iter().enumerate() {
            if stop.load(Ordering::SeqCst) {
                return Err(CycleError::Cancelled);
            }

            let discard = |reason: String| DiscardedGeneration {
                file_path: file.to_path_buf(),
                kind: opp.kind,
                reason,
            };

            let Some(original) = snapshot.source(file) else {
                let err = GenerationError::NoTarget {
                    kind: opp.kind.to_string(),
                };
                warn!("{}: {} not in snapshot", err, file.display());
                outcome.discarded.push(discard(err.to_string()));
                continue;
            };

            let request = GenerationRequest {
                original_code: original.to_string(),
                instruction: build_instruction(opp),
                context: build_context(opp),
                target: file.display().to_string(),
            };

            let raw = match tokio::time::timeout(self.timeout, self.generator.generate(request)).await {
                Ok(Ok(raw)) => raw,
                Ok(Err(e)) => {
                    let err = GenerationError::Collaborator(redact_secrets(&e.to_string()));
                    warn!("Generation for {} failed: {}", file.display(), err);
                    outcome.discarded.push(discard(err.to_string()));
                    continue;
                }
                Err(_) => {
                    let err = GenerationError::Timeout {
                        seconds: self.timeout.as_secs(),
                    };
                    warn!("Generation for {} failed: {}", file.display(), err);
                    outcome.discarded.push(discard(err.to_string()));
                    continue;
                }
            };

            let modified = match normalize_response(&raw, original) {
                Ok(code) => code,
                Err(err) => {
                    info!("Discarding generation for {}: {}", file.display(), err);
                    outcome.discarded.push(discard(err.to_string()));
                    continue;
                }
            };

            let proposal = ModificationProposal::new(
                proposal_id(started, file, seq),
                file.to_path_buf(),
                original.to_string(),
                modified,
                opp.kind,
                format!("{}: {}", opp.description, opp.suggested_action),
                opp.priority,
                expected_impact(opp.kind),
            );
            debug!(
                "Proposal {} for {}: {}",
                proposal.id,
                file.display(),
                preview(&proposal.modified_code, 120)
            );
            outcome.proposals.push(proposal);
        }

        info!(
            "Generated {} proposals ({} discarded)",
            outcome.proposals.len(),
            outcome.discarded.len()
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::CodeAnalyzer;
    use crate::testing::ScriptedCodeGenerator;
    use std::collections::BTreeMap;

    fn snapshot(files: &[(&str, &str)]) -> CodebaseSnapshot {
        let analyzer = CodeAnalyzer::default();
        let modules: Vec<_> = files
            .iter()
            .map(|(p, s)| analyzer.analyze_source(Path::new(p), s).unwrap())
            .collect();
        CodebaseSnapshot {
            root: PathBuf::from("/repo"),
            metrics: crate::analysis::ComplexityMetrics::from_modules(&modules, 10),
            modules,
            sources: files
                .iter()
                .map(|(p, s)| (PathBuf::from(p), s.to_string()))
                .collect::<BTreeMap<_, _>>(),
            skipped: Vec::new(),
            taken_at: Utc::now(),
        }
    }

    fn opportunity(kind: OpportunityKind, priority: f64, module: &str) -> ImprovementOpportunity {
        ImprovementOpportunity {
            kind,
            priority,
            description: "desc".to_string(),
            suggested_action: "act".to_string(),
            targets: Vec::new(),
            affected: Vec::new(),
            module: Some(PathBuf::from(module)),
            improvement_areas: Vec::new(),
            category: None,
        }
    }

    fn generator(script: ScriptedCodeGenerator) -> ProposalGenerator {
        ProposalGenerator::new(Arc::new(script), &Config::default())
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```rust\nfn a() {}\n```"), "fn a() {}");
        assert_eq!(strip_code_fences("```\nfn a() {}\n```\n"), "fn a() {}");
        assert_eq!(strip_code_fences("  fn a() {}  "), "fn a() {}");
        assert_eq!(strip_code_fences("```"), "");
    }

    #[test]
    fn test_normalize_preserves_trailing_newline() {
        let code = normalize_response("```rust\nfn b() {}\n```", "fn a() {}\n").unwrap();
        assert_eq!(code, "fn b() {}\n");
        let code = normalize_response("fn b() {}", "fn a() {}").unwrap();
        assert_eq!(code, "fn b() {}");
    }

    #[test]
    fn test_normalize_discards_empty_and_unchanged() {
        assert!(matches!(
            normalize_response("```\n```", "fn a() {}\n"),
            Err(GenerationError::EmptyResponse)
        ));
        assert!(matches!(
            normalize_response("fn a() {}", "fn a() {}\n"),
            Err(GenerationError::Unchanged)
        ));
    }

    #[test]
    fn test_proposal_id_format() {
        let at = chrono::TimeZone::with_ymd_and_hms(&Utc, 2026, 3, 4, 5, 6, 7).unwrap();
        let id = proposal_id(at, Path::new("src/lib.rs"), 2);
        assert!(id.starts_with("mod_20260304_050607_"));
        assert!(id.ends_with("_2"));
        assert_eq!(id, proposal_id(at, Path::new("src/lib.rs"), 2));
        let hash: u64 = id.split('_').nth(3).unwrap().parse().unwrap();
        assert!(hash < 10_000);
    }

    #[test]
    fn test_instruction_mentions_constraint_for_every_kind() {
        for kind in OpportunityKind::ALL {
            let text = build_instruction(&opportunity(kind, 0.9, "a.rs"));
            assert!(text.contains("Preserve every public signature"));
        }
    }

    #[test]
    fn test_select_bounds_and_dedupes_files() {
        let gen = generator(ScriptedCodeGenerator::new());
        let opps = vec![
            opportunity(OpportunityKind::PerformanceImprovement, 0.9, "a.rs"),
            opportunity(OpportunityKind::KnowledgeBased, 0.85, "a.rs"),
            opportunity(OpportunityKind::ComplexityReduction, 0.8, "b.rs"),
            opportunity(OpportunityKind::KnowledgeBased, 0.75, "c.rs"),
            opportunity(OpportunityKind::KnowledgeBased, 0.72, "d.rs"),
            opportunity(OpportunityKind::ErrorHandling, 0.7, "e.rs"),
        ];
        let selected = gen.select(&opps, &TriggerRecommendations::default());
        let files: Vec<_> = selected.iter().map(|(_, f)| f.to_path_buf()).collect();
        assert_eq!(
            files,
            vec![PathBuf::from("a.rs"), PathBuf::from("b.rs"), PathBuf::from("c.rs")]
        );
    }

    #[test]
    fn test_select_respects_adaptive_threshold() {
        let gen = generator(ScriptedCodeGenerator::new());
        let mut thresholds = TriggerRecommendations::default();
        thresholds.base_threshold = 0.6;
        thresholds
            .type_multipliers
            .insert(OpportunityKind::ComplexityReduction, 1.5);
        let opps = vec![opportunity(OpportunityKind::ComplexityReduction, 0.8, "a.rs")];
        assert!(gen.select(&opps, &thresholds).is_empty());
    }

    #[tokio::test]
    async fn test_generate_builds_proposals_and_discards() {
        let snap = snapshot(&[
            ("a.rs", "fn a() {}\n"),
            ("b.rs", "fn b() {}\n"),
            ("c.rs", "fn c() {}\n"),
        ]);
        let script = ScriptedCodeGenerator::new()
            .respond("a.rs", "```rust\nfn a() { let _x = 1; }\n```")
            .respond("b.rs", "fn b() {}\n")
            .fail("c.rs", "model offline");
        let gen = generator(script);
        let opps = vec![
            opportunity(OpportunityKind::PerformanceImprovement, 0.9, "a.rs"),
            opportunity(OpportunityKind::ComplexityReduction, 0.8, "b.rs"),
            opportunity(OpportunityKind::KnowledgeBased, 0.75, "c.rs"),
        ];
        let stop = AtomicBool::new(false);
        let outcome = gen
            .generate_proposals(&snap, &opps, &TriggerRecommendations::default(), &stop)
            .await
            .unwrap();

        assert_eq!(outcome.proposals.len(), 1);
        let p = &outcome.proposals[0];
        assert_eq!(p.file_path, PathBuf::from("a.rs"));
        assert_eq!(p.original_code, "fn a() {}\n");
        assert_eq!(p.modified_code, "fn a() { let _x = 1; }\n");
        assert_eq!(p.status, ProposalStatus::Proposed);
        assert!(p.id.ends_with("_0"));

        assert_eq!(outcome.discarded.len(), 2);
        assert!(outcome.discarded[0].reason.contains("unchanged"));
        assert!(outcome.discarded[1].reason.contains("model offline"));
    }

    #[tokio::test]
    async fn test_generation_timeout_drops_only_that_proposal() {
        let snap = snapshot(&[("a.rs", "fn a() {}\n"), ("b.rs", "fn b() {}\n")]);
        let script = ScriptedCodeGenerator::new()
            .delay("a.rs", Duration::from_millis(200))
            .respond("a.rs", "fn a() { let _ = 0; }")
            .respond("b.rs", "fn b() { let _ = 0; }");
        let gen = generator(script).with_timeout(Duration::from_millis(20));
        let opps = vec![
            opportunity(OpportunityKind::PerformanceImprovement, 0.9, "a.rs"),
            opportunity(OpportunityKind::ComplexityReduction, 0.8, "b.rs"),
        ];
        let outcome = gen
            .generate_proposals(&snap, &opps, &TriggerRecommendations::default(), &AtomicBool::new(false))
            .await
            .unwrap();
        assert_eq!(outcome.proposals.len(), 1);
        assert_eq!(outcome.proposals[0].file_path, PathBuf::from("b.rs"));
        assert!(outcome.discarded[0].reason.contains("timed out"));
    }

    #[tokio::test]
    async fn test_stop_flag_cancels_generation() {
        let snap = snapshot(&[("a.rs", "fn a() {}\n")]);
        let gen = generator(ScriptedCodeGenerator::new().respond("a.rs", "fn a() { let _ = 0; }"));
        let opps = vec![opportunity(OpportunityKind::PerformanceImprovement, 0.9, "a.rs")];
        let stop = AtomicBool::new(true);
        let result = gen
            .generate_proposals(&snap, &opps, &TriggerRecommendations::default(), &stop)
            .await;
        assert!(matches!(result, Err(CycleError::Cancelled)));
    }
}
