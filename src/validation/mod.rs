//! Multi-stage validation of a proposed file rewrite.
//!
//! Stages: syntax, safety, structural, performance estimate, functional.
//! A syntax failure short-circuits the rest. Validation does no I/O and
//! depends only on its inputs and the rule configuration.

pub mod functional;
pub mod performance;
pub mod safety;
pub mod structure;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

use crate::analysis::{CodeAnalyzer, OpportunityKind};
use crate::config::ValidationConfig;
use crate::errors::EvolveError;
use safety::SafetyChecker;

/// Per-stage outcome recorded alongside a validation verdict.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationMetadata {
    pub modification_kind: Option<OpportunityKind>,
    pub code_length: usize,
    pub syntax_ok: bool,
    pub safety_ok: bool,
    pub functional_ok: bool,
    pub safety_errors: usize,
    pub safety_warnings: usize,
    pub practice_bonus: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub safety_score: f64,
    pub performance_impact: f64,
    pub metadata: ValidationMetadata,
    pub validated_at: DateTime<Utc>,
}

impl ValidationResult {
    /// Same verdict, ignoring when it was produced.
    pub fn same_verdict(&self, other: &ValidationResult) -> bool {
        self.is_valid == other.is_valid
            && self.errors == other.errors
            && self.warnings == other.warnings
            && self.safety_score == other.safety_score
            && self.performance_impact == other.performance_impact
            && self.metadata == other.metadata
    }

    /// First error, for ledger failure reasons.
    pub fn primary_error(&self) -> Option<&str> {
        self.errors.first().map(String::as_str)
    }
}

#[derive(Debug, Clone)]
pub struct CodeValidator {
    config: ValidationConfig,
    safety: SafetyChecker,
    analyzer: CodeAnalyzer,
}

impl CodeValidator {
    pub fn new(config: &ValidationConfig) -> Result<Self, EvolveError> {
        Ok(Self {
            config: config.clone(),
            safety: SafetyChecker::new(config)?,
            analyzer: CodeAnalyzer::default(),
        })
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    pub fn validate(
        &self,
        original_code: &str,
        modified_code: &str,
        kind: Option<OpportunityKind>,
    ) -> ValidationResult {
        let mut metadata = ValidationMetadata {
            modification_kind: kind,
            code_length: modified_code.len(),
            ..ValidationMetadata::default()
        };

        let file = match syn::parse_file(modified_code) {
            Ok(file) => file,
            Err(e) => {
                debug!("Syntax check failed: {}", e);
                return ValidationResult {
                    is_valid: false,
                    errors: vec![format!(
                        "Syntax error at line {}: {}",
                        e.span().start().line,
                        e
                    )],
                    warnings: Vec::new(),
                    safety_score: 0.0,
                    performance_impact: 0.0,
                    metadata,
                    validated_at: Utc::now(),
                };
            }
        };
        metadata.syntax_ok = true;

        let findings = self.safety.check(modified_code, &file);
        metadata.safety_ok = findings.errors.is_empty();
        metadata.safety_errors = findings.errors.len();
        metadata.safety_warnings = findings.warnings.len();

        let mut errors = findings.errors.clone();
        let mut warnings = findings.warnings.clone();

        if let Ok(module) = self
            .analyzer
            .analyze_source(Path::new("<modified>"), modified_code)
        {
            warnings.extend(structure::check(&module, &self.config));
        }

        let performance_impact = performance::estimate_impact(original_code, modified_code);

        let original = syn::parse_file(original_code).ok();
        let functional_errors = functional::check(&file, original.as_ref());
        metadata.functional_ok = functional_errors.is_empty();
        errors.extend(functional_errors);

        metadata.practice_bonus = safety::practice_bonus(modified_code, &self.config);
        let safety_score = (1.0
            - self.config.error_penalty * metadata.safety_errors as f64
            - self.config.warning_penalty * metadata.safety_warnings as f64
            + metadata.practice_bonus)
            .clamp(0.0, 1.0);

        let is_valid = metadata.syntax_ok
            && metadata.safety_ok
            && metadata.functional_ok
            && safety_score >= self.config.min_safety_score;

        info!(
            "Validation completed. Valid: {}, Safety: {:.2}, errors: {}, warnings: {}",
            is_valid,
            safety_score,
            errors.len(),
            warnings.len()
        );

        ValidationResult {
            is_valid,
            errors,
            warnings,
            safety_score,
            performance_impact,
            metadata,
            validated_at: Utc::now(),
        }
    }
}
