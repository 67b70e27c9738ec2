//! Configuration Management
//!
//! Loads pipeline configuration from TOML files with `EVOLVR_*`
//! environment overrides. Configuration includes:
//! - Pipeline settings (source root, backups, ledger, apply limits)
//! - Analysis thresholds for opportunity derivation
//! - Validation rules (deny-lists, structural ceilings, score weights)
//! - Gate and adaptive-threshold policy
//! - Code generator endpoint

pub mod rules;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::errors::EvolveError;
pub use rules::RulePattern;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub analysis: AnalysisConfig,

    #[serde(default)]
    pub validation: ValidationConfig,

    #[serde(default)]
    pub policy: PolicyConfig,

    #[serde(default)]
    pub generator: GeneratorConfig,
}

/// Where the pipeline reads and writes, and how much it may change per cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_source_root")]
    pub source_root: PathBuf,
    /// File extensions picked up by the analyzer
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    /// Directory names never descended into
    #[serde(default = "default_exclude_dirs")]
    pub exclude_dirs: Vec<String>,
    #[serde(default = "default_backup_directory")]
    pub backup_directory: PathBuf,
    /// Ledger document location. `None` keeps the ledger in memory only.
    #[serde(default = "default_ledger_path")]
    pub ledger_path: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub enable_self_modification: bool,
    /// Upper bound on proposals applied in one cycle
    #[serde(default = "default_max_modification_attempts")]
    pub max_modification_attempts: usize,
    /// Re-validate the on-disk result after every write
    #[serde(default = "default_true")]
    pub require_validation: bool,
    #[serde(default = "default_cycle_every_interactions")]
    pub cycle_every_interactions: u64,
    #[serde(default = "default_max_proposals_per_cycle")]
    pub max_proposals_per_cycle: usize,
    #[serde(default = "default_generation_timeout_secs")]
    pub generation_timeout_secs: u64,
    /// Optional command run in the source root after a write, e.g.
    /// `["cargo", "check", "--quiet"]`. Empty disables it.
    #[serde(default)]
    pub post_apply_check: Vec<String>,
    #[serde(default = "default_post_apply_timeout_secs")]
    pub post_apply_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            source_root: default_source_root(),
            extensions: default_extensions(),
            exclude_dirs: default_exclude_dirs(),
            backup_directory: default_backup_directory(),
            ledger_path: default_ledger_path(),
            enable_self_modification: true,
            max_modification_attempts: default_max_modification_attempts(),
            require_validation: true,
            cycle_every_interactions: default_cycle_every_interactions(),
            max_proposals_per_cycle: default_max_proposals_per_cycle(),
            generation_timeout_secs: default_generation_timeout_secs(),
            post_apply_check: Vec::new(),
            post_apply_timeout_secs: default_post_apply_timeout_secs(),
        }
    }
}

/// Thresholds used when deriving improvement opportunities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default = "default_high_complexity_threshold")]
    pub high_complexity_threshold: u32,
    #[serde(default = "default_mean_complexity_trigger")]
    pub mean_complexity_trigger: f64,
    #[serde(default = "default_performance_score_trigger")]
    pub performance_score_trigger: f64,
    #[serde(default = "default_error_handling_ratio_trigger")]
    pub error_handling_ratio_trigger: f64,
    #[serde(default = "default_knowledge_priority_trigger")]
    pub knowledge_priority_trigger: f64,
    #[serde(default = "default_complexity_priority")]
    pub complexity_priority: f64,
    #[serde(default = "default_performance_priority")]
    pub performance_priority: f64,
    #[serde(default = "default_error_handling_priority")]
    pub error_handling_priority: f64,
    #[serde(default = "default_potential_opportunity_weight")]
    pub potential_opportunity_weight: f64,
    #[serde(default = "default_potential_gap_weight")]
    pub potential_gap_weight: f64,
    #[serde(default = "default_minimum_potential")]
    pub minimum_potential: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            high_complexity_threshold: default_high_complexity_threshold(),
            mean_complexity_trigger: default_mean_complexity_trigger(),
            performance_score_trigger: default_performance_score_trigger(),
            error_handling_ratio_trigger: default_error_handling_ratio_trigger(),
            knowledge_priority_trigger: default_knowledge_priority_trigger(),
            complexity_priority: default_complexity_priority(),
            performance_priority: default_performance_priority(),
            error_handling_priority: default_error_handling_priority(),
            potential_opportunity_weight: default_potential_opportunity_weight(),
            potential_gap_weight: default_potential_gap_weight(),
            minimum_potential: default_minimum_potential(),
        }
    }
}

/// Rules for the five validation stages and the safety score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    #[serde(default = "default_max_complexity")]
    pub max_complexity: u32,
    #[serde(default = "default_max_function_length")]
    pub max_function_length: usize,
    #[serde(default = "default_min_safety_score")]
    pub min_safety_score: f64,
    #[serde(default = "default_error_penalty")]
    pub error_penalty: f64,
    #[serde(default = "default_warning_penalty")]
    pub warning_penalty: f64,
    #[serde(default = "default_error_handling_bonus")]
    pub error_handling_bonus: f64,
    #[serde(default = "default_docstring_bonus")]
    pub docstring_bonus: f64,
    #[serde(default = "default_logging_bonus")]
    pub logging_bonus: f64,
    /// Name fragments that mark a function as critical
    #[serde(default = "rules::default_critical_keywords")]
    pub critical_name_keywords: Vec<String>,
    /// Deny-list; any match is a validation error
    #[serde(default = "rules::default_forbidden_patterns")]
    pub forbidden_patterns: Vec<RulePattern>,
    /// Secondary heuristics; matches are warnings
    #[serde(default = "rules::default_warning_patterns")]
    pub warning_patterns: Vec<RulePattern>,
    /// Call names flagged by the syntax-tree walk
    #[serde(default = "rules::default_forbidden_calls")]
    pub forbidden_calls: Vec<String>,
    #[serde(default = "rules::default_error_handling_markers")]
    pub error_handling_markers: Vec<String>,
    #[serde(default = "rules::default_doc_markers")]
    pub doc_markers: Vec<String>,
    #[serde(default = "rules::default_logging_markers")]
    pub logging_markers: Vec<String>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_complexity: default_max_complexity(),
            max_function_length: default_max_function_length(),
            min_safety_score: default_min_safety_score(),
            error_penalty: default_error_penalty(),
            warning_penalty: default_warning_penalty(),
            error_handling_bonus: default_error_handling_bonus(),
            docstring_bonus: default_docstring_bonus(),
            logging_bonus: default_logging_bonus(),
            critical_name_keywords: rules::default_critical_keywords(),
            forbidden_patterns: rules::default_forbidden_patterns(),
            warning_patterns: rules::default_warning_patterns(),
            forbidden_calls: rules::default_forbidden_calls(),
            error_handling_markers: rules::default_error_handling_markers(),
            doc_markers: rules::default_doc_markers(),
            logging_markers: rules::default_logging_markers(),
        }
    }
}

/// Auto-apply gate and adaptive threshold policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Auto-apply only when the recent score is below this
    #[serde(default = "default_auto_apply_max_score")]
    pub auto_apply_max_score: f64,
    /// Auto-apply only when evaluation confidence is above this
    #[serde(default = "default_auto_apply_min_confidence")]
    pub auto_apply_min_confidence: f64,
    /// Opportunities at or below this priority never reach the generator
    #[serde(default = "default_min_generation_priority")]
    pub min_generation_priority: f64,
    #[serde(default = "default_base_threshold")]
    pub base_threshold: f64,
    #[serde(default = "default_conservative_threshold")]
    pub conservative_threshold: f64,
    #[serde(default = "default_permissive_threshold")]
    pub permissive_threshold: f64,
    #[serde(default = "default_low_success_rate")]
    pub low_success_rate: f64,
    #[serde(default = "default_high_success_rate")]
    pub high_success_rate: f64,
    #[serde(default = "default_tighten_factor")]
    pub tighten_factor: f64,
    #[serde(default = "default_loosen_factor")]
    pub loosen_factor: f64,
    /// Records needed before an optimal priority range is reported
    #[serde(default = "default_min_records_for_priority_range")]
    pub min_records_for_priority_range: usize,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            auto_apply_max_score: default_auto_apply_max_score(),
            auto_apply_min_confidence: default_auto_apply_min_confidence(),
            min_generation_priority: default_min_generation_priority(),
            base_threshold: default_base_threshold(),
            conservative_threshold: default_conservative_threshold(),
            permissive_threshold: default_permissive_threshold(),
            low_success_rate: default_low_success_rate(),
            high_success_rate: default_high_success_rate(),
            tighten_factor: default_tighten_factor(),
            loosen_factor: default_loosen_factor(),
            min_records_for_priority_range: default_min_records_for_priority_range(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub api_key: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            model: default_model(),
            api_key: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_source_root() -> PathBuf {
    PathBuf::from(".")
}
fn default_extensions() -> Vec<String> {
    vec!["rs".to_string()]
}
fn default_exclude_dirs() -> Vec<String> {
    vec![
        "target".to_string(),
        ".git".to_string(),
        "backups".to_string(),
        ".evolvr-sandbox".to_string(),
    ]
}
fn default_backup_directory() -> PathBuf {
    PathBuf::from("./backups")
}
fn default_ledger_path() -> Option<PathBuf> {
    Some(PathBuf::from("./data/improvement_history.json"))
}
fn default_max_modification_attempts() -> usize {
    3
}
fn default_cycle_every_interactions() -> u64 {
    10
}
fn default_max_proposals_per_cycle() -> usize {
    3
}
fn default_post_apply_timeout_secs() -> u64 {
    300
}

fn default_generation_timeout_secs() -> u64 {
    120
}
fn default_high_complexity_threshold() -> u32 {
    10
}
fn default_mean_complexity_trigger() -> f64 {
    8.0
}
fn default_performance_score_trigger() -> f64 {
    0.7
}
fn default_error_handling_ratio_trigger() -> f64 {
    0.3
}
fn default_knowledge_priority_trigger() -> f64 {
    0.7
}
fn default_complexity_priority() -> f64 {
    0.8
}
fn default_performance_priority() -> f64 {
    0.9
}
fn default_error_handling_priority() -> f64 {
    0.7
}
fn default_potential_opportunity_weight() -> f64 {
    0.6
}
fn default_potential_gap_weight() -> f64 {
    0.4
}
fn default_minimum_potential() -> f64 {
    0.1
}
fn default_max_complexity() -> u32 {
    15
}
fn default_max_function_length() -> usize {
    100
}
fn default_min_safety_score() -> f64 {
    0.7
}
fn default_error_penalty() -> f64 {
    0.3
}
fn default_warning_penalty() -> f64 {
    0.1
}
fn default_error_handling_bonus() -> f64 {
    0.1
}
fn default_docstring_bonus() -> f64 {
    0.05
}
fn default_logging_bonus() -> f64 {
    0.05
}
fn default_auto_apply_max_score() -> f64 {
    0.6
}
fn default_auto_apply_min_confidence() -> f64 {
    0.8
}
fn default_min_generation_priority() -> f64 {
    0.7
}
fn default_base_threshold() -> f64 {
    0.5
}
fn default_conservative_threshold() -> f64 {
    0.6
}
fn default_permissive_threshold() -> f64 {
    0.4
}
fn default_low_success_rate() -> f64 {
    0.5
}
fn default_high_success_rate() -> f64 {
    0.8
}
fn default_tighten_factor() -> f64 {
    1.2
}
fn default_loosen_factor() -> f64 {
    0.8
}
fn default_min_records_for_priority_range() -> usize {
    10
}
fn default_endpoint() -> String {
    "http://localhost:8000/v1".to_string()
}
fn default_model() -> String {
    "Qwen/Qwen3-Coder-Next-FP8".to_string()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_tokens() -> usize {
    4096
}

impl Config {
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut config = match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)
                    .with_context(|| format!("Failed to read config from {}", p))?;
                toml::from_str(&content).context("Failed to parse config")?
            }
            None => {
                let mut default_paths = vec![PathBuf::from("evolvr.toml")];
                if let Some(home) = dirs::home_dir() {
                    default_paths.push(home.join(".config/evolvr/config.toml"));
                }

                let mut loaded = None;
                for p in &default_paths {
                    if let Ok(content) = std::fs::read_to_string(p) {
                        loaded = Some(toml::from_str(&content).context("Failed to parse config")?);
                        break;
                    }
                }
                loaded.unwrap_or_else(|| {
                    tracing::debug!("No config file found, using defaults");
                    Self::default()
                })
            }
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Override fields from `EVOLVR_*` variables. `lookup` is injected so
    /// tests do not have to mutate the process environment.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(root) = lookup("EVOLVR_SOURCE_ROOT") {
            self.pipeline.source_root = PathBuf::from(root);
        }
        if let Some(dir) = lookup("EVOLVR_BACKUP_DIRECTORY") {
            self.pipeline.backup_directory = PathBuf::from(dir);
        }
        if let Some(path) = lookup("EVOLVR_LEDGER_PATH") {
            self.pipeline.ledger_path = if path.is_empty() {
                None
            } else {
                Some(PathBuf::from(path))
            };
        }
        if let Some(flag) = lookup("EVOLVR_ENABLE_SELF_MODIFICATION") {
            self.pipeline.enable_self_modification = flag.eq_ignore_ascii_case("true");
        }
        if let Some(flag) = lookup("EVOLVR_REQUIRE_VALIDATION") {
            self.pipeline.require_validation = flag.eq_ignore_ascii_case("true");
        }
        if let Some(n) = lookup("EVOLVR_MAX_MODIFICATION_ATTEMPTS") {
            if let Ok(n) = n.parse::<usize>() {
                self.pipeline.max_modification_attempts = n;
            }
        }
        if let Some(endpoint) = lookup("EVOLVR_ENDPOINT") {
            self.generator.endpoint = endpoint;
        }
        if let Some(model) = lookup("EVOLVR_MODEL") {
            self.generator.model = model;
        }
        if let Some(api_key) = lookup("EVOLVR_API_KEY") {
            self.generator.api_key = Some(api_key);
        }
    }

    /// Reject settings that would silently disable a safety property.
    pub fn validate(&self) -> std::result::Result<(), EvolveError> {
        let unit = |name: &str, v: f64| {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(EvolveError::Config(format!(
                    "{} must be within 0.0..=1.0, got {}",
                    name, v
                )))
            }
        };
        unit("validation.min_safety_score", self.validation.min_safety_score)?;
        unit("policy.auto_apply_max_score", self.policy.auto_apply_max_score)?;
        unit(
            "policy.auto_apply_min_confidence",
            self.policy.auto_apply_min_confidence,
        )?;
        unit("policy.base_threshold", self.policy.base_threshold)?;

        if self.pipeline.extensions.is_empty() {
            return Err(EvolveError::Config(
                "pipeline.extensions must name at least one extension".to_string(),
            ));
        }
        if self.pipeline.cycle_every_interactions == 0 {
            return Err(EvolveError::Config(
                "pipeline.cycle_every_interactions must be at least 1".to_string(),
            ));
        }
        for rule in self
            .validation
            .forbidden_patterns
            .iter()
            .chain(self.validation.warning_patterns.iter())
        {
            regex::Regex::new(&rule.pattern).map_err(|e| {
                EvolveError::Config(format!("invalid rule pattern '{}': {}", rule.pattern, e))
            })?;
        }
        Ok(())
    }
}
