use chrono::Utc;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use syn::visit::Visit;
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

use super::metrics::{CodebaseSnapshot, ComplexityMetrics, ModuleMetrics, SkippedFile};
use super::opportunity::{self, ImprovementOpportunity};
use super::visitor::ModuleVisitor;
use super::CodeAnalysis;
use crate::config::{AnalysisConfig, Config};
use crate::errors::AnalysisError;
use crate::insights::{EvaluationInsights, KnowledgeSuggestion};
use crate::observability::telemetry::sanitize_for_log;

/// Pure syntax-tree analyzer over a source tree. Never executes or
/// imports the code it reads.
#[derive(Debug, Clone)]
pub struct CodeAnalyzer {
    config: AnalysisConfig,
    extensions: Vec<String>,
    exclude_dirs: Vec<String>,
}

impl CodeAnalyzer {
    pub fn new(config: &Config) -> Self {
        let mut exclude_dirs = config.pipeline.exclude_dirs.clone();
        if let Some(name) = config
            .pipeline
            .backup_directory
            .file_name()
            .and_then(|n| n.to_str())
        {
            if !exclude_dirs.iter().any(|d| d == name) {
                exclude_dirs.push(name.to_string());
            }
        }
        Self {
            config: config.analysis.clone(),
            extensions: config.pipeline.extensions.clone(),
            exclude_dirs,
        }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Analyze one file's content. `path` is only used for labelling.
    pub fn analyze_source(&self, path: &Path, source: &str) -> Result<ModuleMetrics, AnalysisError> {
        let file = syn::parse_file(source).map_err(|e| AnalysisError::Parse {
            path: path.to_path_buf(),
            message: format!("line {}: {}", e.span().start().line, e),
        })?;

        let mut visitor = ModuleVisitor::new();
        visitor.visit_file(&file);

        Ok(ModuleMetrics {
            path: path.to_path_buf(),
            complexity_score: visitor.functions.iter().map(|f| f.complexity).sum(),
            lines_of_code: source.lines().count(),
            async_functions: visitor.functions.iter().filter(|f| f.is_async).count(),
            error_handling: visitor
                .functions
                .iter()
                .map(|f| f.error_handling_sites)
                .sum(),
            logging_calls: visitor.logging_calls,
            imports: visitor.imports,
            classes: visitor.classes,
            functions: visitor.functions,
        })
    }

    /// Scan every matching file under `root`. Files that cannot be read or
    /// parsed are recorded in `skipped`; only a missing root is an error.
    pub fn analyze_codebase(&self, root: &Path) -> Result<CodebaseSnapshot, AnalysisError> {
        if !root.is_dir() {
            return Err(AnalysisError::RootMissing(root.to_path_buf()));
        }

        let mut modules = Vec::new();
        let mut sources = BTreeMap::new();
        let mut skipped = Vec::new();

        let walker = WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !self.is_excluded_dir(e));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e.path().map(Path::to_path_buf).unwrap_or_default();
                    warn!("Skipping unreadable entry {}: {}", path.display(), e);
                    skipped.push(SkippedFile {
                        path,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            if !entry.file_type().is_file() || !self.has_extension(entry.path()) {
                continue;
            }

            let relative = entry
                .path()
                .strip_prefix(root)
                .map(Path::to_path_buf)
                .unwrap_or_else(|_| entry.path().to_path_buf());

            let source = match std::fs::read_to_string(entry.path()) {
                Ok(s) => s,
                Err(e) => {
                    warn!("Failed to read {}: {}", relative.display(), e);
                    skipped.push(SkippedFile {
                        path: relative,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            match self.analyze_source(&relative, &source) {
                Ok(module) => {
                    debug!(
                        "Analyzed {}: {} functions, complexity {}",
                        relative.display(),
                        module.functions.len(),
                        module.complexity_score
                    );
                    modules.push(module);
                    sources.insert(relative, source);
                }
                Err(e) => {
                    warn!("Skipping {}: {}", relative.display(), sanitize_for_log(&e.to_string()));
                    skipped.push(SkippedFile {
                        path: relative,
                        reason: e.to_string(),
                    });
                }
            }
        }

        let metrics = ComplexityMetrics::from_modules(&modules, self.config.high_complexity_threshold);
        info!(
            "Analyzed {} modules ({} skipped): {} functions, average complexity {:.2}",
            modules.len(),
            skipped.len(),
            metrics.total_functions,
            metrics.average_complexity
        );

        Ok(CodebaseSnapshot {
            root: root.to_path_buf(),
            modules,
            sources,
            skipped,
            metrics,
            taken_at: Utc::now(),
        })
    }

    pub fn identify_improvement_opportunities(
        &self,
        snapshot: &CodebaseSnapshot,
        insights: &EvaluationInsights,
        suggestions: &[KnowledgeSuggestion],
    ) -> Vec<ImprovementOpportunity> {
        opportunity::identify(&self.config, snapshot, insights, suggestions)
    }

    pub fn improvement_potential(
        &self,
        opportunities: &[ImprovementOpportunity],
        insights: &EvaluationInsights,
    ) -> f64 {
        opportunity::improvement_potential(&self.config, opportunities, insights)
    }

    pub fn generate_recommendations(&self, opportunities: &[ImprovementOpportunity]) -> Vec<String> {
        opportunity::recommendations(opportunities)
    }

    /// Full analysis pass: snapshot, ranked opportunities, potential and
    /// recommendations.
    pub fn analyze(
        &self,
        root: &Path,
        insights: &EvaluationInsights,
        suggestions: &[KnowledgeSuggestion],
    ) -> Result<CodeAnalysis, AnalysisError> {
        let snapshot = self.analyze_codebase(root)?;
        let opportunities = self.identify_improvement_opportunities(&snapshot, insights, suggestions);
        let improvement_potential = self.improvement_potential(&opportunities, insights);
        let recommendations = self.generate_recommendations(&opportunities);

        Ok(CodeAnalysis {
            snapshot,
            opportunities,
            improvement_potential,
            recommendations,
            analyzed_at: Utc::now(),
        })
    }

    fn is_excluded_dir(&self, entry: &DirEntry) -> bool {
        entry.depth() > 0
            && entry.file_type().is_dir()
            && entry
                .file_name()
                .to_str()
                .map(|name| self.exclude_dirs.iter().any(|d| d == name))
                .unwrap_or(false)
    }

    fn has_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|ext| self.extensions.iter().any(|x| x == ext))
            .unwrap_or(false)
    }
}

impl Default for CodeAnalyzer {
    fn default() -> Self {
        Self::new(&Config::default())
    }
}

/// Relative paths of every analyzable file under `root`, sorted.
pub fn list_source_files(analyzer: &CodeAnalyzer, root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !analyzer.is_excluded_dir(e))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && analyzer.has_extension(e.path()))
        .filter_map(|e| e.path().strip_prefix(root).ok().map(Path::to_path_buf))
        .collect()
}
