//! Structural metrics produced by the analyzer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Metrics for one function or method body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionMetrics {
    pub name: String,
    /// Self type of the enclosing impl, or the trait for default methods
    pub owner: Option<String>,
    pub start_line: usize,
    pub end_line: usize,
    pub lines: usize,
    pub complexity: u32,
    pub loop_count: u32,
    pub branch_count: u32,
    pub error_handling_sites: u32,
    pub parameters: usize,
    pub has_docstring: bool,
    pub has_type_hints: bool,
    pub is_async: bool,
}

impl FunctionMetrics {
    /// `Owner::name` for methods, the bare name otherwise.
    pub fn qualified_name(&self) -> String {
        match &self.owner {
            Some(owner) => format!("{}::{}", owner, self.name),
            None => self.name.clone(),
        }
    }
}

/// An impl block or trait definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub name: String,
    pub trait_name: Option<String>,
    pub methods: Vec<String>,
    pub complexity: u32,
    pub has_docstring: bool,
    pub async_methods: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleMetrics {
    /// Path relative to the analyzed root
    pub path: PathBuf,
    pub functions: Vec<FunctionMetrics>,
    pub classes: Vec<ClassMetrics>,
    pub complexity_score: u32,
    pub lines_of_code: usize,
    pub imports: Vec<String>,
    pub async_functions: usize,
    pub error_handling: u32,
    pub logging_calls: usize,
}

impl ModuleMetrics {
    /// Error-handling sites per function; 0 for modules without functions.
    pub fn error_handling_coverage(&self) -> f64 {
        if self.functions.is_empty() {
            0.0
        } else {
            self.error_handling as f64 / self.functions.len() as f64
        }
    }

    pub fn undocumented_functions(&self) -> usize {
        self.functions.iter().filter(|f| !f.has_docstring).count()
    }

    pub fn functions_without_type_hints(&self) -> usize {
        self.functions.iter().filter(|f| !f.has_type_hints).count()
    }

    pub fn uses_logging(&self) -> bool {
        self.logging_calls > 0
            || self
                .imports
                .iter()
                .any(|i| i.starts_with("tracing") || i == "log" || i.starts_with("log::"))
    }
}

/// Reference to a function inside a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionRef {
    pub module: PathBuf,
    pub name: String,
    pub owner: Option<String>,
    pub complexity: u32,
    pub start_line: usize,
}

impl FunctionRef {
    pub fn new(module: &Path, function: &FunctionMetrics) -> Self {
        Self {
            module: module.to_path_buf(),
            name: function.name.clone(),
            owner: function.owner.clone(),
            complexity: function.complexity,
            start_line: function.start_line,
        }
    }

    pub fn display_name(&self) -> String {
        match &self.owner {
            Some(owner) => format!("{}::{}", owner, self.name),
            None => self.name.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComplexityMetrics {
    pub total_complexity: u32,
    pub average_complexity: f64,
    pub total_functions: usize,
    pub total_classes: usize,
    pub total_lines: usize,
    pub high_complexity_functions: Vec<FunctionRef>,
}

impl ComplexityMetrics {
    pub fn from_modules(modules: &[ModuleMetrics], high_threshold: u32) -> Self {
        let mut metrics = ComplexityMetrics::default();
        for module in modules {
            metrics.total_complexity += module.complexity_score;
            metrics.total_functions += module.functions.len();
            metrics.total_classes += module.classes.len();
            metrics.total_lines += module.lines_of_code;
            for function in &module.functions {
                if function.complexity > high_threshold {
                    metrics
                        .high_complexity_functions
                        .push(FunctionRef::new(&module.path, function));
                }
            }
        }
        if metrics.total_functions > 0 {
            metrics.average_complexity =
                metrics.total_complexity as f64 / metrics.total_functions as f64;
        }
        metrics
    }
}

/// A file the analyzer could not read or parse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

/// Everything one scan observed, including the byte-exact sources that
/// proposals are built from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodebaseSnapshot {
    pub root: PathBuf,
    pub modules: Vec<ModuleMetrics>,
    pub sources: BTreeMap<PathBuf, String>,
    pub skipped: Vec<SkippedFile>,
    pub metrics: ComplexityMetrics,
    pub taken_at: DateTime<Utc>,
}

impl CodebaseSnapshot {
    pub fn module(&self, path: &Path) -> Option<&ModuleMetrics> {
        let relative = self.relative(path);
        self.modules.iter().find(|m| m.path == relative)
    }

    pub fn source(&self, path: &Path) -> Option<&str> {
        self.sources.get(&self.relative(path)).map(String::as_str)
    }

    /// Location on disk of a module path.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        self.root.join(self.relative(path))
    }

    /// Iterate every function with the module it belongs to, in scan order.
    pub fn functions(&self) -> impl Iterator<Item = (&ModuleMetrics, &FunctionMetrics)> {
        self.modules
            .iter()
            .flat_map(|m| m.functions.iter().map(move |f| (m, f)))
    }

    fn relative(&self, path: &Path) -> PathBuf {
        path.strip_prefix(&self.root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

/// Hex-encoded SHA-256 of a source text.
pub fn content_hash(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn function(name: &str, complexity: u32) -> FunctionMetrics {
        FunctionMetrics {
            name: name.to_string(),
            owner: None,
            start_line: 1,
            end_line: 3,
            lines: 3,
            complexity,
            loop_count: 0,
            branch_count: 0,
            error_handling_sites: 0,
            parameters: 0,
            has_docstring: false,
            has_type_hints: false,
            is_async: false,
        }
    }

    fn module(path: &str, functions: Vec<FunctionMetrics>) -> ModuleMetrics {
        ModuleMetrics {
            path: PathBuf::from(path),
            complexity_score: functions.iter().map(|f| f.complexity).sum(),
            functions,
            classes: Vec::new(),
            lines_of_code: 10,
            imports: Vec::new(),
            async_functions: 0,
            error_handling: 0,
            logging_calls: 0,
        }
    }

    #[test]
    fn test_complexity_metrics_aggregate() {
        let modules = vec![
            module("a.rs", vec![function("f", 15), function("g", 9)]),
            module("b.rs", vec![function("h", 1)]),
        ];
        let metrics = ComplexityMetrics::from_modules(&modules, 10);
        assert_eq!(metrics.total_complexity, 25);
        assert_eq!(metrics.total_functions, 3);
        assert_eq!(metrics.total_lines, 20);
        assert_eq!(metrics.high_complexity_functions.len(), 1);
        assert_eq!(metrics.high_complexity_functions[0].name, "f");
        assert!((metrics.average_complexity - 25.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_codebase_average_is_zero() {
        let metrics = ComplexityMetrics::from_modules(&[], 10);
        assert_eq!(metrics.average_complexity, 0.0);
    }

    #[test]
    fn test_snapshot_lookup_accepts_absolute_and_relative() {
        let snapshot = CodebaseSnapshot {
            root: PathBuf::from("/repo"),
            modules: vec![module("src/lib.rs", vec![])],
            sources: [(PathBuf::from("src/lib.rs"), "fn a() {}\n".to_string())]
                .into_iter()
                .collect(),
            skipped: Vec::new(),
            metrics: ComplexityMetrics::default(),
            taken_at: Utc::now(),
        };
        assert!(snapshot.module(Path::new("src/lib.rs")).is_some());
        assert!(snapshot.module(Path::new("/repo/src/lib.rs")).is_some());
        assert_eq!(snapshot.source(Path::new("/repo/src/lib.rs")), Some("fn a() {}\n"));
        assert_eq!(
            snapshot.resolve(Path::new("src/lib.rs")),
            PathBuf::from("/repo/src/lib.rs")
        );
    }

    #[test]
    fn test_content_hash_is_stable() {
        assert_eq!(content_hash("abc"), content_hash("abc"));
        assert_ne!(content_hash("abc"), content_hash("abd"));
        assert_eq!(content_hash("").len(), 64);
    }
}
