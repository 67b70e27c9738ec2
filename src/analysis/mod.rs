//! Static structural analysis of the agent's own source tree.
//!
//! Files are parsed with `syn` and never executed. The result of a scan is
//! an explicit [`CodebaseSnapshot`] holding both metrics and the exact
//! source text each later proposal is built from.

mod analyzer;
pub mod metrics;
pub mod opportunity;
pub mod visitor;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use analyzer::{list_source_files, CodeAnalyzer};
pub use metrics::{
    content_hash, ClassMetrics, CodebaseSnapshot, ComplexityMetrics, FunctionMetrics, FunctionRef,
    ModuleMetrics, SkippedFile,
};
pub use opportunity::{ImprovementOpportunity, OpportunityKind};

/// Output of one full analysis pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeAnalysis {
    pub snapshot: CodebaseSnapshot,
    pub opportunities: Vec<ImprovementOpportunity>,
    pub improvement_potential: f64,
    pub recommendations: Vec<String>,
    pub analyzed_at: DateTime<Utc>,
}
