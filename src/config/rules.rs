//! Default validation rule sets.
//!
//! Every list here can be replaced wholesale from the `[validation]`
//! section of the config file.

use serde::{Deserialize, Serialize};

/// A regex rule with the message reported when it matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RulePattern {
    pub pattern: String,
    pub description: String,
}

impl RulePattern {
    pub fn new(pattern: &str, description: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            description: description.to_string(),
        }
    }
}

/// Patterns whose presence makes a proposal invalid.
pub fn default_forbidden_patterns() -> Vec<RulePattern> {
    vec![
        RulePattern::new(r"\beval\s*\(", "Dynamic code evaluation (eval) is forbidden"),
        RulePattern::new(r"\bexec\s*\(", "Dynamic code execution (exec) is forbidden"),
        RulePattern::new(r"\bos\.system\b", "Shell execution via os.system is forbidden"),
        RulePattern::new(
            r"\bsubprocess\.(call|run|Popen)\b",
            "Subprocess spawning is forbidden",
        ),
        RulePattern::new(r"\bshutil\.rmtree\b", "Recursive deletion via shutil.rmtree"),
        RulePattern::new(r"__import__", "Dynamic import is forbidden"),
        RulePattern::new(r"__globals__", "Access to interpreter globals is forbidden"),
        RulePattern::new(
            r"\brm\s+-[a-zA-Z]*(rf|fr)[a-zA-Z]*\b",
            "Destructive shell command (rm -rf)",
        ),
        RulePattern::new(r"\bmkfs(\.\w+)?\b", "Filesystem format command"),
        RulePattern::new(r"\bdd\s+if=", "Raw disk copy (dd)"),
        RulePattern::new(r"\bchmod\s+(-R\s+)?777\b", "World-writable permissions"),
        RulePattern::new(
            r"\bunsafe\s*(\{|fn\b|impl\b|trait\b|extern\b)",
            "unsafe code is forbidden in generated changes",
        ),
        RulePattern::new(r"\bprocess::Command\b", "Process spawning (std::process::Command)"),
        RulePattern::new(r"\btransmute\b", "std::mem::transmute is forbidden"),
        RulePattern::new(
            r"\blibc::(system|popen|fork|exec\w*)\b",
            "Raw libc process control",
        ),
        RulePattern::new(r"\b(dlopen|libloading)\b", "Dynamic library loading"),
        RulePattern::new(r"\bremove_dir_all\s*\(", "Recursive directory deletion"),
    ]
}

/// Secondary heuristics reported as warnings.
pub fn default_warning_patterns() -> Vec<RulePattern> {
    vec![
        RulePattern::new(
            r"\bFile::create\s*\(|\bfs::write\s*\(|\bOpenOptions\b|\.write_all\s*\(",
            "File write operations detected - ensure proper permissions",
        ),
        RulePattern::new(
            r"\b(TcpStream|TcpListener|UdpSocket|reqwest|hyper)\b",
            "Network operations detected - ensure security",
        ),
        RulePattern::new(
            r"\benv::(set_var|remove_var)\s*\(",
            "Process environment mutation",
        ),
        RulePattern::new(r"\bmem::forget\s*\(|\bBox::leak\s*\(", "Intentional memory leak"),
        RulePattern::new(r"\bstatic\s+mut\b", "Mutable static state"),
    ]
}

/// Call names flagged by the syntax-tree walk, matched against the last
/// path segment or method name.
pub fn default_forbidden_calls() -> Vec<String> {
    ["eval", "exec", "system", "popen", "transmute", "remove_dir_all"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

pub fn default_critical_keywords() -> Vec<String> {
    ["save", "load", "delete", "modify", "update", "create"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Any of these, together with a `Result` type, earns the error-handling bonus.
pub fn default_error_handling_markers() -> Vec<String> {
    ["?;", "?)", "?.", "?\n", "Err(", ".map_err("]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

pub fn default_doc_markers() -> Vec<String> {
    ["///", "//!", "#[doc"].iter().map(|s| s.to_string()).collect()
}

pub fn default_logging_markers() -> Vec<String> {
    [
        "tracing::", "log::", "trace!(", "debug!(", "info!(", "warn!(", "error!(",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
