//! Safety stage: regex deny-list plus an independent syntax-tree walk.

use regex::Regex;
use syn::visit::{self, Visit};
use syn::{
    Expr, ExprCall, ExprField, ExprMethodCall, ExprUnsafe, ImplItemFn, ItemFn, ItemForeignMod,
    ItemImpl, ItemTrait, ItemUse, Member, UseTree,
};

use crate::config::{RulePattern, ValidationConfig};
use crate::errors::EvolveError;

const SYSTEM_MODULES: &[&str] = &["std::process", "std::os", "libc", "nix"];

/// Findings of the safety stage. Only these feed the safety score.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SafetyFindings {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl SafetyFindings {
    fn error(&mut self, message: String) {
        if !self.errors.contains(&message) {
            self.errors.push(message);
        }
    }

    fn warning(&mut self, message: String) {
        if !self.warnings.contains(&message) {
            self.warnings.push(message);
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompiledRule {
    regex: Regex,
    description: String,
}

pub fn compile_rules(rules: &[RulePattern]) -> Result<Vec<CompiledRule>, EvolveError> {
    rules
        .iter()
        .map(|rule| {
            Regex::new(&rule.pattern)
                .map(|regex| CompiledRule {
                    regex,
                    description: rule.description.clone(),
                })
                .map_err(|e| {
                    EvolveError::Config(format!("invalid rule pattern '{}': {}", rule.pattern, e))
                })
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct SafetyChecker {
    forbidden: Vec<CompiledRule>,
    warnings: Vec<CompiledRule>,
    forbidden_calls: Vec<String>,
}

impl SafetyChecker {
    pub fn new(config: &ValidationConfig) -> Result<Self, EvolveError> {
        Ok(Self {
            forbidden: compile_rules(&config.forbidden_patterns)?,
            warnings: compile_rules(&config.warning_patterns)?,
            forbidden_calls: config.forbidden_calls.clone(),
        })
    }

    pub fn check(&self, code: &str, file: &syn::File) -> SafetyFindings {
        let mut findings = SafetyFindings::default();

        for rule in &self.forbidden {
            if rule.regex.is_match(code) {
                findings.error(rule.description.clone());
            }
        }

        let mut walker = SafetyVisitor {
            forbidden_calls: &self.forbidden_calls,
            findings: &mut findings,
        };
        walker.visit_file(file);

        for rule in &self.warnings {
            if rule.regex.is_match(code) {
                findings.warning(rule.description.clone());
            }
        }

        findings
    }
}

struct SafetyVisitor<'a> {
    forbidden_calls: &'a [String],
    findings: &'a mut SafetyFindings,
}

impl SafetyVisitor<'_> {
    fn is_forbidden(&self, name: &str) -> bool {
        self.forbidden_calls.iter().any(|c| c == name)
    }
}

fn is_dunder(name: &str) -> bool {
    name.len() > 4 && name.starts_with("__") && name.ends_with("__")
}

fn use_paths(prefix: String, tree: &UseTree, out: &mut Vec<String>) {
    let join = |name: String| {
        if prefix.is_empty() {
            name
        } else {
            format!("{}::{}", prefix, name)
        }
    };
    match tree {
        UseTree::Path(p) => use_paths(join(p.ident.to_string()), &p.tree, out),
        UseTree::Name(n) => out.push(join(n.ident.to_string())),
        UseTree::Rename(r) => out.push(join(r.ident.to_string())),
        UseTree::Glob(_) => out.push(prefix),
        UseTree::Group(g) => {
            for item in &g.items {
                use_paths(prefix.clone(), item, out);
            }
        }
    }
}

impl<'ast> Visit<'ast> for SafetyVisitor<'_> {
    fn visit_expr_call(&mut self, node: &'ast ExprCall) {
        if let Expr::Path(path) = &*node.func {
            let segments: Vec<String> = path
                .path
                .segments
                .iter()
                .map(|s| s.ident.to_string())
                .collect();
            if let Some(last) = segments.last() {
                if self.is_forbidden(last) {
                    self.findings
                        .error(format!("Forbidden function call: {}", last));
                }
            }
            if segments.ends_with(&["Command".to_string(), "new".to_string()]) {
                self.findings
                    .error("Process spawn detected: Command::new".to_string());
            }
        }
        visit::visit_expr_call(self, node);
    }

    fn visit_expr_method_call(&mut self, node: &'ast ExprMethodCall) {
        let name = node.method.to_string();
        if self.is_forbidden(&name) {
            self.findings
                .error(format!("Forbidden method call: {}", name));
        }
        visit::visit_expr_method_call(self, node);
    }

    fn visit_expr_unsafe(&mut self, node: &'ast ExprUnsafe) {
        self.findings.error("unsafe block detected".to_string());
        visit::visit_expr_unsafe(self, node);
    }

    fn visit_item_fn(&mut self, node: &'ast ItemFn) {
        if node.sig.unsafety.is_some() {
            self.findings
                .error(format!("unsafe fn '{}' detected", node.sig.ident));
        }
        visit::visit_item_fn(self, node);
    }

    fn visit_impl_item_fn(&mut self, node: &'ast ImplItemFn) {
        if node.sig.unsafety.is_some() {
            self.findings
                .error(format!("unsafe fn '{}' detected", node.sig.ident));
        }
        visit::visit_impl_item_fn(self, node);
    }

    fn visit_item_impl(&mut self, node: &'ast ItemImpl) {
        if node.unsafety.is_some() {
            self.findings.error("unsafe impl detected".to_string());
        }
        visit::visit_item_impl(self, node);
    }

    fn visit_item_trait(&mut self, node: &'ast ItemTrait) {
        if node.unsafety.is_some() {
            self.findings
                .error(format!("unsafe trait '{}' detected", node.ident));
        }
        visit::visit_item_trait(self, node);
    }

    fn visit_item_foreign_mod(&mut self, _node: &'ast ItemForeignMod) {
        self.findings
            .error("Foreign function block detected".to_string());
    }

    fn visit_expr_field(&mut self, node: &'ast ExprField) {
        if let Member::Named(ident) = &node.member {
            let name = ident.to_string();
            if is_dunder(&name) {
                self.findings
                    .error(format!("Dangerous attribute access: {}", name));
            }
        }
        visit::visit_expr_field(self, node);
    }

    fn visit_item_use(&mut self, node: &'ast ItemUse) {
        let mut paths = Vec::new();
        use_paths(String::new(), &node.tree, &mut paths);
        for path in paths {
            if let Some(module) = SYSTEM_MODULES
                .iter()
                .find(|m| path == **m || path.starts_with(&format!("{}::", m)))
            {
                self.findings
                    .warning(format!("System module import: {}", module));
            }
        }
    }
}

/// Bonus for good practice markers present in the code.
pub fn practice_bonus(code: &str, config: &ValidationConfig) -> f64 {
    let any = |markers: &[String]| markers.iter().any(|m| code.contains(m.as_str()));
    let mut bonus = 0.0;
    if code.contains("Result") && any(&config.error_handling_markers) {
        bonus += config.error_handling_bonus;
    }
    if any(&config.doc_markers) {
        bonus += config.docstring_bonus;
    }
    if any(&config.logging_markers) {
        bonus += config.logging_bonus;
    }
    bonus
}
