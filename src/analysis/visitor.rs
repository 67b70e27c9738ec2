//! Syntax-tree visitors that turn a parsed file into metrics.

use quote::quote;
use syn::visit::{self, Visit};
use syn::{
    Attribute, BinOp, Block, ExprBinary, ExprForLoop, ExprIf, ExprLet, ExprLoop, ExprTry,
    ExprTryBlock, ExprWhile, FnArg, ImplItemFn, ItemFn, ItemImpl, ItemMod, ItemTrait, ItemUse,
    Macro, Pat, ReturnType, Signature, TraitItemFn, Type, UseTree,
};

use super::metrics::{ClassMetrics, FunctionMetrics};

const LOGGING_MACROS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Counts decision points inside one function body.
///
/// Nested `fn`, `impl`, `trait` and `mod` items are skipped; the module
/// visitor measures them on their own.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ComplexityVisitor {
    pub branches: u32,
    pub loops: u32,
    pub boolean_ops: u32,
    pub error_sites: u32,
}

impl ComplexityVisitor {
    pub fn measure_block(block: &Block) -> Self {
        let mut visitor = Self::default();
        visitor.visit_block(block);
        visitor
    }

    pub fn complexity(&self) -> u32 {
        1 + self.branches + self.loops + self.boolean_ops + self.error_sites
    }
}

/// `Err(..)`, possibly as one alternative of an or-pattern.
pub fn is_err_pattern(pat: &Pat) -> bool {
    match pat {
        Pat::TupleStruct(p) => p
            .path
            .segments
            .last()
            .map(|s| s.ident == "Err")
            .unwrap_or(false),
        Pat::Or(p) => p.cases.iter().any(is_err_pattern),
        _ => false,
    }
}

impl<'ast> Visit<'ast> for ComplexityVisitor {
    fn visit_expr_if(&mut self, node: &'ast ExprIf) {
        self.branches += 1;
        visit::visit_expr_if(self, node);
    }

    fn visit_expr_while(&mut self, node: &'ast ExprWhile) {
        self.loops += 1;
        visit::visit_expr_while(self, node);
    }

    fn visit_expr_for_loop(&mut self, node: &'ast ExprForLoop) {
        self.loops += 1;
        visit::visit_expr_for_loop(self, node);
    }

    fn visit_expr_loop(&mut self, node: &'ast ExprLoop) {
        self.loops += 1;
        visit::visit_expr_loop(self, node);
    }

    fn visit_expr_binary(&mut self, node: &'ast ExprBinary) {
        if matches!(node.op, BinOp::And(_) | BinOp::Or(_)) {
            self.boolean_ops += 1;
        }
        visit::visit_expr_binary(self, node);
    }

    fn visit_expr_try(&mut self, node: &'ast ExprTry) {
        self.error_sites += 1;
        visit::visit_expr_try(self, node);
    }

    fn visit_expr_try_block(&mut self, node: &'ast ExprTryBlock) {
        self.error_sites += 1;
        visit::visit_expr_try_block(self, node);
    }

    fn visit_arm(&mut self, node: &'ast syn::Arm) {
        if is_err_pattern(&node.pat) {
            self.error_sites += 1;
        }
        visit::visit_arm(self, node);
    }

    fn visit_expr_let(&mut self, node: &'ast ExprLet) {
        if is_err_pattern(&node.pat) {
            self.error_sites += 1;
        }
        visit::visit_expr_let(self, node);
    }

    fn visit_item_fn(&mut self, _node: &'ast ItemFn) {}
    fn visit_item_impl(&mut self, _node: &'ast ItemImpl) {}
    fn visit_item_trait(&mut self, _node: &'ast ItemTrait) {}
    fn visit_item_mod(&mut self, _node: &'ast ItemMod) {}
}

struct OwnerScope {
    name: String,
    trait_name: Option<String>,
    has_docstring: bool,
    methods: Vec<String>,
    complexity: u32,
    async_methods: usize,
}

/// Collects functions, impl blocks, traits, imports and logging calls
/// for a whole file, in source order.
#[derive(Default)]
pub struct ModuleVisitor {
    pub functions: Vec<FunctionMetrics>,
    pub classes: Vec<ClassMetrics>,
    pub imports: Vec<String>,
    pub logging_calls: usize,
    scopes: Vec<OwnerScope>,
}

impl ModuleVisitor {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&mut self, attrs: &[Attribute], sig: &Signature, block: &Block, owner: Option<String>) {
        let counts = ComplexityVisitor::measure_block(block);
        let start_line = sig.fn_token.span.start().line;
        let end_line = block.brace_token.span.close().end().line.max(start_line);
        let is_async = sig.asyncness.is_some();
        let metrics = FunctionMetrics {
            name: sig.ident.to_string(),
            owner,
            start_line,
            end_line,
            lines: end_line - start_line + 1,
            complexity: counts.complexity(),
            loop_count: counts.loops,
            branch_count: counts.branches,
            error_handling_sites: counts.error_sites,
            parameters: sig.inputs.len(),
            has_docstring: has_doc(attrs),
            has_type_hints: !matches!(sig.output, ReturnType::Default)
                || sig.inputs.iter().any(|arg| matches!(arg, FnArg::Typed(_))),
            is_async,
        };

        if metrics.owner.is_some() {
            if let Some(scope) = self.scopes.last_mut() {
                scope.complexity += metrics.complexity;
                if is_async {
                    scope.async_methods += 1;
                }
            }
        }
        self.functions.push(metrics);
    }

    fn current_owner(&self) -> Option<String> {
        self.scopes.last().map(|s| s.name.clone())
    }

    fn close_scope(&mut self) {
        if let Some(scope) = self.scopes.pop() {
            self.classes.push(ClassMetrics {
                name: scope.name,
                trait_name: scope.trait_name,
                methods: scope.methods,
                complexity: scope.complexity,
                has_docstring: scope.has_docstring,
                async_methods: scope.async_methods,
            });
        }
    }
}

impl<'ast> Visit<'ast> for ModuleVisitor {
    fn visit_item_fn(&mut self, node: &'ast ItemFn) {
        self.record(&node.attrs, &node.sig, &node.block, None);
        visit::visit_item_fn(self, node);
    }

    fn visit_item_impl(&mut self, node: &'ast ItemImpl) {
        self.scopes.push(OwnerScope {
            name: type_name(&node.self_ty),
            trait_name: node
                .trait_
                .as_ref()
                .and_then(|(_, path, _)| path.segments.last())
                .map(|s| s.ident.to_string()),
            has_docstring: has_doc(&node.attrs),
            methods: Vec::new(),
            complexity: 0,
            async_methods: 0,
        });
        visit::visit_item_impl(self, node);
        self.close_scope();
    }

    fn visit_impl_item_fn(&mut self, node: &'ast ImplItemFn) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.methods.push(node.sig.ident.to_string());
        }
        let owner = self.current_owner();
        self.record(&node.attrs, &node.sig, &node.block, owner);
        visit::visit_impl_item_fn(self, node);
    }

    fn visit_item_trait(&mut self, node: &'ast ItemTrait) {
        self.scopes.push(OwnerScope {
            name: node.ident.to_string(),
            trait_name: None,
            has_docstring: has_doc(&node.attrs),
            methods: Vec::new(),
            complexity: 0,
            async_methods: 0,
        });
        visit::visit_item_trait(self, node);
        self.close_scope();
    }

    fn visit_trait_item_fn(&mut self, node: &'ast TraitItemFn) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.methods.push(node.sig.ident.to_string());
        }
        if let Some(block) = &node.default {
            let owner = self.current_owner();
            self.record(&node.attrs, &node.sig, block, owner);
        }
        visit::visit_trait_item_fn(self, node);
    }

    fn visit_item_use(&mut self, node: &'ast ItemUse) {
        let prefix = if node.leading_colon.is_some() { "::" } else { "" };
        flatten_use_tree(prefix, &node.tree, &mut self.imports);
    }

    fn visit_macro(&mut self, node: &'ast Macro) {
        let first = node.path.segments.first().map(|s| s.ident.to_string());
        let last = node.path.segments.last().map(|s| s.ident.to_string());
        let is_logging = matches!(first.as_deref(), Some("tracing") | Some("log"))
            || last
                .as_deref()
                .map(|name| LOGGING_MACROS.contains(&name))
                .unwrap_or(false);
        if is_logging {
            self.logging_calls += 1;
        }
        visit::visit_macro(self, node);
    }
}

pub fn has_doc(attrs: &[Attribute]) -> bool {
    attrs.iter().any(|a| a.path().is_ident("doc"))
}

/// Short display name for an impl's self type.
fn type_name(ty: &Type) -> String {
    match ty {
        Type::Path(tp) => tp
            .path
            .segments
            .last()
            .map(|s| s.ident.to_string())
            .unwrap_or_default(),
        Type::Reference(r) => type_name(&r.elem),
        other => quote!(#other).to_string().replace(' ', ""),
    }
}

fn flatten_use_tree(prefix: &str, tree: &UseTree, out: &mut Vec<String>) {
    let join = |name: &str| {
        if prefix.is_empty() || prefix == "::" {
            format!("{}{}", prefix, name)
        } else {
            format!("{}::{}", prefix, name)
        }
    };
    match tree {
        UseTree::Path(p) => flatten_use_tree(&join(&p.ident.to_string()), &p.tree, out),
        UseTree::Name(n) if n.ident == "self" => out.push(prefix.to_string()),
        UseTree::Name(n) => out.push(join(&n.ident.to_string())),
        UseTree::Rename(r) => out.push(format!("{} as {}", join(&r.ident.to_string()), r.rename)),
        UseTree::Glob(_) => out.push(join("*")),
        UseTree::Group(g) => {
            for item in &g.items {
                flatten_use_tree(prefix, item, out);
            }
        }
    }
}
