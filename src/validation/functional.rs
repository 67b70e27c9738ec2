//! Functional stage: cheap checks that the modified file would still
//! compile against its callers.

use std::collections::HashSet;
use syn::visit::{self, Visit};
use syn::{ImplItem, Item, Macro, Visibility};

struct CompileErrorFinder {
    found: bool,
}

impl<'ast> Visit<'ast> for CompileErrorFinder {
    fn visit_macro(&mut self, node: &'ast Macro) {
        if node
            .path
            .segments
            .last()
            .map(|s| s.ident == "compile_error")
            .unwrap_or(false)
        {
            self.found = true;
        }
        visit::visit_macro(self, node);
    }
}

fn is_cfg_gated(attrs: &[syn::Attribute]) -> bool {
    attrs.iter().any(|a| a.path().is_ident("cfg"))
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
enum Namespace {
    Type,
    Value,
}

fn item_name(item: &Item) -> Option<(Namespace, String, &[syn::Attribute])> {
    match item {
        Item::Fn(i) => Some((Namespace::Value, i.sig.ident.to_string(), &i.attrs)),
        Item::Const(i) => Some((Namespace::Value, i.ident.to_string(), &i.attrs)),
        Item::Static(i) => Some((Namespace::Value, i.ident.to_string(), &i.attrs)),
        Item::Struct(i) => Some((Namespace::Type, i.ident.to_string(), &i.attrs)),
        Item::Enum(i) => Some((Namespace::Type, i.ident.to_string(), &i.attrs)),
        Item::Union(i) => Some((Namespace::Type, i.ident.to_string(), &i.attrs)),
        Item::Trait(i) => Some((Namespace::Type, i.ident.to_string(), &i.attrs)),
        Item::Type(i) => Some((Namespace::Type, i.ident.to_string(), &i.attrs)),
        Item::Mod(i) => Some((Namespace::Type, i.ident.to_string(), &i.attrs)),
        _ => None,
    }
}

fn duplicate_names(items: &[Item], scope: &str, out: &mut Vec<String>) {
    let mut seen = HashSet::new();
    for item in items {
        if let Some((ns, name, attrs)) = item_name(item) {
            if !is_cfg_gated(attrs) && !seen.insert((ns, name.clone())) {
                out.push(format!("Duplicate definition of '{}' in {}", name, scope));
            }
        }
        match item {
            Item::Impl(imp) => {
                let mut methods = HashSet::new();
                for impl_item in &imp.items {
                    if let ImplItem::Fn(f) = impl_item {
                        let name = f.sig.ident.to_string();
                        if !is_cfg_gated(&f.attrs) && !methods.insert(name.clone()) {
                            out.push(format!("Duplicate method '{}' in impl block", name));
                        }
                    }
                }
            }
            Item::Mod(m) => {
                if let Some((_, nested)) = &m.content {
                    duplicate_names(nested, &format!("module '{}'", m.ident), out);
                }
            }
            _ => {}
        }
    }
}

/// Public functions visible to callers: free `pub fn`s and `pub` methods
/// of inherent impls, as `name` or `Type::name`.
pub fn exported_functions(file: &syn::File) -> HashSet<String> {
    let mut exported = HashSet::new();
    for item in &file.items {
        match item {
            Item::Fn(f) if matches!(f.vis, Visibility::Public(_)) => {
                exported.insert(f.sig.ident.to_string());
            }
            Item::Impl(imp) if imp.trait_.is_none() => {
                let owner = match &*imp.self_ty {
                    syn::Type::Path(tp) => tp.path.segments.last().map(|s| s.ident.to_string()),
                    _ => None,
                };
                if let Some(owner) = owner {
                    for impl_item in &imp.items {
                        if let ImplItem::Fn(f) = impl_item {
                            if matches!(f.vis, Visibility::Public(_)) {
                                exported.insert(format!("{}::{}", owner, f.sig.ident));
                            }
                        }
                    }
                }
            }
            _ => {}
        }
    }
    exported
}

/// Fatal findings for the modified file. `original` is `None` when the
/// original could not be parsed, which skips the export comparison.
pub fn check(modified: &syn::File, original: Option<&syn::File>) -> Vec<String> {
    let mut errors = Vec::new();

    if modified.items.is_empty() {
        errors.push("Modified code defines no items".to_string());
        return errors;
    }

    let mut finder = CompileErrorFinder { found: false };
    finder.visit_file(modified);
    if finder.found {
        errors.push("Modified code invokes compile_error!".to_string());
    }

    duplicate_names(&modified.items, "file scope", &mut errors);

    if let Some(original) = original {
        let kept = exported_functions(modified);
        let mut removed: Vec<String> = exported_functions(original)
            .into_iter()
            .filter(|name| !kept.contains(name))
            .collect();
        removed.sort();
        for name in removed {
            errors.push(format!("Public function '{}' was removed", name));
        }
    }

    errors
}
