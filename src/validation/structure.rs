//! Structural stage. Findings here are advisory and never block a proposal.

use crate::analysis::{FunctionMetrics, ModuleMetrics};
use crate::config::ValidationConfig;

fn is_critical(function: &FunctionMetrics, keywords: &[String]) -> bool {
    let name = function.name.to_lowercase();
    keywords.iter().any(|k| name.contains(k.as_str()))
}

pub fn check(module: &ModuleMetrics, config: &ValidationConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    for function in &module.functions {
        let name = function.qualified_name();

        if function.complexity > config.max_complexity {
            warnings.push(format!(
                "Function '{}' has high complexity: {}",
                name, function.complexity
            ));
        }
        if function.lines > config.max_function_length {
            warnings.push(format!(
                "Function '{}' is too long: {} lines",
                name, function.lines
            ));
        }

        if is_critical(function, &config.critical_name_keywords) {
            if !function.has_docstring {
                warnings.push(format!("Critical function '{}' missing doc comment", name));
            }
            if !function.has_type_hints {
                warnings.push(format!("Critical function '{}' missing type hints", name));
            }
            if function.error_handling_sites == 0 {
                warnings.push(format!("Critical function '{}' lacks error handling", name));
            }
        }
    }

    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::CodeAnalyzer;
    use std::path::Path;

    fn warnings_for(source: &str) -> Vec<String> {
        let module = CodeAnalyzer::default()
            .analyze_source(Path::new("x.rs"), source)
            .unwrap();
        check(&module, &ValidationConfig::default())
    }

    #[test]
    fn test_plain_helper_has_no_warnings() {
        assert!(warnings_for("fn helper(x: u32) -> u32 { x + 1 }").is_empty());
    }

    #[test]
    fn test_critical_function_without_safeguards() {
        let w = warnings_for("fn save_state() {}");
        assert_eq!(
            w,
            vec![
                "Critical function 'save_state' missing doc comment",
                "Critical function 'save_state' missing type hints",
                "Critical function 'save_state' lacks error handling",
            ]
        );
    }

    #[test]
    fn test_critical_function_with_safeguards() {
        let source = "/// Persist.\nfn save_state(p: &str) -> std::io::Result<()> { std::fs::write(p, \"\")?; Ok(()) }";
        assert!(warnings_for(source).is_empty());
    }

    #[test]
    fn test_complexity_and_length_ceilings() {
        let ifs: String = (0..16).map(|i| format!("if x == {} {{}}\n", i)).collect();
        let long_body: String = (0..101).map(|i| format!("let _v{} = {};\n", i, i)).collect();
        let source = format!(
            "fn branchy(x: u32) {{\n{}}}\nfn long(x: u32) {{\n{}}}\n",
            ifs, long_body
        );
        let w = warnings_for(&source);
        assert!(w.contains(&"Function 'branchy' has high complexity: 17".to_string()));
        assert!(w.iter().any(|m| m.starts_with("Function 'long' is too long")));
    }
}
