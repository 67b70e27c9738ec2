use regex::Regex;
use std::sync::OnceLock;

static CONTROL_FLOW: OnceLock<Option<Regex>> = OnceLock::new();

fn control_flow_keywords(code: &str) -> usize {
    CONTROL_FLOW
        .get_or_init(|| Regex::new(r"\b(for|while|loop|if|match|async|await)\b").ok())
        .as_ref()
        .map(|re| re.find_iter(code).count())
        .unwrap_or(0)
}

/// Rough performance delta: negative means the change looks cheaper.
/// Informational only; never affects validity.
pub fn estimate_impact(original: &str, modified: &str) -> f64 {
    let original_lines = original.lines().count();
    let modified_lines = modified.lines().count();
    let line_impact =
        (modified_lines as f64 - original_lines as f64) / original_lines.max(1) as f64;

    let original_keywords = control_flow_keywords(original);
    let modified_keywords = control_flow_keywords(modified);
    let keyword_impact = (modified_keywords as f64 - original_keywords as f64)
        / original_keywords.max(1) as f64;

    (line_impact * 0.3 + keyword_impact * 0.7).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_code_has_zero_impact() {
        let code = "fn f() {\n    for x in 0..3 { if x > 1 {} }\n}\n";
        assert_eq!(estimate_impact(code, code), 0.0);
    }

    #[test]
    fn test_keywords_are_whole_words() {
        assert_eq!(control_flow_keywords("let format = iffy; // before"), 0);
        assert_eq!(control_flow_keywords("if a { for b in c {} } else { loop {} }"), 3);
    }

    #[test]
    fn test_added_loops_increase_impact() {
        let original = "fn f() {\n    work();\n}\n";
        let modified = "fn f() {\n    for _ in 0..10 {\n        work();\n    }\n}\n";
        // lines 3 -> 5, keywords 0 -> 1
        let expected = 0.3 * (2.0 / 3.0) + 0.7 * 1.0;
        assert!((estimate_impact(original, modified) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_impact_is_clamped() {
        let original = "fn f() {}\n";
        let modified: String = (0..50).map(|_| "if a { while b {} }\n").collect();
        assert_eq!(estimate_impact(original, &modified), 1.0);
        assert!(estimate_impact(&modified, original) >= -1.0);
    }
}
