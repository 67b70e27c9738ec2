//! Validator verdicts on realistic before/after pairs.

use evolvr::analysis::OpportunityKind;
use evolvr::config::ValidationConfig;
use evolvr::validation::CodeValidator;

fn validator() -> CodeValidator {
    CodeValidator::new(&ValidationConfig::default()).unwrap()
}

const ORIGINAL: &str = "fn save_state(path: &str) {}\n";

#[test]
fn test_missing_safeguards_warn_but_do_not_block() {
    let bare = "fn save_state(path: &str) {\n    let _ = std::fs::write(path, \"\");\n    let _ = std::net::TcpStream::connect(\"x:1\");\n}\n";
    let documented = "/// Persist state.\nfn save_state(path: &str) -> std::io::Result<()> {\n    std::fs::write(path, \"\")?;\n    let _ = std::net::TcpStream::connect(\"x:1\");\n    Ok(())\n}\n";

    let v = validator();
    let weak = v.validate(ORIGINAL, bare, Some(OpportunityKind::ErrorHandling));
    let strong = v.validate(ORIGINAL, documented, Some(OpportunityKind::ErrorHandling));

    assert!(weak.errors.is_empty(), "{:?}", weak.errors);
    assert!(!weak.warnings.is_empty());
    assert!(weak
        .warnings
        .contains(&"Critical function 'save_state' missing doc comment".to_string()));
    assert!(weak.is_valid);

    assert_eq!(weak.metadata.safety_warnings, strong.metadata.safety_warnings);
    assert!((strong.safety_score - weak.safety_score - 0.15).abs() < 1e-9);
    assert!(strong.is_valid);
}

#[test]
fn test_forbidden_calls_block_regardless_of_bonus() {
    let modified = "/// Run.\npub fn run(code: &str) -> Result<(), String> {\n    eval(code)?;\n    tracing::info!(\"ran\");\n    Ok(())\n}\n";
    let result = validator().validate("pub fn run(code: &str) -> Result<(), String> { Ok(()) }\n", modified, None);
    assert!(!result.is_valid);
    assert!(result.errors.iter().any(|e| e.contains("eval")));
}

#[test]
fn test_syntax_error_reports_line() {
    let result = validator().validate(ORIGINAL, "fn save_state(path: &str) {\n    let x = ;\n}\n", None);
    assert!(!result.is_valid);
    assert_eq!(result.safety_score, 0.0);
    assert!(result.errors[0].starts_with("Syntax error at line 2"));
}

#[test]
fn test_dropping_public_api_is_an_error() {
    let original = "pub fn keep() {}\npub fn helper() {}\n";
    let result = validator().validate(original, "pub fn keep() {}\n", None);
    assert!(!result.is_valid);
    assert!(!result.metadata.functional_ok);
}

#[test]
fn test_added_loops_raise_performance_impact() {
    let original = "fn f(xs: &[u32]) -> u32 { xs.iter().sum() }\n";
    let modified = "fn f(xs: &[u32]) -> u32 {\n    let mut s = 0;\n    for x in xs {\n        for _ in 0..*x {\n            s += 1;\n        }\n    }\n    s\n}\n";
    let result = validator().validate(original, modified, Some(OpportunityKind::PerformanceImprovement));
    assert!(result.performance_impact > 0.0);
}
