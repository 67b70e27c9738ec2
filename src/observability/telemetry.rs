//! Telemetry & Observability
//!
//! Structured logging for the self-modification pipeline:
//! - Cycle and stage spans with timing
//! - Proposal and ledger state transition logging
//! - Log sanitising and secret redaction
//! - Configurable log levels via RUST_LOG, optional JSON output

use regex::Regex;
use std::sync::OnceLock;
use std::time::Instant;
use tracing::{error, info, info_span, Instrument, Span};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Output format for the global subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

/// Sanitize a string for safe log output by escaping control characters.
/// Generated code and file names are untrusted and may embed newlines.
pub fn sanitize_for_log(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\x1b' => out.push_str("\\e"),
            '\x00' => out.push_str("\\0"),
            c if c.is_control() => out.push_str(&format!("\\u{:04x}", c as u32)),
            _ => out.push(c),
        }
    }
    out
}

static SECRET_PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();

fn secret_patterns() -> &'static Vec<Regex> {
    SECRET_PATTERNS.get_or_init(|| {
        [
            r"(?i)(sk-|key-|token-)[A-Za-z0-9_\-]{8,}",
            r"(?i)Bearer\s+[A-Za-z0-9_\-\.]{8,}",
            r"(?i)(password|passwd|pwd)\s*=\s*\S+",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    })
}

/// Redact API keys, bearer tokens and passwords before logging.
pub fn redact_secrets(input: &str) -> String {
    let mut result = input.to_string();
    for pattern in secret_patterns() {
        result = pattern.replace_all(&result, "[REDACTED]").to_string();
    }
    result
}

/// Truncate a string for a log line, appending the elided byte count.
pub fn preview(s: &str, max: usize) -> String {
    if s.len() <= max {
        return sanitize_for_log(s);
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (+{} bytes)", sanitize_for_log(&s[..end]), s.len() - end)
}

/// Initialize the global subscriber only when RUST_LOG is set, keeping
/// CLI output clean otherwise.
pub fn init_tracing() {
    if let Ok(filter) = std::env::var("RUST_LOG") {
        init_tracing_with_filter(&filter, LogFormat::Compact);
    }
}

/// Initialize with a custom filter string. Subsequent calls are no-ops.
pub fn init_tracing_with_filter(filter: &str, format: LogFormat) {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let filter_layer = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("warn"));

        match format {
            LogFormat::Compact => {
                let fmt_layer = tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false)
                    .with_level(true)
                    .compact()
                    .with_writer(std::io::stderr);
                let _ = tracing_subscriber::registry()
                    .with(filter_layer)
                    .with(fmt_layer)
                    .try_init();
            }
            LogFormat::Json => {
                let fmt_layer = tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_writer(std::io::stderr);
                let _ = tracing_subscriber::registry()
                    .with(filter_layer)
                    .with(fmt_layer)
                    .try_init();
            }
        }
    });
}

/// Span covering one self-modification cycle.
pub fn enter_cycle(cycle: u64) -> Span {
    info_span!(
        "evolvr.cycle",
        cycle = cycle,
        proposals = tracing::field::Empty,
        applied = tracing::field::Empty,
    )
}

/// Run one pipeline stage inside a span, logging duration and outcome.
pub async fn track_stage<F, Fut, T, E>(stage: &str, f: F) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let start = Instant::now();
    let span = info_span!(
        "evolvr.stage",
        stage = stage,
        duration_ms = tracing::field::Empty,
        success = tracing::field::Empty,
    );

    match f().instrument(span.clone()).await {
        Ok(result) => {
            let duration = start.elapsed().as_millis() as u64;
            span.record("duration_ms", duration);
            span.record("success", true);
            span.in_scope(|| info!(duration_ms = duration, "Stage {} completed", stage));
            Ok(result)
        }
        Err(e) => {
            let duration = start.elapsed().as_millis() as u64;
            let safe_err = redact_secrets(&sanitize_for_log(&e.to_string()));
            span.record("duration_ms", duration);
            span.record("success", false);
            span.in_scope(|| {
                error!(
                    duration_ms = duration,
                    error = safe_err.as_str(),
                    "Stage {} failed",
                    stage
                )
            });
            Err(e)
        }
    }
}

/// Record a proposal or ledger state transition.
pub fn record_state_transition(id: &str, from: &str, to: &str) {
    let safe_id = sanitize_for_log(id);
    info!(
        id = safe_id.as_str(),
        from = from,
        to = to,
        "State transition"
    );
}

/// Initialize tracing for tests with a simple subscriber
#[cfg(test)]
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_escapes_newlines() {
        assert_eq!(
            sanitize_for_log("line1\nINFO forged entry"),
            "line1\\nINFO forged entry"
        );
        assert_eq!(sanitize_for_log("tab\there"), "tab\\there");
        assert_eq!(sanitize_for_log("plain"), "plain");
    }

    #[test]
    fn test_sanitize_other_control_chars() {
        assert_eq!(sanitize_for_log("\x07"), "\\u0007");
    }

    #[test]
    fn test_redact_secrets() {
        let redacted = redact_secrets("Authorization: Bearer abcdefghijklmnop");
        assert!(redacted.contains("[REDACTED]"));
        assert!(!redacted.contains("abcdefghijklmnop"));

        let redacted = redact_secrets("using key sk-1234567890abcdef");
        assert!(!redacted.contains("1234567890abcdef"));

        assert_eq!(redact_secrets("nothing secret"), "nothing secret");
    }

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        assert_eq!(preview("short", 10), "short");
        let p = preview("ééééé", 3);
        assert!(p.starts_with('é'));
        assert!(p.contains("bytes"));
    }

    #[test]
    fn test_record_state_transition_does_not_panic() {
        init_test_tracing();
        record_state_transition("mod_1", "proposed", "approved");
        record_state_transition("mod\n2", "applied", "rolled_back");
    }

    #[test]
    fn test_cycle_span() {
        let span = enter_cycle(3);
        let _guard = span.enter();
        span.record("applied", 1u64);
    }

    #[tokio::test]
    async fn test_track_stage_success() {
        let result: Result<i32, &str> = track_stage("analyze", || async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_track_stage_failure() {
        let result: Result<i32, &str> = track_stage("generate", || async { Err("boom") }).await;
        assert_eq!(result.unwrap_err(), "boom");
    }
}
