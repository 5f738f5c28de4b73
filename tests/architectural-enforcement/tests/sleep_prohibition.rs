//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Library code waits on I/O, not on timers.
//! **Exceptions**: sleeps wrapped in a cancellation/deadline guard, and
//! backoff between retries.

use architectural_enforcement::{production_sources, SourceFile, PRODUCTION_DIRS};

/// Test that production code does not sleep outside the allowed contexts
#[test]
fn test_no_sleep_in_production_code() {
    let violations = find_sleep_violations();

    if !violations.is_empty() {
        eprintln!("\n❌ Sleep calls found in production code!\n");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }

        eprintln!("\n✅ ACCEPTABLE sleep uses:");
        eprintln!("  - Inside budget::guarded (cancellable, bounded by the call deadline)");
        eprintln!("  - Backoff between retry attempts");
        eprintln!("  - Test code");
        eprintln!("\n❌ FORBIDDEN:");
        eprintln!("  - Sleep as poor man's synchronization");
        eprintln!("  - Unbounded polling without a deadline");

        panic!(
            "\nFound {} sleep violation(s) in production code.",
            violations.len()
        );
    }
}

fn find_sleep_violations() -> Vec<String> {
    let mut violations = Vec::new();
    for dir in PRODUCTION_DIRS {
        for file in production_sources(dir) {
            check_file(&file, &mut violations);
        }
    }
    violations
}

fn check_file(file: &SourceFile, violations: &mut Vec<String>) {
    for idx in 0..file.lines.len() {
        let code = file.code(idx);
        if !(code.contains("::sleep(") || code.contains("thread::sleep")) {
            continue;
        }

        if code.contains("thread::sleep") {
            violations.push(file.describe(idx));
            continue;
        }

        if is_guarded_context(file, idx) || is_backoff_context(file, idx) {
            continue;
        }

        violations.push(file.describe(idx));
    }
}

/// Sleep passed to `guarded(`, so cancellation and the deadline still apply
fn is_guarded_context(file: &SourceFile, idx: usize) -> bool {
    file.window(idx, 5, 0)
        .iter()
        .any(|line| line.contains("guarded("))
}

/// Sleep between retry attempts
fn is_backoff_context(file: &SourceFile, idx: usize) -> bool {
    let window = file.window(idx, 15, 2);
    let has_backoff = window.iter().any(|line| line.contains("backoff"));
    let has_retry = window
        .iter()
        .any(|line| line.contains("retry") || line.contains("attempt") || line.contains("re-queue"));
    has_backoff && has_retry
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn file(lines: &[&str]) -> SourceFile {
        SourceFile {
            path: PathBuf::from("sample.rs"),
            lines: lines.iter().map(|l| (*l).to_string()).collect(),
        }
    }

    #[test]
    fn test_bare_sleep_is_violation() {
        let sample = file(&[
            "async fn wait_for_it() {",
            "    tokio::time::sleep(Duration::from_millis(10)).await;",
            "}",
        ]);
        let mut violations = Vec::new();
        check_file(&sample, &mut violations);
        assert_eq!(violations.len(), 1);
    }

    #[test]
    fn test_backoff_detection() {
        let sample = file(&[
            "let backoff = retry_backoff(attempt);",
            "tracing::debug!(attempt, \"retrying\");",
            "tokio::time::sleep(backoff).await;",
        ]);
        assert!(is_backoff_context(&sample, 2));
    }

    #[test]
    fn test_guarded_detection() {
        let sample = file(&[
            "guarded(",
            "    async {",
            "        tokio::time::sleep(duration).await;",
        ]);
        assert!(is_guarded_context(&sample, 2));
    }

    #[test]
    fn test_thread_sleep_always_rejected() {
        let sample = file(&[
            "// retry backoff attempt",
            "std::thread::sleep(backoff);",
        ]);
        let mut violations = Vec::new();
        check_file(&sample, &mut violations);
        assert_eq!(violations.len(), 1);
    }
}
