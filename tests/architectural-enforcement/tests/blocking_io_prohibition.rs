//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: The library runs entirely on the caller's tokio runtime, so no
//! production code may block a worker thread. There is no "before the
//! runtime starts" exception in a library.

use architectural_enforcement::{production_sources, SourceFile, PRODUCTION_DIRS};

/// Forbidden patterns and what they are
const FORBIDDEN: &[(&str, &str)] = &[
    ("std::fs::", "Blocking file I/O"),
    ("use std::fs", "Blocking file I/O"),
    ("std::net::", "Blocking network I/O"),
    ("use std::net", "Blocking network I/O"),
    ("std::process::Command", "Blocking process I/O"),
    ("reqwest::blocking", "Blocking HTTP client"),
    ("std::io::stdin()", "Blocking stdin"),
    ("std::io::stdout()", "Blocking stdout"),
    ("block_on(", "Nested runtime blocking"),
];

/// Test that production code does not use blocking I/O
#[test]
fn test_no_blocking_io_in_production_code() {
    let violations = find_blocking_io_violations();

    if !violations.is_empty() {
        eprintln!("\n❌ Blocking I/O calls found in production code!\n");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }

        eprintln!("\n✅ REQUIRED async I/O:");
        eprintln!("  - reqwest async client through the RequestFacade");
        eprintln!("  - tokio::fs / tokio::net if file or socket access is ever needed");

        panic!(
            "\nFound {} blocking I/O violation(s) in production code.",
            violations.len()
        );
    }
}

fn find_blocking_io_violations() -> Vec<String> {
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
        for (pattern, what) in FORBIDDEN {
            if code.contains(pattern) {
                violations.push(format!("{what}: {}", file.describe(idx)));
            }
        }
    }
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
    fn test_blocking_io_detection() {
        let sample = file(&[
            "async fn load() {",
            "    let contents = std::fs::read_to_string(\"file.txt\")?;",
            "    let client = reqwest::blocking::Client::new();",
            "}",
        ]);
        let mut violations = Vec::new();
        check_file(&sample, &mut violations);
        assert_eq!(violations.len(), 2);
    }

    #[test]
    fn test_comments_are_ignored() {
        let sample = file(&["let x = 1; // not std::fs::read here"]);
        let mut violations = Vec::new();
        check_file(&sample, &mut violations);
        assert!(violations.is_empty());
    }
}
