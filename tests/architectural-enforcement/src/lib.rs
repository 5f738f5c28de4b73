//! Architectural Enforcement
//!
//! Source scanners shared by the enforcement tests in `tests/`:
//! - No sleeping outside deadline-guarded waits and retry backoff
//! - No blocking I/O in async library code
//!
//! Scanners work on text, not syntax trees. Test code is recognised by
//! position: everything from a file's first `#[cfg(test)]` onwards, plus the
//! `test_utils` module.

use std::fs;
use std::path::{Path, PathBuf};

/// Library sources checked by default, relative to the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["textgen/core/src"];

/// Files that only exist for tests
const TEST_ONLY_FILES: &[&str] = &["test_utils.rs"];

/// A production source file with its test region cut off
#[derive(Debug)]
pub struct SourceFile {
    /// Path on disk
    pub path: PathBuf,
    /// Lines before the first `#[cfg(test)]`
    pub lines: Vec<String>,
}

impl SourceFile {
    /// Code part of line `idx`, without a trailing `//` comment
    #[must_use]
    pub fn code(&self, idx: usize) -> &str {
        let line = self.lines[idx].as_str();
        line.split("//").next().unwrap_or(line)
    }

    /// Lowercased lines in `[idx - before, idx + after]`, clamped to the file
    #[must_use]
    pub fn window(&self, idx: usize, before: usize, after: usize) -> Vec<String> {
        let start = idx.saturating_sub(before);
        let end = (idx + after + 1).min(self.lines.len());
        self.lines[start..end]
            .iter()
            .map(|line| line.to_lowercase())
            .collect()
    }

    /// `path:line - text` for reports
    #[must_use]
    pub fn describe(&self, idx: usize) -> String {
        format!(
            "{}:{} - {}",
            self.path.display(),
            idx + 1,
            self.lines[idx].trim()
        )
    }
}

/// Workspace root (two levels above this crate)
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("..").join("..")
}

/// Every production `.rs` file under `dir` (relative to the workspace root)
#[must_use]
pub fn production_sources(dir: &str) -> Vec<SourceFile> {
    let root = workspace_root().join(dir);
    if !root.exists() {
        return Vec::new();
    }

    walkdir::WalkDir::new(&root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.path().extension().and_then(|s| s.to_str()) == Some("rs"))
        .filter(|entry| {
            let name = entry.file_name().to_string_lossy();
            !TEST_ONLY_FILES.contains(&name.as_ref())
        })
        .filter_map(|entry| load(entry.path()))
        .collect()
}

fn load(path: &Path) -> Option<SourceFile> {
    let content = fs::read_to_string(path).ok()?;
    Some(SourceFile {
        path: path.to_path_buf(),
        lines: strip_test_region(&content),
    })
}

/// Lines of `content` before its first `#[cfg(test)]`
#[must_use]
pub fn strip_test_region(content: &str) -> Vec<String> {
    content
        .lines()
        .take_while(|line| !line.trim_start().starts_with("#[cfg(test)]"))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_test_region() {
        let content = "fn a() {}\n#[cfg(test)]\nmod tests {\n    fn b() {}\n}\n";
        assert_eq!(strip_test_region(content), vec!["fn a() {}".to_string()]);
    }

    #[test]
    fn test_code_drops_comments() {
        let file = SourceFile {
            path: PathBuf::from("x.rs"),
            lines: vec!["let a = 1; // std::fs::read".to_string()],
        };
        assert_eq!(file.code(0).trim(), "let a = 1;");
    }

    #[test]
    fn test_production_dirs_exist() {
        for dir in PRODUCTION_DIRS {
            assert!(
                !production_sources(dir).is_empty(),
                "{dir} has no sources under {}",
                workspace_root().display()
            );
        }
    }
}
