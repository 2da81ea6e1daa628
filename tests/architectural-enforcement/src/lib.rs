//! Architectural Enforcement Integration Tests
//!
//! This package contains integration tests that enforce architectural principles
//! across the workspace:
//! - No sleep() calls in production code outside backoff and timers
//! - No `unwrap()`/`expect()` in production code
//!
//! Production code is everything in a crate's `src/` before its first
//! `#[cfg(test)]` line. Comments are ignored.

use std::fs;
use std::path::{Path, PathBuf};

/// Source directories checked, relative to the workspace root
pub const PRODUCTION_DIRS: [&str; 2] = ["chatlink/core/src", "chatlink/cli/src"];

/// A rule violation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// File containing the violation
    pub path: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// The offending line, trimmed
    pub text: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{} - {}", self.path.display(), self.line, self.text)
    }
}

/// Workspace root (two levels above this crate)
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(2)
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

/// Production lines of one source file: `(line number, code without comments)`
#[must_use]
pub fn production_lines(content: &str) -> Vec<(usize, String)> {
    let mut lines = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        if line.trim_start().starts_with("#[cfg(test)]") {
            break;
        }
        let code = line.split("//").next().unwrap_or(line);
        lines.push((idx + 1, code.to_string()));
    }
    lines
}

/// Every `.rs` file under the production directories
#[must_use]
pub fn production_files() -> Vec<PathBuf> {
    let root = workspace_root();
    PRODUCTION_DIRS
        .iter()
        .map(|dir| root.join(dir))
        .filter(|dir| dir.exists())
        .flat_map(|dir| {
            walkdir::WalkDir::new(dir)
                .into_iter()
                .filter_map(Result::ok)
                .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("rs"))
                .map(walkdir::DirEntry::into_path)
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Run `check` over every production file
///
/// `check` receives the file's full line list (for context lookups) and one
/// production line, and returns whether that line violates the rule.
pub fn scan<F>(check: F) -> Vec<Violation>
where
    F: Fn(&[&str], usize, &str) -> bool,
{
    let mut violations = Vec::new();
    for path in production_files() {
        let Ok(content) = fs::read_to_string(&path) else {
            continue;
        };
        let all: Vec<&str> = content.lines().collect();
        for (line, code) in production_lines(&content) {
            if check(&all, line - 1, &code) {
                violations.push(Violation {
                    path: path.clone(),
                    line,
                    text: all[line - 1].trim().to_string(),
                });
            }
        }
    }
    violations
}

/// Whether one of the `window` lines above `idx` carries a comment with any
/// of `markers`
#[must_use]
pub fn has_marker_above(lines: &[&str], idx: usize, window: usize, markers: &[&str]) -> bool {
    let start = idx.saturating_sub(window);
    lines[start..=idx].iter().any(|line| {
        line.split_once("//").is_some_and(|(_, comment)| {
            let comment = comment.to_lowercase();
            markers.iter().any(|m| comment.contains(m))
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_lines_stop_at_tests() {
        let src = "fn a() {}\n// x.unwrap()\nlet y = 1; // trailing\n#[cfg(test)]\nmod tests {}\n";
        let lines = production_lines(src);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1].1, "");
        assert_eq!(lines[2].1.trim(), "let y = 1;");
    }

    #[test]
    fn test_marker_above() {
        let lines = ["// backoff between attempts", "sleep(d).await;", "other();"];
        assert!(has_marker_above(&lines, 1, 3, &["backoff"]));
        assert!(!has_marker_above(&lines, 1, 3, &["timer:"]));
    }

    #[test]
    fn test_workspace_root_has_manifest() {
        assert!(workspace_root().join("Cargo.toml").exists());
    }
}
