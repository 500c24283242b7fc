//! Ignore rules for tree walking
//!
//! Patterns follow `.gitignore` conventions:
//! - a pattern without `/` matches any single path component (`*.log`, `target`)
//! - a pattern containing `/` is anchored at the root (`src/*.rs`, `/build`)
//! - `**` matches across directory levels (`**/tmp`, `docs/**`)
//! - a trailing `/` restricts the pattern to directories (`cache/`)
//!
//! A file is ignored when the file itself or any of its parent directories
//! matches a rule.

use crate::error::{Error, Result};
use globset::{GlobBuilder, GlobMatcher};
use std::path::Path;
use tracing::debug;

/// Always excluded: VCS metadata, dependency and build output, lockfiles, caches.
pub const DEFAULT_IGNORES: &[&str] = &[
    ".git/",
    ".svn/",
    ".hg/",
    "node_modules/",
    "bower_components/",
    "vendor/",
    "target/",
    "dist/",
    "build/",
    "out/",
    ".next/",
    "coverage/",
    "__pycache__/",
    ".pytest_cache/",
    ".mypy_cache/",
    ".venv/",
    "venv/",
    ".cache/",
    ".idea/",
    ".vscode/",
    "*.pyc",
    "*.lock",
    "package-lock.json",
    "pnpm-lock.yaml",
    ".DS_Store",
];

#[derive(Debug, Clone)]
struct Rule {
    matcher: GlobMatcher,
    dir_only: bool,
    /// Unanchored: matched against the last component only.
    component: bool,
}

impl Rule {
    fn parse(pattern: &str) -> Result<Option<Self>> {
        let trimmed = pattern.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }

        let dir_only = trimmed.ends_with('/');
        let body = trimmed.trim_end_matches('/');
        let (body, anchored) = match body.strip_prefix('/') {
            Some(rest) => (rest, true),
            None => (body, body.contains('/')),
        };
        if body.is_empty() {
            return Ok(None);
        }

        let matcher = GlobBuilder::new(body)
            .literal_separator(true)
            .build()
            .map_err(|e| Error::InvalidPattern {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })?
            .compile_matcher();

        Ok(Some(Self {
            matcher,
            dir_only,
            component: !anchored,
        }))
    }

    /// Test one candidate prefix of a path (`a`, `a/b`, `a/b/c.txt`).
    fn matches_prefix(&self, prefix: &str, is_dir: bool) -> bool {
        if self.dir_only && !is_dir {
            return false;
        }
        if self.component {
            let name = prefix.rsplit('/').next().unwrap_or(prefix);
            self.matcher.is_match(name)
        } else {
            self.matcher.is_match(prefix)
        }
    }

    fn matches(&self, path: &str, is_dir: bool) -> bool {
        let parent_dirs = path
            .char_indices()
            .filter(|(_, ch)| *ch == '/')
            .map(|(idx, _)| &path[..idx]);
        for dir in parent_dirs {
            if self.matches_prefix(dir, true) {
                return true;
            }
        }
        self.matches_prefix(path, is_dir)
    }
}

/// Whether a root-relative file path matches a single ignore pattern.
///
/// Invalid patterns never match.
pub fn matches(path: &str, pattern: &str) -> bool {
    let path = normalize(path);
    match Rule::parse(pattern) {
        Ok(Some(rule)) => rule.matches(&path, false),
        _ => false,
    }
}

/// Convert a relative path to the `/`-separated form used in trees.
pub fn normalize(path: &str) -> String {
    let unified = path.replace('\\', "/");
    unified
        .split('/')
        .filter(|part| !part.is_empty() && *part != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// A compiled set of ignore patterns.
#[derive(Debug, Clone, Default)]
pub struct IgnoreRules {
    rules: Vec<Rule>,
}

impl IgnoreRules {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let mut rules = Self::default();
        rules.extend(patterns)?;
        Ok(rules)
    }

    pub fn with_defaults() -> Self {
        let rules = DEFAULT_IGNORES
            .iter()
            .filter_map(|p| Rule::parse(p).ok().flatten())
            .collect();
        Self { rules }
    }

    pub fn extend<S: AsRef<str>>(&mut self, patterns: &[S]) -> Result<()> {
        for pattern in patterns {
            if let Some(rule) = Rule::parse(pattern.as_ref())? {
                self.rules.push(rule);
            }
        }
        Ok(())
    }

    /// Add the patterns of a `.gitignore`-style file. A missing file is not an error.
    pub fn extend_from_file(&mut self, path: &Path) -> Result<()> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let patterns = parse_ignore_file(&content);
        for pattern in &patterns {
            match Rule::parse(pattern) {
                Ok(Some(rule)) => self.rules.push(rule),
                Ok(None) => {}
                Err(e) => debug!("Skipping ignore pattern from {}: {}", path.display(), e),
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn is_ignored(&self, path: &str, is_dir: bool) -> bool {
        let path = normalize(path);
        if path.is_empty() {
            return false;
        }
        self.rules.iter().any(|rule| rule.matches(&path, is_dir))
    }
}

/// Extract patterns from ignore-file text: blank lines and `#` comments are
/// skipped, negations (`!pattern`) are not supported and dropped.
pub fn parse_ignore_file(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter(|line| {
            if line.starts_with('!') {
                debug!("Negated ignore pattern not supported: {}", line);
                return false;
            }
            true
        })
        .map(String::from)
        .collect()
}
