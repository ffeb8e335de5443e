use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use url::Url;

use crate::errors::UltrascanError;

/// A trimmed, non-empty host or URL string. Identity is exact string equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Target(String);

impl Target {
    pub fn new(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        (!trimmed.is_empty()).then(|| Target(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_url(&self) -> bool {
        let lower = self.0.to_ascii_lowercase();
        lower.starts_with("http://") || lower.starts_with("https://")
    }

    /// Host part: the URL host when a scheme is present, otherwise the value
    /// with any path and port stripped.
    pub fn host(&self) -> String {
        if self.0.contains("://")
            && let Ok(url) = Url::parse(&self.0)
            && let Some(host) = url.host_str()
        {
            return host.trim_matches(['[', ']']).to_string();
        }
        let authority = self.0.split('/').next().unwrap_or(&self.0);
        if let Some(inner) = authority.strip_prefix('[') {
            return inner.split(']').next().unwrap_or(inner).to_string();
        }
        match authority.rsplit_once(':') {
            Some((host, port))
                if !host.contains(':') && !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) =>
            {
                host.to_string()
            }
            _ => authority.to_string(),
        }
    }

    /// Reject values that could be read as an option or split into several
    /// arguments by a tool.
    pub fn validate(&self) -> Result<(), String> {
        if self.0.starts_with('-') {
            return Err(format!("target '{}' starts with '-'", self.0));
        }
        if self.0.chars().any(char::is_whitespace) {
            return Err(format!("target '{}' contains whitespace", self.0));
        }
        if self.0.chars().any(char::is_control) {
            return Err("target contains control characters".to_string());
        }
        Ok(())
    }

    /// File-name-safe rendering used for side artifacts.
    pub fn artifact_stem(&self) -> String {
        self.0
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Target {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Where a run's targets come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSource {
    /// One target per line; blank lines ignored.
    File(PathBuf),
    Literal(String),
    /// A file when the value names an existing file, otherwise a literal.
    Auto(String),
}

/// Deduplicated targets in discovery order.
#[derive(Debug, Clone, Default)]
pub struct TargetSet {
    ordered: Vec<Target>,
    seen: HashSet<Target>,
}

impl TargetSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when the target was already present.
    pub fn insert(&mut self, target: Target) -> bool {
        if self.seen.contains(&target) {
            return false;
        }
        self.seen.insert(target.clone());
        self.ordered.push(target);
        true
    }

    pub fn contains(&self, target: &Target) -> bool {
        self.seen.contains(target)
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Target> {
        self.ordered.iter()
    }

    pub fn into_vec(self) -> Vec<Target> {
        self.ordered
    }
}

impl FromIterator<Target> for TargetSet {
    fn from_iter<I: IntoIterator<Item = Target>>(iter: I) -> Self {
        let mut set = TargetSet::new();
        for t in iter {
            set.insert(t);
        }
        set
    }
}

impl<'a> IntoIterator for &'a TargetSet {
    type Item = &'a Target;
    type IntoIter = std::slice::Iter<'a, Target>;

    fn into_iter(self) -> Self::IntoIter {
        self.ordered.iter()
    }
}

pub fn parse_target_lines(text: &str) -> TargetSet {
    text.lines().filter_map(Target::new).collect()
}

/// Load and deduplicate targets. No network access happens here.
///
/// Supported sources:
/// - File: `targets.txt` with one host or URL per line
/// - Literal: `10.0.0.1`, `http://example.com`
/// - Auto: a path if that file exists, otherwise a literal
pub fn load(source: &TargetSource) -> Result<TargetSet, UltrascanError> {
    let set = match source {
        TargetSource::File(path) => read_target_file(path)?,
        TargetSource::Literal(value) => Target::new(value).into_iter().collect(),
        TargetSource::Auto(value) => {
            let path = Path::new(value.trim());
            if path.is_file() {
                read_target_file(path)?
            } else {
                Target::new(value).into_iter().collect()
            }
        }
    };
    if set.is_empty() {
        return Err(UltrascanError::EmptyTargets);
    }
    Ok(set)
}

fn read_target_file(path: &Path) -> Result<TargetSet, UltrascanError> {
    let text = fs::read_to_string(path).map_err(|source| UltrascanError::Input {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(parse_target_lines(&text))
}
