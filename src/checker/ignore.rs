use serde::{Deserialize, Serialize};
use tracing::debug;

use super::VersionRange;
use crate::model::{Package, PackageSet};

/// Suppresses vulnerability results for packages matching an id and range.
///
/// The id may contain `*` wildcards (`Microsoft.*`). A rule without a
/// version range, or with one that does not parse, covers every version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IgnoreRule {
    pub id: String,
    #[serde(default, alias = "versionRange", skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl IgnoreRule {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: None,
        }
    }

    pub fn with_version(mut self, range: impl Into<String>) -> Self {
        self.version = Some(range.into());
        self
    }

    pub fn matches_id(&self, package_id: &str) -> bool {
        if self.id.contains('*') {
            glob_match(&self.id, package_id)
        } else {
            self.id == package_id
        }
    }

    /// Returns true when this rule hides `package`.
    pub fn suppresses(&self, package: &Package) -> bool {
        if !self.matches_id(&package.id) {
            return false;
        }

        let range = match self.version.as_deref().map(VersionRange::parse) {
            Some(Ok(range)) => range,
            Some(Err(e)) => {
                debug!(rule = %self.id, error = %e, "ignore rule range does not parse, ignoring all versions");
                return true;
            }
            None => return true,
        };

        match package.parsed_version() {
            Ok(version) => range.satisfies(&version),
            Err(_) => false,
        }
    }
}

/// Returns a copy of `packages` without the ones any rule suppresses.
pub fn filter_ignored(packages: &PackageSet, rules: &[IgnoreRule]) -> PackageSet {
    packages
        .iter()
        .filter(|package| !rules.iter().any(|rule| rule.suppresses(package)))
        .cloned()
        .collect()
}

/// Simple glob matching (supports * as wildcard).
fn glob_match(pattern: &str, text: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();

    if parts.len() == 1 {
        return pattern == text;
    }

    let mut remaining = text;

    let first = parts[0];
    if !first.is_empty() {
        match remaining.strip_prefix(first) {
            Some(rest) => remaining = rest,
            None => return false,
        }
    }

    let last = parts[parts.len() - 1];
    if !last.is_empty() {
        match remaining.strip_suffix(last) {
            Some(rest) => remaining = rest,
            None => return false,
        }
    }

    for part in &parts[1..parts.len() - 1] {
        if part.is_empty() {
            continue;
        }
        match remaining.find(part) {
            Some(pos) => remaining = &remaining[pos + part.len()..],
            None => return false,
        }
    }

    true
}
