use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use super::{Category, Diagnostic, Package, SourceLocation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Unknown,
}

impl Severity {
    /// Maps a CVSS base score to a severity band.
    pub fn from_score(score: f64) -> Self {
        match score {
            s if s >= 9.0 => Severity::Critical,
            s if s >= 7.0 => Severity::High,
            s if s >= 4.0 => Severity::Medium,
            s if s > 0.0 => Severity::Low,
            _ => Severity::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
            Severity::Unknown => "unknown",
        }
    }

    /// Sort rank, most severe first.
    pub fn rank(&self) -> u8 {
        match self {
            Severity::Critical => 0,
            Severity::High => 1,
            Severity::Medium => 2,
            Severity::Low => 3,
            Severity::Unknown => 4,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// CVSS attack vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessVector {
    #[serde(alias = "network")]
    Network,
    #[serde(alias = "adjacent_network", alias = "ADJACENT", alias = "adjacent")]
    AdjacentNetwork,
    #[serde(alias = "local")]
    Local,
    #[serde(alias = "physical")]
    Physical,
}

/// One known vulnerability of one package.
///
/// The vulnerability id is the key this entry is stored under in the
/// [`VulnerabilityIndex`](crate::checker::VulnerabilityIndex) and is not
/// repeated here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VulnerabilityEntry {
    #[serde(default)]
    pub cwe: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub references: Vec<String>,
    #[serde(default)]
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<AccessVector>,
    #[serde(default)]
    pub vendor: String,
    /// Affected version ranges. Matching any one of them flags a package.
    #[serde(default)]
    pub versions: Vec<String>,
}

impl VulnerabilityEntry {
    pub fn severity(&self) -> Severity {
        Severity::from_score(self.score)
    }
}

/// A package matched against a vulnerability.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Finding {
    pub vulnerability_id: String,
    pub package_id: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
    pub severity: Severity,
    pub entry: VulnerabilityEntry,
}

impl Finding {
    pub fn new(vulnerability_id: &str, package: &Package, entry: &VulnerabilityEntry) -> Self {
        Self {
            vulnerability_id: vulnerability_id.to_string(),
            package_id: package.id.clone(),
            version: package.version.clone(),
            location: package.location,
            severity: entry.severity(),
            entry: entry.clone(),
        }
    }
}

/// Everything found for one project.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectReport {
    pub name: String,
    /// The file diagnostics point at: the manifest that declared the packages.
    pub manifest: PathBuf,
    pub packages: Vec<Package>,
    pub findings: Vec<Finding>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanResult {
    pub scan_time: DateTime<Utc>,
    pub projects: Vec<ProjectReport>,
}

impl ScanResult {
    pub fn new(projects: Vec<ProjectReport>) -> Self {
        Self {
            scan_time: Utc::now(),
            projects,
        }
    }

    pub fn package_count(&self) -> usize {
        self.projects.iter().map(|p| p.packages.len()).sum()
    }

    pub fn findings(&self) -> impl Iterator<Item = &Finding> {
        self.projects.iter().flat_map(|p| p.findings.iter())
    }

    /// True when some project could not be scanned.
    pub fn has_errors(&self) -> bool {
        self.projects
            .iter()
            .flat_map(|p| p.diagnostics.iter())
            .any(|d| d.category == Category::Error)
    }

    /// The most severe finding across all projects.
    pub fn worst_severity(&self) -> Option<Severity> {
        self.findings().map(|f| f.severity).min_by_key(Severity::rank)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_from_score() {
        assert_eq!(Severity::from_score(9.8), Severity::Critical);
        assert_eq!(Severity::from_score(7.0), Severity::High);
        assert_eq!(Severity::from_score(4.55), Severity::Medium);
        assert_eq!(Severity::from_score(0.1), Severity::Low);
        assert_eq!(Severity::from_score(0.0), Severity::Unknown);
    }

    #[test]
    fn test_entry_deserializes_with_missing_fields() {
        let entry: VulnerabilityEntry =
            serde_json::from_str(r#"{"score": 6.1, "vector": "NETWORK", "versions": ["(, 3.4.0)"]}"#)
                .unwrap();
        assert_eq!(entry.vector, Some(AccessVector::Network));
        assert_eq!(entry.severity(), Severity::Medium);
        assert!(entry.references.is_empty());
    }

    #[test]
    fn test_access_vector_aliases() {
        let vector: AccessVector = serde_json::from_str(r#""adjacent_network""#).unwrap();
        assert_eq!(vector, AccessVector::AdjacentNetwork);
        let vector: AccessVector = serde_json::from_str(r#""LOCAL""#).unwrap();
        assert_eq!(vector, AccessVector::Local);
    }

    #[test]
    fn test_worst_severity() {
        let package = Package::new("bootstrap", "3.0.0");
        let low = VulnerabilityEntry {
            cwe: String::new(),
            description: String::new(),
            references: vec![],
            score: 2.0,
            vector: None,
            vendor: String::new(),
            versions: vec![],
        };
        let mut high = low.clone();
        high.score = 7.5;

        let report = ProjectReport {
            name: "App".to_string(),
            manifest: PathBuf::from("App.csproj"),
            packages: vec![package.clone()],
            findings: vec![
                Finding::new("CVE-1", &package, &low),
                Finding::new("CVE-2", &package, &high),
            ],
            diagnostics: vec![],
        };
        let result = ScanResult::new(vec![report]);
        assert_eq!(result.worst_severity(), Some(Severity::High));
        assert_eq!(result.package_count(), 1);
        assert_eq!(ScanResult::new(vec![]).worst_severity(), None);
    }
}
