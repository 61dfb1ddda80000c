//! Local vulnerability index.
//!
//! The index is a two-level map: package id, then vulnerability id, then
//! [`VulnerabilityEntry`]. Package ids are stored and looked up in ASCII
//! lowercase because NuGet ids are case-insensitive.
//!
//! A vulnerability id is expected to appear under a single package. The
//! index does not enforce this, but duplicates are logged when the index is
//! built and can be listed with [`VulnerabilityIndex::duplicate_ids`].
//! [`VulnerabilityIndex::find_vulnerability`] returns the entry stored under
//! the lexicographically first package id when duplicates exist.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use tracing::{debug, warn};

use super::{IgnoreRule, VersionRange};
use crate::error::{Result, ScanError};
use crate::model::{Finding, Package, PackageSet, VulnerabilityEntry};

/// Vulnerabilities of one package, keyed by vulnerability id.
pub type PackageVulnerabilities = BTreeMap<String, VulnerabilityEntry>;

#[derive(Debug, Clone, Default)]
pub struct VulnerabilityIndex {
    packages: BTreeMap<String, PackageVulnerabilities>,
}

impl VulnerabilityIndex {
    /// Builds an index from a package id -> vulnerability id -> entry map.
    pub fn new(map: BTreeMap<String, PackageVulnerabilities>) -> Self {
        let mut packages: BTreeMap<String, PackageVulnerabilities> = BTreeMap::new();
        for (package_id, vulnerabilities) in map {
            packages
                .entry(package_id.to_ascii_lowercase())
                .or_default()
                .extend(vulnerabilities);
        }

        let index = Self { packages };
        for (vulnerability_id, package_ids) in index.duplicate_ids() {
            warn!(
                vulnerability = %vulnerability_id,
                packages = ?package_ids,
                "vulnerability id listed under more than one package"
            );
        }
        index
    }

    /// Parses the JSON form of the index.
    pub fn from_json(json: &str) -> Result<Self> {
        let map: BTreeMap<String, PackageVulnerabilities> = serde_json::from_str(json)
            .map_err(|e| ScanError::VulnerabilityDb(format!("invalid JSON: {e}")))?;
        Ok(Self::new(map))
    }

    /// Loads the index from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| ScanError::io(path, e))?;
        let index = Self::from_json(&content).map_err(|e| {
            ScanError::VulnerabilityDb(format!("{}: {e}", path.display()))
        })?;
        debug!(path = %path.display(), packages = index.len(), "loaded vulnerability index");
        Ok(index)
    }

    /// Number of packages with at least one entry.
    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// All vulnerabilities known for a package id, or `None` if the id is not
    /// in the index.
    pub fn find_package_vulnerabilities(&self, package_id: &str) -> Option<&PackageVulnerabilities> {
        self.packages.get(&package_id.to_ascii_lowercase())
    }

    /// Looks a vulnerability up by id across every package.
    pub fn find_vulnerability(&self, vulnerability_id: &str) -> Option<&VulnerabilityEntry> {
        self.packages
            .values()
            .find_map(|vulnerabilities| vulnerabilities.get(vulnerability_id))
    }

    /// Vulnerability ids stored under more than one package, with those
    /// package ids.
    pub fn duplicate_ids(&self) -> Vec<(String, Vec<String>)> {
        let mut owners: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        for (package_id, vulnerabilities) in &self.packages {
            for vulnerability_id in vulnerabilities.keys() {
                owners
                    .entry(vulnerability_id.as_str())
                    .or_default()
                    .push(package_id.clone());
            }
        }
        owners
            .into_iter()
            .filter(|(_, package_ids)| package_ids.len() > 1)
            .map(|(id, package_ids)| (id.to_string(), package_ids))
            .collect()
    }

    /// Matches one package against its known vulnerabilities.
    pub fn check_package(&self, package: &Package) -> Vec<Finding> {
        let Some(vulnerabilities) = self.find_package_vulnerabilities(&package.id) else {
            return Vec::new();
        };

        let version = match package.parsed_version() {
            Ok(version) => version,
            Err(e) => {
                warn!(package = %package, error = %e, "skipping package with invalid version");
                return Vec::new();
            }
        };

        vulnerabilities
            .iter()
            .filter(|(vulnerability_id, entry)| {
                entry.versions.iter().any(|range| match VersionRange::parse(range) {
                    Ok(range) => range.satisfies(&version),
                    Err(e) => {
                        debug!(vulnerability = %vulnerability_id, error = %e, "skipping unparsable range");
                        false
                    }
                })
            })
            .map(|(vulnerability_id, entry)| Finding::new(vulnerability_id, package, entry))
            .collect()
    }

    /// Matches every package in the set.
    pub fn check(&self, packages: &PackageSet) -> Vec<Finding> {
        packages
            .iter()
            .flat_map(|package| self.check_package(package))
            .collect()
    }

    /// Matches the packages no ignore rule suppresses.
    pub fn check_with_ignores(&self, packages: &PackageSet, rules: &[IgnoreRule]) -> Vec<Finding> {
        self.check(&super::filter_ignored(packages, rules))
    }
}
