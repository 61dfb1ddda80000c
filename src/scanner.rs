//! Scanning of projects and solutions.
//!
//! [`Scanner`] drives one scan: it finds the manifests under a path, reads
//! their declared references, resolves them with the strategy that fits the
//! manifest, and matches the result against a [`VulnerabilityIndex`].
//!
//! # Example
//!
//! ```no_run
//! use nugetscan::{ScanOptions, Scanner, VulnerabilityIndex};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let index = VulnerabilityIndex::load(Path::new("vulns.json"))?;
//!     let scanner = Scanner::new(ScanOptions::default(), index);
//!
//!     let result = scanner.scan(Path::new("src/App")).await;
//!     for finding in result.findings() {
//!         println!("{} {} {}", finding.package_id, finding.version, finding.vulnerability_id);
//!     }
//!     Ok(())
//! }
//! ```

use std::path::Path;
use std::time::Duration;

use futures::future::join_all;
use tracing::{error, info, instrument, warn};

use crate::cache::Cache;
use crate::checker::VulnerabilityIndex;
use crate::config::{Config, IgnoreConfig};
use crate::error::Result;
use crate::manifest::{self, ManifestKind, ProjectManifest};
use crate::model::{Diagnostic, Finding, PackageSet, ProjectReport, ScanResult};
use crate::resolver::{
    merge, AssetsResolver, DotnetCli, DotnetListResolver, FlatContainerSource, MergeMode,
    PackageMetadataSource, PackageResolver, RegistryResolver, Strategy,
};

const TRANSITIVE_SKIPPED: &str = "Transitive dependency checking skipped. 'dotnet list package --include-transitive' only supports SDK style NuGet Package References";

/// Settings for one scan.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub framework: Option<String>,
    pub check_transitive: bool,
    pub use_dotnet_list: bool,
    pub online: bool,
    pub list_timeout: Duration,
    pub cache_ttl_hours: u64,
    pub parallel: bool,
    pub ignore: IgnoreConfig,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl ScanOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            framework: config.target_framework.clone(),
            check_transitive: config.check_transitive,
            use_dotnet_list: config.use_dotnet_list,
            online: config.online,
            list_timeout: Duration::from_secs(config.list_timeout_secs),
            cache_ttl_hours: config.cache_ttl_hours,
            parallel: config.parallel,
            ignore: config.ignore.clone(),
        }
    }

    fn framework(&self) -> Option<&str> {
        self.framework.as_deref()
    }
}

pub struct Scanner {
    options: ScanOptions,
    index: VulnerabilityIndex,
    dotnet_list: DotnetListResolver,
    registry: Box<dyn PackageResolver>,
}

impl Scanner {
    pub fn new(options: ScanOptions, index: VulnerabilityIndex) -> Self {
        let cli = DotnetCli::new().with_timeout(options.list_timeout);
        let source = FlatContainerSource::new().with_cache(Cache::with_ttl_hours(options.cache_ttl_hours));
        Self {
            dotnet_list: DotnetListResolver::new(cli),
            registry: Box::new(RegistryResolver::new(source)),
            options,
            index,
        }
    }

    /// Replaces the `dotnet` invocation used for solutions and the
    /// `dotnet list` strategy.
    pub fn with_dotnet_cli(mut self, cli: DotnetCli) -> Self {
        self.dotnet_list = DotnetListResolver::new(cli);
        self
    }

    /// Replaces where registry metadata is read from.
    pub fn with_registry_source(mut self, source: impl PackageMetadataSource + 'static) -> Self {
        self.registry = Box::new(RegistryResolver::new(source));
        self
    }

    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    /// Scans every manifest found under `root`.
    ///
    /// A project that fails is reported with an error diagnostic and the
    /// scan continues with the others.
    pub async fn scan(&self, root: &Path) -> ScanResult {
        let manifests = manifest::discover(root);
        if manifests.is_empty() {
            warn!(path = %root.display(), "no project or solution files found");
        }
        ScanResult::new(self.scan_all(&manifests).await)
    }

    /// Scans the given manifests, in order.
    pub async fn scan_all(&self, manifests: &[ProjectManifest]) -> Vec<ProjectReport> {
        let reports = if self.options.parallel && manifests.len() > 1 {
            join_all(manifests.iter().map(|m| self.scan_or_report(m))).await
        } else {
            let mut reports = Vec::with_capacity(manifests.len());
            for manifest in manifests {
                reports.push(self.scan_or_report(manifest).await);
            }
            reports
        };
        reports.into_iter().flatten().collect()
    }

    async fn scan_or_report(&self, manifest: &ProjectManifest) -> Vec<ProjectReport> {
        match self.scan_manifest(manifest).await {
            Ok(reports) => reports,
            Err(e) => {
                error!(project = %manifest.project_path().display(), error = %e, "project scan failed");
                vec![ProjectReport {
                    name: manifest.name(),
                    manifest: manifest.path().to_path_buf(),
                    packages: Vec::new(),
                    findings: Vec::new(),
                    diagnostics: vec![Diagnostic::error(e.to_string()).in_file(manifest.path())],
                }]
            }
        }
    }

    /// Scans one manifest. A solution yields one report per project listed
    /// in the `dotnet list package` output.
    #[instrument(skip(self, manifest), fields(project = %manifest.project_path().display()))]
    pub async fn scan_manifest(&self, manifest: &ProjectManifest) -> Result<Vec<ProjectReport>> {
        if manifest.is_aggregate() {
            return self.scan_solution(manifest).await;
        }
        self.scan_project(manifest).await.map(|report| vec![report])
    }

    async fn scan_solution(&self, manifest: &ProjectManifest) -> Result<Vec<ProjectReport>> {
        let projects = self
            .dotnet_list
            .resolve_solution(manifest, self.options.framework())
            .await?;

        Ok(projects
            .into_iter()
            .map(|(name, packages)| ProjectReport {
                name,
                manifest: manifest.path().to_path_buf(),
                findings: self.findings(&packages),
                packages: packages.into_packages(),
                diagnostics: Vec::new(),
            })
            .collect())
    }

    async fn scan_project(&self, manifest: &ProjectManifest) -> Result<ProjectReport> {
        let parsed = manifest.parse()?;
        let mut diagnostics = parsed.diagnostics;
        let declared = parsed.packages;

        if declared.is_empty() {
            info!(manifest = %manifest.path().display(), "no package references declared, skipping");
            return Ok(ProjectReport {
                name: manifest.name(),
                manifest: manifest.path().to_path_buf(),
                packages: Vec::new(),
                findings: Vec::new(),
                diagnostics,
            });
        }

        let options = &self.options;
        if manifest.kind() == ManifestKind::PackagesConfig && options.check_transitive && !options.online {
            warn!(manifest = %manifest.path().display(), "{TRANSITIVE_SKIPPED}");
            diagnostics.push(Diagnostic::warning(TRANSITIVE_SKIPPED).in_file(manifest.path()));
        }

        let strategy = Strategy::select(
            manifest.kind(),
            options.check_transitive,
            options.use_dotnet_list,
            options.online,
        );
        let resolver: Option<&dyn PackageResolver> = match strategy {
            Strategy::LockArtifact => Some(&AssetsResolver),
            Strategy::DotnetList => Some(&self.dotnet_list),
            Strategy::Registry => Some(self.registry.as_ref()),
            Strategy::DeclaredOnly => None,
        };

        let packages = match resolver {
            Some(resolver) => {
                let resolved = resolver.resolve(manifest, &declared, options.framework()).await?;
                info!(
                    resolver = resolver.name(),
                    declared = declared.len(),
                    resolved = resolved.len(),
                    "resolved packages"
                );
                merge(&declared, resolved, MergeMode::for_transitive(options.check_transitive))
            }
            None => declared,
        };

        Ok(ProjectReport {
            name: manifest.name(),
            manifest: manifest.path().to_path_buf(),
            findings: self.findings(&packages),
            packages: packages.into_packages(),
            diagnostics,
        })
    }

    fn findings(&self, packages: &PackageSet) -> Vec<Finding> {
        let ignore = &self.options.ignore;
        let mut findings = self.index.check_with_ignores(packages, &ignore.packages);
        findings.retain(|finding| !ignore.should_ignore_vulnerability(&finding.vulnerability_id));
        findings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::IgnoreRule;
    use crate::error::ScanError;
    use crate::model::{Category, SourceLocation};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::fs;
    use std::path::PathBuf;

    const ASSETS: &str = include_str!("../tests/fixtures/project.assets.json");

    const VULNERABILITIES: &str = r#"{
        "Bootstrap": {
            "CVE-2018-14040": {
                "cwe": "CWE-79",
                "description": "XSS in the collapse data-parent attribute.",
                "score": 6.1,
                "vector": "NETWORK",
                "versions": ["[4.0.0, 4.1.2)", "(, 3.4.0)"]
            }
        },
        "jQuery": {
            "CVE-2015-9251": {
                "cwe": "CWE-79",
                "score": 6.1,
                "vector": "NETWORK",
                "versions": ["(, 3.0.0)"]
            }
        }
    }"#;

    const SDK_PROJECT: &str = r#"<Project Sdk="Microsoft.NET.Sdk">
  <ItemGroup>
    <PackageReference Include="Bootstrap" Version="3.0.0" />
    <PackageReference Include="NuGetDefense" Version="1.0.6" />
  </ItemGroup>
</Project>
"#;

    const PACKAGES_CONFIG: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<packages>
  <package id="jQuery" version="1.9.0" targetFramework="net461" />
</packages>
"#;

    fn index() -> VulnerabilityIndex {
        VulnerabilityIndex::from_json(VULNERABILITIES).unwrap()
    }

    fn options() -> ScanOptions {
        ScanOptions {
            framework: Some("net6.0".to_string()),
            ..ScanOptions::default()
        }
    }

    fn sdk_project(dir: &Path, name: &str) -> PathBuf {
        let project_dir = dir.join(name);
        fs::create_dir_all(project_dir.join("obj")).unwrap();
        fs::write(project_dir.join("obj").join("project.assets.json"), ASSETS).unwrap();
        let project = project_dir.join(format!("{name}.csproj"));
        fs::write(&project, SDK_PROJECT).unwrap();
        project
    }

    fn legacy_project(dir: &Path) -> PathBuf {
        fs::write(dir.join("packages.config"), PACKAGES_CONFIG).unwrap();
        let project = dir.join("Legacy.csproj");
        fs::write(&project, "<Project ToolsVersion=\"15.0\" />").unwrap();
        project
    }

    fn ids(findings: &[Finding]) -> Vec<(&str, &str)> {
        findings
            .iter()
            .map(|f| (f.package_id.as_str(), f.vulnerability_id.as_str()))
            .collect()
    }

    #[tokio::test]
    async fn test_transitive_scan_uses_lock_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let project = sdk_project(dir.path(), "App");

        let scanner = Scanner::new(options(), index());
        let reports = scanner.scan_manifest(&ProjectManifest::classify(&project)).await.unwrap();

        assert_eq!(reports.len(), 1);
        let report = &reports[0];
        assert_eq!(report.name, "App");
        assert_eq!(report.packages.len(), 4);
        assert_eq!(
            ids(&report.findings),
            vec![("Bootstrap", "CVE-2018-14040"), ("jQuery", "CVE-2015-9251")]
        );
        assert_eq!(report.findings[0].version, "3.0.7");
        assert_eq!(report.findings[0].location, Some(SourceLocation::new(3, 6)));
        assert_eq!(report.findings[1].location, None);
    }

    #[tokio::test]
    async fn test_direct_scan_overlays_resolved_versions() {
        let dir = tempfile::tempdir().unwrap();
        let project = sdk_project(dir.path(), "App");

        let options = ScanOptions {
            check_transitive: false,
            ..options()
        };
        let scanner = Scanner::new(options, index());
        let reports = scanner.scan_manifest(&ProjectManifest::classify(&project)).await.unwrap();

        let versions: Vec<(&str, &str)> = reports[0]
            .packages
            .iter()
            .map(|p| (p.id.as_str(), p.version.as_str()))
            .collect();
        assert_eq!(versions, vec![("Bootstrap", "3.0.7"), ("NuGetDefense", "1.0.6")]);
        assert_eq!(ids(&reports[0].findings), vec![("Bootstrap", "CVE-2018-14040")]);
    }

    #[tokio::test]
    async fn test_ignore_rules_and_ignored_vulnerabilities() {
        let dir = tempfile::tempdir().unwrap();
        let project = sdk_project(dir.path(), "App");
        let manifest = ProjectManifest::classify(&project);

        let by_version = ScanOptions {
            ignore: IgnoreConfig {
                packages: vec![IgnoreRule::new("Bootstrap").with_version("[3.0.0, 3.1.0)")],
                vulnerabilities: vec![],
            },
            ..options()
        };
        let reports = Scanner::new(by_version, index()).scan_manifest(&manifest).await.unwrap();
        assert_eq!(ids(&reports[0].findings), vec![("jQuery", "CVE-2015-9251")]);

        let by_id = ScanOptions {
            ignore: IgnoreConfig {
                packages: vec![IgnoreRule::new("Bootstrap").with_version("[4.0.0, )")],
                vulnerabilities: vec!["cve-2015-9251".to_string()],
            },
            ..options()
        };
        let reports = Scanner::new(by_id, index()).scan_manifest(&manifest).await.unwrap();
        assert_eq!(ids(&reports[0].findings), vec![("Bootstrap", "CVE-2018-14040")]);
    }

    #[tokio::test]
    async fn test_packages_config_offline_skips_transitive() {
        let dir = tempfile::tempdir().unwrap();
        let project = legacy_project(dir.path());

        let scanner = Scanner::new(options(), index());
        let reports = scanner.scan_manifest(&ProjectManifest::classify(&project)).await.unwrap();

        let report = &reports[0];
        assert_eq!(report.manifest, dir.path().join("packages.config"));
        assert_eq!(ids(&report.findings), vec![("jQuery", "CVE-2015-9251")]);
        assert_eq!(report.findings[0].location, Some(SourceLocation::new(3, 4)));
        assert_eq!(report.diagnostics.len(), 1);
        assert_eq!(report.diagnostics[0].category, Category::Warning);
        assert_eq!(report.diagnostics[0].message, TRANSITIVE_SKIPPED);
    }

    #[derive(Default)]
    struct CatalogSource {
        versions: HashMap<String, Vec<String>>,
        nuspecs: HashMap<String, String>,
    }

    impl CatalogSource {
        fn package(mut self, id: &str, versions: &[&str], dependencies: &str) -> Self {
            let key = id.to_ascii_lowercase();
            self.versions
                .insert(key.clone(), versions.iter().map(|v| v.to_string()).collect());
            for version in versions {
                self.nuspecs.insert(
                    format!("{key}/{version}"),
                    format!(
                        "<package><metadata><id>{id}</id><version>{version}</version>\
                         <dependencies><group>{dependencies}</group></dependencies></metadata></package>"
                    ),
                );
            }
            self
        }
    }

    #[async_trait]
    impl PackageMetadataSource for CatalogSource {
        async fn versions(&self, id: &str) -> Result<Vec<String>> {
            Ok(self.versions.get(&id.to_ascii_lowercase()).cloned().unwrap_or_default())
        }

        async fn nuspec(&self, id: &str, version: &str) -> Result<String> {
            let key = format!("{}/{version}", id.to_ascii_lowercase());
            self.nuspecs
                .get(&key)
                .cloned()
                .ok_or_else(|| ScanError::Registry(format!("{key} not found")))
        }
    }

    #[tokio::test]
    async fn test_packages_config_online_resolves_from_registry() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("packages.config"),
            r#"<?xml version="1.0" encoding="utf-8"?>
<packages>
  <package id="jQuery.Validation" version="1.11.1" targetFramework="net461" />
</packages>
"#,
        )
        .unwrap();
        let project = dir.path().join("Legacy.csproj");
        fs::write(&project, "<Project ToolsVersion=\"15.0\" />").unwrap();

        let source = CatalogSource::default()
            .package("jQuery.Validation", &["1.11.1"], r#"<dependency id="jQuery" version="1.4.1" />"#)
            .package("jQuery", &["1.4.1", "1.9.0", "3.5.0"], "");
        let options = ScanOptions {
            framework: None,
            online: true,
            ..options()
        };
        let scanner = Scanner::new(options, index()).with_registry_source(source);
        let reports = scanner.scan_manifest(&ProjectManifest::classify(&project)).await.unwrap();

        let report = &reports[0];
        assert!(report.diagnostics.is_empty());
        let versions: Vec<(&str, &str)> = report
            .packages
            .iter()
            .map(|p| (p.id.as_str(), p.version.as_str()))
            .collect();
        assert_eq!(versions, vec![("jQuery.Validation", "1.11.1"), ("jQuery", "1.4.1")]);

        let root = report.packages.iter().find(|p| p.id == "jQuery.Validation").unwrap();
        assert_eq!(root.location, Some(SourceLocation::new(3, 4)));
        assert_eq!(root.dependencies, vec!["jQuery"]);
        assert_eq!(ids(&report.findings), vec![("jQuery", "CVE-2015-9251")]);
        assert_eq!(report.findings[0].version, "1.4.1");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_solution_scan_reports_each_project() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let report = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/dotnet_list_sln.txt");
        let executable = dir.path().join("fake-dotnet");
        fs::write(&executable, format!("#!/bin/sh\ncat '{}'\n", report.display())).unwrap();
        fs::set_permissions(&executable, fs::Permissions::from_mode(0o755)).unwrap();
        let solution = dir.path().join("All.sln");
        fs::write(&solution, "").unwrap();

        let scanner = Scanner::new(options(), index())
            .with_dotnet_cli(DotnetCli::new().with_executable(executable.display().to_string()));
        let result = ScanResult::new(scanner.scan_all(&[ProjectManifest::classify(&solution)]).await);

        let projects: Vec<(&str, usize)> = result
            .projects
            .iter()
            .map(|p| (p.name.as_str(), p.packages.len()))
            .collect();
        assert_eq!(projects, vec![("ConsoleApp1", 3), ("ClassLibrary1", 2)]);
        assert!(result.projects.iter().all(|p| p.manifest == solution));
        assert_eq!(
            ids(&result.projects[0].findings),
            vec![("Bootstrap", "CVE-2018-14040"), ("jQuery", "CVE-2015-9251")]
        );
        assert!(result.projects[1].findings.is_empty());
        assert!(!result.has_errors());
    }

    #[tokio::test]
    async fn test_project_without_references_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("Empty.csproj");
        fs::write(&project, "<Project Sdk=\"Microsoft.NET.Sdk\" />").unwrap();

        let scanner = Scanner::new(options(), index());
        let reports = scanner.scan_manifest(&ProjectManifest::classify(&project)).await.unwrap();

        assert!(reports[0].packages.is_empty());
        assert!(reports[0].diagnostics.is_empty());
    }

    #[tokio::test]
    async fn test_missing_lock_artifact_fails_only_that_project() {
        let dir = tempfile::tempdir().unwrap();
        sdk_project(dir.path(), "App");
        let broken = dir.path().join("Broken");
        fs::create_dir(&broken).unwrap();
        fs::write(broken.join("Broken.csproj"), SDK_PROJECT).unwrap();

        let scanner = Scanner::new(options(), index());
        let result = scanner.scan(dir.path()).await;

        assert_eq!(result.projects.len(), 2);
        assert!(result.has_errors());
        let app = result.projects.iter().find(|p| p.name == "App").unwrap();
        assert_eq!(app.findings.len(), 2);
        let broken = result.projects.iter().find(|p| p.name == "Broken").unwrap();
        assert!(broken.packages.is_empty());
        assert_eq!(broken.diagnostics[0].category, Category::Error);
    }

    #[tokio::test]
    async fn test_parallel_and_sequential_scans_agree() {
        let dir = tempfile::tempdir().unwrap();
        sdk_project(dir.path(), "App");
        sdk_project(dir.path(), "Worker");

        let parallel = Scanner::new(options(), index()).scan(dir.path()).await;
        let sequential = Scanner::new(
            ScanOptions {
                parallel: false,
                ..options()
            },
            index(),
        )
        .scan(dir.path())
        .await;

        let names = |result: &ScanResult| -> Vec<String> {
            result.projects.iter().map(|p| p.name.clone()).collect()
        };
        assert_eq!(names(&parallel), vec!["App", "Worker"]);
        assert_eq!(names(&parallel), names(&sequential));
        assert_eq!(parallel.findings().count(), sequential.findings().count());
    }
}
