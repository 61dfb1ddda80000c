//! Scan target classification and discovery.
//!
//! A scan target is classified once into a [`ProjectManifest`]. Its
//! [`ManifestKind`] is the single fork point for everything downstream:
//! which file gets parsed, which dialect applies, and which resolution
//! strategy runs.

pub mod parser;

use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::{DirEntry, WalkDir};

pub use parser::{parse_manifest, parse_str, Dialect, ParsedManifest};

/// File name of the legacy flat-file manifest.
pub const PACKAGES_CONFIG: &str = "packages.config";

const SOLUTION_EXTENSIONS: &[&str] = &["sln", "slnx"];
const PROJECT_EXTENSIONS: &[&str] = &["csproj", "vbproj", "fsproj"];
const SKIPPED_DIRECTORIES: &[&str] = &["bin", "obj", ".git", ".vs", "node_modules"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ManifestKind {
    /// A project whose packages are listed in a sibling `packages.config`.
    PackagesConfig,
    /// An SDK-style project with `PackageReference` items.
    PackageReference,
    /// A solution spanning several projects.
    Solution,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectManifest {
    project_path: PathBuf,
    path: PathBuf,
    kind: ManifestKind,
}

impl ProjectManifest {
    /// Classifies a project or solution path.
    ///
    /// For a project with a `packages.config` next to it, [`path`](Self::path)
    /// points at that file instead of the project.
    pub fn classify(project_path: impl Into<PathBuf>) -> Self {
        let project_path = project_path.into();

        if has_extension(&project_path, SOLUTION_EXTENSIONS) {
            debug!(path = %project_path.display(), "classified as solution");
            return Self {
                path: project_path.clone(),
                project_path,
                kind: ManifestKind::Solution,
            };
        }

        let packages_config = project_path
            .parent()
            .unwrap_or_else(|| Path::new(""))
            .join(PACKAGES_CONFIG);

        let (path, kind) = if packages_config.is_file() {
            (packages_config, ManifestKind::PackagesConfig)
        } else {
            (project_path.clone(), ManifestKind::PackageReference)
        };
        debug!(path = %path.display(), kind = ?kind, "classified project");

        Self {
            project_path,
            path,
            kind,
        }
    }

    /// The file packages are declared in.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The path that was classified.
    pub fn project_path(&self) -> &Path {
        &self.project_path
    }

    pub fn kind(&self) -> ManifestKind {
        self.kind
    }

    pub fn is_legacy_flat_file(&self) -> bool {
        self.kind == ManifestKind::PackagesConfig
    }

    pub fn is_aggregate(&self) -> bool {
        self.kind == ManifestKind::Solution
    }

    /// Directory holding the project, where restore output is looked up.
    pub fn project_directory(&self) -> &Path {
        self.project_path.parent().unwrap_or_else(|| Path::new(""))
    }

    /// Project or solution name without extension.
    pub fn name(&self) -> String {
        self.project_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.project_path.display().to_string())
    }

    /// Reads the declared package references of this manifest.
    pub fn parse(&self) -> crate::Result<ParsedManifest> {
        parse_manifest(self)
    }
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.iter().any(|e| ext.eq_ignore_ascii_case(e)))
}

fn is_skipped(entry: &DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| SKIPPED_DIRECTORIES.iter().any(|d| name.eq_ignore_ascii_case(d)))
}

/// Finds the scan targets under `root`.
///
/// A file is classified as is. In a directory, solution files take
/// precedence: when any exist, only they are returned. Otherwise every
/// project file is returned. Build output directories are not entered.
pub fn discover(root: &Path) -> Vec<ProjectManifest> {
    if root.is_file() {
        return vec![ProjectManifest::classify(root)];
    }

    let mut solutions = Vec::new();
    let mut projects = Vec::new();

    let walker = WalkDir::new(root).sort_by_file_name().into_iter();
    for entry in walker.filter_entry(|e| e.depth() == 0 || !is_skipped(e)) {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        if has_extension(path, SOLUTION_EXTENSIONS) {
            solutions.push(path.to_path_buf());
        } else if has_extension(path, PROJECT_EXTENSIONS) {
            projects.push(path.to_path_buf());
        }
    }

    debug!(
        root = %root.display(),
        solutions = solutions.len(),
        projects = projects.len(),
        "discovered manifests"
    );

    let targets = if solutions.is_empty() { projects } else { solutions };
    targets.into_iter().map(ProjectManifest::classify).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_classify_solution() {
        let manifest = ProjectManifest::classify("/src/App.sln");
        assert!(manifest.is_aggregate());
        assert!(!manifest.is_legacy_flat_file());
        assert_eq!(manifest.name(), "App");
    }

    #[test]
    fn test_classify_sdk_project() {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("App.csproj");
        fs::write(&project, "<Project />").unwrap();

        let manifest = ProjectManifest::classify(&project);
        assert_eq!(manifest.kind(), ManifestKind::PackageReference);
        assert_eq!(manifest.path(), project.as_path());
        assert_eq!(manifest.project_directory(), dir.path());
    }

    #[test]
    fn test_classify_prefers_packages_config() {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("Legacy.csproj");
        fs::write(&project, "<Project />").unwrap();
        fs::write(dir.path().join(PACKAGES_CONFIG), "<packages />").unwrap();

        let manifest = ProjectManifest::classify(&project);
        assert!(manifest.is_legacy_flat_file());
        assert_eq!(manifest.path(), dir.path().join(PACKAGES_CONFIG));
        assert_eq!(manifest.project_path(), project.as_path());
        assert_eq!(manifest.name(), "Legacy");
    }

    #[test]
    fn test_discover_skips_build_output() {
        let dir = tempfile::tempdir().unwrap();
        let app = dir.path().join("App");
        fs::create_dir_all(app.join("obj")).unwrap();
        fs::write(app.join("App.csproj"), "<Project />").unwrap();
        fs::write(app.join("obj").join("Stale.csproj"), "<Project />").unwrap();
        fs::write(dir.path().join("Lib.fsproj"), "<Project />").unwrap();

        let found = discover(dir.path());
        let names: Vec<String> = found.iter().map(ProjectManifest::name).collect();
        assert_eq!(names, vec!["App", "Lib"]);
    }

    #[test]
    fn test_discover_solution_takes_precedence() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("App.csproj"), "<Project />").unwrap();
        fs::write(dir.path().join("All.sln"), "").unwrap();

        let found = discover(dir.path());
        assert_eq!(found.len(), 1);
        assert!(found[0].is_aggregate());
    }

    #[test]
    fn test_discover_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("App.csproj");
        fs::write(&project, "<Project />").unwrap();

        let found = discover(&project);
        assert_eq!(found, vec![ProjectManifest::classify(&project)]);
    }
}
