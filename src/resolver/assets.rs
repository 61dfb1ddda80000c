//! Resolution from `project.assets.json`.
//!
//! `dotnet restore` writes the complete dependency graph of an SDK-style
//! project to `obj/project.assets.json`: one library table per target
//! framework (optionally suffixed by a runtime identifier), keyed by
//! `<name>/<version>`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use super::PackageResolver;
use crate::checker::NuGetVersion;
use crate::error::{Result, ScanError};
use crate::manifest::ProjectManifest;
use crate::model::{Package, PackageSet};

pub const ASSETS_FILE_NAME: &str = "project.assets.json";

#[derive(Debug, Deserialize)]
struct AssetsFile {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    targets: BTreeMap<String, BTreeMap<String, TargetLibrary>>,
}

#[derive(Debug, Deserialize)]
struct TargetLibrary {
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    dependencies: BTreeMap<String, String>,
}

/// Finds `project.assets.json` next to the project or under its `obj/`
/// directory.
pub fn locate(project_dir: &Path) -> Result<PathBuf> {
    [
        project_dir.join(ASSETS_FILE_NAME),
        project_dir.join("obj").join(ASSETS_FILE_NAME),
    ]
    .into_iter()
    .find(|candidate| candidate.is_file())
    .ok_or_else(|| ScanError::LockArtifactNotFound {
        directory: project_dir.to_path_buf(),
    })
}

/// Reads the packages of a lock artifact file.
pub fn load_assets(path: &Path, moniker: Option<&str>) -> Result<PackageSet> {
    let content = fs::read_to_string(path).map_err(|e| ScanError::io(path, e))?;
    parse_assets(&content, moniker, path)
}

/// Reads the packages of one target, or of every target when `moniker` is
/// `None` or blank.
///
/// A package resolved for several targets is kept once, the first time it
/// is seen. An unknown moniker yields an empty set.
pub fn parse_assets(content: &str, moniker: Option<&str>, path: &Path) -> Result<PackageSet> {
    let assets: AssetsFile =
        serde_json::from_str(content).map_err(|e| ScanError::LockArtifactParse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    debug!(path = %path.display(), version = assets.version, targets = assets.targets.len(), "read lock artifact");

    let moniker = moniker.map(str::trim).filter(|m| !m.is_empty());
    let targets: Vec<&BTreeMap<String, TargetLibrary>> = match moniker {
        Some(moniker) => match assets.targets.get(moniker) {
            Some(libraries) => vec![libraries],
            None => {
                warn!(path = %path.display(), target = moniker, "target framework not found in lock artifact");
                Vec::new()
            }
        },
        None => assets.targets.values().collect(),
    };

    let mut packages = PackageSet::new();
    for (key, library) in targets.into_iter().flatten() {
        let Some((name, version)) = key.split_once('/') else {
            debug!(library = %key, "skipping library without version");
            continue;
        };
        if name.trim().is_empty() || version.trim().is_empty() {
            continue;
        }
        if let Err(e) = NuGetVersion::parse(version) {
            warn!(library = %key, error = %e, "skipping library with invalid version");
            continue;
        }

        let package = Package::new(name, version)
            .with_dependencies(library.dependencies.keys().cloned().collect());
        let purl = package.canonical_key();
        if !packages.insert_first(package) {
            debug!(package = %purl, kind = ?library.kind, "skipping package already added for this project");
        }
    }

    Ok(packages)
}

/// Resolves SDK-style projects from their restore output.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssetsResolver;

#[async_trait]
impl PackageResolver for AssetsResolver {
    fn name(&self) -> &'static str {
        "project.assets.json"
    }

    async fn resolve(
        &self,
        manifest: &ProjectManifest,
        _declared: &PackageSet,
        framework: Option<&str>,
    ) -> Result<PackageSet> {
        let path = locate(manifest.project_directory())?;
        load_assets(&path, framework)
    }
}
