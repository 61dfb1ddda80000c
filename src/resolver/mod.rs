//! Resolution of declared references to the full set of packages a project
//! uses.
//!
//! Each way of finding resolved versions is a [`PackageResolver`]. Which one
//! runs for a project is decided by [`Strategy::select`] from the manifest
//! classification and the scan options:
//!
//! | Manifest | Strategy |
//! |----------|----------|
//! | solution | [`DotnetListResolver`] over the whole solution |
//! | `PackageReference` project | [`AssetsResolver`], or [`DotnetListResolver`] when asked for |
//! | `packages.config` project | [`RegistryResolver`] when online, otherwise none |
//!
//! The resolved set is then combined with the declared one by [`merge`] so
//! that source locations captured from the manifest survive.

pub mod assets;
pub mod dotnet_list;
pub mod registry;

use async_trait::async_trait;
use tracing::debug;

use crate::error::Result;
use crate::manifest::{ManifestKind, ProjectManifest};
use crate::model::{Package, PackageSet};

pub use assets::AssetsResolver;
pub use dotnet_list::{DotnetCli, DotnetListResolver};
pub use registry::{FlatContainerSource, PackageMetadataSource, RegistryResolver};

/// A source of resolved package versions for one project.
#[async_trait]
pub trait PackageResolver: Send + Sync {
    /// Returns the human-readable name of this resolver.
    fn name(&self) -> &'static str;

    /// Resolves the packages of `manifest`.
    ///
    /// `declared` holds the references read from the manifest. `framework`
    /// restricts resolution to one target framework moniker.
    async fn resolve(
        &self,
        manifest: &ProjectManifest,
        declared: &PackageSet,
        framework: Option<&str>,
    ) -> Result<PackageSet>;
}

/// Which resolver handles a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// `project.assets.json` written by `dotnet restore`
    LockArtifact,
    /// Parsing the `dotnet list package` report
    DotnetList,
    /// Walking `.nuspec` dependencies from the package registry
    Registry,
    /// Declared references are used as they are
    DeclaredOnly,
}

impl Strategy {
    pub fn select(
        kind: ManifestKind,
        check_transitive: bool,
        use_dotnet_list: bool,
        online: bool,
    ) -> Self {
        let strategy = match kind {
            ManifestKind::Solution => Strategy::DotnetList,
            ManifestKind::PackageReference if use_dotnet_list => Strategy::DotnetList,
            ManifestKind::PackageReference => Strategy::LockArtifact,
            ManifestKind::PackagesConfig if check_transitive && online => Strategy::Registry,
            ManifestKind::PackagesConfig => Strategy::DeclaredOnly,
        };
        debug!(kind = ?kind, strategy = ?strategy, "selected resolution strategy");
        strategy
    }
}

/// How resolved packages are combined with declared ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    /// The resolved set replaces the declared set. Declared locations are
    /// copied onto resolved packages with the same id.
    Replace,
    /// Only declared packages are kept; each takes the version(s) resolved
    /// for its id.
    OverlayVersion,
}

impl MergeMode {
    pub fn for_transitive(check_transitive: bool) -> Self {
        if check_transitive {
            MergeMode::Replace
        } else {
            MergeMode::OverlayVersion
        }
    }
}

/// Combines declared and resolved packages. Ids are compared ignoring
/// ASCII case.
pub fn merge(declared: &PackageSet, resolved: PackageSet, mode: MergeMode) -> PackageSet {
    match mode {
        MergeMode::Replace => resolved
            .into_iter()
            .map(|mut package| {
                if package.location.is_none() {
                    package.location = declared
                        .find_by_id(&package.id)
                        .find_map(|declared| declared.location);
                }
                package
            })
            .collect(),
        MergeMode::OverlayVersion => {
            let mut merged = PackageSet::new();
            for package in declared {
                let mut matches = resolved.find_by_id(&package.id).peekable();
                if matches.peek().is_none() {
                    merged.insert(package.clone());
                    continue;
                }
                for hit in matches {
                    let mut overlaid = Package::new(package.id.clone(), hit.version.clone())
                        .with_dependencies(hit.dependencies.clone());
                    overlaid.location = package.location;
                    merged.insert(overlaid);
                }
            }
            merged
        }
    }
}
