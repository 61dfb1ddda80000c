//! Transitive resolution from package registry metadata.
//!
//! Used for `packages.config` projects, which have no restore graph. The
//! dependencies of each package are read from its `.nuspec`, the dependency
//! group matching the target framework is chosen, and every dependency range
//! is resolved to the lowest available version that satisfies it (NuGet's
//! "lowest applicable version" rule). The closure is walked breadth-first.

use std::collections::{HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::Deserialize;
use tracing::{debug, warn};

use super::PackageResolver;
use crate::cache::Cache;
use crate::checker::{NuGetVersion, VersionRange};
use crate::error::{Result, ScanError};
use crate::manifest::ProjectManifest;
use crate::model::{Package, PackageSet};

/// Base URL of the nuget.org flat container.
pub const NUGET_FLAT_CONTAINER: &str = "https://api.nuget.org/v3-flatcontainer";

/// One `<dependency>` of a nuspec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub id: String,
    pub range: Option<String>,
}

/// One `<group>` of a nuspec. Dependencies listed outside any group form a
/// group without a framework.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyGroup {
    pub target_framework: Option<String>,
    pub dependencies: Vec<Dependency>,
}

/// Where package versions and nuspec documents come from.
#[async_trait]
pub trait PackageMetadataSource: Send + Sync {
    /// All published versions of a package. Unknown packages have none.
    async fn versions(&self, id: &str) -> Result<Vec<String>>;

    /// The nuspec document of one package version.
    async fn nuspec(&self, id: &str, version: &str) -> Result<String>;
}

#[derive(Deserialize)]
struct VersionIndex {
    versions: Vec<String>,
}

/// Reads metadata from a NuGet V3 flat container.
pub struct FlatContainerSource {
    client: reqwest::Client,
    base_url: String,
    cache: Option<Cache>,
}

impl FlatContainerSource {
    pub fn new() -> Self {
        Self::with_base_url(NUGET_FLAT_CONTAINER)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: Cache) -> Self {
        self.cache = Some(cache);
        self
    }

    fn cached<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.cache.as_ref().and_then(|cache| cache.get(key))
    }

    fn store<T: serde::Serialize>(&self, key: &str, value: &T) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.set(key, value) {
                debug!(key, error = %e, "failed to cache registry response");
            }
        }
    }

    async fn get(&self, url: &str) -> Result<Option<reqwest::Response>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ScanError::Registry(e.to_string()))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        response
            .error_for_status()
            .map(Some)
            .map_err(|e| ScanError::Registry(e.to_string()))
    }
}

impl Default for FlatContainerSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PackageMetadataSource for FlatContainerSource {
    async fn versions(&self, id: &str) -> Result<Vec<String>> {
        let id = id.to_ascii_lowercase();
        let key = format!("versions_{id}");
        if let Some(versions) = self.cached(&key) {
            return Ok(versions);
        }

        let url = format!("{}/{id}/index.json", self.base_url);
        let versions = match self.get(&url).await? {
            Some(response) => {
                response
                    .json::<VersionIndex>()
                    .await
                    .map_err(|e| ScanError::Registry(format!("{url}: {e}")))?
                    .versions
            }
            None => Vec::new(),
        };

        self.store(&key, &versions);
        Ok(versions)
    }

    async fn nuspec(&self, id: &str, version: &str) -> Result<String> {
        let id = id.to_ascii_lowercase();
        let version = NuGetVersion::parse(version)?.normalized().to_ascii_lowercase();
        let key = format!("nuspec_{id}_{version}");
        if let Some(nuspec) = self.cached(&key) {
            return Ok(nuspec);
        }

        let url = format!("{}/{id}/{version}/{id}.nuspec", self.base_url);
        let nuspec = self
            .get(&url)
            .await?
            .ok_or_else(|| ScanError::Registry(format!("{id} {version} not found")))?
            .text()
            .await
            .map_err(|e| ScanError::Registry(format!("{url}: {e}")))?;

        self.store(&key, &nuspec);
        Ok(nuspec)
    }
}

fn attribute(element: &BytesStart<'_>, name: &[u8]) -> Result<Option<String>> {
    for attr in element.attributes() {
        let attr = attr.map_err(|e| ScanError::Registry(format!("invalid nuspec: {e}")))?;
        if attr.key.local_name().as_ref().eq_ignore_ascii_case(name) {
            let value = attr
                .unescape_value()
                .map_err(|e| ScanError::Registry(format!("invalid nuspec: {e}")))?;
            return Ok(Some(value.trim().to_string()).filter(|v| !v.is_empty()));
        }
    }
    Ok(None)
}

/// Reads the dependency groups of a nuspec document.
pub fn parse_nuspec(content: &str) -> Result<Vec<DependencyGroup>> {
    let mut reader = Reader::from_str(content.trim_start_matches('\u{feff}'));
    let mut groups = Vec::new();
    let mut ungrouped = Vec::new();
    let mut current: Option<DependencyGroup> = None;
    let mut in_dependencies = false;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| ScanError::Registry(format!("invalid nuspec: {e}")))?;
        let self_closing = matches!(event, Event::Empty(_));
        match event {
            Event::Start(e) | Event::Empty(e) if in_dependencies => {
                match e.local_name().as_ref() {
                    b"group" => {
                        let group = DependencyGroup {
                            target_framework: attribute(&e, b"targetFramework")?,
                            dependencies: Vec::new(),
                        };
                        if self_closing {
                            groups.push(group);
                        } else if let Some(open) = current.replace(group) {
                            groups.push(open);
                        }
                    }
                    b"dependency" => {
                        let Some(id) = attribute(&e, b"id")? else {
                            continue;
                        };
                        let dependency = Dependency {
                            id,
                            range: attribute(&e, b"version")?,
                        };
                        match current.as_mut() {
                            Some(group) => group.dependencies.push(dependency),
                            None => ungrouped.push(dependency),
                        }
                    }
                    _ => {}
                }
            }
            Event::Start(e) if e.local_name().as_ref() == b"dependencies" => in_dependencies = true,
            Event::End(e) => match e.local_name().as_ref() {
                b"group" => groups.extend(current.take()),
                b"dependencies" => in_dependencies = false,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }
    groups.extend(current);

    if !ungrouped.is_empty() {
        groups.insert(
            0,
            DependencyGroup {
                target_framework: None,
                dependencies: ungrouped,
            },
        );
    }
    Ok(groups)
}

/// Normalizes a framework name to its short folder form, so that
/// `.NETStandard2.0` and `netstandard2.0` compare equal.
pub fn normalize_framework(framework: &str) -> String {
    let lower = framework.trim().to_ascii_lowercase().replace(",version=v", "");
    let lower = lower.strip_prefix('.').unwrap_or(&lower);

    if let Some(version) = lower.strip_prefix("netframework") {
        return format!("net{}", version.replace('.', ""));
    }
    if let Some(version) = lower.strip_prefix("netcoreapp") {
        let major = version.split('.').next().and_then(|m| m.parse::<u32>().ok());
        if major.is_some_and(|m| m >= 5) {
            return format!("net{version}");
        }
    }
    lower.to_string()
}

/// Chooses the groups that apply to `framework`: the groups for exactly that
/// framework, else the framework-agnostic groups, else all of them.
pub fn select_groups<'a>(groups: &'a [DependencyGroup], framework: Option<&str>) -> Vec<&'a DependencyGroup> {
    let Some(target) = framework.map(str::trim).filter(|f| !f.is_empty()) else {
        return groups.iter().collect();
    };
    let target = normalize_framework(target);

    let exact: Vec<_> = groups
        .iter()
        .filter(|g| g.target_framework.as_deref().map(normalize_framework).as_deref() == Some(target.as_str()))
        .collect();
    if !exact.is_empty() {
        return exact;
    }

    let agnostic: Vec<_> = groups.iter().filter(|g| g.target_framework.is_none()).collect();
    if !agnostic.is_empty() {
        return agnostic;
    }

    groups.iter().collect()
}

/// Resolves the transitive closure of declared packages from a
/// [`PackageMetadataSource`].
pub struct RegistryResolver<S = FlatContainerSource> {
    source: S,
}

impl<S: PackageMetadataSource> RegistryResolver<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    async fn lowest_satisfying(
        &self,
        id: &str,
        range: &VersionRange,
        known: &mut HashMap<String, Vec<NuGetVersion>>,
    ) -> Result<Option<String>> {
        let key = id.to_ascii_lowercase();
        if !known.contains_key(&key) {
            let mut versions: Vec<NuGetVersion> = self
                .source
                .versions(id)
                .await?
                .iter()
                .filter_map(|v| NuGetVersion::parse(v).ok())
                .collect();
            versions.sort();
            known.insert(key.clone(), versions);
        }

        let allow_prerelease = range.min().is_some_and(NuGetVersion::is_prerelease);
        Ok(known.get(&key).and_then(|versions| {
            versions
                .iter()
                .filter(|v| allow_prerelease || !v.is_prerelease())
                .find(|v| range.satisfies(v))
                .map(|v| v.as_str().to_string())
        }))
    }

    /// Walks the dependencies of `roots` breadth-first.
    ///
    /// Roots keep their location. A package whose metadata cannot be read is
    /// kept without dependencies.
    pub async fn resolve_closure(&self, roots: &PackageSet, framework: Option<&str>) -> Result<PackageSet> {
        let mut resolved = PackageSet::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut known: HashMap<String, Vec<NuGetVersion>> = HashMap::new();
        let mut queue: VecDeque<Package> = roots.iter().cloned().collect();

        while let Some(package) = queue.pop_front() {
            if !seen.insert(package.canonical_key().to_ascii_lowercase()) {
                continue;
            }

            let groups = match self.source.nuspec(&package.id, &package.version).await {
                Ok(nuspec) => parse_nuspec(&nuspec),
                Err(e) => Err(e),
            };
            let groups = match groups {
                Ok(groups) => groups,
                Err(e) => {
                    warn!(package = %package, error = %e, "could not read package metadata");
                    resolved.insert(package);
                    continue;
                }
            };

            let mut dependency_ids: Vec<String> = Vec::new();
            for dependency in select_groups(&groups, framework)
                .into_iter()
                .flat_map(|group| group.dependencies.iter())
            {
                if dependency_ids.iter().any(|id| id.eq_ignore_ascii_case(&dependency.id)) {
                    continue;
                }

                let range = match dependency.range.as_deref().map(VersionRange::parse) {
                    Some(Ok(range)) => range,
                    Some(Err(e)) => {
                        warn!(package = %package, dependency = %dependency.id, error = %e, "skipping dependency");
                        continue;
                    }
                    None => VersionRange::all(),
                };

                let version = match self.lowest_satisfying(&dependency.id, &range, &mut known).await {
                    Ok(Some(version)) => version,
                    Ok(None) => {
                        warn!(package = %package, dependency = %dependency.id, range = %range, "no published version satisfies dependency");
                        continue;
                    }
                    Err(e) => {
                        warn!(dependency = %dependency.id, error = %e, "could not list package versions");
                        continue;
                    }
                };

                dependency_ids.push(dependency.id.clone());
                queue.push_back(Package::new(dependency.id.clone(), version));
            }

            debug!(package = %package, dependencies = dependency_ids.len(), "resolved dependencies");
            resolved.insert(package.with_dependencies(dependency_ids));
        }

        Ok(resolved)
    }
}

#[async_trait]
impl<S: PackageMetadataSource> PackageResolver for RegistryResolver<S> {
    fn name(&self) -> &'static str {
        "package registry"
    }

    async fn resolve(
        &self,
        _manifest: &ProjectManifest,
        declared: &PackageSet,
        framework: Option<&str>,
    ) -> Result<PackageSet> {
        self.resolve_closure(declared, framework).await
    }
}
