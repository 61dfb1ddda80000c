use serde::{Deserialize, Serialize};
use std::collections::btree_map::{self, Entry};
use std::collections::BTreeMap;
use std::fmt;

use crate::checker::NuGetVersion;
use crate::error::Result;

/// Package URL type used for every package handled by this crate.
pub const ECOSYSTEM: &str = "nuget";

/// 1-based line and column of the element a package was declared by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceLocation {
    pub line: u32,
    pub column: u32,
}

impl SourceLocation {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.line, self.column)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    pub id: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
}

impl Package {
    pub fn new(id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
            location: None,
            dependencies: Vec::new(),
        }
    }

    pub fn with_location(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Builds the canonical key `pkg:nuget/<id>@<version>`.
    ///
    /// The id is used exactly as supplied; no case folding is applied.
    pub fn make_purl(id: &str, version: &str) -> String {
        format!("pkg:{ECOSYSTEM}/{id}@{version}")
    }

    pub fn canonical_key(&self) -> String {
        Self::make_purl(&self.id, &self.version)
    }

    pub fn parsed_version(&self) -> Result<NuGetVersion> {
        NuGetVersion::parse(&self.version)
    }
}

impl fmt::Display for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.version)
    }
}

/// The resolved packages of one project, keyed by canonical key.
///
/// Two packages with the same id and version are the same entry. Ordering is
/// by key so that reports are stable between runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageSet {
    packages: BTreeMap<String, Package>,
}

impl PackageSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a package, replacing any entry with the same key.
    ///
    /// A replacement never erases data the previous entry had: when the new
    /// package carries no location (or no dependency list) the old one is kept.
    pub fn insert(&mut self, mut package: Package) -> Option<Package> {
        let key = package.canonical_key();
        if let Some(existing) = self.packages.get(&key) {
            if package.location.is_none() {
                package.location = existing.location;
            }
            if package.dependencies.is_empty() {
                package.dependencies = existing.dependencies.clone();
            }
        }
        self.packages.insert(key, package)
    }

    /// Inserts a package only if its key is not present yet.
    ///
    /// Returns false when the key was already taken.
    pub fn insert_first(&mut self, package: Package) -> bool {
        match self.packages.entry(package.canonical_key()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(package);
                true
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&Package> {
        self.packages.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.packages.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.packages.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Package> {
        self.packages.values()
    }

    /// All entries whose id matches `id`, ignoring ASCII case.
    pub fn find_by_id<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Package> + 'a {
        self.packages
            .values()
            .filter(move |p| p.id.eq_ignore_ascii_case(id))
    }

    /// Keeps only the packages for which `keep` returns true.
    pub fn retain(&mut self, mut keep: impl FnMut(&Package) -> bool) {
        self.packages.retain(|_, package| keep(package));
    }

    pub fn into_packages(self) -> Vec<Package> {
        self.packages.into_values().collect()
    }
}

impl FromIterator<Package> for PackageSet {
    fn from_iter<I: IntoIterator<Item = Package>>(iter: I) -> Self {
        let mut set = Self::new();
        for package in iter {
            set.insert(package);
        }
        set
    }
}

impl Extend<Package> for PackageSet {
    fn extend<I: IntoIterator<Item = Package>>(&mut self, iter: I) {
        for package in iter {
            self.insert(package);
        }
    }
}

impl IntoIterator for PackageSet {
    type Item = Package;
    type IntoIter = btree_map::IntoValues<String, Package>;

    fn into_iter(self) -> Self::IntoIter {
        self.packages.into_values()
    }
}

impl<'a> IntoIterator for &'a PackageSet {
    type Item = &'a Package;
    type IntoIter = btree_map::Values<'a, String, Package>;

    fn into_iter(self) -> Self::IntoIter {
        self.packages.values()
    }
}
