//! Vulnerability matching.
//!
//! - [`version`]: NuGet versions and version ranges
//! - [`VulnerabilityIndex`]: package id -> vulnerability lookups and matching
//! - [`IgnoreRule`]: id + range suppression of results

mod ignore;
mod index;
pub mod version;

pub use ignore::{filter_ignored, IgnoreRule};
pub use index::{PackageVulnerabilities, VulnerabilityIndex};
pub use version::{version_in_range, NuGetVersion, VersionRange};
