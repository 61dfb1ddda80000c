//! Core data types for packages, vulnerabilities, and scan results.
//!
//! - [`Package`] - A package reference, resolved or declared
//! - [`PackageSet`] - One project's packages keyed by canonical key
//! - [`VulnerabilityEntry`] - A known vulnerability of a package
//! - [`Finding`] - A package matched against a vulnerability
//! - [`ScanResult`] - Complete scan results
//! - [`Diagnostic`] - An MSBuild-style warning or error line
//!
//! # Example
//!
//! ```
//! use nugetscan::{Package, PackageSet};
//!
//! let mut packages = PackageSet::new();
//! packages.insert(Package::new("jQuery", "1.9.0"));
//!
//! assert!(packages.contains_key("pkg:nuget/jQuery@1.9.0"));
//! ```

mod diagnostic;
mod package;
mod vulnerability;

pub use diagnostic::*;
pub use package::*;
pub use vulnerability::*;
