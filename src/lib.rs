//! NuGet dependency resolution and vulnerability matching for .NET projects.
//!
//! A scan reads the package references a project declares, resolves them to
//! the exact versions restore picked (including transitive packages), and
//! matches those against a local vulnerability index.
//!
//! ```no_run
//! use nugetscan::{Config, ScanOptions, Scanner, VulnerabilityIndex};
//! use std::path::Path;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = Config::load(None)?;
//! let index = VulnerabilityIndex::load(Path::new("vulns.json"))?;
//! let result = Scanner::new(ScanOptions::from_config(&config), index)
//!     .scan(Path::new("."))
//!     .await;
//! println!("{} packages, {} findings", result.package_count(), result.findings().count());
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod checker;
pub mod config;
pub mod error;
pub mod manifest;
pub mod model;
pub mod output;
pub mod resolver;
pub mod scanner;

pub use cache::Cache;
pub use checker::{IgnoreRule, VulnerabilityIndex};
pub use config::Config;
pub use error::{Result, ScanError};
pub use manifest::{ManifestKind, ProjectManifest};
pub use model::{Diagnostic, Finding, Package, PackageSet, ScanResult, Severity};
pub use scanner::{ScanOptions, Scanner};
