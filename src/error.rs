//! Error types for dependency resolution and vulnerability matching.
//!
//! Only conditions that abort the scan of a project are represented here.
//! Recoverable problems (a reference with an unparsable version, a toolchain
//! timeout, a duplicate package key) are logged and surfaced as
//! [`Diagnostic`](crate::model::Diagnostic) values instead.

use std::path::PathBuf;

/// Errors produced while scanning a project.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    /// Reading a file from disk failed.
    #[error("io error: {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A manifest could not be read as XML.
    #[error("failed to parse manifest {}: {reason}", path.display())]
    ManifestParse { path: PathBuf, reason: String },

    /// No `project.assets.json` exists next to the project or under `obj/`.
    ///
    /// This is fatal for SDK-style projects: there is no fallback once the
    /// lock artifact strategy has been selected.
    #[error(
        "failed to find project.assets.json in {} or {}. Run `dotnet restore` and try again",
        directory.display(),
        directory.join("obj").display()
    )]
    LockArtifactNotFound { directory: PathBuf },

    /// The lock artifact exists but is not valid JSON of the expected shape.
    #[error("failed to parse lock artifact {}: {reason}", path.display())]
    LockArtifactParse { path: PathBuf, reason: String },

    /// A version string is not a valid NuGet version.
    #[error("invalid version '{version}': {reason}")]
    InvalidVersion { version: String, reason: String },

    /// A version range expression could not be parsed.
    #[error("invalid version range '{range}': {reason}")]
    InvalidVersionRange { range: String, reason: String },

    /// The `dotnet list package` report could not be interpreted.
    #[error("invalid dotnet list output ({reason}). Run `dotnet restore` then build again")]
    MalformedListOutput { reason: String, output: String },

    /// The .NET toolchain could not be started.
    #[error("failed to run dotnet: {0}")]
    Toolchain(String),

    /// The vulnerability index could not be loaded.
    #[error("vulnerability database error: {0}")]
    VulnerabilityDb(String),

    /// A package registry request failed.
    #[error("registry error: {0}")]
    Registry(String),
}

impl ScanError {
    /// Wraps an I/O error with the path it relates to.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result alias used across the library.
pub type Result<T> = std::result::Result<T, ScanError>;
