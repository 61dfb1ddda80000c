//! Configuration file handling.
//!
//! This module provides loading and saving of nugetscan configuration
//! from a TOML file.
//!
//! # Configuration Location
//!
//! The first of these that exists is used:
//! - the path given with `--config`
//! - `nugetscan.toml` in the working directory
//! - Linux: `~/.config/nugetscan/config.toml`
//! - macOS: `~/Library/Application Support/nugetscan/config.toml`
//! - Windows: `%APPDATA%\nugetscan\config.toml`
//!
//! # Example Configuration
//!
//! ```toml
//! vulnerability_db = "nuget-vulns.json"
//! target_framework = "net6.0"
//! check_transitive = true
//! online = false
//! default_format = "table"
//!
//! [ignore]
//! vulnerabilities = ["CVE-2021-12345"]
//!
//! [[ignore.packages]]
//! id = "Bootstrap"
//! version = "[3.0.0, 4.0.0)"
//!
//! [[ignore.packages]]
//! id = "Microsoft.*"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::checker::IgnoreRule;

/// Name of the per-directory configuration file.
pub const LOCAL_CONFIG_FILE: &str = "nugetscan.toml";

/// Application configuration.
///
/// # Example
///
/// ```no_run
/// use nugetscan::Config;
///
/// let config = Config::load(None).unwrap();
///
/// println!("Transitive: {}", config.check_transitive);
/// println!("Timeout: {}s", config.list_timeout_secs);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Local vulnerability index in JSON form.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vulnerability_db: Option<PathBuf>,

    /// Restricts resolution to one target framework moniker.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_framework: Option<String>,

    /// Scan transitive dependencies, not only declared references.
    ///
    /// Default: true
    pub check_transitive: bool,

    /// Resolve SDK-style projects with `dotnet list package` instead of
    /// `project.assets.json`.
    ///
    /// Default: false
    pub use_dotnet_list: bool,

    /// Allow package registry lookups for `packages.config` projects.
    ///
    /// Default: false
    pub online: bool,

    /// How long `dotnet list package` may run, in seconds.
    ///
    /// Default: 60
    pub list_timeout_secs: u64,

    /// How long to cache registry responses, in hours.
    ///
    /// Default: 24 hours
    pub cache_ttl_hours: u64,

    /// Default output format when no `--format` flag is provided.
    ///
    /// Valid values: "table", "json", "sarif", "msbuild"
    /// Default: "table"
    pub default_format: String,

    /// Scan discovered projects concurrently.
    ///
    /// Default: true
    pub parallel: bool,

    /// Ignore list configuration for suppressing known issues.
    pub ignore: IgnoreConfig,
}

/// Configuration for ignoring specific packages or vulnerabilities.
///
/// Use this to suppress known false positives or accepted risks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IgnoreConfig {
    /// Packages whose vulnerabilities are not reported.
    ///
    /// Ids support glob patterns (e.g., "Microsoft.*"). A rule without a
    /// version covers every version.
    pub packages: Vec<IgnoreRule>,

    /// Vulnerability IDs to ignore (e.g., "CVE-2021-12345", "GHSA-xxxx").
    pub vulnerabilities: Vec<String>,
}

impl IgnoreConfig {
    /// Check if a vulnerability should be ignored.
    pub fn should_ignore_vulnerability(&self, vuln_id: &str) -> bool {
        self.vulnerabilities
            .iter()
            .any(|id| id.eq_ignore_ascii_case(vuln_id))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            vulnerability_db: None,
            target_framework: None,
            check_transitive: true,
            use_dotnet_list: false,
            online: false,
            list_timeout_secs: 60,
            cache_ttl_hours: 24,
            default_format: "table".to_string(),
            parallel: true,
            ignore: IgnoreConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from `explicit`, or else from the first config
    /// file found in the lookup order.
    ///
    /// If no config file exists, returns default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicit path is missing, or if the config
    /// file cannot be read or parsed.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load_from(path);
        }

        match Self::lookup_paths().into_iter().find(|p| p.is_file()) {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    /// Loads configuration from a specific file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    fn lookup_paths() -> Vec<PathBuf> {
        vec![PathBuf::from(LOCAL_CONFIG_FILE), Self::config_path()]
    }

    /// Saves the configuration to the user config file.
    ///
    /// Creates the parent directory if it doesn't exist.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config file {}", path.display()))?;
        Ok(())
    }

    /// Returns the path to the user configuration file.
    ///
    /// # Example
    ///
    /// ```
    /// use nugetscan::Config;
    ///
    /// let path = Config::config_path();
    /// println!("Config file: {}", path.display());
    /// ```
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("nugetscan")
            .join("config.toml")
    }

    /// Generates a string containing the default configuration.
    pub fn generate_default_config() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}
