mod cli;
mod json;
mod msbuild;
mod sarif;

pub use cli::print_cli_table;
pub use json::print_json;
pub use msbuild::print_msbuild;
pub use sarif::print_sarif;

use crate::model::ScanResult;
use anyhow::Result;

/// Output format for scan results
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable table format
    Table,
    /// JSON format for programmatic use
    Json,
    /// SARIF format for GitHub Actions code scanning
    Sarif,
    /// MSBuild diagnostic lines for build logs and IDE error lists
    Msbuild,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(OutputFormat::Table),
            "json" => Ok(OutputFormat::Json),
            "sarif" => Ok(OutputFormat::Sarif),
            "msbuild" | "vs" => Ok(OutputFormat::Msbuild),
            _ => Err(format!(
                "Unknown format: {}. Use 'table', 'json', 'sarif', or 'msbuild'",
                s
            )),
        }
    }
}

pub fn print_result(result: &ScanResult, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => print_cli_table(result),
        OutputFormat::Json => print_json(result),
        OutputFormat::Sarif => print_sarif(result),
        OutputFormat::Msbuild => print_msbuild(result),
    }
}

/// Format result to string for file output
pub fn format_result_to_string(result: &ScanResult, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Sarif => sarif::generate_sarif_string(result),
        OutputFormat::Msbuild => Ok(msbuild::generate_msbuild_string(result)),
        // For table format, just use JSON as the file output
        OutputFormat::Json | OutputFormat::Table => json::generate_json_string(result),
    }
}
