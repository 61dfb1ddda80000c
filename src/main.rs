use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use nugetscan::{
    cache::Cache,
    config::Config,
    model::{ScanResult, Severity},
    output::{format_result_to_string, print_result, OutputFormat},
    ScanOptions, Scanner, VulnerabilityIndex,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// Exit codes for CI integration
mod exit_codes {
    pub const SUCCESS: u8 = 0;
    pub const CRITICAL_VULN: u8 = 2;
    pub const HIGH_VULN: u8 = 3;
    pub const MEDIUM_VULN: u8 = 4;
    pub const LOW_VULN: u8 = 5;
    pub const ERROR: u8 = 1;
}

#[derive(Parser)]
#[command(name = "nugetscan")]
#[command(
    author,
    version,
    about = "Resolve the NuGet packages of .NET projects and check them for known vulnerabilities"
)]
struct Cli {
    /// Show more log output (-v for info, -vv for debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Use this config file instead of the default lookup
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan a project, a solution, or every project under a directory
    Scan {
        /// Project file, solution file, packages.config, or directory
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Target framework moniker to resolve (e.g. net6.0)
        #[arg(long)]
        framework: Option<String>,

        /// Vulnerability index (JSON)
        #[arg(long)]
        db: Option<PathBuf>,

        /// Output format (table, json, sarif, msbuild)
        #[arg(short, long)]
        format: Option<String>,

        /// Only check declared references
        #[arg(long)]
        no_transitive: bool,

        /// Resolve SDK-style projects with `dotnet list package`
        #[arg(long)]
        dotnet_list: bool,

        /// Allow registry lookups for packages.config projects
        #[arg(long)]
        online: bool,

        /// Write output to file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Clear cache before scanning
        #[arg(long)]
        clear_cache: bool,

        /// Exit with error if vulnerabilities at or above this severity are found
        #[arg(long, value_enum)]
        fail_on: Option<FailLevel>,

        /// Scan projects one at a time
        #[arg(long)]
        no_parallel: bool,
    },

    /// Show or create config file
    Config {
        /// Generate default config file
        #[arg(long)]
        init: bool,

        /// Show config file path
        #[arg(long)]
        path: bool,
    },

    /// Clear the registry cache
    ClearCache,
}

#[derive(Clone, Copy, ValueEnum)]
enum FailLevel {
    Critical,
    High,
    Medium,
    Low,
}

impl FailLevel {
    fn severity(self) -> Severity {
        match self {
            FailLevel::Critical => Severity::Critical,
            FailLevel::High => Severity::High,
            FailLevel::Medium => Severity::Medium,
            FailLevel::Low => Severity::Low,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(exit_codes::ERROR)
        }
    }
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<u8> {
    let mut config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Scan {
            path,
            framework,
            db,
            format,
            no_transitive,
            dotnet_list,
            online,
            output,
            clear_cache,
            fail_on,
            no_parallel,
        } => {
            if clear_cache {
                Cache::with_ttl_hours(config.cache_ttl_hours).clear()?;
            }

            if framework.is_some() {
                config.target_framework = framework;
            }
            if db.is_some() {
                config.vulnerability_db = db;
            }
            config.check_transitive &= !no_transitive;
            config.use_dotnet_list |= dotnet_list;
            config.online |= online;
            config.parallel &= !no_parallel;

            let format = format.unwrap_or_else(|| config.default_format.clone());
            run_scan(&config, &path, &format, output, fail_on).await
        }
        Commands::Config { init, path } => {
            handle_config(cli.config.as_deref(), init, path)?;
            Ok(exit_codes::SUCCESS)
        }
        Commands::ClearCache => {
            Cache::with_ttl_hours(config.cache_ttl_hours).clear()?;
            println!("Cache cleared.");
            Ok(exit_codes::SUCCESS)
        }
    }
}

async fn run_scan(
    config: &Config,
    path: &Path,
    format: &str,
    output_file: Option<PathBuf>,
    fail_on: Option<FailLevel>,
) -> Result<u8> {
    let format = OutputFormat::from_str(format).map_err(|e| anyhow::anyhow!(e))?;
    let is_interactive = format == OutputFormat::Table;

    let index = match &config.vulnerability_db {
        Some(db) => VulnerabilityIndex::load(db)
            .with_context(|| format!("Failed to load vulnerability database {}", db.display()))?,
        None => {
            warn!("no vulnerability database configured, packages are listed without findings");
            VulnerabilityIndex::default()
        }
    };

    let progress = if is_interactive {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
            pb.set_style(style);
        }
        pb.enable_steady_tick(Duration::from_millis(100));
        pb.set_message(format!("Scanning {}...", path.display()));
        Some(pb)
    } else {
        None
    };

    let scanner = Scanner::new(ScanOptions::from_config(config), index);
    let result = scanner.scan(path).await;

    if let Some(pb) = progress {
        pb.finish_with_message(format!(
            "Found {} packages in {} projects",
            result.package_count(),
            result.projects.len()
        ));
    }

    if let Some(path) = output_file {
        let content = format_result_to_string(&result, format)?;
        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        if is_interactive {
            println!("Results written to: {}", path.display());
        }
    } else {
        print_result(&result, format)?;
    }

    let code = determine_exit_code(&result, fail_on);
    if code == exit_codes::SUCCESS && result.has_errors() {
        return Ok(exit_codes::ERROR);
    }
    Ok(code)
}

/// Determine the exit code based on vulnerabilities found and --fail-on setting
fn determine_exit_code(result: &ScanResult, fail_on: Option<FailLevel>) -> u8 {
    let (Some(level), Some(worst)) = (fail_on, result.worst_severity()) else {
        return exit_codes::SUCCESS;
    };

    if worst.rank() > level.severity().rank() {
        return exit_codes::SUCCESS;
    }

    match worst {
        Severity::Critical => exit_codes::CRITICAL_VULN,
        Severity::High => exit_codes::HIGH_VULN,
        Severity::Medium => exit_codes::MEDIUM_VULN,
        Severity::Low => exit_codes::LOW_VULN,
        Severity::Unknown => exit_codes::SUCCESS,
    }
}

fn handle_config(explicit: Option<&Path>, init: bool, show_path: bool) -> Result<()> {
    let config_path = explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(Config::config_path);

    if show_path {
        println!("{}", config_path.display());
        return Ok(());
    }

    if init {
        if config_path.exists() {
            println!("Config file already exists at: {}", config_path.display());
            return Ok(());
        }

        Config::default().save_to(&config_path)?;
        println!("Created config file at: {}", config_path.display());
        println!();
        println!("Default configuration:");
        println!("{}", Config::generate_default_config());
        return Ok(());
    }

    // Show current config
    if config_path.exists() {
        let content = std::fs::read_to_string(&config_path)?;
        println!("Config file: {}", config_path.display());
        println!();
        println!("{}", content);
    } else {
        println!("No config file found.");
        println!("Run 'nugetscan config --init' to create one.");
        println!();
        println!("Config path: {}", config_path.display());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nugetscan::model::{Finding, Package, ProjectReport, VulnerabilityEntry};

    fn result_with_scores(scores: &[f64]) -> ScanResult {
        let package = Package::new("jQuery", "1.9.0");
        let findings = scores
            .iter()
            .enumerate()
            .map(|(i, score)| {
                let entry = VulnerabilityEntry {
                    cwe: String::new(),
                    description: String::new(),
                    references: vec![],
                    score: *score,
                    vector: None,
                    vendor: String::new(),
                    versions: vec![],
                };
                Finding::new(&format!("CVE-{i}"), &package, &entry)
            })
            .collect();
        ScanResult::new(vec![ProjectReport {
            name: "App".to_string(),
            manifest: PathBuf::from("App.csproj"),
            packages: vec![package],
            findings,
            diagnostics: vec![],
        }])
    }

    #[test]
    fn test_exit_code_follows_worst_severity() {
        let result = result_with_scores(&[5.0, 7.5]);

        assert_eq!(determine_exit_code(&result, None), exit_codes::SUCCESS);
        assert_eq!(determine_exit_code(&result, Some(FailLevel::Critical)), exit_codes::SUCCESS);
        assert_eq!(determine_exit_code(&result, Some(FailLevel::High)), exit_codes::HIGH_VULN);
        assert_eq!(determine_exit_code(&result, Some(FailLevel::Low)), exit_codes::HIGH_VULN);
        assert_eq!(
            determine_exit_code(&result_with_scores(&[2.0]), Some(FailLevel::Medium)),
            exit_codes::SUCCESS
        );
        assert_eq!(
            determine_exit_code(&result_with_scores(&[]), Some(FailLevel::Low)),
            exit_codes::SUCCESS
        );
    }
}
