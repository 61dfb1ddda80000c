//! Resolution from the `dotnet list package --include-transitive` report.
//!
//! This path is best-effort and less reliable than
//! [`AssetsResolver`](super::AssetsResolver). The report is written for
//! people: headers are localized and column widths depend on the locale and
//! on identifier lengths. Parsing therefore relies only on the `>` row marker,
//! on quote characters around project names, and on whitespace-separated
//! columns. Reports that do not follow that shape are rejected rather than
//! guessed at.
//!
//! A project report looks like:
//!
//! ```text
//! Project 'App' has the following package references
//!    [net6.0]:
//!    Top-level Package      Requested   Resolved
//!    > Bootstrap            3.0.0       3.0.7
//!
//!    Transitive Package      Resolved
//!    > jQuery                1.9.0
//! ```
//!
//! Direct rows carry the resolved version in the fourth column, transitive
//! rows in the third.

use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use super::PackageResolver;
use crate::error::{Result, ScanError};
use crate::manifest::ProjectManifest;
use crate::model::{Package, PackageSet};

/// Marks a package row.
const MARKER: char = '>';

/// Quote characters that may surround a project name, across locales.
const QUOTES: &[char] = &['\'', '"', '`', '\u{2018}', '\u{2019}', '\u{201C}', '\u{201D}', '\u{201E}'];

const DIRECT_VERSION_COLUMN: usize = 3;
const TRANSITIVE_VERSION_COLUMN: usize = 2;

pub const DEFAULT_LIST_TIMEOUT: Duration = Duration::from_secs(60);

/// One project's part of a solution report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectSection<'a> {
    pub name: String,
    pub lines: &'a [&'a str],
}

fn report_lines(output: &str) -> Vec<&str> {
    output.lines().filter(|line| !line.is_empty()).collect()
}

fn malformed(reason: impl Into<String>, output: &str) -> ScanError {
    ScanError::MalformedListOutput {
        reason: reason.into(),
        output: output.to_string(),
    }
}

fn is_row(line: &str) -> bool {
    line.contains(MARKER)
}

fn parse_row(line: &str, version_column: usize) -> Result<Package> {
    let columns: Vec<&str> = line.split_whitespace().collect();
    match (columns.get(1), columns.get(version_column)) {
        (Some(id), Some(version)) => Ok(Package::new(*id, *version)),
        _ => Err(malformed(
            format!("package row '{}' has too few columns", line.trim()),
            line,
        )),
    }
}

/// Parses the rows of one project's report.
///
/// Everything before the first row is skipped. The first run of rows holds
/// the direct references; the next run, after the header lines that follow
/// it, holds the transitive ones. Anything after that is ignored.
pub fn parse_project_section(lines: &[&str]) -> Result<PackageSet> {
    let mut packages = PackageSet::new();

    let Some(direct_start) = lines.iter().position(|l| is_row(l)) else {
        return Ok(packages);
    };
    let direct_end = direct_start + lines[direct_start..].iter().take_while(|l| is_row(l)).count();
    for line in &lines[direct_start..direct_end] {
        packages.insert(parse_row(line, DIRECT_VERSION_COLUMN)?);
    }

    if let Some(offset) = lines[direct_end..].iter().position(|l| is_row(l)) {
        let transitive_start = direct_end + offset;
        for line in lines[transitive_start..].iter().take_while(|l| is_row(l)) {
            packages.insert(parse_row(line, TRANSITIVE_VERSION_COLUMN)?);
        }
    }

    Ok(packages)
}

/// Parses the report for a single project.
pub fn parse_list_output(output: &str) -> Result<PackageSet> {
    let lines = report_lines(output);
    if lines.len() < 3 {
        debug!(output = %output, "dotnet list output");
        return Err(malformed("output has fewer than 3 lines", output));
    }
    if !lines.iter().any(|l| is_row(l)) {
        return Err(malformed("no package rows found", output));
    }
    parse_project_section(&lines)
}

/// Extracts the text between the first and last quote character.
fn project_name(line: &str) -> String {
    let Some(first) = line.find(QUOTES) else {
        return line.trim().to_string();
    };
    let after = first + line[first..].chars().next().map_or(1, char::len_utf8);
    match line.rfind(QUOTES) {
        Some(last) if last >= after => line[after..last].to_string(),
        _ => line[after..].trim().to_string(),
    }
}

/// Splits a solution report into one section per project.
///
/// A line containing a quote character starts a section; the lines after
/// it up to the next such line belong to it. Lines before the first
/// section are dropped.
pub fn split_by_project<'a>(lines: &'a [&'a str]) -> Vec<ProjectSection<'a>> {
    let starts: Vec<usize> = lines
        .iter()
        .enumerate()
        .filter(|(_, line)| line.contains(QUOTES))
        .map(|(i, _)| i)
        .collect();

    if starts.first().is_some_and(|&first| first > 0) {
        debug!(skipped = starts[0], "ignoring lines before the first project");
    }

    starts
        .iter()
        .enumerate()
        .map(|(n, &start)| {
            let end = starts.get(n + 1).copied().unwrap_or(lines.len());
            ProjectSection {
                name: project_name(lines[start]),
                lines: &lines[start..end],
            }
        })
        .collect()
}

/// Parses a solution report into each project's packages, in report order.
pub fn parse_solution_list_output(output: &str) -> Result<Vec<(String, PackageSet)>> {
    let lines = report_lines(output);
    if lines.len() < 3 {
        return Err(malformed("output has fewer than 3 lines", output));
    }
    if !lines.iter().any(|l| is_row(l)) {
        return Err(malformed("no package rows found", output));
    }

    let sections = split_by_project(&lines);
    if sections.is_empty() {
        return Err(malformed("no project names found", output));
    }
    sections
        .into_iter()
        .map(|section| Ok((section.name, parse_project_section(section.lines)?)))
        .collect()
}

async fn read_stream<R: AsyncRead + Unpin>(stream: Option<R>) -> std::io::Result<String> {
    let mut buf = Vec::new();
    if let Some(mut stream) = stream {
        stream.read_to_end(&mut buf).await?;
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Runs `dotnet list package`.
#[derive(Debug, Clone)]
pub struct DotnetCli {
    executable: String,
    timeout: Duration,
}

impl DotnetCli {
    pub fn new() -> Self {
        Self {
            executable: "dotnet".to_string(),
            timeout: DEFAULT_LIST_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_executable(mut self, executable: impl Into<String>) -> Self {
        self.executable = executable.into();
        self
    }

    fn list_args(target: &Path, framework: Option<&str>) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "list".into(),
            target.as_os_str().to_owned(),
            "package".into(),
            "--include-transitive".into(),
        ];
        if let Some(framework) = framework.map(str::trim).filter(|f| !f.is_empty()) {
            args.push("--framework".into());
            args.push(framework.into());
        }
        args
    }

    /// Returns the report on stdout, or `None` when the command did not
    /// finish within the timeout.
    ///
    /// Both output streams are drained concurrently so that neither can
    /// fill up and block the child.
    #[instrument(skip(self, target), fields(target = %target.display()))]
    pub async fn list_packages(&self, target: &Path, framework: Option<&str>) -> Result<Option<String>> {
        let mut cmd = Command::new(&self.executable);
        cmd.args(Self::list_args(target, framework))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(command = ?cmd, "Executing dotnet list");

        let mut child = cmd
            .spawn()
            .map_err(|e| ScanError::Toolchain(format!("{}: {e}", self.executable)))?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let run = async {
            tokio::try_join!(read_stream(stdout), read_stream(stderr), child.wait())
        };

        match tokio::time::timeout(self.timeout, run).await {
            Ok(Ok((stdout, stderr, status))) => {
                if !stderr.trim().is_empty() {
                    warn!(exit_code = status.code(), stderr = %stderr.trim(), "dotnet list reported errors");
                }
                Ok(Some(stdout))
            }
            Ok(Err(e)) => Err(ScanError::Toolchain(e.to_string())),
            Err(_) => {
                let _ = child.start_kill();
                warn!(
                    timeout_secs = self.timeout.as_secs(),
                    "dotnet list did not finish in time, continuing without its packages"
                );
                Ok(None)
            }
        }
    }
}

impl Default for DotnetCli {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves projects and solutions through [`DotnetCli`].
#[derive(Debug, Clone, Default)]
pub struct DotnetListResolver {
    cli: DotnetCli,
}

impl DotnetListResolver {
    pub fn new(cli: DotnetCli) -> Self {
        Self { cli }
    }

    /// Resolves every project of a solution. A timeout yields no projects.
    pub async fn resolve_solution(
        &self,
        manifest: &ProjectManifest,
        framework: Option<&str>,
    ) -> Result<Vec<(String, PackageSet)>> {
        match self.cli.list_packages(manifest.project_path(), framework).await? {
            Some(output) => parse_solution_list_output(&output),
            None => Ok(Vec::new()),
        }
    }
}

#[async_trait]
impl PackageResolver for DotnetListResolver {
    fn name(&self) -> &'static str {
        "dotnet list package"
    }

    async fn resolve(
        &self,
        manifest: &ProjectManifest,
        _declared: &PackageSet,
        framework: Option<&str>,
    ) -> Result<PackageSet> {
        match self.cli.list_packages(manifest.project_path(), framework).await? {
            Some(output) => parse_list_output(&output),
            None => Ok(PackageSet::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENGLISH: &str = include_str!("../../tests/fixtures/dotnet_list_en.txt");
    const GERMAN: &str = include_str!("../../tests/fixtures/dotnet_list_de.txt");
    const CHINESE: &str = include_str!("../../tests/fixtures/dotnet_list_zh.txt");
    const SOLUTION: &str = include_str!("../../tests/fixtures/dotnet_list_sln.txt");

    fn expected() -> Vec<&'static str> {
        vec![
            "pkg:nuget/Bootstrap@3.0.7",
            "pkg:nuget/IdentityServer4@3.1.3",
            "pkg:nuget/NuGetDefense@1.0.6",
            "pkg:nuget/jQuery@1.9.0",
        ]
    }

    #[test]
    fn test_locales_produce_same_packages() {
        for report in [ENGLISH, GERMAN, CHINESE] {
            let packages = parse_list_output(report).unwrap();
            assert_eq!(packages.keys().collect::<Vec<_>>(), expected());
        }
    }

    #[test]
    fn test_direct_and_transitive_columns() {
        let packages = parse_list_output(
            "Project 'netcoreapp3.1.TestLib' has the following package references
   [netcoreapp3.1]:
   Top-level Package      Requested   Resolved
   > Bootstrap            3.0.0       3.0.7
   > NuGetDefense         1.0.8       1.0.6

   Transitive Package      Resolved
   > jQuery                1.9.0

",
        )
        .unwrap();

        assert_eq!(packages.len(), 3);
        assert_eq!(packages.find_by_id("Bootstrap").next().unwrap().version, "3.0.7");
        assert_eq!(packages.find_by_id("NuGetDefense").next().unwrap().version, "1.0.6");
        assert_eq!(packages.find_by_id("jQuery").next().unwrap().version, "1.9.0");
    }

    #[test]
    fn test_crlf_report() {
        let report = ENGLISH.replace('\n', "\r\n");
        assert_eq!(parse_list_output(&report).unwrap().keys().collect::<Vec<_>>(), expected());
    }

    #[test]
    fn test_too_short_output_is_malformed() {
        let err = parse_list_output("Project 'App' has no package references.\n\n").unwrap_err();
        assert!(matches!(err, ScanError::MalformedListOutput { .. }));
    }

    #[test]
    fn test_output_without_rows_is_malformed() {
        let err = parse_list_output("error: one\nerror: two\nerror: three\n").unwrap_err();
        match err {
            ScanError::MalformedListOutput { reason, .. } => assert!(reason.contains("no package rows")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_solution_output_without_rows_is_malformed() {
        let err = parse_solution_list_output(
            "error: MSB1009: Project file does not exist.\nSwitch: All.sln\nsomething else here\n",
        )
        .unwrap_err();
        assert!(matches!(err, ScanError::MalformedListOutput { .. }));

        let err = parse_solution_list_output("Project 'A' has no packages\nline two\nline three\n")
            .unwrap_err();
        match err {
            ScanError::MalformedListOutput { reason, .. } => assert!(reason.contains("no package rows")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_solution_output_without_project_names_is_malformed() {
        let err = parse_solution_list_output("header\n   > Bootstrap   3.0.0   3.0.7\nfooter\n").unwrap_err();
        match err {
            ScanError::MalformedListOutput { reason, .. } => assert!(reason.contains("no project names")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_row_with_missing_column_is_malformed() {
        let report = "Project 'App'\n   Top-level Package\n   > Bootstrap 3.0.0\n";
        assert!(matches!(
            parse_list_output(report),
            Err(ScanError::MalformedListOutput { .. })
        ));
    }

    #[test]
    fn test_split_solution_report() {
        let lines = report_lines(SOLUTION);
        let sections = split_by_project(&lines);

        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].name, "ConsoleApp1");
        assert_eq!(sections[1].name, "ClassLibrary1");
        assert_eq!(sections[0].lines.len() + sections[1].lines.len(), lines.len());
    }

    #[test]
    fn test_parse_solution_report() {
        let projects = parse_solution_list_output(SOLUTION).unwrap();

        assert_eq!(projects.len(), 2);
        let (name, packages) = &projects[0];
        assert_eq!(name, "ConsoleApp1");
        assert_eq!(packages.len(), 3);
        let (name, packages) = &projects[1];
        assert_eq!(name, "ClassLibrary1");
        assert_eq!(packages.len(), 2);
        assert!(packages.contains_key("pkg:nuget/Serilog@2.10.0"));
    }

    #[test]
    fn test_curly_quotes_and_preamble() {
        let report = "Build succeeded.
项目“ConsoleApp1”具有以下包引用
   > Bootstrap   3.0.0   3.0.7
Das Projekt „ClassLibrary1“ enthält die folgenden Paketverweise.
   > Serilog   2.10.0   2.10.0
";
        let projects = parse_solution_list_output(report).unwrap();
        let names: Vec<&str> = projects.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["ConsoleApp1", "ClassLibrary1"]);
        assert!(projects[1].1.contains_key("pkg:nuget/Serilog@2.10.0"));
    }

    #[test]
    fn test_project_name_with_single_quote_char() {
        assert_eq!(project_name("Project 'App has references"), "App has references");
        assert_eq!(project_name("Project \"My App\" has"), "My App");
    }

    #[test]
    fn test_list_args() {
        let args = DotnetCli::list_args(Path::new("App.csproj"), Some("net6.0"));
        assert_eq!(
            args,
            vec!["list", "App.csproj", "package", "--include-transitive", "--framework", "net6.0"]
        );
        assert_eq!(DotnetCli::list_args(Path::new("App.csproj"), Some(" ")).len(), 4);
    }

    #[tokio::test]
    async fn test_missing_toolchain_is_an_error() {
        let cli = DotnetCli::new().with_executable("nugetscan-no-such-dotnet");
        let result = cli.list_packages(Path::new("App.csproj"), None).await;
        assert!(matches!(result, Err(ScanError::Toolchain(_))));
    }

    #[cfg(unix)]
    fn fake_dotnet(dir: &Path, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("fake-dotnet");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.display().to_string()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_degrades_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cli = DotnetCli::new()
            .with_executable(fake_dotnet(dir.path(), "sleep 5"))
            .with_timeout(Duration::from_millis(200));

        let output = cli.list_packages(Path::new("App.csproj"), None).await.unwrap();
        assert!(output.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_resolver_parses_command_output() {
        let dir = tempfile::tempdir().unwrap();
        let report = dir.path().join("report.txt");
        std::fs::write(&report, ENGLISH).unwrap();
        let executable = fake_dotnet(
            dir.path(),
            &format!("echo 'restore warning' >&2\ncat '{}'", report.display()),
        );

        let resolver = DotnetListResolver::new(DotnetCli::new().with_executable(executable));
        let manifest = ProjectManifest::classify(dir.path().join("App.csproj"));
        let packages = resolver
            .resolve(&manifest, &PackageSet::new(), None)
            .await
            .unwrap();

        assert_eq!(packages.keys().collect::<Vec<_>>(), expected());
    }
}
