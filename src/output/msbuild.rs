//! MSBuild diagnostic lines, one per finding.
//!
//! Visual Studio and `dotnet build` turn these lines into entries of the
//! error list, pointing at the line that declares the package.

use crate::model::{Diagnostic, Finding, ScanResult, Severity};
use anyhow::Result;
use std::path::Path;

fn finding_diagnostic(manifest: &Path, finding: &Finding) -> Diagnostic {
    let diagnostic = match finding.severity {
        Severity::Critical | Severity::High => Diagnostic::error(finding_message(finding)),
        _ => Diagnostic::warning(finding_message(finding)),
    };
    diagnostic
        .in_file(manifest)
        .with_code(finding.vulnerability_id.clone())
        .at(finding.location)
}

fn finding_message(finding: &Finding) -> String {
    let entry = &finding.entry;
    let mut message = format!(
        "{} {} has a {} severity vulnerability (score {})",
        finding.package_id, finding.version, finding.severity, entry.score
    );
    if !entry.cwe.is_empty() {
        message.push_str(&format!(" {}", entry.cwe));
    }
    if !entry.description.is_empty() {
        message.push_str(&format!(". {}", entry.description.trim()));
    }
    if let Some(reference) = entry.references.first() {
        message.push_str(&format!(" See {reference}"));
    }
    message.replace(['\r', '\n'], " ")
}

/// Renders the project diagnostics followed by one line per finding.
pub fn generate_msbuild_string(result: &ScanResult) -> String {
    let mut lines = Vec::new();
    for project in &result.projects {
        lines.extend(project.diagnostics.iter().map(ToString::to_string));
        lines.extend(
            project
                .findings
                .iter()
                .map(|finding| finding_diagnostic(&project.manifest, finding).to_string()),
        );
    }
    lines.join("\n")
}

pub fn print_msbuild(result: &ScanResult) -> Result<()> {
    let output = generate_msbuild_string(result);
    if !output.is_empty() {
        println!("{output}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Package, ProjectReport, SourceLocation, VulnerabilityEntry};
    use std::path::PathBuf;

    fn entry(score: f64) -> VulnerabilityEntry {
        VulnerabilityEntry {
            cwe: "CWE-79".to_string(),
            description: "XSS in the\ntooltip.".to_string(),
            references: vec![],
            score,
            vector: None,
            vendor: String::new(),
            versions: vec![],
        }
    }

    #[test]
    fn test_category_follows_severity() {
        let bootstrap = Package::new("Bootstrap", "3.0.7").with_location(SourceLocation::new(3, 6));
        let jquery = Package::new("jQuery", "1.9.0");
        let report = ProjectReport {
            name: "App".to_string(),
            manifest: PathBuf::from("App.csproj"),
            packages: vec![bootstrap.clone(), jquery.clone()],
            findings: vec![
                Finding::new("CVE-2018-14040", &bootstrap, &entry(6.1)),
                Finding::new("CVE-2020-0001", &jquery, &entry(9.8)),
            ],
            diagnostics: vec![Diagnostic::warning("skipped").in_file("App.csproj")],
        };

        let output = generate_msbuild_string(&ScanResult::new(vec![report]));
        let lines: Vec<&str> = output.lines().collect();

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "App.csproj: Warning : skipped");
        assert_eq!(
            lines[1],
            "App.csproj(3,6) : Warning : CVE-2018-14040 : Bootstrap 3.0.7 has a medium severity vulnerability (score 6.1) CWE-79. XSS in the tooltip."
        );
        assert!(lines[2].starts_with("App.csproj: Error : CVE-2020-0001 : jQuery 1.9.0 has a critical"));
    }
}
