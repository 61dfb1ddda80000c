//! SARIF (Static Analysis Results Interchange Format) output for GitHub Actions integration.
//!
//! When used with `--format sarif`, the output can be uploaded to GitHub Code Scanning
//! to show vulnerability annotations on the manifest line that declares the package.

use std::collections::BTreeMap;

use crate::model::{Finding, ScanResult, Severity};
use anyhow::Result;
use serde::Serialize;

/// SARIF v2.1.0 schema root
#[derive(Serialize)]
struct SarifReport {
    #[serde(rename = "$schema")]
    schema: &'static str,
    version: &'static str,
    runs: Vec<SarifRun>,
}

#[derive(Serialize)]
struct SarifRun {
    tool: SarifTool,
    results: Vec<SarifResult>,
}

#[derive(Serialize)]
struct SarifTool {
    driver: SarifDriver,
}

#[derive(Serialize)]
struct SarifDriver {
    name: &'static str,
    version: &'static str,
    #[serde(rename = "informationUri")]
    information_uri: &'static str,
    rules: Vec<SarifRule>,
}

#[derive(Serialize)]
struct SarifRule {
    id: String,
    name: String,
    #[serde(rename = "shortDescription")]
    short_description: SarifMessage,
    #[serde(rename = "fullDescription", skip_serializing_if = "Option::is_none")]
    full_description: Option<SarifMessage>,
    #[serde(rename = "helpUri", skip_serializing_if = "Option::is_none")]
    help_uri: Option<String>,
    #[serde(rename = "defaultConfiguration")]
    default_configuration: SarifRuleConfiguration,
}

#[derive(Serialize)]
struct SarifRuleConfiguration {
    level: &'static str,
}

#[derive(Serialize)]
struct SarifResult {
    #[serde(rename = "ruleId")]
    rule_id: String,
    level: &'static str,
    message: SarifMessage,
    locations: Vec<SarifLocation>,
}

#[derive(Serialize)]
struct SarifMessage {
    text: String,
}

#[derive(Serialize)]
struct SarifLocation {
    #[serde(rename = "physicalLocation")]
    physical_location: SarifPhysicalLocation,
}

#[derive(Serialize)]
struct SarifPhysicalLocation {
    #[serde(rename = "artifactLocation")]
    artifact_location: SarifArtifactLocation,
    #[serde(skip_serializing_if = "Option::is_none")]
    region: Option<SarifRegion>,
}

#[derive(Serialize)]
struct SarifArtifactLocation {
    uri: String,
}

#[derive(Serialize)]
struct SarifRegion {
    #[serde(rename = "startLine")]
    start_line: u32,
    #[serde(rename = "startColumn")]
    start_column: u32,
}

fn severity_to_sarif_level(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical | Severity::High => "error",
        Severity::Medium => "warning",
        Severity::Low | Severity::Unknown => "note",
    }
}

fn rule_for(finding: &Finding) -> SarifRule {
    let entry = &finding.entry;
    let name = if entry.cwe.is_empty() {
        finding.vulnerability_id.clone()
    } else {
        format!("{} ({})", finding.vulnerability_id, entry.cwe)
    };
    SarifRule {
        id: finding.vulnerability_id.clone(),
        name,
        short_description: SarifMessage {
            text: format!("{} vulnerability in {}", finding.severity.as_str(), finding.package_id),
        },
        full_description: Some(&entry.description)
            .filter(|d| !d.is_empty())
            .map(|d| SarifMessage { text: d.clone() }),
        help_uri: entry.references.first().cloned(),
        default_configuration: SarifRuleConfiguration {
            level: severity_to_sarif_level(finding.severity),
        },
    }
}

fn build_report(result: &ScanResult) -> SarifReport {
    let mut rules: BTreeMap<String, SarifRule> = BTreeMap::new();
    let mut results = Vec::new();

    for project in &result.projects {
        for finding in &project.findings {
            rules
                .entry(finding.vulnerability_id.clone())
                .or_insert_with(|| rule_for(finding));

            let description = if finding.entry.description.is_empty() {
                String::new()
            } else {
                format!(": {}", finding.entry.description)
            };

            results.push(SarifResult {
                rule_id: finding.vulnerability_id.clone(),
                level: severity_to_sarif_level(finding.severity),
                message: SarifMessage {
                    text: format!(
                        "{} {} has a {} vulnerability {}{}",
                        finding.package_id,
                        finding.version,
                        finding.severity.as_str(),
                        finding.vulnerability_id,
                        description
                    ),
                },
                locations: vec![SarifLocation {
                    physical_location: SarifPhysicalLocation {
                        artifact_location: SarifArtifactLocation {
                            uri: project.manifest.display().to_string().replace('\\', "/"),
                        },
                        region: finding.location.map(|l| SarifRegion {
                            start_line: l.line,
                            start_column: l.column,
                        }),
                    },
                }],
            });
        }
    }

    SarifReport {
        schema: "https://raw.githubusercontent.com/oasis-tcs/sarif-spec/master/Schemata/sarif-schema-2.1.0.json",
        version: "2.1.0",
        runs: vec![SarifRun {
            tool: SarifTool {
                driver: SarifDriver {
                    name: "nugetscan",
                    version: env!("CARGO_PKG_VERSION"),
                    information_uri: "https://learn.microsoft.com/nuget/concepts/auditing-packages",
                    rules: rules.into_values().collect(),
                },
            },
            results,
        }],
    }
}

/// Generate and print SARIF output
pub fn print_sarif(result: &ScanResult) -> Result<()> {
    println!("{}", generate_sarif_string(result)?);
    Ok(())
}

/// Generate SARIF as a string (for file output)
pub fn generate_sarif_string(result: &ScanResult) -> Result<String> {
    Ok(serde_json::to_string_pretty(&build_report(result))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Package, ProjectReport, SourceLocation, VulnerabilityEntry};
    use std::path::PathBuf;

    fn entry(score: f64) -> VulnerabilityEntry {
        VulnerabilityEntry {
            cwe: "CWE-79".to_string(),
            description: "XSS".to_string(),
            references: vec!["https://nvd.nist.gov/vuln/detail/CVE-2018-14040".to_string()],
            score,
            vector: None,
            vendor: String::new(),
            versions: vec!["(, 3.4.0)".to_string()],
        }
    }

    #[test]
    fn test_results_carry_region_and_rules_are_unique() {
        let declared = Package::new("Bootstrap", "3.0.7").with_location(SourceLocation::new(3, 6));
        let transitive = Package::new("Bootstrap", "3.3.0");
        let report = ProjectReport {
            name: "App".to_string(),
            manifest: PathBuf::from("src/App/App.csproj"),
            packages: vec![declared.clone(), transitive.clone()],
            findings: vec![
                Finding::new("CVE-2018-14040", &declared, &entry(6.1)),
                Finding::new("CVE-2018-14040", &transitive, &entry(6.1)),
            ],
            diagnostics: vec![],
        };

        let sarif: serde_json::Value =
            serde_json::from_str(&generate_sarif_string(&ScanResult::new(vec![report])).unwrap()).unwrap();
        let run = &sarif["runs"][0];

        assert_eq!(run["tool"]["driver"]["rules"].as_array().unwrap().len(), 1);
        let results = run["results"].as_array().unwrap();
        assert_eq!(results.len(), 2);

        let location = &results[0]["locations"][0]["physicalLocation"];
        assert_eq!(location["artifactLocation"]["uri"], "src/App/App.csproj");
        assert_eq!(location["region"]["startLine"], 3);
        assert_eq!(location["region"]["startColumn"], 6);
        assert_eq!(results[0]["level"], "warning");
        assert!(results[1]["locations"][0]["physicalLocation"].get("region").is_none());
    }
}
