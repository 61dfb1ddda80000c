use crate::model::{Category, Finding, ProjectReport, ScanResult, Severity};
use anyhow::Result;
use tabled::{settings::Style, Table, Tabled};

#[derive(Tabled)]
struct PackageRow {
    #[tabled(rename = "Package")]
    id: String,
    #[tabled(rename = "Version")]
    version: String,
    #[tabled(rename = "Declared At")]
    location: String,
}

#[derive(Tabled)]
struct VulnRow {
    #[tabled(rename = "Severity")]
    severity: String,
    #[tabled(rename = "Package")]
    package: String,
    #[tabled(rename = "CVE")]
    cve: String,
    #[tabled(rename = "Score")]
    score: String,
    #[tabled(rename = "Description")]
    description: String,
}

pub fn print_cli_table(result: &ScanResult) -> Result<()> {
    println!();
    println!(
        "Scan completed at: {}",
        result.scan_time.format("%Y-%m-%d %H:%M:%S UTC")
    );

    if result.projects.is_empty() {
        println!();
        println!("No projects found.");
        return Ok(());
    }

    for project in &result.projects {
        print_project(project);
    }

    println!();
    print_summary(result);

    Ok(())
}

fn print_project(project: &ProjectReport) {
    println!();
    println!("{} ({})", project.name, project.manifest.display());

    for diagnostic in &project.diagnostics {
        let label = match diagnostic.category {
            Category::Error => "\x1b[31merror\x1b[0m",
            Category::Warning => "\x1b[33mwarning\x1b[0m",
        };
        match diagnostic.location {
            Some(location) => println!("  {label} ({location}): {}", diagnostic.message),
            None => println!("  {label}: {}", diagnostic.message),
        }
    }

    if project.packages.is_empty() {
        println!("  No packages found.");
        return;
    }

    println!("  Found {} packages:", project.packages.len());
    println!();

    let rows: Vec<PackageRow> = project
        .packages
        .iter()
        .map(|p| PackageRow {
            id: truncate(&p.id, 50),
            version: p.version.clone(),
            location: p
                .location
                .map(|l| format!("{}:{}", l.line, l.column))
                .unwrap_or_else(|| "-".to_string()),
        })
        .collect();

    let table = Table::new(rows).with(Style::rounded()).to_string();
    println!("{}", table);

    if project.findings.is_empty() {
        return;
    }

    println!();
    println!("  Found {} vulnerabilities:", project.findings.len());
    println!();

    let mut findings: Vec<&Finding> = project.findings.iter().collect();
    findings.sort_by_key(|f| f.severity.rank());

    let rows: Vec<VulnRow> = findings
        .iter()
        .map(|f| VulnRow {
            severity: format_severity(&f.severity),
            package: format!("{} {}", f.package_id, f.version),
            cve: f.vulnerability_id.clone(),
            score: format!("{:.1}", f.entry.score),
            description: truncate(f.entry.description.trim(), 50),
        })
        .collect();

    let table = Table::new(rows).with(Style::rounded()).to_string();
    println!("{}", table);
}

fn format_severity(severity: &Severity) -> String {
    match severity {
        Severity::Critical => "\x1b[31mCRITICAL\x1b[0m".to_string(),
        Severity::High => "\x1b[91mHIGH\x1b[0m".to_string(),
        Severity::Medium => "\x1b[33mMEDIUM\x1b[0m".to_string(),
        Severity::Low => "\x1b[32mLOW\x1b[0m".to_string(),
        Severity::Unknown => "UNKNOWN".to_string(),
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len - 3).collect();
        format!("{kept}...")
    }
}

fn print_summary(result: &ScanResult) {
    let failed = result
        .projects
        .iter()
        .filter(|p| p.diagnostics.iter().any(|d| d.category == Category::Error))
        .count();

    println!("Summary:");
    println!("  Projects: {}", result.projects.len());
    if failed > 0 {
        println!("  Failed projects: {}", failed);
    }
    println!("  Total packages: {}", result.package_count());

    let total = result.findings().count();
    if total == 0 {
        println!("  No known vulnerabilities found.");
    } else {
        println!("  Vulnerabilities: {}", severity_breakdown(result));
    }
}

fn severity_breakdown(result: &ScanResult) -> String {
    let count = |severity: Severity| result.findings().filter(|f| f.severity == severity).count();
    let mut breakdown = format!(
        "{} critical, {} high, {} medium, {} low",
        count(Severity::Critical),
        count(Severity::High),
        count(Severity::Medium),
        count(Severity::Low)
    );
    let unknown = count(Severity::Unknown);
    if unknown > 0 {
        breakdown.push_str(&format!(", {unknown} unknown"));
    }
    breakdown
}
