use crate::model::ScanResult;
use anyhow::Result;

pub fn print_json(result: &ScanResult) -> Result<()> {
    println!("{}", generate_json_string(result)?);
    Ok(())
}

pub fn generate_json_string(result: &ScanResult) -> Result<String> {
    Ok(serde_json::to_string_pretty(result)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Package, ProjectReport, SourceLocation};
    use std::path::PathBuf;

    #[test]
    fn test_json_shape() {
        let report = ProjectReport {
            name: "App".to_string(),
            manifest: PathBuf::from("App.csproj"),
            packages: vec![Package::new("jQuery", "1.9.0").with_location(SourceLocation::new(4, 6))],
            findings: vec![],
            diagnostics: vec![],
        };
        let json: serde_json::Value =
            serde_json::from_str(&generate_json_string(&ScanResult::new(vec![report])).unwrap()).unwrap();

        let project = &json["projects"][0];
        assert_eq!(project["name"], "App");
        assert_eq!(project["packages"][0]["id"], "jQuery");
        assert!(project.get("diagnostics").is_none());
        assert!(json.get("scan_time").is_some());
    }
}
