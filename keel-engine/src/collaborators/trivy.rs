use async_trait::async_trait;
use keel_core::{KeelError, Result};
use serde::Deserialize;
use std::collections::BTreeMap;

use super::{CommandRunner, Invocation, ScanReport, Severity, VulnerabilityScanner};
use crate::context::StepContext;

/// `trivy fs` for workspace paths, `trivy image` otherwise
pub struct TrivyScanner {
    runner: CommandRunner,
}

impl TrivyScanner {
    pub fn new(runner: CommandRunner) -> Self {
        Self { runner }
    }
}

#[derive(Debug, Deserialize)]
struct TrivyReport {
    #[serde(rename = "Results", default)]
    results: Vec<TrivyResult>,
}

#[derive(Debug, Deserialize)]
struct TrivyResult {
    #[serde(rename = "Vulnerabilities", default)]
    vulnerabilities: Option<Vec<TrivyVulnerability>>,
}

#[derive(Debug, Deserialize)]
struct TrivyVulnerability {
    #[serde(rename = "Severity")]
    severity: String,
}

/// Counts findings per severity in a `--format json` report
pub fn parse_trivy_report(json: &str) -> Result<BTreeMap<Severity, u32>> {
    let report: TrivyReport = serde_json::from_str(json)
        .map_err(|e| KeelError::execution(format!("invalid trivy report: {}", e)))?;

    let mut findings = BTreeMap::new();
    for vulnerability in report
        .results
        .iter()
        .flat_map(|r| r.vulnerabilities.iter().flatten())
    {
        let severity = vulnerability
            .severity
            .parse()
            .unwrap_or(Severity::Unknown);
        *findings.entry(severity).or_insert(0) += 1;
    }
    Ok(findings)
}

#[async_trait]
impl VulnerabilityScanner for TrivyScanner {
    async fn scan(&self, ctx: &StepContext<'_>, target: &str) -> Result<ScanReport> {
        let workspace = self.runner.workspace();
        let mode = if tokio::fs::metadata(workspace.join(target)).await.is_ok() {
            "fs"
        } else {
            "image"
        };

        let reports = workspace.join(".keel").join("reports");
        tokio::fs::create_dir_all(&reports)
            .await
            .map_err(|e| KeelError::execution(format!("cannot create {}: {}", reports.display(), e)))?;
        let report = reports.join(format!("trivy-{}-{}.json", ctx.run.number, ctx.step.name));

        self.runner
            .run(
                ctx,
                Invocation::new("trivy")
                    .args([mode, "--quiet", "--format", "json", "--output"])
                    .arg(report.display().to_string())
                    .arg(target),
            )
            .await?;

        let json = tokio::fs::read_to_string(&report)
            .await
            .map_err(|e| KeelError::execution(format!("cannot read {}: {}", report.display(), e)))?;

        Ok(ScanReport {
            report: report.display().to_string(),
            findings: parse_trivy_report(&json)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_trivy_report() {
        let json = r#"{
            "SchemaVersion": 2,
            "ArtifactName": "docker.io/acme/petclinic:12",
            "Results": [
                { "Target": "app.jar", "Vulnerabilities": [
                    { "VulnerabilityID": "CVE-1", "Severity": "HIGH" },
                    { "VulnerabilityID": "CVE-2", "Severity": "CRITICAL" },
                    { "VulnerabilityID": "CVE-3", "Severity": "HIGH" }
                ]},
                { "Target": "os", "Vulnerabilities": null },
                { "Target": "config" }
            ]
        }"#;

        let findings = parse_trivy_report(json).unwrap();
        assert_eq!(findings.get(&Severity::High), Some(&2));
        assert_eq!(findings.get(&Severity::Critical), Some(&1));
        assert_eq!(findings.get(&Severity::Low), None);
    }

    #[test]
    fn test_clean_report() {
        let findings = parse_trivy_report(r#"{ "Results": [] }"#).unwrap();
        assert!(findings.is_empty());
        assert!(parse_trivy_report("not json").is_err());
    }
}
