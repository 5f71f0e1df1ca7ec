use crate::analyzer::Analysis;
use crate::diagnostics::Diagnostic;
use crate::geolocate::GeoLocation;
use crate::message_summary::MessageSummary;
use crate::security::{AnnotatedHop, AuthResult, AuthVerdicts};
use anyhow::Context;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// File names used inside an output directory.
pub const REPORT_FILE: &str = "report.json";
pub const GRAPH_FILE: &str = "hops_diagram.dot";
pub const MAP_FILE: &str = "hops_map.geojson";

#[derive(Debug, Clone, Default, Serialize)]
pub struct Artifacts {
    pub graph: Option<PathBuf>,
    pub map: Option<PathBuf>,
}

/// The single document handed to readers of an analysis.
#[derive(Debug, Serialize)]
pub struct AnalysisReport<'a> {
    pub filename: Option<String>,
    pub filepath: Option<String>,
    pub generated_at: String,
    pub summary: &'a MessageSummary,
    pub hop_count: usize,
    pub unparsed_hops: usize,
    pub hops: Vec<ReportHop<'a>>,
    pub path_verdicts: &'a AuthVerdicts,
    pub last_hop_verdicts: AuthVerdicts,
    pub auth_results: &'a [AuthResult],
    pub diagnostics: &'a [Diagnostic],
    pub artifacts: &'a Artifacts,
}

#[derive(Debug, Serialize)]
pub struct ReportHop<'a> {
    #[serde(flatten)]
    pub hop: &'a AnnotatedHop,
    pub geo: Option<&'a GeoLocation>,
}

impl<'a> AnalysisReport<'a> {
    pub fn new(
        source: Option<&Path>,
        analysis: &'a Analysis,
        locations: &'a BTreeMap<usize, GeoLocation>,
        artifacts: &'a Artifacts,
    ) -> Self {
        let path = &analysis.path;
        Self {
            filename: source
                .and_then(|p| p.file_name())
                .map(|name| name.to_string_lossy().into_owned()),
            filepath: source.map(|p| p.display().to_string()),
            generated_at: chrono::Utc::now().to_rfc3339(),
            summary: &analysis.summary,
            hop_count: path.len(),
            unparsed_hops: path.unparsed_hops,
            hops: path
                .hops
                .iter()
                .map(|hop| ReportHop {
                    hop,
                    geo: locations.get(&hop.index),
                })
                .collect(),
            path_verdicts: &path.path_verdicts,
            last_hop_verdicts: path.last_hop_verdicts(),
            auth_results: &path.auth_results,
            diagnostics: &analysis.diagnostics,
            artifacts,
        }
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize report")
    }

    pub async fn write_to(&self, path: &Path) -> anyhow::Result<()> {
        tokio::fs::write(path, self.to_json()?)
            .await
            .with_context(|| format!("Failed to write report {}", path.display()))?;
        log::info!("JSON report: {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::HopAnalyzer;

    const SOURCE: &str = "Received: from b by c with ESMTPS; Mon, 1 Jan 2024 10:00:01 +0000\n\
        Received:\n\
        Received: from a by b with SMTP; Mon, 1 Jan 2024 10:00:00 +0000\n\
        Authentication-Results: c; spf=pass; dkim=fail\n\
        Subject: report test\n\n";

    #[test]
    fn test_report_document() {
        let analysis = HopAnalyzer::default().analyze(SOURCE);
        let locations = BTreeMap::new();
        let artifacts = Artifacts {
            graph: Some(PathBuf::from("out/hops_diagram.dot")),
            map: None,
        };
        let report = AnalysisReport::new(
            Some(Path::new("mail/test.eml")),
            &analysis,
            &locations,
            &artifacts,
        );
        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();

        assert_eq!(json["filename"], "test.eml");
        assert_eq!(json["summary"]["subject"], "report test");
        assert_eq!(json["hop_count"], 2);
        assert_eq!(json["unparsed_hops"], 1);
        assert_eq!(json["hops"][0]["from_host"], "a");
        assert_eq!(json["hops"][1]["tls_used"], true);
        assert!(json["hops"][0]["geo"].is_null());
        assert_eq!(json["last_hop_verdicts"]["dkim"], "fail");
        assert_eq!(json["diagnostics"][0]["kind"], "hop_parse_failure");
        assert_eq!(json["artifacts"]["graph"], "out/hops_diagram.dot");
    }

    #[tokio::test]
    async fn test_write_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join(REPORT_FILE);
        let analysis = HopAnalyzer::default().analyze(SOURCE);
        let locations = BTreeMap::new();
        let artifacts = Artifacts::default();

        AnalysisReport::new(None, &analysis, &locations, &artifacts)
            .write_to(&target)
            .await
            .unwrap();

        let written = std::fs::read_to_string(&target).unwrap();
        assert!(written.contains("\"hop_count\": 2"));
    }
}
