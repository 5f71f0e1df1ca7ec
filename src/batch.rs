//! Per-message pipeline and parallel processing of several messages.
//!
//! Every message is independent: its analysis runs on a blocking worker,
//! geolocation (if enabled) on the async runtime, and its artifacts land in
//! a directory of its own.

use crate::analyzer::{Analysis, HopAnalyzer};
use crate::config::Config;
use crate::geolocate::{GeoLocation, GeoLocator};
use crate::graph::render_dot;
use crate::map::render_geojson;
use crate::report::{AnalysisReport, Artifacts, GRAPH_FILE, MAP_FILE, REPORT_FILE};
use anyhow::Context;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct OutputOptions {
    /// Explicit output directory; with several messages each one gets a
    /// sub-directory named after its file stem.
    pub output_dir: Option<PathBuf>,
    /// Return the JSON report instead of writing any file.
    pub stdout: bool,
}

#[derive(Debug)]
pub struct MessageOutcome {
    pub source: PathBuf,
    pub hop_count: usize,
    pub unparsed_hops: usize,
    pub diagnostic_count: usize,
    pub output_dir: Option<PathBuf>,
    pub report_json: Option<String>,
}

fn file_stem(source: &Path) -> String {
    source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "message".to_string())
}

/// `output.<stem>` next to the working directory unless overridden.
pub fn output_dir_for(source: &Path, options: &OutputOptions, batch: bool) -> PathBuf {
    let stem = file_stem(source);
    match &options.output_dir {
        Some(dir) if batch => dir.join(stem),
        Some(dir) => dir.clone(),
        None => PathBuf::from(format!("output.{}", stem)),
    }
}

/// Read and analyze one file on a blocking worker.
pub async fn analyze_file(path: PathBuf, config: Arc<Config>) -> anyhow::Result<Analysis> {
    tokio::task::spawn_blocking(move || -> anyhow::Result<Analysis> {
        let bytes =
            std::fs::read(&path).with_context(|| format!("Failed to read {}", path.display()))?;
        // Header bytes outside UTF-8 are replaced rather than rejected
        let source = String::from_utf8_lossy(&bytes);
        log::info!("Analyzing {}", path.display());
        Ok(HopAnalyzer::new(&config.analysis).analyze(&source))
    })
    .await
    .context("Analysis worker panicked")?
}

async fn locate(config: &Config, analysis: &Analysis) -> anyhow::Result<BTreeMap<usize, GeoLocation>> {
    if !config.geolocation.enabled {
        return Ok(BTreeMap::new());
    }
    let locator = GeoLocator::new(&config.geolocation)?;
    Ok(locator.locate_path(&analysis.path).await)
}

/// Analyze one message and write its artifacts.
pub async fn process_message(
    source: PathBuf,
    config: Arc<Config>,
    options: OutputOptions,
    batch: bool,
) -> anyhow::Result<MessageOutcome> {
    let analysis = analyze_file(source.clone(), config.clone()).await?;
    let locations = locate(&config, &analysis).await?;

    let mut outcome = MessageOutcome {
        source: source.clone(),
        hop_count: analysis.path.len(),
        unparsed_hops: analysis.path.unparsed_hops,
        diagnostic_count: analysis.diagnostics.len(),
        output_dir: None,
        report_json: None,
    };

    if options.stdout {
        let artifacts = Artifacts::default();
        let report = AnalysisReport::new(Some(&source), &analysis, &locations, &artifacts);
        outcome.report_json = Some(report.to_json()?);
        return Ok(outcome);
    }

    let dir = output_dir_for(&source, &options, batch);
    tokio::fs::create_dir_all(&dir)
        .await
        .with_context(|| format!("Failed to create output directory {}", dir.display()))?;

    let mut artifacts = Artifacts::default();
    if config.output.write_graph {
        let graph_path = dir.join(GRAPH_FILE);
        tokio::fs::write(&graph_path, render_dot(&analysis.path))
            .await
            .with_context(|| format!("Failed to write {}", graph_path.display()))?;
        log::info!("Graph: {}", graph_path.display());
        artifacts.graph = Some(graph_path);
    }
    if config.output.write_map {
        if let Some(map) = render_geojson(&analysis.path, &locations) {
            let map_path = dir.join(MAP_FILE);
            tokio::fs::write(&map_path, serde_json::to_string_pretty(&map)?)
                .await
                .with_context(|| format!("Failed to write {}", map_path.display()))?;
            log::info!("Map: {}", map_path.display());
            artifacts.map = Some(map_path);
        }
    }
    if config.output.write_json {
        AnalysisReport::new(Some(&source), &analysis, &locations, &artifacts)
            .write_to(&dir.join(REPORT_FILE))
            .await?;
    }

    outcome.output_dir = Some(dir);
    Ok(outcome)
}

/// Process every message concurrently. Results keep the input order and a
/// failing message does not affect the others.
pub async fn run_batch(
    sources: Vec<PathBuf>,
    config: Arc<Config>,
    options: OutputOptions,
) -> Vec<(PathBuf, anyhow::Result<MessageOutcome>)> {
    let batch = sources.len() > 1;
    let handles: Vec<_> = sources
        .into_iter()
        .map(|source| {
            let config = config.clone();
            let options = options.clone();
            let task_source = source.clone();
            (
                source,
                tokio::spawn(process_message(task_source, config, options, batch)),
            )
        })
        .collect();

    let mut results = Vec::with_capacity(handles.len());
    for (source, handle) in handles {
        let result = match handle.await {
            Ok(result) => result,
            Err(e) => Err(anyhow::anyhow!("Worker for {} failed: {}", source.display(), e)),
        };
        if let Err(e) = &result {
            log::warn!("{}: {:#}", source.display(), e);
        }
        results.push((source, result));
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    const MESSAGE: &str = "Received: from b (b [198.51.100.2]) by c with ESMTPS; Mon, 1 Jan 2024 10:00:01 +0000\n\
        Received: from a (a [198.51.100.1]) by b with SMTP; Mon, 1 Jan 2024 10:00:00 +0000\n\
        Subject: batch\n\nbody\n";

    #[test]
    fn test_output_dir_for() {
        let options = OutputOptions::default();
        assert_eq!(
            output_dir_for(Path::new("mail/one.eml"), &options, false),
            PathBuf::from("output.one")
        );
        let options = OutputOptions {
            output_dir: Some(PathBuf::from("out")),
            stdout: false,
        };
        assert_eq!(
            output_dir_for(Path::new("one.eml"), &options, false),
            PathBuf::from("out")
        );
        assert_eq!(
            output_dir_for(Path::new("one.eml"), &options, true),
            PathBuf::from("out/one")
        );
    }

    #[tokio::test]
    async fn test_batch_writes_artifacts_per_message() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first.eml");
        let second = dir.path().join("second.eml");
        std::fs::write(&first, MESSAGE).unwrap();
        std::fs::write(&second, MESSAGE).unwrap();
        let missing = dir.path().join("missing.eml");

        let options = OutputOptions {
            output_dir: Some(dir.path().join("out")),
            stdout: false,
        };
        let results = run_batch(
            vec![first.clone(), missing.clone(), second.clone()],
            Arc::new(Config::default()),
            options,
        )
        .await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].0, first);
        assert!(results[1].1.is_err());

        let outcome = results[2].1.as_ref().unwrap();
        assert_eq!(outcome.hop_count, 2);
        let out = dir.path().join("out").join("second");
        assert_eq!(outcome.output_dir.as_deref(), Some(out.as_path()));
        assert!(out.join(REPORT_FILE).exists());
        assert!(out.join(GRAPH_FILE).exists());
        // No geolocation, so no map
        assert!(!out.join(MAP_FILE).exists());
    }

    #[tokio::test]
    async fn test_stdout_mode_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("only.eml");
        std::fs::write(&source, MESSAGE).unwrap();

        let options = OutputOptions {
            output_dir: Some(dir.path().join("out")),
            stdout: true,
        };
        let outcome = process_message(source, Arc::new(Config::default()), options, false)
            .await
            .unwrap();

        let json = outcome.report_json.unwrap();
        assert!(json.contains("\"subject\": \"batch\""));
        assert!(outcome.output_dir.is_none());
        assert!(!dir.path().join("out").exists());
    }
}
