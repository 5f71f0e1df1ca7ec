use clap::{Arg, Command};
use hoptrace::batch::{run_batch, OutputOptions};
use hoptrace::fetch::fetch_eml;
use hoptrace::Config;
use log::LevelFilter;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    let matches = Command::new("hoptrace")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Reconstruct the delivery path of an email from its Received headers")
        .long_about(
            "hoptrace reads the header block of one or more .eml files and rebuilds the\n\
             relay path the message took, origin first. Each hop is annotated with\n\
             transport security and, on the final hop, the SPF/DKIM/DMARC verdicts\n\
             recorded by the receiving server. Anomalies are reported as diagnostics.",
        )
        .arg(
            Arg::new("eml")
                .value_name("EML")
                .help("Message files to analyze")
                .num_args(0..)
                .action(clap::ArgAction::Append),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("hoptrace.yaml"),
        )
        .arg(
            Arg::new("output-dir")
                .short('o')
                .long("output-dir")
                .value_name("DIR")
                .help("Output directory (defaults to output.<file stem>)")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("fetch")
                .long("fetch")
                .value_name("URL")
                .help("Fetch the message from an http(s) or file:// URL")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .value_name("FILE")
                .help("Generate a default configuration file")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("geolocate")
                .long("geolocate")
                .help("Look up relay addresses with the configured geolocation service")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("stdout")
                .long("stdout")
                .help("Print the JSON report instead of writing files")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable debug logging of every parsed hop")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    let log_level = if matches.get_flag("verbose") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    if let Some(generate_path) = matches.get_one::<String>("generate-config") {
        generate_default_config(generate_path);
        return;
    }

    let config_path = matches
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or("hoptrace.yaml");
    let mut config = match Config::load_or_default(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e:#}");
            process::exit(1);
        }
    };
    if matches.get_flag("geolocate") {
        config.geolocation.enabled = true;
    }

    let mut sources: Vec<PathBuf> = matches
        .get_many::<String>("eml")
        .map(|values| values.map(PathBuf::from).collect())
        .unwrap_or_default();

    if let Some(url) = matches.get_one::<String>("fetch") {
        let download_dir = std::env::temp_dir().join("hoptrace-fetch");
        match fetch_eml(url, &download_dir).await {
            Ok(path) => sources.push(path),
            Err(e) => {
                eprintln!("Failed to fetch EML: {e:#}");
                process::exit(1);
            }
        }
    }

    if sources.is_empty() {
        eprintln!("No EML file provided. Use --help for usage information.");
        process::exit(1);
    }

    let options = OutputOptions {
        output_dir: matches.get_one::<String>("output-dir").map(PathBuf::from),
        stdout: matches.get_flag("stdout"),
    };

    let results = run_batch(sources, Arc::new(config), options).await;

    let mut failed = 0;
    for (source, result) in &results {
        match result {
            Ok(outcome) => {
                if let Some(json) = &outcome.report_json {
                    println!("{json}");
                    continue;
                }
                log::info!(
                    "{}: {} hops, {} unparsed, {} diagnostics",
                    source.display(),
                    outcome.hop_count,
                    outcome.unparsed_hops,
                    outcome.diagnostic_count
                );
                if let Some(dir) = &outcome.output_dir {
                    log::info!("Output directory: {}", dir.display());
                }
            }
            Err(e) => {
                eprintln!("Failed to analyze {}: {e:#}", source.display());
                failed += 1;
            }
        }
    }

    if failed > 0 {
        process::exit(1);
    }
}

fn generate_default_config(path: &str) {
    let config = Config::default();
    match config.to_file(path) {
        Ok(()) => {
            println!("Default configuration written to: {path}");
            println!("Please edit the configuration file to suit your needs.");
        }
        Err(e) => {
            eprintln!("Error writing configuration file: {e:#}");
            process::exit(1);
        }
    }
}
