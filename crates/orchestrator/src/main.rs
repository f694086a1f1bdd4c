/// Main analysis binary
use std::path::PathBuf;
use std::process::ExitCode;

use cbct_orchestrator::{AnalysisConfig, AnalysisPipeline, CancellationToken};
use tracing::{error, info};

fn print_usage(program: &str) {
    eprintln!("Usage: {program} <scan-file> [--config <yaml>] [--output <json>]");
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::fmt().with_env_filter("info").init();

    info!("CBCT Volume Extraction System v0.1.0");

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage(&args[0]);
        return ExitCode::FAILURE;
    }

    let mut scan_path: Option<PathBuf> = None;
    let mut config_path: Option<PathBuf> = None;
    let mut output_path: Option<PathBuf> = None;

    let mut iter = args[1..].iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => config_path = iter.next().map(PathBuf::from),
            "--output" => output_path = iter.next().map(PathBuf::from),
            _ => scan_path = Some(PathBuf::from(arg)),
        }
    }

    let Some(scan_path) = scan_path else {
        print_usage(&args[0]);
        return ExitCode::FAILURE;
    };

    if !scan_path.exists() {
        error!("File not found: {}", scan_path.display());
        return ExitCode::FAILURE;
    }

    let config = match config_path {
        Some(path) => match AnalysisConfig::from_yaml(&path) {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load config {}: {e}", path.display());
                return ExitCode::FAILURE;
            }
        },
        None => AnalysisConfig::default(),
    };

    let pipeline = AnalysisPipeline::new(config);
    let cancel = CancellationToken::new();

    let result = pipeline
        .run_with_progress(&scan_path, &cancel, |update| {
            info!("[{:>3}%] {}", update.percent, update.stage.name());
        })
        .await;

    match result {
        Ok(result) => {
            let json = match serde_json::to_string_pretty(&result) {
                Ok(json) => json,
                Err(e) => {
                    error!("Failed to serialize result: {e}");
                    return ExitCode::FAILURE;
                }
            };

            match output_path {
                Some(path) => {
                    if let Err(e) = std::fs::write(&path, &json) {
                        error!("Failed to write {}: {e}", path.display());
                        return ExitCode::FAILURE;
                    }
                    info!("Result written to {}", path.display());
                }
                None => println!("{json}"),
            }

            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Analysis failed: {e}");
            ExitCode::FAILURE
        }
    }
}
