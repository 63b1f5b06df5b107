//! mediascout - Media resource detector for web pages.
//!
//! CLI entry point.

use clap::Parser;
use mediascout::browser::ChromeInstall;
use mediascout::{Commands, Config, ScanConfig, ScanResult, Scanner, SetupConfig};
use std::fs;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let config = Config::parse();

    // Set up logging
    let filter = if config.verbose {
        EnvFilter::new("mediascout=debug,info")
    } else {
        EnvFilter::new("mediascout=info,warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    tokio::spawn(async {
        wait_for_signal().await;
        eprintln!("\nSignal received, stopping.");
        std::process::exit(130);
    });

    let outcome = match config.command.clone() {
        Commands::Scan(scan_config) => run_scan(scan_config, &config).await,
        Commands::Setup(setup_config) => run_setup(setup_config).await,
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => code,
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {},
                _ = sigint.recv() => {},
            }
        }
        _ => {
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

async fn run_scan(scan_config: ScanConfig, global_config: &Config) -> Result<(), ExitCode> {
    let targets = match scan_config.load_targets() {
        Ok(t) => t,
        Err(e) => {
            error!("Failed to load targets: {}", e);
            return Err(ExitCode::FAILURE);
        }
    };

    if targets.is_empty() {
        error!("No targets specified. Use positional arguments or -f <file>.");
        return Err(ExitCode::FAILURE);
    }

    let mut scanner = match Scanner::new(scan_config.clone(), global_config.verbose) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to create scanner: {}", e);
            return Err(ExitCode::FAILURE);
        }
    };

    if let Some(ref endpoint) = global_config.webhook {
        scanner = match scanner.with_webhook(endpoint) {
            Ok(s) => s,
            Err(e) => {
                error!("Failed to configure webhook: {}", e);
                return Err(ExitCode::FAILURE);
            }
        };
    }

    if !scan_config.json {
        print_banner();
    }

    let results = scanner.scan_multiple(targets).await;

    if scan_config.json || scan_config.output.is_some() {
        write_results(&scan_config, &results)?;
    }

    let total: usize = results.iter().map(|r| r.urls.len()).sum();
    if !scan_config.json {
        eprintln!(
            "\n{} media URL(s) found across {} target(s)",
            total,
            results.len()
        );
    }

    Ok(())
}

/// Print results as JSON, or write them to the output file.
fn write_results(scan_config: &ScanConfig, results: &[ScanResult]) -> Result<(), ExitCode> {
    let json = match serde_json::to_string_pretty(results) {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to serialize results: {}", e);
            return Err(ExitCode::FAILURE);
        }
    };

    match scan_config.output {
        Some(ref output_path) => {
            if let Err(e) = fs::write(output_path, &json) {
                error!("Failed to write output file: {}", e);
                return Err(ExitCode::FAILURE);
            }
            info!("Results written to: {:?}", output_path);
        }
        None => println!("{}", json),
    }

    Ok(())
}

async fn run_setup(setup_config: SetupConfig) -> Result<(), ExitCode> {
    eprintln!("Setting up Chromium browser...");
    let install = match ChromeInstall::managed() {
        Ok(install) => install,
        Err(e) => {
            error!("Setup failed: {}", e);
            return Err(ExitCode::FAILURE);
        }
    };
    match install.install(setup_config.force).await {
        Ok(path) => {
            eprintln!("Chromium ready at: {}", path.display());
            Ok(())
        }
        Err(e) => {
            error!("Setup failed: {}", e);
            Err(ExitCode::FAILURE)
        }
    }
}

fn print_banner() {
    println!();
    println!("\x1b[36m╔══════════════════════════════════════════════════════════════╗\x1b[0m");
    println!("\x1b[36m║                    MEDIASCOUT v0.1.0                         ║\x1b[0m");
    println!("\x1b[36m║            Media Resource Detector                           ║\x1b[0m");
    println!("\x1b[36m╚══════════════════════════════════════════════════════════════╝\x1b[0m");
    println!();
}
