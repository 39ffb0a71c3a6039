use clap::Parser;
use log::{error, info, warn};
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use replication_verifier::app::Verifier;
use replication_verifier::config::{ConfigSource, VerifierConfig, DEFAULT_CONFIG_PATH};
use replication_verifier::error::RunError;
use replication_verifier::report::{reporter_for, ReportFormat};
use replication_verifier::summary::RunReport;

#[derive(Parser, Debug)]
#[command(version)]
#[command(about = "Checks that objects written in one region become readable, byte for byte, in every other region", long_about = None)]
struct Args {
    /// YAML configuration file (verifier.yaml in the working directory by default)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Node registry file, overrides run.registry_path
    #[arg(short, long)]
    registry: Option<String>,

    /// Number of trials, overrides run.trial_count
    #[arg(short, long)]
    trials: Option<usize>,

    /// Report format: json or text
    #[arg(short, long)]
    format: Option<ReportFormat>,

    /// Write the report here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn init_logging(config_file: &str) {
    if Path::new(config_file).exists() {
        if let Err(e) = log4rs::init_file(config_file, Default::default()) {
            eprintln!("Failed to initialize logging from {}: {}", config_file, e);
        } else {
            return;
        }
    }
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).try_init();
}

/// Config file (or defaults) with command-line overrides applied. Runs before
/// logging is initialized, so it reports where the config came from instead of logging.
fn load_config(args: &Args) -> Result<(VerifierConfig, ConfigSource), RunError> {
    let (mut config, source) = match &args.config {
        Some(path) => VerifierConfig::load_or_defaults(path, true)?,
        None => VerifierConfig::load_or_defaults(DEFAULT_CONFIG_PATH, false)?,
    };
    if let Some(registry) = &args.registry {
        config.run.registry_path = registry.clone();
    }
    if let Some(trials) = args.trials {
        config.run.trial_count = Some(trials);
    }
    if let Some(format) = args.format {
        config.report.format = format;
    }
    if let Some(output) = &args.output {
        config.report.output = Some(output.to_string_lossy().to_string());
    }
    config.validate()?;
    Ok((config, source))
}

fn write_report(config: &VerifierConfig, report: &RunReport) -> Result<(), RunError> {
    match &config.report.output {
        Some(path) => {
            let file = File::create(path)?;
            reporter_for(config.report.format, io::BufWriter::new(file)).report(report)?;
            info!("Report written to {}", path);
        }
        None => {
            let stdout = io::stdout();
            let mut lock = stdout.lock();
            reporter_for(config.report.format, &mut lock).report(report)?;
            lock.flush()?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let (config, source) = match load_config(&args) {
        Ok(loaded) => loaded,
        Err(e) => {
            init_logging(&VerifierConfig::default().logging.config_file);
            error!("Invalid configuration: {}", e);
            return ExitCode::from(2);
        }
    };
    init_logging(&config.logging.config_file);
    match source {
        ConfigSource::File(path) => info!("Loaded configuration from {}", path.display()),
        ConfigSource::Defaults => warn!("Config file {} not found, using defaults", DEFAULT_CONFIG_PATH),
    }
    info!("Starting replication verifier");

    let verifier = match Verifier::from_config(config) {
        Ok(verifier) => verifier,
        Err(e) => {
            error!("Failed to load node registry: {}", e);
            return ExitCode::from(2);
        }
    };

    let report = match verifier.run().await {
        Ok(report) => report,
        Err(e) => {
            error!("Run aborted: {}", e);
            return ExitCode::from(2);
        }
    };

    if let Err(e) = write_report(&verifier.config, &report) {
        error!("Failed to write report: {}", e);
        return ExitCode::from(2);
    }

    let code = report.exit_code();
    if code != 0 {
        warn!("Replication is not consistent across all regions");
    }
    ExitCode::from(code as u8)
}
