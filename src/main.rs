//! PDF upload gateway CLI.
//!
//! Serves the upload endpoint, or scans a single local file with `--scan`.

use anyhow::{Context, Result};
use clap::Parser;
use pdf_upload_gateway::{CmsForwarder, Config, GatewayServer, UploadGateway};
use serde_json::json;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Upload gateway that rejects risky PDFs before they reach the CMS.
#[derive(Parser, Debug)]
#[command(name = "pdf-upload-gateway")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file.
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Override the listen address from the configuration.
    #[arg(short, long)]
    listen: Option<String>,

    /// Print example configuration and exit.
    #[arg(long)]
    example_config: bool,

    /// Validate configuration and exit.
    #[arg(long)]
    validate: bool,

    /// Scan a local file, print the verdict as JSON and exit (2 when rejected).
    #[arg(long, value_name = "FILE")]
    scan: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    if args.example_config {
        println!("{}", Config::example());
        return Ok(ExitCode::SUCCESS);
    }

    if let Some(path) = &args.scan {
        return scan_file(path);
    }

    let mut config = Config::load(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;
    if let Some(listen) = args.listen {
        config.server.listen = listen;
        config.validate()?;
    }

    if args.validate {
        info!("Configuration is valid");
        return Ok(ExitCode::SUCCESS);
    }

    info!(
        config = %args.config.display(),
        listen = %config.server.listen,
        "Starting PDF upload gateway"
    );

    let forwarder = CmsForwarder::new(&config.downstream, &config.upload.field_name)?;
    let gateway = Arc::new(UploadGateway::new(config, Arc::new(forwarder)));

    GatewayServer::bind(gateway)
        .await?
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    Ok(ExitCode::SUCCESS)
}

fn scan_file(path: &std::path::Path) -> Result<ExitCode> {
    let data = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let report = pdf_upload_gateway::inspect(&data);

    let output = json!({
        "file": path.display().to_string(),
        "size": data.len(),
        "verdict": report.verdict,
        "markers": report.markers(),
        "findings": report.findings,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(if report.verdict.is_allowed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    })
}
