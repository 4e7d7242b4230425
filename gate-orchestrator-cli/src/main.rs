//! Gate orchestrator command-line entry point
//!
//! Validates a scanned QR code or uploads capture evidence against the backends
//! configured in an `appsettings.json` (or `.toml`) file.
//!
//! Logs go to stderr (`RUST_LOG` overrides the level); results go to stdout as JSON.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use gate_orchestrator_backend::{
    CaptureRequest, GateApiClient, GateDirection, Settings, Snapshots, ValidateRequest,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "gate-orchestrator")]
#[command(author, version, about = "Gate QR validation and capture upload")]
struct Cli {
    /// Settings file (JSON, or TOML by extension)
    #[arg(
        short,
        long,
        env = "GATE_ORCHESTRATOR_CONFIG",
        default_value = "appsettings.json"
    )]
    config: PathBuf,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a scanned QR code
    Validate {
        /// Raw QR payload
        qr_code: String,

        /// Gate id (defaults to Gate.Id from the settings)
        #[arg(long)]
        gate: Option<String>,

        /// Lane direction, IN or OUT (defaults to Gate.Type)
        #[arg(long, value_parser = parse_direction)]
        direction: Option<GateDirection>,

        /// Operator on duty
        #[arg(long)]
        operator: Option<String>,
    },

    /// Upload capture images for a ticket
    Capture {
        /// Ticket id returned by validation
        ticket_id: String,

        /// Snapshots as camera=path/to/image.jpg
        #[arg(required = true, value_parser = parse_snapshot)]
        snapshots: Vec<(String, PathBuf)>,

        /// QR code used to pick the backend (defaults to the ticket id)
        #[arg(long)]
        qr: Option<String>,

        /// Gate id (defaults to Gate.Id from the settings)
        #[arg(long)]
        gate: Option<String>,

        /// Extra metadata as key=value
        #[arg(long = "meta", value_parser = parse_key_value)]
        metadata: Vec<(String, String)>,
    },

    /// List configured backends
    Backends,
}

fn parse_direction(s: &str) -> std::result::Result<GateDirection, String> {
    if s.eq_ignore_ascii_case("in") {
        Ok(GateDirection::In)
    } else if s.eq_ignore_ascii_case("out") {
        Ok(GateDirection::Out)
    } else {
        Err(format!("expected IN or OUT, got '{s}'"))
    }
}

fn parse_key_value(s: &str) -> std::result::Result<(String, String), String> {
    s.split_once('=')
        .filter(|(key, _)| !key.trim().is_empty())
        .map(|(key, value)| (key.trim().to_string(), value.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{s}'"))
}

fn parse_snapshot(s: &str) -> std::result::Result<(String, PathBuf), String> {
    parse_key_value(s).map(|(camera, path)| (camera, PathBuf::from(path)))
}

fn init_tracing(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false),
        )
        .with(EnvFilter::from_default_env().add_directive(level.into()))
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let settings = Settings::load(&cli.config)
        .with_context(|| format!("Failed to load settings from {}", cli.config.display()))?;
    let client = GateApiClient::from_settings(&settings).context("Invalid backend configuration")?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling in-flight requests");
            on_signal.cancel();
        }
    });

    match cli.command {
        Commands::Validate {
            qr_code,
            gate,
            direction,
            operator,
        } => {
            let mut request =
                ValidateRequest::new(qr_code, gate.unwrap_or_else(|| settings.gate.id.clone()))
                    .with_direction(direction.unwrap_or(settings.gate.direction));
            if let Some(operator) = operator {
                request = request.with_operator(operator);
            }

            let result = client.validate(&request, &cancel).await;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(if result.success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::Capture {
            ticket_id,
            snapshots,
            qr,
            gate,
            metadata,
        } => {
            let mut images = Snapshots::new();
            for (camera, path) in snapshots {
                let bytes = tokio::fs::read(&path)
                    .await
                    .with_context(|| format!("Failed to read snapshot {}", path.display()))?;
                images.insert(camera, bytes);
            }

            let mut request = CaptureRequest::new(
                ticket_id,
                gate.unwrap_or_else(|| settings.gate.id.clone()),
                images,
            );
            if !metadata.is_empty() {
                request = request.with_metadata(metadata.into_iter().collect());
            }
            if let Some(qr) = qr {
                request = request.with_qr_code(qr);
            }

            if client.send_capture(&request, &cancel).await {
                println!("Capture uploaded for ticket {}", request.ticket_id);
                Ok(ExitCode::SUCCESS)
            } else {
                bail!("Capture upload for ticket {} failed", request.ticket_id)
            }
        }
        Commands::Backends => {
            for backend in client.registry().iter() {
                let config = backend.config();
                println!(
                    "{:<12} {:<8} {:?} {}",
                    config.name,
                    config.dialect.to_string(),
                    config.capture_format,
                    config.base_url
                );
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
