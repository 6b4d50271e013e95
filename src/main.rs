//! CLI entry point for Traffic Detective.
//!
//! Serves the analysis API, runs one-off analyses of local CSV files,
//! checks the insight service, and generates synthetic traffic data.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};
use traffic_detective::{
    build_pipeline,
    generate::{GeneratorConfig, Scenario, generate, write_csv},
    infra::langflow::LangflowConfig,
    output::{print_summary, write_json, write_records},
    serve,
    services::insight_api::HealthStatus,
};

#[derive(Parser)]
#[command(name = "traffic_detective")]
#[command(about = "Detects anomalies in hourly traffic sensor data", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API
    Serve {
        /// Bind address
        #[arg(long, default_value = "0.0.0.0:8000")]
        bind: String,
    },
    /// Analyze a local traffic CSV
    Analyze {
        /// Path to the CSV file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Write the full JSON result here
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Write the cleaned records as CSV here
        #[arg(long)]
        cleaned: Option<PathBuf>,
    },
    /// Check the insight service
    Health,
    /// Generate a synthetic traffic CSV
    Generate {
        /// Destination CSV file
        #[arg(short, long, default_value = "sample_data.csv")]
        output: PathBuf,

        /// Preset overriding --days and --anomaly-rate
        #[arg(long, value_enum)]
        scenario: Option<Scenario>,

        /// First day (YYYY-MM-DD)
        #[arg(long, default_value = "2024-01-22")]
        start: NaiveDate,

        /// Number of days
        #[arg(short, long, default_value_t = 7)]
        days: u32,

        /// Comma-separated location IDs
        #[arg(short, long, value_delimiter = ',', default_value = "LOC_01,LOC_02,LOC_03")]
        locations: Vec<String>,

        /// Probability that a row is disturbed
        #[arg(short = 'r', long, default_value_t = 0.08)]
        anomaly_rate: f64,

        /// RNG seed
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path = std::env::var("LOG_FILE_PATH")
        .unwrap_or_else(|_| "logs/traffic_detective.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("traffic_detective.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { bind } => {
            let config = LangflowConfig::from_env()?;
            serve(&bind, &config).await?;
        }
        Commands::Analyze {
            file,
            output,
            cleaned,
        } => {
            let config = LangflowConfig::from_env()?;
            let pipeline = build_pipeline(&config)?;

            let bytes = std::fs::read(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let payload = pipeline.run(&bytes).await?;
            print_summary(&payload);

            if let Some(path) = output {
                write_json(&path, &payload)?;
                info!(path = %path.display(), "JSON result written");
            }
            if let Some(path) = cleaned {
                write_records(&path, &payload.processed_data.raw_data)?;
                info!(path = %path.display(), "Cleaned records written");
            }
        }
        Commands::Health => {
            let config = LangflowConfig::from_env()?;
            let pipeline = build_pipeline(&config)?;
            let status = pipeline.insight().health().await;

            match status {
                HealthStatus::Healthy | HealthStatus::MockMode => {
                    info!(status = ?status, url = %config.api_url, "Insight service status")
                }
                HealthStatus::Unhealthy | HealthStatus::Unreachable => {
                    warn!(status = ?status, url = %config.health_url(), "Insight service status")
                }
            }
        }
        Commands::Generate {
            output,
            scenario,
            start,
            days,
            locations,
            anomaly_rate,
            seed,
        } => {
            let mut config = match scenario {
                Some(scenario) => GeneratorConfig::for_scenario(scenario),
                None => GeneratorConfig {
                    days,
                    anomaly_rate,
                    ..GeneratorConfig::default()
                },
            };
            config.start = start;
            config.locations = locations;
            config.seed = seed;

            let rows = generate(&config);
            write_csv(&output, &rows)?;
        }
    }

    Ok(())
}
