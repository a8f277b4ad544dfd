use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use clap::Parser;
use frame_analysis::{AnalysisSettings, Frame, OpenAiReasoningClient, Orchestrator, SequenceOptions, TaskKind};
use resilience::{init_logging, LoggingConfig};
use tracing::info;

#[derive(Debug, Parser)]
#[command(
    name = "frame-analysis",
    version,
    about = "Analyze one image, or a sequence of images with accumulated context"
)]
struct Cli {
    /// Extra context passed to every task
    #[arg(long, default_value = "")]
    context: String,

    /// Comma separated task kinds (default: all)
    #[arg(long, value_delimiter = ',')]
    tasks: Vec<TaskKind>,

    /// Do not carry clues from earlier frames into later ones
    #[arg(long)]
    no_accumulate: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    /// Image files; two or more run a multi-frame session
    #[arg(required = true)]
    images: Vec<PathBuf>,
}

fn load_image(path: &PathBuf) -> Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok(STANDARD.encode(bytes))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    init_logging(LoggingConfig {
        level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        service_name: "frame-analysis".to_string(),
        json_format: cli.json_logs,
    });

    let settings = AnalysisSettings::from_env().context("invalid configuration")?;
    let client = OpenAiReasoningClient::new(settings.reasoning.clone(), settings.task_timeout)?;
    let orchestrator = Orchestrator::new(settings, Arc::new(client))?;

    let tasks = if cli.tasks.is_empty() {
        TaskKind::ALL.to_vec()
    } else {
        cli.tasks.clone()
    };

    let images = cli.images.iter().map(load_image).collect::<Result<Vec<_>>>()?;
    info!(images = images.len(), "Starting analysis");

    if images.len() == 1 {
        let report = orchestrator.analyze(&images[0], &cli.context, &tasks).await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        println!("\n{}", report.narrative);
    } else {
        let frames: Vec<Frame> = cli
            .images
            .iter()
            .zip(images)
            .map(|(path, image)| Frame::new(image).with_description(path.display().to_string()))
            .collect();

        let options = SequenceOptions {
            accumulate_context: !cli.no_accumulate,
            tasks,
            context: cli.context.clone(),
        };

        let report = orchestrator.analyze_sequence_with(&frames, options).await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        println!("\n{}", report.summary);
    }

    Ok(())
}
