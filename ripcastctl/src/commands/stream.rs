use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, ValueEnum};
use serde_json::json;
use tokio::time::{sleep, Instant};

use ripcast_core::transcode::{QualityTier, TranscodePipeline};
use ripcast_core::ConfigBundle;

use crate::{AppError, OutputFormat, Result};

const READY_LIMIT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum QualityArg {
    Low,
    Medium,
    High,
    Auto,
}

impl From<QualityArg> for QualityTier {
    fn from(quality: QualityArg) -> Self {
        match quality {
            QualityArg::Low => QualityTier::Low,
            QualityArg::Medium => QualityTier::Medium,
            QualityArg::High => QualityTier::High,
            QualityArg::Auto => QualityTier::Auto,
        }
    }
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Stream identifier; also names the output directory
    #[arg(long)]
    pub stream_id: String,
    /// Local media file to transcode
    #[arg(long)]
    pub input: PathBuf,
    #[arg(long, value_enum, default_value_t = QualityArg::Auto)]
    pub quality: QualityArg,
    #[arg(long)]
    pub segment_duration: Option<u32>,
    #[arg(long)]
    pub playlist_size: Option<u32>,
    /// Seek offset in seconds before encoding begins
    #[arg(long)]
    pub offset: Option<f64>,
    /// Public base URL the playlist will be served under
    #[arg(long, default_value = "http://127.0.0.1:8000/streams")]
    pub base_url: String,
}

#[derive(Args, Debug)]
pub struct AdaptiveArgs {
    #[arg(long)]
    pub stream_id: String,
    #[arg(long)]
    pub input: PathBuf,
    /// Quality tiers, lowest first
    #[arg(long, value_enum, value_delimiter = ',', default_values_t = [QualityArg::Low, QualityArg::Medium, QualityArg::High])]
    pub tiers: Vec<QualityArg>,
    #[arg(long, default_value = "http://127.0.0.1:8000/streams")]
    pub base_url: String,
}

pub async fn run(bundle: &ConfigBundle, format: OutputFormat, args: RunArgs) -> Result<()> {
    let pipeline = TranscodePipeline::new(&bundle.transcode, &bundle.ripcast.paths.streams_dir);

    let mut config = pipeline.default_stream_config();
    config.quality = args.quality.into();
    if let Some(segment_duration) = args.segment_duration {
        config.segment_duration = segment_duration;
    }
    if let Some(playlist_size) = args.playlist_size {
        config.playlist_size = playlist_size;
    }
    config.start_offset = args.offset;

    pipeline
        .start_stream(&args.stream_id, &args.input, config)
        .await?;
    wait_until_ready(&pipeline, &args.stream_id).await?;

    let url = pipeline.stream_url(&args.stream_id, &args.base_url).await?;
    announce(format, &args.stream_id, &url)?;

    tokio::signal::ctrl_c().await?;
    pipeline.stop_stream(&args.stream_id).await?;
    Ok(())
}

pub async fn adaptive(bundle: &ConfigBundle, format: OutputFormat, args: AdaptiveArgs) -> Result<()> {
    let pipeline = TranscodePipeline::new(&bundle.transcode, &bundle.ripcast.paths.streams_dir);
    let tiers: Vec<QualityTier> = args.tiers.iter().map(|tier| (*tier).into()).collect();

    pipeline
        .start_adaptive_stream(&args.stream_id, &args.input, &tiers)
        .await?;
    wait_until_ready(&pipeline, &args.stream_id).await?;

    let url = pipeline.stream_url(&args.stream_id, &args.base_url).await?;
    announce(format, &args.stream_id, &url)?;

    tokio::signal::ctrl_c().await?;
    pipeline.stop_stream(&args.stream_id).await?;
    Ok(())
}

async fn wait_until_ready(pipeline: &TranscodePipeline, stream_id: &str) -> Result<()> {
    let deadline = Instant::now() + READY_LIMIT;
    while Instant::now() < deadline {
        if pipeline.is_stream_ready(stream_id).await {
            return Ok(());
        }
        if let Some(info) = pipeline.stream_info(stream_id).await {
            if let Some(error) = info.error {
                eprintln!("encoder error: {error}");
                return Err(AppError::StreamNotReady(stream_id.to_string()));
            }
        }
        sleep(Duration::from_millis(200)).await;
    }
    Err(AppError::StreamNotReady(stream_id.to_string()))
}

fn announce(format: OutputFormat, stream_id: &str, url: &str) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let payload = json!({ "stream_id": stream_id, "url": url, "ready": true });
            println!("{}", serde_json::to_string_pretty(&payload)?);
        }
        OutputFormat::Text => {
            println!("stream {stream_id} ready at {url}");
            println!("press ctrl-c to stop");
        }
    }
    Ok(())
}
