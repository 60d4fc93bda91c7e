pub mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use thiserror::Error;

use ripcast_core::ConfigBundle;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] ripcast_core::ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("browser error: {0}")]
    Browser(#[from] ripcast_core::browser::BrowserError),
    #[error("session error: {0}")]
    Session(#[from] ripcast_core::session::SessionError),
    #[error("proxy error: {0}")]
    Proxy(#[from] ripcast_core::proxy::ProxyError),
    #[error("transcode error: {0}")]
    Transcode(#[from] ripcast_core::transcode::TranscodeError),
    #[error("stream {0} never became ready")]
    StreamNotReady(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Ripcast command-line control interface", long_about = None)]
pub struct Cli {
    /// Directory holding ripcast.toml, browser.toml, proxy.toml, transcode.toml
    #[arg(long, default_value = "configs")]
    pub config_dir: PathBuf,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a capture session for a title and print its proxy identity
    Capture(commands::capture::CaptureArgs),
    /// Transcode a local file into HLS and supervise it until interrupted
    Run(commands::stream::RunArgs),
    /// Spawn an adaptive quality ladder for a local file
    Adaptive(commands::stream::AdaptiveArgs),
}

pub fn run(cli: Cli) -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let bundle = ConfigBundle::from_directory(&cli.config_dir)?;
        match cli.command {
            Commands::Capture(args) => commands::capture::execute(&bundle, cli.format, args).await,
            Commands::Run(args) => commands::stream::run(&bundle, cli.format, args).await,
            Commands::Adaptive(args) => {
                commands::stream::adaptive(&bundle, cli.format, args).await
            }
        }
    })
}
