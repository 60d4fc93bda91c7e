use std::sync::Arc;

use clap::{Args, ValueEnum};
use serde_json::json;

use ripcast_core::browser::BrowserEngine;
use ripcast_core::proxy::{ManifestService, RewriteRoutes, UpstreamFetcher};
use ripcast_core::session::{SessionRegistry, SourceKind};
use ripcast_core::ConfigBundle;

use crate::{OutputFormat, Result};

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum KindArg {
    Movie,
    Tv,
}

impl From<KindArg> for SourceKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Movie => SourceKind::Movie,
            KindArg::Tv => SourceKind::Tv,
        }
    }
}

#[derive(Args, Debug)]
pub struct CaptureArgs {
    /// Title kind the source URL is built from
    #[arg(long, value_enum)]
    pub kind: KindArg,
    /// Title identifier (e.g. an IMDb id)
    #[arg(long)]
    pub id: String,
    #[arg(long)]
    pub season: Option<u32>,
    #[arg(long)]
    pub episode: Option<u32>,
    /// Known manifest URL: registers the session without driving the browser
    #[arg(long)]
    pub manifest_url: Option<String>,
    /// Source page override for cache-created sessions
    #[arg(long)]
    pub source_url: Option<String>,
    /// Also fetch and print the rewritten playlist
    #[arg(long)]
    pub playlist: bool,
}

pub async fn execute(bundle: &ConfigBundle, format: OutputFormat, args: CaptureArgs) -> Result<()> {
    let engine = Arc::new(BrowserEngine::new(bundle.browser.clone())?);
    let registry = Arc::new(SessionRegistry::new(
        engine.clone(),
        bundle.browser.sources.clone(),
    ));

    let kind = SourceKind::from(args.kind);
    let session = match &args.manifest_url {
        Some(manifest_url) => {
            registry
                .create_from_cache(
                    manifest_url,
                    kind,
                    &args.id,
                    args.season,
                    args.episode,
                    args.source_url.clone(),
                )
                .await?
        }
        None => {
            registry
                .create_from_capture(kind, &args.id, args.season, args.episode)
                .await?
        }
    };

    match format {
        OutputFormat::Json => {
            let payload = json!({
                "session_id": session.id(),
                "source_url": session.source_url(),
                "manifest_url": session.manifest_url(),
                "browser_backed": session.has_page(),
            });
            println!("{}", serde_json::to_string_pretty(&payload)?);
        }
        OutputFormat::Text => {
            println!("session:  {}", session.id());
            println!("source:   {}", session.source_url());
            println!("manifest: {}", session.manifest_url());
        }
    }

    if args.playlist {
        let fetcher = Arc::new(UpstreamFetcher::new(&bundle.proxy.identity)?);
        let routes = RewriteRoutes::new(bundle.proxy.routes.segment_path.clone());
        let manifests = ManifestService::new(registry.clone(), fetcher, routes);
        let playlist = manifests.playlist(session.id()).await?;
        println!("{}", playlist.body);
    }

    engine.shutdown().await?;
    Ok(())
}
