mod error;
mod types;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::config::TranscodeConfig;

pub use error::{TranscodeError, TranscodeResult};
pub use types::{
    QualityTier, StreamConfig, StreamInfo, StreamStatus, MASTER_PLAYLIST_NAME,
    MEDIA_PLAYLIST_NAME, SEGMENT_FILE_TEMPLATE,
};

/// Converts local files into disk-backed segmented HLS, one supervised
/// encoder process per active stream id.
#[derive(Debug)]
pub struct TranscodePipeline {
    ffmpeg: PathBuf,
    log_level: String,
    root: PathBuf,
    segment_duration: u32,
    playlist_size: u32,
    stop_grace: Duration,
    readiness_poll: Duration,
    streams: AsyncMutex<HashMap<String, Arc<StreamSlot>>>,
}

#[derive(Debug)]
struct StreamSlot {
    id: String,
    state: AsyncMutex<StreamState>,
}

#[derive(Debug)]
struct StreamState {
    status: StreamStatus,
    error: Option<String>,
    dir: PathBuf,
    playlist_name: &'static str,
    variants: Vec<String>,
    child: Option<Child>,
    monitor: Option<JoinHandle<()>>,
    finished_at: Option<DateTime<Utc>>,
}

impl StreamState {
    fn new(dir: PathBuf) -> Self {
        Self {
            status: StreamStatus::Starting,
            error: None,
            dir,
            playlist_name: MEDIA_PLAYLIST_NAME,
            variants: Vec::new(),
            child: None,
            monitor: None,
            finished_at: None,
        }
    }

    fn info(&self, id: &str) -> StreamInfo {
        StreamInfo {
            id: id.to_string(),
            status: self.status,
            dir: self.dir.clone(),
            playlist: self.dir.join(self.playlist_name),
            error: self.error.clone(),
        }
    }
}

impl TranscodePipeline {
    pub fn new(config: &TranscodeConfig, streams_root: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: PathBuf::from(&config.ffmpeg.binary),
            log_level: config.ffmpeg.log_level.clone(),
            root: streams_root.into(),
            segment_duration: config.hls.segment_duration,
            playlist_size: config.hls.playlist_size,
            stop_grace: Duration::from_secs(config.limits.stop_grace_seconds),
            readiness_poll: Duration::from_millis(config.limits.readiness_poll_ms),
            streams: AsyncMutex::new(HashMap::new()),
        }
    }

    pub fn default_stream_config(&self) -> StreamConfig {
        StreamConfig {
            segment_duration: self.segment_duration,
            playlist_size: self.playlist_size,
            ..StreamConfig::default()
        }
    }

    /// Starts (or returns) the stream for `stream_id`. A live instance is
    /// returned unchanged; a dead one is fully torn down before the fresh
    /// encoder spawns. Restart requests for the same id sequence behind the
    /// teardown through the slot's state lock.
    pub async fn start_stream(
        &self,
        stream_id: &str,
        input: &Path,
        config: StreamConfig,
    ) -> TranscodeResult<StreamInfo> {
        let slot = self.slot(stream_id).await;
        let mut state = slot.state.lock().await;

        if state.child.is_some()
            && matches!(state.status, StreamStatus::Starting | StreamStatus::Running)
        {
            debug!(stream = %stream_id, "encoder already live, returning as-is");
            return Ok(state.info(&slot.id));
        }

        self.teardown_locked(&mut state).await;

        let dir = self.root.join(stream_id);
        if dir.exists() {
            if let Err(source) = tokio::fs::remove_dir_all(&dir).await {
                return Err(TranscodeError::Io { source, path: dir });
            }
        }
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| TranscodeError::Io {
                source,
                path: dir.clone(),
            })?;

        state.dir = dir.clone();
        state.playlist_name = MEDIA_PLAYLIST_NAME;
        state.variants.clear();
        state.error = None;
        state.finished_at = None;

        let args = encoder_args(input, &dir, &config, &self.log_level);
        let mut command = Command::new(&self.ffmpeg);
        command
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        info!(
            stream = %stream_id,
            input = %input.display(),
            quality = config.quality.name(),
            "spawning encoder"
        );
        match command.spawn() {
            Ok(child) => {
                state.status = StreamStatus::Starting;
                state.child = Some(child);
                state.monitor = Some(tokio::spawn(supervise(
                    Arc::clone(&slot),
                    self.readiness_poll,
                )));
                Ok(state.info(&slot.id))
            }
            Err(source) => {
                state.status = StreamStatus::Error;
                state.error = Some(format!("encoder spawn failed: {source}"));
                state.finished_at = Some(Utc::now());
                warn!(stream = %stream_id, error = %source, "encoder spawn failed");
                Err(TranscodeError::Spawn {
                    id: stream_id.to_string(),
                    source,
                })
            }
        }
    }

    /// Graceful quit on the encoder's stdin, bounded grace wait, then a hard
    /// kill. Stopping an adaptive parent stops every variant first.
    pub async fn stop_stream(&self, stream_id: &str) -> TranscodeResult<StreamInfo> {
        let variants = {
            let slot = self
                .lookup(stream_id)
                .await
                .ok_or_else(|| TranscodeError::UnknownStream(stream_id.to_string()))?;
            let state = slot.state.lock().await;
            state.variants.clone()
        };
        for variant_id in &variants {
            if let Err(err) = self.stop_plain(variant_id).await {
                warn!(stream = %variant_id, error = %err, "variant stop failed");
            }
        }
        self.stop_plain(stream_id).await
    }

    async fn stop_plain(&self, stream_id: &str) -> TranscodeResult<StreamInfo> {
        let slot = self
            .lookup(stream_id)
            .await
            .ok_or_else(|| TranscodeError::UnknownStream(stream_id.to_string()))?;
        let mut state = slot.state.lock().await;
        self.teardown_locked(&mut state).await;
        state.status = StreamStatus::Stopped;
        state.finished_at = Some(Utc::now());
        info!(stream = %stream_id, "stream stopped");
        Ok(state.info(&slot.id))
    }

    /// One pipeline per named tier plus a synthesized master playlist, so a
    /// player can switch tiers without renegotiating.
    pub async fn start_adaptive_stream(
        &self,
        stream_id: &str,
        input: &Path,
        tiers: &[QualityTier],
    ) -> TranscodeResult<StreamInfo> {
        if tiers.is_empty() {
            return Err(TranscodeError::EmptyLadder);
        }

        let mut variant_ids = Vec::with_capacity(tiers.len());
        for tier in tiers {
            let variant_id = format!("{stream_id}_{}", tier.name());
            let config = StreamConfig {
                quality: *tier,
                ..self.default_stream_config()
            };
            self.start_stream(&variant_id, input, config).await?;
            variant_ids.push(variant_id);
        }

        let dir = self.root.join(stream_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| TranscodeError::Io {
                source,
                path: dir.clone(),
            })?;
        let master = master_playlist(&variant_ids, tiers);
        let master_path = dir.join(MASTER_PLAYLIST_NAME);
        tokio::fs::write(&master_path, master)
            .await
            .map_err(|source| TranscodeError::Io {
                source,
                path: master_path,
            })?;

        let slot = self.slot(stream_id).await;
        let mut state = slot.state.lock().await;
        state.dir = dir;
        state.playlist_name = MASTER_PLAYLIST_NAME;
        state.variants = variant_ids;
        state.status = StreamStatus::Starting;
        state.error = None;
        state.finished_at = None;
        info!(
            stream = %stream_id,
            tiers = tiers.len(),
            "adaptive ladder started"
        );
        Ok(state.info(&slot.id))
    }

    /// A plain stream is ready once its first segment hit the disk; an
    /// adaptive parent once every variant is.
    pub async fn is_stream_ready(&self, stream_id: &str) -> bool {
        let Some(slot) = self.lookup(stream_id).await else {
            return false;
        };
        let (variants, status) = {
            let state = slot.state.lock().await;
            (state.variants.clone(), state.status)
        };
        if variants.is_empty() {
            return status == StreamStatus::Running;
        }
        for variant_id in &variants {
            if !self.plain_ready(variant_id).await {
                return false;
            }
        }
        true
    }

    async fn plain_ready(&self, stream_id: &str) -> bool {
        match self.lookup(stream_id).await {
            Some(slot) => slot.state.lock().await.status == StreamStatus::Running,
            None => false,
        }
    }

    pub async fn stream_info(&self, stream_id: &str) -> Option<StreamInfo> {
        let slot = self.lookup(stream_id).await?;
        let state = slot.state.lock().await;
        Some(state.info(&slot.id))
    }

    pub async fn stream_url(&self, stream_id: &str, base_url: &str) -> TranscodeResult<String> {
        let slot = self
            .lookup(stream_id)
            .await
            .ok_or_else(|| TranscodeError::UnknownStream(stream_id.to_string()))?;
        let state = slot.state.lock().await;
        Ok(format!(
            "{}/{}/{}",
            base_url.trim_end_matches('/'),
            stream_id,
            state.playlist_name
        ))
    }

    /// Reclaims output directories and registry entries of streams that
    /// finished (stopped or errored) longer than `max_age` ago. Running
    /// streams are never touched, however idle.
    pub async fn cleanup(&self, max_age: Duration) -> usize {
        let max_age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
        let now = Utc::now();
        let mut streams = self.streams.lock().await;
        let mut reclaimed = Vec::new();
        for (id, slot) in streams.iter() {
            let state = slot.state.lock().await;
            let expired = matches!(state.status, StreamStatus::Stopped | StreamStatus::Error)
                && state
                    .finished_at
                    .map(|finished| now - finished >= max_age)
                    .unwrap_or(false);
            if expired {
                if let Err(err) = tokio::fs::remove_dir_all(&state.dir).await {
                    debug!(stream = %id, error = %err, "output removal failed during cleanup");
                }
                reclaimed.push(id.clone());
            }
        }
        for id in &reclaimed {
            streams.remove(id);
            info!(stream = %id, "reclaimed transcode output");
        }
        reclaimed.len()
    }

    /// Tears every live encoder down; intended for process shutdown.
    pub async fn shutdown(&self) {
        let slots: Vec<Arc<StreamSlot>> = self.streams.lock().await.values().cloned().collect();
        for slot in slots {
            let mut state = slot.state.lock().await;
            if state.child.is_some() {
                self.teardown_locked(&mut state).await;
                state.status = StreamStatus::Stopped;
                state.finished_at = Some(Utc::now());
            }
        }
    }

    async fn slot(&self, stream_id: &str) -> Arc<StreamSlot> {
        let mut streams = self.streams.lock().await;
        streams
            .entry(stream_id.to_string())
            .or_insert_with(|| {
                Arc::new(StreamSlot {
                    id: stream_id.to_string(),
                    state: AsyncMutex::new(StreamState::new(self.root.join(stream_id))),
                })
            })
            .clone()
    }

    async fn lookup(&self, stream_id: &str) -> Option<Arc<StreamSlot>> {
        self.streams.lock().await.get(stream_id).cloned()
    }

    async fn teardown_locked(&self, state: &mut StreamState) {
        if let Some(monitor) = state.monitor.take() {
            monitor.abort();
        }
        if let Some(child) = state.child.take() {
            terminate(child, self.stop_grace).await;
        }
    }
}

/// Graceful-then-forced termination: `q` on stdin asks the encoder to finish
/// the current segment and exit; past the grace window it is killed.
async fn terminate(mut child: Child, grace: Duration) {
    if let Some(mut stdin) = child.stdin.take() {
        let _ = stdin.write_all(b"q").await;
        let _ = stdin.shutdown().await;
    }
    match timeout(grace, child.wait()).await {
        Ok(_) => {}
        Err(_) => {
            warn!("encoder ignored graceful quit, killing");
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
    }
}

/// Supervises one encoder: flips the stream to `Running` when the first
/// non-empty segment lands on disk, and records the exit outcome. Readiness
/// is probed structurally rather than by parsing encoder log output, so it
/// is not coupled to one encoder's wording.
async fn supervise(slot: Arc<StreamSlot>, poll: Duration) {
    loop {
        sleep(poll).await;
        let mut state = slot.state.lock().await;
        let Some(child) = state.child.as_mut() else {
            break;
        };
        match child.try_wait() {
            Ok(Some(exit)) => {
                state.child = None;
                state.finished_at = Some(Utc::now());
                if exit.success() {
                    state.status = StreamStatus::Stopped;
                    info!(stream = %slot.id, "encoder exited cleanly");
                } else {
                    state.status = StreamStatus::Error;
                    let message = match exit.code() {
                        Some(code) => format!("encoder exited with status {code}"),
                        None => "encoder terminated by signal".to_string(),
                    };
                    warn!(stream = %slot.id, error = %message, "encoder failed");
                    state.error = Some(message);
                }
                break;
            }
            Ok(None) => {
                if state.status == StreamStatus::Starting && has_media_segment(&state.dir) {
                    state.status = StreamStatus::Running;
                    info!(stream = %slot.id, "first segment on disk, stream running");
                }
            }
            Err(err) => {
                state.child = None;
                state.status = StreamStatus::Error;
                state.error = Some(format!("encoder wait failed: {err}"));
                state.finished_at = Some(Utc::now());
                break;
            }
        }
    }
}

fn has_media_segment(dir: &Path) -> bool {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return false;
    };
    entries.flatten().any(|entry| {
        let path = entry.path();
        path.extension().map(|ext| ext == "ts").unwrap_or(false)
            && entry.metadata().map(|meta| meta.len() > 0).unwrap_or(false)
    })
}

fn encoder_args(input: &Path, dir: &Path, config: &StreamConfig, log_level: &str) -> Vec<String> {
    let mut args = vec![
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        log_level.to_string(),
    ];
    if let Some(offset) = config.start_offset {
        args.push("-ss".to_string());
        args.push(format!("{offset}"));
    }
    args.push("-i".to_string());
    args.push(input.to_string_lossy().to_string());
    args.push("-c:v".to_string());
    args.push("libx264".to_string());
    args.push("-preset".to_string());
    args.push(config.quality.preset().to_string());
    args.push("-crf".to_string());
    args.push(config.quality.crf().to_string());
    if let Some(height) = config.quality.scale_height() {
        args.push("-vf".to_string());
        args.push(format!("scale=-2:{height}"));
    }
    args.push("-c:a".to_string());
    args.push("aac".to_string());
    args.push("-b:a".to_string());
    args.push(config.quality.audio_bitrate().to_string());
    args.push("-ac".to_string());
    args.push("2".to_string());
    args.push("-f".to_string());
    args.push("hls".to_string());
    args.push("-hls_time".to_string());
    args.push(config.segment_duration.to_string());
    args.push("-hls_list_size".to_string());
    args.push(config.playlist_size.to_string());
    args.push("-hls_flags".to_string());
    args.push("delete_segments".to_string());
    args.push("-hls_segment_filename".to_string());
    args.push(dir.join(SEGMENT_FILE_TEMPLATE).to_string_lossy().to_string());
    args.push(dir.join(MEDIA_PLAYLIST_NAME).to_string_lossy().to_string());
    args
}

fn master_playlist(variant_ids: &[String], tiers: &[QualityTier]) -> String {
    let mut playlist = String::from("#EXTM3U\n#EXT-X-VERSION:3\n");
    for (variant_id, tier) in variant_ids.iter().zip(tiers) {
        playlist.push_str(&format!(
            "#EXT-X-STREAM-INF:BANDWIDTH={},RESOLUTION={}\n",
            tier.bandwidth(),
            tier.resolution()
        ));
        playlist.push_str(&format!("../{variant_id}/{MEDIA_PLAYLIST_NAME}\n"));
    }
    playlist
}
