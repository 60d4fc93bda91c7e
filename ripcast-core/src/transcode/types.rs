use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub const MEDIA_PLAYLIST_NAME: &str = "playlist.m3u8";
pub const MASTER_PLAYLIST_NAME: &str = "master.m3u8";
pub const SEGMENT_FILE_TEMPLATE: &str = "segment_%05d.ts";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamStatus {
    Starting,
    Running,
    Stopped,
    Error,
}

/// Fixed encoder tuning tiers. The adaptive ladder advertises the bandwidth
/// and resolution pairs below in its master playlist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    Low,
    Medium,
    High,
    Auto,
}

impl QualityTier {
    pub fn name(&self) -> &'static str {
        match self {
            QualityTier::Low => "low",
            QualityTier::Medium => "medium",
            QualityTier::High => "high",
            QualityTier::Auto => "auto",
        }
    }

    pub fn preset(&self) -> &'static str {
        match self {
            QualityTier::Low | QualityTier::Medium | QualityTier::Auto => "veryfast",
            QualityTier::High => "fast",
        }
    }

    pub fn crf(&self) -> u8 {
        match self {
            QualityTier::Low => 28,
            QualityTier::Medium | QualityTier::Auto => 23,
            QualityTier::High => 20,
        }
    }

    /// Target height for the scale filter; `Auto` keeps the source size.
    pub fn scale_height(&self) -> Option<u32> {
        match self {
            QualityTier::Low => Some(480),
            QualityTier::Medium => Some(720),
            QualityTier::High => Some(1080),
            QualityTier::Auto => None,
        }
    }

    pub fn audio_bitrate(&self) -> &'static str {
        match self {
            QualityTier::Low => "96k",
            QualityTier::Medium | QualityTier::Auto => "128k",
            QualityTier::High => "192k",
        }
    }

    pub fn bandwidth(&self) -> u64 {
        match self {
            QualityTier::Low => 800_000,
            QualityTier::Medium | QualityTier::Auto => 1_400_000,
            QualityTier::High => 2_800_000,
        }
    }

    pub fn resolution(&self) -> &'static str {
        match self {
            QualityTier::Low => "842x480",
            QualityTier::Medium | QualityTier::Auto => "1280x720",
            QualityTier::High => "1920x1080",
        }
    }
}

/// Per-stream encoder settings. `playlist_size` is a rolling window: the
/// encoder deletes segments that fall out of it.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub segment_duration: u32,
    pub playlist_size: u32,
    pub quality: QualityTier,
    pub start_offset: Option<f64>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            segment_duration: 4,
            playlist_size: 10,
            quality: QualityTier::Auto,
            start_offset: None,
        }
    }
}

/// Snapshot of one stream's registry entry.
#[derive(Debug, Clone, Serialize)]
pub struct StreamInfo {
    pub id: String,
    pub status: StreamStatus,
    pub dir: PathBuf,
    pub playlist: PathBuf,
    pub error: Option<String>,
}
