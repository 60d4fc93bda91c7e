use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RipcastConfig {
    pub system: SystemSection,
    pub paths: PathsSection,
}

impl RipcastConfig {
    pub fn resolve_path<P: AsRef<Path>>(&self, candidate: P) -> PathBuf {
        let path = candidate.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.paths.base_dir).join(path)
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SystemSection {
    pub node_name: String,
    pub environment: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsSection {
    pub base_dir: String,
    pub streams_dir: String,
    pub logs_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrowserConfig {
    pub chromium: ChromiumSection,
    pub flags: FlagsSection,
    pub user_agents: UserAgentSection,
    pub viewport: ViewportSection,
    pub fingerprint: FingerprintSection,
    pub capture: CaptureSection,
    pub sources: SourcesSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChromiumSection {
    pub executable_path: String,
    pub headless: bool,
    pub sandbox: bool,
    pub disable_gpu: bool,
    pub tab_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FlagsSection {
    pub no_first_run: bool,
    pub disable_automation_controlled: bool,
    pub disable_blink_features: Vec<String>,
    pub mute_audio: bool,
    pub autoplay_policy: String,
    pub lang: Option<String>,
    pub accept_language: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentSection {
    pub pool: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ViewportSection {
    pub resolutions: Vec<[u32; 2]>,
    pub jitter_pixels: u32,
    pub device_scale_factor: [f32; 2],
}

#[derive(Debug, Clone, Deserialize)]
pub struct FingerprintSection {
    pub enable_canvas_noise: bool,
    pub enable_webgl_mask: bool,
    pub enable_audio_mask: bool,
    pub enable_navigator_mask: bool,
    pub canvas_noise_range: [i32; 2],
    pub audio_noise: f64,
    pub webgl_vendor: Option<String>,
    pub webgl_renderer: Option<String>,
    pub languages: Vec<String>,
    pub plugin_names: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureSection {
    pub settle_seconds: u64,
    pub play_selectors: Vec<String>,
    pub manifest_pattern: Option<String>,
}

/// URL templates with `{id}`, `{season}` and `{episode}` placeholders used to
/// build the canonical page URL for an identified title.
#[derive(Debug, Clone, Deserialize)]
pub struct SourcesSection {
    pub movie_url_template: String,
    pub tv_url_template: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    pub identity: IdentitySection,
    pub routes: RoutesSection,
    pub sessions: SessionsSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdentitySection {
    pub user_agent: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoutesSection {
    pub playlist_path: String,
    pub segment_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionsSection {
    pub max_age_minutes: u64,
    pub sweep_interval_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranscodeConfig {
    pub ffmpeg: FfmpegSection,
    pub hls: HlsOutputSection,
    pub limits: TranscodeLimitsSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FfmpegSection {
    pub binary: String,
    pub log_level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HlsOutputSection {
    pub segment_duration: u32,
    pub playlist_size: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranscodeLimitsSection {
    pub stop_grace_seconds: u64,
    pub readiness_poll_ms: u64,
}

#[derive(Debug, Clone)]
pub struct ConfigBundle {
    pub ripcast: RipcastConfig,
    pub browser: BrowserConfig,
    pub proxy: ProxyConfig,
    pub transcode: TranscodeConfig,
}

impl ConfigBundle {
    pub fn from_directory<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let ripcast = load_ripcast_config(dir.join("ripcast.toml"))?;
        let browser = load_browser_config(dir.join("browser.toml"))?;
        let proxy = load_proxy_config(dir.join("proxy.toml"))?;
        let transcode = load_transcode_config(dir.join("transcode.toml"))?;
        Ok(Self {
            ripcast,
            browser,
            proxy,
            transcode,
        })
    }
}

pub fn load_ripcast_config<P: AsRef<Path>>(path: P) -> Result<RipcastConfig> {
    load_toml(path)
}

pub fn load_browser_config<P: AsRef<Path>>(path: P) -> Result<BrowserConfig> {
    load_toml(path)
}

pub fn load_proxy_config<P: AsRef<Path>>(path: P) -> Result<ProxyConfig> {
    load_toml(path)
}

pub fn load_transcode_config<P: AsRef<Path>>(path: P) -> Result<TranscodeConfig> {
    load_toml(path)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}
