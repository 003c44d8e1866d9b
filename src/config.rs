use anyhow::{bail, Context};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct RecordConfig {
    /// Root directory holding `<stream_id>.flv` files
    pub path: PathBuf,
    /// Start a fresh recording whenever a stream is published
    #[serde(default)]
    pub auto_record: bool,
    /// Replay a stored file when a stream with no publisher is requested
    #[serde(default)]
    pub auto_publish: bool,
    #[serde(default = "default_track_timeout_ms")]
    pub track_timeout_ms: u64,
    /// Pace playback by tag timestamps instead of publishing as fast as possible
    #[serde(default = "default_realtime_playback")]
    pub realtime_playback: bool,
}

fn default_track_timeout_ms() -> u64 {
    10_000
}

fn default_realtime_playback() -> bool {
    true
}

impl RecordConfig {
    pub fn track_timeout(&self) -> Duration {
        Duration::from_millis(self.track_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub record: RecordConfig,
}

const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");

impl AppConfig {
    /// Built-in configuration shipped with the binary.
    pub fn load_default() -> anyhow::Result<Self> {
        Self::parse(DEFAULT_CONFIG).context("built-in default configuration")
    }

    pub fn load_from(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("loading {}", path.display()))
    }

    fn parse(text: &str) -> anyhow::Result<Self> {
        let cfg: AppConfig = toml::from_str(text)?;
        if cfg.record.path.as_os_str().is_empty() {
            bail!("record.path must not be empty");
        }
        if cfg.record.track_timeout_ms == 0 {
            bail!("record.track_timeout_ms must be greater than zero");
        }
        Ok(cfg)
    }
}
