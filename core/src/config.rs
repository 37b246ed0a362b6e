//! Configuration management (config.toml)
//!
//! Handles loading, saving, and providing defaults for frontend settings.
//! Settings are stored in TOML format in the platform-specific config directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::audio::MuteMode;
use crate::error::ConfigError;
use crate::mic::MicInputMode;
use crate::save_flush::FlushTiming;

/// Maximum output volume (unity gain).
pub const MAX_VOLUME: u16 = 256;

/// Frontend configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    /// Audio output settings
    #[serde(default)]
    pub audio: AudioConfig,
    /// Microphone settings
    #[serde(default)]
    pub mic: MicConfig,
    /// Emulation worker timing
    #[serde(default)]
    pub emu: EmuConfig,
    /// Save persistence
    #[serde(default)]
    pub save: SaveConfig,
}

/// Audio configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Output volume (default: 256, range: 0-256)
    #[serde(default = "default_volume")]
    pub volume: u16,
    /// Device buffer size in stereo frames (default: 1024)
    #[serde(default = "default_buffer_size")]
    pub buffer_size: u32,
    /// Requested device sample rate (default: 48000)
    #[serde(default = "default_frequency")]
    pub frequency: u32,
    /// Which instances are audible when several run at once
    #[serde(default)]
    pub multi_instance: MuteMode,
    /// Longest the worker waits for the device to drain (default: 500)
    #[serde(default = "default_sync_timeout_ms")]
    pub sync_timeout_ms: u64,
}

/// Microphone configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MicConfig {
    /// Source of microphone samples (default: silence)
    #[serde(default)]
    pub input: MicInputMode,
    /// Capture device name; `None` uses the system default
    #[serde(default)]
    pub device: Option<String>,
    /// WAV file looped in `wav` mode
    #[serde(default)]
    pub wav_path: Option<PathBuf>,
}

/// Emulation worker configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmuConfig {
    /// Frame budget in microseconds (default: 16667)
    #[serde(default = "default_frame_period_us")]
    pub frame_period_us: u64,
    /// Sleep while paused, in milliseconds (default: 75)
    #[serde(default = "default_idle_period_ms")]
    pub idle_period_ms: u64,
    /// Pause while the window is unfocused (default: false)
    #[serde(default)]
    pub pause_on_focus_loss: bool,
    /// Rate at which the machine produces audio (default: 32823.6328125)
    #[serde(default = "default_core_sample_rate")]
    pub core_sample_rate: f64,
    /// Emulated frame rate (default: 60)
    #[serde(default = "default_target_fps")]
    pub target_fps: f64,
}

/// Save flush configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveConfig {
    /// Quiet period before a save is written (default: 2000)
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Flush thread poll interval (default: 100)
    #[serde(default = "default_poll_ms")]
    pub poll_ms: u64,
}

fn default_volume() -> u16 {
    MAX_VOLUME
}
fn default_buffer_size() -> u32 {
    1024
}
fn default_frequency() -> u32 {
    48_000
}
fn default_sync_timeout_ms() -> u64 {
    500
}
fn default_frame_period_us() -> u64 {
    16_667
}
fn default_idle_period_ms() -> u64 {
    75
}
fn default_core_sample_rate() -> f64 {
    32_823.632_812_5
}
fn default_target_fps() -> f64 {
    60.0
}
fn default_debounce_ms() -> u64 {
    2000
}
fn default_poll_ms() -> u64 {
    100
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            volume: default_volume(),
            buffer_size: default_buffer_size(),
            frequency: default_frequency(),
            multi_instance: MuteMode::default(),
            sync_timeout_ms: default_sync_timeout_ms(),
        }
    }
}

impl Default for EmuConfig {
    fn default() -> Self {
        Self {
            frame_period_us: default_frame_period_us(),
            idle_period_ms: default_idle_period_ms(),
            pause_on_focus_loss: false,
            core_sample_rate: default_core_sample_rate(),
            target_fps: default_target_fps(),
        }
    }
}

impl Default for SaveConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            poll_ms: default_poll_ms(),
        }
    }
}

impl AudioConfig {
    pub fn sync_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_timeout_ms)
    }
}

impl EmuConfig {
    pub fn frame_period(&self) -> Duration {
        Duration::from_micros(self.frame_period_us)
    }

    pub fn idle_period(&self) -> Duration {
        Duration::from_millis(self.idle_period_ms)
    }
}

impl SaveConfig {
    pub fn timing(&self) -> FlushTiming {
        FlushTiming {
            debounce: Duration::from_millis(self.debounce_ms),
            poll: Duration::from_millis(self.poll_ms),
        }
    }
}

impl Config {
    /// Replace out-of-range values with usable ones.
    pub fn sanitize(&mut self) {
        self.audio.volume = self.audio.volume.min(MAX_VOLUME);
        if self.audio.buffer_size == 0 {
            self.audio.buffer_size = default_buffer_size();
        }
        if self.audio.frequency == 0 {
            self.audio.frequency = default_frequency();
        }
        if self.emu.target_fps <= 0.0 {
            self.emu.target_fps = default_target_fps();
        }
        if self.emu.core_sample_rate <= 0.0 {
            self.emu.core_sample_rate = default_core_sample_rate();
        }
    }
}

/// Returns the platform-specific configuration directory.
///
/// On Windows: `%APPDATA%\emuhost\config`
/// On macOS: `~/Library/Application Support/io.emuhost.emuhost`
/// On Linux: `~/.config/emuhost`
///
/// Returns `None` if the home directory cannot be determined.
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("io.emuhost", "", "emuhost")
        .map(|dirs| dirs.config_dir().to_path_buf())
}

/// Loads the configuration from disk.
///
/// Reads `config.toml` from the platform's configuration directory.
/// Returns default values if the file doesn't exist or cannot be parsed.
pub fn load() -> Config {
    let Some(dir) = config_dir() else {
        return Config::default();
    };
    let path = dir.join("config.toml");
    if !path.exists() {
        return Config::default();
    }
    match load_from(&path) {
        Ok(config) => config,
        Err(e) => {
            warn!("Ignoring config at {}: {}", path.display(), e);
            Config::default()
        }
    }
}

/// Loads and sanitizes the configuration at `path`.
pub fn load_from(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut config: Config = toml::from_str(&content)?;
    config.sanitize();
    Ok(config)
}

/// Saves the configuration to disk.
///
/// Writes `config.toml` to the platform's configuration directory.
/// Creates the directory if it doesn't exist.
pub fn save(config: &Config) -> Result<(), ConfigError> {
    if let Some(dir) = config_dir() {
        save_to(config, &dir.join("config.toml"))?;
    }
    Ok(())
}

/// Writes the configuration to `path`, creating parent directories.
pub fn save_to(config: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
